//! The hook-side half of the pipeline: record the game's calls as they
//! happen, and hand each finished frame to whoever will replay it.
//!
//! `FrameInterceptor::on_api_call` runs on the game's thread, once per hooked
//! entrypoint. It copies anything the call passes by pointer, keeps the
//! shadow `PipelineState` current, and appends the call to the frame. On
//! `SwapBuffers` it calls the `FrameSink`, which blocks until both eyes have
//! been rendered, then starts the next frame.
//!
//! Between swaps the game thread is the only party touching the frame; while
//! the sink runs, the game thread is parked inside it. The mutex around the
//! frame is never contended, it just lets the frame cross to the presentation
//! thread without `unsafe`.

use gleam::gl::{self, GLenum};
use parking_lot::Mutex;

use std::rc::Rc;
use std::sync::Arc;

use crate::api::{ApiFunction, Arg, Args};
use crate::call::Call;
use crate::error::FrameError;
use crate::frame::Frame;
use crate::gl::{FixedFunctionGl, LUMINANCE, MODELVIEW_MATRIX, PROJECTION_MATRIX};
use crate::state::PipelineState;

/// A frame shared between the game thread and the presentation thread.
pub type SharedFrame = Arc<Mutex<Frame>>;

/// Receives each completed frame.
///
/// `on_frame_available` must not return until it is done reading the frame:
/// as soon as it returns, the interceptor resets the frame and starts
/// recording into it again.
pub trait FrameSink: Send + Sync {
    fn on_frame_available(&self, frame: &SharedFrame);
}

pub struct FrameInterceptor {
    frame: SharedFrame,
    state: PipelineState,
    game_gl: Rc<dyn FixedFunctionGl>,
    sink: Arc<dyn FrameSink>,
    frames_delivered: u64,
}

impl FrameInterceptor {
    /// `game_gl` must be the game's own context: the interceptor reads the
    /// matrix stacks back from it at every frame boundary.
    pub fn new(frame: Frame, game_gl: Rc<dyn FixedFunctionGl>, sink: Arc<dyn FrameSink>) -> FrameInterceptor {
        FrameInterceptor {
            frame: Arc::new(Mutex::new(frame)),
            state: PipelineState::default(),
            game_gl,
            sink,
            frames_delivered: 0,
        }
    }

    pub fn frame(&self) -> &SharedFrame {
        &self.frame
    }

    /// The shadow state as of the most recent call.
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }

    /// Handle one hooked call. Returns whether the hook layer should let the
    /// call through to the game's real context.
    ///
    /// Any `Err` means the recorded stream can no longer be replayed
    /// faithfully; the hook layer should treat it as fatal.
    ///
    /// Safety: every `Arg::Ptr` in `args` must point to as much readable
    /// memory as `function` reads through that argument.
    pub unsafe fn on_api_call(&mut self, function: ApiFunction, args: &[Arg]) -> Result<bool, FrameError> {
        if function == ApiFunction::SwapBuffers {
            self.end_frame();
            // The game's window never shows anything.
            return Ok(false);
        }

        let mut frame = self.frame.lock();
        let call = match function {
            ApiFunction::Color3ubv => {
                let rgb = read_array::<u8>(function, args, 3)?;
                Call::color_3ub { r: rgb[0], g: rgb[1], b: rgb[2] }
            }
            ApiFunction::Color4fv => {
                let rgba = read_array::<f32>(function, args, 4)?;
                Call::color_4f { r: rgba[0], g: rgba[1], b: rgba[2], a: rgba[3] }
            }
            ApiFunction::Vertex3fv => {
                let xyz = read_array::<f32>(function, args, 3)?;
                Call::vertex_3f { x: xyz[0], y: xyz[1], z: xyz[2] }
            }
            ApiFunction::TexImage2D => stash_tex_image_2d(&mut frame, args)?,
            ApiFunction::GenTextures => {
                log::error!("glGenTextures called; texture names are assumed to be chosen by the game");
                return Err(FrameError::Unsupported {
                    function,
                    detail: "the game is expected to pick its own texture names".to_string(),
                });
            }
            _ => Call::from_args(function, args)?,
        };

        // The shadow state only moves once the call is in the frame.
        let mut next = self.state;
        next.apply(&call)?;
        frame.record(call)?;
        self.state = next;
        Ok(true)
    }

    fn end_frame(&mut self) {
        {
            let frame = self.frame.lock();
            if frame.is_empty() {
                log::debug!("swap with no recorded calls");
            } else {
                log::debug!("frame {} complete: {} calls", self.frames_delivered, frame.get_n_api_commands());
            }
        }

        self.sink.on_frame_available(&self.frame);
        self.frames_delivered += 1;

        // The game sets both matrices up from scratch every frame, so rather
        // than tracking every matrix call, read them back at the boundary.
        self.state.modelview_matrix = self.game_gl.get_matrix_d(MODELVIEW_MATRIX);
        self.state.projection_matrix = self.game_gl.get_matrix_d(PROJECTION_MATRIX);

        let mut frame = self.frame.lock();
        frame.reset();
        frame.set_start_state(self.state);
    }
}

unsafe fn read_array<T: Copy>(function: ApiFunction, args: &[Arg], len: usize) -> Result<Vec<T>, FrameError> {
    let ptr = Args::new(function, args).ptr(0)? as *const T;
    if ptr.is_null() {
        log::error!("{} called with a null pointer", function.name());
        return Err(FrameError::Unsupported {
            function,
            detail: "null pointer".to_string(),
        });
    }
    Ok(std::slice::from_raw_parts(ptr, len).to_vec())
}

/// Copy a texture upload's pixels into the frame's stash.
///
/// The game never changes `GL_UNPACK_ALIGNMENT` from its default of 4, so
/// rows are padded to a multiple of four pixels. That only holds for
/// single-byte components, which is all the game uploads.
unsafe fn stash_tex_image_2d(frame: &mut Frame, args: &[Arg]) -> Result<Call, FrameError> {
    let function = ApiFunction::TexImage2D;
    let a = Args::new(function, args);
    let target = a.u32(0)?;
    let level = a.i32(1)?;
    let internal_format = a.i32(2)?;
    let width = a.i32(3)?;
    let height = a.i32(4)?;
    let border = a.i32(5)?;
    let format = a.u32(6)?;
    let ty = a.u32(7)?;
    let data = a.ptr(8)?;

    let components = bytes_per_pixel(format).ok_or_else(|| FrameError::Unsupported {
        function,
        detail: format!("pixel format 0x{:x}", format),
    })?;
    if ty != gl::UNSIGNED_BYTE {
        return Err(FrameError::Unsupported {
            function,
            detail: format!("pixel type 0x{:x}", ty),
        });
    }
    if width < 0 || height < 0 {
        return Err(FrameError::Unsupported {
            function,
            detail: format!("size {}x{}", width, height),
        });
    }

    let pixels = if data.is_null() {
        None
    } else {
        let len = upload_size(width, height, components);
        let bytes = std::slice::from_raw_parts(data as *const u8, len);
        Some(frame.stash_bytes(bytes)?)
    };

    Ok(Call::tex_image_2d {
        target,
        level,
        internal_format,
        width,
        height,
        border,
        format,
        ty,
        pixels,
    })
}

pub(crate) fn bytes_per_pixel(format: GLenum) -> Option<usize> {
    match format {
        LUMINANCE => Some(1),
        gl::RGBA => Some(4),
        _ => None,
    }
}

/// Bytes a `width` x `height` upload reads at an unpack alignment of 4.
pub(crate) fn upload_size(width: i32, height: i32, components: usize) -> usize {
    let row = (width as usize * components + 3) & !3;
    row * height as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_gl::MockGl;
    use crate::slab::SlabAllocator;
    use std::os::raw::c_void;

    fn as_arg_ptr<T>(values: &[T]) -> Arg {
        Arg::Ptr(values.as_ptr() as *const c_void)
    }

    /// Records the calls of each frame it is handed.
    #[derive(Default)]
    struct Collect {
        frames: Mutex<Vec<(Vec<Call>, PipelineState)>>,
    }

    impl FrameSink for Collect {
        fn on_frame_available(&self, frame: &SharedFrame) {
            let frame = frame.lock();
            self.frames
                .lock()
                .push((frame.calls().to_vec(), *frame.get_start_state()));
        }
    }

    fn interceptor(gl: Rc<MockGl>) -> (FrameInterceptor, Arc<Collect>) {
        let sink = Arc::new(Collect::default());
        let frame = Frame::new(&SlabAllocator::new(4096, 1), 64);
        (FrameInterceptor::new(frame, gl, sink.clone()), sink)
    }

    #[test]
    fn tracks_state_while_recording() {
        let (mut interceptor, _sink) = interceptor(Rc::new(MockGl::new()));
        unsafe {
            assert!(interceptor.on_api_call(ApiFunction::Enable, &[Arg::U32(gl::BLEND)]).unwrap());
            interceptor
                .on_api_call(ApiFunction::BindTexture, &[Arg::U32(gl::TEXTURE_2D), Arg::U32(7)])
                .unwrap();
            interceptor
                .on_api_call(
                    ApiFunction::Viewport,
                    &[Arg::I32(0), Arg::I32(0), Arg::I32(320), Arg::I32(240)],
                )
                .unwrap();
        }

        let state = interceptor.state();
        assert!(state.is_blend_enabled);
        assert_eq!(state.bound_texture_2d_gl_id, 7);
        assert_eq!(state.viewport_extents, [320, 240]);
        assert_eq!(interceptor.frame().lock().get_n_api_commands(), 3);
    }

    #[test]
    fn pointer_calls_become_value_calls() {
        let (mut interceptor, _sink) = interceptor(Rc::new(MockGl::new()));
        let rgb = [10_u8, 20, 30];
        let rgba = [0.1_f32, 0.2, 0.3, 0.4];
        let xyz = [1.0_f32, 2.0, 3.0];
        unsafe {
            interceptor.on_api_call(ApiFunction::Color3ubv, &[as_arg_ptr(&rgb)]).unwrap();
            interceptor.on_api_call(ApiFunction::Color4fv, &[as_arg_ptr(&rgba)]).unwrap();
            interceptor.on_api_call(ApiFunction::Vertex3fv, &[as_arg_ptr(&xyz)]).unwrap();
            assert!(matches!(
                interceptor.on_api_call(ApiFunction::Vertex3fv, &[Arg::Ptr(std::ptr::null())]),
                Err(FrameError::Unsupported { .. })
            ));
        }

        let frame = interceptor.frame().lock();
        assert_eq!(
            frame.calls(),
            &[
                Call::color_3ub { r: 10, g: 20, b: 30 },
                Call::color_4f { r: 0.1, g: 0.2, b: 0.3, a: 0.4 },
                Call::vertex_3f { x: 1.0, y: 2.0, z: 3.0 },
            ]
        );
    }

    #[test]
    fn texture_uploads_are_copied() {
        let (mut interceptor, _sink) = interceptor(Rc::new(MockGl::new()));
        // 3 pixels wide pads to 4 at the default unpack alignment.
        let mut pixels: Vec<u8> = (0..8).collect();
        let args = [
            Arg::U32(gl::TEXTURE_2D),
            Arg::I32(0),
            Arg::I32(1),
            Arg::I32(3),
            Arg::I32(2),
            Arg::I32(0),
            Arg::U32(LUMINANCE),
            Arg::U32(gl::UNSIGNED_BYTE),
            as_arg_ptr(&pixels),
        ];
        unsafe {
            interceptor.on_api_call(ApiFunction::TexImage2D, &args).unwrap();
        }
        // The game is free to reuse its buffer once the call returns.
        pixels.iter_mut().for_each(|p| *p = 0xff);

        let frame = interceptor.frame().lock();
        let blob = frame.calls()[0].blob().unwrap();
        assert_eq!(frame.blob(blob).unwrap(), &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn rgba_rows_pad_by_bytes_not_pixels() {
        assert_eq!(upload_size(3, 1, 4), 12);
        assert_eq!(upload_size(3, 2, 1), 8);
        assert_eq!(upload_size(5, 2, 1), 16);

        let (mut interceptor, _sink) = interceptor(Rc::new(MockGl::new()));
        // Two rows of three RGBA pixels: 12 bytes a row, already aligned.
        let pixels: Vec<u8> = (0..24).collect();
        let args = [
            Arg::U32(gl::TEXTURE_2D),
            Arg::I32(0),
            Arg::I32(4),
            Arg::I32(3),
            Arg::I32(2),
            Arg::I32(0),
            Arg::U32(gl::RGBA),
            Arg::U32(gl::UNSIGNED_BYTE),
            as_arg_ptr(&pixels),
        ];
        unsafe {
            interceptor.on_api_call(ApiFunction::TexImage2D, &args).unwrap();
        }
        let frame = interceptor.frame().lock();
        let blob = frame.calls()[0].blob().unwrap();
        assert_eq!(frame.blob(blob).unwrap(), &pixels[..]);
    }

    #[test]
    fn state_does_not_run_ahead_of_a_full_frame() {
        let sink = Arc::new(Collect::default());
        let frame = Frame::new(&SlabAllocator::new(4096, 1), 1);
        let mut interceptor = FrameInterceptor::new(frame, Rc::new(MockGl::new()), sink);
        unsafe {
            interceptor.on_api_call(ApiFunction::Enable, &[Arg::U32(gl::BLEND)]).unwrap();
            assert!(matches!(
                interceptor.on_api_call(ApiFunction::BindTexture, &[Arg::U32(gl::TEXTURE_2D), Arg::U32(7)]),
                Err(FrameError::CapacityExceeded { .. })
            ));
        }
        assert!(interceptor.state().is_blend_enabled);
        assert_eq!(interceptor.state().bound_texture_2d_gl_id, 0);
    }

    #[test]
    fn rejects_unsupported_uploads_and_gen_textures() {
        let (mut interceptor, _sink) = interceptor(Rc::new(MockGl::new()));
        let pixels = [0_u8; 16];
        let args = [
            Arg::U32(gl::TEXTURE_2D),
            Arg::I32(0),
            Arg::I32(3),
            Arg::I32(2),
            Arg::I32(2),
            Arg::I32(0),
            Arg::U32(gl::RGB),
            Arg::U32(gl::UNSIGNED_BYTE),
            as_arg_ptr(&pixels),
        ];
        unsafe {
            assert!(interceptor.on_api_call(ApiFunction::TexImage2D, &args).is_err());
            assert!(interceptor
                .on_api_call(ApiFunction::GenTextures, &[Arg::I32(1), as_arg_ptr(&pixels)])
                .is_err());
        }
        assert!(interceptor.frame().lock().is_empty());
    }

    #[test]
    fn swap_hands_off_and_starts_next_frame() {
        let gl = Rc::new(MockGl::new());
        let mut modelview = crate::gl::IDENTITY_MATRIX;
        modelview[12] = 5.0;
        gl.set_matrix(MODELVIEW_MATRIX, modelview);

        let (mut interceptor, sink) = interceptor(gl.clone());
        unsafe {
            interceptor.on_api_call(ApiFunction::Enable, &[Arg::U32(gl::DEPTH_TEST)]).unwrap();
            interceptor.on_api_call(ApiFunction::Begin, &[Arg::U32(crate::gl::QUADS)]).unwrap();
            interceptor.on_api_call(ApiFunction::End, &[]).unwrap();
            assert!(!interceptor.on_api_call(ApiFunction::SwapBuffers, &[]).unwrap());
        }

        let frames = sink.frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.len(), 3);
        // The first frame started from defaults.
        assert_eq!(frames[0].1, PipelineState::default());

        let frame = interceptor.frame().lock();
        assert_eq!(frame.get_n_api_commands(), 0);
        let start = frame.get_start_state();
        assert!(start.is_depth_test_enabled);
        assert_eq!(start.modelview_matrix, modelview);
        assert_eq!(interceptor.frames_delivered(), 1);
        // Reading the matrices back is not a draw call.
        assert!(gl.log().is_empty());
    }
}
