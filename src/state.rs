//! A shadow copy of the fixed-function pipeline state.
//!
//! The interceptor feeds every recorded call through `PipelineState::apply`,
//! so at a frame boundary the shadow holds exactly what the game's context
//! holds. The frame player re-establishes it before replaying each eye, which
//! is what lets both eyes start from the same place regardless of what the
//! previous eye's replay left behind.
//!
//! Matrices are the exception: the game rebuilds them from scratch every
//! frame, so they are only read back from GL at the frame boundary rather
//! than tracked call by call.

use gleam::gl::{self, GLdouble, GLenum, GLint, GLsizei, GLuint};

use crate::api::ApiFunction;
use crate::call::Call;
use crate::error::FrameError;
use crate::gl::{ALPHA_TEST, FILL, IDENTITY_MATRIX, MODELVIEW, MODULATE, SMOOTH, TEXTURE_ENV, TEXTURE_ENV_MODE};
use crate::raw;

/// The capabilities the game toggles with `glEnable`/`glDisable`.
pub const TRACKED_CAPS: [GLenum; 6] = [
    ALPHA_TEST,
    gl::BLEND,
    gl::CULL_FACE,
    gl::DEPTH_TEST,
    gl::SCISSOR_TEST,
    gl::TEXTURE_2D,
];

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PipelineState {
    pub alpha_func: GLenum,
    pub alpha_ref: f32,
    pub blend_func_sfactor: GLenum,
    pub blend_func_dfactor: GLenum,
    pub bound_texture_2d_gl_id: GLuint,
    pub clear_color: [f32; 4],
    pub clear_depth: f64,
    pub cull_face_mode: GLenum,
    pub depth_func: GLenum,
    pub depth_mask: bool,
    pub depth_range: [f64; 2],
    pub front_face_mode: GLenum,
    pub matrix_mode: GLenum,
    pub polygon_mode_front: GLenum,
    pub polygon_mode_back: GLenum,
    pub shade_model: GLenum,
    pub texture_env_mode: GLenum,
    pub viewport_x1y1: [GLint; 2],
    pub viewport_extents: [GLsizei; 2],

    pub is_alpha_test_enabled: bool,
    pub is_blend_enabled: bool,
    pub is_cull_face_enabled: bool,
    pub is_depth_test_enabled: bool,
    pub is_scissor_test_enabled: bool,
    pub is_texture_2d_enabled: bool,

    pub modelview_matrix: [GLdouble; 16],
    pub projection_matrix: [GLdouble; 16],
}

// Only plain numbers and bools; frame captures write it out byte for byte.
unsafe impl raw::Simple for PipelineState {}

impl Default for PipelineState {
    fn default() -> PipelineState {
        PipelineState {
            alpha_func: gl::ALWAYS,
            alpha_ref: 0.0,
            blend_func_sfactor: gl::ONE,
            blend_func_dfactor: gl::ZERO,
            bound_texture_2d_gl_id: 0,
            clear_color: [0.0; 4],
            clear_depth: 1.0,
            cull_face_mode: gl::BACK,
            depth_func: gl::LESS,
            depth_mask: true,
            depth_range: [0.0, 1.0],
            front_face_mode: gl::CCW,
            matrix_mode: MODELVIEW,
            polygon_mode_front: FILL,
            polygon_mode_back: FILL,
            shade_model: SMOOTH,
            texture_env_mode: MODULATE,
            viewport_x1y1: [0, 0],
            viewport_extents: [640, 480],

            is_alpha_test_enabled: false,
            is_blend_enabled: false,
            is_cull_face_enabled: false,
            is_depth_test_enabled: false,
            is_scissor_test_enabled: false,
            is_texture_2d_enabled: false,

            modelview_matrix: IDENTITY_MATRIX,
            projection_matrix: IDENTITY_MATRIX,
        }
    }
}

impl PipelineState {
    /// Update the shadow for one call about to be recorded.
    ///
    /// Calls outside the tracked subset leave the state alone. Calls inside
    /// it with arguments the player cannot reproduce are rejected.
    pub fn apply(&mut self, call: &Call) -> Result<(), FrameError> {
        match *call {
            Call::alpha_func { func, reference } => {
                self.alpha_func = func;
                self.alpha_ref = reference;
            }
            Call::bind_texture { target, texture } => {
                if target != gl::TEXTURE_2D {
                    return Err(unsupported(
                        ApiFunction::BindTexture,
                        format!("texture target 0x{:x}", target),
                    ));
                }
                self.bound_texture_2d_gl_id = texture;
            }
            Call::blend_func { sfactor, dfactor } => {
                self.blend_func_sfactor = sfactor;
                self.blend_func_dfactor = dfactor;
            }
            Call::clear_color { r, g, b, a } => self.clear_color = [r, g, b, a],
            Call::clear_depth { depth } => self.clear_depth = depth,
            Call::cull_face { mode } => self.cull_face_mode = mode,
            Call::depth_func { func } => self.depth_func = func,
            Call::depth_mask { flag } => self.depth_mask = flag,
            Call::depth_range { near, far } => self.depth_range = [near, far],
            Call::disable { cap } => *self.cap_mut(cap, ApiFunction::Disable)? = false,
            Call::enable { cap } => *self.cap_mut(cap, ApiFunction::Enable)? = true,
            Call::front_face { mode } => self.front_face_mode = mode,
            Call::matrix_mode { mode } => self.matrix_mode = mode,
            Call::polygon_mode { face, mode } => match face {
                gl::FRONT => self.polygon_mode_front = mode,
                gl::BACK => self.polygon_mode_back = mode,
                gl::FRONT_AND_BACK => {
                    self.polygon_mode_front = mode;
                    self.polygon_mode_back = mode;
                }
                _ => {
                    return Err(unsupported(
                        ApiFunction::PolygonMode,
                        format!("face 0x{:x}", face),
                    ))
                }
            },
            Call::shade_model { mode } => self.shade_model = mode,
            Call::tex_env_f { target, pname, param } => {
                if target != TEXTURE_ENV || pname != TEXTURE_ENV_MODE {
                    return Err(unsupported(
                        ApiFunction::TexEnvf,
                        format!("target 0x{:x}, pname 0x{:x}", target, pname),
                    ));
                }
                self.texture_env_mode = param as GLenum;
            }
            Call::viewport { x, y, width, height } => {
                self.viewport_x1y1 = [x, y];
                self.viewport_extents = [width, height];
            }
            _ => (),
        }
        Ok(())
    }

    /// The enable flag for `cap`.
    pub fn is_enabled(&self, cap: GLenum) -> Option<bool> {
        Some(match cap {
            ALPHA_TEST => self.is_alpha_test_enabled,
            gl::BLEND => self.is_blend_enabled,
            gl::CULL_FACE => self.is_cull_face_enabled,
            gl::DEPTH_TEST => self.is_depth_test_enabled,
            gl::SCISSOR_TEST => self.is_scissor_test_enabled,
            gl::TEXTURE_2D => self.is_texture_2d_enabled,
            _ => return None,
        })
    }

    fn cap_mut(&mut self, cap: GLenum, function: ApiFunction) -> Result<&mut bool, FrameError> {
        Ok(match cap {
            ALPHA_TEST => &mut self.is_alpha_test_enabled,
            gl::BLEND => &mut self.is_blend_enabled,
            gl::CULL_FACE => &mut self.is_cull_face_enabled,
            gl::DEPTH_TEST => &mut self.is_depth_test_enabled,
            gl::SCISSOR_TEST => &mut self.is_scissor_test_enabled,
            gl::TEXTURE_2D => &mut self.is_texture_2d_enabled,
            _ => return Err(unsupported(function, format!("capability 0x{:x}", cap))),
        })
    }
}

fn unsupported(function: ApiFunction, detail: String) -> FrameError {
    FrameError::Unsupported { function, detail }
}

#[test]
fn tracks_enables_binds_and_viewport() {
    let mut state = PipelineState::default();
    state.apply(&Call::enable { cap: gl::BLEND }).unwrap();
    state.apply(&Call::bind_texture { target: gl::TEXTURE_2D, texture: 7 }).unwrap();
    state.apply(&Call::viewport { x: 0, y: 0, width: 320, height: 240 }).unwrap();

    assert!(state.is_blend_enabled);
    assert_eq!(state.bound_texture_2d_gl_id, 7);
    assert_eq!(state.viewport_extents, [320, 240]);

    state.apply(&Call::disable { cap: gl::BLEND }).unwrap();
    assert_eq!(state.is_enabled(gl::BLEND), Some(false));
}

#[test]
fn polygon_mode_faces() {
    const LINE: GLenum = 0x1B01;
    let mut state = PipelineState::default();
    state.apply(&Call::polygon_mode { face: gl::FRONT_AND_BACK, mode: LINE }).unwrap();
    assert_eq!((state.polygon_mode_front, state.polygon_mode_back), (LINE, LINE));
    state.apply(&Call::polygon_mode { face: gl::BACK, mode: FILL }).unwrap();
    assert_eq!((state.polygon_mode_front, state.polygon_mode_back), (LINE, FILL));
}

#[test]
fn rejects_untracked_state() {
    let mut state = PipelineState::default();
    assert!(state.apply(&Call::enable { cap: gl::STENCIL_TEST }).is_err());
    assert!(state.apply(&Call::bind_texture { target: gl::TEXTURE_3D, texture: 1 }).is_err());
    assert!(state
        .apply(&Call::tex_env_f { target: TEXTURE_ENV, pname: 0x2201, param: 0.0 })
        .is_err());
    assert_eq!(state, PipelineState::default());
}
