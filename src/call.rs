//! A representation for recorded fixed-function GL calls.
//!
//! Each variant is named after the `gleam`-style snake_case method that
//! replays it, and carries its arguments by value. The only argument that
//! does not fit in the variant itself is texture pixel data, which lives in
//! the owning `Frame`'s stash and is referred to by a `Blob`.

use gleam::gl::{GLbitfield, GLenum, GLint, GLsizei, GLuint};

use crate::api::{ApiFunction, Args, Arg};
use crate::error::FrameError;
use crate::raw;

/// The most argument slots any recorded entrypoint takes (`glTexImage2D`).
pub const MAX_CALL_ARGS: usize = 9;

/// A handle to bytes copied into a `Frame`'s stash.
///
/// The generation ties the handle to one frame's worth of stash contents:
/// after the frame is reset, the handle no longer resolves.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub offset: u32,
    pub len: u32,
    pub generation: u32,
}

#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq)]
#[rustfmt::skip]
pub enum Call {
    alpha_func { func: GLenum, reference: f32 },
    begin { mode: GLenum },
    bind_texture { target: GLenum, texture: GLuint },
    blend_func { sfactor: GLenum, dfactor: GLenum },
    clear { buffer_mask: GLbitfield },
    clear_color { r: f32, g: f32, b: f32, a: f32 },
    clear_depth { depth: f64 },
    color_3f { r: f32, g: f32, b: f32 },
    color_3ub { r: u8, g: u8, b: u8 },
    color_4f { r: f32, g: f32, b: f32, a: f32 },
    cull_face { mode: GLenum },
    depth_func { func: GLenum },
    depth_mask { flag: bool },
    depth_range { near: f64, far: f64 },
    disable { cap: GLenum },
    draw_buffer { mode: GLenum },
    enable { cap: GLenum },
    end {},
    finish {},
    flush {},
    front_face { mode: GLenum },
    frustum { left: f64, right: f64, bottom: f64, top: f64, near: f64, far: f64 },
    load_identity {},
    matrix_mode { mode: GLenum },
    ortho { left: f64, right: f64, bottom: f64, top: f64, near: f64, far: f64 },
    polygon_mode { face: GLenum, mode: GLenum },
    pop_matrix {},
    push_matrix {},
    read_pixels {},
    rotate_f { angle: f32, x: f32, y: f32, z: f32 },
    scale_f { x: f32, y: f32, z: f32 },
    shade_model { mode: GLenum },
    tex_coord_2f { s: f32, t: f32 },
    tex_env_f { target: GLenum, pname: GLenum, param: f32 },
    tex_image_2d { target: GLenum, level: GLint, internal_format: GLint, width: GLsizei, height: GLsizei, border: GLint, format: GLenum, ty: GLenum, pixels: Option<Blob> },
    tex_parameter_f { target: GLenum, pname: GLenum, param: f32 },
    translate_f { x: f32, y: f32, z: f32 },
    vertex_2f { x: f32, y: f32 },
    vertex_3f { x: f32, y: f32, z: f32 },
    vertex_4f { x: f32, y: f32, z: f32, w: f32 },
    viewport { x: GLint, y: GLint, width: GLsizei, height: GLsizei },
}

// Plain values only; a `Blob` is an offset, not a pointer.
unsafe impl raw::Simple for Blob {}
unsafe impl raw::Simple for Call {}

impl Call {
    /// Build a call from an entrypoint whose arguments are all plain values.
    ///
    /// Entrypoints that take pointers (`glColor3ubv`, `glTexImage2D`, ...)
    /// need their pointees copied first, which is `FrameInterceptor`'s job;
    /// they are rejected here, as are `glGenTextures` and `SwapBuffers`,
    /// which are never recorded.
    #[rustfmt::skip]
    pub fn from_args(function: ApiFunction, slots: &[Arg]) -> Result<Call, FrameError> {
        if slots.len() > MAX_CALL_ARGS {
            return Err(FrameError::TooManyArgs { function, count: slots.len() });
        }

        let a = Args::new(function, slots);
        use ApiFunction as F;
        Ok(match function {
            F::AlphaFunc => Call::alpha_func { func: a.u32(0)?, reference: a.f32(1)? },
            F::Begin => Call::begin { mode: a.u32(0)? },
            F::BindTexture => Call::bind_texture { target: a.u32(0)?, texture: a.u32(1)? },
            F::BlendFunc => Call::blend_func { sfactor: a.u32(0)?, dfactor: a.u32(1)? },
            F::Clear => Call::clear { buffer_mask: a.u32(0)? },
            F::ClearColor => Call::clear_color { r: a.f32(0)?, g: a.f32(1)?, b: a.f32(2)?, a: a.f32(3)? },
            F::ClearDepth => Call::clear_depth { depth: a.f64(0)? },
            F::Color3f => Call::color_3f { r: a.f32(0)?, g: a.f32(1)?, b: a.f32(2)? },
            F::Color3ub => Call::color_3ub { r: a.u8(0)?, g: a.u8(1)?, b: a.u8(2)? },
            F::Color4f => Call::color_4f { r: a.f32(0)?, g: a.f32(1)?, b: a.f32(2)?, a: a.f32(3)? },
            F::CullFace => Call::cull_face { mode: a.u32(0)? },
            F::DepthFunc => Call::depth_func { func: a.u32(0)? },
            F::DepthMask => Call::depth_mask { flag: a.bool(0)? },
            F::DepthRange => Call::depth_range { near: a.f64(0)?, far: a.f64(1)? },
            F::Disable => Call::disable { cap: a.u32(0)? },
            F::DrawBuffer => Call::draw_buffer { mode: a.u32(0)? },
            F::Enable => Call::enable { cap: a.u32(0)? },
            F::End => Call::end {},
            F::Finish => Call::finish {},
            F::Flush => Call::flush {},
            F::FrontFace => Call::front_face { mode: a.u32(0)? },
            F::Frustum => Call::frustum {
                left: a.f64(0)?, right: a.f64(1)?, bottom: a.f64(2)?, top: a.f64(3)?,
                near: a.f64(4)?, far: a.f64(5)?,
            },
            F::LoadIdentity => Call::load_identity {},
            F::MatrixMode => Call::matrix_mode { mode: a.u32(0)? },
            F::Ortho => Call::ortho {
                left: a.f64(0)?, right: a.f64(1)?, bottom: a.f64(2)?, top: a.f64(3)?,
                near: a.f64(4)?, far: a.f64(5)?,
            },
            F::PolygonMode => Call::polygon_mode { face: a.u32(0)?, mode: a.u32(1)? },
            F::PopMatrix => Call::pop_matrix {},
            F::PushMatrix => Call::push_matrix {},
            F::ReadPixels => Call::read_pixels {},
            F::Rotatef => Call::rotate_f { angle: a.f32(0)?, x: a.f32(1)?, y: a.f32(2)?, z: a.f32(3)? },
            F::Scalef => Call::scale_f { x: a.f32(0)?, y: a.f32(1)?, z: a.f32(2)? },
            F::ShadeModel => Call::shade_model { mode: a.u32(0)? },
            F::TexCoord2f => Call::tex_coord_2f { s: a.f32(0)?, t: a.f32(1)? },
            F::TexEnvf => Call::tex_env_f { target: a.u32(0)?, pname: a.u32(1)?, param: a.f32(2)? },
            F::TexParameterf => Call::tex_parameter_f { target: a.u32(0)?, pname: a.u32(1)?, param: a.f32(2)? },
            F::Translatef => Call::translate_f { x: a.f32(0)?, y: a.f32(1)?, z: a.f32(2)? },
            F::Vertex2f => Call::vertex_2f { x: a.f32(0)?, y: a.f32(1)? },
            F::Vertex3f => Call::vertex_3f { x: a.f32(0)?, y: a.f32(1)?, z: a.f32(2)? },
            F::Vertex4f => Call::vertex_4f { x: a.f32(0)?, y: a.f32(1)?, z: a.f32(2)?, w: a.f32(3)? },
            F::Viewport => Call::viewport { x: a.i32(0)?, y: a.i32(1)?, width: a.i32(2)?, height: a.i32(3)? },

            F::Color3ubv | F::Color4fv | F::Vertex3fv | F::TexImage2D => {
                return Err(FrameError::Unsupported {
                    function,
                    detail: "pointer arguments must be copied before recording".to_string(),
                });
            }
            F::GenTextures | F::SwapBuffers => {
                return Err(FrameError::Unsupported {
                    function,
                    detail: "not a recordable call".to_string(),
                });
            }
        })
    }

    /// Return the stash blob this call refers to, if any.
    pub fn blob(&self) -> Option<Blob> {
        match *self {
            Call::tex_image_2d { pixels, .. } => pixels,
            _ => None,
        }
    }
}

#[test]
fn value_calls() {
    let call = Call::from_args(
        ApiFunction::Viewport,
        &[Arg::I32(0), Arg::I32(0), Arg::I32(320), Arg::I32(240)],
    )
    .unwrap();
    assert_eq!(call, Call::viewport { x: 0, y: 0, width: 320, height: 240 });

    let call = Call::from_args(ApiFunction::DepthMask, &[Arg::U8(0)]).unwrap();
    assert_eq!(call, Call::depth_mask { flag: false });
}

#[test]
fn rejected_calls() {
    let ten = [Arg::U32(0); MAX_CALL_ARGS + 1];
    assert!(matches!(
        Call::from_args(ApiFunction::Enable, &ten),
        Err(FrameError::TooManyArgs { count, .. }) if count == MAX_CALL_ARGS + 1
    ));
    assert!(matches!(
        Call::from_args(ApiFunction::GenTextures, &[Arg::I32(1), Arg::Ptr(std::ptr::null())]),
        Err(FrameError::Unsupported { .. })
    ));
    assert!(matches!(
        Call::from_args(ApiFunction::Vertex3fv, &[Arg::Ptr(std::ptr::null())]),
        Err(FrameError::Unsupported { .. })
    ));
    assert!(matches!(
        Call::from_args(ApiFunction::Vertex2f, &[Arg::F32(1.0)]),
        Err(FrameError::MissingArg { index: 1, .. })
    ));
}
