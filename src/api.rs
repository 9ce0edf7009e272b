//! What the hooking layer hands us: an entrypoint id and its raw arguments.
//!
//! The hook layer knows the C signature of every function it patches, so it
//! can tell us the type of each argument slot. It cannot tell us what a
//! pointer points at; that is `FrameInterceptor`'s job.

use std::ffi::c_void;

use crate::error::FrameError;

/// Every GL entrypoint the game is known to call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ApiFunction {
    AlphaFunc,
    Begin,
    BindTexture,
    BlendFunc,
    Clear,
    ClearColor,
    ClearDepth,
    Color3f,
    Color3ub,
    Color3ubv,
    Color4f,
    Color4fv,
    CullFace,
    DepthFunc,
    DepthMask,
    DepthRange,
    Disable,
    DrawBuffer,
    Enable,
    End,
    Finish,
    Flush,
    FrontFace,
    Frustum,
    GenTextures,
    LoadIdentity,
    MatrixMode,
    Ortho,
    PolygonMode,
    PopMatrix,
    PushMatrix,
    ReadPixels,
    Rotatef,
    Scalef,
    ShadeModel,
    SwapBuffers,
    TexCoord2f,
    TexEnvf,
    TexImage2D,
    TexParameterf,
    Translatef,
    Vertex2f,
    Vertex3f,
    Vertex3fv,
    Vertex4f,
    Viewport,
}

impl ApiFunction {
    /// The C name of the entrypoint, for diagnostics.
    pub fn name(self) -> &'static str {
        use ApiFunction::*;
        match self {
            AlphaFunc => "glAlphaFunc",
            Begin => "glBegin",
            BindTexture => "glBindTexture",
            BlendFunc => "glBlendFunc",
            Clear => "glClear",
            ClearColor => "glClearColor",
            ClearDepth => "glClearDepth",
            Color3f => "glColor3f",
            Color3ub => "glColor3ub",
            Color3ubv => "glColor3ubv",
            Color4f => "glColor4f",
            Color4fv => "glColor4fv",
            CullFace => "glCullFace",
            DepthFunc => "glDepthFunc",
            DepthMask => "glDepthMask",
            DepthRange => "glDepthRange",
            Disable => "glDisable",
            DrawBuffer => "glDrawBuffer",
            Enable => "glEnable",
            End => "glEnd",
            Finish => "glFinish",
            Flush => "glFlush",
            FrontFace => "glFrontFace",
            Frustum => "glFrustum",
            GenTextures => "glGenTextures",
            LoadIdentity => "glLoadIdentity",
            MatrixMode => "glMatrixMode",
            Ortho => "glOrtho",
            PolygonMode => "glPolygonMode",
            PopMatrix => "glPopMatrix",
            PushMatrix => "glPushMatrix",
            ReadPixels => "glReadPixels",
            Rotatef => "glRotatef",
            Scalef => "glScalef",
            ShadeModel => "glShadeModel",
            SwapBuffers => "SwapBuffers",
            TexCoord2f => "glTexCoord2f",
            TexEnvf => "glTexEnvf",
            TexImage2D => "glTexImage2D",
            TexParameterf => "glTexParameterf",
            Translatef => "glTranslatef",
            Vertex2f => "glVertex2f",
            Vertex3f => "glVertex3f",
            Vertex3fv => "glVertex3fv",
            Vertex4f => "glVertex4f",
            Viewport => "glViewport",
        }
    }
}

/// One argument slot, as delivered by the hook layer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Arg {
    U8(u8),
    U32(u32),
    I32(i32),
    F32(f32),
    F64(f64),
    Ptr(*const c_void),
}

impl Arg {
    pub fn type_name(&self) -> &'static str {
        match self {
            Arg::U8(_) => "u8",
            Arg::U32(_) => "u32",
            Arg::I32(_) => "i32",
            Arg::F32(_) => "f32",
            Arg::F64(_) => "f64",
            Arg::Ptr(_) => "pointer",
        }
    }
}

/// Typed access to a call's argument slots, with errors that say which
/// entrypoint and which slot went wrong.
pub struct Args<'a> {
    function: ApiFunction,
    slots: &'a [Arg],
}

macro_rules! typed_getters {
    ( $( $getter:ident -> $type:ty { $( $pattern:pat => $value:expr ),* $(,)? } )* ) => {
        $(
            pub fn $getter(&self, index: usize) -> Result<$type, FrameError> {
                match *self.slot(index)? {
                    $( $pattern => Ok($value), )*
                    _ => Err(FrameError::ArgType {
                        function: self.function,
                        index,
                        expected: stringify!($type),
                    }),
                }
            }
        )*
    }
}

impl<'a> Args<'a> {
    pub fn new(function: ApiFunction, slots: &'a [Arg]) -> Args<'a> {
        Args { function, slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, index: usize) -> Result<&Arg, FrameError> {
        self.slots.get(index).ok_or(FrameError::MissingArg {
            function: self.function,
            index,
        })
    }

    // Integer slots are accepted in either signedness: the hook layer reports
    // GLsizei and GLint as i32 and GLenum as u32, but callers are not always
    // consistent about which is which.
    typed_getters! {
        u8 -> u8 { Arg::U8(v) => v }
        u32 -> u32 { Arg::U32(v) => v, Arg::I32(v) => v as u32, Arg::U8(v) => v as u32 }
        i32 -> i32 { Arg::I32(v) => v, Arg::U32(v) => v as i32 }
        f32 -> f32 { Arg::F32(v) => v }
        f64 -> f64 { Arg::F64(v) => v, Arg::F32(v) => v as f64 }
        ptr -> *const c_void { Arg::Ptr(v) => v }
    }

    pub fn bool(&self, index: usize) -> Result<bool, FrameError> {
        match *self.slot(index)? {
            Arg::U8(v) => Ok(v != 0),
            Arg::U32(v) => Ok(v != 0),
            _ => Err(FrameError::ArgType {
                function: self.function,
                index,
                expected: "bool",
            }),
        }
    }
}

#[test]
fn typed_access() {
    let slots = [Arg::U32(0x0BE2), Arg::F32(0.5), Arg::U8(1)];
    let args = Args::new(ApiFunction::AlphaFunc, &slots);
    assert_eq!(args.u32(0).unwrap(), 0x0BE2);
    assert_eq!(args.f32(1).unwrap(), 0.5);
    assert!(args.bool(2).unwrap());
    assert!(matches!(args.f32(0), Err(FrameError::ArgType { index: 0, .. })));
    assert!(matches!(args.u32(3), Err(FrameError::MissingArg { index: 3, .. })));
}
