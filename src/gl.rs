//! The slice of OpenGL that capture and replay talk to.
//!
//! `gleam::gl::Gl` covers the core-profile entrypoints, but the game is a
//! GL 1.x program: immediate mode, matrix stacks, `glAlphaFunc`, texture
//! environments. Those are not part of `gleam`, so `GlContext` resolves them by
//! name from the same loader and dispatches them through a small function
//! table. Everything above this module sees one `FixedFunctionGl` trait object,
//! which tests replace with `mock_gl::MockGl`.

use gleam::gl::{self as core_gl, GLbitfield, GLdouble, GLenum, GLfloat, GLint, GLsizei, GLubyte, GLuint};

use std::ffi::c_void;
use std::mem;
use std::rc::Rc;

use crate::error::GlLoadError;

// Fixed-function constants. `gleam` only generates core-profile enums.
pub const ALPHA_TEST: GLenum = 0x0BC0;
pub const LUMINANCE: GLenum = 0x1909;
pub const MODELVIEW: GLenum = 0x1700;
pub const PROJECTION: GLenum = 0x1701;
pub const MODELVIEW_MATRIX: GLenum = 0x0BA6;
pub const PROJECTION_MATRIX: GLenum = 0x0BA7;
pub const MODULATE: GLenum = 0x2100;
pub const SMOOTH: GLenum = 0x1D01;
pub const TEXTURE_ENV: GLenum = 0x2300;
pub const TEXTURE_ENV_MODE: GLenum = 0x2200;
pub const QUADS: GLenum = 0x0007;
pub const FRAMEBUFFER_SRGB: GLenum = 0x8DB9;
pub const FILL: GLenum = 0x1B02;

pub const IDENTITY_MATRIX: [GLdouble; 16] = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

/// The GL entrypoints used by the frame player, the VR renderer and the
/// playback back ends.
///
/// Method names and signatures follow `gleam::gl::Gl` wherever `gleam` has
/// the entrypoint.
pub trait FixedFunctionGl {
    // Fixed-function and immediate mode.
    fn alpha_func(&self, func: GLenum, reference: GLfloat);
    fn begin(&self, mode: GLenum);
    fn end(&self);
    fn color_3f(&self, r: GLfloat, g: GLfloat, b: GLfloat);
    fn color_3ub(&self, r: GLubyte, g: GLubyte, b: GLubyte);
    fn color_4f(&self, r: GLfloat, g: GLfloat, b: GLfloat, a: GLfloat);
    fn frustum(&self, left: GLdouble, right: GLdouble, bottom: GLdouble, top: GLdouble, near: GLdouble, far: GLdouble);
    fn ortho(&self, left: GLdouble, right: GLdouble, bottom: GLdouble, top: GLdouble, near: GLdouble, far: GLdouble);
    fn load_identity(&self);
    fn load_matrix_d(&self, matrix: &[GLdouble; 16]);
    fn matrix_mode(&self, mode: GLenum);
    fn polygon_mode(&self, face: GLenum, mode: GLenum);
    fn pop_matrix(&self);
    fn push_matrix(&self);
    fn rotate_f(&self, angle: GLfloat, x: GLfloat, y: GLfloat, z: GLfloat);
    fn scale_f(&self, x: GLfloat, y: GLfloat, z: GLfloat);
    fn shade_model(&self, mode: GLenum);
    fn tex_coord_2f(&self, s: GLfloat, t: GLfloat);
    fn tex_env_f(&self, target: GLenum, pname: GLenum, param: GLfloat);
    fn translate_f(&self, x: GLfloat, y: GLfloat, z: GLfloat);
    fn vertex_2f(&self, x: GLfloat, y: GLfloat);
    fn vertex_3f(&self, x: GLfloat, y: GLfloat, z: GLfloat);
    fn vertex_4f(&self, x: GLfloat, y: GLfloat, z: GLfloat, w: GLfloat);
    /// Read a 4x4 matrix (`MODELVIEW_MATRIX`, `PROJECTION_MATRIX`).
    fn get_matrix_d(&self, pname: GLenum) -> [GLdouble; 16];

    // State shared with the core profile.
    fn bind_texture(&self, target: GLenum, texture: GLuint);
    fn blend_func(&self, sfactor: GLenum, dfactor: GLenum);
    fn clear(&self, buffer_mask: GLbitfield);
    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32);
    fn clear_depth(&self, depth: f64);
    fn cull_face(&self, mode: GLenum);
    fn depth_func(&self, func: GLenum);
    fn depth_mask(&self, flag: bool);
    fn depth_range(&self, near: f64, far: f64);
    fn disable(&self, cap: GLenum);
    fn enable(&self, cap: GLenum);
    fn front_face(&self, mode: GLenum);
    fn viewport(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei);

    // Textures and framebuffers.
    fn gen_textures(&self, n: GLsizei) -> Vec<GLuint>;
    fn delete_textures(&self, textures: &[GLuint]);
    fn tex_image_2d(
        &self,
        target: GLenum,
        level: GLint,
        internal_format: GLint,
        width: GLsizei,
        height: GLsizei,
        border: GLint,
        format: GLenum,
        ty: GLenum,
        opt_data: Option<&[u8]>,
    );
    fn tex_parameter_i(&self, target: GLenum, pname: GLenum, param: GLint);
    fn tex_parameter_f(&self, target: GLenum, pname: GLenum, param: GLfloat);
    fn gen_framebuffers(&self, n: GLsizei) -> Vec<GLuint>;
    fn delete_framebuffers(&self, framebuffers: &[GLuint]);
    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint);
    fn framebuffer_texture_2d(&self, target: GLenum, attachment: GLenum, textarget: GLenum, texture: GLuint, level: GLint);
    fn framebuffer_texture_layer(&self, target: GLenum, attachment: GLenum, texture: GLuint, level: GLint, layer: GLint);
    fn draw_buffers(&self, bufs: &[GLenum]);
    fn blit_framebuffer(
        &self,
        src_x0: GLint,
        src_y0: GLint,
        src_x1: GLint,
        src_y1: GLint,
        dst_x0: GLint,
        dst_y0: GLint,
        dst_x1: GLint,
        dst_y1: GLint,
        mask: GLbitfield,
        filter: GLenum,
    );
    fn get_error(&self) -> GLenum;
    fn finish(&self);
}

macro_rules! legacy_entrypoints {
    ( $( $field:ident = $symbol:literal ( $( $arg:ident : $type:ty ),* ); )* ) => {
        /// Fixed-function entrypoints, resolved once at load time.
        struct LegacyFns {
            $( $field: unsafe extern "system" fn( $( $type ),* ), )*
        }

        impl LegacyFns {
            unsafe fn load<F>(loadfn: &mut F) -> Result<LegacyFns, GlLoadError>
            where
                F: FnMut(&str) -> *const c_void,
            {
                Ok(LegacyFns {
                    $(
                        $field: {
                            let ptr = loadfn($symbol);
                            if ptr.is_null() {
                                return Err(GlLoadError::MissingSymbol($symbol));
                            }
                            mem::transmute::<*const c_void, unsafe extern "system" fn( $( $type ),* )>(ptr)
                        },
                    )*
                })
            }
        }

        impl GlContext {
            $(
                #[inline]
                fn $field(&self, $( $arg: $type ),* ) {
                    // Safe as long as the context these were loaded from is
                    // current on this thread, which `GlContext::load_with`
                    // requires of its callers.
                    unsafe { (self.legacy.$field)( $( $arg ),* ) }
                }
            )*
        }
    }
}

legacy_entrypoints! {
    gl_alpha_func = "glAlphaFunc"(func: GLenum, reference: GLfloat);
    gl_begin = "glBegin"(mode: GLenum);
    gl_end = "glEnd"();
    gl_color_3f = "glColor3f"(r: GLfloat, g: GLfloat, b: GLfloat);
    gl_color_3ub = "glColor3ub"(r: GLubyte, g: GLubyte, b: GLubyte);
    gl_color_4f = "glColor4f"(r: GLfloat, g: GLfloat, b: GLfloat, a: GLfloat);
    gl_frustum = "glFrustum"(l: GLdouble, r: GLdouble, b: GLdouble, t: GLdouble, n: GLdouble, f: GLdouble);
    gl_ortho = "glOrtho"(l: GLdouble, r: GLdouble, b: GLdouble, t: GLdouble, n: GLdouble, f: GLdouble);
    gl_load_identity = "glLoadIdentity"();
    gl_load_matrix_d = "glLoadMatrixd"(m: *const GLdouble);
    gl_matrix_mode = "glMatrixMode"(mode: GLenum);
    gl_polygon_mode = "glPolygonMode"(face: GLenum, mode: GLenum);
    gl_pop_matrix = "glPopMatrix"();
    gl_push_matrix = "glPushMatrix"();
    gl_rotate_f = "glRotatef"(angle: GLfloat, x: GLfloat, y: GLfloat, z: GLfloat);
    gl_scale_f = "glScalef"(x: GLfloat, y: GLfloat, z: GLfloat);
    gl_shade_model = "glShadeModel"(mode: GLenum);
    gl_tex_coord_2f = "glTexCoord2f"(s: GLfloat, t: GLfloat);
    gl_tex_env_f = "glTexEnvf"(target: GLenum, pname: GLenum, param: GLfloat);
    gl_translate_f = "glTranslatef"(x: GLfloat, y: GLfloat, z: GLfloat);
    gl_vertex_2f = "glVertex2f"(x: GLfloat, y: GLfloat);
    gl_vertex_3f = "glVertex3f"(x: GLfloat, y: GLfloat, z: GLfloat);
    gl_vertex_4f = "glVertex4f"(x: GLfloat, y: GLfloat, z: GLfloat, w: GLfloat);
    gl_get_double_v = "glGetDoublev"(pname: GLenum, data: *mut GLdouble);
}

/// A real GL context: `gleam` for the core profile, plus the fixed-function
/// entrypoints `gleam` does not generate.
pub struct GlContext {
    core: Rc<dyn core_gl::Gl>,
    legacy: LegacyFns,
}

impl GlContext {
    /// Resolve every entrypoint through `loadfn`, typically the platform's
    /// `GetProcAddress`.
    ///
    /// Safety: the context the pointers come from must be a compatibility
    /// profile context, and must be current on every thread that uses the
    /// returned `GlContext`.
    pub unsafe fn load_with<F>(mut loadfn: F) -> Result<GlContext, GlLoadError>
    where
        F: FnMut(&str) -> *const c_void,
    {
        let legacy = LegacyFns::load(&mut loadfn)?;
        let core = core_gl::GlFns::load_with(loadfn);
        log::debug!("resolved fixed-function GL entrypoints");
        Ok(GlContext { core, legacy })
    }

    /// The underlying `gleam` context, for callers that need entrypoints
    /// beyond `FixedFunctionGl`.
    pub fn core(&self) -> &Rc<dyn core_gl::Gl> {
        &self.core
    }
}

impl FixedFunctionGl for GlContext {
    fn alpha_func(&self, func: GLenum, reference: GLfloat) {
        self.gl_alpha_func(func, reference)
    }
    fn begin(&self, mode: GLenum) {
        self.gl_begin(mode)
    }
    fn end(&self) {
        self.gl_end()
    }
    fn color_3f(&self, r: GLfloat, g: GLfloat, b: GLfloat) {
        self.gl_color_3f(r, g, b)
    }
    fn color_3ub(&self, r: GLubyte, g: GLubyte, b: GLubyte) {
        self.gl_color_3ub(r, g, b)
    }
    fn color_4f(&self, r: GLfloat, g: GLfloat, b: GLfloat, a: GLfloat) {
        self.gl_color_4f(r, g, b, a)
    }
    fn frustum(&self, left: GLdouble, right: GLdouble, bottom: GLdouble, top: GLdouble, near: GLdouble, far: GLdouble) {
        self.gl_frustum(left, right, bottom, top, near, far)
    }
    fn ortho(&self, left: GLdouble, right: GLdouble, bottom: GLdouble, top: GLdouble, near: GLdouble, far: GLdouble) {
        self.gl_ortho(left, right, bottom, top, near, far)
    }
    fn load_identity(&self) {
        self.gl_load_identity()
    }
    fn load_matrix_d(&self, matrix: &[GLdouble; 16]) {
        self.gl_load_matrix_d(matrix.as_ptr())
    }
    fn matrix_mode(&self, mode: GLenum) {
        self.gl_matrix_mode(mode)
    }
    fn polygon_mode(&self, face: GLenum, mode: GLenum) {
        self.gl_polygon_mode(face, mode)
    }
    fn pop_matrix(&self) {
        self.gl_pop_matrix()
    }
    fn push_matrix(&self) {
        self.gl_push_matrix()
    }
    fn rotate_f(&self, angle: GLfloat, x: GLfloat, y: GLfloat, z: GLfloat) {
        self.gl_rotate_f(angle, x, y, z)
    }
    fn scale_f(&self, x: GLfloat, y: GLfloat, z: GLfloat) {
        self.gl_scale_f(x, y, z)
    }
    fn shade_model(&self, mode: GLenum) {
        self.gl_shade_model(mode)
    }
    fn tex_coord_2f(&self, s: GLfloat, t: GLfloat) {
        self.gl_tex_coord_2f(s, t)
    }
    fn tex_env_f(&self, target: GLenum, pname: GLenum, param: GLfloat) {
        self.gl_tex_env_f(target, pname, param)
    }
    fn translate_f(&self, x: GLfloat, y: GLfloat, z: GLfloat) {
        self.gl_translate_f(x, y, z)
    }
    fn vertex_2f(&self, x: GLfloat, y: GLfloat) {
        self.gl_vertex_2f(x, y)
    }
    fn vertex_3f(&self, x: GLfloat, y: GLfloat, z: GLfloat) {
        self.gl_vertex_3f(x, y, z)
    }
    fn vertex_4f(&self, x: GLfloat, y: GLfloat, z: GLfloat, w: GLfloat) {
        self.gl_vertex_4f(x, y, z, w)
    }
    fn get_matrix_d(&self, pname: GLenum) -> [GLdouble; 16] {
        let mut matrix = IDENTITY_MATRIX;
        self.gl_get_double_v(pname, matrix.as_mut_ptr());
        matrix
    }

    fn bind_texture(&self, target: GLenum, texture: GLuint) {
        self.core.bind_texture(target, texture)
    }
    fn blend_func(&self, sfactor: GLenum, dfactor: GLenum) {
        self.core.blend_func(sfactor, dfactor)
    }
    fn clear(&self, buffer_mask: GLbitfield) {
        self.core.clear(buffer_mask)
    }
    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        self.core.clear_color(r, g, b, a)
    }
    fn clear_depth(&self, depth: f64) {
        self.core.clear_depth(depth)
    }
    fn cull_face(&self, mode: GLenum) {
        self.core.cull_face(mode)
    }
    fn depth_func(&self, func: GLenum) {
        self.core.depth_func(func)
    }
    fn depth_mask(&self, flag: bool) {
        self.core.depth_mask(flag)
    }
    fn depth_range(&self, near: f64, far: f64) {
        self.core.depth_range(near, far)
    }
    fn disable(&self, cap: GLenum) {
        self.core.disable(cap)
    }
    fn enable(&self, cap: GLenum) {
        self.core.enable(cap)
    }
    fn front_face(&self, mode: GLenum) {
        self.core.front_face(mode)
    }
    fn viewport(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        self.core.viewport(x, y, width, height)
    }

    fn gen_textures(&self, n: GLsizei) -> Vec<GLuint> {
        self.core.gen_textures(n)
    }
    fn delete_textures(&self, textures: &[GLuint]) {
        self.core.delete_textures(textures)
    }
    fn tex_image_2d(
        &self,
        target: GLenum,
        level: GLint,
        internal_format: GLint,
        width: GLsizei,
        height: GLsizei,
        border: GLint,
        format: GLenum,
        ty: GLenum,
        opt_data: Option<&[u8]>,
    ) {
        self.core.tex_image_2d(target, level, internal_format, width, height, border, format, ty, opt_data)
    }
    fn tex_parameter_i(&self, target: GLenum, pname: GLenum, param: GLint) {
        self.core.tex_parameter_i(target, pname, param)
    }
    fn tex_parameter_f(&self, target: GLenum, pname: GLenum, param: GLfloat) {
        self.core.tex_parameter_f(target, pname, param)
    }
    fn gen_framebuffers(&self, n: GLsizei) -> Vec<GLuint> {
        self.core.gen_framebuffers(n)
    }
    fn delete_framebuffers(&self, framebuffers: &[GLuint]) {
        self.core.delete_framebuffers(framebuffers)
    }
    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint) {
        self.core.bind_framebuffer(target, framebuffer)
    }
    fn framebuffer_texture_2d(&self, target: GLenum, attachment: GLenum, textarget: GLenum, texture: GLuint, level: GLint) {
        self.core.framebuffer_texture_2d(target, attachment, textarget, texture, level)
    }
    fn framebuffer_texture_layer(&self, target: GLenum, attachment: GLenum, texture: GLuint, level: GLint, layer: GLint) {
        self.core.framebuffer_texture_layer(target, attachment, texture, level, layer)
    }
    fn draw_buffers(&self, bufs: &[GLenum]) {
        self.core.draw_buffers(bufs)
    }
    fn blit_framebuffer(
        &self,
        src_x0: GLint,
        src_y0: GLint,
        src_x1: GLint,
        src_y1: GLint,
        dst_x0: GLint,
        dst_y0: GLint,
        dst_x1: GLint,
        dst_y1: GLint,
        mask: GLbitfield,
        filter: GLenum,
    ) {
        self.core.blit_framebuffer(src_x0, src_y0, src_x1, src_y1, dst_x0, dst_y0, dst_x1, dst_y1, mask, filter)
    }
    fn get_error(&self) -> GLenum {
        self.core.get_error()
    }
    fn finish(&self) {
        self.core.finish()
    }
}

/// Check for a pending GL error after a setup step.
pub fn check_error(gl: &dyn FixedFunctionGl, call: &'static str) -> Result<(), crate::error::PlaybackError> {
    match gl.get_error() {
        core_gl::NO_ERROR => Ok(()),
        error => {
            log::error!("{} raised GL error 0x{:x}", call, error);
            Err(crate::error::PlaybackError::Gl { call, error })
        }
    }
}
