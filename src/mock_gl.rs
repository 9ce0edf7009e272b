//! A `FixedFunctionGl` that records calls instead of drawing.
//!
//! Besides the call log, `MockGl` keeps the fixed-function state a real
//! context would end up in, so tests can compare it against the state the
//! interceptor tracked while recording.

use gleam::gl::{self, GLbitfield, GLdouble, GLenum, GLfloat, GLint, GLsizei, GLubyte, GLuint};

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};

use crate::gl::{FixedFunctionGl, FILL, IDENTITY_MATRIX, MODELVIEW, MODULATE, SMOOTH, TEXTURE_ENV_MODE};

#[allow(non_camel_case_types)]
#[derive(Clone, Debug, PartialEq)]
pub enum Logged {
    alpha_func(GLenum, f32),
    begin(GLenum),
    end,
    color_3f(f32, f32, f32),
    color_3ub(u8, u8, u8),
    color_4f(f32, f32, f32, f32),
    frustum(f64, f64, f64, f64, f64, f64),
    ortho(f64, f64, f64, f64, f64, f64),
    load_identity,
    load_matrix_d([f64; 16]),
    matrix_mode(GLenum),
    polygon_mode(GLenum, GLenum),
    pop_matrix,
    push_matrix,
    rotate_f(f32, f32, f32, f32),
    scale_f(f32, f32, f32),
    shade_model(GLenum),
    tex_coord_2f(f32, f32),
    tex_env_f(GLenum, GLenum, f32),
    translate_f(f32, f32, f32),
    vertex_2f(f32, f32),
    vertex_3f(f32, f32, f32),
    vertex_4f(f32, f32, f32, f32),
    bind_texture(GLenum, GLuint),
    blend_func(GLenum, GLenum),
    clear(GLbitfield),
    clear_color(f32, f32, f32, f32),
    clear_depth(f64),
    cull_face(GLenum),
    depth_func(GLenum),
    depth_mask(bool),
    depth_range(f64, f64),
    disable(GLenum),
    enable(GLenum),
    front_face(GLenum),
    viewport(GLint, GLint, GLsizei, GLsizei),
    gen_textures(Vec<GLuint>),
    delete_textures(Vec<GLuint>),
    tex_image_2d { target: GLenum, width: GLsizei, height: GLsizei, format: GLenum, data: Option<Vec<u8>> },
    tex_parameter_i(GLenum, GLenum, GLint),
    tex_parameter_f(GLenum, GLenum, f32),
    gen_framebuffers(Vec<GLuint>),
    delete_framebuffers(Vec<GLuint>),
    bind_framebuffer(GLenum, GLuint),
    framebuffer_texture_2d(GLenum, GLenum, GLenum, GLuint, GLint),
    framebuffer_texture_layer(GLenum, GLenum, GLuint, GLint, GLint),
    draw_buffers(Vec<GLenum>),
    blit_framebuffer([GLint; 8], GLbitfield, GLenum),
    finish,
}

/// The state a compatibility context would hold after the logged calls.
#[derive(Clone, Debug, PartialEq)]
pub struct MockState {
    pub enabled: BTreeSet<GLenum>,
    pub bound_texture: GLuint,
    pub alpha_func: (GLenum, f32),
    pub blend_func: (GLenum, GLenum),
    pub cull_face: GLenum,
    pub front_face: GLenum,
    pub depth_func: GLenum,
    pub depth_mask: bool,
    pub depth_range: (f64, f64),
    pub matrix_mode: GLenum,
    pub polygon_mode: (GLenum, GLenum),
    pub shade_model: GLenum,
    pub texture_env_mode: GLenum,
    pub viewport: [GLint; 4],
}

impl Default for MockState {
    fn default() -> MockState {
        MockState {
            enabled: BTreeSet::new(),
            bound_texture: 0,
            alpha_func: (gl::ALWAYS, 0.0),
            blend_func: (gl::ONE, gl::ZERO),
            cull_face: gl::BACK,
            front_face: gl::CCW,
            depth_func: gl::LESS,
            depth_mask: true,
            depth_range: (0.0, 1.0),
            matrix_mode: MODELVIEW,
            polygon_mode: (FILL, FILL),
            shade_model: SMOOTH,
            texture_env_mode: MODULATE,
            viewport: [0, 0, 640, 480],
        }
    }
}

pub struct MockGl {
    log: RefCell<Vec<Logged>>,
    state: RefCell<MockState>,
    next_name: Cell<GLuint>,
    matrices: RefCell<HashMap<GLenum, [GLdouble; 16]>>,
}

impl MockGl {
    pub fn new() -> MockGl {
        MockGl {
            log: RefCell::new(Vec::new()),
            state: RefCell::new(MockState::default()),
            next_name: Cell::new(100),
            matrices: RefCell::new(HashMap::new()),
        }
    }

    /// Make `get_matrix_d(pname)` return `matrix`.
    pub fn set_matrix(&self, pname: GLenum, matrix: [GLdouble; 16]) {
        self.matrices.borrow_mut().insert(pname, matrix);
    }

    pub fn log(&self) -> Vec<Logged> {
        self.log.borrow().clone()
    }

    pub fn take_log(&self) -> Vec<Logged> {
        std::mem::take(&mut *self.log.borrow_mut())
    }

    pub fn state(&self) -> MockState {
        self.state.borrow().clone()
    }

    fn push(&self, entry: Logged) {
        self.log.borrow_mut().push(entry);
    }

    fn names(&self, n: GLsizei) -> Vec<GLuint> {
        (0..n)
            .map(|_| {
                let name = self.next_name.get();
                self.next_name.set(name + 1);
                name
            })
            .collect()
    }
}

impl FixedFunctionGl for MockGl {
    fn alpha_func(&self, func: GLenum, reference: GLfloat) {
        self.state.borrow_mut().alpha_func = (func, reference);
        self.push(Logged::alpha_func(func, reference));
    }
    fn begin(&self, mode: GLenum) {
        self.push(Logged::begin(mode));
    }
    fn end(&self) {
        self.push(Logged::end);
    }
    fn color_3f(&self, r: GLfloat, g: GLfloat, b: GLfloat) {
        self.push(Logged::color_3f(r, g, b));
    }
    fn color_3ub(&self, r: GLubyte, g: GLubyte, b: GLubyte) {
        self.push(Logged::color_3ub(r, g, b));
    }
    fn color_4f(&self, r: GLfloat, g: GLfloat, b: GLfloat, a: GLfloat) {
        self.push(Logged::color_4f(r, g, b, a));
    }
    fn frustum(&self, left: GLdouble, right: GLdouble, bottom: GLdouble, top: GLdouble, near: GLdouble, far: GLdouble) {
        self.push(Logged::frustum(left, right, bottom, top, near, far));
    }
    fn ortho(&self, left: GLdouble, right: GLdouble, bottom: GLdouble, top: GLdouble, near: GLdouble, far: GLdouble) {
        self.push(Logged::ortho(left, right, bottom, top, near, far));
    }
    fn load_identity(&self) {
        self.push(Logged::load_identity);
    }
    fn load_matrix_d(&self, matrix: &[GLdouble; 16]) {
        self.push(Logged::load_matrix_d(*matrix));
    }
    fn matrix_mode(&self, mode: GLenum) {
        self.state.borrow_mut().matrix_mode = mode;
        self.push(Logged::matrix_mode(mode));
    }
    fn polygon_mode(&self, face: GLenum, mode: GLenum) {
        {
            let mut state = self.state.borrow_mut();
            if face == gl::FRONT || face == gl::FRONT_AND_BACK {
                state.polygon_mode.0 = mode;
            }
            if face == gl::BACK || face == gl::FRONT_AND_BACK {
                state.polygon_mode.1 = mode;
            }
        }
        self.push(Logged::polygon_mode(face, mode));
    }
    fn pop_matrix(&self) {
        self.push(Logged::pop_matrix);
    }
    fn push_matrix(&self) {
        self.push(Logged::push_matrix);
    }
    fn rotate_f(&self, angle: GLfloat, x: GLfloat, y: GLfloat, z: GLfloat) {
        self.push(Logged::rotate_f(angle, x, y, z));
    }
    fn scale_f(&self, x: GLfloat, y: GLfloat, z: GLfloat) {
        self.push(Logged::scale_f(x, y, z));
    }
    fn shade_model(&self, mode: GLenum) {
        self.state.borrow_mut().shade_model = mode;
        self.push(Logged::shade_model(mode));
    }
    fn tex_coord_2f(&self, s: GLfloat, t: GLfloat) {
        self.push(Logged::tex_coord_2f(s, t));
    }
    fn tex_env_f(&self, target: GLenum, pname: GLenum, param: GLfloat) {
        if pname == TEXTURE_ENV_MODE {
            self.state.borrow_mut().texture_env_mode = param as GLenum;
        }
        self.push(Logged::tex_env_f(target, pname, param));
    }
    fn translate_f(&self, x: GLfloat, y: GLfloat, z: GLfloat) {
        self.push(Logged::translate_f(x, y, z));
    }
    fn vertex_2f(&self, x: GLfloat, y: GLfloat) {
        self.push(Logged::vertex_2f(x, y));
    }
    fn vertex_3f(&self, x: GLfloat, y: GLfloat, z: GLfloat) {
        self.push(Logged::vertex_3f(x, y, z));
    }
    fn vertex_4f(&self, x: GLfloat, y: GLfloat, z: GLfloat, w: GLfloat) {
        self.push(Logged::vertex_4f(x, y, z, w));
    }
    fn get_matrix_d(&self, pname: GLenum) -> [GLdouble; 16] {
        self.matrices
            .borrow()
            .get(&pname)
            .copied()
            .unwrap_or(IDENTITY_MATRIX)
    }

    fn bind_texture(&self, target: GLenum, texture: GLuint) {
        self.state.borrow_mut().bound_texture = texture;
        self.push(Logged::bind_texture(target, texture));
    }
    fn blend_func(&self, sfactor: GLenum, dfactor: GLenum) {
        self.state.borrow_mut().blend_func = (sfactor, dfactor);
        self.push(Logged::blend_func(sfactor, dfactor));
    }
    fn clear(&self, buffer_mask: GLbitfield) {
        self.push(Logged::clear(buffer_mask));
    }
    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        self.push(Logged::clear_color(r, g, b, a));
    }
    fn clear_depth(&self, depth: f64) {
        self.push(Logged::clear_depth(depth));
    }
    fn cull_face(&self, mode: GLenum) {
        self.state.borrow_mut().cull_face = mode;
        self.push(Logged::cull_face(mode));
    }
    fn depth_func(&self, func: GLenum) {
        self.state.borrow_mut().depth_func = func;
        self.push(Logged::depth_func(func));
    }
    fn depth_mask(&self, flag: bool) {
        self.state.borrow_mut().depth_mask = flag;
        self.push(Logged::depth_mask(flag));
    }
    fn depth_range(&self, near: f64, far: f64) {
        self.state.borrow_mut().depth_range = (near, far);
        self.push(Logged::depth_range(near, far));
    }
    fn disable(&self, cap: GLenum) {
        self.state.borrow_mut().enabled.remove(&cap);
        self.push(Logged::disable(cap));
    }
    fn enable(&self, cap: GLenum) {
        self.state.borrow_mut().enabled.insert(cap);
        self.push(Logged::enable(cap));
    }
    fn front_face(&self, mode: GLenum) {
        self.state.borrow_mut().front_face = mode;
        self.push(Logged::front_face(mode));
    }
    fn viewport(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        self.state.borrow_mut().viewport = [x, y, width, height];
        self.push(Logged::viewport(x, y, width, height));
    }

    fn gen_textures(&self, n: GLsizei) -> Vec<GLuint> {
        let names = self.names(n);
        self.push(Logged::gen_textures(names.clone()));
        names
    }
    fn delete_textures(&self, textures: &[GLuint]) {
        self.push(Logged::delete_textures(textures.to_vec()));
    }
    fn tex_image_2d(
        &self,
        target: GLenum,
        _level: GLint,
        _internal_format: GLint,
        width: GLsizei,
        height: GLsizei,
        _border: GLint,
        format: GLenum,
        _ty: GLenum,
        opt_data: Option<&[u8]>,
    ) {
        self.push(Logged::tex_image_2d {
            target,
            width,
            height,
            format,
            data: opt_data.map(|data| data.to_vec()),
        });
    }
    fn tex_parameter_i(&self, target: GLenum, pname: GLenum, param: GLint) {
        self.push(Logged::tex_parameter_i(target, pname, param));
    }
    fn tex_parameter_f(&self, target: GLenum, pname: GLenum, param: GLfloat) {
        self.push(Logged::tex_parameter_f(target, pname, param));
    }
    fn gen_framebuffers(&self, n: GLsizei) -> Vec<GLuint> {
        let names = self.names(n);
        self.push(Logged::gen_framebuffers(names.clone()));
        names
    }
    fn delete_framebuffers(&self, framebuffers: &[GLuint]) {
        self.push(Logged::delete_framebuffers(framebuffers.to_vec()));
    }
    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint) {
        self.push(Logged::bind_framebuffer(target, framebuffer));
    }
    fn framebuffer_texture_2d(&self, target: GLenum, attachment: GLenum, textarget: GLenum, texture: GLuint, level: GLint) {
        self.push(Logged::framebuffer_texture_2d(target, attachment, textarget, texture, level));
    }
    fn framebuffer_texture_layer(&self, target: GLenum, attachment: GLenum, texture: GLuint, level: GLint, layer: GLint) {
        self.push(Logged::framebuffer_texture_layer(target, attachment, texture, level, layer));
    }
    fn draw_buffers(&self, bufs: &[GLenum]) {
        self.push(Logged::draw_buffers(bufs.to_vec()));
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
        self.push(Logged::blit_framebuffer(
            [src_x0, src_y0, src_x1, src_y1, dst_x0, dst_y0, dst_x1, dst_y1],
            mask,
            filter,
        ));
    }
    fn get_error(&self) -> GLenum {
        gl::NO_ERROR
    }
    fn finish(&self) {
        self.push(Logged::finish);
    }
}
