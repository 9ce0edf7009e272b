//! Replay a recorded frame into one eye's texture.
//!
//! Most calls go through as recorded. The ones that encode the game's idea
//! of the screen get rewritten for the headset: the perspective projection
//! takes the eye's field of view, the HUD projection and its vertices are
//! squeezed into a smaller rectangle the lenses do not crop, viewports are
//! scaled up to the eye texture, and the head pose and eye offset are folded
//! into the camera rotation.

use gleam::gl::{self, GLuint};

use std::collections::HashMap;

use crate::api::ApiFunction;
use crate::call::Call;
use crate::error::FrameError;
use crate::frame::Frame;
use crate::gl::{FixedFunctionGl, ALPHA_TEST, MODELVIEW, PROJECTION, TEXTURE_ENV, TEXTURE_ENV_MODE};
use crate::playback::{Eye, VrPlayback};
use crate::settings::Settings;
use crate::state::PipelineState;

/// What the replay knows about the game's HUD.
///
/// None of this is discoverable from the call stream: it is how one game
/// happens to lay out and draw its 2D overlays, read off its draw order and
/// its texture numbering.
pub mod hud {
    /// Texture the console background is drawn with. The console is always
    /// drawn last.
    pub const CONSOLE_TEXTURE: u32 = 2;

    /// Texture the status bar's background band is drawn with.
    pub const STATUS_BAR_BAND_TEXTURE: u32 = 6;

    /// Height of the status bar at the bottom of the HUD.
    pub const STATUS_BAR_HEIGHT: u32 = 32;

    /// The HUD is laid out on a fixed 640x480 canvas.
    pub const WIDTH: u32 = 640;
    pub const HEIGHT: u32 = 480;
}

/// Axis components closer to 0 or 1 than this count as exact.
const AXIS_EPSILON: f32 = 1e-5;

/// Replays frames, keeping the game-to-player texture name mapping across
/// frames and eyes.
#[derive(Debug, Default)]
pub struct FramePlayer {
    textures: HashMap<GLuint, GLuint>,
}

/// HUD rectangle, in eye-texture pixels.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OrthoRect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl OrthoRect {
    /// The rectangle the HUD is scaled into: `ui_scale` of the eye texture,
    /// centered.
    pub fn for_eye(extents: [u32; 2], ui_scale: f32) -> OrthoRect {
        let w = extents[0] as f64;
        let h = extents[1] as f64;
        let offset_x = w * (1.0 - ui_scale as f64) * 0.5;
        let offset_y = h * (1.0 - ui_scale as f64) * 0.5;
        OrthoRect {
            x1: offset_x,
            y1: offset_y,
            x2: w - offset_x,
            y2: h - offset_y,
        }
    }

    fn width(&self) -> f32 {
        (self.x2 - self.x1) as f32
    }

    fn height(&self) -> f32 {
        (self.y2 - self.y1) as f32
    }
}

/// Per-replay bookkeeping. Starts fresh for every eye.
#[derive(Default)]
struct Pass {
    console_texture_bound: bool,
    status_bar_band_bound: bool,
    status_bar_rendered: bool,
    ortho: Option<OrthoRect>,
    rotated: bool,
    yaw_applied: bool,
    pitch_applied: bool,
}

impl FramePlayer {
    pub fn new() -> FramePlayer {
        FramePlayer::default()
    }

    /// The player's name for the game's texture `game_id`. Zero stays zero.
    pub fn remap_texture(&mut self, gl: &dyn FixedFunctionGl, game_id: GLuint) -> GLuint {
        if game_id == 0 {
            return 0;
        }
        *self.textures.entry(game_id).or_insert_with(|| {
            let own = gl.gen_textures(1).first().copied().unwrap_or(0);
            log::debug!("game texture {} is texture {} here", game_id, own);
            own
        })
    }

    pub fn remapped_textures(&self) -> usize {
        self.textures.len()
    }

    /// Render `frame` for `eye` into whatever framebuffer `gl` has bound.
    pub fn play(
        &mut self,
        gl: &dyn FixedFunctionGl,
        frame: &Frame,
        eye: Eye,
        playback: &dyn VrPlayback,
        settings: &Settings,
    ) -> Result<(), FrameError> {
        let extents = playback.eye_texture_resolution(eye);
        self.restore_start_state(gl, frame.get_start_state(), extents);

        let mut pass = Pass::default();
        for call in frame.calls() {
            self.replay_call(gl, frame, call, eye, playback, settings, extents, &mut pass)?;
        }

        // Leave the matrices clean for whatever draws next in this context.
        gl.matrix_mode(MODELVIEW);
        gl.load_identity();
        gl.matrix_mode(PROJECTION);
        gl.load_identity();
        Ok(())
    }

    fn restore_start_state(&mut self, gl: &dyn FixedFunctionGl, state: &PipelineState, extents: [u32; 2]) {
        let caps = [
            (ALPHA_TEST, state.is_alpha_test_enabled),
            (gl::BLEND, state.is_blend_enabled),
            (gl::CULL_FACE, state.is_cull_face_enabled),
            (gl::DEPTH_TEST, state.is_depth_test_enabled),
            (gl::SCISSOR_TEST, state.is_scissor_test_enabled),
            (gl::TEXTURE_2D, state.is_texture_2d_enabled),
        ];
        for &(cap, enabled) in caps.iter() {
            if enabled {
                gl.enable(cap);
            } else {
                gl.disable(cap);
            }
        }

        gl.matrix_mode(MODELVIEW);
        gl.load_matrix_d(&state.modelview_matrix);
        gl.matrix_mode(PROJECTION);
        gl.load_matrix_d(&state.projection_matrix);

        gl.alpha_func(state.alpha_func, state.alpha_ref);
        let texture = self.remap_texture(gl, state.bound_texture_2d_gl_id);
        gl.bind_texture(gl::TEXTURE_2D, texture);
        gl.blend_func(state.blend_func_sfactor, state.blend_func_dfactor);
        let [r, g, b, a] = state.clear_color;
        gl.clear_color(r, g, b, a);
        gl.clear_depth(state.clear_depth);
        gl.cull_face(state.cull_face_mode);
        gl.depth_func(state.depth_func);
        gl.depth_mask(state.depth_mask);
        gl.depth_range(state.depth_range[0], state.depth_range[1]);
        gl.front_face(state.front_face_mode);
        gl.matrix_mode(state.matrix_mode);
        gl.polygon_mode(gl::BACK, state.polygon_mode_back);
        gl.polygon_mode(gl::FRONT, state.polygon_mode_front);
        gl.shade_model(state.shade_model);
        gl.tex_env_f(TEXTURE_ENV, TEXTURE_ENV_MODE, state.texture_env_mode as f32);
        gl.viewport(0, 0, extents[0] as i32, extents[1] as i32);
    }

    #[allow(clippy::too_many_arguments)]
    fn replay_call(
        &mut self,
        gl: &dyn FixedFunctionGl,
        frame: &Frame,
        call: &Call,
        eye: Eye,
        playback: &dyn VrPlayback,
        settings: &Settings,
        extents: [u32; 2],
        pass: &mut Pass,
    ) -> Result<(), FrameError> {
        match *call {
            Call::alpha_func { func, reference } => gl.alpha_func(func, reference),
            Call::begin { mode } => gl.begin(mode),
            Call::bind_texture { target, texture } => {
                pass.console_texture_bound |= texture == hud::CONSOLE_TEXTURE;
                pass.status_bar_band_bound = texture == hud::STATUS_BAR_BAND_TEXTURE;
                pass.status_bar_rendered |= pass.status_bar_band_bound;
                let own = self.remap_texture(gl, texture);
                gl.bind_texture(target, own);
            }
            Call::blend_func { sfactor, dfactor } => gl.blend_func(sfactor, dfactor),
            Call::clear { buffer_mask } => gl.clear(buffer_mask),
            Call::clear_color { r, g, b, a } => gl.clear_color(r, g, b, a),
            Call::clear_depth { depth } => gl.clear_depth(depth),
            Call::color_3f { r, g, b } => gl.color_3f(r, g, b),
            Call::color_3ub { r, g, b } => gl.color_3ub(r, g, b),
            Call::color_4f { r, g, b, a } => gl.color_4f(r, g, b, a),
            Call::cull_face { mode } => gl.cull_face(mode),
            Call::depth_func { func } => gl.depth_func(func),
            Call::depth_mask { flag } => gl.depth_mask(flag),
            Call::depth_range { near, far } => gl.depth_range(near, far),
            Call::disable { cap } => gl.disable(cap),
            // The game draws into the front buffer while loading. We render
            // off screen, so this would only break things.
            Call::draw_buffer { .. } => (),
            Call::enable { cap } => gl.enable(cap),
            Call::end {} => gl.end(),
            Call::finish {} | Call::flush {} | Call::read_pixels {} => (),
            Call::front_face { mode } => gl.front_face(mode),
            Call::frustum { near, far, .. } => {
                let top = near * playback.tan_to_top_fov_edge(eye) as f64;
                let bottom = -near * playback.tan_to_bottom_fov_edge(eye) as f64;
                let aspect = extents[0] as f32 / extents[1] as f32;
                let right = aspect as f64 * top;
                gl.frustum(-right, right, bottom, top, near, far);
            }
            Call::load_identity {} => gl.load_identity(),
            Call::matrix_mode { mode } => gl.matrix_mode(mode),
            Call::ortho { left, right, bottom, top, near, far } => {
                if (left, right, bottom, top) != (0.0, hud::WIDTH as f64, hud::HEIGHT as f64, 0.0) {
                    log::warn!(
                        "unexpected HUD projection ({}, {}, {}, {}); rewriting it anyway",
                        left,
                        right,
                        bottom,
                        top
                    );
                }
                let w = extents[0] as f64;
                let h = extents[1] as f64;
                let offset = w * -(playback.eye_offset_x(eye) as f64) * settings.ortho_separation_multiplier as f64;
                gl.ortho(offset, w + offset, h, 0.0, near, far);
                pass.ortho = Some(OrthoRect::for_eye(extents, settings.ui_scale));
            }
            Call::polygon_mode { face, mode } => gl.polygon_mode(face, mode),
            Call::pop_matrix {} => gl.pop_matrix(),
            Call::push_matrix {} => gl.push_matrix(),
            Call::rotate_f { mut angle, x, y, z } => {
                if !pass.rotated {
                    // The first rotation starts the camera transform; shift
                    // the eye sideways before it.
                    let offset = playback.eye_offset_x(eye) * settings.eye_separation_multiplier;
                    gl.translate_f(offset, 0.0, 0.0);
                    pass.rotated = true;
                }
                let near = |value: f32, target: f32| (value - target).abs() < AXIS_EPSILON;
                if near(x, 0.0) && near(y, 0.0) && near(z, 1.0) {
                    if !pass.yaw_applied {
                        angle += playback.current_yaw_angle();
                        pass.yaw_applied = true;
                    }
                } else if near(x, 0.0) && near(y, 1.0) && near(z, 0.0) && !pass.pitch_applied {
                    angle += playback.current_pitch_angle();
                    pass.pitch_applied = true;
                }
                gl.rotate_f(angle, x, y, z);
            }
            Call::scale_f { x, y, z } => gl.scale_f(x, y, z),
            Call::shade_model { mode } => gl.shade_model(mode),
            Call::tex_coord_2f { s, t } => gl.tex_coord_2f(s, t),
            Call::tex_env_f { target, pname, param } => gl.tex_env_f(target, pname, param),
            Call::tex_image_2d {
                target,
                level,
                internal_format,
                width,
                height,
                border,
                format,
                ty,
                pixels,
            } => {
                // A texture's contents do not change between the two eyes of
                // one frame, so upload once.
                if eye.is_left() {
                    let data = match pixels {
                        Some(blob) => Some(frame.blob(blob)?),
                        None => None,
                    };
                    gl.tex_image_2d(target, level, internal_format, width, height, border, format, ty, data);
                }
            }
            Call::tex_parameter_f { target, pname, param } => gl.tex_parameter_f(target, pname, param),
            Call::translate_f { x, y, z } => gl.translate_f(x, y, z),
            Call::vertex_2f { x, y } => {
                if pass.status_bar_band_bound {
                    return Ok(());
                }
                let (x, y) = match pass.ortho {
                    Some(rect) => hud_vertex(x, y, &rect, pass, settings),
                    None => (x, y),
                };
                gl.vertex_2f(x, y);
            }
            Call::vertex_3f { x, y, z } => {
                if pass.ortho.is_some() {
                    return Err(hud_vertex_with_depth(ApiFunction::Vertex3f));
                }
                gl.vertex_3f(x, y, z);
            }
            Call::vertex_4f { x, y, z, w } => {
                if pass.ortho.is_some() {
                    return Err(hud_vertex_with_depth(ApiFunction::Vertex4f));
                }
                gl.vertex_4f(x, y, z, w);
            }
            Call::viewport { x, y, width, height } => {
                let [x, y, width, height] = scale_viewport([x, y, width, height], extents);
                gl.viewport(x, y, width, height);
            }
        }
        Ok(())
    }
}

/// Move a HUD vertex from the game's 640x480 canvas into `rect`, then apply
/// the per-element adjustments.
fn hud_vertex(x: f32, y: f32, rect: &OrthoRect, pass: &Pass, settings: &Settings) -> (f32, f32) {
    let original_y = y;
    let x = rect.x1 as f32 + x / hud::WIDTH as f32 * rect.width();
    let mut y = rect.y1 as f32 + y / hud::HEIGHT as f32 * rect.height();

    if !pass.console_texture_bound && !pass.status_bar_rendered {
        if original_y >= (hud::HEIGHT - hud::STATUS_BAR_HEIGHT) as f32 {
            y += settings.status_bar_y_offset as f32;
        }
    } else if !pass.console_texture_bound {
        // Past the status bar with no console: the pause menu.
        y = rect.height() * 0.5 + y / hud::HEIGHT as f32 * rect.height() * 0.25;
    } else {
        y += settings.console_window_y_offset as f32;
    }
    (x, y)
}

/// The HUD is drawn with 2D vertices only; anything else under its
/// projection could not be moved into the HUD rectangle.
fn hud_vertex_with_depth(function: ApiFunction) -> FrameError {
    log::error!("{} under the HUD projection", function.name());
    FrameError::Unsupported {
        function,
        detail: "vertex with depth under the HUD projection".to_string(),
    }
}

/// Map a viewport on the game's 640x480 screen to the same part of an eye
/// texture.
fn scale_viewport(viewport: [i32; 4], extents: [u32; 2]) -> [i32; 4] {
    let scale = |value: i32, canvas: u32, extent: u32| {
        (value as f64 / canvas as f64 * extent as f64).round() as i32
    };
    [
        scale(viewport[0], hud::WIDTH, extents[0]),
        scale(viewport[1], hud::HEIGHT, extents[1]),
        scale(viewport[2], hud::WIDTH, extents[0]),
        scale(viewport[3], hud::HEIGHT, extents[1]),
    ]
}
