//! The VR runtime side of playback.
//!
//! A `VrPlayback` hands out one eye texture at a time to render into, says
//! where the eyes are and what they can see, and submits the finished pair
//! to the compositor. There are two implementations: `openxr::OpenXrPlayback`
//! for headsets, and `simulated::SimulatedPlayback`, which follows the same
//! per-eye protocol without a runtime so the rest of the pipeline can run on
//! a desktop.
//!
//! Every method that touches GL takes the context explicitly and must be
//! called on the thread that has it current.

use gleam::gl::{self, GLint, GLuint};

use std::env;
use std::fmt;

use crate::error::PlaybackError;
use crate::gl::{FixedFunctionGl, FRAMEBUFFER_SRGB};
use crate::settings::{LauncherSettings, Settings};

pub mod openxr;
pub mod simulated;

/// Environment variable that overrides the launcher's backend choice.
pub const BACKEND_ENV_VAR: &str = "STEREO_REPLAY_BACKEND";

/// Horizontal field of view the game's projection is built around.
pub const DEFAULT_HORIZONTAL_FOV_DEGREES: f32 = 90.0;

/// Each eye shows up in the preview at this fraction of its resolution.
pub const EYE_TO_PREVIEW_DIVISOR: u32 = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    /// Render order.
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }

    pub fn is_left(self) -> bool {
        self == Eye::Left
    }
}

/// A texture to render into, or one layer of an array texture.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureLayer {
    pub texture: GLuint,
    pub layer: Option<GLint>,
}

impl TextureLayer {
    pub fn whole(texture: GLuint) -> TextureLayer {
        TextureLayer { texture, layer: None }
    }
}

/// What `acquire_eye_texture` hands back.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EyeTarget {
    pub color: TextureLayer,

    /// Where the HUD goes, for runtimes that composite it as its own layer.
    pub ui: Option<TextureLayer>,
}

/// The GL context playback is being attached to, as the runtime needs to
/// see it.
pub enum ContextBinding {
    /// No platform handles; only usable with backends that need none.
    Headless,

    /// Native handles for an OpenXR session.
    OpenXr(::openxr::opengl::SessionCreateInfo),
}

impl fmt::Debug for ContextBinding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ContextBinding::Headless => f.write_str("Headless"),
            ContextBinding::OpenXr(_) => f.write_str("OpenXr(..)"),
        }
    }
}

pub trait VrPlayback {
    fn name(&self) -> &'static str;

    /// Create swapchains, framebuffers and whatever else the runtime needs,
    /// against the context that is current on this thread.
    fn setup_for_bound_gl_context(
        &mut self,
        gl: &dyn FixedFunctionGl,
        binding: &ContextBinding,
        preview_extents: [u32; 2],
    ) -> Result<(), PlaybackError>;

    /// Release everything `setup_for_bound_gl_context` created.
    fn deinit_for_bound_gl_context(&mut self, gl: &dyn FixedFunctionGl);

    /// Get the texture `eye` should be rendered into. Blocks until the
    /// runtime admits rendering. Acquiring the left eye starts a new frame.
    ///
    /// `None` means the runtime does not want this frame drawn; the eye
    /// still has to be committed.
    fn acquire_eye_texture(&mut self, gl: &dyn FixedFunctionGl, eye: Eye) -> Result<Option<EyeTarget>, PlaybackError>;

    /// Hand the acquired texture back to the runtime.
    fn commit_eye_texture(&mut self, gl: &dyn FixedFunctionGl) -> Result<(), PlaybackError>;

    /// Submit both eyes to the compositor.
    fn present(&mut self, gl: &dyn FixedFunctionGl) -> Result<(), PlaybackError>;

    /// Head yaw, in the degrees `glRotatef` takes, as of the last left-eye
    /// acquire.
    fn current_yaw_angle(&self) -> f32;
    fn current_pitch_angle(&self) -> f32;

    /// Horizontal offset of `eye` from the head's center, in meters.
    fn eye_offset_x(&self, eye: Eye) -> f32;

    fn eye_texture_resolution(&self, eye: Eye) -> [u32; 2];

    /// Tangent of the angle between the view vector and the bottom edge of
    /// the field of view. Positive.
    fn tan_to_bottom_fov_edge(&self, eye: Eye) -> f32;

    /// Tangent of the angle between the view vector and the top edge of the
    /// field of view. Positive.
    fn tan_to_top_fov_edge(&self, eye: Eye) -> f32;

    /// Both eyes side by side, for the desktop preview.
    fn preview_texture(&self) -> Option<GLuint>;

    /// True if the HUD gets its own compositor layer.
    fn supports_separate_ui_texture(&self) -> bool;

    /// True if the user has to line the eyes up by hand.
    fn needs_manual_viewport_adjustment(&self) -> bool;

    /// Pick up tunables the backend uses directly. Called once per frame.
    fn apply_settings(&mut self, _settings: &Settings) {}
}

/// A texture holding both eyes side by side at reduced size, for the
/// desktop window.
#[derive(Debug)]
pub struct PreviewTarget {
    texture: GLuint,
    draw_framebuffer: GLuint,
    read_framebuffer: GLuint,
    eye_extents: [u32; 2],
}

impl PreviewTarget {
    pub fn new(gl: &dyn FixedFunctionGl, eye_extents: [u32; 2]) -> PreviewTarget {
        let [width, height] = PreviewTarget::extents_for(eye_extents);
        let framebuffers = gl.gen_framebuffers(2);
        let texture = gl.gen_textures(1)[0];

        gl.bind_texture(gl::TEXTURE_2D, texture);
        gl.tex_image_2d(
            gl::TEXTURE_2D,
            0,
            gl::RGB as GLint,
            width as i32,
            height as i32,
            0,
            gl::RGB,
            gl::UNSIGNED_BYTE,
            None,
        );
        gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as GLint);
        gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as GLint);
        gl.bind_texture(gl::TEXTURE_2D, 0);

        gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, framebuffers[0]);
        gl.framebuffer_texture_2d(gl::DRAW_FRAMEBUFFER, gl::COLOR_ATTACHMENT0, gl::TEXTURE_2D, texture, 0);
        gl.bind_framebuffer(gl::FRAMEBUFFER, 0);

        PreviewTarget {
            texture,
            draw_framebuffer: framebuffers[0],
            read_framebuffer: framebuffers[1],
            eye_extents,
        }
    }

    /// Size of the preview for eyes of `eye_extents`.
    pub fn extents_for(eye_extents: [u32; 2]) -> [u32; 2] {
        [
            eye_extents[0] / EYE_TO_PREVIEW_DIVISOR * 2,
            eye_extents[1] / EYE_TO_PREVIEW_DIVISOR,
        ]
    }

    pub fn texture(&self) -> GLuint {
        self.texture
    }

    /// Copy `source` into `eye`'s half of the preview, flipping it upright.
    pub fn blit_eye(&self, gl: &dyn FixedFunctionGl, eye: Eye, source: TextureLayer) {
        let half_width = (self.eye_extents[0] / EYE_TO_PREVIEW_DIVISOR) as i32;
        let height = (self.eye_extents[1] / EYE_TO_PREVIEW_DIVISOR) as i32;
        let x1 = if eye.is_left() { 0 } else { half_width };

        gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, self.draw_framebuffer);
        gl.bind_framebuffer(gl::READ_FRAMEBUFFER, self.read_framebuffer);
        attach(gl, gl::READ_FRAMEBUFFER, source);
        gl.enable(FRAMEBUFFER_SRGB);
        gl.blit_framebuffer(
            0,
            self.eye_extents[1] as i32,
            self.eye_extents[0] as i32,
            0,
            x1,
            0,
            x1 + half_width,
            height,
            gl::COLOR_BUFFER_BIT,
            gl::NEAREST,
        );
        gl.bind_framebuffer(gl::FRAMEBUFFER, 0);
    }

    pub fn delete(self, gl: &dyn FixedFunctionGl) {
        gl.delete_framebuffers(&[self.draw_framebuffer, self.read_framebuffer]);
        gl.delete_textures(&[self.texture]);
    }
}

/// Attach `target` as color attachment 0 of the framebuffer bound to
/// `framebuffer_target`.
pub fn attach(gl: &dyn FixedFunctionGl, framebuffer_target: gl::GLenum, target: TextureLayer) {
    match target.layer {
        Some(layer) => gl.framebuffer_texture_layer(framebuffer_target, gl::COLOR_ATTACHMENT0, target.texture, 0, layer),
        None => gl.framebuffer_texture_2d(framebuffer_target, gl::COLOR_ATTACHMENT0, gl::TEXTURE_2D, target.texture, 0),
    }
}

/// Tracks which eye, if any, is between acquire and commit.
#[derive(Debug, Default)]
pub struct EyeSlots {
    active: Option<Eye>,
}

impl EyeSlots {
    pub fn acquire(&mut self, eye: Eye) -> Result<(), PlaybackError> {
        if let Some(active) = self.active {
            log::error!("acquiring {:?} eye while {:?} eye is still acquired", eye, active);
            return Err(PlaybackError::EyeAlreadyAcquired { requested: eye, active });
        }
        self.active = Some(eye);
        Ok(())
    }

    /// Release the active eye, returning which one it was.
    pub fn commit(&mut self) -> Result<Eye, PlaybackError> {
        self.active.take().ok_or_else(|| {
            log::error!("eye texture committed without being acquired");
            PlaybackError::NoEyeAcquired
        })
    }

    /// Give up on the active eye without committing it, after acquiring it
    /// failed partway.
    pub fn abandon(&mut self) {
        if let Some(eye) = self.active.take() {
            log::warn!("abandoning the {:?} eye", eye);
        }
    }

    pub fn active(&self) -> Option<Eye> {
        self.active
    }
}

/// Head orientation reduced to the two angles the game's camera uses.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct HeadAngles {
    pub yaw: f32,
    pub pitch: f32,
}

impl HeadAngles {
    /// Convert an orientation quaternion `(x, y, z, w)` into yaw and pitch.
    ///
    /// The quaternion is decomposed into right-handed X, Y, Z Euler angles.
    /// The game's camera takes its angles in degrees on a scale set by its
    /// field of view, so the radians are multiplied by `hfov_degrees`, with
    /// pitch inverted.
    pub fn from_orientation(orientation: [f32; 4], hfov_degrees: f32) -> HeadAngles {
        let [x, y, z, w] = orientation;
        let pitch = (2.0 * (w * x - y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
        let yaw = (2.0 * (w * y + x * z)).max(-1.0).min(1.0).asin();
        HeadAngles {
            yaw: yaw * hfov_degrees,
            pitch: pitch * -hfov_degrees,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BackendKind {
    OpenXr,
    Simulated,
}

impl BackendKind {
    /// The name stored in the launcher settings.
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::OpenXr => "OpenXR",
            BackendKind::Simulated => "Simulated",
        }
    }

    pub fn from_name(name: &str) -> Option<BackendKind> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openxr" => Some(BackendKind::OpenXr),
            "simulated" => Some(BackendKind::Simulated),
            _ => None,
        }
    }

    /// The backend to use: `STEREO_REPLAY_BACKEND` if it is set to a known
    /// name, the launcher's choice otherwise.
    pub fn select(launcher: &LauncherSettings) -> BackendKind {
        BackendKind::select_with(env::var(BACKEND_ENV_VAR).ok().as_deref(), launcher)
    }

    fn select_with(env_value: Option<&str>, launcher: &LauncherSettings) -> BackendKind {
        if let Some(value) = env_value {
            match BackendKind::from_name(value) {
                Some(kind) => {
                    log::info!("{} selects the {} backend", BACKEND_ENV_VAR, kind.name());
                    return kind;
                }
                None => log::warn!("ignoring unknown {} value {:?}", BACKEND_ENV_VAR, value),
            }
        }
        launcher.active_backend
    }
}

/// Create the playback for `kind`.
///
/// Nothing touches GL until `setup_for_bound_gl_context`, but the OpenXR
/// backend does talk to the runtime here, and fails if there is no headset.
pub fn create_playback(kind: BackendKind, hfov_degrees: f32) -> Result<Box<dyn VrPlayback>, PlaybackError> {
    log::info!("creating {} playback", kind.name());
    Ok(match kind {
        BackendKind::OpenXr => Box::new(openxr::OpenXrPlayback::new(hfov_degrees)?),
        BackendKind::Simulated => Box::new(simulated::SimulatedPlayback::new(hfov_degrees)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_eye_at_a_time() {
        let mut slots = EyeSlots::default();
        slots.acquire(Eye::Left).unwrap();
        assert!(matches!(
            slots.acquire(Eye::Left),
            Err(PlaybackError::EyeAlreadyAcquired { requested: Eye::Left, active: Eye::Left })
        ));
        assert!(matches!(
            slots.acquire(Eye::Right),
            Err(PlaybackError::EyeAlreadyAcquired { requested: Eye::Right, active: Eye::Left })
        ));
        assert_eq!(slots.commit().unwrap(), Eye::Left);
        assert!(matches!(slots.commit(), Err(PlaybackError::NoEyeAcquired)));

        slots.acquire(Eye::Right).unwrap();
        assert_eq!(slots.active(), Some(Eye::Right));
        assert_eq!(slots.commit().unwrap(), Eye::Right);
        assert_eq!(slots.active(), None);
    }

    #[test]
    fn a_failed_acquire_can_be_retried() {
        let mut slots = EyeSlots::default();
        slots.acquire(Eye::Left).unwrap();
        // The runtime refused to start the frame.
        slots.abandon();
        assert_eq!(slots.active(), None);
        assert!(matches!(slots.commit(), Err(PlaybackError::NoEyeAcquired)));

        slots.acquire(Eye::Left).unwrap();
        assert_eq!(slots.commit().unwrap(), Eye::Left);
        slots.abandon();
        assert_eq!(slots.active(), None);
    }

    #[test]
    fn identity_orientation_is_straight_ahead() {
        let angles = HeadAngles::from_orientation([0.0, 0.0, 0.0, 1.0], 90.0);
        assert_eq!(angles, HeadAngles { yaw: 0.0, pitch: 0.0 });
    }

    #[test]
    fn yaw_and_pitch_from_quaternions() {
        let half = std::f32::consts::FRAC_PI_8; // a 45 degree turn
        let turn_left = [0.0, half.sin(), 0.0, half.cos()];
        let angles = HeadAngles::from_orientation(turn_left, 90.0);
        assert!((angles.yaw - std::f32::consts::FRAC_PI_4 * 90.0).abs() < 1e-3);
        assert!(angles.pitch.abs() < 1e-4);

        let look_up = [half.sin(), 0.0, 0.0, half.cos()];
        let angles = HeadAngles::from_orientation(look_up, 90.0);
        assert!((angles.pitch + std::f32::consts::FRAC_PI_4 * 90.0).abs() < 1e-3);
        assert!(angles.yaw.abs() < 1e-4);
    }

    #[test]
    fn preview_halves() {
        use crate::mock_gl::{Logged, MockGl};

        let gl = MockGl::new();
        let preview = PreviewTarget::new(&gl, [1280, 800]);
        assert_eq!(PreviewTarget::extents_for([1280, 800]), [640, 200]);
        gl.take_log();

        preview.blit_eye(&gl, Eye::Right, TextureLayer { texture: 7, layer: Some(0) });
        let log = gl.take_log();
        assert!(log.contains(&Logged::framebuffer_texture_layer(gl::READ_FRAMEBUFFER, gl::COLOR_ATTACHMENT0, 7, 0, 0)));
        assert!(log.contains(&Logged::blit_framebuffer(
            [0, 800, 1280, 0, 320, 0, 640, 200],
            gl::COLOR_BUFFER_BIT,
            gl::NEAREST
        )));
    }

    #[test]
    fn backend_selection() {
        let launcher = LauncherSettings::default();
        assert_eq!(BackendKind::select_with(None, &launcher), launcher.active_backend);
        assert_eq!(BackendKind::select_with(Some("SIMULATED"), &launcher), BackendKind::Simulated);
        assert_eq!(BackendKind::select_with(Some("OpenXR"), &launcher), BackendKind::OpenXr);
        assert_eq!(BackendKind::select_with(Some("libovr"), &launcher), launcher.active_backend);
        assert_eq!(BackendKind::from_name(BackendKind::Simulated.name()), Some(BackendKind::Simulated));
    }
}
