//! A playback with no runtime behind it.
//!
//! It follows the same per-eye protocol as a LibOVR-style runtime: one
//! texture per eye, a separate UI texture handed out with the left eye and
//! copied into the compositor's UI layer when the right eye is committed,
//! and a mirror texture for the desktop window. The head holds whatever
//! orientation it was last given. Useful for running the whole pipeline on
//! a machine with no headset, and for tests.

use gleam::gl::{self, GLint, GLuint};

use super::{attach, ContextBinding, Eye, EyeSlots, EyeTarget, HeadAngles, PreviewTarget, TextureLayer, VrPlayback};
use crate::error::PlaybackError;
use crate::gl::FixedFunctionGl;

/// Per-eye texture size.
pub const RESOLUTION: [u32; 2] = [1280, 800];

/// Distance between the eyes, in meters.
pub const INTERPUPILLARY_DISTANCE: f32 = 0.064;

#[derive(Debug)]
struct Resources {
    eye_textures: [GLuint; 2],
    ui_texture: GLuint,
    /// What the compositor would show as the HUD layer.
    ui_layer_texture: GLuint,
    ui_framebuffers: [GLuint; 2],
    preview: PreviewTarget,
}

#[derive(Debug)]
pub struct SimulatedPlayback {
    hfov_degrees: f32,
    orientation: [f32; 4],
    angles: HeadAngles,
    slots: EyeSlots,
    frames_presented: u64,
    resources: Option<Resources>,
}

impl SimulatedPlayback {
    pub fn new(hfov_degrees: f32) -> SimulatedPlayback {
        SimulatedPlayback {
            hfov_degrees,
            orientation: [0.0, 0.0, 0.0, 1.0],
            angles: HeadAngles::default(),
            slots: EyeSlots::default(),
            frames_presented: 0,
            resources: None,
        }
    }

    /// Start with the head turned to `orientation`, an `(x, y, z, w)`
    /// quaternion.
    pub fn with_orientation(mut self, orientation: [f32; 4]) -> SimulatedPlayback {
        self.orientation = orientation;
        self
    }

    /// Turn the head. Takes effect at the next left-eye acquire.
    pub fn set_orientation(&mut self, orientation: [f32; 4]) {
        self.orientation = orientation;
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// The texture the compositor would show as the HUD layer.
    pub fn ui_layer_texture(&self) -> Option<GLuint> {
        self.resources.as_ref().map(|r| r.ui_layer_texture)
    }

    fn tan_half_hfov(&self) -> f32 {
        (self.hfov_degrees.to_radians() * 0.5).tan()
    }
}

fn create_color_texture(gl: &dyn FixedFunctionGl, texture: GLuint) {
    gl.bind_texture(gl::TEXTURE_2D, texture);
    gl.tex_image_2d(
        gl::TEXTURE_2D,
        0,
        gl::SRGB8_ALPHA8 as GLint,
        RESOLUTION[0] as i32,
        RESOLUTION[1] as i32,
        0,
        gl::RGBA,
        gl::UNSIGNED_BYTE,
        None,
    );
    gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as GLint);
    gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as GLint);
}

impl VrPlayback for SimulatedPlayback {
    fn name(&self) -> &'static str {
        "Simulated"
    }

    fn setup_for_bound_gl_context(
        &mut self,
        gl: &dyn FixedFunctionGl,
        _binding: &ContextBinding,
        _preview_extents: [u32; 2],
    ) -> Result<(), PlaybackError> {
        let textures = gl.gen_textures(4);
        for &texture in textures.iter() {
            create_color_texture(gl, texture);
        }
        gl.bind_texture(gl::TEXTURE_2D, 0);
        let framebuffers = gl.gen_framebuffers(2);
        let preview = PreviewTarget::new(gl, RESOLUTION);
        crate::gl::check_error(gl, "creating simulated eye textures")?;

        log::info!("simulated headset: {:?} per eye, {} degree horizontal FOV", RESOLUTION, self.hfov_degrees);
        self.resources = Some(Resources {
            eye_textures: [textures[0], textures[1]],
            ui_texture: textures[2],
            ui_layer_texture: textures[3],
            ui_framebuffers: [framebuffers[0], framebuffers[1]],
            preview,
        });
        Ok(())
    }

    fn deinit_for_bound_gl_context(&mut self, gl: &dyn FixedFunctionGl) {
        if let Some(resources) = self.resources.take() {
            gl.delete_framebuffers(&resources.ui_framebuffers);
            gl.delete_textures(&[
                resources.eye_textures[0],
                resources.eye_textures[1],
                resources.ui_texture,
                resources.ui_layer_texture,
            ]);
            resources.preview.delete(gl);
        }
    }

    fn acquire_eye_texture(&mut self, _gl: &dyn FixedFunctionGl, eye: Eye) -> Result<Option<EyeTarget>, PlaybackError> {
        let resources = self.resources.as_ref().ok_or(PlaybackError::NotSetUp)?;
        let color = TextureLayer::whole(resources.eye_textures[eye.index()]);
        let ui = if eye.is_left() {
            Some(TextureLayer::whole(resources.ui_texture))
        } else {
            None
        };
        self.slots.acquire(eye)?;
        if eye.is_left() {
            self.angles = HeadAngles::from_orientation(self.orientation, self.hfov_degrees);
        }
        Ok(Some(EyeTarget { color, ui }))
    }

    fn commit_eye_texture(&mut self, gl: &dyn FixedFunctionGl) -> Result<(), PlaybackError> {
        let resources = self.resources.as_ref().ok_or(PlaybackError::NotSetUp)?;
        let eye = self.slots.commit()?;
        resources
            .preview
            .blit_eye(gl, eye, TextureLayer::whole(resources.eye_textures[eye.index()]));

        if !eye.is_left() {
            let [width, height] = [RESOLUTION[0] as i32, RESOLUTION[1] as i32];
            gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, resources.ui_framebuffers[0]);
            gl.bind_framebuffer(gl::READ_FRAMEBUFFER, resources.ui_framebuffers[1]);
            attach(gl, gl::DRAW_FRAMEBUFFER, TextureLayer::whole(resources.ui_layer_texture));
            attach(gl, gl::READ_FRAMEBUFFER, TextureLayer::whole(resources.ui_texture));
            gl.blit_framebuffer(0, 0, width, height, 0, 0, width, height, gl::COLOR_BUFFER_BIT, gl::NEAREST);
            gl.bind_framebuffer(gl::FRAMEBUFFER, 0);
        }
        Ok(())
    }

    fn present(&mut self, _gl: &dyn FixedFunctionGl) -> Result<(), PlaybackError> {
        if self.resources.is_none() {
            return Err(PlaybackError::NotSetUp);
        }
        if let Some(eye) = self.slots.active() {
            log::error!("presenting while the {:?} eye is still acquired", eye);
            return Err(PlaybackError::EyeAlreadyAcquired { requested: eye, active: eye });
        }
        self.frames_presented += 1;
        log::debug!("simulated frame {} presented", self.frames_presented);
        Ok(())
    }

    fn current_yaw_angle(&self) -> f32 {
        self.angles.yaw
    }

    fn current_pitch_angle(&self) -> f32 {
        self.angles.pitch
    }

    fn eye_offset_x(&self, eye: Eye) -> f32 {
        match eye {
            Eye::Left => -INTERPUPILLARY_DISTANCE * 0.5,
            Eye::Right => INTERPUPILLARY_DISTANCE * 0.5,
        }
    }

    fn eye_texture_resolution(&self, _eye: Eye) -> [u32; 2] {
        RESOLUTION
    }

    fn tan_to_bottom_fov_edge(&self, _eye: Eye) -> f32 {
        self.tan_half_hfov() * RESOLUTION[1] as f32 / RESOLUTION[0] as f32
    }

    fn tan_to_top_fov_edge(&self, _eye: Eye) -> f32 {
        self.tan_half_hfov() * RESOLUTION[1] as f32 / RESOLUTION[0] as f32
    }

    fn preview_texture(&self) -> Option<GLuint> {
        self.resources.as_ref().map(|r| r.preview.texture())
    }

    fn supports_separate_ui_texture(&self) -> bool {
        true
    }

    fn needs_manual_viewport_adjustment(&self) -> bool {
        true
    }
}
