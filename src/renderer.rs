//! Drive one stereo frame: for each eye, get a texture from the playback,
//! point a framebuffer at it, replay the captured frame into it, and hand it
//! back. Then present.
//!
//! Everything here runs on the presentation thread, against the player's own
//! context.

use gleam::gl::{self, GLint, GLuint};

use crate::error::PlaybackError;
use crate::frame::Frame;
use crate::gl::{check_error, FixedFunctionGl};
use crate::playback::{attach, Eye, EyeTarget, TextureLayer, VrPlayback};
use crate::player::FramePlayer;
use crate::settings::Settings;

#[derive(Debug)]
struct Targets {
    eye_framebuffers: [GLuint; 2],
    depth_textures: [GLuint; 2],
    ui_framebuffer: Option<GLuint>,
}

#[derive(Debug, Default)]
pub struct VrRenderer {
    player: FramePlayer,
    targets: Option<Targets>,
}

impl VrRenderer {
    pub fn new() -> VrRenderer {
        VrRenderer::default()
    }

    pub fn player(&self) -> &FramePlayer {
        &self.player
    }

    /// Create the eye framebuffers and their depth textures in the context
    /// current on this thread. `playback` must already be set up for it.
    pub fn setup_for_bound_context(
        &mut self,
        gl: &dyn FixedFunctionGl,
        playback: &dyn VrPlayback,
    ) -> Result<(), PlaybackError> {
        if self.targets.is_some() {
            return Ok(());
        }
        gl.enable(gl::TEXTURE_2D);

        let depth_textures = gl.gen_textures(2);
        for eye in Eye::BOTH.iter().copied() {
            let [width, height] = playback.eye_texture_resolution(eye);
            gl.bind_texture(gl::TEXTURE_2D, depth_textures[eye.index()]);
            gl.tex_image_2d(
                gl::TEXTURE_2D,
                0,
                gl::DEPTH_COMPONENT32F as GLint,
                width as i32,
                height as i32,
                0,
                gl::DEPTH_COMPONENT,
                gl::FLOAT,
                None,
            );
            gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as GLint);
            gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as GLint);
        }
        gl.bind_texture(gl::TEXTURE_2D, 0);

        let with_ui = playback.supports_separate_ui_texture();
        let framebuffers = gl.gen_framebuffers(if with_ui { 3 } else { 2 });
        for eye in Eye::BOTH.iter().copied() {
            gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, framebuffers[eye.index()]);
            gl.framebuffer_texture_2d(
                gl::DRAW_FRAMEBUFFER,
                gl::DEPTH_ATTACHMENT,
                gl::TEXTURE_2D,
                depth_textures[eye.index()],
                0,
            );
            gl.draw_buffers(&[gl::COLOR_ATTACHMENT0]);
        }
        gl.bind_framebuffer(gl::FRAMEBUFFER, 0);
        check_error(gl, "creating eye framebuffers")?;

        log::info!(
            "eye targets ready: {:?} / {:?}{}",
            playback.eye_texture_resolution(Eye::Left),
            playback.eye_texture_resolution(Eye::Right),
            if with_ui { ", with a UI framebuffer" } else { "" }
        );
        self.targets = Some(Targets {
            eye_framebuffers: [framebuffers[0], framebuffers[1]],
            depth_textures: [depth_textures[0], depth_textures[1]],
            ui_framebuffer: framebuffers.get(2).copied(),
        });
        Ok(())
    }

    pub fn deinit_for_bound_context(&mut self, gl: &dyn FixedFunctionGl) {
        if let Some(targets) = self.targets.take() {
            let mut framebuffers = targets.eye_framebuffers.to_vec();
            framebuffers.extend(targets.ui_framebuffer);
            gl.delete_framebuffers(&framebuffers);
            gl.delete_textures(&targets.depth_textures);
        }
    }

    /// Render both eyes of `frame` and present them.
    ///
    /// An `Err` means this frame is lost; the caller should stop rendering.
    pub fn render(
        &mut self,
        gl: &dyn FixedFunctionGl,
        frame: &Frame,
        playback: &mut dyn VrPlayback,
        settings: &Settings,
    ) -> Result<(), PlaybackError> {
        if self.targets.is_none() {
            return Err(PlaybackError::NotSetUp);
        }
        playback.apply_settings(settings);

        for eye in Eye::BOTH.iter().copied() {
            let drawn = match playback.acquire_eye_texture(gl, eye)? {
                Some(target) => self.render_eye(gl, frame, eye, target, &*playback, settings),
                None => {
                    log::debug!("runtime skipped the {:?} eye this frame", eye);
                    Ok(())
                }
            };
            // An acquired eye goes back to the runtime even if drawing failed.
            let committed = playback.commit_eye_texture(gl);
            drawn?;
            committed?;
        }
        playback.present(gl)
    }

    fn render_eye(
        &mut self,
        gl: &dyn FixedFunctionGl,
        frame: &Frame,
        eye: Eye,
        target: EyeTarget,
        playback: &dyn VrPlayback,
        settings: &Settings,
    ) -> Result<(), PlaybackError> {
        let targets = self.targets.as_ref().ok_or(PlaybackError::NotSetUp)?;

        if let (Some(ui), Some(ui_framebuffer)) = (target.ui, targets.ui_framebuffer) {
            // Nothing in the frame draws here yet; keep the HUD layer clear.
            gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, ui_framebuffer);
            attach(gl, gl::DRAW_FRAMEBUFFER, ui);
            gl.clear_color(0.0, 0.0, 0.0, 0.0);
            gl.clear(gl::COLOR_BUFFER_BIT);
        }

        gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, targets.eye_framebuffers[eye.index()]);
        attach(gl, gl::DRAW_FRAMEBUFFER, target.color);
        check_error(gl, "attaching the eye texture")?;

        gl.clear_color(0.0, 0.0, 0.0, 1.0);
        gl.clear(gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT);

        self.player.play(gl, frame, eye, playback, settings)?;
        check_error(gl, "replaying the frame")?;

        gl.bind_framebuffer(gl::FRAMEBUFFER, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Call;
    use crate::error::FrameError;
    use crate::mock_gl::{Logged, MockGl};
    use crate::playback::simulated::SimulatedPlayback;
    use crate::playback::{ContextBinding, EyeSlots};
    use crate::slab::SlabAllocator;

    fn frame_of(calls: &[Call]) -> Frame {
        let mut frame = Frame::new(&SlabAllocator::new(1024, 1), 64);
        for call in calls {
            frame.record(*call).unwrap();
        }
        frame
    }

    /// Every color attachment made to a draw framebuffer, in order.
    fn attached_color(log: &[Logged]) -> Vec<TextureLayer> {
        log.iter()
            .filter_map(|entry| match *entry {
                Logged::framebuffer_texture_2d(gl::DRAW_FRAMEBUFFER, gl::COLOR_ATTACHMENT0, _, texture, _) => {
                    Some(TextureLayer::whole(texture))
                }
                Logged::framebuffer_texture_layer(gl::DRAW_FRAMEBUFFER, gl::COLOR_ATTACHMENT0, texture, _, layer) => {
                    Some(TextureLayer { texture, layer: Some(layer) })
                }
                _ => None,
            })
            .collect()
    }

    fn one_viewport() -> Frame {
        frame_of(&[Call::viewport { x: 0, y: 0, width: 640, height: 480 }])
    }

    /// Hands out array layers like an OpenXR swapchain, and can be told to
    /// skip rendering.
    #[derive(Default)]
    struct LayeredPlayback {
        slots: EyeSlots,
        skip: bool,
        presented: usize,
        scale: f32,
    }

    impl VrPlayback for LayeredPlayback {
        fn name(&self) -> &'static str {
            "layered"
        }
        fn setup_for_bound_gl_context(
            &mut self,
            _gl: &dyn FixedFunctionGl,
            _binding: &ContextBinding,
            _preview_extents: [u32; 2],
        ) -> Result<(), PlaybackError> {
            Ok(())
        }
        fn deinit_for_bound_gl_context(&mut self, _gl: &dyn FixedFunctionGl) {}
        fn acquire_eye_texture(&mut self, _gl: &dyn FixedFunctionGl, eye: Eye) -> Result<Option<EyeTarget>, PlaybackError> {
            self.slots.acquire(eye)?;
            if self.skip {
                return Ok(None);
            }
            Ok(Some(match eye {
                Eye::Left => EyeTarget {
                    color: TextureLayer { texture: 40, layer: Some(0) },
                    ui: Some(TextureLayer { texture: 40, layer: Some(1) }),
                },
                Eye::Right => EyeTarget { color: TextureLayer::whole(41), ui: None },
            }))
        }
        fn commit_eye_texture(&mut self, _gl: &dyn FixedFunctionGl) -> Result<(), PlaybackError> {
            self.slots.commit().map(|_| ())
        }
        fn present(&mut self, _gl: &dyn FixedFunctionGl) -> Result<(), PlaybackError> {
            self.presented += 1;
            Ok(())
        }
        fn current_yaw_angle(&self) -> f32 {
            0.0
        }
        fn current_pitch_angle(&self) -> f32 {
            0.0
        }
        fn eye_offset_x(&self, _eye: Eye) -> f32 {
            0.0
        }
        fn eye_texture_resolution(&self, _eye: Eye) -> [u32; 2] {
            [1280, 800]
        }
        fn tan_to_bottom_fov_edge(&self, _eye: Eye) -> f32 {
            1.0
        }
        fn tan_to_top_fov_edge(&self, _eye: Eye) -> f32 {
            1.0
        }
        fn preview_texture(&self) -> Option<GLuint> {
            None
        }
        fn supports_separate_ui_texture(&self) -> bool {
            true
        }
        fn needs_manual_viewport_adjustment(&self) -> bool {
            false
        }
        fn apply_settings(&mut self, settings: &Settings) {
            self.scale = settings.ui_scale;
        }
    }

    #[test]
    fn render_needs_setup() {
        let gl = MockGl::new();
        let mut playback = LayeredPlayback::default();
        let mut renderer = VrRenderer::new();
        let result = renderer.render(&gl, &one_viewport(), &mut playback, &Settings::default());
        assert!(matches!(result, Err(PlaybackError::NotSetUp)));
        assert_eq!(playback.presented, 0);
    }

    #[test]
    fn setup_makes_depth_targets() {
        let gl = MockGl::new();
        let playback = LayeredPlayback::default();
        let mut renderer = VrRenderer::new();
        renderer.setup_for_bound_context(&gl, &playback).unwrap();
        let log = gl.take_log();

        assert!(gl.state().enabled.contains(&gl::TEXTURE_2D));
        let depth_uploads = log
            .iter()
            .filter(|e| matches!(e, Logged::tex_image_2d { format: gl::DEPTH_COMPONENT, width: 1280, height: 800, .. }))
            .count();
        assert_eq!(depth_uploads, 2);
        assert!(log.contains(&Logged::gen_framebuffers(vec![102, 103, 104])));

        // A second setup is a no-op.
        renderer.setup_for_bound_context(&gl, &playback).unwrap();
        assert!(gl.take_log().is_empty());
    }

    #[test]
    fn both_eyes_then_present() {
        let gl = MockGl::new();
        let mut playback = LayeredPlayback::default();
        let mut renderer = VrRenderer::new();
        renderer.setup_for_bound_context(&gl, &playback).unwrap();
        gl.take_log();

        let mut settings = Settings::default();
        settings.ui_scale = 0.5;
        renderer.render(&gl, &one_viewport(), &mut playback, &settings).unwrap();
        assert_eq!(playback.presented, 1);
        assert_eq!(playback.scale, 0.5);

        let log = gl.take_log();
        assert_eq!(
            attached_color(&log),
            vec![
                TextureLayer { texture: 40, layer: Some(1) },
                TextureLayer { texture: 40, layer: Some(0) },
                TextureLayer::whole(41),
            ]
        );
        let scaled_viewports = log
            .iter()
            .filter(|e| **e == Logged::viewport(0, 0, 1280, 800))
            .count();
        // One from the start state and one from the frame, per eye.
        assert_eq!(scaled_viewports, 4);
        assert!(log.contains(&Logged::clear_color(0.0, 0.0, 0.0, 1.0)));
    }

    #[test]
    fn skipped_eyes_are_still_committed() {
        let gl = MockGl::new();
        let mut playback = LayeredPlayback { skip: true, ..LayeredPlayback::default() };
        let mut renderer = VrRenderer::new();
        renderer.setup_for_bound_context(&gl, &playback).unwrap();
        gl.take_log();

        renderer.render(&gl, &one_viewport(), &mut playback, &Settings::default()).unwrap();
        assert_eq!(playback.presented, 1);
        assert_eq!(playback.slots.active(), None);
        assert!(!gl.take_log().iter().any(|e| matches!(e, Logged::viewport(..))));
    }

    #[test]
    fn a_failed_replay_still_commits_the_eye() {
        let gl = MockGl::new();
        let mut playback = LayeredPlayback::default();
        let mut renderer = VrRenderer::new();
        renderer.setup_for_bound_context(&gl, &playback).unwrap();

        let bad = frame_of(&[
            Call::ortho { left: 0.0, right: 640.0, bottom: 480.0, top: 0.0, near: -99999.0, far: 99999.0 },
            Call::vertex_3f { x: 1.0, y: 2.0, z: 3.0 },
        ]);
        assert!(matches!(
            renderer.render(&gl, &bad, &mut playback, &Settings::default()),
            Err(PlaybackError::Replay(FrameError::Unsupported { .. }))
        ));
        assert_eq!(playback.slots.active(), None);
        assert_eq!(playback.presented, 0);

        renderer.render(&gl, &one_viewport(), &mut playback, &Settings::default()).unwrap();
        assert_eq!(playback.presented, 1);
    }

    #[test]
    fn simulated_headset_end_to_end() {
        let gl = MockGl::new();
        let mut playback = SimulatedPlayback::new(90.0);
        playback
            .setup_for_bound_gl_context(&gl, &ContextBinding::Headless, [320, 120])
            .unwrap();
        let mut renderer = VrRenderer::new();
        renderer.setup_for_bound_context(&gl, &playback).unwrap();

        for _ in 0..3 {
            renderer.render(&gl, &one_viewport(), &mut playback, &Settings::default()).unwrap();
        }
        assert_eq!(playback.frames_presented(), 3);
        assert_eq!(gl.state().viewport, [0, 0, 1280, 800]);

        renderer.deinit_for_bound_context(&gl);
        playback.deinit_for_bound_gl_context(&gl);
        let log = gl.take_log();
        assert!(log.iter().any(|e| matches!(e, Logged::delete_framebuffers(names) if names.len() == 2)));
    }
}
