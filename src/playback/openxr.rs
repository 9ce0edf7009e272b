//! Playback through an OpenXR runtime.
//!
//! The left eye's swapchain has two array layers: layer 0 is the eye's view
//! and layer 1 holds the HUD, which goes to the compositor as a quad layer
//! of its own. The right eye's swapchain is a plain 2D texture.

use ::openxr as xr;
use gleam::gl::{self, GLuint};

use std::process;
use std::thread;
use std::time::Duration;

use super::{ContextBinding, Eye, EyeSlots, EyeTarget, HeadAngles, PreviewTarget, TextureLayer, VrPlayback};
use crate::error::PlaybackError;
use crate::gl::FixedFunctionGl;
use crate::settings::Settings;

const VIEW_TYPE: xr::ViewConfigurationType = xr::ViewConfigurationType::PRIMARY_STEREO;

/// Array layers in the left eye's swapchain: the view, then the HUD.
const LEFT_EYE_LAYERS: u32 = 2;
const UI_LAYER: u32 = 1;

const IDENTITY_POSE: xr::Posef = xr::Posef {
    orientation: xr::Quaternionf { x: 0.0, y: 0.0, z: 0.0, w: 1.0 },
    position: xr::Vector3f { x: 0.0, y: 0.0, z: 0.0 },
};

#[derive(Copy, Clone)]
struct EyeProps {
    extents: [u32; 2],
    fov: xr::Fovf,
    pose: xr::Posef,
}

impl Default for EyeProps {
    fn default() -> EyeProps {
        EyeProps {
            extents: [0, 0],
            fov: xr::Fovf {
                angle_left: 0.0,
                angle_right: 0.0,
                angle_up: 0.0,
                angle_down: 0.0,
            },
            pose: IDENTITY_POSE,
        }
    }
}

/// Everything that exists only while a GL context is attached.
struct Attached {
    session: xr::Session<xr::OpenGL>,
    waiter: xr::FrameWaiter,
    stream: xr::FrameStream<xr::OpenGL>,
    space: xr::Space,
    swapchains: [xr::Swapchain<xr::OpenGL>; 2],
    images: [Vec<GLuint>; 2],
    acquired: [Option<usize>; 2],
    preview: PreviewTarget,
    running: bool,
}

pub struct OpenXrPlayback {
    instance: xr::Instance,
    system: xr::SystemId,
    hfov_degrees: f32,
    attached: Option<Attached>,
    slots: EyeSlots,
    eyes: [EyeProps; 2],
    angles: HeadAngles,
    display_time: xr::Time,
    should_render: bool,
    ui_quad_distance: f32,
}

impl OpenXrPlayback {
    /// Load the runtime and check it can do what we need. No session is
    /// created until a GL context is attached.
    pub fn new(hfov_degrees: f32) -> Result<OpenXrPlayback, PlaybackError> {
        let entry = unsafe { xr::Entry::load() }.map_err(|e| {
            log::error!("no OpenXR loader: {:?}", e);
            PlaybackError::Unavailable(format!("OpenXR loader: {:?}", e))
        })?;

        let available = entry
            .enumerate_extensions()
            .map_err(|e| PlaybackError::runtime("xrEnumerateInstanceExtensionProperties", e))?;
        if !available.khr_opengl_enable {
            log::error!("OpenXR runtime lacks XR_KHR_opengl_enable");
            return Err(PlaybackError::Unavailable("XR_KHR_opengl_enable".to_string()));
        }
        let mut extensions = xr::ExtensionSet::default();
        extensions.khr_opengl_enable = true;

        let app_info = xr::ApplicationInfo {
            application_name: "stereo-replay",
            application_version: 1,
            engine_name: "stereo-replay",
            engine_version: 0,
        };
        let instance = entry
            .create_instance(&app_info, &extensions, &[])
            .map_err(|e| PlaybackError::runtime("xrCreateInstance", e))?;
        let system = instance
            .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
            .map_err(|e| PlaybackError::runtime("xrGetSystem", e))?;

        // Required before a session can be created.
        let requirements = instance
            .graphics_requirements::<xr::OpenGL>(system)
            .map_err(|e| PlaybackError::runtime("xrGetOpenGLGraphicsRequirementsKHR", e))?;
        log::debug!(
            "runtime wants GL {:?} to {:?}",
            requirements.min_api_version_supported,
            requirements.max_api_version_supported
        );

        let blend_modes = instance
            .enumerate_environment_blend_modes(system, VIEW_TYPE)
            .map_err(|e| PlaybackError::runtime("xrEnumerateEnvironmentBlendModes", e))?;
        if !blend_modes.contains(&xr::EnvironmentBlendMode::OPAQUE) {
            log::error!("OpenXR runtime has no opaque blend mode");
            return Err(PlaybackError::Unavailable("opaque environment blend mode".to_string()));
        }

        if let Ok(props) = instance.properties() {
            log::info!("OpenXR runtime {} {}", props.runtime_name, props.runtime_version);
        }

        Ok(OpenXrPlayback {
            instance,
            system,
            hfov_degrees,
            attached: None,
            slots: EyeSlots::default(),
            eyes: [EyeProps::default(); 2],
            angles: HeadAngles::default(),
            display_time: xr::Time::from_nanos(0),
            should_render: false,
            ui_quad_distance: Settings::default().ui_quad_distance,
        })
    }

    fn poll_events(&mut self) -> Result<(), PlaybackError> {
        let attached = self.attached.as_mut().ok_or(PlaybackError::NotSetUp)?;
        loop {
            let mut buffer = xr::EventDataBuffer::new();
            let event = match self.instance.poll_event(&mut buffer)? {
                Some(event) => event,
                None => return Ok(()),
            };
            match event {
                xr::Event::SessionStateChanged(change) => {
                    let state = change.state();
                    log::info!("OpenXR session state {:?}", state);
                    match state {
                        xr::SessionState::READY if !attached.running => {
                            attached.session.begin(VIEW_TYPE)?;
                            attached.running = true;
                        }
                        xr::SessionState::STOPPING if attached.running => {
                            attached.session.end()?;
                            attached.running = false;
                        }
                        _ => (),
                    }
                }
                xr::Event::InstanceLossPending(_) => {
                    log::error!("OpenXR instance lost; nothing more can be shown");
                    process::exit(1);
                }
                xr::Event::EventsLost(lost) => {
                    log::warn!("OpenXR dropped {} events", lost.lost_event_count());
                }
                _ => (),
            }
        }
    }

    /// Block until the runtime says the session may begin, then begin it.
    fn wait_until_ready(&mut self) -> Result<(), PlaybackError> {
        while !self.attached.as_ref().map_or(false, |a| a.running) {
            self.poll_events()?;
            thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    /// Start a runtime frame and work out where the eyes are.
    fn begin_frame(&mut self) -> Result<(), PlaybackError> {
        self.poll_events()?;
        let attached = self.attached.as_mut().ok_or(PlaybackError::NotSetUp)?;

        let frame_state = attached
            .waiter
            .wait()
            .map_err(|e| PlaybackError::runtime("xrWaitFrame", e))?;
        attached
            .stream
            .begin()
            .map_err(|e| PlaybackError::runtime("xrBeginFrame", e))?;
        self.display_time = frame_state.predicted_display_time;
        self.should_render = frame_state.should_render;

        let (flags, views) = attached
            .session
            .locate_views(VIEW_TYPE, self.display_time, &attached.space)
            .map_err(|e| PlaybackError::runtime("xrLocateViews", e))?;
        if views.len() != 2 {
            log::error!("runtime located {} views for a stereo configuration", views.len());
            return Err(PlaybackError::Unavailable(format!("{} stereo views", views.len())));
        }

        // Only the separation between the eyes matters; the game's camera
        // provides the rest of the head position.
        let dx = (views[1].pose.position.x - views[0].pose.position.x).abs();
        for eye in Eye::BOTH.iter() {
            let view = &views[eye.index()];
            let props = &mut self.eyes[eye.index()];
            props.fov = view.fov;
            props.pose.orientation = view.pose.orientation;
            props.pose.position.x = if eye.is_left() { -dx * 0.5 } else { dx * 0.5 };
        }
        if flags.contains(xr::ViewStateFlags::ORIENTATION_VALID) {
            let o = views[0].pose.orientation;
            self.angles = HeadAngles::from_orientation([o.x, o.y, o.z, o.w], self.hfov_degrees);
        }
        Ok(())
    }

    /// The part of acquiring `eye` that talks to the runtime.
    fn start_eye(&mut self, eye: Eye) -> Result<Option<EyeTarget>, PlaybackError> {
        if eye.is_left() {
            self.begin_frame()?;
        }
        if !self.should_render {
            return Ok(None);
        }

        let attached = self.attached.as_mut().ok_or(PlaybackError::NotSetUp)?;
        let swapchain = &mut attached.swapchains[eye.index()];
        let index = swapchain
            .acquire_image()
            .map_err(|e| PlaybackError::runtime("xrAcquireSwapchainImage", e))? as usize;
        swapchain
            .wait_image(xr::Duration::INFINITE)
            .map_err(|e| PlaybackError::runtime("xrWaitSwapchainImage", e))?;
        attached.acquired[eye.index()] = Some(index);

        let texture = attached.images[eye.index()][index];
        Ok(Some(match eye {
            Eye::Left => EyeTarget {
                color: TextureLayer { texture, layer: Some(0) },
                ui: Some(TextureLayer {
                    texture,
                    layer: Some(UI_LAYER as i32),
                }),
            },
            Eye::Right => EyeTarget {
                color: TextureLayer::whole(texture),
                ui: None,
            },
        }))
    }

    fn sub_image<'a>(
        swapchain: &'a xr::Swapchain<xr::OpenGL>,
        extents: [u32; 2],
        layer: u32,
    ) -> xr::SwapchainSubImage<'a, xr::OpenGL> {
        xr::SwapchainSubImage::new()
            .swapchain(swapchain)
            .image_array_index(layer)
            .image_rect(xr::Rect2Di {
                offset: xr::Offset2Di { x: 0, y: 0 },
                extent: xr::Extent2Di {
                    width: extents[0] as i32,
                    height: extents[1] as i32,
                },
            })
    }
}

impl VrPlayback for OpenXrPlayback {
    fn name(&self) -> &'static str {
        "OpenXR"
    }

    fn setup_for_bound_gl_context(
        &mut self,
        gl: &dyn FixedFunctionGl,
        binding: &ContextBinding,
        _preview_extents: [u32; 2],
    ) -> Result<(), PlaybackError> {
        let create_info = match binding {
            ContextBinding::OpenXr(info) => info,
            ContextBinding::Headless => {
                log::error!("OpenXR needs native handles for the player's GL context");
                return Err(PlaybackError::Unavailable("native GL context handles".to_string()));
            }
        };
        let (session, waiter, stream) = unsafe {
            self.instance
                .create_session::<xr::OpenGL>(self.system, create_info)
                .map_err(|e| PlaybackError::runtime("xrCreateSession", e))?
        };

        let views = self
            .instance
            .enumerate_view_configuration_views(self.system, VIEW_TYPE)
            .map_err(|e| PlaybackError::runtime("xrEnumerateViewConfigurationViews", e))?;
        if views.len() != 2 {
            log::error!("runtime reports {} views for a stereo configuration", views.len());
            return Err(PlaybackError::Unavailable(format!("{} stereo views", views.len())));
        }
        for eye in Eye::BOTH.iter() {
            let view = &views[eye.index()];
            self.eyes[eye.index()].extents = [view.recommended_image_rect_width, view.recommended_image_rect_height];
        }
        log::info!("OpenXR eye textures {:?} and {:?}", self.eyes[0].extents, self.eyes[1].extents);

        let formats = session
            .enumerate_swapchain_formats()
            .map_err(|e| PlaybackError::runtime("xrEnumerateSwapchainFormats", e))?;
        if !formats.contains(&gl::SRGB8_ALPHA8) {
            log::error!("OpenXR runtime cannot make SRGB8_ALPHA8 swapchains");
            return Err(PlaybackError::Unavailable("SRGB8_ALPHA8 swapchains".to_string()));
        }

        let width = self.eyes[0].extents[0].max(self.eyes[1].extents[0]);
        let height = self.eyes[0].extents[1].max(self.eyes[1].extents[1]);
        let create_swapchain = |array_size: u32| {
            session
                .create_swapchain(&xr::SwapchainCreateInfo {
                    create_flags: xr::SwapchainCreateFlags::EMPTY,
                    usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT,
                    format: gl::SRGB8_ALPHA8,
                    sample_count: 1,
                    width,
                    height,
                    face_count: 1,
                    array_size,
                    mip_count: 1,
                })
                .map_err(|e| PlaybackError::runtime("xrCreateSwapchain", e))
        };
        let swapchains = [create_swapchain(LEFT_EYE_LAYERS)?, create_swapchain(1)?];
        let images = [
            swapchains[0]
                .enumerate_images()
                .map_err(|e| PlaybackError::runtime("xrEnumerateSwapchainImages", e))?,
            swapchains[1]
                .enumerate_images()
                .map_err(|e| PlaybackError::runtime("xrEnumerateSwapchainImages", e))?,
        ];

        let space = session
            .create_reference_space(xr::ReferenceSpaceType::LOCAL, IDENTITY_POSE)
            .map_err(|e| PlaybackError::runtime("xrCreateReferenceSpace", e))?;

        let preview = PreviewTarget::new(gl, self.eyes[0].extents);
        crate::gl::check_error(gl, "creating the preview texture")?;

        self.attached = Some(Attached {
            session,
            waiter,
            stream,
            space,
            swapchains,
            images,
            acquired: [None, None],
            preview,
            running: false,
        });
        self.wait_until_ready()
    }

    fn deinit_for_bound_gl_context(&mut self, gl: &dyn FixedFunctionGl) {
        if let Some(attached) = self.attached.take() {
            if attached.running {
                if let Err(e) = attached.session.end() {
                    log::warn!("xrEndSession failed: {:?}", e);
                }
            }
            attached.preview.delete(gl);
        }
    }

    fn acquire_eye_texture(&mut self, _gl: &dyn FixedFunctionGl, eye: Eye) -> Result<Option<EyeTarget>, PlaybackError> {
        if self.attached.is_none() {
            return Err(PlaybackError::NotSetUp);
        }
        self.slots.acquire(eye)?;
        let target = self.start_eye(eye);
        if target.is_err() {
            self.slots.abandon();
        }
        target
    }

    fn commit_eye_texture(&mut self, gl: &dyn FixedFunctionGl) -> Result<(), PlaybackError> {
        let eye = self.slots.commit()?;
        let attached = self.attached.as_mut().ok_or(PlaybackError::NotSetUp)?;
        let index = match attached.acquired[eye.index()].take() {
            Some(index) => index,
            None => return Ok(()),
        };

        let texture = attached.images[eye.index()][index];
        let source = if eye.is_left() {
            TextureLayer { texture, layer: Some(0) }
        } else {
            TextureLayer::whole(texture)
        };
        attached.preview.blit_eye(gl, eye, source);

        attached.swapchains[eye.index()]
            .release_image()
            .map_err(|e| PlaybackError::runtime("xrReleaseSwapchainImage", e))
    }

    fn present(&mut self, _gl: &dyn FixedFunctionGl) -> Result<(), PlaybackError> {
        if let Some(eye) = self.slots.active() {
            log::error!("presenting while the {:?} eye is still acquired", eye);
            return Err(PlaybackError::EyeAlreadyAcquired { requested: eye, active: eye });
        }
        let attached = self.attached.as_mut().ok_or(PlaybackError::NotSetUp)?;

        if !self.should_render {
            return attached
                .stream
                .end(self.display_time, xr::EnvironmentBlendMode::OPAQUE, &[])
                .map_err(|e| PlaybackError::runtime("xrEndFrame", e));
        }

        let views = [
            xr::CompositionLayerProjectionView::new()
                .pose(self.eyes[0].pose)
                .fov(self.eyes[0].fov)
                .sub_image(OpenXrPlayback::sub_image(&attached.swapchains[0], self.eyes[0].extents, 0)),
            xr::CompositionLayerProjectionView::new()
                .pose(self.eyes[1].pose)
                .fov(self.eyes[1].fov)
                .sub_image(OpenXrPlayback::sub_image(&attached.swapchains[1], self.eyes[1].extents, 0)),
        ];
        let projection = xr::CompositionLayerProjection::new()
            .layer_flags(xr::CompositionLayerFlags::BLEND_TEXTURE_SOURCE_ALPHA)
            .space(&attached.space)
            .views(&views);

        let mut quad_pose = IDENTITY_POSE;
        quad_pose.position.z = -self.ui_quad_distance;
        let quad = xr::CompositionLayerQuad::new()
            .layer_flags(xr::CompositionLayerFlags::BLEND_TEXTURE_SOURCE_ALPHA)
            .space(&attached.space)
            .eye_visibility(xr::EyeVisibility::BOTH)
            .sub_image(OpenXrPlayback::sub_image(&attached.swapchains[0], self.eyes[0].extents, UI_LAYER))
            .pose(quad_pose)
            .size(xr::Extent2Df { width: 1.0, height: 1.0 });

        let layers: [&xr::CompositionLayerBase<xr::OpenGL>; 2] = [&projection, &quad];
        attached
            .stream
            .end(self.display_time, xr::EnvironmentBlendMode::OPAQUE, &layers)
            .map_err(|e| PlaybackError::runtime("xrEndFrame", e))
    }

    fn current_yaw_angle(&self) -> f32 {
        self.angles.yaw
    }

    fn current_pitch_angle(&self) -> f32 {
        self.angles.pitch
    }

    fn eye_offset_x(&self, eye: Eye) -> f32 {
        self.eyes[eye.index()].pose.position.x
    }

    fn eye_texture_resolution(&self, eye: Eye) -> [u32; 2] {
        self.eyes[eye.index()].extents
    }

    fn tan_to_bottom_fov_edge(&self, eye: Eye) -> f32 {
        // angle_down is negative.
        -self.eyes[eye.index()].fov.angle_down.tan()
    }

    fn tan_to_top_fov_edge(&self, eye: Eye) -> f32 {
        self.eyes[eye.index()].fov.angle_up.tan()
    }

    fn preview_texture(&self) -> Option<GLuint> {
        self.attached.as_ref().map(|a| a.preview.texture())
    }

    fn supports_separate_ui_texture(&self) -> bool {
        true
    }

    fn needs_manual_viewport_adjustment(&self) -> bool {
        true
    }

    fn apply_settings(&mut self, settings: &Settings) {
        self.ui_quad_distance = settings.ui_quad_distance;
    }
}
