//! `VrPlayer`, the object a hook layer talks to.
//!
//! It ties the game-thread half (the interceptor) to the presentation thread
//! and owns the settings both sides share. The hook layer keeps the player
//! alive and passes it back on every callback as its user context; there is
//! no global instance.

use parking_lot::Mutex;

use std::ffi::c_void;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use crate::api::{ApiFunction, Arg};
use crate::capture::CapturingSink;
use crate::error::{FrameError, PlaybackError};
use crate::frame::{Frame, DEFAULT_MAX_COMMANDS};
use crate::gl::FixedFunctionGl;
use crate::interceptor::FrameInterceptor;
use crate::playback::{create_playback, BackendKind, DEFAULT_HORIZONTAL_FOV_DEGREES};
use crate::presenter::{PresentationLoop, PreviewSurface};
use crate::settings::{LauncherSettings, Settings};
use crate::slab::{SlabAllocator, DEFAULT_BLOCK_SIZE, DEFAULT_PREALLOCATED_BLOCKS};

/// How to put a player together.
#[derive(Clone, Debug)]
pub struct PlayerOptions {
    /// Where the tunables live. Read at startup, written back at shutdown.
    pub settings_path: Option<PathBuf>,

    pub launcher: LauncherSettings,
    pub horizontal_fov_degrees: f32,
    pub slab_block_size: usize,
    pub max_commands: usize,
}

impl Default for PlayerOptions {
    fn default() -> PlayerOptions {
        PlayerOptions {
            settings_path: None,
            launcher: LauncherSettings::default(),
            horizontal_fov_degrees: DEFAULT_HORIZONTAL_FOV_DEGREES,
            slab_block_size: DEFAULT_BLOCK_SIZE,
            max_commands: DEFAULT_MAX_COMMANDS,
        }
    }
}

pub struct VrPlayer {
    interceptor: FrameInterceptor,
    presenter: Arc<PresentationLoop>,
    settings: Arc<Mutex<Settings>>,
    settings_path: Option<PathBuf>,
    shut_down: bool,
}

impl VrPlayer {
    /// Start the presentation thread and get ready to record.
    ///
    /// `game_gl` is the game's own context, used only to read its matrices
    /// back at frame boundaries. `make_surface` runs on the presentation
    /// thread to open the preview window.
    pub fn create<S, T>(game_gl: Rc<dyn FixedFunctionGl>, options: PlayerOptions, make_surface: S) -> VrPlayer
    where
        S: FnOnce([u32; 2]) -> Result<T, PlaybackError> + Send + 'static,
        T: PreviewSurface + 'static,
    {
        let mut settings = match &options.settings_path {
            Some(path) => Settings::load(path).unwrap_or_else(|err| {
                log::warn!("cannot read {}: {}; using defaults", path.display(), err);
                Settings::default()
            }),
            None => Settings::default(),
        };
        settings.clamp();
        let settings = Arc::new(Mutex::new(settings));

        let backend = BackendKind::select(&options.launcher);
        let hfov = options.horizontal_fov_degrees;
        let presenter = Arc::new(PresentationLoop::spawn(
            move || create_playback(backend, hfov),
            make_surface,
            settings.clone(),
        ));

        let slabs = SlabAllocator::new(options.slab_block_size, DEFAULT_PREALLOCATED_BLOCKS);
        let frame = Frame::new(&slabs, options.max_commands);
        let sink = CapturingSink::from_env(presenter.clone());
        log::info!(
            "VR player ready: {} backend, room for {} calls per frame",
            backend.name(),
            options.max_commands
        );

        VrPlayer {
            interceptor: FrameInterceptor::new(frame, game_gl, sink),
            presenter,
            settings,
            settings_path: options.settings_path,
            shut_down: false,
        }
    }

    /// Handle one hooked call; see `FrameInterceptor::on_api_call`.
    ///
    /// Safety: as for `FrameInterceptor::on_api_call`.
    pub unsafe fn on_api_call(&mut self, function: ApiFunction, args: &[Arg]) -> Result<bool, FrameError> {
        self.interceptor.on_api_call(function, args)
    }

    /// The pointer to register as the hook layer's user context, to be
    /// handed back to `hook_callback`.
    pub fn as_user_context(&mut self) -> *mut c_void {
        self as *mut VrPlayer as *mut c_void
    }

    pub fn settings(&self) -> &Arc<Mutex<Settings>> {
        &self.settings
    }

    pub fn frames_delivered(&self) -> u64 {
        self.interceptor.frames_delivered()
    }

    pub fn frames_presented(&self) -> u64 {
        self.presenter.frames_presented()
    }

    pub fn is_presenting(&self) -> bool {
        self.presenter.is_running()
    }

    /// Stop the presentation thread and write the settings back. Also done
    /// on drop; calling it first lets the caller see how presentation ended.
    pub fn shut_down(&mut self) -> Result<(), PlaybackError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        let result = self.presenter.shut_down();
        if let Some(path) = &self.settings_path {
            if let Err(err) = self.settings.lock().save(path) {
                log::warn!("cannot save settings to {}: {}", path.display(), err);
            }
        }
        result
    }
}

impl Drop for VrPlayer {
    fn drop(&mut self) {
        if let Err(err) = self.shut_down() {
            log::warn!("presentation ended with an error: {}", err);
        }
    }
}

/// The callback to register with a hook layer that passes
/// `(function, arguments, user context, should-pass-through)`.
///
/// A call the player cannot record is fatal: replaying a frame with a
/// missing or mangled call would draw something the game never drew.
///
/// Safety: `user_context` must come from `VrPlayer::as_user_context` on a
/// player that is still alive and not otherwise borrowed, and `args` must
/// satisfy `FrameInterceptor::on_api_call`.
pub unsafe fn hook_callback(function: ApiFunction, args: &[Arg], user_context: *mut c_void, should_pass_through: &mut bool) {
    let player = &mut *(user_context as *mut VrPlayer);
    match player.on_api_call(function, args) {
        Ok(pass_through) => *should_pass_through = pass_through,
        Err(err) => {
            log::error!("cannot record {}: {}", function.name(), err);
            panic!("replay cannot proceed");
        }
    }
}
