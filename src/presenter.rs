//! The presentation thread.
//!
//! `PresentationLoop` owns a thread with its own window and GL context. The
//! game thread hands it each finished frame through `on_frame_available` and
//! stays parked there until both eyes have been rendered, the preview drawn
//! and the window swapped. Only one frame is ever in flight, so nothing in
//! the frame needs more protection than the handoff itself.

use gleam::gl;
use parking_lot::{Condvar, Mutex};

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crate::error::PlaybackError;
use crate::gl::FixedFunctionGl;
use crate::interceptor::{FrameSink, SharedFrame};
use crate::playback::{ContextBinding, Eye, PreviewTarget, VrPlayback};
use crate::player::hud;
use crate::renderer::VrRenderer;
use crate::settings::{settings_panel_height, Settings};

/// Size of the preview area of the window, above the settings panel.
pub const PREVIEW_EXTENTS: [u32; 2] = [hud::WIDTH / 4 * 2, hud::HEIGHT / 4];

/// An auto-reset event: `set` wakes one `wait`, and a `set` with nobody
/// waiting is remembered until the next `wait`.
#[derive(Debug, Default)]
pub struct Event {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl Event {
    pub fn new() -> Event {
        Event::default()
    }

    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.condvar.notify_one();
    }

    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.condvar.wait(&mut signaled);
        }
        *signaled = false;
    }
}

/// The window the presentation thread draws into.
///
/// Created on the presentation thread by the factory passed to
/// `PresentationLoop::spawn`, with its context current, and never moved off
/// it.
pub trait PreviewSurface {
    /// The surface's GL context.
    fn gl(&self) -> Rc<dyn FixedFunctionGl>;

    /// What the VR runtime needs to know about the context.
    fn context_binding(&self) -> ContextBinding;

    fn should_close(&self) -> bool;

    fn poll_events(&mut self);

    /// Draw the tuning sliders into the bottom `panel_height` pixels of the
    /// window, applying whatever the user changed to `settings`.
    fn draw_settings_panel(&mut self, settings: &mut Settings, playback: &dyn VrPlayback, panel_height: u32);

    fn swap_buffers(&mut self);
}

#[derive(Default)]
struct Handshake {
    /// Set by the game thread when `frame` holds something to render.
    wait: Event,

    /// Set by the presentation thread when it is done with the frame.
    done: Event,

    frame: Mutex<Option<SharedFrame>>,
    shutdown: AtomicBool,
    running: AtomicBool,
    frames_presented: AtomicU64,
}

pub struct PresentationLoop {
    handshake: Arc<Handshake>,
    thread: Mutex<Option<thread::JoinHandle<Result<(), PlaybackError>>>>,
}

impl PresentationLoop {
    /// Start the presentation thread.
    ///
    /// On that thread, `make_playback` creates the VR backend and
    /// `make_surface` opens the window, at the size it is given, with its
    /// context current. Neither has to be `Send` in what it returns.
    pub fn spawn<P, S, T>(make_playback: P, make_surface: S, settings: Arc<Mutex<Settings>>) -> PresentationLoop
    where
        P: FnOnce() -> Result<Box<dyn VrPlayback>, PlaybackError> + Send + 'static,
        S: FnOnce([u32; 2]) -> Result<T, PlaybackError> + Send + 'static,
        T: PreviewSurface + 'static,
    {
        let handshake = Arc::new(Handshake::default());
        handshake.running.store(true, Ordering::SeqCst);

        let thread_handshake = handshake.clone();
        let thread = thread::Builder::new()
            .name("stereo presentation".to_string())
            .spawn(move || {
                let result = run(&thread_handshake, make_playback, make_surface, &settings);
                if let Err(ref err) = result {
                    log::error!("presentation loop stopped: {}", err);
                }
                thread_handshake.running.store(false, Ordering::SeqCst);
                // Release a game thread that may be waiting on a frame we
                // will never finish.
                thread_handshake.done.set();
                result
            });

        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(err) => {
                log::error!("cannot start the presentation thread: {}", err);
                handshake.running.store(false, Ordering::SeqCst);
                None
            }
        };

        PresentationLoop {
            handshake,
            thread: Mutex::new(thread),
        }
    }

    /// Frames the presentation thread has finished with.
    pub fn frames_presented(&self) -> u64 {
        self.handshake.frames_presented.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.handshake.running.load(Ordering::SeqCst)
    }

    /// Ask the thread to stop, and wait for it. Returns how it ended.
    pub fn shut_down(&self) -> Result<(), PlaybackError> {
        let thread = match self.thread.lock().take() {
            Some(thread) => thread,
            None => return Ok(()),
        };
        self.handshake.shutdown.store(true, Ordering::SeqCst);
        self.handshake.wait.set();
        match thread.join() {
            Ok(result) => result,
            Err(_) => {
                log::error!("presentation thread panicked");
                Err(PlaybackError::Unavailable("presentation thread panicked".to_string()))
            }
        }
    }
}

impl FrameSink for PresentationLoop {
    fn on_frame_available(&self, frame: &SharedFrame) {
        if frame.lock().is_empty() {
            log::warn!("not presenting an empty frame");
            return;
        }
        if !self.is_running() {
            return;
        }

        *self.handshake.frame.lock() = Some(frame.clone());
        self.handshake.wait.set();
        self.handshake.done.wait();
    }
}

impl Drop for PresentationLoop {
    fn drop(&mut self) {
        if let Err(err) = self.shut_down() {
            log::warn!("presentation loop ended with an error: {}", err);
        }
    }
}

fn run<P, S, T>(handshake: &Handshake, make_playback: P, make_surface: S, settings: &Mutex<Settings>) -> Result<(), PlaybackError>
where
    P: FnOnce() -> Result<Box<dyn VrPlayback>, PlaybackError>,
    S: FnOnce([u32; 2]) -> Result<T, PlaybackError>,
    T: PreviewSurface,
{
    let mut playback = make_playback()?;
    let panel_height = settings_panel_height(&*playback);
    let [preview_width, preview_height] = PREVIEW_EXTENTS;
    let mut surface = make_surface([preview_width, preview_height + panel_height])?;
    let gl = surface.gl();

    playback.setup_for_bound_gl_context(&*gl, &surface.context_binding(), PREVIEW_EXTENTS)?;
    let mut renderer = VrRenderer::new();
    renderer.setup_for_bound_context(&*gl, &*playback)?;

    let preview_framebuffer = gl.gen_framebuffers(1)[0];
    if let Some(texture) = playback.preview_texture() {
        gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, preview_framebuffer);
        gl.framebuffer_texture_2d(gl::DRAW_FRAMEBUFFER, gl::COLOR_ATTACHMENT0, gl::TEXTURE_2D, texture, 0);
        gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, 0);
    }
    let mirror_extents = PreviewTarget::extents_for(playback.eye_texture_resolution(Eye::Left));
    log::info!(
        "presenting with {}; preview {:?}, settings panel {} px",
        playback.name(),
        PREVIEW_EXTENTS,
        panel_height
    );

    let mut result = Ok(());
    while !surface.should_close() {
        handshake.wait.wait();
        if handshake.shutdown.load(Ordering::SeqCst) {
            break;
        }
        surface.poll_events();

        let frame = handshake.frame.lock().take();
        if let Some(frame) = frame {
            let frame = frame.lock();
            let frame_settings = settings.lock().clone();
            if let Err(err) = renderer.render(&*gl, &frame, &mut *playback, &frame_settings) {
                result = Err(err);
                break;
            }
        }

        gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, 0);
        gl.bind_framebuffer(gl::READ_FRAMEBUFFER, preview_framebuffer);
        gl.blit_framebuffer(
            0,
            mirror_extents[1] as i32,
            mirror_extents[0] as i32,
            0,
            0,
            panel_height as i32,
            preview_width as i32,
            (preview_height + panel_height) as i32,
            gl::COLOR_BUFFER_BIT,
            gl::NEAREST,
        );
        gl.bind_framebuffer(gl::READ_FRAMEBUFFER, 0);

        surface.draw_settings_panel(&mut settings.lock(), &*playback, panel_height);
        surface.swap_buffers();
        handshake.frames_presented.fetch_add(1, Ordering::SeqCst);
        handshake.done.set();
    }

    gl.delete_framebuffers(&[preview_framebuffer]);
    renderer.deinit_for_bound_context(&*gl);
    playback.deinit_for_bound_gl_context(&*gl);
    result
}
