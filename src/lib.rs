//! Stereo replay of a fixed-function GL game, for VR headsets.
//!
//! The game renders one monoscopic frame at a time through legacy OpenGL. A
//! hook layer feeds every call to a `FrameInterceptor`, which records it into
//! a `Frame` along with the pipeline state the frame started from. At
//! `SwapBuffers` the frame goes to the presentation thread, where the
//! `FramePlayer` replays it twice, once per eye, into textures handed out by
//! a `VrPlayback` backend. On the way it rewrites the projection for the
//! headset's field of view, turns the camera with the head, separates the
//! eyes, and moves the 2D HUD somewhere the lenses do not crop it.
//!
//! `VrPlayer` puts the pieces together, and is what a hook layer should
//! hold on to.
//!
//! The HUD handling is specific to one game: it recognizes the status bar,
//! console and pause menu by texture names and screen positions that only
//! make sense for that game's assets. See `player::hud`.

pub mod api;
pub mod call;
pub mod capture;
pub mod error;
pub mod frame;
pub mod gl;
pub mod interceptor;
pub mod playback;
pub mod player;
pub mod player_handle;
pub mod presenter;
pub mod raw;
pub mod renderer;
pub mod settings;
pub mod slab;
pub mod state;
pub mod write_image;

#[cfg(test)]
mod mock_gl;

pub use api::{ApiFunction, Arg};
pub use call::Call;
pub use error::{CaptureError, FrameError, GlLoadError, PlaybackError, SettingsError};
pub use frame::Frame;
pub use gl::{FixedFunctionGl, GlContext};
pub use interceptor::{FrameInterceptor, FrameSink, SharedFrame};
pub use playback::{BackendKind, Eye, VrPlayback};
pub use player::FramePlayer;
pub use player_handle::{hook_callback, PlayerOptions, VrPlayer};
pub use presenter::{PresentationLoop, PreviewSurface};
pub use renderer::VrRenderer;
pub use settings::{LauncherSettings, Settings};
