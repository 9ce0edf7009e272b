//! Error types for capture, replay, playback and settings.
//!
//! Nothing here is recoverable in the sense of "retry and carry on": a
//! `FrameError` means the recorded stream no longer matches what the replay
//! side can reproduce, and the hook adapter is expected to treat it as fatal.
//! `PlaybackError` aborts the current stereo frame, and the presentation loop
//! stops rendering when it sees one.

use std::{error, fmt, io};

use crate::api::ApiFunction;
use crate::playback::Eye;

#[derive(Debug)]
pub enum FrameError {
    /// The command log has no room for another call this frame.
    CapacityExceeded { capacity: usize },

    /// A call arrived with more argument slots than a recorded call can hold.
    TooManyArgs { function: ApiFunction, count: usize },

    /// A call arrived with fewer arguments than its entrypoint takes.
    MissingArg { function: ApiFunction, index: usize },

    /// An argument slot held a different type than the entrypoint takes.
    ArgType {
        function: ApiFunction,
        index: usize,
        expected: &'static str,
    },

    /// The per-frame stash has no room for a copied buffer.
    StashFull { requested: usize, available: usize },

    /// A stash handle from an earlier frame was used after `reset`.
    StaleBlob,

    /// A call the capture side does not know how to reproduce.
    Unsupported {
        function: ApiFunction,
        detail: String,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameError::CapacityExceeded { capacity } => {
                write!(f, "command log is full ({} calls)", capacity)
            }
            FrameError::TooManyArgs { function, count } => {
                write!(f, "{} called with {} arguments", function.name(), count)
            }
            FrameError::MissingArg { function, index } => {
                write!(f, "{} is missing argument {}", function.name(), index)
            }
            FrameError::ArgType { function, index, expected } => write!(
                f,
                "{} argument {} should be {}",
                function.name(),
                index,
                expected
            ),
            FrameError::StashFull { requested, available } => write!(
                f,
                "frame stash cannot hold {} more bytes ({} left)",
                requested, available
            ),
            FrameError::StaleBlob => write!(f, "stash handle outlived its frame"),
            FrameError::Unsupported { function, detail } => {
                write!(f, "unsupported {}: {}", function.name(), detail)
            }
        }
    }
}

impl error::Error for FrameError {}

#[derive(Debug)]
pub enum PlaybackError {
    /// `acquire_eye_texture` was called while another eye was still active.
    EyeAlreadyAcquired { requested: Eye, active: Eye },

    /// `commit_eye_texture` was called with no eye active.
    NoEyeAcquired,

    /// Playback was used before `setup_for_bound_gl_context`.
    NotSetUp,

    /// The runtime is missing something we cannot render without.
    Unavailable(String),

    /// A call into the VR runtime failed.
    Runtime {
        call: &'static str,
        detail: String,
    },

    /// A GL call made on the runtime's behalf failed.
    Gl { call: &'static str, error: u32 },

    /// Replaying the frame into the eye texture failed.
    Replay(FrameError),
}

impl PlaybackError {
    pub fn runtime<E: fmt::Debug>(call: &'static str, err: E) -> PlaybackError {
        PlaybackError::Runtime {
            call,
            detail: format!("{:?}", err),
        }
    }
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PlaybackError::EyeAlreadyAcquired { requested, active } => write!(
                f,
                "cannot acquire {:?} eye texture: {:?} eye is still active",
                requested, active
            ),
            PlaybackError::NoEyeAcquired => write!(f, "no eye texture is acquired"),
            PlaybackError::NotSetUp => write!(f, "playback has not been set up for a GL context"),
            PlaybackError::Unavailable(what) => write!(f, "VR runtime unavailable: {}", what),
            PlaybackError::Runtime { call, detail } => write!(f, "{} failed: {}", call, detail),
            PlaybackError::Gl { call, error } => write!(f, "{} raised GL error 0x{:x}", call, error),
            PlaybackError::Replay(err) => write!(f, "frame replay failed: {}", err),
        }
    }
}

impl error::Error for PlaybackError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            PlaybackError::Replay(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FrameError> for PlaybackError {
    fn from(err: FrameError) -> PlaybackError {
        PlaybackError::Replay(err)
    }
}

impl From<openxr::sys::Result> for PlaybackError {
    fn from(err: openxr::sys::Result) -> PlaybackError {
        PlaybackError::runtime("openxr", err)
    }
}

#[derive(Debug)]
pub enum SettingsError {
    Io(io::Error),
    /// A value was stored under a key whose type is different.
    WrongType { key: String, expected: &'static str },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SettingsError::Io(err) => write!(f, "settings file: {}", err),
            SettingsError::WrongType { key, expected } => {
                write!(f, "setting {} should hold {}", key, expected)
            }
        }
    }
}

impl error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            SettingsError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for SettingsError {
    fn from(err: io::Error) -> SettingsError {
        SettingsError::Io(err)
    }
}

#[derive(Debug)]
pub enum CaptureError {
    Io(io::Error),
    /// The capture was written by a build with a different `Call` layout.
    HeaderMismatch(String),
    Corrupt(&'static str),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CaptureError::Io(err) => write!(f, "frame capture: {}", err),
            CaptureError::HeaderMismatch(msg) => write!(f, "frame capture header does not match: {}", msg),
            CaptureError::Corrupt(what) => write!(f, "frame capture is corrupt: {}", what),
        }
    }
}

impl error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            CaptureError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CaptureError {
    fn from(err: io::Error) -> CaptureError {
        CaptureError::Io(err)
    }
}

impl From<leb128::read::Error> for CaptureError {
    fn from(err: leb128::read::Error) -> CaptureError {
        match err {
            leb128::read::Error::IoError(err) => CaptureError::Io(err),
            leb128::read::Error::Overflow => CaptureError::Corrupt("length prefix overflows"),
        }
    }
}

#[derive(Debug)]
pub enum GlLoadError {
    MissingSymbol(&'static str),
}

impl fmt::Display for GlLoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GlLoadError::MissingSymbol(name) => write!(f, "GL entrypoint {} is not available", name),
        }
    }
}

impl error::Error for GlLoadError {}
