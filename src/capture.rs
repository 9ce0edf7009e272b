//! Saving one frame to disk, for looking at offline.
//!
//! A capture is a directory holding two files:
//!
//! - `calls`: a `Header`, then the frame's `Call`s, byte for byte.
//!
//! - `variable`: the stash, prefixed with its length in unsigned LEB128,
//!   followed by the frame's start `PipelineState`, byte for byte.
//!
//! Calls and state are written in the machine's own layout, so a capture
//! can only be read by the build that wrote it; the header catches most
//! mismatches.

use std::io::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{env, fs, io, mem};

use crate::call::Call;
use crate::error::CaptureError;
use crate::frame::Frame;
use crate::interceptor::{FrameSink, SharedFrame};
use crate::raw::{self, Simple};
use crate::slab::SlabAllocator;
use crate::state::PipelineState;

/// When set, the first completed frame is saved into this directory.
pub const CAPTURE_DIR_ENV_VAR: &str = "STEREO_REPLAY_CAPTURE_DIR";

// "SRF1", read as a little-endian `u32`.
const MAGIC: u32 = 0x3146_5253;

#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(C)]
struct Header {
    // A `u32` gives different bytes on big- and little-endian machines.
    magic: u32,
    size_of_usize: u32,
    size_of_call: u32,
    size_of_state: u32,
    align_of_call: u32,
}

unsafe impl Simple for Header {}

impl Header {
    fn current() -> Header {
        Header {
            magic: MAGIC,
            size_of_usize: mem::size_of::<usize>() as u32,
            size_of_call: mem::size_of::<Call>() as u32,
            size_of_state: mem::size_of::<PipelineState>() as u32,
            align_of_call: mem::align_of::<Call>() as u32,
        }
    }

    fn check(&self) -> Result<(), CaptureError> {
        let expected = Header::current();
        if self.magic != expected.magic {
            return Err(CaptureError::HeaderMismatch(format!(
                "bad magic number 0x{:08x}; not a frame capture, or written on a machine of different endianness",
                self.magic
            )));
        }
        if *self != expected {
            return Err(CaptureError::HeaderMismatch(format!(
                "written with {:?}, this build has {:?}",
                self, expected
            )));
        }
        Ok(())
    }
}

/// Write `frame` into `dir`, creating the directory if needed.
pub fn save<P: AsRef<Path>>(frame: &Frame, dir: P) -> Result<(), CaptureError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let mut calls = io::BufWriter::new(fs::File::create(dir.join("calls"))?);
    calls.write_all(raw::as_bytes(&Header::current()))?;
    calls.write_all(raw::slice_as_bytes(frame.calls()))?;
    calls.flush()?;

    let stash = frame.stash_contents();
    let mut variable = io::BufWriter::new(fs::File::create(dir.join("variable"))?);
    leb128::write::unsigned(&mut variable, stash.len() as u64)?;
    variable.write_all(stash)?;
    variable.write_all(raw::as_bytes(frame.get_start_state()))?;
    variable.flush()?;

    log::info!(
        "saved frame to {}: {} calls, {} stashed bytes",
        dir.display(),
        frame.get_n_api_commands(),
        stash.len()
    );
    Ok(())
}

/// Read back a frame written by `save`.
pub fn load<P: AsRef<Path>>(dir: P) -> Result<Frame, CaptureError> {
    let dir = dir.as_ref();

    let calls_bytes = fs::read(dir.join("calls"))?;
    let header_size = mem::size_of::<Header>();
    if calls_bytes.len() < header_size {
        return Err(CaptureError::Corrupt("calls file is shorter than its header"));
    }
    // Every bit pattern is a valid `Header`.
    let header = unsafe { raw::vec_from_bytes::<Header>(&calls_bytes[..header_size]) }
        .and_then(|mut headers| headers.pop())
        .ok_or(CaptureError::Corrupt("unreadable header"))?;
    header.check()?;

    // With the header matching, the calls were written by this build. Bad
    // data could still produce a `Call` with an invalid discriminant.
    let calls: Vec<Call> = unsafe { raw::vec_from_bytes(&calls_bytes[header_size..]) }
        .ok_or(CaptureError::Corrupt("calls file is not a whole number of calls"))?;

    let mut variable = io::Cursor::new(fs::read(dir.join("variable"))?);
    let stash_len = leb128::read::unsigned(&mut variable)? as usize;
    let rest = &variable.get_ref()[variable.position() as usize..];
    let state_size = mem::size_of::<PipelineState>();
    if rest.len() != stash_len + state_size {
        return Err(CaptureError::Corrupt("variable file has the wrong length"));
    }
    let (stash, state_bytes) = rest.split_at(stash_len);
    let start_state = unsafe { raw::vec_from_bytes::<PipelineState>(state_bytes) }
        .and_then(|mut states| states.pop())
        .ok_or(CaptureError::Corrupt("unreadable start state"))?;

    for call in &calls {
        if let Some(blob) = call.blob() {
            if blob.offset as usize + blob.len as usize > stash.len() {
                return Err(CaptureError::Corrupt("texture upload points outside the stash"));
            }
        }
    }

    let slabs = SlabAllocator::new(stash.len().max(1), 1);
    Frame::from_parts(&slabs, calls, stash, start_state).map_err(|err| {
        log::error!("cannot rebuild captured frame: {}", err);
        CaptureError::Corrupt("frame does not fit back together")
    })
}

/// A `FrameSink` that saves the first non-empty frame it sees, then passes
/// every frame on.
pub struct CapturingSink {
    inner: Arc<dyn FrameSink>,
    dir: PathBuf,
    pending: AtomicBool,
}

impl CapturingSink {
    pub fn new<P: Into<PathBuf>>(inner: Arc<dyn FrameSink>, dir: P) -> CapturingSink {
        CapturingSink {
            inner,
            dir: dir.into(),
            pending: AtomicBool::new(true),
        }
    }

    /// Wrap `inner` if `STEREO_REPLAY_CAPTURE_DIR` is set; otherwise return
    /// it as is.
    pub fn from_env(inner: Arc<dyn FrameSink>) -> Arc<dyn FrameSink> {
        match env::var_os(CAPTURE_DIR_ENV_VAR) {
            Some(dir) if !dir.is_empty() => {
                log::info!("will save the first frame to {}", Path::new(&dir).display());
                Arc::new(CapturingSink::new(inner, dir)) as Arc<dyn FrameSink>
            }
            _ => inner,
        }
    }

    /// True once a frame has been saved, or an attempt to save one failed.
    pub fn is_done(&self) -> bool {
        !self.pending.load(Ordering::SeqCst)
    }
}

impl FrameSink for CapturingSink {
    fn on_frame_available(&self, frame: &SharedFrame) {
        let empty = frame.lock().is_empty();
        if !empty && self.pending.swap(false, Ordering::SeqCst) {
            if let Err(err) = save(&frame.lock(), &self.dir) {
                log::warn!("could not save frame to {}: {}", self.dir.display(), err);
            }
        }
        self.inner.on_frame_available(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Blob;
    use crate::slab::SlabAllocator;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("stereo-replay-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn sample_frame() -> Frame {
        let mut frame = Frame::new(&SlabAllocator::new(4096, 1), 64);
        let pixels = frame.stash_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let calls = [
            Call::viewport { x: 0, y: 0, width: 640, height: 480 },
            Call::bind_texture { target: gleam::gl::TEXTURE_2D, texture: 7 },
            Call::tex_image_2d {
                target: gleam::gl::TEXTURE_2D,
                level: 0,
                internal_format: 4,
                width: 2,
                height: 1,
                border: 0,
                format: gleam::gl::RGBA,
                ty: gleam::gl::UNSIGNED_BYTE,
                pixels: Some(pixels),
            },
            Call::vertex_2f { x: 0.0, y: 480.0 },
        ];
        for call in calls.iter() {
            frame.record(*call).unwrap();
        }
        let mut state = PipelineState::default();
        state.is_blend_enabled = true;
        state.bound_texture_2d_gl_id = 7;
        frame.set_start_state(state);
        frame
    }

    #[test]
    fn save_and_load() {
        let dir = scratch_dir("save-and-load");
        let frame = sample_frame();
        save(&frame, &dir).unwrap();

        let loaded = load(&dir).unwrap();
        assert_eq!(loaded.get_n_api_commands(), 4);
        assert_eq!(loaded.calls()[..2], frame.calls()[..2]);
        assert_eq!(loaded.get_start_state(), frame.get_start_state());
        match loaded.calls()[2] {
            Call::tex_image_2d { pixels: Some(blob), .. } => {
                assert_eq!(loaded.blob(blob).unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8]);
            }
            ref other => panic!("unexpected call {:?}", other),
        }
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = scratch_dir("foreign");
        save(&sample_frame(), &dir).unwrap();
        let mut calls = fs::read(dir.join("calls")).unwrap();
        calls[0] ^= 0xff;
        fs::write(dir.join("calls"), &calls).unwrap();
        assert!(matches!(load(&dir), Err(CaptureError::HeaderMismatch(_))));

        save(&sample_frame(), &dir).unwrap();
        let variable = fs::read(dir.join("variable")).unwrap();
        fs::write(dir.join("variable"), &variable[..variable.len() - 1]).unwrap();
        assert!(matches!(load(&dir), Err(CaptureError::Corrupt(_))));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rejects_uploads_outside_the_stash() {
        let dir = scratch_dir("outside");
        let mut frame = Frame::new(&SlabAllocator::new(4096, 1), 8);
        frame
            .record(Call::tex_image_2d {
                target: gleam::gl::TEXTURE_2D,
                level: 0,
                internal_format: 4,
                width: 2,
                height: 2,
                border: 0,
                format: gleam::gl::RGBA,
                ty: gleam::gl::UNSIGNED_BYTE,
                pixels: Some(Blob { offset: 0, len: 16, generation: 0 }),
            })
            .unwrap();
        save(&frame, &dir).unwrap();
        assert!(matches!(load(&dir), Err(CaptureError::Corrupt(_))));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl FrameSink for Counter {
        fn on_frame_available(&self, _frame: &SharedFrame) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn capturing_sink_saves_the_first_real_frame() {
        let dir = scratch_dir("sink");
        let counter = Arc::new(Counter::default());
        let sink = CapturingSink::new(counter.clone(), &dir);

        let empty: SharedFrame = Arc::new(Mutex::new(Frame::new(&SlabAllocator::new(64, 1), 4)));
        sink.on_frame_available(&empty);
        assert!(!sink.is_done());
        assert!(!dir.exists());

        let frame: SharedFrame = Arc::new(Mutex::new(sample_frame()));
        sink.on_frame_available(&frame);
        sink.on_frame_available(&frame);
        assert!(sink.is_done());
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
        assert_eq!(load(&dir).unwrap().get_n_api_commands(), 4);
        fs::remove_dir_all(&dir).unwrap();
    }
}
