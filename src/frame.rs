//! One frame's worth of recorded calls.
//!
//! A `Frame` is created once and reused: `reset` drops the recorded calls
//! but keeps their buffer, and rewinds the stash, the bump buffer that holds
//! copies of data the game passed by pointer. The stash lives in a slab
//! block, so its memory comes back to the pool when the frame is dropped.
//!
//! Handles into the stash (`Blob`) carry the frame's generation, which
//! `reset` advances. Resolving a handle from an earlier frame fails rather
//! than returning whatever the current frame happens to have stashed there.

use std::fmt;
use std::mem;

use crate::api::{ApiFunction, Arg};
use crate::call::{Blob, Call};
use crate::error::FrameError;
use crate::slab::{self, Slab, SlabAllocator};
use crate::state::PipelineState;

/// How many calls fit in a frame by default: as many as a slab block holds.
pub const DEFAULT_MAX_COMMANDS: usize = slab::DEFAULT_BLOCK_SIZE / mem::size_of::<Call>();

pub struct Frame {
    calls: Vec<Call>,
    max_commands: usize,
    stash: Slab,
    stash_used: usize,
    generation: u32,
    start_state: PipelineState,
}

impl Frame {
    pub fn new(slabs: &SlabAllocator, max_commands: usize) -> Frame {
        Frame {
            calls: Vec::with_capacity(max_commands),
            max_commands,
            stash: slabs.allocate(),
            stash_used: 0,
            generation: 0,
            start_state: PipelineState::default(),
        }
    }

    /// Append a call built from raw argument slots.
    pub fn record_api_call(&mut self, function: ApiFunction, args: &[Arg]) -> Result<(), FrameError> {
        let call = Call::from_args(function, args)?;
        self.record(call)
    }

    /// Append an already-built call.
    pub fn record(&mut self, call: Call) -> Result<(), FrameError> {
        if self.calls.len() >= self.max_commands {
            log::error!("frame holds {} calls; cannot record {:?}", self.max_commands, call);
            return Err(FrameError::CapacityExceeded {
                capacity: self.max_commands,
            });
        }
        self.calls.push(call);
        Ok(())
    }

    /// Forget this frame's calls and stash contents.
    pub fn reset(&mut self) {
        self.calls.clear();
        self.stash_used = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn get_n_api_commands(&self) -> usize {
        self.calls.len()
    }

    pub fn get_api_command(&self, index: usize) -> Option<&Call> {
        self.calls.get(index)
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn max_commands(&self) -> usize {
        self.max_commands
    }

    pub fn set_start_state(&mut self, state: PipelineState) {
        self.start_state = state;
    }

    pub fn get_start_state(&self) -> &PipelineState {
        &self.start_state
    }

    /// Copy `bytes` into the stash and return a handle to the copy.
    pub fn stash_bytes(&mut self, bytes: &[u8]) -> Result<Blob, FrameError> {
        let available = self.stash.len() - self.stash_used;
        if bytes.len() > available || self.stash_used + bytes.len() > u32::MAX as usize {
            log::error!("frame stash full: {} bytes requested, {} left", bytes.len(), available);
            return Err(FrameError::StashFull {
                requested: bytes.len(),
                available,
            });
        }

        let offset = self.stash_used;
        self.stash[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.stash_used += bytes.len();

        Ok(Blob {
            offset: offset as u32,
            len: bytes.len() as u32,
            generation: self.generation,
        })
    }

    /// The bytes `blob` refers to.
    pub fn blob(&self, blob: Blob) -> Result<&[u8], FrameError> {
        let start = blob.offset as usize;
        let end = start + blob.len as usize;
        if blob.generation != self.generation || end > self.stash_used {
            return Err(FrameError::StaleBlob);
        }
        Ok(&self.stash[start..end])
    }

    /// Everything stashed so far this frame.
    pub fn stash_contents(&self) -> &[u8] {
        &self.stash[..self.stash_used]
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Rebuild a frame from saved parts. Blob handles in `calls` are
    /// rewritten to this frame's generation.
    pub(crate) fn from_parts(
        slabs: &SlabAllocator,
        calls: Vec<Call>,
        stash: &[u8],
        start_state: PipelineState,
    ) -> Result<Frame, FrameError> {
        let mut frame = Frame::new(slabs, calls.len().max(1));
        frame.stash_bytes(stash)?;
        let generation = frame.generation;
        for mut call in calls {
            if let Call::tex_image_2d { pixels: Some(ref mut blob), .. } = call {
                blob.generation = generation;
            }
            frame.record(call)?;
        }
        frame.start_state = start_state;
        Ok(frame)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Frame")
            .field("calls", &self.calls.len())
            .field("max_commands", &self.max_commands)
            .field("stash_used", &self.stash_used)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gleam::gl;

    fn small_frame(max_commands: usize) -> Frame {
        Frame::new(&SlabAllocator::new(256, 1), max_commands)
    }

    #[test]
    fn reset_starts_over_at_zero() {
        let mut frame = small_frame(8);
        for _ in 0..5 {
            frame.record_api_call(ApiFunction::Enable, &[Arg::U32(gl::BLEND)]).unwrap();
        }
        assert_eq!(frame.get_n_api_commands(), 5);

        frame.reset();
        assert_eq!(frame.get_n_api_commands(), 0);
        assert!(frame.get_api_command(0).is_none());

        frame.record_api_call(ApiFunction::Disable, &[Arg::U32(gl::BLEND)]).unwrap();
        assert_eq!(frame.get_api_command(0), Some(&Call::disable { cap: gl::BLEND }));
        assert_eq!(frame.get_n_api_commands(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut frame = small_frame(2);
        frame.record(Call::end {}).unwrap();
        frame.record(Call::end {}).unwrap();
        assert!(matches!(
            frame.record(Call::end {}),
            Err(FrameError::CapacityExceeded { capacity: 2 })
        ));
        assert_eq!(frame.get_n_api_commands(), 2);

        let too_many = [Arg::U32(0); 10];
        assert!(matches!(
            frame.record_api_call(ApiFunction::Enable, &too_many),
            Err(FrameError::TooManyArgs { .. })
        ));
    }

    #[test]
    fn stash_handles_expire_on_reset() {
        let mut frame = small_frame(4);
        let blob = frame.stash_bytes(&[1, 2, 3, 4]).unwrap();
        assert_eq!(frame.blob(blob).unwrap(), &[1, 2, 3, 4]);

        frame.reset();
        assert!(matches!(frame.blob(blob), Err(FrameError::StaleBlob)));

        // The same offset, handed out again, resolves to the new bytes.
        let fresh = frame.stash_bytes(&[9, 9]).unwrap();
        assert_eq!(fresh.offset, blob.offset);
        assert_eq!(frame.blob(fresh).unwrap(), &[9, 9]);
    }

    #[test]
    fn stash_full() {
        let mut frame = small_frame(4);
        frame.stash_bytes(&[0; 200]).unwrap();
        assert!(matches!(
            frame.stash_bytes(&[0; 100]),
            Err(FrameError::StashFull { requested: 100, available: 56 })
        ));
    }

    #[test]
    fn stash_returns_to_pool() {
        let slabs = SlabAllocator::new(64, 1);
        let frame = Frame::new(&slabs, 1);
        assert_eq!(slabs.stats(), (1, 0));
        drop(frame);
        assert_eq!(slabs.stats(), (1, 1));
    }
}
