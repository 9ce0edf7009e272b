//! A pool of large byte blocks, handed out as owning handles.
//!
//! Frames copy texture uploads into one of these blocks. Blocks are big
//! (32 MiB by default) and allocating one is not something to do per frame,
//! so a dropped `Slab` goes back on the pool's free list and the next
//! `allocate` reuses it before the pool grows.
//!
//! Every block carries a generation that advances each time it is returned.
//! A `SlabKey` names a block at one generation, so a key kept past its
//! `Slab`'s lifetime can be detected instead of silently aliasing whoever
//! got the block next.

use parking_lot::Mutex;

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

pub const DEFAULT_BLOCK_SIZE: usize = 32 * 1024 * 1024;
pub const DEFAULT_PREALLOCATED_BLOCKS: usize = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlabKey {
    pub index: usize,
    pub generation: u32,
}

struct Block {
    /// `None` while the block is checked out.
    data: Option<Box<[u8]>>,
    generation: u32,
}

struct Pool {
    block_size: usize,
    blocks: Vec<Block>,
    free: Vec<usize>,
}

#[derive(Clone)]
pub struct SlabAllocator {
    pool: Arc<Mutex<Pool>>,
}

impl SlabAllocator {
    pub fn new(block_size: usize, preallocated: usize) -> SlabAllocator {
        let blocks = (0..preallocated)
            .map(|_| Block {
                data: Some(vec![0; block_size].into_boxed_slice()),
                generation: 0,
            })
            .collect();
        // Hand out low indices first.
        let free = (0..preallocated).rev().collect();
        SlabAllocator {
            pool: Arc::new(Mutex::new(Pool {
                block_size,
                blocks,
                free,
            })),
        }
    }

    pub fn block_size(&self) -> usize {
        self.pool.lock().block_size
    }

    /// Check out a block, reusing a returned one if there is any.
    pub fn allocate(&self) -> Slab {
        let mut pool = self.pool.lock();
        let index = match pool.free.pop() {
            Some(index) => index,
            None => {
                let block_size = pool.block_size;
                log::debug!("slab pool growing to {} blocks", pool.blocks.len() + 1);
                pool.blocks.push(Block {
                    data: Some(vec![0; block_size].into_boxed_slice()),
                    generation: 0,
                });
                pool.blocks.len() - 1
            }
        };

        let block_size = pool.block_size;
        let block = &mut pool.blocks[index];
        // A free-list entry always has its data; rebuild rather than fail.
        let data = block
            .data
            .take()
            .unwrap_or_else(|| vec![0; block_size].into_boxed_slice());
        let generation = block.generation;

        Slab {
            pool: Arc::clone(&self.pool),
            key: SlabKey { index, generation },
            data: Some(data),
        }
    }

    /// True if `key` names a block that is still checked out under that key.
    pub fn is_live(&self, key: SlabKey) -> bool {
        let pool = self.pool.lock();
        match pool.blocks.get(key.index) {
            Some(block) => block.generation == key.generation && block.data.is_none(),
            None => false,
        }
    }

    /// `(total blocks, free blocks)`.
    pub fn stats(&self) -> (usize, usize) {
        let pool = self.pool.lock();
        (pool.blocks.len(), pool.free.len())
    }
}

impl fmt::Debug for SlabAllocator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (total, free) = self.stats();
        f.debug_struct("SlabAllocator")
            .field("total", &total)
            .field("free", &free)
            .finish()
    }
}

/// A checked-out block. Returns itself to the pool when dropped.
pub struct Slab {
    pool: Arc<Mutex<Pool>>,
    key: SlabKey,
    data: Option<Box<[u8]>>,
}

impl Slab {
    pub fn key(&self) -> SlabKey {
        self.key
    }
}

impl Deref for Slab {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match &self.data {
            Some(data) => data,
            None => &[],
        }
    }
}

impl DerefMut for Slab {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.data {
            Some(data) => data,
            None => &mut [],
        }
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        let mut pool = self.pool.lock();
        let index = self.key.index;
        let block = &mut pool.blocks[index];
        debug_assert_eq!(block.generation, self.key.generation);
        block.data = self.data.take();
        block.generation = block.generation.wrapping_add(1);
        pool.free.push(index);
    }
}

impl fmt::Debug for Slab {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Slab")
            .field("key", &self.key)
            .field("len", &self.len())
            .finish()
    }
}

#[test]
fn reuses_before_growing() {
    let slabs = SlabAllocator::new(64, 2);
    assert_eq!(slabs.stats(), (2, 2));

    let a = slabs.allocate();
    let b = slabs.allocate();
    assert_eq!((a.key().index, b.key().index), (0, 1));
    assert_eq!(a.len(), 64);

    let c = slabs.allocate();
    assert_eq!(c.key().index, 2);
    assert_eq!(slabs.stats(), (3, 0));

    let b_key = b.key();
    drop(b);
    assert!(!slabs.is_live(b_key));

    let d = slabs.allocate();
    assert_eq!(d.key().index, b_key.index);
    assert_ne!(d.key().generation, b_key.generation);
    assert!(slabs.is_live(d.key()));
    assert_eq!(slabs.stats(), (3, 0));

    drop((a, c, d));
    assert_eq!(slabs.stats(), (3, 3));
}

#[test]
fn blocks_are_writable() {
    let slabs = SlabAllocator::new(16, 1);
    let mut slab = slabs.allocate();
    slab[..4].copy_from_slice(b"quad");
    assert_eq!(&slab[..4], b"quad");
}
