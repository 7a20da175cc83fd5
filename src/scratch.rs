//! Page-sized scratch buffers checked out per read.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

/// Idle buffers kept for reuse; anything beyond this is freed on return.
const MAX_IDLE: usize = 16;

/// Pool of (ciphertext, plaintext) page buffer pairs.
///
/// Each read checks out its own pair, so concurrent reads on one handle
/// never share mutable scratch space.
pub struct ScratchPool {
    page_size: usize,
    idle: Mutex<Vec<PagePair>>,
}

pub struct PagePair {
    pub raw: Box<[u8]>,
    pub plain: Box<[u8]>,
}

/// A checked-out pair; returned to the pool on drop.
pub struct Scratch<'a> {
    pool: &'a ScratchPool,
    pair: PagePair,
}

impl ScratchPool {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn checkout(&self) -> Scratch<'_> {
        let pair = self.idle.lock().pop().unwrap_or_else(|| PagePair {
            raw: vec![0u8; self.page_size].into_boxed_slice(),
            plain: vec![0u8; self.page_size].into_boxed_slice(),
        });
        Scratch { pool: self, pair }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

impl Deref for Scratch<'_> {
    type Target = PagePair;

    fn deref(&self) -> &PagePair {
        &self.pair
    }
}

impl DerefMut for Scratch<'_> {
    fn deref_mut(&mut self) -> &mut PagePair {
        &mut self.pair
    }
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        // Plaintext must not linger in idle buffers.
        self.pair.plain.fill(0);
        let pair = PagePair {
            raw: std::mem::take(&mut self.pair.raw),
            plain: std::mem::take(&mut self.pair.plain),
        };
        let mut idle = self.pool.idle.lock();
        if idle.len() < MAX_IDLE {
            idle.push(pair);
        }
    }
}
