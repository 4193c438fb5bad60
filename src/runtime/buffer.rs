//! Cursor-based byte windows and the per-worker window pool.
//!
//! A [`ByteWindow`] is a fixed-capacity byte region with a `position`, a
//! `limit` and an optional `mark`. It alternates between two modes:
//!
//! - **fill mode** (after `new`/`clear`): `position..limit` is free space,
//!   `put` appends at `position`.
//! - **drain mode** (after `flip`): `position..limit` holds readable bytes,
//!   `get` consumes from `position`.
//!
//! At all times `mark <= position <= limit <= capacity`.
//!
//! Windows are pre-allocated per worker in a [`WindowPool`] and reused across
//! connections so the hot path never allocates.

use crate::error::WindowError;
use std::fmt;

/// Fixed-capacity, position/limit-bounded view over a byte region.
pub struct ByteWindow {
    buf: Box<[u8]>,
    position: usize,
    limit: usize,
    mark: Option<usize>,
}

impl ByteWindow {
    /// Allocate a window in fill mode.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            position: 0,
            limit: capacity,
            mark: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn mark_position(&self) -> Option<usize> {
        self.mark
    }

    /// Bytes between `position` and `limit`.
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// Append `bytes` at `position`.
    ///
    /// All-or-nothing: on overflow nothing is written and the cursor is
    /// unchanged.
    pub fn put(&mut self, bytes: &[u8]) -> Result<(), WindowError> {
        let remaining = self.remaining();
        if bytes.len() > remaining {
            return Err(WindowError::Overflow {
                requested: bytes.len(),
                remaining,
            });
        }
        let start = self.position;
        self.buf[start..start + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        Ok(())
    }

    pub fn put_u8(&mut self, byte: u8) -> Result<(), WindowError> {
        self.put(&[byte])
    }

    /// Consume `count` bytes from `position`.
    pub fn get(&mut self, count: usize) -> Result<&[u8], WindowError> {
        let remaining = self.remaining();
        if count > remaining {
            return Err(WindowError::Underflow {
                requested: count,
                remaining,
            });
        }
        let start = self.position;
        self.position += count;
        Ok(&self.buf[start..start + count])
    }

    pub fn get_u8(&mut self) -> Result<u8, WindowError> {
        Ok(self.get(1)?[0])
    }

    /// Fill `dst` completely from `position`.
    pub fn get_into(&mut self, dst: &mut [u8]) -> Result<(), WindowError> {
        let src = self.get(dst.len())?;
        dst.copy_from_slice(src);
        Ok(())
    }

    /// `limit = position; position = 0`. Switches fill mode to drain mode.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
        self.mark = None;
    }

    /// `position = 0; limit = capacity`. Storage is not zeroed: old bytes
    /// stay in place and are simply outside the logical window.
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.buf.len();
        self.mark = None;
    }

    /// `position = 0`, `limit` unchanged, so the same region can be drained
    /// again.
    pub fn rewind(&mut self) {
        self.position = 0;
        self.mark = None;
    }

    pub fn mark(&mut self) {
        self.mark = Some(self.position);
    }

    /// Restore `position` to the mark.
    pub fn reset(&mut self) -> Result<(), WindowError> {
        match self.mark {
            Some(mark) => {
                self.position = mark;
                Ok(())
            }
            None => Err(WindowError::InvalidMark),
        }
    }

    /// Readable region `position..limit`, without consuming it.
    pub fn readable(&self) -> &[u8] {
        &self.buf[self.position..self.limit]
    }

    /// Free region `position..limit` for direct fills (e.g. a socket read).
    /// Follow with [`advance`](Self::advance) for the bytes actually filled.
    pub fn writable_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.position..self.limit]
    }

    /// Move `position` forward by `count` after a direct fill or drain.
    pub fn advance(&mut self, count: usize) -> Result<(), WindowError> {
        let remaining = self.remaining();
        if count > remaining {
            return Err(WindowError::Overflow {
                requested: count,
                remaining,
            });
        }
        self.position += count;
        Ok(())
    }
}

impl fmt::Debug for ByteWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteWindow")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.buf.len())
            .field("mark", &self.mark)
            .finish()
    }
}

/// Per-worker pool of equally sized windows.
///
/// Windows are pre-allocated and handed out by index. The pool tracks which
/// windows are in use via a free list.
pub struct WindowPool {
    /// Window storage.
    windows: Vec<ByteWindow>,
    /// Stack of available window indices (LIFO for cache locality).
    free_list: Vec<usize>,
    /// Capacity of each window.
    window_size: usize,
}

impl WindowPool {
    /// Create a new pool of `count` windows of `size` bytes each.
    pub fn new(count: usize, size: usize) -> Self {
        let mut windows = Vec::with_capacity(count);
        let mut free_list = Vec::with_capacity(count);

        for i in 0..count {
            windows.push(ByteWindow::new(size));
            free_list.push(i);
        }

        Self {
            windows,
            free_list,
            window_size: size,
        }
    }

    /// Take a window from the pool, in fill mode.
    ///
    /// Returns `None` if every window is in use.
    pub fn alloc(&mut self) -> Option<usize> {
        let idx = self.free_list.pop()?;
        self.windows[idx].clear();
        Some(idx)
    }

    /// Return a window to the pool.
    pub fn free(&mut self, idx: usize) {
        debug_assert!(idx < self.windows.len(), "window index out of bounds");
        debug_assert!(!self.free_list.contains(&idx), "window freed twice");
        self.free_list.push(idx);
    }

    /// # Panics
    /// Panics if `idx` is out of bounds.
    pub fn get_mut(&mut self, idx: usize) -> &mut ByteWindow {
        &mut self.windows[idx]
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Total number of windows.
    pub fn capacity(&self) -> usize {
        self.windows.len()
    }

    /// Number of windows not handed out.
    pub fn available(&self) -> usize {
        self.free_list.len()
    }
}
