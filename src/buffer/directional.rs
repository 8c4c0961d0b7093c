//! One-direction byte buffer backed by a pool block.
//!
//! Invariant: index 0 is the oldest unread byte and `len` marks the first
//! free byte. Reads fill from `len` forward; writes drain from 0 and compact
//! the remaining unread bytes to the front.

use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use thiserror::Error;

use crate::buffer::pool::{Block, BufferPool};

/// Errors from buffer operations that do not involve a socket.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("append of {requested} bytes exceeds remaining capacity {remaining}")]
    Overflow { requested: usize, remaining: usize },
}

/// Result of a single [`DirectionalBuffer::read_from`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Bytes were read into the buffer. Zero when the buffer was full.
    Read(usize),
    /// The peer cleanly ended its output.
    Eof,
}

/// A fixed-capacity buffer for one direction of a proxied pair.
#[derive(Debug)]
pub struct DirectionalBuffer {
    block: Option<Block>,
    len: usize,
    pool: Arc<BufferPool>,
}

impl DirectionalBuffer {
    /// Take a block from `pool`.
    pub fn new(pool: Arc<BufferPool>) -> Self {
        let block = pool.take();
        Self {
            block: Some(block),
            len: 0,
            pool,
        }
    }

    /// Read once from `reader` into the free space.
    ///
    /// `WouldBlock` and other I/O errors are returned to the caller untouched.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> io::Result<ReadStatus> {
        let len = self.len;
        let Some(block) = self.block.as_mut() else {
            return Ok(ReadStatus::Read(0));
        };
        let free = &mut block.as_mut_slice()[len..];
        if free.is_empty() {
            return Ok(ReadStatus::Read(0));
        }
        match reader.read(free)? {
            0 => Ok(ReadStatus::Eof),
            n => {
                self.len += n;
                Ok(ReadStatus::Read(n))
            }
        }
    }

    /// Write once from the unread bytes into `writer`, then compact.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        if self.len == 0 {
            return Ok(0);
        }
        let Some(block) = self.block.as_ref() else {
            return Ok(0);
        };
        let written = writer.write(&block.as_slice()[..self.len])?;
        self.discard(written);
        Ok(written)
    }

    /// Append `bytes` after the unread data.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let remaining = self.remaining();
        if bytes.len() > remaining {
            return Err(BufferError::Overflow {
                requested: bytes.len(),
                remaining,
            });
        }
        if let Some(block) = self.block.as_mut() {
            block.as_mut_slice()[self.len..self.len + bytes.len()].copy_from_slice(bytes);
            self.len += bytes.len();
        }
        Ok(())
    }

    /// Drop the `n` oldest unread bytes, moving the rest to the front.
    pub fn discard(&mut self, n: usize) {
        let n = n.min(self.len);
        if n == 0 {
            return;
        }
        if let Some(block) = self.block.as_mut() {
            block.as_mut_slice().copy_within(n..self.len, 0);
        }
        self.len -= n;
    }

    /// A cursor over the unread bytes. Reading it leaves the buffer untouched.
    pub fn view_reader(&self) -> Cursor<&[u8]> {
        let unread = match self.block.as_ref() {
            Some(block) => &block.as_slice()[..self.len],
            None => &[],
        };
        Cursor::new(unread)
    }

    /// Number of unread bytes.
    pub fn size(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    pub fn capacity(&self) -> usize {
        self.block.as_ref().map_or(0, Block::len)
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Give the block back to the pool. Later calls do nothing.
    pub fn release(&mut self) {
        if let Some(block) = self.block.take() {
            self.len = 0;
            self.pool.release(block);
        }
    }

    pub fn is_released(&self) -> bool {
        self.block.is_none()
    }
}

impl Drop for DirectionalBuffer {
    fn drop(&mut self) {
        self.release();
    }
}
