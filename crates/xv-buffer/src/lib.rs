//! RWX instruction buffer with a throw-away reallocation strategy.
//!
//! Grounded on `examples/original_source/build/xv-x64.c`'s
//! `xv_x64_reallocate_ibuffer` (page-rounded `mmap` with
//! `PROT_READ|PROT_WRITE|PROT_EXEC`, freeing the previous mapping first) and
//! on `bytecodealliance-wasmtime`'s `cranelift-jit`, which backs its code
//! buffer with the same `region` crate used here instead of hand-rolled
//! `libc::mmap` calls.
//!
//! Instructions change size as they move (a short jump may need to become a
//! near jump once its target moves far enough away), so there is no way to
//! reuse a partially-filled buffer after a resize: every [`reallocate`]
//! throws the old allocation away and callers must restart the rewrite of
//! everything written so far.
//!
//! [`reallocate`]: InstructionBuffer::reallocate

use region::{Allocation, Protection};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BufferError {
    /// The host `mmap`/`mprotect`/`munmap` call failed.
    #[error("host memory operation failed: {0}")]
    Host(#[from] region::Error),

    /// The destination buffer doesn't have room for the requested write.
    #[error("instruction buffer is full ({len} of {capacity} bytes used)")]
    Full { len: usize, capacity: usize },
}

/// A page-aligned RWX allocation that instructions are written into
/// sequentially, plus the bookkeeping needed to compute `%rip` for whatever
/// has been written so far.
pub struct InstructionBuffer {
    allocation: Option<Allocation>,
    /// Logical address of byte 0 of this buffer — not a real `%rip` offset,
    /// just where the corresponding original code would have lived.
    logical_start: u64,
    /// Number of bytes written so far.
    cursor: usize,
}

impl InstructionBuffer {
    /// An empty buffer with no backing allocation; use [`reallocate`] to
    /// size it before writing.
    ///
    /// [`reallocate`]: InstructionBuffer::reallocate
    pub fn empty(logical_start: u64) -> Self {
        InstructionBuffer {
            allocation: None,
            logical_start,
            cursor: 0,
        }
    }

    pub fn with_capacity(logical_start: u64, size: usize) -> Result<Self, BufferError> {
        let mut buf = Self::empty(logical_start);
        buf.reallocate(size)?;
        Ok(buf)
    }

    /// Free the current allocation (if any) and acquire a fresh RWX mapping
    /// of at least `size` bytes, resetting the write cursor to zero.
    ///
    /// Every pointer or offset computed against the previous allocation is
    /// invalidated by this call — the caller must discard and restart
    /// whatever it was encoding into this buffer.
    pub fn reallocate(&mut self, size: usize) -> Result<(), BufferError> {
        self.allocation = None; // drop frees via munmap
        if size == 0 {
            self.cursor = 0;
            return Ok(());
        }

        log::debug!("xv-buffer: reallocating to {size} bytes");
        let allocation = region::alloc(size, Protection::READ_WRITE_EXECUTE).map_err(|e| {
            log::warn!("xv-buffer: host allocation of {size} bytes failed: {e}");
            BufferError::Host(e)
        })?;
        self.allocation = Some(allocation);
        self.cursor = 0;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.allocation.as_ref().map_or(0, |a| a.len())
    }

    pub fn len(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Logical `%rip` of the next instruction to be written: the logical
    /// start of this buffer plus however many bytes have already been
    /// written into it.
    pub fn logical_rip(&self) -> u64 {
        self.logical_start + self.cursor as u64
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.allocation {
            Some(a) => unsafe { std::slice::from_raw_parts(a.as_ptr::<u8>(), self.cursor) },
            None => &[],
        }
    }

    /// Append `bytes` at the write cursor, advancing it.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let capacity = self.capacity();
        if self.cursor + bytes.len() > capacity {
            return Err(BufferError::Full {
                len: self.cursor,
                capacity,
            });
        }
        let allocation = self.allocation.as_mut().expect("capacity() > 0 implies Some");
        let dst = unsafe {
            std::slice::from_raw_parts_mut(allocation.as_mut_ptr::<u8>(), capacity)
        };
        dst[self.cursor..self.cursor + bytes.len()].copy_from_slice(bytes);
        self.cursor += bytes.len();
        Ok(())
    }
}
