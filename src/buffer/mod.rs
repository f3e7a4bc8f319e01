//! Byte-addressable storage for both backends.
//!
//! A buffer is a fixed-size byte range. Owning buffers come from an
//! allocation; [`Buffer::new_view`] hands out further handles onto a sub-range
//! of the same storage without copying.
//!
//! # Views
//!
//! Every view records the *base* allocation and an absolute byte offset into
//! it, never its immediate parent, so a view of a view stays valid after the
//! intermediate handle is dropped.
//!
//! Views must not outlive the owning buffer. The owner marks its allocation
//! dead when dropped and any later access through a surviving view panics.
//!
//! # Synchronization
//!
//! Reads always complete before returning. Writes may be queued
//! (`blocking = false`); queued device writes are ordered before any work
//! submitted afterwards.

pub mod host;
#[cfg(feature = "wgpu")]
pub mod device;

pub use host::HostBuffer;
#[cfg(feature = "wgpu")]
pub use device::{DeviceBuffer, PendingRead};

use crate::error::BufferError;

/// Granularity of chunked zero-fills.
pub const CLEAR_CHUNK_SIZE: usize = 1 << 20;

/// Contract shared by host and device storage.
pub trait Buffer: Sized {
    /// Size in bytes.
    fn len(&self) -> usize;

    /// Whether the buffer spans zero bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this handle aliases storage owned by another buffer.
    fn is_view(&self) -> bool;

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    ///
    /// # Panics
    /// If the range exceeds the buffer.
    fn read(&self, dst: &mut [u8], offset: usize) -> Result<(), BufferError>;

    /// Copies `src` into the buffer at `offset`; with `blocking` the call
    /// returns only once the bytes have landed.
    ///
    /// # Panics
    /// If the range exceeds the buffer.
    fn write(&self, src: &[u8], offset: usize, blocking: bool) -> Result<(), BufferError>;

    /// Zero-fills `length` bytes starting at `offset`.
    ///
    /// # Panics
    /// If the range exceeds the buffer.
    fn clear(&self, offset: usize, length: usize) -> Result<(), BufferError>;

    /// Zero-fills the whole buffer.
    fn clear_all(&self) -> Result<(), BufferError> {
        self.clear(0, self.len())
    }

    /// A handle onto `size` bytes starting at `offset`, sharing storage.
    ///
    /// # Panics
    /// If the range exceeds the buffer.
    fn new_view(&self, offset: usize, size: usize) -> Self;
}

/// Panics unless `offset..offset + len` fits in `size` bytes.
pub(crate) fn check_range(what: &str, offset: usize, len: usize, size: usize) {
    assert!(
        offset.checked_add(len).is_some_and(|end| end <= size),
        "{what} of {len} bytes at offset {offset} exceeds a buffer of {size} bytes"
    );
}
