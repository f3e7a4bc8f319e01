//! Host-resident buffers.
//!
//! Storage is a word-aligned `Vec<f32>` behind a `RefCell`, exposed as bytes
//! through [`bytemuck`] for the [`Buffer`] contract and as `f32` slices for
//! tensor code. Overlapping mutable access through two views is caught by the
//! `RefCell` and panics instead of racing.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use super::{Buffer, check_range};
use crate::error::BufferError;

const WORD: usize = std::mem::size_of::<f32>();

struct Allocation {
    data: RefCell<Vec<f32>>,
    owner_alive: Cell<bool>,
}

/// Host memory buffer or a view into one.
pub struct HostBuffer {
    alloc: Rc<Allocation>,
    offset: usize,
    len: usize,
    view: bool,
}

impl HostBuffer {
    /// Allocates `len` zeroed bytes.
    pub fn allocate(len: usize) -> Self {
        Self::owning(vec![0.0; len.div_ceil(WORD)], len)
    }

    /// Takes ownership of `data` as the backing storage.
    pub fn from_floats(data: Vec<f32>) -> Self {
        let len = data.len() * WORD;
        Self::owning(data, len)
    }

    fn owning(data: Vec<f32>, len: usize) -> Self {
        Self {
            alloc: Rc::new(Allocation {
                data: RefCell::new(data),
                owner_alive: Cell::new(true),
            }),
            offset: 0,
            len,
            view: false,
        }
    }

    fn allocation(&self) -> &Allocation {
        assert!(
            self.alloc.owner_alive.get(),
            "host buffer view used after its owning allocation was dropped"
        );
        &self.alloc
    }

    fn word_range(&self) -> std::ops::Range<usize> {
        assert!(
            self.offset % WORD == 0 && self.len % WORD == 0,
            "buffer range {}..{} is not f32-aligned",
            self.offset,
            self.offset + self.len
        );
        self.offset / WORD..(self.offset + self.len) / WORD
    }

    /// The buffer's contents as `f32`s.
    ///
    /// # Panics
    /// If the range is not 4-byte aligned, or the storage is mutably borrowed.
    pub fn floats(&self) -> Ref<'_, [f32]> {
        let range = self.word_range();
        Ref::map(self.allocation().data.borrow(), |v| &v[range])
    }

    /// Mutable access to the buffer's contents as `f32`s.
    ///
    /// # Panics
    /// If the range is not 4-byte aligned, or the storage is already borrowed.
    pub fn floats_mut(&self) -> RefMut<'_, [f32]> {
        let range = self.word_range();
        RefMut::map(self.allocation().data.borrow_mut(), |v| &mut v[range])
    }

    /// Whether two handles share the same base allocation.
    pub fn shares_storage_with(&self, other: &HostBuffer) -> bool {
        Rc::ptr_eq(&self.alloc, &other.alloc)
    }

    /// Absolute byte offset into the base allocation.
    pub fn base_offset(&self) -> usize {
        self.offset
    }
}

impl Buffer for HostBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn is_view(&self) -> bool {
        self.view
    }

    fn read(&self, dst: &mut [u8], offset: usize) -> Result<(), BufferError> {
        check_range("read", offset, dst.len(), self.len);
        let data = self.allocation().data.borrow();
        let bytes: &[u8] = bytemuck::cast_slice(data.as_slice());
        let start = self.offset + offset;
        dst.copy_from_slice(&bytes[start..start + dst.len()]);
        Ok(())
    }

    fn write(&self, src: &[u8], offset: usize, _blocking: bool) -> Result<(), BufferError> {
        check_range("write", offset, src.len(), self.len);
        let mut data = self.allocation().data.borrow_mut();
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(data.as_mut_slice());
        let start = self.offset + offset;
        bytes[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn clear(&self, offset: usize, length: usize) -> Result<(), BufferError> {
        check_range("clear", offset, length, self.len);
        let mut data = self.allocation().data.borrow_mut();
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(data.as_mut_slice());
        let start = self.offset + offset;
        bytes[start..start + length].fill(0);
        Ok(())
    }

    fn new_view(&self, offset: usize, size: usize) -> Self {
        check_range("view", offset, size, self.len);
        self.allocation();
        Self {
            alloc: Rc::clone(&self.alloc),
            offset: self.offset + offset,
            len: size,
            view: true,
        }
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        if !self.view {
            self.alloc.owner_alive.set(false);
        }
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("view", &self.view)
            .finish()
    }
}
