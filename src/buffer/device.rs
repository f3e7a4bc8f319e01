//! Device-resident buffers.
//!
//! A [`DeviceBuffer`] is a byte range inside one `wgpu::Buffer`. Views keep a
//! counted handle to the base allocation plus an absolute offset; kernels bind
//! the whole base buffer and receive the view's element offset as a parameter,
//! so views of any 4-byte alignment can be used as kernel arguments.
//!
//! Device transfers work in whole 4-byte words (`wgpu::COPY_BUFFER_ALIGNMENT`).

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc;

use super::{Buffer, CLEAR_CHUNK_SIZE, check_range};
use crate::device::Device;
use crate::error::BufferError;

lazy_static::lazy_static! {
    /// Source of chunked zero-fills.
    static ref ZEROES: Vec<u8> = vec![0u8; CLEAR_CHUNK_SIZE];
}

pub(crate) struct DeviceAllocation {
    pub(crate) buffer: wgpu::Buffer,
    owner_alive: Cell<bool>,
}

/// Device memory buffer or a view into one.
pub struct DeviceBuffer {
    device: Device,
    alloc: Rc<DeviceAllocation>,
    offset: usize,
    len: usize,
    view: bool,
}

fn check_aligned(what: &str, offset: usize, len: usize) {
    let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
    assert!(
        offset % align == 0 && len % align == 0,
        "device {what} of {len} bytes at offset {offset} is not {align}-byte aligned"
    );
}

impl DeviceBuffer {
    pub(crate) fn owning(device: Device, buffer: wgpu::Buffer, len: usize) -> Self {
        Self {
            device,
            alloc: Rc::new(DeviceAllocation {
                buffer,
                owner_alive: Cell::new(true),
            }),
            offset: 0,
            len,
            view: false,
        }
    }

    pub(crate) fn allocation(&self) -> &Rc<DeviceAllocation> {
        assert!(
            self.alloc.owner_alive.get(),
            "device buffer view used after its owning allocation was dropped"
        );
        &self.alloc
    }

    /// The device this buffer lives on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Absolute byte offset into the base allocation.
    pub fn base_offset(&self) -> usize {
        self.offset
    }

    /// Whether two handles share the same base allocation.
    pub fn shares_storage_with(&self, other: &DeviceBuffer) -> bool {
        Rc::ptr_eq(&self.alloc, &other.alloc)
    }

    /// Offset of the first `f32` of this range within the base allocation.
    pub(crate) fn element_offset(&self) -> u32 {
        assert!(self.offset % 4 == 0, "kernel argument at byte offset {} is not f32-aligned", self.offset);
        let words = self.offset / 4;
        assert!(words <= u32::MAX as usize, "element offset {words} does not fit in u32");
        words as u32
    }

    /// Submits a copy of `len` bytes at `offset` into a staging buffer and
    /// requests its mapping, without waiting.
    ///
    /// The returned [`PendingRead`] completes the transfer.
    pub fn enqueue_read(&self, offset: usize, len: usize) -> PendingRead {
        check_range("read", offset, len, self.len);
        check_aligned("read", offset, len);

        let device = self.device.raw();
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("read-back staging"),
            size: len.max(4) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("read-back"),
        });
        if len > 0 {
            encoder.copy_buffer_to_buffer(
                &self.allocation().buffer,
                (self.offset + offset) as u64,
                &staging,
                0,
                len as u64,
            );
        }
        self.device.queue().submit(Some(encoder.finish()));

        let (sender, receiver) = mpsc::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        PendingRead {
            device: self.device.clone(),
            staging,
            len,
            receiver,
        }
    }

    /// Queues a device-side copy of all of `src` to the start of this buffer.
    ///
    /// Ranges of the same base allocation are copied through a scratch buffer,
    /// since the device cannot copy a buffer onto itself.
    pub fn copy_from(&self, src: &DeviceBuffer) -> Result<(), crate::error::DeviceError> {
        check_range("copy", 0, src.len, self.len);
        check_aligned("copy", 0, src.len);
        if src.len == 0 {
            return Ok(());
        }

        let scratch;
        let (from, from_offset) = if self.shares_storage_with(src) {
            scratch = self.device.allocate_buffer(src.len)?;
            scratch.copy_from(src)?;
            (&scratch.allocation().buffer, 0)
        } else {
            (&src.allocation().buffer, src.offset)
        };

        let mut encoder = self
            .device
            .raw()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("copy") });
        encoder.copy_buffer_to_buffer(
            from,
            from_offset as u64,
            &self.allocation().buffer,
            self.offset as u64,
            src.len as u64,
        );
        self.device.queue().submit(Some(encoder.finish()));
        Ok(())
    }

    /// Reads the whole buffer as `f32`s.
    pub fn read_floats(&self) -> Result<Vec<f32>, BufferError> {
        let mut out = vec![0.0f32; self.len / 4];
        self.read(bytemuck::cast_slice_mut(out.as_mut_slice()), 0)?;
        Ok(out)
    }

    /// Writes `data` as the buffer's leading `f32`s.
    pub fn write_floats(&self, data: &[f32], blocking: bool) -> Result<(), BufferError> {
        self.write(bytemuck::cast_slice(data), 0, blocking)
    }
}

/// A read-back whose copy has been submitted but not yet waited for.
pub struct PendingRead {
    device: Device,
    staging: wgpu::Buffer,
    len: usize,
    receiver: mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>,
}

impl PendingRead {
    /// Number of bytes the read will produce.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the read covers zero bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Blocks until the bytes are available and copies them into `dst`.
    ///
    /// # Panics
    /// If `dst` is not exactly [`len`](Self::len) bytes.
    pub fn wait(self, dst: &mut [u8]) -> Result<(), BufferError> {
        assert_eq!(dst.len(), self.len, "read-back destination has the wrong size");
        self.device.await_completion()?;
        self.receiver.recv().map_err(|_| BufferError::MapAbandoned)??;
        {
            let mapped = self.staging.slice(..).get_mapped_range();
            dst.copy_from_slice(&mapped[..self.len]);
        }
        self.staging.unmap();
        Ok(())
    }
}

impl Buffer for DeviceBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn is_view(&self) -> bool {
        self.view
    }

    fn read(&self, dst: &mut [u8], offset: usize) -> Result<(), BufferError> {
        self.enqueue_read(offset, dst.len()).wait(dst)
    }

    fn write(&self, src: &[u8], offset: usize, blocking: bool) -> Result<(), BufferError> {
        check_range("write", offset, src.len(), self.len);
        check_aligned("write", offset, src.len());
        if !src.is_empty() {
            self.device.queue().write_buffer(
                &self.allocation().buffer,
                (self.offset + offset) as u64,
                src,
            );
        }
        if blocking {
            self.device.queue().submit(std::iter::empty());
            self.device.await_completion()?;
        }
        Ok(())
    }

    fn clear(&self, offset: usize, length: usize) -> Result<(), BufferError> {
        check_range("clear", offset, length, self.len);
        check_aligned("clear", offset, length);
        let buffer = &self.allocation().buffer;
        let start = (self.offset + offset) as u64;

        if self.device.native_clear() {
            let mut encoder = self
                .device
                .raw()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("clear") });
            encoder.clear_buffer(buffer, start, Some(length as u64));
            self.device.queue().submit(Some(encoder.finish()));
            return Ok(());
        }

        let mut done = 0;
        while done < length {
            let chunk = (length - done).min(CLEAR_CHUNK_SIZE);
            self.device
                .queue()
                .write_buffer(buffer, start + done as u64, &ZEROES[..chunk]);
            done += chunk;
        }
        Ok(())
    }

    fn new_view(&self, offset: usize, size: usize) -> Self {
        check_range("view", offset, size, self.len);
        Self {
            device: self.device.clone(),
            alloc: Rc::clone(self.allocation()),
            offset: self.offset + offset,
            len: size,
            view: true,
        }
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if !self.view {
            self.alloc.owner_alive.set(false);
            self.alloc.buffer.destroy();
        }
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("view", &self.view)
            .finish()
    }
}
