//! The compute device.
//!
//! [`Device`] wraps one `wgpu` adapter, device and queue. It allocates
//! [`DeviceBuffer`]s, compiles [`Program`]s and is the single queue every
//! kernel and transfer is submitted to. Handles are cheap to clone and all
//! refer to the same device.
//!
//! All submission happens from one thread: the handle is `!Send` on purpose,
//! matching the single-queue, single-issuer execution model.
//!
//! # Example
//! ```no_run
//! use tandem::config::DeviceConfig;
//! use tandem::device::Device;
//!
//! let device = Device::new(&DeviceConfig::default())?;
//! device.log_info();
//! let buf = device.allocate_zeroed_buffer(1024)?;
//! device.await_completion()?;
//! # Ok::<(), tandem::error::DeviceError>(())
//! ```

use std::fmt;
use std::path::Path;
use std::rc::Rc;

use crate::buffer::{Buffer, DeviceBuffer};
use crate::config::{DeviceConfig, PowerPreference};
use crate::error::{BufferError, DeviceError};
use crate::kernel::program::{Defines, Program};

struct Shared {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
    native_clear: bool,
    placeholder: wgpu::Buffer,
}

/// Handle to the compute device and its command queue.
#[derive(Clone)]
pub struct Device {
    shared: Rc<Shared>,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(pref: PowerPreference) -> Self {
        match pref {
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::None => wgpu::PowerPreference::None,
        }
    }
}

impl Device {
    /// Selects an adapter and opens a device with its full limits.
    ///
    /// # Internals
    /// - Uses `pollster::block_on` to wait for the async `wgpu` requests
    /// - Requests the adapter's own limits so large buffers and the widest
    ///   workgroups the hardware supports are available
    pub fn new(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: config.power_preference.into(),
            force_fallback_adapter: config.force_fallback_adapter,
            compatible_surface: None,
        }))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("tandem"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))?;

        let placeholder = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("unbound slot"),
            size: 16,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let info = adapter.get_info();
        let limits = device.limits();
        log::info!("opened {} ({:?}, {:?})", info.name, info.backend, info.device_type);

        Ok(Self {
            shared: Rc::new(Shared {
                device,
                queue,
                info,
                limits,
                native_clear: config.native_clear,
                placeholder,
            }),
        })
    }

    /// Adapter description.
    pub fn info(&self) -> &wgpu::AdapterInfo {
        &self.shared.info
    }

    /// Limits of the opened device.
    pub fn limits(&self) -> &wgpu::Limits {
        &self.shared.limits
    }

    /// Largest number of invocations in one workgroup.
    pub fn max_workgroup_size(&self) -> usize {
        self.shared.limits.max_compute_invocations_per_workgroup as usize
    }

    /// Logs the adapter and the limits that matter for dispatch.
    pub fn log_info(&self) {
        let info = &self.shared.info;
        let limits = &self.shared.limits;
        log::info!("device:   {}", info.name);
        log::info!("vendor:   {:#06x}", info.vendor);
        log::info!("backend:  {:?}", info.backend);
        log::info!("type:     {:?}", info.device_type);
        log::info!("driver:   {} {}", info.driver, info.driver_info);
        log::info!(
            "workgroup: {} invocations, size {}x{}x{}, {} bytes shared",
            limits.max_compute_invocations_per_workgroup,
            limits.max_compute_workgroup_size_x,
            limits.max_compute_workgroup_size_y,
            limits.max_compute_workgroup_size_z,
            limits.max_compute_workgroup_storage_size
        );
        log::info!(
            "buffers:  {} bytes max, {} bytes per storage binding",
            limits.max_buffer_size,
            limits.max_storage_buffer_binding_size
        );
    }

    /// Allocates `len` bytes of device storage.
    ///
    /// The allocation is rounded up to whole 4-byte words; the returned buffer
    /// still reports `len`.
    pub fn allocate_buffer(&self, len: usize) -> Result<DeviceBuffer, DeviceError> {
        let size = (len.max(4) as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let limit = self
            .shared
            .limits
            .max_buffer_size
            .min(self.shared.limits.max_storage_buffer_binding_size as u64);
        if size > limit {
            return Err(DeviceError::AllocationTooLarge {
                requested: size,
                limit,
            });
        }

        let device = &self.shared.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tensor storage"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(DeviceError::Allocation {
                size,
                message: err.to_string(),
            });
        }

        log::debug!("allocated {size} bytes of device storage");
        Ok(DeviceBuffer::owning(self.clone(), buffer, len))
    }

    /// Allocates `len` bytes and zero-fills them.
    pub fn allocate_zeroed_buffer(&self, len: usize) -> Result<DeviceBuffer, DeviceError> {
        let buffer = self.allocate_buffer(len)?;
        buffer.clear_all()?;
        Ok(buffer)
    }

    /// Compiles WGSL `source` with `defines` prepended.
    ///
    /// Compilation errors are captured with a validation error scope and
    /// returned with the compiler's diagnostics.
    pub fn create_program(
        &self,
        label: &str,
        source: &str,
        defines: &Defines,
    ) -> Result<Program, DeviceError> {
        Program::compile(self.clone(), label, source, defines)
    }

    /// Reads and compiles a WGSL file; the label is the file stem.
    pub fn create_program_from_file(
        &self,
        path: impl AsRef<Path>,
        defines: &Defines,
    ) -> Result<Program, DeviceError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| DeviceError::Source {
            path: path.to_path_buf(),
            source,
        })?;
        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.create_program(&label, &source, defines)
    }

    /// Blocks until every previously submitted command has finished.
    pub fn await_completion(&self) -> Result<(), BufferError> {
        self.shared.device.poll(wgpu::PollType::Wait)?;
        Ok(())
    }

    pub(crate) fn raw(&self) -> &wgpu::Device {
        &self.shared.device
    }

    pub(crate) fn queue(&self) -> &wgpu::Queue {
        &self.shared.queue
    }

    pub(crate) fn native_clear(&self) -> bool {
        self.shared.native_clear
    }

    /// Bound to kernel buffer slots a dispatch leaves unused.
    pub(crate) fn placeholder(&self) -> &wgpu::Buffer {
        &self.shared.placeholder
    }

    /// Whether two handles refer to the same opened device.
    pub fn same_device(&self, other: &Device) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.shared.info.name)
            .field("backend", &self.shared.info.backend)
            .finish()
    }
}
