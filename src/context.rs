//! The compute context: one device plus its loaded kernels.
//!
//! [`ComputeContext::init`] is the device-side entry point. It opens the
//! device, loads every registry kernel and hands back a shared handle that
//! every device tensor keeps a reference to. Call it once per process, before
//! creating device tensors.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::buffer::DeviceBuffer;
use crate::config::DeviceConfig;
use crate::device::Device;
use crate::error::DeviceError;
use crate::kernel::manager::KernelManager;

/// A device and the kernels compiled for it.
#[derive(Debug)]
pub struct ComputeContext {
    device: Device,
    kernels: KernelManager,
    scratch: RefCell<HashMap<usize, Rc<DeviceBuffer>>>,
}

impl ComputeContext {
    /// Opens the device described by `config` and loads the kernel registry.
    pub fn init(config: &DeviceConfig) -> Result<Rc<Self>, DeviceError> {
        let device = Device::new(config)?;
        device.log_info();
        let kernels = KernelManager::load(&device, &config.kernel_source)?;
        Ok(Rc::new(Self {
            device,
            kernels,
            scratch: RefCell::new(HashMap::new()),
        }))
    }

    /// Like [`init`](Self::init) with [`DeviceConfig::from_env`].
    pub fn from_env() -> Result<Rc<Self>, DeviceError> {
        Self::init(&DeviceConfig::from_env())
    }

    /// The opened device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Kernels compiled for [`device`](Self::device).
    pub fn kernels(&self) -> &KernelManager {
        &self.kernels
    }

    /// Intermediate storage of exactly `len` bytes, allocated on first request
    /// and reused by every later request of the same size.
    ///
    /// Operations write a scratch buffer and consume it within the same call.
    /// Queue order keeps a later operation's writes behind an earlier one's
    /// reads, so callers never hold on to the contents.
    pub fn scratch(&self, len: usize) -> Result<Rc<DeviceBuffer>, DeviceError> {
        if let Some(buffer) = self.scratch.borrow().get(&len) {
            return Ok(Rc::clone(buffer));
        }
        let buffer = Rc::new(self.device.allocate_buffer(len)?);
        log::debug!("cached a {len}-byte scratch buffer");
        self.scratch.borrow_mut().insert(len, Rc::clone(&buffer));
        Ok(buffer)
    }

    /// Number of distinct scratch sizes allocated so far.
    pub fn scratch_count(&self) -> usize {
        self.scratch.borrow().len()
    }
}
