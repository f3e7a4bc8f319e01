//! Error types.
//!
//! Shape and index mistakes are programmer errors and panic where they are
//! detected. Everything in this module is a resource or compilation failure that
//! the immediate caller has to propagate.

use thiserror::Error;

#[cfg(feature = "wgpu")]
use std::path::PathBuf;

/// Failure while moving bytes between a buffer and host memory.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Mapping the staging buffer for a read-back failed.
    #[cfg(feature = "wgpu")]
    #[error("mapping a staging buffer failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    /// Waiting for the device queue failed.
    #[cfg(feature = "wgpu")]
    #[error("waiting for the device queue failed: {0}")]
    Poll(#[from] wgpu::PollError),
    /// The map callback was dropped without reporting a result.
    #[error("the read-back completed without reporting a result")]
    MapAbandoned,
}

/// Failure while creating or driving the compute device.
#[cfg(feature = "wgpu")]
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No adapter matched the requested options.
    #[error("adapter request failed: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    /// The adapter refused to open a device.
    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    /// The requested allocation is larger than the device allows.
    #[error("allocation of {requested} bytes exceeds the device limit of {limit} bytes")]
    AllocationTooLarge {
        /// Requested size in bytes.
        requested: u64,
        /// Largest bindable buffer on this device.
        limit: u64,
    },
    /// The device reported an error while allocating.
    #[error("allocation of {size} bytes failed: {message}")]
    Allocation {
        /// Requested size in bytes.
        size: u64,
        /// Device error text.
        message: String,
    },
    /// Program source failed to compile.
    #[error("failed to build program `{label}`:\n{log}")]
    Compile {
        /// Program label.
        label: String,
        /// Compiler diagnostics.
        log: String,
    },
    /// A compute pipeline could not be created for an entry point.
    #[error("failed to create kernel `{entry}` from program `{program}`: {message}")]
    Kernel {
        /// Program label.
        program: String,
        /// Entry point name.
        entry: String,
        /// Device error text.
        message: String,
    },
    /// The entry point does not declare a literal `@workgroup_size`.
    #[error("entry point `{entry}` in program `{program}` has no literal @workgroup_size")]
    MissingWorkgroupSize {
        /// Program label.
        program: String,
        /// Entry point name.
        entry: String,
    },
    /// A kernel source file could not be read.
    #[error("cannot read kernel source {path}: {source}")]
    Source {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Convolution kernels must have odd extents within the supported maximum.
    #[error("unsupported convolution kernel {width}x{height}: extents must be odd and at most {max}")]
    UnsupportedKernelExtent {
        /// Kernel width.
        width: usize,
        /// Kernel height.
        height: usize,
        /// Largest supported extent.
        max: usize,
    },
    /// A transfer failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Invalid initializer parameters.
#[derive(Debug, Error)]
pub enum InitError {
    /// Mean or standard deviation rejected by the normal distribution.
    #[error("invalid normal distribution: {0}")]
    Normal(#[from] rand_distr::NormalError),
    /// Glorot scaling needs at least one input.
    #[error("glorot initialization requires a non-zero fan-in")]
    ZeroFanIn,
}
