//! tandem: a dual-backend tensor engine.
//!
//! Tensors live either in host memory ([`HostTensor`](tensors::HostTensor)) or
//! on a compute device driven through `wgpu`
//! ([`DeviceTensor`](tensors::DeviceTensor)). Both expose the same contract:
//! a [`Shape`](shape::Shape) over a buffer, aliasing sub-tensor and reshape
//! views, and the free functions of [`ops`], which run as parallel host loops
//! or as device kernels depending on the tensor type.
//!
//! # Features
//!
//! - `wgpu` (default): the device backend. Without it the crate is host-only.
//! - `unchecked-shapes`: compiles shape and rank assertions out.
//!
//! # Modules
//!
//! - [`shape`]: tensor extents.
//! - [`buffer`]: host and device storage with aliasing views.
//! - [`tensors`]: host and device tensors and the [`tensor!`] literal macro.
//! - [`ops`]: elementwise, reduction, linear-algebra and spatial operations.
//! - [`kernel`]: programs, kernels, work partitioning and the kernel cache.
//! - [`init`]: weight initializers.
//!
//! # Example
//!
//! ```rust
//! use tandem::{ops, tensor};
//! use tandem::tensors::HostTensor;
//!
//! let m = tensor!([[1.0, 2.0], [3.0, 4.0]]);
//! let v = tensor!([1.0, 1.0]);
//! let mut out = HostTensor::new([2]);
//! ops::matvecmul(&m, &v, &mut out).unwrap();
//! assert_eq!(out.to_vec(), vec![3.0, 7.0]);
//! ```
//!
//! On the device, every tensor is created against one [`ComputeContext`](context::ComputeContext):
//!
//! ```no_run
//! use tandem::config::DeviceConfig;
//! use tandem::context::ComputeContext;
//! use tandem::{ops, tensor};
//!
//! # fn main() -> Result<(), tandem::error::DeviceError> {
//! let ctx = ComputeContext::init(&DeviceConfig::from_env())?;
//! let a = tensor!([1.0, 2.0, 3.0]).to_device(&ctx)?;
//! let mut out = a.try_clone()?;
//! ops::relu(&a, &mut out)?;
//! println!("{}", out.to_host()?);
//! # Ok(())
//! # }
//! ```

pub mod approx;
pub mod backend;
pub mod buffer;
pub mod config;
#[cfg(feature = "wgpu")]
pub mod context;
#[cfg(feature = "wgpu")]
pub mod device;
pub mod error;
pub mod init;
pub mod kernel;
pub mod ops;
pub mod shape;
pub mod tensors;

pub use shape::Shape;
pub use tensors::{HostTensor, Shaped};
#[cfg(feature = "wgpu")]
pub use tensors::DeviceTensor;
