//! Device-resident tensors.
//!
//! [`DeviceTensor`] mirrors [`HostTensor`](super::HostTensor): the same
//! memoized sub-tensors, reshape-views and assignment rules, over a
//! [`DeviceBuffer`] owned by one [`ComputeContext`]. Operations on it are
//! queued on the device; reads back to the host wait for them.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use super::{HostTensor, Shaped, sub_tensor_range, view_slots};
use crate::backend::Backend;
use crate::buffer::{Buffer, DeviceBuffer};
use crate::context::ComputeContext;
use crate::error::DeviceError;
use crate::shape::{Shape, shape_assert_eq};

/// A tensor in device memory.
///
/// Device tensors support the same view model as [`HostTensor`]. Element
/// access goes through explicit transfers ([`to_host`](Self::to_host),
/// [`to_vec`](Self::to_vec)); every transfer back blocks until the queued
/// work producing the data has finished.
pub struct DeviceTensor {
    context: Rc<ComputeContext>,
    shape: Shape,
    buffer: DeviceBuffer,
    views: Vec<OnceCell<DeviceTensor>>,
}

impl DeviceTensor {
    /// A zero-filled owning tensor.
    pub fn new(context: &Rc<ComputeContext>, shape: impl Into<Shape>) -> Result<Self, DeviceError> {
        let shape = shape.into();
        let buffer = context
            .device()
            .allocate_zeroed_buffer(shape.total_element_count() * size_of::<f32>())?;
        Ok(Self::wrap(Rc::clone(context), shape, buffer))
    }

    /// An owning tensor initialized from `data`, in row-major order.
    ///
    /// # Panics
    /// If `data` does not hold exactly one value per element.
    pub fn from_slice(
        context: &Rc<ComputeContext>,
        shape: impl Into<Shape>,
        data: &[f32],
    ) -> Result<Self, DeviceError> {
        let shape = shape.into();
        assert_eq!(
            shape.total_element_count(),
            data.len(),
            "{shape} is incompatible with {} data elements",
            data.len()
        );
        let buffer = context.device().allocate_buffer(data.len() * size_of::<f32>())?;
        buffer.write_floats(data, false)?;
        Ok(Self::wrap(Rc::clone(context), shape, buffer))
    }

    /// Copies a host tensor to the device.
    pub fn from_host(context: &Rc<ComputeContext>, host: &HostTensor) -> Result<Self, DeviceError> {
        Self::from_slice(context, host.shape().clone(), &host.data())
    }

    fn wrap(context: Rc<ComputeContext>, shape: Shape, buffer: DeviceBuffer) -> Self {
        let views = view_slots(&shape);
        Self {
            context,
            shape,
            buffer,
            views,
        }
    }

    /// The context this tensor was created in.
    pub fn context(&self) -> &Rc<ComputeContext> {
        &self.context
    }

    /// Storage backing this tensor.
    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    /// Copies the elements back into a new owning host tensor.
    pub fn to_host(&self) -> Result<HostTensor, DeviceError> {
        Ok(HostTensor::from_vec(self.shape.clone(), self.to_vec()?))
    }

    /// Copies the elements back, row-major.
    pub fn to_vec(&self) -> Result<Vec<f32>, DeviceError> {
        Ok(self.buffer.read_floats()?)
    }

    /// Sets every element to zero.
    pub fn clear(&mut self) -> Result<(), DeviceError> {
        self.buffer.clear_all()?;
        Ok(())
    }

    /// Memoized view of slice `index` along the leading axis.
    ///
    /// # Panics
    /// If the rank is below 2 or `index` is out of range.
    pub fn sub_tensor(&self, index: usize) -> &DeviceTensor {
        let (shape, offset, len) = sub_tensor_range(&self.shape, index);
        self.views[index].get_or_init(|| {
            Self::wrap(
                Rc::clone(&self.context),
                shape,
                self.buffer.new_view(offset, len),
            )
        })
    }

    /// Mutable access to the memoized view of slice `index`.
    pub fn sub_tensor_mut(&mut self, index: usize) -> &mut DeviceTensor {
        self.sub_tensor(index);
        self.views[index]
            .get_mut()
            .expect("sub-tensor memoized by the call above")
    }

    /// A view of the same elements under `shape`.
    ///
    /// # Panics
    /// If the element counts differ.
    pub fn new_view(&self, shape: impl Into<Shape>) -> DeviceTensor {
        let shape = shape.into();
        shape_assert_eq!(
            shape.total_element_count(),
            self.size(),
            "cannot view {} as {shape}",
            self.shape
        );
        Self::wrap(
            Rc::clone(&self.context),
            shape,
            self.buffer.new_view(0, self.buffer.len()),
        )
    }

    /// Replaces the shape, keeping the elements. Memoized sub-tensors are
    /// discarded.
    ///
    /// # Panics
    /// If this tensor is a view or the element counts differ.
    pub fn reshape(&mut self, shape: impl Into<Shape>) {
        let shape = shape.into();
        assert!(!self.is_view(), "cannot reshape a view");
        shape_assert_eq!(
            shape.total_element_count(),
            self.size(),
            "cannot reshape {} to {shape}",
            self.shape
        );
        self.views = view_slots(&shape);
        self.shape = shape;
    }

    /// Copies `other`'s elements into this tensor on the device.
    ///
    /// Follows [`HostTensor::assign`]: owning tensors take `other`'s shape,
    /// views must already match it.
    pub fn assign(&mut self, other: &DeviceTensor) -> Result<(), DeviceError> {
        if self.is_view() {
            shape_assert_eq!(
                self.shape,
                other.shape,
                "cannot assign a {} tensor to a view shaped {}",
                other.shape,
                self.shape
            );
        } else if self.shape != other.shape {
            if self.size() == other.size() {
                self.reshape(other.shape.clone());
            } else {
                *self = DeviceTensor::new(&self.context, other.shape.clone())?;
            }
        }
        self.buffer.copy_from(&other.buffer)
    }

    /// A deep copy into a new owning tensor.
    pub fn try_clone(&self) -> Result<DeviceTensor, DeviceError> {
        let buffer = self.context.device().allocate_buffer(self.buffer.len())?;
        buffer.copy_from(&self.buffer)?;
        Ok(Self::wrap(
            Rc::clone(&self.context),
            self.shape.clone(),
            buffer,
        ))
    }
}

impl Shaped for DeviceTensor {
    const BACKEND: Backend = Backend::Device;

    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn is_view(&self) -> bool {
        self.buffer.is_view()
    }
}

impl HostTensor {
    /// Copies this tensor to the device.
    pub fn to_device(&self, context: &Rc<ComputeContext>) -> Result<DeviceTensor, DeviceError> {
        DeviceTensor::from_host(context, self)
    }
}

impl fmt::Debug for DeviceTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceTensor")
            .field("shape", &self.shape)
            .field("buffer", &self.buffer)
            .finish()
    }
}
