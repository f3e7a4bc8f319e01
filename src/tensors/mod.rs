//! Tensors on both backends.
//!
//! A tensor pairs a [`Shape`] with a buffer holding its elements in row-major
//! order. [`HostTensor`] lives in host memory; [`DeviceTensor`] lives on the
//! compute device (requires the `wgpu` feature). Both share one view model:
//!
//! - an *owning* tensor allocates its buffer and owns it outright;
//! - a *reshape-view* ([`HostTensor::new_view`]) reinterprets the same
//!   elements under a different shape with the same element count;
//! - a *sub-tensor* ([`HostTensor::sub_tensor`]) aliases one slice along the
//!   leading axis and has rank one lower.
//!
//! Sub-tensors are memoized per index for the parent's lifetime, so repeated
//! access yields the same view and in-place writes through it are visible in
//! the parent. Views cannot be reshaped and reject assignment from a tensor of
//! another shape. Views must not outlive the owning tensor; a surviving
//! reshape-view panics on first use once its owner is dropped.
//!
//! # Example
//! ```rust
//! use tandem::tensor;
//!
//! let mut t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
//! t.sub_tensor_mut(1).set(&[0], 30.0);
//! assert_eq!(t.get(&[1, 0]), 30.0);
//! ```

mod host;
mod operators;
#[cfg(feature = "wgpu")]
mod device;

pub use host::{HostTensor, Iter};
#[cfg(feature = "wgpu")]
pub use device::DeviceTensor;

use crate::backend::Backend;
use crate::shape::Shape;

/// Shape accessors shared by every tensor type.
pub trait Shaped {
    /// Backend the tensor's storage lives on.
    const BACKEND: Backend;

    fn shape(&self) -> &Shape;

    /// Whether the tensor aliases storage owned by another tensor.
    fn is_view(&self) -> bool;

    /// Number of elements.
    fn size(&self) -> usize {
        self.shape().total_element_count()
    }

    fn rank(&self) -> usize {
        self.shape().rank()
    }
}

/// Byte range of sub-tensor `index` of a tensor shaped `shape`.
pub(crate) fn sub_tensor_range(shape: &Shape, index: usize) -> (Shape, usize, usize) {
    let element = shape.element_shape();
    assert!(
        index < shape[0],
        "sub-tensor index {index} out of range for {shape}"
    );
    let len = element.total_element_count() * size_of::<f32>();
    (element, index * len, len)
}

/// Memoized sub-tensor slots for a tensor of `shape`.
pub(crate) fn view_slots<T>(shape: &Shape) -> Vec<std::cell::OnceCell<T>> {
    let count = if shape.rank() > 1 { shape[0] } else { 0 };
    (0..count).map(|_| std::cell::OnceCell::new()).collect()
}

/// Builds a [`HostTensor`] from nested literal arrays.
///
/// Rows must be uniform in shape.
///
/// # Example
/// ```
/// use tandem::tensor;
/// use tandem::tensors::Shaped;
/// let t = tensor!([[1.0, -2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape().dims(), &[2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($($t:tt)+) => {{
        let (dims, data) = $crate::__tensor_parts!($($t)+);
        $crate::tensors::HostTensor::from_vec(dims, data)
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __tensor_parts {
    ([ $( [ $($inner:tt)* ] ),+ $(,)? ]) => {{
        let children: Vec<(Vec<usize>, Vec<f32>)> =
            vec![ $( $crate::__tensor_parts!([ $($inner)* ]) ),+ ];
        let first = children[0].0.clone();
        assert!(children.iter().all(|c| c.0 == first),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut dims = vec![children.len()];
        dims.extend_from_slice(&first);
        let mut data = Vec::with_capacity(children.len() * children[0].1.len());
        for c in children { data.extend(c.1); }
        (dims, data)
    }};
    ([ $( $e:expr ),+ $(,)? ]) => {{
        let data: Vec<f32> = vec![ $( ($e) as f32 ),+ ];
        (vec![data.len()], data)
    }};
}
