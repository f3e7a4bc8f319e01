//! Host-resident tensors.

use std::cell::{OnceCell, Ref, RefMut};
use std::fmt;
use std::ops::{Index, IndexMut};

use super::{Shaped, sub_tensor_range, view_slots};
use crate::approx::RelativeEq;
use crate::backend::Backend;
use crate::buffer::{Buffer, HostBuffer};
use crate::shape::{Shape, shape_assert_eq};

/// A tensor in host memory.
pub struct HostTensor {
    shape: Shape,
    buffer: HostBuffer,
    views: Vec<OnceCell<HostTensor>>,
}

impl HostTensor {
    /// A zero-filled owning tensor.
    pub fn new(shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let buffer = HostBuffer::allocate(shape.total_element_count() * size_of::<f32>());
        Self::wrap(shape, buffer)
    }

    /// An owning tensor over `data`, in row-major order.
    ///
    /// # Panics
    /// If `data` does not hold exactly one value per element.
    pub fn from_vec(shape: impl Into<Shape>, data: Vec<f32>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.total_element_count(),
            data.len(),
            "{shape} is incompatible with {} data elements",
            data.len()
        );
        Self::wrap(shape, HostBuffer::from_floats(data))
    }

    /// An owning tensor filled by calling `generator` once per element, in
    /// row-major order.
    pub fn with_generator(shape: impl Into<Shape>, mut generator: impl FnMut() -> f32) -> Self {
        let shape = shape.into();
        let data = (0..shape.total_element_count()).map(|_| generator()).collect();
        Self::wrap(shape, HostBuffer::from_floats(data))
    }

    fn wrap(shape: Shape, buffer: HostBuffer) -> Self {
        let views = view_slots(&shape);
        Self { shape, buffer, views }
    }

    /// Storage backing this tensor.
    pub fn buffer(&self) -> &HostBuffer {
        &self.buffer
    }

    /// The elements, row-major.
    pub fn data(&self) -> Ref<'_, [f32]> {
        self.buffer.floats()
    }

    /// Mutable access to the elements, row-major.
    pub fn data_mut(&mut self) -> RefMut<'_, [f32]> {
        self.buffer.floats_mut()
    }

    /// Element at a full coordinate tuple.
    ///
    /// # Panics
    /// If the tuple's length differs from the rank or a coordinate is out of range.
    pub fn get(&self, indices: &[usize]) -> f32 {
        self.data()[self.shape.linear_index(indices)]
    }

    /// Sets the element at a full coordinate tuple.
    pub fn set(&mut self, indices: &[usize], value: f32) {
        let index = self.shape.linear_index(indices);
        self.data_mut()[index] = value;
    }

    /// Iterates over the elements in row-major order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            data: self.data(),
            pos: 0,
        }
    }

    /// Copies the elements out, row-major.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data().to_vec()
    }

    /// Sets every element to zero.
    pub fn clear(&mut self) {
        self.data_mut().fill(0.0);
    }

    /// Memoized view of slice `index` along the leading axis.
    ///
    /// # Panics
    /// If the rank is below 2 or `index` is out of range.
    pub fn sub_tensor(&self, index: usize) -> &HostTensor {
        let (shape, offset, len) = sub_tensor_range(&self.shape, index);
        self.views[index].get_or_init(|| Self::wrap(shape, self.buffer.new_view(offset, len)))
    }

    /// Mutable access to the memoized view of slice `index`.
    pub fn sub_tensor_mut(&mut self, index: usize) -> &mut HostTensor {
        self.sub_tensor(index);
        self.views[index]
            .get_mut()
            .expect("sub-tensor memoized by the call above")
    }

    /// A view of the same elements under `shape`.
    ///
    /// The view does not keep the storage alive: using it after this tensor's
    /// owner is dropped panics.
    ///
    /// # Panics
    /// If the element counts differ.
    pub fn new_view(&self, shape: impl Into<Shape>) -> HostTensor {
        let shape = shape.into();
        shape_assert_eq!(
            shape.total_element_count(),
            self.size(),
            "cannot view {} as {shape}",
            self.shape
        );
        Self::wrap(shape, self.buffer.new_view(0, self.buffer.len()))
    }

    /// Replaces the shape, keeping the elements.
    ///
    /// Memoized sub-tensors are discarded.
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

    /// Copies `other`'s elements into this tensor.
    ///
    /// An owning tensor takes `other`'s shape, reallocating when the element
    /// count changes. A view keeps its storage and must already have `other`'s
    /// shape.
    pub fn assign(&mut self, other: &HostTensor) {
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
                *self = other.clone();
                return;
            }
        }
        let values = other.to_vec();
        self.data_mut().copy_from_slice(&values);
    }
}

impl Shaped for HostTensor {
    const BACKEND: Backend = Backend::Host;

    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn is_view(&self) -> bool {
        self.buffer.is_view()
    }
}

/// Row-major element iterator over a [`HostTensor`].
pub struct Iter<'a> {
    data: Ref<'a, [f32]>,
    pos: usize,
}

impl Iterator for Iter<'_> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let value = self.data.get(self.pos).copied()?;
        self.pos += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.data.len() - self.pos;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl Index<usize> for HostTensor {
    type Output = HostTensor;

    fn index(&self, index: usize) -> &HostTensor {
        self.sub_tensor(index)
    }
}

impl IndexMut<usize> for HostTensor {
    fn index_mut(&mut self, index: usize) -> &mut HostTensor {
        self.sub_tensor_mut(index)
    }
}

impl Clone for HostTensor {
    /// Deep copy into a new owning tensor.
    fn clone(&self) -> Self {
        Self::from_vec(self.shape.clone(), self.to_vec())
    }
}

impl PartialEq for HostTensor {
    /// Equal shapes and elements within the approximate tolerance.
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data().relative_eq(&*other.data())
    }
}

fn write_nested(f: &mut fmt::Formatter<'_>, dims: &[usize], data: &[f32]) -> fmt::Result {
    f.write_str("[")?;
    match dims {
        [] => {}
        [_] => {
            for (i, v) in data.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{v}")?;
            }
        }
        [rows, rest @ ..] => {
            let stride = data.len() / rows;
            for (i, chunk) in data.chunks(stride.max(1)).enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_nested(f, rest, chunk)?;
            }
        }
    }
    f.write_str("]")
}

impl fmt::Display for HostTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_nested(f, self.shape.dims(), &self.data())
    }
}

impl fmt::Debug for HostTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostTensor({}, {self}", self.shape)?;
        if self.is_view() {
            f.write_str(", view")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(shape: impl Into<Shape>) -> HostTensor {
        let mut next = 0.0;
        HostTensor::with_generator(shape, || {
            next += 1.0;
            next - 1.0
        })
    }

    #[test]
    fn test_generator_fills_row_major() {
        let t = iota([2, 3]);
        assert_eq!(t.to_vec(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(t.get(&[1, 2]), 5.0);
    }

    #[test]
    fn test_sub_tensor_is_memoized() {
        let t = iota([3, 2]);
        let a: *const HostTensor = t.sub_tensor(1);
        let b: *const HostTensor = &t[1];
        assert_eq!(a, b);
        assert!(t[1].is_view());
        assert_eq!(t[1].to_vec(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_reshape_discards_views() {
        let mut t = iota([2, 3]);
        t.sub_tensor(0);
        t.reshape([3, 2]);
        assert_eq!(t[2].to_vec(), vec![4.0, 5.0]);
    }

    #[test]
    #[should_panic(expected = "cannot reshape a view")]
    fn test_reshape_view_panics() {
        let t = iota([2, 3]);
        let mut v = t.new_view([6]);
        v.reshape([3, 2]);
    }

    #[test]
    fn test_assign_owning_takes_shape() {
        let mut t = HostTensor::new([4]);
        t.assign(&iota([2, 3]));
        assert_eq!(t.shape(), &Shape::new([2, 3]));
        assert_eq!(t.get(&[1, 0]), 3.0);
    }

    #[test]
    fn test_display() {
        let t = iota([2, 2]);
        assert_eq!(t.to_string(), "[[0, 1], [2, 3]]");
        assert_eq!(format!("{:?}", t[0]), "HostTensor(Shape({2}), [0, 1], view)");
    }

    #[test]
    fn test_iter_and_clone() {
        let t = iota([5]);
        let copy = t.clone();
        assert!(!copy.buffer().shares_storage_with(t.buffer()));
        assert_eq!(t.iter().sum::<f32>(), 10.0);
        assert_eq!(t.iter().len(), 5);
        assert_eq!(t, copy);
    }
}
