//! Tensor shapes.
//!
//! A [`Shape`] is an ordered list of strictly positive extents. Shapes are plain
//! values: they are built freely, compared extent-wise, and only ever replaced as
//! a whole (a reshape swaps in a new `Shape`, it never edits one).
//!
//! # Example
//! ```rust
//! use tandem::shape::Shape;
//!
//! let s = Shape::new([2, 3, 4]);
//! assert_eq!(s.total_element_count(), 24);
//! assert_eq!(s.element_shape(), Shape::new([3, 4]));
//! assert_eq!(s.to_string(), "Shape({2, 3, 4})");
//! ```

use std::fmt;
use std::ops::Index;

/// Asserts a shape or rank precondition.
///
/// These are the only assertions removed by the `unchecked-shapes` feature;
/// index and buffer range checks use plain `assert!` and always stay on.
macro_rules! shape_assert {
    ($($arg:tt)*) => {
        if cfg!(not(feature = "unchecked-shapes")) {
            assert!($($arg)*);
        }
    };
}

/// Equality flavour of [`shape_assert!`].
macro_rules! shape_assert_eq {
    ($($arg:tt)*) => {
        if cfg!(not(feature = "unchecked-shapes")) {
            assert_eq!($($arg)*);
        }
    };
}

pub(crate) use shape_assert;
pub(crate) use shape_assert_eq;

/// Ordered sequence of dimension extents, each greater than zero.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Builds a shape from its extents.
    ///
    /// # Panics
    /// If any extent is zero.
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        let dims = dims.into();
        shape_assert!(
            dims.iter().all(|&d| d > 0),
            "shape extents must be positive, got {dims:?}"
        );
        Self { dims }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Product of all extents, or 0 for the empty shape.
    pub fn total_element_count(&self) -> usize {
        if self.dims.is_empty() {
            0
        } else {
            self.dims.iter().product()
        }
    }

    /// Shape of one slice along the leading axis.
    ///
    /// # Panics
    /// If the rank is not greater than one.
    pub fn element_shape(&self) -> Shape {
        shape_assert!(
            self.rank() > 1,
            "element_shape() needs rank > 1, got {self}"
        );
        Shape {
            dims: self.dims[1..].to_vec(),
        }
    }

    /// The extents as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Row-major position of a full coordinate tuple.
    ///
    /// # Panics
    /// If the tuple length differs from the rank or a coordinate is out of range.
    pub fn linear_index(&self, indices: &[usize]) -> usize {
        shape_assert_eq!(
            indices.len(),
            self.rank(),
            "coordinate {indices:?} does not match {self}"
        );
        let mut linear = 0;
        for (&i, &d) in indices.iter().zip(&self.dims) {
            assert!(i < d, "coordinate {indices:?} out of range for {self}");
            linear = linear * d + i;
        }
        linear
    }
}

impl Index<usize> for Shape {
    type Output = usize;

    fn index(&self, axis: usize) -> &usize {
        &self.dims[axis]
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({{")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "}})")
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
