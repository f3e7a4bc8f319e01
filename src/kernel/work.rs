//! Work-partitioning descriptors.
//!
//! A [`WorkSize`] has one to three dimensions. The *global* size is the
//! problem size (usually one lane per output element); the *local* size is
//! the workgroup shape. Dispatch rounds every global dimension up to a
//! multiple of the local one, so kernels must bounds-check their lanes.

use std::fmt;

/// Extents of a 1-D, 2-D or 3-D range of lanes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkSize {
    dims: [usize; 3],
    rank: usize,
}

impl WorkSize {
    /// A one-dimensional range.
    pub const fn d1(x: usize) -> Self {
        Self { dims: [x, 1, 1], rank: 1 }
    }

    /// A two-dimensional range.
    pub const fn d2(x: usize, y: usize) -> Self {
        Self { dims: [x, y, 1], rank: 2 }
    }

    /// A three-dimensional range.
    pub const fn d3(x: usize, y: usize, z: usize) -> Self {
        Self { dims: [x, y, z], rank: 3 }
    }

    /// Builds a range from 1 to 3 extents.
    ///
    /// # Panics
    /// If `dims` is empty or longer than three.
    pub fn from_slice(dims: &[usize]) -> Self {
        match *dims {
            [x] => Self::d1(x),
            [x, y] => Self::d2(x, y),
            [x, y, z] => Self::d3(x, y, z),
            _ => panic!("work sizes have 1 to 3 dimensions, got {}", dims.len()),
        }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Extents, without the implicit trailing ones.
    pub fn dims(&self) -> &[usize] {
        &self.dims[..self.rank]
    }

    /// Extent along `axis`; axes past the rank are 1.
    pub fn get(&self, axis: usize) -> usize {
        self.dims[axis]
    }

    /// Total number of lanes.
    pub fn volume(&self) -> usize {
        self.dims.iter().product()
    }

    /// The default workgroup shape for a dimensionality: 256, 32x8 or 16x4x4.
    ///
    /// Every default has 256 invocations, which every compute-capable `wgpu`
    /// adapter supports.
    pub fn default_local(rank: usize) -> Self {
        match rank {
            1 => Self::d1(256),
            2 => Self::d2(32, 8),
            3 => Self::d3(16, 4, 4),
            _ => panic!("work sizes have 1 to 3 dimensions, got {rank}"),
        }
    }

    /// This size rounded up, per dimension, to a multiple of `local`.
    ///
    /// # Panics
    /// If the ranks differ or a local extent is zero.
    pub fn padded(&self, local: &WorkSize) -> WorkSize {
        assert_eq!(
            self.rank, local.rank,
            "global {self:?} and local {local:?} work sizes differ in rank"
        );
        let mut dims = [1; 3];
        for (axis, dim) in dims.iter_mut().enumerate() {
            assert!(local.dims[axis] > 0, "local work size {local:?} has a zero extent");
            *dim = self.dims[axis].next_multiple_of(local.dims[axis]);
        }
        WorkSize { dims, rank: self.rank }
    }

    /// Number of workgroups per dimension once padded to `local`.
    pub fn workgroups(&self, local: &WorkSize) -> [usize; 3] {
        let padded = self.padded(local);
        [
            padded.dims[0] / local.dims[0],
            padded.dims[1] / local.dims[1],
            padded.dims[2] / local.dims[2],
        ]
    }
}

impl From<usize> for WorkSize {
    fn from(x: usize) -> Self {
        WorkSize::d1(x)
    }
}

impl From<(usize, usize)> for WorkSize {
    fn from((x, y): (usize, usize)) -> Self {
        WorkSize::d2(x, y)
    }
}

impl From<(usize, usize, usize)> for WorkSize {
    fn from((x, y, z): (usize, usize, usize)) -> Self {
        WorkSize::d3(x, y, z)
    }
}

impl fmt::Debug for WorkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims().iter().map(ToString::to_string).collect();
        write!(f, "WorkSize({})", dims.join("x"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_rounds_up() {
        let padded = WorkSize::d1(100).padded(&WorkSize::d1(32));
        assert_eq!(padded.dims(), &[128]);
        assert_eq!(WorkSize::d1(128).padded(&WorkSize::d1(32)).dims(), &[128]);
        assert_eq!(WorkSize::d1(0).padded(&WorkSize::d1(32)).dims(), &[0]);
    }

    #[test]
    fn test_padding_per_dimension() {
        let padded = WorkSize::d3(17, 9, 1).padded(&WorkSize::d3(16, 4, 4));
        assert_eq!(padded.dims(), &[32, 12, 4]);
        assert_eq!(WorkSize::d3(17, 9, 1).workgroups(&WorkSize::d3(16, 4, 4)), [2, 3, 1]);
    }

    #[test]
    fn test_defaults() {
        for rank in 1..=3 {
            let local = WorkSize::default_local(rank);
            assert_eq!(local.rank(), rank);
            assert_eq!(local.volume(), 256);
        }
    }

    #[test]
    #[should_panic(expected = "differ in rank")]
    fn test_rank_mismatch() {
        WorkSize::d2(10, 10).padded(&WorkSize::d1(8));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(WorkSize::from(5), WorkSize::d1(5));
        assert_eq!(WorkSize::from((5, 6)), WorkSize::from_slice(&[5, 6]));
        assert_eq!(format!("{:?}", WorkSize::d3(1, 2, 3)), "WorkSize(1x2x3)");
    }
}
