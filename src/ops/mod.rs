//! # Operation Dispatch Layer
//!
//! Tensor operations, implemented once per backend and called through one set
//! of generic free functions.
//!
//! ## Submodules
//!
//! - [`cpu`]: host implementations, parallelized with [`rayon`](https://docs.rs/rayon)
//! - [`wgpu`]: device implementations, dispatching compiled kernels (`wgpu` feature)
//! - [`dispatch`]: the generic entry points; they check shapes, then delegate
//!
//! ## Capabilities
//!
//! Each tensor type implements the capability traits below. The trait methods
//! assume their shape preconditions hold; call the functions in [`dispatch`]
//! (re-exported here) to get them checked.
//!
//! Every operation writes into caller-provided output storage, so a training
//! step allocates nothing incidental. Host operations cannot fail; device
//! operations surface submission and transfer failures as [`DeviceError`](crate::error::DeviceError).
//!
//! ## Example
//! ```rust
//! use tandem::ops;
//! use tandem::tensor;
//! use tandem::tensors::HostTensor;
//!
//! let m = tensor!([[1.0, 2.0], [3.0, 4.0]]);
//! let v = tensor!([1.0, 1.0]);
//! let mut out = HostTensor::new([2]);
//! ops::matvecmul(&m, &v, &mut out).unwrap();
//! assert_eq!(out.to_vec(), vec![3.0, 7.0]);
//! ```

pub mod cpu;
pub mod dispatch;
#[cfg(feature = "wgpu")]
pub mod wgpu;

pub use dispatch::*;

use crate::tensors::Shaped;

/// Pointwise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn apply(self, x: f32, y: f32) -> f32 {
        match self {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div => x / y,
        }
    }
}

/// Pointwise unary maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Exp,
    Log,
    Sigmoid,
    SigmoidDerivative,
    Relu,
    ReluDerivative,
}

fn logistic(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

impl UnaryOp {
    pub fn apply(self, v: f32) -> f32 {
        match self {
            UnaryOp::Exp => v.exp(),
            UnaryOp::Log => v.ln(),
            UnaryOp::Sigmoid => logistic(v),
            UnaryOp::SigmoidDerivative => {
                let s = logistic(v);
                s * (1.0 - s)
            }
            UnaryOp::Relu => v.max(0.0),
            UnaryOp::ReluDerivative => {
                if v < 0.0 {
                    0.0
                } else {
                    1.0
                }
            }
        }
    }
}

/// Pointwise arithmetic and maps.
///
/// `Error` is the failure type of every capability on this backend.
pub trait ElementwiseArithmetic: Shaped + Sized {
    type Error: std::error::Error;

    /// `out = self op y`
    fn zip_with(&self, op: BinaryOp, y: &Self, out: &mut Self) -> Result<(), Self::Error>;

    /// `out = self op v`
    fn scalar_op(&self, op: BinaryOp, v: f32, out: &mut Self) -> Result<(), Self::Error>;

    /// `out = self + v * y`
    fn scaled_add(&self, y: &Self, v: f32, out: &mut Self) -> Result<(), Self::Error>;

    /// `out = f(self)`
    fn map(&self, f: UnaryOp, out: &mut Self) -> Result<(), Self::Error>;
}

/// Reductions to a scalar.
pub trait Reductions: ElementwiseArithmetic {
    fn sum(&self) -> Result<f32, Self::Error>;

    /// Squared error against `y`, summed over every element.
    fn mse(&self, y: &Self) -> Result<f32, Self::Error>;

    /// Flat index of the first maximum.
    fn argmax(&self) -> Result<usize, Self::Error>;

    /// Dot product with `y`.
    fn vecmul(&self, y: &Self) -> Result<f32, Self::Error>;
}

/// Matrix-vector products.
pub trait LinearAlgebra: ElementwiseArithmetic {
    /// `out = self · v` for a rows x cols matrix.
    fn matvecmul(&self, v: &Self, out: &mut Self) -> Result<(), Self::Error>;

    /// `out = selfᵀ · v` for a rows x cols matrix.
    fn transposed_matvecmul(&self, v: &Self, out: &mut Self) -> Result<(), Self::Error>;

    /// Outer product `out[i, j] = self[i] * y[j]`.
    fn transposed_vecmul(&self, y: &Self, out: &mut Self) -> Result<(), Self::Error>;
}

/// Pooling and convolution over channels x height x width images.
pub trait Spatial: ElementwiseArithmetic {
    fn max_pool_2d(&self, pool: PoolSize, out: &mut Self) -> Result<(), Self::Error>;

    fn max_pool_2d_gradients(
        &self,
        gradients: &Self,
        pool: PoolSize,
        out: &mut Self,
    ) -> Result<(), Self::Error>;

    fn convolution_2d(&self, kernels: &Self, out: &mut Self) -> Result<(), Self::Error>;

    fn cross_correlation_2d(&self, kernels: &Self, out: &mut Self) -> Result<(), Self::Error>;

    fn convolution_2d_kernel_gradients(
        &self,
        gradients: &Self,
        out: &mut Self,
    ) -> Result<(), Self::Error>;
}

/// Window of a max pooling; the stride equals the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSize {
    pub width: usize,
    pub height: usize,
}

impl PoolSize {
    pub fn new(width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0, "pool extents must be positive");
        Self { width, height }
    }

    /// Pooled extents `(height, width)` of a `height` x `width` plane.
    pub fn output_extent(&self, height: usize, width: usize) -> (usize, usize) {
        (height.div_ceil(self.height), width.div_ceil(self.width))
    }
}

/// Activation functions, dispatched by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Sigmoid,
    Relu,
}

impl Activation {
    /// `out = f(x)`
    pub fn apply<T: ElementwiseArithmetic>(self, x: &T, out: &mut T) -> Result<(), T::Error> {
        match self {
            Activation::Sigmoid => sigmoid(x, out),
            Activation::Relu => relu(x, out),
        }
    }

    /// `out = f'(x)`
    pub fn derivative<T: ElementwiseArithmetic>(self, x: &T, out: &mut T) -> Result<(), T::Error> {
        match self {
            Activation::Sigmoid => sigmoid_derivative(x, out),
            Activation::Relu => relu_derivative(x, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unary_ops() {
        assert_eq!(UnaryOp::Sigmoid.apply(0.0), 0.5);
        assert_eq!(UnaryOp::SigmoidDerivative.apply(0.0), 0.25);
        assert_eq!(UnaryOp::Relu.apply(-3.0), 0.0);
        assert_eq!(UnaryOp::ReluDerivative.apply(0.0), 1.0);
        assert_eq!(UnaryOp::ReluDerivative.apply(-0.5), 0.0);
    }

    #[test]
    fn test_pool_output_extent_rounds_up() {
        assert_eq!(PoolSize::new(2, 2).output_extent(5, 4), (3, 2));
        assert_eq!(PoolSize::new(3, 1).output_extent(4, 7), (4, 3));
    }
}
