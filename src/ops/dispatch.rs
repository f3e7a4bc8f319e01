//! Generic operation entry points.
//!
//! Every function checks its shape preconditions (fatal, see
//! [`shape_assert!`](crate::shape)) and then delegates to the backend that owns
//! the tensor type. The same call works for [`HostTensor`](crate::tensors::HostTensor)
//! and [`DeviceTensor`](crate::tensors::DeviceTensor):
//!
//! ```rust
//! use tandem::ops;
//! use tandem::tensor;
//! use tandem::tensors::HostTensor;
//!
//! let x = tensor!([1.0, 2.0, 3.0]);
//! let y = tensor!([1.0, 1.0, 1.0]);
//! let mut out = HostTensor::new([3]);
//! ops::scaled_add(&x, &y, -0.5, &mut out).unwrap();
//! assert_eq!(out.to_vec(), vec![0.5, 1.5, 2.5]);
//! ```

use super::{BinaryOp, ElementwiseArithmetic, LinearAlgebra, PoolSize, Reductions, Spatial, UnaryOp};
use crate::shape::{Shape, shape_assert, shape_assert_eq};
use crate::tensors::Shaped;

fn same_shape<T: Shaped>(op: &str, a: &T, b: &T) {
    shape_assert_eq!(a.shape(), b.shape(), "{op}: operand shapes differ");
}

fn zip_with<T: ElementwiseArithmetic>(
    name: &str,
    op: BinaryOp,
    x: &T,
    y: &T,
    out: &mut T,
) -> Result<(), T::Error> {
    same_shape(name, x, y);
    same_shape(name, x, out);
    x.zip_with(op, y, out)
}

fn scalar_op<T: ElementwiseArithmetic>(
    name: &str,
    op: BinaryOp,
    x: &T,
    v: f32,
    out: &mut T,
) -> Result<(), T::Error> {
    same_shape(name, x, out);
    x.scalar_op(op, v, out)
}

fn map<T: ElementwiseArithmetic>(name: &str, f: UnaryOp, x: &T, out: &mut T) -> Result<(), T::Error> {
    same_shape(name, x, out);
    x.map(f, out)
}

/// `out = x + y`
pub fn add<T: ElementwiseArithmetic>(x: &T, y: &T, out: &mut T) -> Result<(), T::Error> {
    zip_with("add", BinaryOp::Add, x, y, out)
}

/// `out = x - y`
pub fn sub<T: ElementwiseArithmetic>(x: &T, y: &T, out: &mut T) -> Result<(), T::Error> {
    zip_with("sub", BinaryOp::Sub, x, y, out)
}

/// `out = x * y`, pointwise.
pub fn mul<T: ElementwiseArithmetic>(x: &T, y: &T, out: &mut T) -> Result<(), T::Error> {
    zip_with("mul", BinaryOp::Mul, x, y, out)
}

/// `out = x / y`, pointwise.
pub fn div<T: ElementwiseArithmetic>(x: &T, y: &T, out: &mut T) -> Result<(), T::Error> {
    zip_with("div", BinaryOp::Div, x, y, out)
}

pub fn scalar_add<T: ElementwiseArithmetic>(x: &T, v: f32, out: &mut T) -> Result<(), T::Error> {
    scalar_op("scalar_add", BinaryOp::Add, x, v, out)
}

pub fn scalar_sub<T: ElementwiseArithmetic>(x: &T, v: f32, out: &mut T) -> Result<(), T::Error> {
    scalar_op("scalar_sub", BinaryOp::Sub, x, v, out)
}

pub fn scalar_mul<T: ElementwiseArithmetic>(x: &T, v: f32, out: &mut T) -> Result<(), T::Error> {
    scalar_op("scalar_mul", BinaryOp::Mul, x, v, out)
}

pub fn scalar_div<T: ElementwiseArithmetic>(x: &T, v: f32, out: &mut T) -> Result<(), T::Error> {
    scalar_op("scalar_div", BinaryOp::Div, x, v, out)
}

/// `out = x + v * y`, the gradient-descent update step.
pub fn scaled_add<T: ElementwiseArithmetic>(x: &T, y: &T, v: f32, out: &mut T) -> Result<(), T::Error> {
    same_shape("scaled_add", x, y);
    same_shape("scaled_add", x, out);
    x.scaled_add(y, v, out)
}

pub fn exp<T: ElementwiseArithmetic>(x: &T, out: &mut T) -> Result<(), T::Error> {
    map("exp", UnaryOp::Exp, x, out)
}

/// Natural logarithm.
pub fn log<T: ElementwiseArithmetic>(x: &T, out: &mut T) -> Result<(), T::Error> {
    map("log", UnaryOp::Log, x, out)
}

/// `out = 1 / (1 + e^-x)`
pub fn sigmoid<T: ElementwiseArithmetic>(x: &T, out: &mut T) -> Result<(), T::Error> {
    map("sigmoid", UnaryOp::Sigmoid, x, out)
}

/// `out = s * (1 - s)` with `s = sigmoid(x)`
pub fn sigmoid_derivative<T: ElementwiseArithmetic>(x: &T, out: &mut T) -> Result<(), T::Error> {
    map("sigmoid_derivative", UnaryOp::SigmoidDerivative, x, out)
}

pub fn relu<T: ElementwiseArithmetic>(x: &T, out: &mut T) -> Result<(), T::Error> {
    map("relu", UnaryOp::Relu, x, out)
}

/// 0 where `x < 0`, else 1.
pub fn relu_derivative<T: ElementwiseArithmetic>(x: &T, out: &mut T) -> Result<(), T::Error> {
    map("relu_derivative", UnaryOp::ReluDerivative, x, out)
}

/// Sum of every element.
pub fn sum<T: Reductions>(x: &T) -> Result<f32, T::Error> {
    x.sum()
}

/// Squared error between `x` and `y`, summed over every element.
pub fn mse<T: Reductions>(x: &T, y: &T) -> Result<f32, T::Error> {
    same_shape("mse", x, y);
    x.mse(y)
}

/// Flat index of the first maximum.
///
/// Defined for rank-1 tensors; other ranks log a warning and index the
/// flattened elements.
pub fn argmax<T: Reductions>(x: &T) -> Result<usize, T::Error> {
    if x.rank() != 1 {
        log::warn!("argmax of a rank-{} tensor indexes its flattened elements", x.rank());
    }
    x.argmax()
}

/// Dot product of two rank-1 tensors.
pub fn vecmul<T: Reductions>(x: &T, y: &T) -> Result<f32, T::Error> {
    shape_assert!(x.rank() == 1, "vecmul: x must have rank 1, got {}", x.shape());
    same_shape("vecmul", x, y);
    x.vecmul(y)
}

/// `out = m · v` for a rows x cols matrix `m`.
pub fn matvecmul<T: LinearAlgebra>(m: &T, v: &T, out: &mut T) -> Result<(), T::Error> {
    shape_assert!(m.rank() == 2, "matvecmul: matrix must have rank 2, got {}", m.shape());
    shape_assert!(v.rank() == 1, "matvecmul: vector must have rank 1, got {}", v.shape());
    shape_assert!(out.rank() == 1, "matvecmul: output must have rank 1, got {}", out.shape());
    shape_assert_eq!(m.shape()[1], v.size(), "matvecmul: {} matrix times {} vector", m.shape(), v.shape());
    shape_assert_eq!(m.shape()[0], out.size(), "matvecmul: {} matrix into {} output", m.shape(), out.shape());
    m.matvecmul(v, out)
}

/// `out = mᵀ · v` for a rows x cols matrix `m`.
pub fn transposed_matvecmul<T: LinearAlgebra>(m: &T, v: &T, out: &mut T) -> Result<(), T::Error> {
    shape_assert!(m.rank() == 2, "transposed_matvecmul: matrix must have rank 2, got {}", m.shape());
    shape_assert!(v.rank() == 1, "transposed_matvecmul: vector must have rank 1, got {}", v.shape());
    shape_assert!(out.rank() == 1, "transposed_matvecmul: output must have rank 1, got {}", out.shape());
    shape_assert_eq!(m.shape()[0], v.size(), "transposed_matvecmul: {} matrix times {} vector", m.shape(), v.shape());
    shape_assert_eq!(m.shape()[1], out.size(), "transposed_matvecmul: {} matrix into {} output", m.shape(), out.shape());
    m.transposed_matvecmul(v, out)
}

/// Outer product: `out[i, j] = x[i] * y[j]`.
pub fn transposed_vecmul<T: LinearAlgebra>(x: &T, y: &T, out: &mut T) -> Result<(), T::Error> {
    shape_assert!(x.rank() == 1 && y.rank() == 1, "transposed_vecmul: operands must have rank 1");
    shape_assert_eq!(
        out.shape(),
        &Shape::new([x.size(), y.size()]),
        "transposed_vecmul: output shape"
    );
    x.transposed_vecmul(y, out)
}

fn pooled_shape(input: &Shape, pool: PoolSize) -> Shape {
    shape_assert!(input.rank() == 3, "max pooling expects channels x height x width, got {input}");
    let (height, width) = pool.output_extent(input[1], input[2]);
    Shape::new([input[0], height, width])
}

/// Max over each `pool` window; output extents round up, so border windows
/// may be partial.
pub fn max_pool_2d<T: Spatial>(input: &T, pool: PoolSize, out: &mut T) -> Result<(), T::Error> {
    shape_assert_eq!(out.shape(), &pooled_shape(input.shape(), pool), "max_pool_2d: output shape");
    input.max_pool_2d(pool, out)
}

/// Routes each pooled gradient to its window's maximum in `input`; every
/// other position of `out` becomes zero.
pub fn max_pool_2d_gradients<T: Spatial>(
    input: &T,
    gradients: &T,
    pool: PoolSize,
    out: &mut T,
) -> Result<(), T::Error> {
    shape_assert_eq!(
        gradients.shape(),
        &pooled_shape(input.shape(), pool),
        "max_pool_2d_gradients: gradient shape"
    );
    same_shape("max_pool_2d_gradients", input, out);
    input.max_pool_2d_gradients(gradients, pool, out)
}

/// Checks a features x channels x height x width kernel tensor and returns
/// `(features, channels)`.
fn kernel_counts(kernels: &Shape) -> (usize, usize) {
    shape_assert!(
        kernels.rank() == 4,
        "convolution kernels are features x channels x height x width, got {kernels}"
    );
    shape_assert!(
        kernels[2] % 2 == 1 && kernels[3] % 2 == 1,
        "convolution kernel extents must be odd, got {kernels}"
    );
    (kernels[0], kernels[1])
}

fn image(name: &str, shape: &Shape, planes: usize, height: usize, width: usize) {
    shape_assert_eq!(shape, &Shape::new([planes, height, width]), "{name}: image shape");
}

/// Zero-padded, same-size convolution of a channels x height x width `input`
/// with mirrored `kernels` into features x height x width `out`.
pub fn convolution_2d<T: Spatial>(input: &T, kernels: &T, out: &mut T) -> Result<(), T::Error> {
    let (features, channels) = kernel_counts(kernels.shape());
    shape_assert!(input.rank() == 3, "convolution_2d: input must have rank 3");
    image("convolution_2d", input.shape(), channels, input.shape()[1], input.shape()[2]);
    image("convolution_2d", out.shape(), features, input.shape()[1], input.shape()[2]);
    input.convolution_2d(kernels, out)
}

/// Zero-padded, same-size cross-correlation of a features x height x width
/// `input` with `kernels` into channels x height x width `out`.
///
/// This propagates a convolution's output gradients back to its input.
pub fn cross_correlation_2d<T: Spatial>(input: &T, kernels: &T, out: &mut T) -> Result<(), T::Error> {
    let (features, channels) = kernel_counts(kernels.shape());
    shape_assert!(input.rank() == 3, "cross_correlation_2d: input must have rank 3");
    image("cross_correlation_2d", input.shape(), features, input.shape()[1], input.shape()[2]);
    image("cross_correlation_2d", out.shape(), channels, input.shape()[1], input.shape()[2]);
    input.cross_correlation_2d(kernels, out)
}

/// Gradient of a convolution's loss with respect to its kernels, given the
/// layer's `input` and its output `gradients`. `out` is overwritten.
pub fn convolution_2d_kernel_gradients<T: Spatial>(
    input: &T,
    gradients: &T,
    out: &mut T,
) -> Result<(), T::Error> {
    let (features, channels) = kernel_counts(out.shape());
    shape_assert!(input.rank() == 3, "convolution_2d_kernel_gradients: input must have rank 3");
    image("convolution_2d_kernel_gradients", input.shape(), channels, input.shape()[1], input.shape()[2]);
    image("convolution_2d_kernel_gradients", gradients.shape(), features, input.shape()[1], input.shape()[2]);
    input.convolution_2d_kernel_gradients(gradients, out)
}
