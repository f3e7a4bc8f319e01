//! Host backend operations.
//!
//! Plain loops over row-major `f32` slices, parallelized with
//! [`rayon`](https://docs.rs/rayon) along the outermost independent axis
//! (rows, channels or features). Reductions run sequentially so results do
//! not depend on the thread count.
//!
//! The slice functions are public so the device backend can finish
//! reductions on read-back data with exactly the host semantics.

use std::cell::Ref;
use std::convert::Infallible;
use std::ops::Deref;

use rayon::prelude::*;

use super::{BinaryOp, ElementwiseArithmetic, LinearAlgebra, PoolSize, Reductions, Spatial, UnaryOp};
use crate::tensors::{HostTensor, Shaped};

/// Flat index of the first maximum under `>`; 0 for an empty slice.
pub fn argmax(data: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in data.iter().enumerate().skip(1) {
        if v > data[best] {
            best = i;
        }
    }
    best
}

/// Squared error summed over every element.
pub fn mse(x: &[f32], y: &[f32]) -> f32 {
    x.iter().zip(y).map(|(a, b)| (b - a) * (b - a)).sum()
}

/// `out = m · v` for a row-major `rows x cols` matrix.
pub fn matvecmul(m: &[f32], cols: usize, v: &[f32], out: &mut [f32]) {
    out.par_iter_mut().enumerate().for_each(|(row, o)| {
        let start = row * cols;
        *o = m[start..start + cols].iter().zip(v).map(|(a, b)| a * b).sum();
    });
}

/// `out = mᵀ · v` for a row-major `rows x cols` matrix.
pub fn transposed_matvecmul(m: &[f32], cols: usize, v: &[f32], out: &mut [f32]) {
    out.par_iter_mut().enumerate().for_each(|(col, o)| {
        *o = v.iter().enumerate().map(|(row, b)| m[row * cols + col] * b).sum();
    });
}

/// `out[i * y.len() + j] = x[i] * y[j]`
pub fn transposed_vecmul(x: &[f32], y: &[f32], out: &mut [f32]) {
    out.par_chunks_mut(y.len())
        .zip(x.par_iter())
        .for_each(|(row, &a)| {
            for (o, &b) in row.iter_mut().zip(y) {
                *o = a * b;
            }
        });
}

/// Geometry of a channels x height x width image.
#[derive(Debug, Clone, Copy)]
pub struct Image {
    pub planes: usize,
    pub height: usize,
    pub width: usize,
}

impl Image {
    fn of(tensor: &HostTensor) -> Self {
        let dims = tensor.shape().dims();
        Self {
            planes: dims[0],
            height: dims[1],
            width: dims[2],
        }
    }

    fn area(&self) -> usize {
        self.height * self.width
    }
}

/// Flat index, within a plane, of the first maximum of the window at pooled
/// position `(oy, ox)`, scanning rows then columns.
fn pool_winner(plane: &[f32], image: Image, pool: PoolSize, oy: usize, ox: usize) -> usize {
    let (y0, x0) = (oy * pool.height, ox * pool.width);
    let y1 = (y0 + pool.height).min(image.height);
    let x1 = (x0 + pool.width).min(image.width);
    let mut best = y0 * image.width + x0;
    for y in y0..y1 {
        for x in x0..x1 {
            let idx = y * image.width + x;
            if plane[idx] > plane[best] {
                best = idx;
            }
        }
    }
    best
}

/// Max pooling of `input` (see [`Image`]) into `out`.
pub fn max_pool_2d(input: &[f32], image: Image, pool: PoolSize, out: &mut [f32]) {
    let (oh, ow) = pool.output_extent(image.height, image.width);
    out.par_chunks_mut(oh * ow)
        .zip(input.par_chunks(image.area()))
        .for_each(|(pooled, plane)| {
            for oy in 0..oh {
                for ox in 0..ow {
                    pooled[oy * ow + ox] = plane[pool_winner(plane, image, pool, oy, ox)];
                }
            }
        });
}

/// Scatters pooled `gradients` back to the window maxima of `input`.
pub fn max_pool_2d_gradients(
    input: &[f32],
    gradients: &[f32],
    image: Image,
    pool: PoolSize,
    out: &mut [f32],
) {
    let (oh, ow) = pool.output_extent(image.height, image.width);
    out.par_chunks_mut(image.area())
        .zip(input.par_chunks(image.area()))
        .zip(gradients.par_chunks(oh * ow))
        .for_each(|((routed, plane), pooled)| {
            routed.fill(0.0);
            for oy in 0..oh {
                for ox in 0..ow {
                    routed[pool_winner(plane, image, pool, oy, ox)] = pooled[oy * ow + ox];
                }
            }
        });
}

/// Kernel geometry: features x channels x height x width.
#[derive(Debug, Clone, Copy)]
pub struct Kernels {
    pub features: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl Kernels {
    fn of(tensor: &HostTensor) -> Self {
        let dims = tensor.shape().dims();
        Self {
            features: dims[0],
            channels: dims[1],
            height: dims[2],
            width: dims[3],
        }
    }

    fn area(&self) -> usize {
        self.height * self.width
    }

    fn offset(&self, feature: usize, channel: usize) -> usize {
        (feature * self.channels + channel) * self.area()
    }
}

/// `out += plane ⋆ weights` over one zero-padded plane, where
/// `weight(ky, kx)` picks the weight applied to the pixel at offset
/// `(ky - hh, kx - hw)`.
fn correlate_plane(
    plane: &[f32],
    image: Image,
    k: Kernels,
    weight: impl Fn(usize, usize) -> f32,
    out: &mut [f32],
) {
    let (hh, hw) = (k.height / 2, k.width / 2);
    for y in 0..image.height {
        for x in 0..image.width {
            let mut acc = 0.0;
            for ky in 0..k.height {
                let Some(sy) = (y + ky).checked_sub(hh).filter(|&sy| sy < image.height) else {
                    continue;
                };
                for kx in 0..k.width {
                    let Some(sx) = (x + kx).checked_sub(hw).filter(|&sx| sx < image.width) else {
                        continue;
                    };
                    acc += plane[sy * image.width + sx] * weight(ky, kx);
                }
            }
            out[y * image.width + x] += acc;
        }
    }
}

/// Same-size convolution with mirrored kernels; `out` is features x H x W.
pub fn convolution_2d(input: &[f32], image: Image, kernels: &[f32], k: Kernels, out: &mut [f32]) {
    out.par_chunks_mut(image.area())
        .enumerate()
        .for_each(|(f, feature)| {
            feature.fill(0.0);
            for c in 0..k.channels {
                let w = &kernels[k.offset(f, c)..k.offset(f, c) + k.area()];
                let plane = &input[c * image.area()..(c + 1) * image.area()];
                let mirrored = |ky: usize, kx: usize| w[(k.height - 1 - ky) * k.width + (k.width - 1 - kx)];
                correlate_plane(plane, image, k, mirrored, feature);
            }
        });
}

/// Same-size cross-correlation of features x H x W `input`; `out` is
/// channels x H x W.
pub fn cross_correlation_2d(input: &[f32], image: Image, kernels: &[f32], k: Kernels, out: &mut [f32]) {
    out.par_chunks_mut(image.area())
        .enumerate()
        .for_each(|(c, channel)| {
            channel.fill(0.0);
            for f in 0..k.features {
                let w = &kernels[k.offset(f, c)..k.offset(f, c) + k.area()];
                let plane = &input[f * image.area()..(f + 1) * image.area()];
                correlate_plane(plane, image, k, |ky, kx| w[ky * k.width + kx], channel);
            }
        });
}

/// Kernel gradients of a convolution:
/// `out[f, c, ay, ax] = Σ gradients[f, y, x] * input[c, y + hh - ay, x + hw - ax]`.
pub fn convolution_2d_kernel_gradients(
    input: &[f32],
    gradients: &[f32],
    image: Image,
    k: Kernels,
    out: &mut [f32],
) {
    let (hh, hw) = (k.height / 2, k.width / 2);
    out.par_chunks_mut(k.area())
        .enumerate()
        .for_each(|(fc, weights)| {
            let (f, c) = (fc / k.channels, fc % k.channels);
            let plane = &input[c * image.area()..(c + 1) * image.area()];
            let grads = &gradients[f * image.area()..(f + 1) * image.area()];
            for ay in 0..k.height {
                for ax in 0..k.width {
                    let mut acc = 0.0;
                    for y in 0..image.height {
                        let Some(sy) = (y + hh).checked_sub(ay).filter(|&sy| sy < image.height) else {
                            continue;
                        };
                        for x in 0..image.width {
                            let Some(sx) = (x + hw).checked_sub(ax).filter(|&sx| sx < image.width) else {
                                continue;
                            };
                            acc += grads[y * image.width + x] * plane[sy * image.width + sx];
                        }
                    }
                    weights[ay * k.width + ax] = acc;
                }
            }
        });
}

/// Read access to an operand while the output is borrowed mutably.
enum Operand<'a> {
    Borrowed(Ref<'a, [f32]>),
    /// Copy of an operand stored in the output's allocation.
    Snapshot(Vec<f32>),
}

impl Deref for Operand<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        match self {
            Operand::Borrowed(data) => data,
            Operand::Snapshot(data) => data,
        }
    }
}

/// Borrows `input` for an operation writing `out`. An input living in the
/// same allocation as `out` (the tensor itself, a view of it, or its parent)
/// is copied first, so in-place updates read the old values.
fn operand<'a>(input: &'a HostTensor, out: &HostTensor) -> Operand<'a> {
    if input.buffer().shares_storage_with(out.buffer()) {
        Operand::Snapshot(input.to_vec())
    } else {
        Operand::Borrowed(input.data())
    }
}

impl ElementwiseArithmetic for HostTensor {
    type Error = Infallible;

    fn zip_with(&self, op: BinaryOp, y: &Self, out: &mut Self) -> Result<(), Infallible> {
        let (x, y) = (operand(self, out), operand(y, out));
        out.data_mut()
            .par_iter_mut()
            .zip(x.par_iter().zip(y.par_iter()))
            .for_each(|(o, (&a, &b))| *o = op.apply(a, b));
        Ok(())
    }

    fn scalar_op(&self, op: BinaryOp, v: f32, out: &mut Self) -> Result<(), Infallible> {
        let x = operand(self, out);
        out.data_mut()
            .par_iter_mut()
            .zip(x.par_iter())
            .for_each(|(o, &a)| *o = op.apply(a, v));
        Ok(())
    }

    fn scaled_add(&self, y: &Self, v: f32, out: &mut Self) -> Result<(), Infallible> {
        let (x, y) = (operand(self, out), operand(y, out));
        out.data_mut()
            .par_iter_mut()
            .zip(x.par_iter().zip(y.par_iter()))
            .for_each(|(o, (&a, &b))| *o = a + v * b);
        Ok(())
    }

    fn map(&self, f: UnaryOp, out: &mut Self) -> Result<(), Infallible> {
        let x = operand(self, out);
        out.data_mut()
            .par_iter_mut()
            .zip(x.par_iter())
            .for_each(|(o, &a)| *o = f.apply(a));
        Ok(())
    }
}

impl Reductions for HostTensor {
    fn sum(&self) -> Result<f32, Infallible> {
        Ok(self.data().iter().sum())
    }

    fn mse(&self, y: &Self) -> Result<f32, Infallible> {
        Ok(mse(&self.data(), &y.data()))
    }

    fn argmax(&self) -> Result<usize, Infallible> {
        Ok(argmax(&self.data()))
    }

    fn vecmul(&self, y: &Self) -> Result<f32, Infallible> {
        Ok(self.data().iter().zip(y.data().iter()).map(|(a, b)| a * b).sum())
    }
}

impl LinearAlgebra for HostTensor {
    fn matvecmul(&self, v: &Self, out: &mut Self) -> Result<(), Infallible> {
        let cols = self.shape()[1];
        matvecmul(&operand(self, out), cols, &operand(v, out), &mut out.data_mut());
        Ok(())
    }

    fn transposed_matvecmul(&self, v: &Self, out: &mut Self) -> Result<(), Infallible> {
        let cols = self.shape()[1];
        transposed_matvecmul(&operand(self, out), cols, &operand(v, out), &mut out.data_mut());
        Ok(())
    }

    fn transposed_vecmul(&self, y: &Self, out: &mut Self) -> Result<(), Infallible> {
        transposed_vecmul(&operand(self, out), &operand(y, out), &mut out.data_mut());
        Ok(())
    }
}

impl Spatial for HostTensor {
    fn max_pool_2d(&self, pool: PoolSize, out: &mut Self) -> Result<(), Infallible> {
        max_pool_2d(&operand(self, out), Image::of(self), pool, &mut out.data_mut());
        Ok(())
    }

    fn max_pool_2d_gradients(
        &self,
        gradients: &Self,
        pool: PoolSize,
        out: &mut Self,
    ) -> Result<(), Infallible> {
        let (input, gradients) = (operand(self, out), operand(gradients, out));
        max_pool_2d_gradients(&input, &gradients, Image::of(self), pool, &mut out.data_mut());
        Ok(())
    }

    fn convolution_2d(&self, kernels: &Self, out: &mut Self) -> Result<(), Infallible> {
        let (image, k) = (Image::of(self), Kernels::of(kernels));
        convolution_2d(&operand(self, out), image, &operand(kernels, out), k, &mut out.data_mut());
        Ok(())
    }

    fn cross_correlation_2d(&self, kernels: &Self, out: &mut Self) -> Result<(), Infallible> {
        let (image, k) = (Image::of(self), Kernels::of(kernels));
        cross_correlation_2d(&operand(self, out), image, &operand(kernels, out), k, &mut out.data_mut());
        Ok(())
    }

    fn convolution_2d_kernel_gradients(
        &self,
        gradients: &Self,
        out: &mut Self,
    ) -> Result<(), Infallible> {
        let (image, k) = (Image::of(self), Kernels::of(out));
        let (input, gradients) = (operand(self, out), operand(gradients, out));
        convolution_2d_kernel_gradients(&input, &gradients, image, k, &mut out.data_mut());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_first_occurrence() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), 1);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn test_matvecmul_and_transposed() {
        let m = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut out = [0.0; 2];
        matvecmul(&m, 3, &[1.0, 0.0, -1.0], &mut out);
        assert_eq!(out, [-2.0, -2.0]);
        let mut out = [0.0; 3];
        transposed_matvecmul(&m, 3, &[1.0, 1.0], &mut out);
        assert_eq!(out, [5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_partial_pool_windows() {
        let image = Image { planes: 1, height: 3, width: 3 };
        let input: Vec<f32> = (0..9).map(|v| v as f32).collect();
        let mut out = [0.0; 4];
        max_pool_2d(&input, image, PoolSize::new(2, 2), &mut out);
        assert_eq!(out, [4.0, 5.0, 7.0, 8.0]);
    }

    #[test]
    fn test_convolution_mirrors_kernel() {
        // a single off-centre weight shifts the image one way under
        // convolution and the other way under cross-correlation
        let image = Image { planes: 1, height: 1, width: 3 };
        let k = Kernels { features: 1, channels: 1, height: 1, width: 3 };
        let weights = [1.0, 0.0, 0.0];
        let input = [1.0, 2.0, 3.0];
        let mut out = [0.0; 3];
        convolution_2d(&input, image, &weights, k, &mut out);
        assert_eq!(out, [2.0, 3.0, 0.0]);
        cross_correlation_2d(&input, image, &weights, k, &mut out);
        assert_eq!(out, [0.0, 1.0, 2.0]);
    }
}
