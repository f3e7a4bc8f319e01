//! Device backend operations.
//!
//! Each operation resolves its kernel through the tensor's
//! [`KernelManager`](crate::kernel::manager::KernelManager), binds scalars and
//! buffers in the order the WGSL entry point documents, and submits a
//! dispatch sized to the output. Submission does not wait; results become
//! visible to the host through a read-back, which drains the queue first.
//!
//! Reductions (`sum`, `mse`, `argmax`, `vecmul`) finish on the host after a
//! read-back, using the slice functions of [`cpu`](super::cpu), so both
//! backends agree on tie-breaking and accumulation order.
//!
//! Matrix-vector products run in two phases: a partial-sum pass over chunks of
//! up to [`MAX_CHUNK`] entries per row into a scratch buffer, then a reduce
//! pass per row.
//!
//! Intermediates come from [`ComputeContext::scratch`](crate::context::ComputeContext::scratch),
//! so repeated calls with the same sizes allocate nothing.

use super::{BinaryOp, ElementwiseArithmetic, LinearAlgebra, PoolSize, Reductions, Spatial, UnaryOp};
use super::cpu;
use crate::error::DeviceError;
use crate::kernel::manager::KernelId;
use crate::kernel::{Kernel, WorkSize};
use crate::tensors::{DeviceTensor, Shaped};

/// Elements each lane of a 1-D elementwise kernel processes.
pub const ITEMS_PER_THREAD: usize = 10;

/// Largest matrix-vector chunk; matches the WGSL workgroup array.
pub const MAX_CHUNK: usize = 64;

fn kernel(tensor: &DeviceTensor, id: KernelId) -> &Kernel {
    tensor.context().kernels().kernel(id)
}

fn elementwise_work(size: usize) -> WorkSize {
    WorkSize::d1(size.div_ceil(ITEMS_PER_THREAD))
}

fn binary_kernel(op: BinaryOp) -> KernelId {
    match op {
        BinaryOp::Add => KernelId::Add,
        BinaryOp::Sub => KernelId::Sub,
        BinaryOp::Mul => KernelId::Mul,
        BinaryOp::Div => KernelId::Div,
    }
}

fn scalar_kernel(op: BinaryOp) -> KernelId {
    match op {
        BinaryOp::Add => KernelId::ScalarAdd,
        BinaryOp::Sub => KernelId::ScalarSub,
        BinaryOp::Mul => KernelId::ScalarMul,
        BinaryOp::Div => KernelId::ScalarDiv,
    }
}

fn unary_kernel(f: UnaryOp) -> KernelId {
    match f {
        UnaryOp::Exp => KernelId::Exp,
        UnaryOp::Log => KernelId::Log,
        UnaryOp::Sigmoid => KernelId::Sigmoid,
        UnaryOp::SigmoidDerivative => KernelId::SigmoidDerivative,
        UnaryOp::Relu => KernelId::Relu,
        UnaryOp::ReluDerivative => KernelId::ReluDerivative,
    }
}

impl ElementwiseArithmetic for DeviceTensor {
    type Error = DeviceError;

    fn zip_with(&self, op: BinaryOp, y: &Self, out: &mut Self) -> Result<(), DeviceError> {
        kernel(self, binary_kernel(op))
            .bind(self.size())
            .bind(self.buffer())
            .bind(y.buffer())
            .bind(out.buffer())
            .run(elementwise_work(self.size()), None)
    }

    fn scalar_op(&self, op: BinaryOp, v: f32, out: &mut Self) -> Result<(), DeviceError> {
        kernel(self, scalar_kernel(op))
            .bind(self.size())
            .bind(v)
            .bind(self.buffer())
            .bind(out.buffer())
            .run(elementwise_work(self.size()), None)
    }

    fn scaled_add(&self, y: &Self, v: f32, out: &mut Self) -> Result<(), DeviceError> {
        kernel(self, KernelId::ScaledAdd)
            .bind(self.size())
            .bind(v)
            .bind(self.buffer())
            .bind(y.buffer())
            .bind(out.buffer())
            .run(elementwise_work(self.size()), None)
    }

    fn map(&self, f: UnaryOp, out: &mut Self) -> Result<(), DeviceError> {
        kernel(self, unary_kernel(f))
            .bind(self.size())
            .bind(self.buffer())
            .bind(out.buffer())
            .run(elementwise_work(self.size()), None)
    }
}

impl DeviceTensor {
    /// Runs a pointwise `(x, y) -> scratch` kernel and sums the scratch on the host.
    fn pointwise_sum(&self, id: KernelId, y: &Self) -> Result<f32, DeviceError> {
        let scratch = self.context().scratch(self.size() * size_of::<f32>())?;
        kernel(self, id)
            .bind(self.size())
            .bind(self.buffer())
            .bind(y.buffer())
            .bind(&*scratch)
            .run(elementwise_work(self.size()), None)?;
        Ok(scratch.read_floats()?.iter().sum())
    }
}

impl Reductions for DeviceTensor {
    fn sum(&self) -> Result<f32, DeviceError> {
        Ok(self.to_vec()?.iter().sum())
    }

    fn mse(&self, y: &Self) -> Result<f32, DeviceError> {
        self.pointwise_sum(KernelId::Mse, y)
    }

    fn argmax(&self) -> Result<usize, DeviceError> {
        Ok(cpu::argmax(&self.to_vec()?))
    }

    fn vecmul(&self, y: &Self) -> Result<f32, DeviceError> {
        self.pointwise_sum(KernelId::Mul, y)
    }
}

/// Chunking of a length-`n` contraction: (entries per chunk, chunk count).
fn chunking(n: usize) -> (usize, usize) {
    let per_chunk = n.min(MAX_CHUNK);
    (per_chunk, n.div_ceil(per_chunk))
}

impl DeviceTensor {
    /// Second phase of a matrix-vector product: `out[r] = Σ partial[r, ..]`.
    fn reduce_rows(
        &self,
        partial: &crate::buffer::DeviceBuffer,
        rows: usize,
        chunks: usize,
        out: &mut DeviceTensor,
    ) -> Result<(), DeviceError> {
        kernel(self, KernelId::MatVecMulReduce)
            .bind(rows)
            .bind(chunks)
            .bind(partial)
            .bind(out.buffer())
            .run(WorkSize::d1(rows), None)
    }
}

impl LinearAlgebra for DeviceTensor {
    fn matvecmul(&self, v: &Self, out: &mut Self) -> Result<(), DeviceError> {
        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let (per_chunk, chunks) = chunking(cols);
        let partial = self.context().scratch(rows * chunks * size_of::<f32>())?;

        kernel(self, KernelId::MatVecMul)
            .bind(rows)
            .bind(cols)
            .bind(per_chunk)
            .bind(self.buffer())
            .bind(v.buffer())
            .bind(&*partial)
            .bind_local(per_chunk * size_of::<f32>())
            .run(WorkSize::d2(chunks, rows), None)?;
        self.reduce_rows(&partial, rows, chunks, out)
    }

    fn transposed_matvecmul(&self, v: &Self, out: &mut Self) -> Result<(), DeviceError> {
        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let (per_chunk, chunks) = chunking(rows);
        let partial = self.context().scratch(cols * chunks * size_of::<f32>())?;

        kernel(self, KernelId::TransposedMatVecMul)
            .bind(rows)
            .bind(cols)
            .bind(per_chunk)
            .bind(self.buffer())
            .bind(v.buffer())
            .bind(&*partial)
            .bind_local(per_chunk * size_of::<f32>())
            .run(WorkSize::d2(cols, chunks), None)?;
        self.reduce_rows(&partial, cols, chunks, out)
    }

    fn transposed_vecmul(&self, y: &Self, out: &mut Self) -> Result<(), DeviceError> {
        let (rows, cols) = (self.size(), y.size());
        kernel(self, KernelId::TransposedVecMul)
            .bind(rows)
            .bind(cols)
            .bind(self.buffer())
            .bind(y.buffer())
            .bind(out.buffer())
            .run(WorkSize::d2(cols, rows), None)
    }
}

/// `(planes, height, width)` of a rank-3 tensor.
fn image_dims(tensor: &DeviceTensor) -> (usize, usize, usize) {
    let dims = tensor.shape().dims();
    (dims[0], dims[1], dims[2])
}

impl DeviceTensor {
    fn bind_pool(&self, kernel: &Kernel, pool: PoolSize) -> (usize, usize, usize) {
        let (channels, height, width) = image_dims(self);
        let (oh, ow) = pool.output_extent(height, width);
        kernel
            .bind(width)
            .bind(height)
            .bind(pool.width)
            .bind(pool.height)
            .bind(ow)
            .bind(oh)
            .bind(channels);
        (ow, oh, channels)
    }
}

impl Spatial for DeviceTensor {
    fn max_pool_2d(&self, pool: PoolSize, out: &mut Self) -> Result<(), DeviceError> {
        let k = kernel(self, KernelId::MaxPool2d);
        let (ow, oh, channels) = self.bind_pool(k, pool);
        k.bind(self.buffer())
            .bind(out.buffer())
            .run(WorkSize::d3(ow, oh, channels), None)
    }

    fn max_pool_2d_gradients(
        &self,
        gradients: &Self,
        pool: PoolSize,
        out: &mut Self,
    ) -> Result<(), DeviceError> {
        let k = kernel(self, KernelId::MaxPool2dGradients);
        let (ow, oh, channels) = self.bind_pool(k, pool);
        k.bind(self.buffer())
            .bind(gradients.buffer())
            .bind(out.buffer())
            .run(WorkSize::d3(ow, oh, channels), None)
    }

    fn convolution_2d(&self, kernels: &Self, out: &mut Self) -> Result<(), DeviceError> {
        let (channels, height, width) = image_dims(self);
        let kdims = kernels.shape().dims();
        let (features, kh, kw) = (kdims[0], kdims[2], kdims[3]);
        let family = self.context().kernels().convolution(kw, kh)?;
        family
            .convolution
            .bind(width)
            .bind(height)
            .bind(channels)
            .bind(features)
            .bind(self.buffer())
            .bind(kernels.buffer())
            .bind(out.buffer())
            .run(WorkSize::d3(width, height, features), None)
    }

    fn cross_correlation_2d(&self, kernels: &Self, out: &mut Self) -> Result<(), DeviceError> {
        let (features, height, width) = image_dims(self);
        let kdims = kernels.shape().dims();
        let (channels, kh, kw) = (kdims[1], kdims[2], kdims[3]);
        let family = self.context().kernels().convolution(kw, kh)?;
        family
            .cross_correlation
            .bind(width)
            .bind(height)
            .bind(channels)
            .bind(features)
            .bind(self.buffer())
            .bind(kernels.buffer())
            .bind(out.buffer())
            .run(WorkSize::d3(width, height, channels), None)
    }

    fn convolution_2d_kernel_gradients(
        &self,
        gradients: &Self,
        out: &mut Self,
    ) -> Result<(), DeviceError> {
        let (channels, height, width) = image_dims(self);
        let kdims = out.shape().dims();
        let (features, kh, kw) = (kdims[0], kdims[2], kdims[3]);
        let family = self.context().kernels().convolution(kw, kh)?;
        family
            .gradients
            .bind(width)
            .bind(height)
            .bind(channels)
            .bind(features)
            .bind(self.buffer())
            .bind(gradients.buffer())
            .bind(out.buffer())
            .run(WorkSize::d3(kw * kh, channels, features), None)
    }
}
