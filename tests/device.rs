#![cfg(feature = "wgpu")]

use std::path::PathBuf;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tandem::approx::float_eq;
use tandem::buffer::CLEAR_CHUNK_SIZE;
use tandem::config::{DeviceConfig, KernelSource};
use tandem::context::ComputeContext;
use tandem::error::DeviceError;
use tandem::kernel::manager::KernelId;
use tandem::kernel::program::Defines;
use tandem::ops::{self, ElementwiseArithmetic, LinearAlgebra, PoolSize, Reductions, Spatial};
use tandem::shape::Shape;
use tandem::tensor;
use tandem::tensors::{DeviceTensor, HostTensor, Shaped};

/// Opens a device, or `None` when the machine has no usable adapter.
fn context(config: &DeviceConfig) -> Option<Rc<ComputeContext>> {
    let _ = env_logger::builder().is_test(true).try_init();
    match ComputeContext::init(config) {
        Ok(ctx) => Some(ctx),
        Err(err @ (DeviceError::Adapter(_) | DeviceError::Device(_))) => {
            log::warn!("skipping device test: {err}");
            None
        }
        Err(err) => panic!("device initialization failed: {err}"),
    }
}

macro_rules! device_or_skip {
    () => {
        device_or_skip!(&DeviceConfig::default())
    };
    ($config:expr) => {
        match context($config) {
            Some(ctx) => ctx,
            None => return,
        }
    };
}

fn random(shape: impl Into<Shape>, rng: &mut StdRng) -> HostTensor {
    HostTensor::with_generator(shape, || rng.random_range(-1.0..1.0))
}

fn upload(ctx: &Rc<ComputeContext>, host: &HostTensor) -> DeviceTensor {
    host.to_device(ctx).unwrap()
}

fn assert_same(host: &[HostTensor], device: &[DeviceTensor]) {
    assert_eq!(host.len(), device.len());
    for (i, (h, d)) in host.iter().zip(device).enumerate() {
        let d = d.to_host().unwrap();
        assert_eq!(*h, d, "result {i} differs between backends");
    }
}

#[test]
fn test_round_trip_is_exact() {
    let ctx = device_or_skip!();
    let mut rng = StdRng::seed_from_u64(1);
    for dims in [vec![1], vec![100], vec![37, 19], vec![2, 3, 4, 5]] {
        let host = random(dims, &mut rng);
        let back = upload(&ctx, &host).to_host().unwrap();
        assert_eq!(back.shape(), host.shape());
        assert_eq!(back.to_vec(), host.to_vec());
    }
}

type Binary<T> = fn(&T, &T, &mut T) -> Result<(), <T as ElementwiseArithmetic>::Error>;
type Unary<T> = fn(&T, &mut T) -> Result<(), <T as ElementwiseArithmetic>::Error>;
type Scalar<T> = fn(&T, f32, &mut T) -> Result<(), <T as ElementwiseArithmetic>::Error>;

fn elementwise_results<T: ElementwiseArithmetic>(
    x: &T,
    y: &T,
    positive: &T,
    alloc: impl Fn() -> T,
) -> Vec<T> {
    let mut results = Vec::new();

    let binary: [Binary<T>; 3] = [ops::add, ops::sub, ops::mul];
    for op in binary {
        let mut out = alloc();
        op(x, y, &mut out).unwrap();
        results.push(out);
    }
    let mut out = alloc();
    ops::div(x, positive, &mut out).unwrap();
    results.push(out);

    let scalar: [Scalar<T>; 4] = [ops::scalar_add, ops::scalar_sub, ops::scalar_mul, ops::scalar_div];
    for op in scalar {
        let mut out = alloc();
        op(x, 0.75, &mut out).unwrap();
        results.push(out);
    }

    let mut out = alloc();
    ops::scaled_add(x, y, -0.3, &mut out).unwrap();
    results.push(out);

    let unary: [Unary<T>; 5] = [
        ops::exp,
        ops::sigmoid,
        ops::sigmoid_derivative,
        ops::relu,
        ops::relu_derivative,
    ];
    for op in unary {
        let mut out = alloc();
        op(x, &mut out).unwrap();
        results.push(out);
    }
    let mut out = alloc();
    ops::log(positive, &mut out).unwrap();
    results.push(out);

    results
}

#[test]
fn test_elementwise_matches_host() {
    let ctx = device_or_skip!();
    let mut rng = StdRng::seed_from_u64(2);
    // sizes that are not multiples of the workgroup or items-per-thread
    for dims in [vec![100], vec![37, 19], vec![2561]] {
        let shape = Shape::new(dims);
        let x = random(shape.clone(), &mut rng);
        let y = random(shape.clone(), &mut rng);
        let positive = &random(shape.clone(), &mut rng) + 2.0;

        let host = elementwise_results(&x, &y, &positive, || HostTensor::new(shape.clone()));
        let device = elementwise_results(
            &upload(&ctx, &x),
            &upload(&ctx, &y),
            &upload(&ctx, &positive),
            || DeviceTensor::new(&ctx, shape.clone()).unwrap(),
        );
        assert_same(&host, &device);
    }
}

#[test]
fn test_kernel_cursor_resets_after_dispatch() {
    let ctx = device_or_skip!();
    let x = upload(&ctx, &HostTensor::new([10]));
    let mut out = DeviceTensor::new(&ctx, [10]).unwrap();
    ops::add(&x, &x, &mut out).unwrap();
    assert_eq!(ctx.kernels().kernel(KernelId::Add).cursor(), 0);
}

fn reduction_results<T: Reductions>(x: &T, y: &T) -> (f32, f32, f32, usize) {
    (
        ops::sum(x).unwrap(),
        ops::mse(x, y).unwrap(),
        ops::vecmul(x, y).unwrap(),
        ops::argmax(x).unwrap(),
    )
}

#[test]
fn test_reductions_match_host() {
    let ctx = device_or_skip!();
    let mut rng = StdRng::seed_from_u64(3);
    for n in [1, 100, 4099] {
        let x = random([n], &mut rng);
        let y = random([n], &mut rng);
        let host = reduction_results(&x, &y);
        let device = reduction_results(&upload(&ctx, &x), &upload(&ctx, &y));

        assert!(float_eq(host.0, device.0), "sum {} vs {}", host.0, device.0);
        assert!(float_eq(host.1, device.1), "mse {} vs {}", host.1, device.1);
        assert!(float_eq(host.2, device.2), "vecmul {} vs {}", host.2, device.2);
        assert_eq!(host.3, device.3);
    }
}

fn linear_algebra_results<T: LinearAlgebra>(
    m: &T,
    v: &T,
    u: &T,
    alloc: impl Fn(&[usize]) -> T,
) -> Vec<T> {
    let (rows, cols) = (m.shape()[0], m.shape()[1]);

    let mut product = alloc(&[rows]);
    ops::matvecmul(m, v, &mut product).unwrap();

    let mut transposed = alloc(&[cols]);
    ops::transposed_matvecmul(m, u, &mut transposed).unwrap();

    let mut outer = alloc(&[rows, cols]);
    ops::transposed_vecmul(u, v, &mut outer).unwrap();

    vec![product, transposed, outer]
}

#[test]
fn test_linear_algebra_matches_host() {
    let ctx = device_or_skip!();
    let mut rng = StdRng::seed_from_u64(4);
    for (rows, cols) in [(1, 1), (37, 19), (130, 70), (8, 300)] {
        let m = random([rows, cols], &mut rng);
        let v = random([cols], &mut rng);
        let u = random([rows], &mut rng);

        let host = linear_algebra_results(&m, &v, &u, |dims| HostTensor::new(dims));
        let device = linear_algebra_results(
            &upload(&ctx, &m),
            &upload(&ctx, &v),
            &upload(&ctx, &u),
            |dims| DeviceTensor::new(&ctx, dims).unwrap(),
        );
        assert_same(&host, &device);
    }
}

fn pooling_results<T: Spatial>(
    input: &T,
    gradients: &T,
    pool: PoolSize,
    alloc: impl Fn(&Shape) -> T,
) -> Vec<T> {
    let mut pooled = alloc(gradients.shape());
    ops::max_pool_2d(input, pool, &mut pooled).unwrap();

    let mut routed = alloc(input.shape());
    ops::max_pool_2d_gradients(input, gradients, pool, &mut routed).unwrap();

    vec![pooled, routed]
}

#[test]
fn test_max_pool_matches_host() {
    let ctx = device_or_skip!();
    let mut rng = StdRng::seed_from_u64(5);
    for (pool, dims) in [
        (PoolSize::new(2, 2), [1, 4, 4]),
        (PoolSize::new(2, 2), [3, 13, 10]),
        (PoolSize::new(3, 2), [2, 17, 33]),
    ] {
        let input = random(dims, &mut rng);
        let (oh, ow) = pool.output_extent(dims[1], dims[2]);
        let gradients = random([dims[0], oh, ow], &mut rng);

        let host = pooling_results(&input, &gradients, pool, |s| HostTensor::new(s.clone()));
        let device = pooling_results(
            &upload(&ctx, &input),
            &upload(&ctx, &gradients),
            pool,
            |s| DeviceTensor::new(&ctx, s.clone()).unwrap(),
        );
        assert_same(&host, &device);
    }
}

fn convolution_results<T: Spatial>(
    input: &T,
    kernels: &T,
    feature_gradients: &T,
    alloc: impl Fn(&[usize]) -> T,
) -> Vec<T> {
    let (height, width) = (input.shape()[1], input.shape()[2]);
    let kdims = kernels.shape().dims().to_vec();
    let (features, channels) = (kdims[0], kdims[1]);

    let mut convolved = alloc(&[features, height, width]);
    ops::convolution_2d(input, kernels, &mut convolved).unwrap();

    let mut correlated = alloc(&[channels, height, width]);
    ops::cross_correlation_2d(feature_gradients, kernels, &mut correlated).unwrap();

    let mut kernel_gradients = alloc(&kdims);
    ops::convolution_2d_kernel_gradients(input, feature_gradients, &mut kernel_gradients).unwrap();

    vec![convolved, correlated, kernel_gradients]
}

fn check_convolution(ctx: &Rc<ComputeContext>, rng: &mut StdRng, kw: usize, kh: usize) {
    let (features, channels, height, width) = (3, 2, 37, 19);
    let input = random([channels, height, width], rng);
    let kernels = random([features, channels, kh, kw], rng);
    let gradients = random([features, height, width], rng);

    let host = convolution_results(&input, &kernels, &gradients, |dims| HostTensor::new(dims));
    let device = convolution_results(
        &upload(ctx, &input),
        &upload(ctx, &kernels),
        &upload(ctx, &gradients),
        |dims| DeviceTensor::new(ctx, dims).unwrap(),
    );
    assert_same(&host, &device);
}

#[test]
fn test_convolution_family_matches_host() {
    let ctx = device_or_skip!();
    let mut rng = StdRng::seed_from_u64(6);
    for (kw, kh) in [(1, 1), (3, 3), (5, 3), (3, 7), (11, 11)] {
        check_convolution(&ctx, &mut rng, kw, kh);
    }
}

#[test]
fn test_identity_convolution_on_device() {
    let ctx = device_or_skip!();
    let input = HostTensor::from_vec([1, 3, 3], (1..=9).map(|v| v as f32).collect());
    let mut identity = HostTensor::new([1, 1, 3, 3]);
    identity.set(&[0, 0, 1, 1], 1.0);

    let d_input = upload(&ctx, &input);
    let d_identity = upload(&ctx, &identity);
    let mut out = DeviceTensor::new(&ctx, [1, 3, 3]).unwrap();

    ops::convolution_2d(&d_input, &d_identity, &mut out).unwrap();
    assert_eq!(out.to_vec().unwrap(), input.to_vec());

    out.clear().unwrap();
    ops::cross_correlation_2d(&d_input, &d_identity, &mut out).unwrap();
    assert_eq!(out.to_vec().unwrap(), input.to_vec());
}

#[test]
fn test_convolution_kernels_compile_once_per_extent() {
    let ctx = device_or_skip!();
    let kernels = ctx.kernels();
    let fixed = kernels.compiled_program_count();
    assert_eq!(kernels.cached_convolution_count(), 0);

    let first = kernels.convolution(3, 3).unwrap();
    let again = kernels.convolution(3, 3).unwrap();
    assert!(Rc::ptr_eq(&first, &again));
    assert_eq!(kernels.compiled_program_count(), fixed + 1);

    let wide = kernels.convolution(5, 3).unwrap();
    assert!(!Rc::ptr_eq(&first, &wide));
    assert_eq!(wide.extent(), (5, 3));
    assert_eq!(kernels.compiled_program_count(), fixed + 2);
    assert_eq!(kernels.cached_convolution_count(), 2);

    // alternating sizes must not leak state between specializations
    let mut rng = StdRng::seed_from_u64(7);
    for (kw, kh) in [(3, 3), (5, 3), (3, 3)] {
        check_convolution(&ctx, &mut rng, kw, kh);
    }
    assert_eq!(kernels.compiled_program_count(), fixed + 2);
}

#[test]
fn test_unsupported_convolution_extent() {
    let ctx = device_or_skip!();
    for (w, h) in [(4, 3), (3, 2), (13, 3)] {
        assert!(matches!(
            ctx.kernels().convolution(w, h),
            Err(DeviceError::UnsupportedKernelExtent { .. })
        ));
    }
}

#[test]
fn test_device_views_alias_parent() {
    let ctx = device_or_skip!();
    let mut rng = StdRng::seed_from_u64(8);
    let host = random([4, 6], &mut rng);
    let step = random([6], &mut rng);

    let mut expected = host.clone();
    let row = expected.sub_tensor(2).new_view([6]);
    let mut device = upload(&ctx, &host);
    let d_row = device.sub_tensor(2).new_view([6]);
    let d_step = upload(&ctx, &step);
    for _ in 0..2 {
        ops::scaled_add(&row, &step, 0.5, expected.sub_tensor_mut(2)).unwrap();
        ops::scaled_add(&d_row, &d_step, 0.5, device.sub_tensor_mut(2)).unwrap();
    }
    assert!(device.sub_tensor(2).is_view());
    assert_eq!(device.to_host().unwrap(), expected);

    // a reshape-view sees the same elements
    let flat = device.new_view([24]);
    assert_eq!(flat.to_vec().unwrap(), expected.to_vec());
    assert_eq!(device.sub_tensor(3).to_vec().unwrap(), expected[3].to_vec());
}

#[test]
fn test_in_place_update_matches_host() {
    let ctx = device_or_skip!();
    let mut rng = StdRng::seed_from_u64(10);
    let weights = random([5, 7], &mut rng);
    let grads = random([5, 7], &mut rng);
    let labels = random([5, 7], &mut rng);

    let host = weights.clone();
    let mut host_out = host.new_view([5, 7]);
    ops::scaled_add(&host, &grads, -0.1, &mut host_out).unwrap();
    ops::mul(&host, &labels, &mut host_out).unwrap();

    let device = upload(&ctx, &weights);
    let mut device_out = device.new_view([5, 7]);
    ops::scaled_add(&device, &upload(&ctx, &grads), -0.1, &mut device_out).unwrap();
    ops::mul(&device, &upload(&ctx, &labels), &mut device_out).unwrap();

    assert_ne!(host, weights);
    assert_eq!(device.to_host().unwrap(), host);
}

#[test]
fn test_reductions_reuse_scratch_storage() {
    let ctx = device_or_skip!();
    let mut rng = StdRng::seed_from_u64(11);
    let (x, y) = (random([300], &mut rng), random([300], &mut rng));
    let (dx, dy) = (upload(&ctx, &x), upload(&ctx, &y));

    let mse = ops::mse(&dx, &dy).unwrap();
    let dot = ops::vecmul(&dx, &dy).unwrap();
    assert_eq!(ctx.scratch_count(), 1);
    for _ in 0..3 {
        assert_eq!(ops::mse(&dx, &dy).unwrap(), mse);
        assert_eq!(ops::vecmul(&dx, &dy).unwrap(), dot);
    }
    assert_eq!(ctx.scratch_count(), 1);
    assert!(float_eq(mse, ops::mse(&x, &y).unwrap()));

    let m = upload(&ctx, &random([8, 300], &mut rng));
    let mut out = DeviceTensor::new(&ctx, [8]).unwrap();
    ops::matvecmul(&m, &dx, &mut out).unwrap();
    let first = out.to_vec().unwrap();
    ops::matvecmul(&m, &dx, &mut out).unwrap();
    assert_eq!(out.to_vec().unwrap(), first);
    assert_eq!(ctx.scratch_count(), 2);

    let a = ctx.scratch(1200).unwrap();
    assert!(Rc::ptr_eq(&a, &ctx.scratch(1200).unwrap()));
}

#[test]
fn test_nested_device_view_outlives_intermediate() {
    let ctx = device_or_skip!();
    let host = HostTensor::from_vec([2, 2, 3], (0..12).map(|v| v as f32).collect());
    let device = upload(&ctx, &host);

    let mut inner = {
        let middle = device.new_view([4, 3]);
        middle.sub_tensor(3).new_view([3])
    };
    assert!(inner.is_view());
    assert_eq!(inner.to_vec().unwrap(), vec![9.0, 10.0, 11.0]);

    inner.clear().unwrap();
    assert_eq!(device.sub_tensor(1).sub_tensor(1).to_vec().unwrap(), vec![0.0; 3]);
}

/// Clears the middle row of a three-row tensor whose rows each span several
/// zero chunks, then the whole tensor.
fn check_large_clear(ctx: &Rc<ComputeContext>) {
    let cols = CLEAR_CHUNK_SIZE + 300;
    let ones = vec![1.0f32; 3 * cols];
    let mut device = DeviceTensor::from_slice(ctx, [3, cols], &ones).unwrap();

    device.sub_tensor_mut(1).clear().unwrap();
    let host = device.to_vec().unwrap();
    assert!(host[..cols].iter().all(|&v| v == 1.0));
    assert!(host[cols..2 * cols].iter().all(|&v| v == 0.0));
    assert!(host[2 * cols..].iter().all(|&v| v == 1.0));

    device.clear().unwrap();
    assert!(device.to_vec().unwrap().iter().all(|&v| v == 0.0));
}

#[test]
fn test_chunked_clear_of_large_tensor() {
    let ctx = device_or_skip!();
    check_large_clear(&ctx);
}

#[test]
fn test_native_clear_of_large_tensor() {
    let config = DeviceConfig {
        native_clear: true,
        ..DeviceConfig::default()
    };
    let ctx = device_or_skip!(&config);
    check_large_clear(&ctx);
}

#[test]
fn test_pending_read_completes_after_wait() {
    let ctx = device_or_skip!();
    let device = DeviceTensor::from_slice(&ctx, [6], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let pending = device.buffer().enqueue_read(8, 12);
    assert_eq!(pending.len(), 12);

    let mut bytes = [0u8; 12];
    pending.wait(&mut bytes).unwrap();
    let floats: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    assert_eq!(floats, vec![3.0, 4.0, 5.0]);
}

#[test]
fn test_invalid_wgsl_reports_compile_error() {
    let ctx = device_or_skip!();
    let result = ctx
        .device()
        .create_program("broken", "fn main( { let x = ; }", &Defines::new());
    match result {
        Err(DeviceError::Compile { label, log }) => {
            assert_eq!(label, "broken");
            assert!(!log.is_empty());
        }
        Err(other) => panic!("expected a compile error, got {other}"),
        Ok(_) => panic!("invalid WGSL compiled"),
    }
}

#[test]
fn test_kernels_load_from_directory() {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/kernel/shaders");
    let config = DeviceConfig {
        kernel_source: KernelSource::Directory(dir),
        ..DeviceConfig::default()
    };
    let ctx = device_or_skip!(&config);
    let x = upload(&ctx, &tensor!([-1.0, 2.0, -3.0]));
    let mut out = DeviceTensor::new(&ctx, [3]).unwrap();
    ops::relu(&x, &mut out).unwrap();
    assert_eq!(out.to_vec().unwrap(), vec![0.0, 2.0, 0.0]);

    let missing = DeviceConfig {
        kernel_source: KernelSource::Directory(PathBuf::from("/nonexistent/tandem-kernels")),
        ..DeviceConfig::default()
    };
    assert!(matches!(
        ComputeContext::init(&missing),
        Err(DeviceError::Source { .. })
    ));
}

#[test]
fn test_device_assign_and_clear() {
    let ctx = device_or_skip!();
    let mut rng = StdRng::seed_from_u64(9);
    let rows = random([3, 5], &mut rng);
    let replacement = random([5], &mut rng);

    let mut device = upload(&ctx, &rows);
    device
        .sub_tensor_mut(1)
        .assign(&upload(&ctx, &replacement))
        .unwrap();
    assert_eq!(device.sub_tensor(1).to_vec().unwrap(), replacement.to_vec());
    assert_eq!(device.sub_tensor(0).to_vec().unwrap(), rows[0].to_vec());

    device.sub_tensor_mut(0).clear().unwrap();
    let host = device.to_host().unwrap();
    assert!(host[0].iter().all(|v| v == 0.0));
    assert_eq!(host[2].to_vec(), rows[2].to_vec());

    let mut owner = DeviceTensor::new(&ctx, [2]).unwrap();
    owner.assign(&device).unwrap();
    assert_eq!(owner.shape().dims(), &[3, 5]);
    assert_eq!(owner.to_host().unwrap(), host);
}
