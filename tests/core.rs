use tandem::ops::{self, Activation, PoolSize};
use tandem::shape::Shape;
use tandem::tensor;
use tandem::tensors::{HostTensor, Shaped};

#[test]
fn test_shape_properties() {
    let s = Shape::new([2, 3, 4]);
    assert_eq!(s.rank(), 3);
    assert_eq!(s.total_element_count(), 24);

    let row = s.element_shape();
    assert_eq!(row.rank(), 2);
    assert_eq!(row.dims(), &[3, 4]);

    assert_eq!(s, Shape::from(vec![2, 3, 4]));
    assert_ne!(s, Shape::new([2, 4, 3]));
}

#[test]
fn test_elementwise_arithmetic() {
    let x = tensor!([1.0, -2.0, 4.0]);
    let y = tensor!([2.0, 2.0, 8.0]);
    let mut out = HostTensor::new([3]);

    ops::add(&x, &y, &mut out).unwrap();
    assert_eq!(out.to_vec(), vec![3.0, 0.0, 12.0]);
    ops::div(&x, &y, &mut out).unwrap();
    assert_eq!(out.to_vec(), vec![0.5, -1.0, 0.5]);
    ops::scalar_sub(&x, 1.0, &mut out).unwrap();
    assert_eq!(out.to_vec(), vec![0.0, -3.0, 3.0]);
    ops::scaled_add(&x, &y, 0.5, &mut out).unwrap();
    assert_eq!(out.to_vec(), vec![2.0, -1.0, 8.0]);
}

#[test]
fn test_in_place_update_through_sub_tensor() {
    let mut weights = tensor!([[1.0, 1.0], [2.0, 2.0]]);
    let step = tensor!([0.5, -0.5]);
    let row = weights.sub_tensor(1).new_view([2]);
    for _ in 0..2 {
        ops::scaled_add(&row, &step, 2.0, weights.sub_tensor_mut(1)).unwrap();
    }
    assert_eq!(weights.to_vec(), vec![1.0, 1.0, 4.0, 0.0]);
    assert_eq!(weights[1].to_vec(), row.to_vec());
}

#[test]
fn test_in_place_update_through_view() {
    // w = w - lr * g and x = x * label, with the output aliasing the input
    let w = tensor!([1.0, 2.0]);
    let mut wv = w.new_view([2]);
    ops::scaled_add(&w, &tensor!([2.0, -2.0]), -0.5, &mut wv).unwrap();
    assert_eq!(w.to_vec(), vec![0.0, 3.0]);

    let x = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    let mut xv = x.new_view([2, 2]);
    ops::mul(&x, &tensor!([[0.0, 1.0], [1.0, 0.5]]), &mut xv).unwrap();
    assert_eq!(x.to_vec(), vec![0.0, 2.0, 3.0, 2.0]);

    let mut flat = x.new_view([4]);
    ops::relu(&tensor!([-1.0, 1.0, -1.0, 1.0]), &mut flat).unwrap();
    ops::scalar_add(&x.new_view([4]), 1.0, &mut flat).unwrap();
    assert_eq!(x.to_vec(), vec![1.0, 2.0, 1.0, 2.0]);
}

#[test]
fn test_matvecmul_into_aliased_vector() {
    let m = tensor!([[0.0, 1.0], [1.0, 0.0]]);
    let v = tensor!([3.0, 5.0]);
    let mut out = v.new_view([2]);
    ops::matvecmul(&m, &v, &mut out).unwrap();
    assert_eq!(v.to_vec(), vec![5.0, 3.0]);
}

#[test]
fn test_activations() {
    let x = tensor!([-1.0, 0.0, 2.0]);
    let mut out = HostTensor::new([3]);

    Activation::Relu.apply(&x, &mut out).unwrap();
    assert_eq!(out.to_vec(), vec![0.0, 0.0, 2.0]);
    Activation::Relu.derivative(&x, &mut out).unwrap();
    assert_eq!(out.to_vec(), vec![0.0, 1.0, 1.0]);

    Activation::Sigmoid.apply(&x, &mut out).unwrap();
    assert_eq!(out, tensor!([0.268_941_4, 0.5, 0.880_797_1]));
    Activation::Sigmoid.derivative(&x, &mut out).unwrap();
    assert_eq!(out, tensor!([0.196_611_9, 0.25, 0.104_993_6]));
}

#[test]
fn test_reductions() {
    let x = tensor!([1.0, 5.0, 5.0, -2.0]);
    let y = tensor!([1.0, 3.0, 5.0, 0.0]);
    assert_eq!(ops::sum(&x).unwrap(), 9.0);
    assert_eq!(ops::mse(&x, &y).unwrap(), 8.0);
    assert_eq!(ops::argmax(&x).unwrap(), 1);
    assert_eq!(ops::vecmul(&x, &y).unwrap(), 41.0);
}

#[test]
fn test_matrix_vector_products() {
    let m = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);

    let mut out = HostTensor::new([2]);
    ops::matvecmul(&m, &tensor!([1.0, 0.0, -1.0]), &mut out).unwrap();
    assert_eq!(out.to_vec(), vec![-2.0, -2.0]);

    let mut out = HostTensor::new([3]);
    ops::transposed_matvecmul(&m, &tensor!([1.0, 1.0]), &mut out).unwrap();
    assert_eq!(out.to_vec(), vec![5.0, 7.0, 9.0]);

    let mut outer = HostTensor::new([2, 3]);
    ops::transposed_vecmul(&tensor!([1.0, 2.0]), &tensor!([1.0, 0.0, 3.0]), &mut outer).unwrap();
    assert_eq!(outer, tensor!([[1.0, 0.0, 3.0], [2.0, 0.0, 6.0]]));
}

#[test]
#[should_panic]
fn test_matvecmul_shape_mismatch_panics() {
    let m = HostTensor::new([2, 3]);
    let v = HostTensor::new([2]);
    let mut out = HostTensor::new([2]);
    let _ = ops::matvecmul(&m, &v, &mut out);
}

#[test]
fn test_max_pool_4x4() {
    let input = tensor!([[
        [1.0, 2.0, 5.0, 0.0],
        [3.0, 0.0, 1.0, 4.0],
        [0.0, 9.0, 2.0, 2.0],
        [7.0, 1.0, 3.0, 8.0]
    ]]);
    let pool = PoolSize::new(2, 2);

    let mut pooled = HostTensor::new([1, 2, 2]);
    ops::max_pool_2d(&input, pool, &mut pooled).unwrap();
    assert_eq!(pooled.to_vec(), vec![3.0, 5.0, 9.0, 8.0]);

    let ones = tensor!([[[1.0, 1.0], [1.0, 1.0]]]);
    let mut routed = HostTensor::new([1, 4, 4]);
    ops::max_pool_2d_gradients(&input, &ones, pool, &mut routed).unwrap();
    assert_eq!(
        routed.to_vec(),
        vec![
            0.0, 0.0, 1.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ]
    );
}

#[test]
fn test_identity_convolution() {
    let input = tensor!([[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]]);
    let identity = tensor!([[[[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]]]]);

    let mut out = HostTensor::new([1, 3, 3]);
    ops::convolution_2d(&input, &identity, &mut out).unwrap();
    assert_eq!(out.to_vec(), input.to_vec());

    out.clear();
    ops::cross_correlation_2d(&input, &identity, &mut out).unwrap();
    assert_eq!(out.to_vec(), input.to_vec());
}

#[test]
fn test_convolution_sums_channels() {
    // Two channels, one feature: the output is the sum of both planes.
    let input = tensor!([[[1.0, 2.0], [3.0, 4.0]], [[10.0, 20.0], [30.0, 40.0]]]);
    let mut kernels = HostTensor::new([1, 2, 1, 1]);
    kernels.data_mut().fill(1.0);

    let mut out = HostTensor::new([1, 2, 2]);
    ops::convolution_2d(&input, &kernels, &mut out).unwrap();
    assert_eq!(out.to_vec(), vec![11.0, 22.0, 33.0, 44.0]);
}

/// `Σ gradients · conv(input, kernels)`, which is linear in `kernels`.
fn weighted_output(input: &HostTensor, kernels: &HostTensor, gradients: &HostTensor) -> f32 {
    let mut out = HostTensor::new(gradients.shape().clone());
    ops::convolution_2d(input, kernels, &mut out).unwrap();
    ops::vecmul(&out.new_view([out.size()]), &gradients.new_view([gradients.size()])).unwrap()
}

#[test]
fn test_kernel_gradients_match_perturbation() {
    let mut next = 0.0f32;
    let mut counter = || {
        next += 1.0;
        (next * 0.37).sin()
    };
    let input = HostTensor::with_generator([2, 4, 5], &mut counter);
    let gradients = HostTensor::with_generator([3, 4, 5], &mut counter);
    let kernels = HostTensor::with_generator([3, 2, 3, 3], &mut counter);

    let mut computed = HostTensor::new([3, 2, 3, 3]);
    ops::convolution_2d_kernel_gradients(&input, &gradients, &mut computed).unwrap();

    let base = weighted_output(&input, &kernels, &gradients);
    let mut expected = Vec::with_capacity(kernels.size());
    for i in 0..kernels.size() {
        let mut bumped = kernels.clone();
        bumped.data_mut()[i] += 1.0;
        expected.push(weighted_output(&input, &bumped, &gradients) - base);
    }
    assert_eq!(computed, HostTensor::from_vec([3, 2, 3, 3], expected));
}

#[test]
fn test_operators() {
    let a = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    let b = tensor!([[1.0, 1.0], [1.0, 1.0]]);
    let mut c = &(&a + &b) * 2.0;
    assert_eq!(c.to_vec(), vec![4.0, 6.0, 8.0, 10.0]);

    c -= &b;
    c /= 2.0;
    assert_eq!(c.to_vec(), vec![1.5, 2.5, 3.5, 4.5]);
}
