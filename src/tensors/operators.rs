//! Arithmetic operators on host tensors.
//!
//! `&a + &b` and `&a * 2.0` allocate a new owning tensor. Compound forms
//! (`a += &b`, `a *= 0.5`) compute into a temporary and then
//! [`assign`](HostTensor::assign) it, so they write through views too.

use std::convert::Infallible;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub, SubAssign};

use super::{HostTensor, Shaped};
use crate::ops;

fn infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

macro_rules! operator {
    ($op:ident, $method:ident, $assign_op:ident, $assign_method:ident, $tensor_fn:path, $scalar_fn:path) => {
        impl $op<&HostTensor> for &HostTensor {
            type Output = HostTensor;

            fn $method(self, rhs: &HostTensor) -> HostTensor {
                let mut out = HostTensor::new(self.shape().clone());
                infallible($tensor_fn(self, rhs, &mut out));
                out
            }
        }

        impl $op<f32> for &HostTensor {
            type Output = HostTensor;

            fn $method(self, rhs: f32) -> HostTensor {
                let mut out = HostTensor::new(self.shape().clone());
                infallible($scalar_fn(self, rhs, &mut out));
                out
            }
        }

        impl $assign_op<&HostTensor> for HostTensor {
            fn $assign_method(&mut self, rhs: &HostTensor) {
                let result = $op::$method(&*self, rhs);
                self.assign(&result);
            }
        }

        impl $assign_op<f32> for HostTensor {
            fn $assign_method(&mut self, rhs: f32) {
                let result = $op::$method(&*self, rhs);
                self.assign(&result);
            }
        }
    };
}

operator!(Add, add, AddAssign, add_assign, ops::add, ops::scalar_add);
operator!(Sub, sub, SubAssign, sub_assign, ops::sub, ops::scalar_sub);
operator!(Mul, mul, MulAssign, mul_assign, ops::mul, ops::scalar_mul);
operator!(Div, div, DivAssign, div_assign, ops::div, ops::scalar_div);

#[cfg(test)]
mod tests {
    use crate::tensor;

    #[test]
    fn test_binary_and_scalar_operators() {
        let a = tensor!([1.0, 2.0, 4.0]);
        let b = tensor!([1.0, 1.0, 2.0]);
        assert_eq!((&a + &b).to_vec(), vec![2.0, 3.0, 6.0]);
        assert_eq!((&a / &b).to_vec(), vec![1.0, 2.0, 2.0]);
        assert_eq!((&a - 1.0).to_vec(), vec![0.0, 1.0, 3.0]);
        assert_eq!((&a * 0.5).to_vec(), vec![0.5, 1.0, 2.0]);
    }

    #[test]
    fn test_compound_assignment_through_view() {
        let mut m = tensor!([[1.0, 2.0], [3.0, 4.0]]);
        m[1] *= 10.0;
        m[0] += &tensor!([1.0, 1.0]);
        assert_eq!(m.to_vec(), vec![2.0, 3.0, 30.0, 40.0]);
    }
}
