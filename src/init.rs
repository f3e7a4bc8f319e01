//! Tensor initializers.
//!
//! ```
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//! use tandem::init::Initializer;
//! use tandem::tensors::Shaped;
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let w = Initializer::Glorot { fan_in: 4 }.tensor([4, 3], &mut rng).unwrap();
//! assert_eq!(w.size(), 12);
//! ```

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::InitError;
use crate::shape::Shape;
use crate::tensors::HostTensor;

/// How to fill a freshly allocated weight tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initializer {
    Zero,
    One,
    /// Samples from `N(mean, stddev²)`.
    Normal { mean: f32, stddev: f32 },
    /// Normal with mean 0 and `stddev = sqrt(2 / fan_in)`.
    Glorot { fan_in: usize },
}

impl Initializer {
    fn distribution(&self) -> Result<Option<Normal<f32>>, InitError> {
        match *self {
            Initializer::Zero | Initializer::One => Ok(None),
            Initializer::Normal { mean, stddev } => Ok(Some(Normal::new(mean, stddev)?)),
            Initializer::Glorot { fan_in: 0 } => Err(InitError::ZeroFanIn),
            Initializer::Glorot { fan_in } => {
                Ok(Some(Normal::new(0.0, (2.0 / fan_in as f32).sqrt())?))
            }
        }
    }

    /// Overwrites every element of `tensor`, views included.
    pub fn apply<R: Rng + ?Sized>(&self, tensor: &mut HostTensor, rng: &mut R) -> Result<(), InitError> {
        let distribution = self.distribution()?;
        let mut data = tensor.data_mut();
        match (self, distribution) {
            (_, Some(normal)) => data.iter_mut().for_each(|v| *v = normal.sample(rng)),
            (Initializer::One, None) => data.fill(1.0),
            _ => data.fill(0.0),
        }
        Ok(())
    }

    /// Allocates a tensor of `shape` and initializes it.
    pub fn tensor<R: Rng + ?Sized>(
        &self,
        shape: impl Into<Shape>,
        rng: &mut R,
    ) -> Result<HostTensor, InitError> {
        let mut tensor = HostTensor::new(shape);
        self.apply(&mut tensor, rng)?;
        Ok(tensor)
    }

    /// Like [`tensor`](Self::tensor) but driven by the thread-local RNG.
    pub fn random_tensor(&self, shape: impl Into<Shape>) -> Result<HostTensor, InitError> {
        self.tensor(shape, &mut rand::rng())
    }
}
