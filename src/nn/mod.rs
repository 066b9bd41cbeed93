//! CPU tensor ops over `(batch, channels, time)` arrays.
//!
//! Only what the forward pass needs: unpadded strided/dilated 1-D
//! convolution, cropped transposed convolution, a dense layer and
//! elementwise activations.  Batch elements are independent and are
//! evaluated in parallel with rayon.

pub mod activation;
pub mod conv;
pub mod linear;

pub use activation::{gated, log_softmax, relu, sigmoid};
pub use conv::{Conv1d, ConvTranspose1d};
pub use linear::Linear;

use ndarray::{Array, Dimension, ShapeBuilder};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{Result, WaveNetError};

/// Gaussian-filled array, used to exercise the forward pass with non-zero
/// weights.
pub(crate) fn gaussian<D, Sh, R>(shape: Sh, std: f32, rng: &mut R) -> Result<Array<f32, D>>
where
    D: Dimension,
    Sh: ShapeBuilder<Dim = D>,
    R: Rng + ?Sized,
{
    let dist = Normal::new(0.0f32, std)
        .map_err(|e| WaveNetError::Config(format!("invalid weight std {}: {}", std, e)))?;
    Ok(Array::from_shape_fn(shape, |_| dist.sample(&mut *rng)))
}
