//! Dense layer.

use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;

use crate::error::{Result, WaveNetError};

use super::gaussian;

#[derive(Clone, Debug)]
pub struct Linear {
    /// Weight: W ∈ R^{out × in}
    pub weight: Array2<f32>,

    /// Optional bias: b ∈ R^{out}
    pub bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn zeros(in_features: usize, out_features: usize, bias: bool) -> Self {
        Self {
            weight: Array2::zeros((out_features, in_features)),
            bias: bias.then(|| Array1::zeros(out_features)),
        }
    }

    pub fn randomize<R: Rng + ?Sized>(&mut self, std: f32, rng: &mut R) -> Result<()> {
        self.weight = gaussian(self.weight.raw_dim(), std, rng)?;
        if let Some(b) = self.bias.as_mut() {
            *b = gaussian(b.len(), std, rng)?;
        }
        Ok(())
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    /// x: [batch, in] → [batch, out]
    pub fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.in_features() {
            return Err(WaveNetError::shape(
                "linear input features",
                &[self.in_features()],
                &[x.ncols()],
            ));
        }
        let mut y = x.dot(&self.weight.t());
        if let Some(b) = &self.bias {
            y += b;
        }
        Ok(y)
    }
}
