//! Merges upsampled local conditioning with speaker identity.

use ndarray::{concatenate, Array2, Array3, ArrayView3, Axis};
use rand::Rng;

use crate::error::{Result, WaveNetError};
use crate::nn::Linear;

/// Speaker one-hot → linear embedding, broadcast over time and appended to
/// the local-conditioning channels.  No receptive-field effect.
#[derive(Clone, Debug)]
pub struct Conditioning {
    pub speaker_embedding: Linear,

    /// Identity matrix; row `i` is speaker `i`'s one-hot vector.
    eye: Array2<f32>,
}

impl Conditioning {
    pub fn new(n_speakers: usize, n_embed: usize, bias: bool) -> Self {
        Self {
            speaker_embedding: Linear::zeros(n_speakers, n_embed, bias),
            eye: Array2::eye(n_speakers),
        }
    }

    pub fn randomize<R: Rng + ?Sized>(&mut self, std: f32, rng: &mut R) -> Result<()> {
        self.speaker_embedding.randomize(std, rng)
    }

    pub fn n_speakers(&self) -> usize {
        self.eye.nrows()
    }

    pub fn n_embed(&self) -> usize {
        self.speaker_embedding.out_features()
    }

    /// speaker_inds: [batch] → [batch, n_speakers]
    pub fn one_hot(&self, speaker_inds: &[usize]) -> Result<Array2<f32>> {
        if let Some(&bad) = speaker_inds.iter().find(|&&i| i >= self.n_speakers()) {
            return Err(WaveNetError::Config(format!(
                "speaker index {} out of range for {} speakers",
                bad,
                self.n_speakers()
            )));
        }
        Ok(self.eye.select(Axis(0), speaker_inds))
    }

    /// lc: [batch, I, T], speaker_inds: [batch] → [batch, I + G, T]
    pub fn forward(&self, lc: ArrayView3<f32>, speaker_inds: &[usize]) -> Result<Array3<f32>> {
        let (n_batch, _, n_time) = lc.dim();
        if speaker_inds.len() != n_batch {
            return Err(WaveNetError::shape(
                "speaker indices",
                &[n_batch],
                &[speaker_inds.len()],
            ));
        }
        let one_hot = self.one_hot(speaker_inds)?;
        let gc = self.speaker_embedding.forward(one_hot.view())?;
        let gc_view = gc.view().insert_axis(Axis(2));
        let gc_rep = gc_view
            .broadcast((n_batch, self.n_embed(), n_time))
            .ok_or_else(|| {
                WaveNetError::shape("speaker embedding", &[n_batch, self.n_embed(), 1], gc_view.shape())
            })?;
        concatenate(Axis(1), &[lc.view(), gc_rep]).map_err(|e| WaveNetError::Shape {
            what: format!("conditioning concat: {}", e),
            expected: Vec::new(),
            actual: lc.shape().to_vec(),
        })
    }
}
