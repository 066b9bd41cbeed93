//! Time-jitter regularization of the local-conditioning sequence.
//!
//! Each output position `t` is replaced by source element `t-1`, `t` or `t+1`
//! with probabilities `[p, 1-2p, p]`.  The choices form a 2nd-order Markov
//! chain over the alphabet {0, 1, 2}:
//!
//! ```text
//! 0: take the previous element
//! 1: keep the element
//! 2: take the following element
//!
//! source : A B C D E F G H I J K L M
//! symbols: 1 1 2 0 2 1 1 0 2 1 2 1 1
//! output : A B D C F F G G J J L L M
//! ```
//!
//! The sequence `2, 1, 0` would read one source element three times in a
//! row, so `P(0 | prev2 = 2, prev1 = 1) = 0` and that row is renormalized.
//! The first and last positions always keep their element.

use ndarray::{Array3, ArrayView3, Axis};
use rand::distributions::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Distribution;
use rayon::prelude::*;

use crate::error::{Result, WaveNetError};

/// One jitter decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JitterStep {
    Previous,
    Keep,
    Next,
}

impl JitterStep {
    pub fn index(self) -> usize {
        match self {
            JitterStep::Previous => 0,
            JitterStep::Keep => 1,
            JitterStep::Next => 2,
        }
    }

    fn from_index(i: usize) -> Self {
        match i {
            0 => JitterStep::Previous,
            1 => JitterStep::Keep,
            _ => JitterStep::Next,
        }
    }
}

/// Conditional distributions `P(x_t | x_{t-2}, x_{t-1})`.
#[derive(Clone, Debug)]
pub struct JitterTable {
    replace_prob: f32,
    probs: [[[f32; 3]; 3]; 3],
    /// Row-major over (prev2, prev1).
    samplers: Vec<WeightedIndex<f32>>,
}

impl JitterTable {
    pub fn new(replace_prob: f32) -> Result<Self> {
        if !(0.0..=0.5).contains(&replace_prob) {
            return Err(WaveNetError::Config(format!(
                "jitter replacement probability must lie in [0, 0.5], got {}",
                replace_prob
            )));
        }
        let p = replace_prob;
        let s = 1.0 - 2.0 * p;
        let mut probs = [[[p, s, p]; 3]; 3];
        probs[2][1] = [0.0, s / (p + s), p / (p + s)];

        let samplers = probs
            .iter()
            .flat_map(|row| row.iter())
            .map(|dist| {
                WeightedIndex::new(dist.iter().copied()).map_err(|e| {
                    WaveNetError::Config(format!("bad jitter distribution {:?}: {}", dist, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            replace_prob,
            probs,
            samplers,
        })
    }

    pub fn replace_prob(&self) -> f32 {
        self.replace_prob
    }

    /// Distribution over {previous, keep, next} given the two prior steps.
    pub fn probs(&self, prev2: JitterStep, prev1: JitterStep) -> [f32; 3] {
        self.probs[prev2.index()][prev1.index()]
    }

    pub fn sample<R: Rng + ?Sized>(
        &self,
        prev2: JitterStep,
        prev1: JitterStep,
        rng: &mut R,
    ) -> JitterStep {
        let sampler = &self.samplers[prev2.index() * 3 + prev1.index()];
        JitterStep::from_index(sampler.sample(rng))
    }

    /// The `n_time + 1` steps of one sequence, drawn lazily from `rng`.
    pub fn symbols<R: Rng>(&self, n_time: usize, rng: R) -> MarkovSymbols<'_, R> {
        MarkovSymbols {
            table: self,
            rng,
            n_time,
            pos: 0,
            prev2: JitterStep::Keep,
            prev1: JitterStep::Keep,
        }
    }
}

/// Sequential Markov scan for one batch element.
///
/// Positions 0 and 1 and the final position `n_time` are forced to
/// [`JitterStep::Keep`]; positions `2..n_time` are sampled.
pub struct MarkovSymbols<'a, R> {
    table: &'a JitterTable,
    rng: R,
    n_time: usize,
    pos: usize,
    prev2: JitterStep,
    prev1: JitterStep,
}

impl<R: Rng> Iterator for MarkovSymbols<'_, R> {
    type Item = JitterStep;

    fn next(&mut self) -> Option<JitterStep> {
        if self.pos > self.n_time {
            return None;
        }
        let step = if self.pos < 2 || self.pos == self.n_time {
            JitterStep::Keep
        } else {
            self.table.sample(self.prev2, self.prev1, &mut self.rng)
        };
        self.prev2 = self.prev1;
        self.prev1 = step;
        self.pos += 1;
        Some(step)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.n_time + 1).saturating_sub(self.pos);
        (left, Some(left))
    }
}

impl<R: Rng> ExactSizeIterator for MarkovSymbols<'_, R> {}

/// Jitter layer.  Owns its RNG and the scratch index buffer.
#[derive(Clone, Debug)]
pub struct Jitter {
    table: JitterTable,
    rng: StdRng,
    /// Per batch element, `n_time + 1` absolute source indices.  Entry `t`
    /// holds `step + t - 2`; entries `1..=n_time` drive the gather.
    mindex: Option<Vec<Vec<isize>>>,
    enabled: bool,
}

impl Jitter {
    pub fn new(replace_prob: f32, seed: u64) -> Result<Self> {
        Ok(Self {
            table: JitterTable::new(replace_prob)?,
            rng: StdRng::seed_from_u64(seed),
            mindex: None,
            enabled: true,
        })
    }

    pub fn table(&self) -> &JitterTable {
        &self.table
    }

    /// A disabled jitter is the identity (evaluation mode).
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Index buffer from the most recent call.
    pub fn last_index(&self) -> Option<&[Vec<isize>]> {
        self.mindex.as_deref()
    }

    /// Regenerate the index buffer for a `(n_batch, n_time)` input,
    /// reallocating it when the shape changed.
    pub fn gen_mask(&mut self, n_batch: usize, n_time: usize) -> &[Vec<isize>] {
        let fits = matches!(
            &self.mindex,
            Some(rows) if rows.len() == n_batch && rows.iter().all(|r| r.len() == n_time + 1)
        );
        if !fits {
            tracing::debug!(n_batch, n_time, "allocating jitter index buffer");
            self.mindex = Some(vec![vec![0; n_time + 1]; n_batch]);
        }

        // Per-element RNGs are seeded in order so the draw does not depend on
        // how rayon schedules the rows.
        let seeds: Vec<u64> = (0..n_batch).map(|_| self.rng.gen()).collect();
        let table = &self.table;
        let rows = self.mindex.get_or_insert_with(Vec::new);
        rows.par_iter_mut()
            .zip(seeds.par_iter())
            .for_each(|(row, &seed)| {
                let symbols = table.symbols(n_time, StdRng::seed_from_u64(seed));
                for (t, (slot, step)) in row.iter_mut().zip(symbols).enumerate() {
                    *slot = step.index() as isize + t as isize - 2;
                }
            });
        rows
    }

    /// x: [batch, channels, time] → same shape, time axis jittered.
    pub fn forward(&mut self, x: ArrayView3<f32>) -> Result<Array3<f32>> {
        let (n_batch, _, n_time) = x.dim();
        if !self.enabled || n_time == 0 {
            return Ok(x.to_owned());
        }

        let mindex = self.gen_mask(n_batch, n_time);
        let mut y = Array3::zeros(x.raw_dim());
        for (b, row) in mindex.iter().enumerate() {
            let src: Vec<usize> = row[1..].iter().map(|&i| i as usize).collect();
            y.index_axis_mut(Axis(0), b)
                .assign(&x.index_axis(Axis(0), b).select(Axis(1), &src));
        }
        Ok(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp(n_batch: usize, n_chan: usize, n_time: usize) -> Array3<f32> {
        Array3::from_shape_fn((n_batch, n_chan, n_time), |(b, c, t)| {
            (b * 1000 + c * 100 + t) as f32
        })
    }

    #[test]
    fn test_table_shape() {
        let table = JitterTable::new(0.2).unwrap();
        use JitterStep::*;
        for a in [Previous, Keep, Next] {
            for b in [Previous, Keep, Next] {
                let probs = table.probs(a, b);
                assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
                if (a, b) == (Next, Keep) {
                    assert_eq!(probs[0], 0.0);
                    assert!((probs[1] - 0.6 / 0.8).abs() < 1e-6);
                    assert!((probs[2] - 0.2 / 0.8).abs() < 1e-6);
                } else {
                    for (got, want) in probs.iter().zip([0.2f32, 0.6, 0.2]) {
                        assert!((got - want).abs() < 1e-6);
                    }
                }
            }
        }
    }

    #[test]
    fn test_table_rejects_out_of_range() {
        assert!(JitterTable::new(-0.1).is_err());
        assert!(JitterTable::new(0.51).is_err());
        assert!(JitterTable::new(0.5).is_ok());
        assert!(JitterTable::new(0.0).is_ok());
    }

    #[test]
    fn test_symbols_length_and_boundaries() {
        let table = JitterTable::new(0.3).unwrap();
        for n_time in 0..12 {
            let steps: Vec<JitterStep> = table
                .symbols(n_time, StdRng::seed_from_u64(n_time as u64))
                .collect();
            assert_eq!(steps.len(), n_time + 1);
            assert_eq!(steps[0], JitterStep::Keep);
            assert_eq!(steps[n_time], JitterStep::Keep);
            if n_time >= 1 {
                assert_eq!(steps[1], JitterStep::Keep);
            }
        }
    }

    #[test]
    fn test_symbols_never_contain_forbidden_triple() {
        let table = JitterTable::new(0.45).unwrap();
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..200 {
            let steps: Vec<usize> = table
                .symbols(64, StdRng::seed_from_u64(rng.gen()))
                .map(JitterStep::index)
                .collect();
            for w in steps.windows(3) {
                assert_ne!(w, &[2usize, 1, 0][..], "forbidden 2,1,0 in {:?}", steps);
            }
        }
    }

    #[test]
    fn test_symbols_actually_replace() {
        let table = JitterTable::new(0.3).unwrap();
        let steps: Vec<JitterStep> = table.symbols(500, StdRng::seed_from_u64(1)).collect();
        let replaced = steps.iter().filter(|s| **s != JitterStep::Keep).count();
        // expected around 0.6 · 497
        assert!(replaced > 200 && replaced < 400, "replaced {}", replaced);
    }

    #[test]
    fn test_zero_probability_is_identity() {
        let mut jitter = Jitter::new(0.0, 9).unwrap();
        for n_time in 2..16 {
            let x = ramp(3, 2, n_time);
            let y = jitter.forward(x.view()).unwrap();
            assert_eq!(y, x);
        }
    }

    #[test]
    fn test_output_shape_and_neighbourhood() {
        let mut jitter = Jitter::new(0.4, 3).unwrap();
        let x = ramp(4, 3, 50);
        let y = jitter.forward(x.view()).unwrap();
        assert_eq!(y.dim(), x.dim());

        let mindex = jitter.last_index().unwrap();
        assert_eq!(mindex.len(), 4);
        for row in mindex {
            assert_eq!(row.len(), 51);
            assert_eq!(row[1], 0);
            assert_eq!(row[50], 49);
            for j in 0..50 {
                let src = row[j + 1];
                assert!((src - j as isize).abs() <= 1);
            }
            // no source element is read three times in a row
            for w in row[1..].windows(3) {
                assert!(!(w[0] == w[1] && w[1] == w[2]), "triple read in {:?}", row);
            }
        }

        // output columns are copies of the indexed source columns
        for b in 0..4 {
            for j in 0..50 {
                let src = mindex[b][j + 1] as usize;
                for c in 0..3 {
                    assert_eq!(y[[b, c, j]], x[[b, c, src]]);
                }
            }
        }
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let x = ramp(3, 2, 40);
        let mut a = Jitter::new(0.3, 42).unwrap();
        let mut b = Jitter::new(0.3, 42).unwrap();
        assert_eq!(a.forward(x.view()).unwrap(), b.forward(x.view()).unwrap());
        // fresh draw each call
        let first = a.last_index().unwrap().to_vec();
        a.forward(x.view()).unwrap();
        assert_ne!(first, a.last_index().unwrap().to_vec());
    }

    #[test]
    fn test_buffer_reallocates_on_shape_change() {
        let mut jitter = Jitter::new(0.2, 5).unwrap();
        jitter.forward(ramp(2, 1, 8).view()).unwrap();
        assert_eq!(jitter.last_index().unwrap()[0].len(), 9);

        let y = jitter.forward(ramp(3, 1, 12).view()).unwrap();
        assert_eq!(y.dim(), (3, 1, 12));
        let mindex = jitter.last_index().unwrap();
        assert_eq!(mindex.len(), 3);
        assert!(mindex.iter().all(|r| r.len() == 13 && r[12] == 11));
    }

    #[test]
    fn test_disabled_is_identity() {
        let mut jitter = Jitter::new(0.5, 1).unwrap();
        jitter.set_enabled(false);
        let x = ramp(2, 2, 20);
        assert_eq!(jitter.forward(x.view()).unwrap(), x);
    }

    #[test]
    fn test_short_sequences() {
        let mut jitter = Jitter::new(0.5, 2).unwrap();
        for n_time in 0..3 {
            let x = ramp(1, 1, n_time);
            assert_eq!(jitter.forward(x.view()).unwrap(), x);
        }
    }
}
