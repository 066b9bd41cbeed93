//! Elementwise activations.

use ndarray::{Array, Array3, Axis, Dimension, Zip};

#[inline]
fn sigmoid_scalar(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Element-wise sigmoid: 1 / (1 + exp(-x))
pub fn sigmoid<D: Dimension>(x: &Array<f32, D>) -> Array<f32, D> {
    x.mapv(sigmoid_scalar)
}

pub fn relu<D: Dimension>(x: &Array<f32, D>) -> Array<f32, D> {
    x.mapv(|v| v.max(0.0))
}

/// Gated activation `tanh(signal) ⊙ sigmoid(gate)`, computed in place.
pub fn gated<D: Dimension>(mut signal: Array<f32, D>, gate: &Array<f32, D>) -> Array<f32, D> {
    Zip::from(&mut signal)
        .and(gate)
        .for_each(|s, &g| *s = s.tanh() * sigmoid_scalar(g));
    signal
}

/// Log-softmax over the class axis of `(batch, classes, time)` logits.
///
/// The forward pass returns raw logits; this is for inference-time callers.
pub fn log_softmax(logits: &Array3<f32>) -> Array3<f32> {
    let mut out = logits.clone();
    for mut lane in out.lanes_mut(Axis(1)) {
        let max = lane.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let lse = max + lane.mapv(|v| (v - max).exp()).sum().ln();
        lane.mapv_inplace(|v| v - lse);
    }
    out
}
