//! # WAVENET
//!
//! Forward core of a conditional WaveNet: a stack of dilated, gated residual
//! convolutions conditioned on an upsampled local-conditioning sequence and a
//! speaker embedding, producing per-timestep logits over a quantized
//! waveform alphabet.
//!
//! ## Components
//!
//! 1. **rfield**: Receptive-field chain: valid lengths and offsets between
//!    any two stages, so every layer's input and output line up
//! 2. **Jitter**: Time-axis regularizer: each conditioning step is replaced
//!    by a neighbour under a constrained 2nd-order Markov chain
//! 3. **Upsampling**: Transposed convolutions from conditioning rate to
//!    waveform rate
//! 4. **Conditioning**: Speaker embedding broadcast over time and appended
//!    to the conditioning channels
//! 5. **GRCC**: Gated residual conditional convolution with skip output
//!
//! ## Tensor layout
//!
//! Every sequence tensor is `(batch, channels, time)`.  No layer pads: time
//! shrinks through the stack exactly as the receptive-field chain predicts.

pub mod config;
pub mod error;
pub mod model;
pub mod nn;
pub mod rfield;

pub use config::WaveNetConfig;
pub use error::{Result, WaveNetError};
pub use model::{ForwardTrace, WaveNet};
