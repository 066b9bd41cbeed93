//! Error types for the WaveNet core.
//!
//! Every variant signals a construction or caller bug: a tensor whose extent
//! disagrees with the receptive-field chain, a layer used before its stack
//! bounds were bound, or an invalid configuration.  None of them are meant to
//! be recovered from inside the crate.

use thiserror::Error;

/// Result type for WaveNet operations.
pub type Result<T> = std::result::Result<T, WaveNetError>;

/// Error type for WaveNet operations.
#[derive(Error, Debug)]
pub enum WaveNetError {
    /// Time extent disagrees with the receptive-field prediction.
    #[error("alignment violation in {stage}: {what} expected {expected}, got {actual}")]
    Alignment {
        /// Stage name.
        stage: String,
        /// Which extent was checked.
        what: &'static str,
        /// Length predicted by the receptive-field chain.
        expected: usize,
        /// Length actually observed.
        actual: usize,
    },

    /// Non-time shape mismatch (channels, batch, weights).
    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    Shape {
        /// What was being checked.
        what: String,
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// A GRCC layer was used before `bind_stack_bounds`.
    #[error("uninitialized stack bounds in {layer}: call bind_stack_bounds first")]
    UnboundStackBounds {
        /// Layer name.
        layer: String,
    },

    /// Invalid receptive-field geometry or offset query.
    #[error("receptive field error: {0}")]
    Rfield(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WaveNetError {
    pub(crate) fn shape(what: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        WaveNetError::Shape {
            what: what.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
