//! Model components: jitter, upsampling, conditioning, the gated residual
//! layer and the orchestrating [`WaveNet`].

pub mod conditioning;
pub mod grcc;
pub mod jitter;
pub mod upsampling;
pub mod wavenet;

pub use conditioning::Conditioning;
pub use grcc::{GatedResidualCondConv, StackBounds};
pub use jitter::{Jitter, JitterStep, JitterTable, MarkovSymbols};
pub use upsampling::Upsampling;
pub use wavenet::{ForwardTrace, WaveNet};

use crate::error::{Result, WaveNetError};

/// Fail with an alignment error unless `actual == expected`.
pub(crate) fn expect_len(stage: &str, what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(WaveNetError::Alignment {
            stage: stage.to_string(),
            what,
            expected,
            actual,
        })
    }
}
