//! Model-wide defaults and the model configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaveNetError};

/// Taps in each dilated kernel.
pub const FILTER_SZ: usize = 2;

/// Filter size of the post-jitter conditioning convolution.
pub const POST_JITTER_FILTER_SZ: usize = 3;

/// Local-conditioning input channels.
pub const N_LC_IN: usize = 64;

/// Local-conditioning channels after the post-jitter convolution.
pub const N_LC_OUT: usize = 128;

/// Residual channels.
pub const N_RES: usize = 64;

/// Dilated (gated) channels.
pub const N_DIL: usize = 128;

/// Skip channels.
pub const N_SKP: usize = 64;

/// Post-processing channels.
pub const N_POST: usize = 128;

/// Quantization levels (8-bit mu-law).
pub const N_QUANT: usize = 256;

/// Repeated dilation blocks.
pub const N_BLOCKS: usize = 2;

/// Layers per block; dilations 1, 2, ..., 2^(n-1).
pub const N_BLOCK_LAYERS: usize = 10;

/// Jitter replacement probability.
pub const JITTER_PROB: f32 = 0.12;

/// Speakers in the one-hot identity table.
pub const N_SPEAKERS: usize = 40;

/// Speaker embedding width.
pub const N_GLOBAL_EMBED: usize = 10;

/// WaveNet configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveNetConfig {
    /// Taps in each dilated kernel.
    pub filter_sz: usize,

    /// Local-conditioning input channels.
    pub n_lc_in: usize,

    /// Local-conditioning channels after the post-jitter convolution.
    pub n_lc_out: usize,

    /// Transposed-convolution filter size per upsampling stage.
    pub lc_upsample_filt_sizes: Vec<usize>,

    /// Stride per upsampling stage.  The product is the number of waveform
    /// samples per conditioning vector.
    pub lc_upsample_strides: Vec<usize>,

    /// Residual channels.
    pub n_res: usize,

    /// Dilated (gated) channels.
    pub n_dil: usize,

    /// Skip channels.
    pub n_skp: usize,

    /// Post-processing channels.
    pub n_post: usize,

    /// Quantization levels of the waveform alphabet.
    pub n_quant: usize,

    /// Repeated dilation blocks.
    pub n_blocks: usize,

    /// Layers per block; dilations 1, 2, ..., 2^(n-1).
    pub n_block_layers: usize,

    /// Jitter replacement probability, in [0, 0.5].
    pub jitter_prob: f32,

    /// Speakers in the one-hot identity table.
    pub n_speakers: usize,

    /// Speaker embedding width.
    pub n_global_embed: usize,

    /// Whether convolutions carry a bias.  The speaker embedding always does.
    pub bias: bool,
}

impl Default for WaveNetConfig {
    fn default() -> Self {
        Self {
            filter_sz: FILTER_SZ,
            n_lc_in: N_LC_IN,
            n_lc_out: N_LC_OUT,
            lc_upsample_filt_sizes: vec![10, 8, 8, 4],
            lc_upsample_strides: vec![5, 4, 4, 2],
            n_res: N_RES,
            n_dil: N_DIL,
            n_skp: N_SKP,
            n_post: N_POST,
            n_quant: N_QUANT,
            n_blocks: N_BLOCKS,
            n_block_layers: N_BLOCK_LAYERS,
            jitter_prob: JITTER_PROB,
            n_speakers: N_SPEAKERS,
            n_global_embed: N_GLOBAL_EMBED,
            bias: true,
        }
    }
}

impl WaveNetConfig {
    /// Load and validate a JSON config; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Conditioning channels seen by each GRCC layer.
    pub fn n_cond(&self) -> usize {
        self.n_lc_out + self.n_global_embed
    }

    /// Waveform samples per conditioning vector.
    pub fn lc_input_stepsize(&self) -> usize {
        self.lc_upsample_strides.iter().product()
    }

    /// Total gated residual layers.
    pub fn n_layers(&self) -> usize {
        self.n_blocks * self.n_block_layers
    }

    /// Reject zero sizes, mismatched upsampling lists, strides above their
    /// filter size and jitter probabilities outside [0, 0.5].
    pub fn validate(&self) -> Result<()> {
        let channels = [
            ("n_lc_in", self.n_lc_in),
            ("n_lc_out", self.n_lc_out),
            ("n_res", self.n_res),
            ("n_dil", self.n_dil),
            ("n_skp", self.n_skp),
            ("n_post", self.n_post),
            ("n_quant", self.n_quant),
            ("n_speakers", self.n_speakers),
            ("n_global_embed", self.n_global_embed),
            ("filter_sz", self.filter_sz),
        ];
        if let Some((name, _)) = channels.iter().find(|(_, v)| *v == 0) {
            return Err(WaveNetError::Config(format!("{} must be positive", name)));
        }
        if self.n_layers() == 0 {
            return Err(WaveNetError::Config(
                "n_blocks and n_block_layers must be positive".into(),
            ));
        }
        if self.lc_upsample_filt_sizes.len() != self.lc_upsample_strides.len() {
            return Err(WaveNetError::Config(format!(
                "{} upsampling filter sizes for {} strides",
                self.lc_upsample_filt_sizes.len(),
                self.lc_upsample_strides.len()
            )));
        }
        for (&f, &s) in self
            .lc_upsample_filt_sizes
            .iter()
            .zip(self.lc_upsample_strides.iter())
        {
            if s == 0 || f < s {
                return Err(WaveNetError::Config(format!(
                    "upsampling needs 0 < stride <= filter size, got stride {} filter {}",
                    s, f
                )));
            }
        }
        if !(0.0..=0.5).contains(&self.jitter_prob) {
            return Err(WaveNetError::Config(format!(
                "jitter_prob must lie in [0, 0.5], got {}",
                self.jitter_prob
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = WaveNetConfig::default();
        config.validate().unwrap();
        assert_eq!(config.lc_input_stepsize(), 160);
        assert_eq!(config.n_layers(), 20);
        assert_eq!(config.n_cond(), N_LC_OUT + N_GLOBAL_EMBED);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: WaveNetConfig =
            serde_json::from_str(r#"{ "n_blocks": 1, "jitter_prob": 0.0 }"#).unwrap();
        assert_eq!(config.n_blocks, 1);
        assert_eq!(config.jitter_prob, 0.0);
        assert_eq!(config.n_quant, N_QUANT);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_jitter = WaveNetConfig {
            jitter_prob: 0.6,
            ..Default::default()
        };
        assert!(bad_jitter.validate().is_err());

        let bad_upsample = WaveNetConfig {
            lc_upsample_filt_sizes: vec![3],
            lc_upsample_strides: vec![4],
            ..Default::default()
        };
        assert!(bad_upsample.validate().is_err());

        let mismatched = WaveNetConfig {
            lc_upsample_filt_sizes: vec![4, 4],
            lc_upsample_strides: vec![2],
            ..Default::default()
        };
        assert!(mismatched.validate().is_err());

        let empty_stack = WaveNetConfig {
            n_block_layers: 0,
            ..Default::default()
        };
        assert!(empty_stack.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip_via_file() {
        let path = std::env::temp_dir().join(format!("wavenet-config-{}.json", std::process::id()));
        let config = WaveNetConfig {
            n_res: 16,
            ..Default::default()
        };
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();
        let loaded = WaveNetConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }
}
