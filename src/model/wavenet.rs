//! Full forward pass: jitter → conditioning conv → upsampling → speaker
//! fusion → base projection → gated residual stack → post-processing.

use ndarray::{Array3, ArrayView3, Axis};
use rand::Rng;
use tracing::info;

use crate::config::{WaveNetConfig, POST_JITTER_FILTER_SZ};
use crate::error::{Result, WaveNetError};
use crate::nn::{relu, Conv1d};
use crate::rfield::{FilterInfo, NodeId, RfChain, StageSpec, Window};

use super::{expect_len, Conditioning, GatedResidualCondConv, Jitter, Upsampling};

/// Intermediate results of one forward pass.
#[derive(Clone, Debug)]
pub struct ForwardTrace {
    /// Fused conditioning: [batch, n_lc_out + n_global_embed, L]
    pub cond: Array3<f32>,

    /// Skip output of every layer, each [batch, n_skp, T_out]
    pub skips: Vec<Array3<f32>>,

    pub skip_sum: Array3<f32>,

    /// Unnormalised class scores: [batch, n_quant, T_out]
    pub logits: Array3<f32>,
}

#[derive(Clone, Debug)]
pub struct WaveNet {
    config: WaveNetConfig,
    chain: RfChain,

    pub jitter: Jitter,
    pub lc_conv: Conv1d,
    lc_rf: NodeId,
    pub lc_upsample: Vec<Upsampling>,

    /// Bounds of the waveform input that matches the conditioning.
    last_upsample_rf: NodeId,

    pub cond: Conditioning,
    pub base_layer: Conv1d,
    pub conv_layers: Vec<GatedResidualCondConv>,
    pub post1: Conv1d,
    pub post2: Conv1d,

    /// Last stage of the gated residual stack.
    rf: NodeId,
}

impl WaveNet {
    /// Build a stand-alone model with its own receptive-field chain.
    /// Weights start at zero; `seed` drives the jitter.
    pub fn new(config: WaveNetConfig, seed: u64) -> Result<Self> {
        Self::build(config, RfChain::new(), None, seed)
    }

    /// Append the model's stages to `chain` after `parent`, so that its
    /// conditioning input is the output of an upstream stage.
    pub fn with_parent(config: WaveNetConfig, chain: RfChain, parent: NodeId, seed: u64) -> Result<Self> {
        if parent.index() >= chain.len() {
            return Err(WaveNetError::Rfield(format!(
                "parent {} is not in a chain of {} stages",
                parent,
                chain.len()
            )));
        }
        Self::build(config, chain, Some(parent), seed)
    }

    fn build(config: WaveNetConfig, mut chain: RfChain, parent: Option<NodeId>, seed: u64) -> Result<Self> {
        config.validate()?;
        let jitter = Jitter::new(config.jitter_prob, seed)?;

        let lc_conv = Conv1d::zeros(
            config.n_lc_in,
            config.n_lc_out,
            POST_JITTER_FILTER_SZ,
            1,
            1,
            config.bias,
        );
        let lc_rf = chain.build_stage(
            StageSpec::new(FilterInfo::Size(POST_JITTER_FILTER_SZ))
                .parent(parent)
                .name(format!("LC_Conv(filter_size={})", POST_JITTER_FILTER_SZ)),
        )?;

        let mut parent_rf = lc_rf;
        let mut lc_upsample = Vec::with_capacity(config.lc_upsample_strides.len());
        for (i, (&filt_sz, &stride)) in config
            .lc_upsample_filt_sizes
            .iter()
            .zip(config.lc_upsample_strides.iter())
            .enumerate()
        {
            let name = format!("Upsampling_{}(filter_sz={}, stride={})", i, filt_sz, stride);
            let up = Upsampling::new(config.n_lc_out, filt_sz, stride, Some(parent_rf), name, &mut chain)?;
            parent_rf = up.rf;
            lc_upsample.push(up);
        }
        let last_upsample_rf = parent_rf;

        // the speaker embedding always carries a bias
        let cond = Conditioning::new(config.n_speakers, config.n_global_embed, true);
        let base_layer = Conv1d::pointwise(config.n_quant, config.n_res, config.bias);

        let mut conv_layers = Vec::with_capacity(config.n_layers());
        for b in 0..config.n_blocks {
            for bl in 0..config.n_block_layers {
                let dil = 1usize << bl;
                let grc = GatedResidualCondConv::new(
                    config.n_cond(),
                    config.n_res,
                    config.n_dil,
                    config.n_skp,
                    1,
                    dil,
                    config.filter_sz,
                    config.bias,
                    Some(parent_rf),
                    format!("GRCC_{},{}(dil={})", b, bl, dil),
                    &mut chain,
                )?;
                parent_rf = grc.rf;
                conv_layers.push(grc);
            }
        }

        let (beg, end) = match (conv_layers.first(), conv_layers.last()) {
            (Some(first), Some(last)) => (first.rf, last.rf),
            _ => return Err(WaveNetError::Config("empty residual stack".into())),
        };
        for layer in &mut conv_layers {
            layer.bind_stack_bounds(beg, end);
        }

        let post1 = Conv1d::pointwise(config.n_skp, config.n_post, config.bias);
        let post2 = Conv1d::pointwise(config.n_post, config.n_quant, config.bias);

        let model = Self {
            config,
            chain,
            jitter,
            lc_conv,
            lc_rf,
            lc_upsample,
            last_upsample_rf,
            cond,
            base_layer,
            conv_layers,
            post1,
            post2,
            rf: end,
        };
        info!(
            layers = model.conv_layers.len(),
            stages = model.chain.len(),
            receptive_field = model.receptive_field(),
            lc_input_stepsize = model.lc_input_stepsize(),
            "built WaveNet"
        );
        Ok(model)
    }

    /// Gaussian draw for every weight, for exercising the forward pass.
    pub fn randomize<R: Rng + ?Sized>(&mut self, std: f32, rng: &mut R) -> Result<()> {
        self.lc_conv.randomize(std, rng)?;
        for up in &mut self.lc_upsample {
            up.randomize(std, rng)?;
        }
        self.cond.randomize(std, rng)?;
        self.base_layer.randomize(std, rng)?;
        for layer in &mut self.conv_layers {
            layer.randomize(std, rng)?;
        }
        self.post1.randomize(std, rng)?;
        self.post2.randomize(std, rng)
    }

    /// Jitter is only applied in training mode.
    pub fn set_training(&mut self, training: bool) {
        self.jitter.set_enabled(training);
    }

    pub fn config(&self) -> &WaveNetConfig {
        &self.config
    }

    pub fn chain(&self) -> &RfChain {
        &self.chain
    }

    /// Last stage of the gated residual stack.
    pub fn rf(&self) -> NodeId {
        self.rf
    }

    /// Stage whose input is the sparse conditioning sequence.
    pub fn lc_rf(&self) -> NodeId {
        self.lc_rf
    }

    pub fn last_upsample_rf(&self) -> NodeId {
        self.last_upsample_rf
    }

    /// First and last stage of the gated residual stack.
    pub fn stack_bounds(&self) -> (NodeId, NodeId) {
        (self.conv_layers[0].rf, self.rf)
    }

    /// Waveform samples per conditioning vector.
    pub fn lc_input_stepsize(&self) -> usize {
        self.config.lc_input_stepsize()
    }

    /// Waveform samples seen by one output of the gated residual stack.
    pub fn receptive_field(&self) -> usize {
        1 + self
            .conv_layers
            .iter()
            .map(|l| {
                let stage = self.chain.stage(l.rf);
                stage.l_wing_sz + stage.r_wing_sz
            })
            .sum::<usize>()
    }

    /// Valid lengths for a sparse conditioning input of `n_lc` steps.
    pub fn window_for_conditioning(&self, n_lc: usize) -> Result<Window<'_>> {
        self.chain.window_from(self.lc_rf, n_lc)
    }

    /// Smallest window whose output has at least `t_out` positions.
    pub fn window_for_output(&self, t_out: usize) -> Result<Window<'_>> {
        let mut need = t_out.max(1);
        for id in self.chain.lineage(self.rf) {
            need = self.chain.stage(id).min_src_nv(need);
            if id == self.lc_rf {
                break;
            }
        }
        self.window_for_conditioning(need)
    }

    /// wav_onehot: [B, Q, L], lc_sparse: [B, n_lc_in, T2], speaker_inds: [B]
    /// → logits [B, Q, T_out]
    pub fn forward(
        &mut self,
        wav_onehot: ArrayView3<f32>,
        lc_sparse: ArrayView3<f32>,
        speaker_inds: &[usize],
    ) -> Result<Array3<f32>> {
        Ok(self.forward_trace(wav_onehot, lc_sparse, speaker_inds)?.logits)
    }

    pub fn forward_trace(
        &mut self,
        wav_onehot: ArrayView3<f32>,
        lc_sparse: ArrayView3<f32>,
        speaker_inds: &[usize],
    ) -> Result<ForwardTrace> {
        let n_batch = wav_onehot.len_of(Axis(0));
        if lc_sparse.len_of(Axis(0)) != n_batch {
            return Err(WaveNetError::shape(
                "conditioning batch",
                &[n_batch],
                &[lc_sparse.len_of(Axis(0))],
            ));
        }

        let lc = self.jitter.forward(lc_sparse)?;
        let window = self.window_for_conditioning(lc.len_of(Axis(2)))?;

        let mut lc = self.lc_conv.forward(lc.view())?;
        let lc_node = window.node(self.lc_rf)?;
        expect_len(lc_node.name, "output", lc_node.dst.nv, lc.len_of(Axis(2)))?;
        for up in &self.lc_upsample {
            lc = up.forward(lc.view(), &window)?;
        }
        let cond = self.cond.forward(lc.view(), speaker_inds)?;

        let (beg, _) = self.stack_bounds();
        expect_len("WaveNet", "waveform", window.src(beg)?.nv, wav_onehot.len_of(Axis(2)))?;

        let mut sig = self.base_layer.forward(wav_onehot)?;
        let mut skips = Vec::with_capacity(self.conv_layers.len());
        let mut skip_sum: Option<Array3<f32>> = None;
        for layer in &self.conv_layers {
            let (res, skp) = layer.forward(sig.view(), cond.view(), &window)?;
            skip_sum = Some(match skip_sum {
                None => skp.clone(),
                Some(acc) => acc + &skp,
            });
            skips.push(skp);
            sig = res;
        }
        let skip_sum = skip_sum.ok_or_else(|| WaveNetError::Config("empty residual stack".into()))?;

        let post1 = self.post1.forward(relu(&skip_sum).view())?;
        let logits = self.post2.forward(relu(&post1).view())?;

        Ok(ForwardTrace {
            cond,
            skips,
            skip_sum,
            logits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> WaveNetConfig {
        WaveNetConfig {
            filter_sz: 2,
            n_lc_in: 3,
            n_lc_out: 4,
            lc_upsample_filt_sizes: vec![4],
            lc_upsample_strides: vec![2],
            n_res: 4,
            n_dil: 6,
            n_skp: 5,
            n_post: 6,
            n_quant: 8,
            n_blocks: 1,
            n_block_layers: 2,
            jitter_prob: 0.12,
            n_speakers: 3,
            n_global_embed: 2,
            bias: true,
        }
    }

    fn seeded_model(config: WaveNetConfig) -> WaveNet {
        let mut model = WaveNet::new(config, 7).unwrap();
        model.randomize(0.3, &mut StdRng::seed_from_u64(7)).unwrap();
        model
    }

    fn one_hot_wav(n_batch: usize, n_quant: usize, len: usize) -> Array3<f32> {
        Array3::from_shape_fn((n_batch, n_quant, len), |(b, q, t)| {
            if (b * 3 + t * 5) % n_quant == q {
                1.0
            } else {
                0.0
            }
        })
    }

    fn lc_input(n_batch: usize, n_lc: usize, len: usize) -> Array3<f32> {
        Array3::from_shape_fn((n_batch, n_lc, len), |(b, c, t)| ((b + c + t) as f32 * 0.37).sin())
    }

    #[test]
    fn test_output_length_is_input_minus_receptive_field() {
        let mut model = seeded_model(small_config());
        // lc_conv: 10 → 8, upsample ×2: 8 → 14, stack: 14 → 11
        let lc = lc_input(2, 3, 10);
        let wav = one_hot_wav(2, 8, 14);
        let logits = model.forward(wav.view(), lc.view(), &[0, 2]).unwrap();
        assert_eq!(logits.dim(), (2, 8, 11));
        assert_eq!(model.receptive_field(), 4);
        assert!(logits.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_skip_sum_is_sum_of_layer_skips() {
        let mut model = seeded_model(small_config());
        let lc = lc_input(1, 3, 10);
        let wav = one_hot_wav(1, 8, 14);
        let trace = model.forward_trace(wav.view(), lc.view(), &[1]).unwrap();
        assert_eq!(trace.skips.len(), 2);
        let sum = &trace.skips[0] + &trace.skips[1];
        assert_eq!(sum, trace.skip_sum);
    }

    #[test]
    fn test_speaker_channels_are_constant_over_time() {
        let mut model = seeded_model(small_config());
        let lc = lc_input(2, 3, 10);
        let wav = one_hot_wav(2, 8, 14);
        let trace = model.forward_trace(wav.view(), lc.view(), &[0, 1]).unwrap();
        assert_eq!(trace.cond.dim(), (2, 6, 14));
        for b in 0..2 {
            for g in 4..6 {
                let first = trace.cond[[b, g, 0]];
                assert!(trace.cond.slice(s![b, g, ..]).iter().all(|&v| v == first));
            }
        }
        assert_ne!(
            trace.cond.slice(s![0, 4.., 0]),
            trace.cond.slice(s![1, 4.., 0])
        );
    }

    #[test]
    fn test_speaker_embedding_keeps_bias_without_conv_bias() {
        let config = WaveNetConfig {
            bias: false,
            ..small_config()
        };
        let model = WaveNet::new(config, 0).unwrap();
        assert!(model.cond.speaker_embedding.bias.is_some());
        assert!(model.base_layer.bias.is_none());
        assert!(model.post2.bias.is_none());
    }

    #[test]
    fn test_wrong_waveform_length_errors() {
        let mut model = seeded_model(small_config());
        let lc = lc_input(1, 3, 10);
        let wav = one_hot_wav(1, 8, 15);
        assert!(matches!(
            model.forward(wav.view(), lc.view(), &[0]),
            Err(WaveNetError::Alignment { .. })
        ));
    }

    #[test]
    fn test_batch_mismatch_errors() {
        let mut model = seeded_model(small_config());
        let lc = lc_input(2, 3, 10);
        let wav = one_hot_wav(1, 8, 14);
        assert!(model.forward(wav.view(), lc.view(), &[0]).is_err());
    }

    #[test]
    fn test_block_dilations_restart() {
        let config = WaveNetConfig {
            n_blocks: 2,
            n_block_layers: 3,
            ..small_config()
        };
        let model = WaveNet::new(config, 0).unwrap();
        let dils: Vec<usize> = model.conv_layers.iter().map(|l| l.conv_signal.dilation).collect();
        assert_eq!(dils, vec![1, 2, 4, 1, 2, 4]);
        assert_eq!(model.conv_layers[4].name, "GRCC_1,1(dil=2)");
        assert_eq!(model.receptive_field(), 15);
        let (beg, end) = model.stack_bounds();
        for layer in &model.conv_layers {
            assert_eq!(layer.bounds(), crate::model::StackBounds::Bound { beg, end });
        }
    }

    #[test]
    fn test_window_for_output_is_minimal() {
        let model = WaveNet::new(small_config(), 0).unwrap();
        let window = model.window_for_output(11).unwrap();
        assert_eq!(window.src(model.lc_rf()).unwrap().nv, 10);
        assert_eq!(window.dst(model.rf()).unwrap().nv, 11);
        assert_eq!(window.dst(model.last_upsample_rf()).unwrap().nv, 14);
    }

    #[test]
    fn test_eval_mode_is_deterministic() {
        let mut model = seeded_model(small_config());
        model.set_training(false);
        assert!(!model.jitter.is_enabled());
        let lc = lc_input(1, 3, 10);
        let wav = one_hot_wav(1, 8, 14);
        let a = model.forward(wav.view(), lc.view(), &[2]).unwrap();
        let b = model.forward(wav.view(), lc.view(), &[2]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_with_parent_links_into_larger_chain() {
        let mut chain = RfChain::new();
        let encoder = chain
            .build_stage(StageSpec::new(FilterInfo::Size(1)).name("encoder"))
            .unwrap();
        let mut model = WaveNet::with_parent(small_config(), chain, encoder, 3).unwrap();
        assert_eq!(model.chain().len(), 1 + 1 + 1 + 2);
        assert_eq!(model.chain().root_of(model.rf()), encoder);
        assert_eq!(model.chain().stage(model.lc_rf()).parent, Some(encoder));

        model.randomize(0.2, &mut StdRng::seed_from_u64(1)).unwrap();
        let lc = lc_input(1, 3, 10);
        let wav = one_hot_wav(1, 8, 14);
        let logits = model.forward(wav.view(), lc.view(), &[0]).unwrap();
        assert_eq!(logits.dim(), (1, 8, 11));

        let bad_parent = NodeId(9);
        assert!(WaveNet::with_parent(small_config(), RfChain::new(), bad_parent, 0).is_err());
    }
}
