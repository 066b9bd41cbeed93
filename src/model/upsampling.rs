//! Transposed-convolution upsampling of the conditioning sequence.

use ndarray::{Array3, ArrayView3, Axis};
use rand::Rng;

use crate::error::{Result, WaveNetError};
use crate::nn::ConvTranspose1d;
use crate::rfield::{FilterInfo, NodeId, RfChain, StageSpec, Window};

use super::expect_len;

/// One upsampling stage.
///
/// The transposed convolution crops `filter_sz - stride` positions from each
/// end; in the receptive-field chain this is the same as zero-stuffing by
/// `stride`, padding `stride - 1` on each end and running a valid convolution.
#[derive(Clone, Debug)]
pub struct Upsampling {
    pub tconv: ConvTranspose1d,
    pub rf: NodeId,
    pub name: String,
}

impl Upsampling {
    pub fn new(
        n_chan: usize,
        filter_sz: usize,
        stride: usize,
        parent: Option<NodeId>,
        name: impl Into<String>,
        chain: &mut RfChain,
    ) -> Result<Self> {
        let name = name.into();
        if stride == 0 || filter_sz < stride {
            return Err(WaveNetError::Config(format!(
                "{}: upsampling needs 0 < stride <= filter size",
                name
            )));
        }
        let end_padding = stride - 1;
        let rf = chain.build_stage(
            StageSpec::new(FilterInfo::Size(filter_sz))
                .stride(stride)
                .padding(end_padding, end_padding)
                .upsample()
                .parent(parent)
                .name(name.clone()),
        )?;
        Ok(Self {
            tconv: ConvTranspose1d::zeros(n_chan, n_chan, filter_sz, stride, filter_sz - stride, true),
            rf,
            name,
        })
    }

    pub fn randomize<R: Rng + ?Sized>(&mut self, std: f32, rng: &mut R) -> Result<()> {
        self.tconv.randomize(std, rng)
    }

    /// lc: [batch, channels, S] → [batch, channels, T]
    pub fn forward(&self, lc: ArrayView3<f32>, window: &Window) -> Result<Array3<f32>> {
        let node = window.node(self.rf)?;
        expect_len(&self.name, "input", node.src.nv, lc.len_of(Axis(2)))?;
        let lc_up = self.tconv.forward(lc)?;
        expect_len(&self.name, "output", node.dst.nv, lc_up.len_of(Axis(2)))?;
        Ok(lc_up)
    }
}
