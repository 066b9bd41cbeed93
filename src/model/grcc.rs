//! Gated residual conditional convolution layer.

use ndarray::{s, Array3, ArrayView3, Axis};
use rand::Rng;

use crate::error::{Result, WaveNetError};
use crate::nn::{gated, Conv1d};
use crate::rfield::{ExtentRef, FilterInfo, NodeId, RfChain, StageSpec, Window};

use super::expect_len;

/// First and last layer of the stack a GRCC belongs to.
///
/// Layers are built one at a time, so the stack's end is only known once the
/// whole stack exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackBounds {
    Unbound,
    Bound { beg: NodeId, end: NodeId },
}

/// One dilated gated layer.  Produces a residual output aligned to its own
/// stage and a skip output aligned to the end of the stack.
#[derive(Clone, Debug)]
pub struct GatedResidualCondConv {
    pub conv_signal: Conv1d,
    pub conv_gate: Conv1d,
    pub proj_signal: Conv1d,
    pub proj_gate: Conv1d,
    pub dil_res: Conv1d,
    pub dil_skp: Conv1d,
    pub rf: NodeId,
    pub name: String,
    bounds: StackBounds,
}

impl GatedResidualCondConv {
    /// `n_cond`: conditioning channels; `n_res`: residual channels in and out;
    /// `n_dil`: gated channels; `n_skp`: skip channels.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        n_cond: usize,
        n_res: usize,
        n_dil: usize,
        n_skp: usize,
        stride: usize,
        dilation: usize,
        filter_sz: usize,
        bias: bool,
        parent: Option<NodeId>,
        name: impl Into<String>,
        chain: &mut RfChain,
    ) -> Result<Self> {
        let name = name.into();
        // the residual path is a plain slice, so it cannot follow a stride
        if stride != 1 {
            return Err(WaveNetError::Config(format!(
                "{}: gated residual layers need stride 1, got {}",
                name, stride
            )));
        }
        if filter_sz == 0 || dilation == 0 {
            return Err(WaveNetError::Config(format!(
                "{}: filter size and dilation must be positive",
                name
            )));
        }
        let rf = chain.build_stage(
            StageSpec::new(FilterInfo::Wings((filter_sz - 1) * dilation, 0))
                .stride(stride)
                .parent(parent)
                .name(name.clone()),
        )?;

        Ok(Self {
            conv_signal: Conv1d::zeros(n_res, n_dil, filter_sz, stride, dilation, bias),
            conv_gate: Conv1d::zeros(n_res, n_dil, filter_sz, stride, dilation, bias),
            proj_signal: Conv1d::pointwise(n_cond, n_dil, false),
            proj_gate: Conv1d::pointwise(n_cond, n_dil, false),
            dil_res: Conv1d::pointwise(n_dil, n_res, false),
            dil_skp: Conv1d::pointwise(n_dil, n_skp, false),
            rf,
            name,
            bounds: StackBounds::Unbound,
        })
    }

    /// Record the first and last layer of the enclosing stack.
    pub fn bind_stack_bounds(&mut self, beg: NodeId, end: NodeId) {
        self.bounds = StackBounds::Bound { beg, end };
    }

    pub fn bounds(&self) -> StackBounds {
        self.bounds
    }

    fn bound(&self) -> Result<(NodeId, NodeId)> {
        match self.bounds {
            StackBounds::Bound { beg, end } => Ok((beg, end)),
            StackBounds::Unbound => Err(WaveNetError::UnboundStackBounds {
                layer: self.name.clone(),
            }),
        }
    }

    /// Leading conditioning positions to drop so that the conditioning
    /// (aligned with the stack input) lines up with this layer's output.
    pub fn cond_lead(&self, window: &Window) -> Result<usize> {
        let (beg, _) = self.bound()?;
        Ok(window.offsets(ExtentRef::Src(beg), ExtentRef::Dst(self.rf))?.0)
    }

    /// Leading positions of this layer's output to drop so that its skip
    /// output lines up with the stack output.
    pub fn skip_lead(&self, window: &Window) -> Result<usize> {
        let (_, end) = self.bound()?;
        Ok(window.offsets(ExtentRef::Dst(self.rf), ExtentRef::Dst(end))?.0)
    }

    pub fn randomize<R: Rng + ?Sized>(&mut self, std: f32, rng: &mut R) -> Result<()> {
        for conv in [
            &mut self.conv_signal,
            &mut self.conv_gate,
            &mut self.proj_signal,
            &mut self.proj_gate,
            &mut self.dil_res,
            &mut self.dil_skp,
        ] {
            conv.randomize(std, rng)?;
        }
        Ok(())
    }

    /// x: [batch, n_res, src.nv], cond: [batch, n_cond, beg.src.nv]
    /// → (residual [batch, n_res, dst.nv], skip [batch, n_skp, end.dst.nv])
    pub fn forward(
        &self,
        x: ArrayView3<f32>,
        cond: ArrayView3<f32>,
        window: &Window,
    ) -> Result<(Array3<f32>, Array3<f32>)> {
        let (_, end) = self.bound()?;
        let cond_lead = self.cond_lead(window)?;
        let skip_lead = self.skip_lead(window)?;
        let node = window.node(self.rf)?;

        if x.len_of(Axis(0)) != cond.len_of(Axis(0)) {
            return Err(WaveNetError::shape(
                "conditioning batch",
                &[x.len_of(Axis(0))],
                &[cond.len_of(Axis(0))],
            ));
        }
        expect_len(&self.name, "input", node.src.nv, x.len_of(Axis(2)))?;
        let cond_len = cond.len_of(Axis(2));
        if cond_len < cond_lead {
            return Err(WaveNetError::Alignment {
                stage: self.name.clone(),
                what: "conditioning",
                expected: cond_lead + node.dst.nv,
                actual: cond_len,
            });
        }
        expect_len(&self.name, "conditioning", node.dst.nv, cond_len - cond_lead)?;

        let cond = cond.slice(s![.., .., cond_lead..]);
        let signal = self.conv_signal.forward(x)? + self.proj_signal.forward(cond)?;
        let gate = self.conv_gate.forward(x)? + self.proj_gate.forward(cond)?;
        let z = gated(signal, &gate);

        let skip = self.dil_skp.forward(z.slice(s![.., .., skip_lead..]))?;
        let residual = self.dil_res.forward(z.view())? + x.slice(s![.., .., node.l_wing_sz..]);

        expect_len(&self.name, "residual", node.dst.nv, residual.len_of(Axis(2)))?;
        expect_len(&self.name, "skip", window.dst(end)?.nv, skip.len_of(Axis(2)))?;
        Ok((residual, skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const N_COND: usize = 3;
    const N_RES: usize = 4;
    const N_DIL: usize = 6;
    const N_SKP: usize = 5;

    fn stack(dilations: &[usize], chain: &mut RfChain) -> Vec<GatedResidualCondConv> {
        let mut parent = None;
        let mut layers: Vec<GatedResidualCondConv> = dilations
            .iter()
            .enumerate()
            .map(|(i, &d)| {
                let layer = GatedResidualCondConv::new(
                    N_COND,
                    N_RES,
                    N_DIL,
                    N_SKP,
                    1,
                    d,
                    2,
                    true,
                    parent,
                    format!("grcc{}", i),
                    chain,
                )
                .unwrap();
                parent = Some(layer.rf);
                layer
            })
            .collect();
        let beg = layers[0].rf;
        let end = layers[layers.len() - 1].rf;
        for layer in &mut layers {
            layer.bind_stack_bounds(beg, end);
        }
        layers
    }

    fn ramp(shape: (usize, usize, usize)) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(b, c, t)| (b * 100 + c * 10 + t) as f32 * 0.01)
    }

    #[test]
    fn test_unbound_layer_errors() {
        let mut chain = RfChain::new();
        let layer =
            GatedResidualCondConv::new(N_COND, N_RES, N_DIL, N_SKP, 1, 1, 2, true, None, "solo", &mut chain)
                .unwrap();
        assert_eq!(layer.bounds(), StackBounds::Unbound);
        let window = chain.window_from(layer.rf, 8).unwrap();
        let x = Array3::<f32>::zeros((1, N_RES, 8));
        let cond = Array3::<f32>::zeros((1, N_COND, 8));
        assert!(matches!(
            layer.forward(x.view(), cond.view(), &window),
            Err(WaveNetError::UnboundStackBounds { .. })
        ));
        assert!(layer.cond_lead(&window).is_err());
        assert!(layer.skip_lead(&window).is_err());
    }

    #[test]
    fn test_rejects_stride() {
        let mut chain = RfChain::new();
        assert!(
            GatedResidualCondConv::new(N_COND, N_RES, N_DIL, N_SKP, 2, 1, 2, true, None, "s2", &mut chain)
                .is_err()
        );
    }

    #[test]
    fn test_leads_follow_dilations() {
        let mut chain = RfChain::new();
        let layers = stack(&[1, 2, 4], &mut chain);
        let window = chain.window_from(layers[0].rf, 20).unwrap();
        let cond_leads: Vec<usize> = layers.iter().map(|l| l.cond_lead(&window).unwrap()).collect();
        let skip_leads: Vec<usize> = layers.iter().map(|l| l.skip_lead(&window).unwrap()).collect();
        assert_eq!(cond_leads, vec![1, 3, 7]);
        assert_eq!(skip_leads, vec![6, 4, 0]);
    }

    #[test]
    fn test_zero_weights_pass_trimmed_residual() {
        let mut chain = RfChain::new();
        let layers = stack(&[1, 2], &mut chain);
        let window = chain.window_from(layers[0].rf, 9).unwrap();
        let x = ramp((2, N_RES, 9));
        let cond = ramp((2, N_COND, 9));

        let (res, skip) = layers[0].forward(x.view(), cond.view(), &window).unwrap();
        assert_eq!(res, x.slice(s![.., .., 1..]));
        assert_eq!(skip.dim(), (2, N_SKP, 6));
        assert!(skip.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_stack_lengths() {
        let mut chain = RfChain::new();
        let mut layers = stack(&[1, 2, 4, 1], &mut chain);
        let mut rng = StdRng::seed_from_u64(11);
        for layer in &mut layers {
            layer.randomize(0.2, &mut rng).unwrap();
        }
        let t = 16;
        let window = chain.window_from(layers[0].rf, t).unwrap();
        let cond = ramp((1, N_COND, t));
        let mut sig = ramp((1, N_RES, t));
        let mut expected = t;
        for (layer, d) in layers.iter().zip([1usize, 2, 4, 1]) {
            let (res, skip) = layer.forward(sig.view(), cond.view(), &window).unwrap();
            expected -= d;
            assert_eq!(res.dim(), (1, N_RES, expected));
            assert_eq!(skip.dim(), (1, N_SKP, t - 8));
            assert!(res.iter().all(|v| v.is_finite()));
            sig = res;
        }
    }

    #[test]
    fn test_skip_reads_the_stack_tail() {
        let mut chain = RfChain::new();
        let mut layers = stack(&[1, 2], &mut chain);
        let mut rng = StdRng::seed_from_u64(2);
        for layer in &mut layers {
            layer.randomize(0.3, &mut rng).unwrap();
        }
        let window = chain.window_from(layers[0].rf, 10).unwrap();
        let x = ramp((1, N_RES, 10));
        let cond = ramp((1, N_COND, 10));
        let (_, skip) = layers[0].forward(x.view(), cond.view(), &window).unwrap();

        // recompute by hand: z over the whole layer output, then keep its tail
        let c = cond.slice(s![.., .., 1..]);
        let l = &layers[0];
        let z = gated(
            l.conv_signal.forward(x.view()).unwrap() + l.proj_signal.forward(c).unwrap(),
            &(l.conv_gate.forward(x.view()).unwrap() + l.proj_gate.forward(c).unwrap()),
        );
        let full = l.dil_skp.forward(z.view()).unwrap();
        let tail = full.slice(s![.., .., 2..]);
        for (a, b) in skip.iter().zip(tail.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_misaligned_conditioning_errors() {
        let mut chain = RfChain::new();
        let layers = stack(&[1, 2], &mut chain);
        let window = chain.window_from(layers[0].rf, 10).unwrap();
        let x = Array3::<f32>::zeros((1, N_RES, 9));
        let short = Array3::<f32>::zeros((1, N_COND, 9));
        assert!(matches!(
            layers[1].forward(x.view(), short.view(), &window),
            Err(WaveNetError::Alignment { .. })
        ));
        let wrong_x = Array3::<f32>::zeros((1, N_RES, 8));
        let cond = Array3::<f32>::zeros((1, N_COND, 10));
        assert!(matches!(
            layers[1].forward(wrong_x.view(), cond.view(), &window),
            Err(WaveNetError::Alignment { .. })
        ));
    }
}
