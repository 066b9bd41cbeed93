//! 1-D convolution and transposed convolution over `(batch, channels, time)`.
//!
//! Neither op pads its input.  Alignment is the caller's business: the
//! receptive-field chain predicts every output length, and callers check it.

use ndarray::{s, stack, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::Rng;
use rayon::prelude::*;

use crate::error::{Result, WaveNetError};

use super::gaussian;

/// Unpadded strided, dilated 1-D convolution.
#[derive(Clone, Debug)]
pub struct Conv1d {
    /// Kernel: [out_channels, in_channels, kernel_size]
    pub weight: Array3<f32>,

    /// Optional bias: [out_channels]
    pub bias: Option<Array1<f32>>,

    pub stride: usize,
    pub dilation: usize,
}

impl Conv1d {
    /// Zero-initialised convolution.
    pub fn zeros(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        dilation: usize,
        bias: bool,
    ) -> Self {
        Self {
            weight: Array3::zeros((out_channels, in_channels, kernel_size)),
            bias: bias.then(|| Array1::zeros(out_channels)),
            stride,
            dilation,
        }
    }

    /// 1×1 convolution (channel projection).
    pub fn pointwise(in_channels: usize, out_channels: usize, bias: bool) -> Self {
        Self::zeros(in_channels, out_channels, 1, 1, 1, bias)
    }

    /// Build from explicit weights.
    pub fn from_parts(
        weight: Array3<f32>,
        bias: Option<Array1<f32>>,
        stride: usize,
        dilation: usize,
    ) -> Result<Self> {
        let (out_ch, _, k) = weight.dim();
        if k == 0 || stride == 0 || dilation == 0 {
            return Err(WaveNetError::Config(format!(
                "conv1d needs positive kernel/stride/dilation, got {}/{}/{}",
                k, stride, dilation
            )));
        }
        if let Some(b) = &bias {
            if b.len() != out_ch {
                return Err(WaveNetError::shape("conv1d bias", &[out_ch], &[b.len()]));
            }
        }
        Ok(Self {
            weight,
            bias,
            stride,
            dilation,
        })
    }

    /// Re-draw all parameters from N(0, std²).
    pub fn randomize<R: Rng + ?Sized>(&mut self, std: f32, rng: &mut R) -> Result<()> {
        self.weight = gaussian(self.weight.raw_dim(), std, rng)?;
        if let Some(b) = self.bias.as_mut() {
            *b = gaussian(b.len(), std, rng)?;
        }
        Ok(())
    }

    pub fn in_channels(&self) -> usize {
        self.weight.dim().1
    }

    pub fn out_channels(&self) -> usize {
        self.weight.dim().0
    }

    pub fn kernel_size(&self) -> usize {
        self.weight.dim().2
    }

    /// Output length for `t_in` input positions, or `None` if the dilated
    /// kernel does not fit.
    pub fn output_len(&self, t_in: usize) -> Option<usize> {
        let span = self.dilation * (self.kernel_size() - 1) + 1;
        (t_in >= span).then(|| (t_in - span) / self.stride + 1)
    }

    /// x: [batch, in_channels, time] → [batch, out_channels, time']
    pub fn forward(&self, x: ArrayView3<f32>) -> Result<Array3<f32>> {
        let (batch, in_ch, t_in) = x.dim();
        if in_ch != self.in_channels() {
            return Err(WaveNetError::shape(
                "conv1d input channels",
                &[self.in_channels()],
                &[in_ch],
            ));
        }
        let t_out = self.output_len(t_in).ok_or_else(|| {
            WaveNetError::shape(
                "conv1d input time (minimum)",
                &[self.dilation * (self.kernel_size() - 1) + 1],
                &[t_in],
            )
        })?;

        let outputs: Vec<Array2<f32>> = (0..batch)
            .into_par_iter()
            .map(|b| self.forward_single(x.index_axis(Axis(0), b), t_out))
            .collect();
        stack_batch(outputs, (batch, self.out_channels(), t_out))
    }

    fn forward_single(&self, x: ArrayView2<f32>, t_out: usize) -> Array2<f32> {
        let mut out = Array2::zeros((self.out_channels(), t_out));
        let span = (t_out - 1) * self.stride + 1;
        for k in 0..self.kernel_size() {
            let off = k * self.dilation;
            let taps = x.slice(s![.., off..off + span; self.stride as isize]);
            let w_k = self.weight.slice(s![.., .., k]);
            out += &w_k.dot(&taps);
        }
        if let Some(b) = &self.bias {
            out += &b.view().insert_axis(Axis(1));
        }
        out
    }
}

/// Transposed 1-D convolution, cropping `padding` positions from both ends.
#[derive(Clone, Debug)]
pub struct ConvTranspose1d {
    /// Kernel: [in_channels, out_channels, kernel_size]
    pub weight: Array3<f32>,

    /// Optional bias: [out_channels]
    pub bias: Option<Array1<f32>>,

    pub stride: usize,
    pub padding: usize,
}

impl ConvTranspose1d {
    pub fn zeros(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        bias: bool,
    ) -> Self {
        Self {
            weight: Array3::zeros((in_channels, out_channels, kernel_size)),
            bias: bias.then(|| Array1::zeros(out_channels)),
            stride,
            padding,
        }
    }

    pub fn from_parts(
        weight: Array3<f32>,
        bias: Option<Array1<f32>>,
        stride: usize,
        padding: usize,
    ) -> Result<Self> {
        let (_, out_ch, k) = weight.dim();
        if k == 0 || stride == 0 {
            return Err(WaveNetError::Config(format!(
                "transposed conv needs positive kernel/stride, got {}/{}",
                k, stride
            )));
        }
        if let Some(b) = &bias {
            if b.len() != out_ch {
                return Err(WaveNetError::shape("tconv bias", &[out_ch], &[b.len()]));
            }
        }
        Ok(Self {
            weight,
            bias,
            stride,
            padding,
        })
    }

    pub fn randomize<R: Rng + ?Sized>(&mut self, std: f32, rng: &mut R) -> Result<()> {
        self.weight = gaussian(self.weight.raw_dim(), std, rng)?;
        if let Some(b) = self.bias.as_mut() {
            *b = gaussian(b.len(), std, rng)?;
        }
        Ok(())
    }

    pub fn in_channels(&self) -> usize {
        self.weight.dim().0
    }

    pub fn out_channels(&self) -> usize {
        self.weight.dim().1
    }

    pub fn kernel_size(&self) -> usize {
        self.weight.dim().2
    }

    /// `(t_in - 1)·stride + kernel - 2·padding`
    pub fn output_len(&self, t_in: usize) -> Option<usize> {
        if t_in == 0 {
            return None;
        }
        let full = (t_in - 1) * self.stride + self.kernel_size();
        (full > 2 * self.padding).then(|| full - 2 * self.padding)
    }

    /// x: [batch, in_channels, time] → [batch, out_channels, time']
    pub fn forward(&self, x: ArrayView3<f32>) -> Result<Array3<f32>> {
        let (batch, in_ch, t_in) = x.dim();
        if in_ch != self.in_channels() {
            return Err(WaveNetError::shape(
                "tconv input channels",
                &[self.in_channels()],
                &[in_ch],
            ));
        }
        let t_out = self.output_len(t_in).ok_or_else(|| {
            WaveNetError::shape("tconv input time (minimum)", &[1], &[t_in])
        })?;

        let outputs: Vec<Array2<f32>> = (0..batch)
            .into_par_iter()
            .map(|b| self.forward_single(x.index_axis(Axis(0), b), t_out))
            .collect();
        stack_batch(outputs, (batch, self.out_channels(), t_out))
    }

    fn forward_single(&self, x: ArrayView2<f32>, t_out: usize) -> Array2<f32> {
        let t_in = x.dim().1;
        let span = (t_in - 1) * self.stride + 1;
        let mut full = Array2::zeros((self.out_channels(), span + self.kernel_size() - 1));
        for k in 0..self.kernel_size() {
            let w_k = self.weight.slice(s![.., .., k]);
            let contrib = w_k.t().dot(&x);
            let mut dst = full.slice_mut(s![.., k..k + span; self.stride as isize]);
            dst += &contrib;
        }
        let mut out = full
            .slice(s![.., self.padding..self.padding + t_out])
            .to_owned();
        if let Some(b) = &self.bias {
            out += &b.view().insert_axis(Axis(1));
        }
        out
    }
}

fn stack_batch(outputs: Vec<Array2<f32>>, shape: (usize, usize, usize)) -> Result<Array3<f32>> {
    if outputs.is_empty() {
        return Ok(Array3::zeros(shape));
    }
    let views: Vec<ArrayView2<f32>> = outputs.iter().map(|o| o.view()).collect();
    stack(Axis(0), &views).map_err(|e| WaveNetError::Shape {
        what: format!("batch stack: {}", e),
        expected: vec![shape.0, shape.1, shape.2],
        actual: Vec::new(),
    })
}
