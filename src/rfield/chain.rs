//! Append-only stage arena.

use serde::Serialize;

use crate::error::{Result, WaveNetError};

use super::affine::Affine;
use super::window::{ExtentRef, Window};

/// Index of a stage in its [`RfChain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Filter extent of a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterInfo {
    /// Filter of this many taps, centred: left wing `(n - 1) / 2`.
    Size(usize),
    /// Explicit `(left_wing, right_wing)`; filter size is `l + r + 1`.
    Wings(usize, usize),
}

impl FilterInfo {
    fn wings(self) -> Option<(usize, usize)> {
        match self {
            FilterInfo::Size(0) => None,
            FilterInfo::Size(n) => {
                let l = (n - 1) / 2;
                Some((l, n - 1 - l))
            }
            FilterInfo::Wings(l, r) => Some((l, r)),
        }
    }
}

/// Arguments of [`RfChain::build_stage`].
#[derive(Clone, Debug)]
pub struct StageSpec {
    pub filter: FilterInfo,
    pub stride: usize,
    pub padding: (usize, usize),
    pub is_downsample: bool,
    pub parent: Option<NodeId>,
    pub name: String,
}

impl StageSpec {
    /// Stride 1, no padding, downsampling, no parent.
    pub fn new(filter: FilterInfo) -> Self {
        Self {
            filter,
            stride: 1,
            padding: (0, 0),
            is_downsample: true,
            parent: None,
            name: String::new(),
        }
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn padding(mut self, left: usize, right: usize) -> Self {
        self.padding = (left, right);
        self
    }

    pub fn upsample(mut self) -> Self {
        self.is_downsample = false;
        self
    }

    pub fn parent(mut self, parent: Option<NodeId>) -> Self {
        self.parent = parent;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// One registered stage.
#[derive(Clone, Debug, Serialize)]
pub struct Stage {
    pub name: String,
    pub l_wing_sz: usize,
    pub r_wing_sz: usize,
    pub stride: usize,
    pub padding: (usize, usize),
    pub is_downsample: bool,
    pub parent: Option<NodeId>,
}

impl Stage {
    pub fn filter_sz(&self) -> usize {
        self.l_wing_sz + self.r_wing_sz + 1
    }

    /// Valid output length for `src_nv` valid inputs, or `None` if the stage
    /// has no fully supported output.
    ///
    /// Upsampling stages are modelled as zero-stuffing by `stride` followed by
    /// a valid convolution over the padded signal.
    pub fn dst_nv(&self, src_nv: usize) -> Option<usize> {
        if src_nv == 0 {
            return None;
        }
        let (pl, pr) = self.padding;
        let f = self.filter_sz();
        if self.is_downsample {
            let padded = src_nv + pl + pr;
            (padded >= f).then(|| (padded - f) / self.stride + 1)
        } else {
            let padded = (src_nv - 1) * self.stride + 1 + pl + pr;
            (padded >= f).then(|| padded - f + 1)
        }
    }

    /// Smallest `src_nv` whose `dst_nv` is at least `dst_nv`.
    pub fn min_src_nv(&self, dst_nv: usize) -> usize {
        let (pl, pr) = (self.padding.0 as i64, self.padding.1 as i64);
        let f = self.filter_sz() as i64;
        let s = self.stride as i64;
        let dst = dst_nv.max(1) as i64;
        let src = if self.is_downsample {
            (dst - 1) * s + f - pl - pr
        } else {
            let m = dst + f - 2 - pl - pr;
            if m <= 0 {
                1
            } else {
                (m + s - 1) / s + 1
            }
        };
        src.max(1) as usize
    }

    /// Maps an output index to the coordinate of its anchor tap in the input
    /// frame.
    pub(crate) fn index_map(&self) -> Affine {
        let shift = self.l_wing_sz as i64 - self.padding.0 as i64;
        let s = self.stride as i64;
        if self.is_downsample {
            Affine::new(s, 1, shift)
        } else {
            Affine::new(1, s, shift)
        }
    }
}

/// Append-only arena of stages.  Parents always precede their children.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RfChain {
    stages: Vec<Stage>,
}

impl RfChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage and return its id.
    pub fn build_stage(&mut self, spec: StageSpec) -> Result<NodeId> {
        let (l_wing_sz, r_wing_sz) = spec.filter.wings().ok_or_else(|| {
            WaveNetError::Rfield(format!("stage '{}' has an empty filter", spec.name))
        })?;
        if spec.stride == 0 {
            return Err(WaveNetError::Rfield(format!(
                "stage '{}' has zero stride",
                spec.name
            )));
        }
        if let Some(parent) = spec.parent {
            if parent.0 >= self.stages.len() {
                return Err(WaveNetError::Rfield(format!(
                    "stage '{}' names unknown parent {}",
                    spec.name, parent
                )));
            }
        }

        let id = NodeId(self.stages.len());
        tracing::debug!(
            node = id.0,
            name = %spec.name,
            l_wing = l_wing_sz,
            r_wing = r_wing_sz,
            stride = spec.stride,
            downsample = spec.is_downsample,
            "registered receptive-field stage"
        );
        self.stages.push(Stage {
            name: spec.name,
            l_wing_sz,
            r_wing_sz,
            stride: spec.stride,
            padding: spec.padding,
            is_downsample: spec.is_downsample,
            parent: spec.parent,
        });
        Ok(id)
    }

    pub fn stage(&self, id: NodeId) -> &Stage {
        &self.stages[id.0]
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Stage)> {
        self.stages.iter().enumerate().map(|(i, s)| (NodeId(i), s))
    }

    /// `id` followed by its ancestors, nearest first.
    pub fn lineage(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |n| self.stages[n.0].parent)
    }

    /// Root of the chain `id` belongs to.
    pub fn root_of(&self, id: NodeId) -> NodeId {
        self.lineage(id).last().unwrap_or(id)
    }

    /// Canonical frame of an extent: a child's `src` is its parent's `dst`.
    pub(crate) fn frame(&self, ext: ExtentRef) -> ExtentRef {
        match ext {
            ExtentRef::Src(n) => match self.stages[n.0].parent {
                Some(p) => ExtentRef::Dst(p),
                None => ext,
            },
            dst => dst,
        }
    }

    /// Map from indices of `later` to coordinates in the frame of `earlier`.
    pub(crate) fn frame_map(&self, earlier: ExtentRef, later: ExtentRef) -> Result<Affine> {
        let target = self.frame(earlier);
        let mut cur = self.frame(later);
        let mut map = Affine::identity();
        loop {
            if cur == target {
                return Ok(map);
            }
            match cur {
                ExtentRef::Dst(n) => {
                    map = self.stages[n.0].index_map().after(&map);
                    cur = self.frame(ExtentRef::Src(n));
                }
                ExtentRef::Src(_) => {
                    return Err(WaveNetError::Rfield(format!(
                        "{:?} is not upstream of {:?}",
                        earlier, later
                    )))
                }
            }
        }
    }

    /// Resolve valid lengths for `start` and everything downstream of it,
    /// given `start`'s input length.
    pub fn window_from(&self, start: NodeId, src_nv: usize) -> Result<Window<'_>> {
        let mut extents = vec![None; self.stages.len()];
        for i in start.0..self.stages.len() {
            let src = if i == start.0 {
                src_nv
            } else {
                match self.stages[i].parent.and_then(|p| extents[p.0]) {
                    Some((_, parent_dst)) => parent_dst,
                    None => continue,
                }
            };
            let stage = &self.stages[i];
            let dst = stage.dst_nv(src).ok_or_else(|| {
                WaveNetError::Rfield(format!(
                    "stage '{}' has no valid output for input length {}",
                    stage.name, src
                ))
            })?;
            extents[i] = Some((src, dst));
        }
        Ok(Window::new(self, extents))
    }

    /// Resolve the smallest window, rooted at `node`'s chain root, in which
    /// `node` yields at least `dst_nv` valid outputs.
    pub fn window_for_output(&self, node: NodeId, dst_nv: usize) -> Result<Window<'_>> {
        let mut need = dst_nv.max(1);
        let mut root = node;
        for id in self.lineage(node) {
            need = self.stages[id.0].min_src_nv(need);
            root = id;
        }
        self.window_from(root, need)
    }
}
