//! Valid lengths of a chain for one input length, and offsets between extents.

use serde::Serialize;

use crate::error::{Result, WaveNetError};

use super::chain::{NodeId, RfChain};

/// Input or output extent of a resolved stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Extent {
    /// Number of valid positions.
    pub nv: usize,
}

/// Names one side of a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtentRef {
    Src(NodeId),
    Dst(NodeId),
}

impl ExtentRef {
    pub fn node(self) -> NodeId {
        match self {
            ExtentRef::Src(n) | ExtentRef::Dst(n) => n,
        }
    }
}

/// A resolved stage.
#[derive(Clone, Copy, Debug)]
pub struct NodeView<'a> {
    pub src: Extent,
    pub dst: Extent,
    pub l_wing_sz: usize,
    pub r_wing_sz: usize,
    pub name: &'a str,
}

/// Valid lengths of every stage reachable from a starting stage.
#[derive(Clone, Debug)]
pub struct Window<'a> {
    chain: &'a RfChain,
    extents: Vec<Option<(usize, usize)>>,
}

impl<'a> Window<'a> {
    pub(crate) fn new(chain: &'a RfChain, extents: Vec<Option<(usize, usize)>>) -> Self {
        Self { chain, extents }
    }

    pub fn chain(&self) -> &'a RfChain {
        self.chain
    }

    fn resolved(&self, id: NodeId) -> Result<(usize, usize)> {
        self.extents.get(id.0).copied().flatten().ok_or_else(|| {
            WaveNetError::Rfield(format!("stage {} is not resolved in this window", id))
        })
    }

    pub fn node(&self, id: NodeId) -> Result<NodeView<'a>> {
        let (src, dst) = self.resolved(id)?;
        let stage = self.chain.stage(id);
        Ok(NodeView {
            src: Extent { nv: src },
            dst: Extent { nv: dst },
            l_wing_sz: stage.l_wing_sz,
            r_wing_sz: stage.r_wing_sz,
            name: &stage.name,
        })
    }

    pub fn src(&self, id: NodeId) -> Result<Extent> {
        Ok(Extent {
            nv: self.resolved(id)?.0,
        })
    }

    pub fn dst(&self, id: NodeId) -> Result<Extent> {
        Ok(Extent {
            nv: self.resolved(id)?.1,
        })
    }

    pub fn nv(&self, ext: ExtentRef) -> Result<usize> {
        match ext {
            ExtentRef::Src(n) => self.src(n).map(|e| e.nv),
            ExtentRef::Dst(n) => self.dst(n).map(|e| e.nv),
        }
    }

    /// `(left, right)`: positions of `earlier` before the first and after the
    /// last position of `later`, measured in `earlier`'s frame.
    ///
    /// `later` must be downstream of `earlier` on the same chain, and both
    /// offsets must come out as non-negative integers.
    pub fn offsets(&self, earlier: ExtentRef, later: ExtentRef) -> Result<(usize, usize)> {
        let map = self.chain.frame_map(earlier, later)?;
        let nv_a = self.nv(earlier)? as i64;
        let nv_b = self.nv(later)? as i64;

        let first = map.apply_exact(0);
        let last = map.apply_exact(nv_b - 1);
        let (first, last) = match (first, last) {
            (Some(f), Some(l)) => (f, l),
            _ => {
                return Err(WaveNetError::Rfield(format!(
                    "{:?} does not land on whole positions of {:?}",
                    later, earlier
                )))
            }
        };

        let left = first;
        let right = (nv_a - 1) - last;
        if left < 0 || right < 0 {
            return Err(WaveNetError::Rfield(format!(
                "{:?} extends outside {:?} (left {}, right {})",
                later, earlier, left, right
            )));
        }
        Ok((left as usize, right as usize))
    }
}
