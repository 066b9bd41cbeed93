//! Receptive-field bookkeeping.
//!
//! Every convolution-like stage of the model is registered in an append-only
//! [`RfChain`].  A stage records its filter wings, stride, explicit padding and
//! the index of its parent stage, so the chain from any stage back to the root
//! is a walk over strictly decreasing indices.
//!
//! Valid lengths (`nv`) are not part of the geometry.  They are resolved per
//! input length into a [`Window`], which then answers length and offset
//! queries:
//!
//! ```text
//! chain  : root ── lc_conv ── up_0 ── up_1 ── grcc_0 ── grcc_1 ── ...
//! window : src.nv / dst.nv for each stage, given the root's src.nv
//! offset : leading / trailing positions of an earlier extent that do not
//!          line up with a later extent
//! ```

pub mod affine;
pub mod chain;
pub mod window;

pub use chain::{FilterInfo, NodeId, RfChain, Stage, StageSpec};
pub use window::{Extent, ExtentRef, NodeView, Window};
