//! Classification inputs supplied by legality analysis (which is not part of
//! this crate): recognized inductions, and instructions known to be dead.

use crate::FxIndexMap;
use crate::scalar::{ScalarInst, ScalarValue};
use rustc_hash::FxHashSet;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InductionKind {
    /// Integer or pointer induction, stepping by an integer amount.
    IntOrPtr,

    /// Floating-point induction.
    Fp,
}

/// A recognized induction variable: a header phi, and the instruction
/// computing its value for the next iteration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InductionDescriptor {
    pub kind: InductionKind,

    /// Value on entry into the loop (the phi's incoming value from outside).
    pub start: ScalarValue,

    /// Per-iteration step (often a constant).
    pub step: ScalarValue,

    /// The update instruction (phi + step), feeding the phi along the backedge.
    pub update: ScalarInst,
}

/// Recognized inductions, keyed by their header phi.
pub type InductionList = FxIndexMap<ScalarInst, InductionDescriptor>;

/// Instructions that need no counterpart in the vectorized loop.
pub type DeadInsts = FxHashSet<ScalarInst>;
