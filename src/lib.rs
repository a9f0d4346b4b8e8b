//! **`vecplan`**: a hierarchical control-flow representation for planning the
//! vectorization of a scalar loop.
//!
//! A [`Plan`] is built from a scalar [`Function`](scalar::Function) and one of
//! its natural loops, by [`HcfgBuilder`](hcfg::HcfgBuilder), and then has its
//! generic [`Inst`]ructions lowered into vectorization-strategy-specific
//! [`Recipe`]s, by [`passes::recipes`].
//!
//! #### Notable types/modules
//!
//! ##### IR data types
// HACK(eddyb) using `(struct.Context.html)` to link `Context`, not `context::Context`.
//! * [`Context`](struct.Context.html): handles interning (names, [`ExternalDef`]s)
//!   and allocating entity handles
//! * [`Plan`]: owns [`BasicBlock`]s, [`Region`]s, [`Inst`]s and [`Recipe`]s
//!   (rooted by [`entry`](Plan::entry))
//! * [`scalar`]: the scalar input IR (and the loop/legality inputs it comes with)
//!
//! ##### Utilities and passes
//! * [`plan_at`]: positioned traversal (i.e. the query surface)
//! * [`hcfg::HcfgBuilder`]: building a [`Plan`] from a scalar loop
//! * [`passes::recipes`]: lowering [`Inst`]s into [`Recipe`]s
//! * [`verify`]: structural and SSA dominance checks
//! * [`print`](mod@print): plain-text dumps, for debugging and tests

// BEGIN - Embark standard lints v6 for Rust 1.55+
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::flat_map_option,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::from_iter_instead_of_collect,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_digit_groups,
    clippy::large_stack_arrays,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_same_arms,
    clippy::match_wild_err_arm,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::missing_enforced_import_renames,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::needless_for_each,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::rc_mutex,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::single_match_else,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v6 for Rust 1.55+
// crate-specific exceptions:
#![allow(
    // NOTE(eddyb) ignored for readability (`match` used when `if let` is too long).
    clippy::single_match_else,
)]
#![forbid(unsafe_code)]

// NOTE(eddyb) all the modules are declared here, but they're documented "inside"
// (i.e. using inner doc comments).
pub mod cfg;
mod context;
pub mod dom;
pub mod hcfg;
pub mod plan_at;
pub mod print;
pub mod scalar;
pub mod transform;
pub mod verify;
pub mod visit;
pub mod passes {
    //! IR transformations (typically whole-[`Plan`](crate::Plan)).
    //
    // NOTE(eddyb) inline `mod` to avoid adding APIs here, it's just namespacing.

    pub mod recipes;
}

use arrayvec::ArrayVec;
use scalar::legality::InductionDescriptor;
use scalar::{Opcode, ScalarInst, ScalarType};
use smallvec::SmallVec;
use std::rc::Rc;

// HACK(eddyb) work around the lack of `FxIndex{Map,Set}` type aliases elsewhere.
#[doc(hidden)]
type FxIndexMap<K, V> =
    indexmap::IndexMap<K, V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;
#[doc(hidden)]
type FxIndexSet<V> = indexmap::IndexSet<V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

// NOTE(eddyb) these reexports are all documented inside `context`.
pub use context::{Context, Entity, EntityDefs, InternInCx};

/// Interned handle for a [`str`].
pub use context::InternedStr;

/// Interned handle for an [`ExternalDef`].
pub use context::External;

pub use hcfg::{HcfgBuilder, HcfgConfig, ShapeError};
pub use passes::recipes::{CondBitRecipes, LoweringConfig, LoweringSummary};
pub use verify::Violation;

// HACK(eddyb) this only serves to disallow modifying the `cx` field of `Plan`.
#[doc(hidden)]
mod sealed {
    use super::*;

    pub struct Plan {
        /// Context used for everything interned, in this plan.
        ///
        /// Notable choices made for this field:
        /// * private to disallow switching the context of a plan
        /// * [`Rc`] sharing to allow multiple plans to use the same context
        ///   (`Context: !Sync` because of the interners so it can't be `Arc`)
        cx: Rc<Context>,

        pub basic_blocks: EntityDefs<BasicBlock>,
        pub regions: EntityDefs<Region>,
        pub insts: EntityDefs<Inst>,
        pub recipes: EntityDefs<Recipe>,

        /// Every [`External`] used (as [`Value::External`]) by this plan.
        pub external_defs: FxIndexSet<External>,

        /// The outermost node, normally a [`Region`] whose entry is the
        /// (empty) [`BasicBlock`] standing in for the loop preheader.
        pub entry: Option<CfgNode>,
    }

    impl Plan {
        pub fn new(cx: Rc<Context>) -> Self {
            Self {
                cx,

                basic_blocks: Default::default(),
                regions: Default::default(),
                insts: Default::default(),
                recipes: Default::default(),

                external_defs: Default::default(),
                entry: None,
            }
        }

        // FIXME(eddyb) `cx_ref` might be the better default in situations where
        // the plan doesn't need to be modified, figure out if that's common.
        pub fn cx(&self) -> Rc<Context> {
            self.cx.clone()
        }

        pub fn cx_ref(&self) -> &Rc<Context> {
            &self.cx
        }
    }
}
pub use sealed::Plan;

impl Plan {
    /// Whether nothing has been built into this plan (yet).
    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
            && self.basic_blocks.is_empty()
            && self.regions.is_empty()
            && self.insts.is_empty()
            && self.recipes.is_empty()
    }

    /// Drop every definition, returning the plan to its [`Plan::new`] state
    /// (other than still sharing the same [`Context`]).
    pub fn clear(&mut self) {
        self.basic_blocks.clear();
        self.regions.clear();
        self.insts.clear();
        self.recipes.clear();
        self.external_defs.clear();
        self.entry = None;
    }

    /// The first [`BasicBlock`] executed, found by following [`Plan::entry`]
    /// (and region entries), if any.
    pub fn entry_basic_block(&self) -> Option<BasicBlock> {
        self.at(self.entry?).entry_basic_block()
    }
}

/// Node in the hierarchical CFG of a [`Plan`], i.e. anything that can appear
/// as a predecessor/successor, or as a child of a [`Region`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::From)]
pub enum CfgNode {
    BasicBlock(BasicBlock),
    Region(Region),
}

/// Edges and ownership shared by all [`CfgNode`]s.
///
/// Both edge lists are kept as exact mirrors of eachother (see [`cfg`]), and
/// only ever connect nodes sharing the same parent [`Region`].
#[derive(Clone, Default, Debug)]
pub struct NodeLinks {
    pub parent: Option<Region>,

    pub predecessors: SmallVec<[CfgNode; 2]>,

    // NOTE(eddyb) more than two successors would need something more general
    // than a condition bit to choose between them.
    pub successors: ArrayVec<CfgNode, 2>,
}

pub use context::BasicBlock;

/// Definition for a [`BasicBlock`]: a straight-line sequence of elements.
#[derive(Clone)]
pub struct BasicBlockDef {
    pub name: InternedStr,

    pub links: NodeLinks,

    pub contents: BlockContents,

    /// Instructions without recipes, kept only as definitions (e.g. of the
    /// condition bit, see [`passes::recipes`]), placed after all elements,
    /// in program order.
    pub detached: Vec<Inst>,

    /// Chooses between the two successors (`true` picks the first one), and
    /// must be set iff there are exactly two of them.
    pub cond_bit: Option<Value>,
}

/// The elements of a [`BasicBlock`], which are either all [`Inst`]s (when
/// freshly built), or all [`Recipe`]s (after lowering).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockContents {
    Insts(Vec<Inst>),
    Recipes(Vec<Recipe>),
}

impl Default for BlockContents {
    fn default() -> Self {
        Self::Insts(vec![])
    }
}

impl BlockContents {
    pub fn len(&self) -> usize {
        match self {
            Self::Insts(insts) => insts.len(),
            Self::Recipes(recipes) => recipes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One element of a [`BasicBlock`] (see [`BlockContents`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::From)]
pub enum BlockElement {
    Inst(Inst),
    Recipe(Recipe),
}

impl BlockElement {
    /// The [`Value`] defined by this element.
    pub fn output(self) -> Value {
        match self {
            Self::Inst(inst) => Value::InstOutput(inst),
            Self::Recipe(recipe) => Value::RecipeOutput(recipe),
        }
    }
}

pub use context::Region;

/// Definition for a [`Region`]: a single-entry single-exit subgraph of
/// [`CfgNode`]s, which it exclusively owns (see [`Plan::remove_node`]).
#[derive(Clone, Default)]
pub struct RegionDef {
    pub name: Option<InternedStr>,

    pub links: NodeLinks,

    /// Whether the region is to be replicated per vector lane (instead of
    /// being widened), e.g. for predicated scalar code.
    pub is_replicator: bool,

    /// The only child without predecessors (inside the region).
    pub entry: Option<CfgNode>,

    /// The only child without successors (inside the region).
    pub exiting: Option<CfgNode>,

    /// All the nodes owned by this region, in creation order.
    pub children: Vec<CfgNode>,
}

pub use context::Inst;

/// Definition for an [`Inst`]: a generic instruction, which mirrors a scalar
/// instruction one-to-one (other than for branches, see [`BasicBlockDef::cond_bit`]).
#[derive(Clone, Debug)]
pub struct InstDef {
    pub opcode: Opcode,

    pub operands: SmallVec<[Value; 2]>,

    /// Result type ([`ScalarType::Void`] for instructions without results).
    pub ty: ScalarType,

    /// The scalar instruction this one was created from.
    pub underlying: ScalarInst,
}

pub use context::Recipe;

/// Definition for a [`Recipe`]: an instruction lowered to a specific strategy
/// for emitting its vector form.
#[derive(Clone, Debug)]
pub struct RecipeDef {
    pub kind: RecipeKind,

    pub operands: SmallVec<[Value; 2]>,

    pub ty: ScalarType,

    pub underlying: ScalarInst,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RecipeKind {
    /// A phi widened lane-wise (with the recognized induction, if any).
    WidenPhi { induction: Option<InductionDescriptor> },

    /// Any other non-memory operation, widened lane-wise.
    Widen { opcode: Opcode },

    /// A load or store, widened into a (consecutive or gather/scatter) access.
    WidenMemory(MemAccess),
}

impl RecipeKind {
    /// Short name of this kind, as used by [`print`](mod@print).
    pub fn name(&self) -> &'static str {
        match self {
            Self::WidenPhi { .. } => "widen-phi",
            Self::Widen { .. } => "widen",
            Self::WidenMemory(_) => "widen-memory",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemAccess {
    pub kind: MemAccessKind,
    pub align: Option<u32>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemAccessKind {
    /// Operands: `[address]`.
    Load,

    /// Operands: `[stored value, address]`.
    Store,
}

/// Any value that can be used as an operand, or as a condition bit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::From)]
pub enum Value {
    /// Value defined outside the loop, see [`ExternalDef`].
    External(External),

    InstOutput(Inst),

    RecipeOutput(Recipe),
}

/// Placeholder for a value defined outside of the loop being planned
/// (interned in the [`Context`], and thus shared between [`Plan`]s).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExternalDef {
    /// The `idx`th parameter of the function named `func`.
    FuncParam { func: InternedStr, idx: u32, ty: ScalarType },

    Const { ty: ScalarType, bits: i64 },

    Undef(ScalarType),

    /// The result of an instruction outside the loop (e.g. in the preheader).
    Inst { func: InternedStr, inst: ScalarInst, ty: ScalarType },
}

impl ExternalDef {
    pub fn ty(&self) -> ScalarType {
        match *self {
            Self::FuncParam { ty, .. }
            | Self::Const { ty, .. }
            | Self::Undef(ty)
            | Self::Inst { ty, .. } => ty,
        }
    }
}

/// Failure to build or lower a [`Plan`].
///
/// Only [`PlanError::InvariantViolation`] indicates a bug (in this crate, or
/// in a caller mutating a [`Plan`] by hand); the other variants are expected
/// outcomes, for which vectorization of the loop should simply be abandoned.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("unsupported loop shape: {0}")]
    UnsupportedShape(#[from] ShapeError),

    #[error("no recipe for `{opcode}` ({inst:?})")]
    UnsupportedInstruction { inst: Inst, opcode: Opcode },

    /// An instruction marked dead is still needed by an element of its own
    /// block, so it can neither be removed nor kept detached.
    #[error("{inst:?} is marked dead, but still used by {user:?}")]
    DeadInstInUse { inst: Inst, user: visit::User },

    #[error("plan invariant violated: {0}")]
    InvariantViolation(#[from] Violation),
}

impl PlanError {
    /// Whether the caller can keep going (without vectorizing this loop).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::UnsupportedShape(_)
            | Self::UnsupportedInstruction { .. }
            | Self::DeadInstInUse { .. } => true,
            Self::InvariantViolation(_) => false,
        }
    }
}
