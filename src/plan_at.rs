//! Traversal helpers for [`Plan`] entities (and the read-only query surface
//! used by passes, verification and printing).
//!
//! [`PlanAt<P>`]/[`PlanAtMut<P>`] are like `(&Plan, P)`/`(&mut Plan, P`)
//! (where `P` is some type describing a "position" in the plan), except:
//! * they only borrow the [`EntityDefs`] fields of [`Plan`]
//!   * this can prevent borrow conflicts, especially when mutating other fields
//!   * it also avoids accidentally accessing parts of the plan without going
//!     through `P` (as [`EntityDefs`] requires keys for any access)
//! * they're dedicated types with inherent methods and trait `impl`s

use crate::scalar::{Opcode, ScalarType};
use crate::{
    BasicBlock, BasicBlockDef, BlockContents, BlockElement, CfgNode, Context, EntityDefs, Inst,
    InstDef, NodeLinks, Plan, Recipe, RecipeDef, RecipeKind, Region, RegionDef, Value,
};
use itertools::Either;

/// Immutable traversal (i.e. visiting) helper for [`Plan`] entities.
///
/// The point/position type `P` should be an entity, or a [`CfgNode`].
#[derive(Copy, Clone)]
pub struct PlanAt<'a, P: Copy> {
    pub basic_blocks: &'a EntityDefs<BasicBlock>,
    pub regions: &'a EntityDefs<Region>,
    pub insts: &'a EntityDefs<Inst>,
    pub recipes: &'a EntityDefs<Recipe>,

    pub position: P,
}

impl<'a, P: Copy> PlanAt<'a, P> {
    /// Reposition to `new_position`.
    pub fn at<P2: Copy>(self, new_position: P2) -> PlanAt<'a, P2> {
        PlanAt {
            basic_blocks: self.basic_blocks,
            regions: self.regions,
            insts: self.insts,
            recipes: self.recipes,
            position: new_position,
        }
    }
}

// NOTE(eddyb) `BasicBlock`/`Region` positions get these through `Into<CfgNode>`,
// so that e.g. `plan.at(bb).num_successors()` works without converting first.
impl<'a, P: Copy + Into<CfgNode>> PlanAt<'a, P> {
    pub fn links(self) -> &'a NodeLinks {
        match self.position.into() {
            CfgNode::BasicBlock(bb) => &self.basic_blocks[bb].links,
            CfgNode::Region(region) => &self.regions[region].links,
        }
    }

    pub fn parent(self) -> Option<Region> {
        self.links().parent
    }

    pub fn successors(self) -> &'a [CfgNode] {
        &self.links().successors
    }

    pub fn predecessors(self) -> &'a [CfgNode] {
        &self.links().predecessors
    }

    pub fn num_successors(self) -> usize {
        self.successors().len()
    }

    pub fn num_predecessors(self) -> usize {
        self.predecessors().len()
    }

    pub fn single_successor(self) -> Option<CfgNode> {
        match self.successors() {
            &[succ] => Some(succ),
            _ => None,
        }
    }

    pub fn single_predecessor(self) -> Option<CfgNode> {
        match self.predecessors() {
            &[pred] => Some(pred),
            _ => None,
        }
    }

    /// The [`BasicBlock`] reached first when entering this node, i.e. itself
    /// for a [`BasicBlock`], or (recursively) a [`Region`]'s entry.
    pub fn entry_basic_block(self) -> Option<BasicBlock> {
        let mut node = self.position.into();
        loop {
            match node {
                CfgNode::BasicBlock(bb) => return Some(bb),
                CfgNode::Region(region) => node = self.regions[region].entry?,
            }
        }
    }

    /// The [`BasicBlock`] left last when exiting this node, i.e. itself for a
    /// [`BasicBlock`], or (recursively) a [`Region`]'s exiting node.
    pub fn exiting_basic_block(self) -> Option<BasicBlock> {
        let mut node = self.position.into();
        loop {
            match node {
                CfgNode::BasicBlock(bb) => return Some(bb),
                CfgNode::Region(region) => node = self.regions[region].exiting?,
            }
        }
    }

    /// Successors, found by walking out through parent [`Region`]s (whose own
    /// successors apply when leaving through their exiting node).
    pub fn hierarchical_successors(self) -> &'a [CfgNode] {
        let mut node: CfgNode = self.position.into();
        loop {
            let at_node = self.at(node);
            if !at_node.successors().is_empty() {
                return at_node.successors();
            }
            match at_node.parent() {
                Some(parent) if self.regions[parent].exiting == Some(node) => {
                    node = parent.into();
                }
                _ => return &[],
            }
        }
    }
}

impl<'a> PlanAt<'a, BasicBlock> {
    pub fn def(self) -> &'a BasicBlockDef {
        &self.basic_blocks[self.position]
    }

    /// Number of elements ([`Inst`]s or [`Recipe`]s).
    pub fn len(self) -> usize {
        self.def().contents.len()
    }

    pub fn is_empty(self) -> bool {
        self.def().contents.is_empty()
    }

    pub fn cond_bit(self) -> Option<Value> {
        self.def().cond_bit
    }

    /// Whether the elements are [`Recipe`]s (i.e. the block has been lowered).
    pub fn has_recipes(self) -> bool {
        matches!(self.def().contents, BlockContents::Recipes(_))
    }

    /// The elements, in order (restartable by cloning the iterator).
    pub fn elements(
        self,
    ) -> impl DoubleEndedIterator<Item = BlockElement> + ExactSizeIterator + Clone + 'a {
        match &self.def().contents {
            BlockContents::Insts(insts) => {
                Either::Left(insts.iter().copied().map(BlockElement::Inst))
            }
            BlockContents::Recipes(recipes) => {
                Either::Right(recipes.iter().copied().map(BlockElement::Recipe))
            }
        }
    }

    /// The [`Inst`]s, if not lowered yet (empty otherwise).
    pub fn insts(self) -> &'a [Inst] {
        match &self.def().contents {
            BlockContents::Insts(insts) => insts,
            BlockContents::Recipes(_) => &[],
        }
    }

    /// The [`Recipe`]s, if lowered (empty otherwise).
    pub fn recipes(self) -> &'a [Recipe] {
        match &self.def().contents {
            BlockContents::Insts(_) => &[],
            BlockContents::Recipes(recipes) => recipes,
        }
    }

    /// The [`Inst`]s kept only as definitions, after all elements (see
    /// [`BasicBlockDef::detached`]).
    pub fn detached_insts(self) -> &'a [Inst] {
        &self.def().detached
    }
}

impl<'a> PlanAt<'a, Region> {
    pub fn def(self) -> &'a RegionDef {
        &self.regions[self.position]
    }

    pub fn children(self) -> impl ExactSizeIterator<Item = PlanAt<'a, CfgNode>> + Clone + 'a {
        self.def().children.iter().map(move |&child| self.at(child))
    }
}

impl<'a> PlanAt<'a, Inst> {
    pub fn def(self) -> &'a InstDef {
        &self.insts[self.position]
    }
}

impl<'a> PlanAt<'a, Recipe> {
    pub fn def(self) -> &'a RecipeDef {
        &self.recipes[self.position]
    }
}

impl<'a> PlanAt<'a, BlockElement> {
    pub fn operands(self) -> &'a [Value] {
        match self.position {
            BlockElement::Inst(inst) => &self.insts[inst].operands,
            BlockElement::Recipe(recipe) => &self.recipes[recipe].operands,
        }
    }

    pub fn is_phi(self) -> bool {
        match self.position {
            BlockElement::Inst(inst) => self.insts[inst].opcode == Opcode::Phi,
            BlockElement::Recipe(recipe) => {
                matches!(self.recipes[recipe].kind, RecipeKind::WidenPhi { .. })
            }
        }
    }
}

impl PlanAt<'_, Value> {
    /// Return the [`ScalarType`] of this [`Value`] ([`Context`] used for
    /// [`Value::External`]).
    pub fn type_of(self, cx: &Context) -> ScalarType {
        match self.position {
            Value::External(external) => cx[external].ty(),
            Value::InstOutput(inst) => self.insts[inst].ty,
            Value::RecipeOutput(recipe) => self.recipes[recipe].ty,
        }
    }

    /// Whether the definition of this [`Value`] (still) exists.
    pub fn is_defined(self) -> bool {
        match self.position {
            Value::External(_) => true,
            Value::InstOutput(inst) => self.insts.contains(inst),
            Value::RecipeOutput(recipe) => self.recipes.contains(recipe),
        }
    }
}

/// Mutable traversal (i.e. transforming) helper for [`Plan`] entities.
///
/// The point/position type `P` should be an entity, or a [`CfgNode`].
pub struct PlanAtMut<'a, P: Copy> {
    pub basic_blocks: &'a mut EntityDefs<BasicBlock>,
    pub regions: &'a mut EntityDefs<Region>,
    pub insts: &'a mut EntityDefs<Inst>,
    pub recipes: &'a mut EntityDefs<Recipe>,

    pub position: P,
}

impl<'a, P: Copy> PlanAtMut<'a, P> {
    /// Emulate a "reborrow", which is automatic only for `&mut` types.
    pub fn reborrow(&mut self) -> PlanAtMut<'_, P> {
        PlanAtMut {
            basic_blocks: self.basic_blocks,
            regions: self.regions,
            insts: self.insts,
            recipes: self.recipes,
            position: self.position,
        }
    }

    /// Reposition to `new_position`.
    pub fn at<P2: Copy>(self, new_position: P2) -> PlanAtMut<'a, P2> {
        PlanAtMut {
            basic_blocks: self.basic_blocks,
            regions: self.regions,
            insts: self.insts,
            recipes: self.recipes,
            position: new_position,
        }
    }

    /// Demote to a `PlanAt`, with the same `position`.
    pub fn freeze(self) -> PlanAt<'a, P> {
        let PlanAtMut { basic_blocks, regions, insts, recipes, position } = self;
        PlanAt { basic_blocks, regions, insts, recipes, position }
    }
}

impl<'a, P: Copy + Into<CfgNode>> PlanAtMut<'a, P> {
    pub fn links(self) -> &'a mut NodeLinks {
        match self.position.into() {
            CfgNode::BasicBlock(bb) => &mut self.basic_blocks[bb].links,
            CfgNode::Region(region) => &mut self.regions[region].links,
        }
    }
}

impl<'a> PlanAtMut<'a, BasicBlock> {
    pub fn def(self) -> &'a mut BasicBlockDef {
        &mut self.basic_blocks[self.position]
    }
}

impl<'a> PlanAtMut<'a, Region> {
    pub fn def(self) -> &'a mut RegionDef {
        &mut self.regions[self.position]
    }
}

impl<'a> PlanAtMut<'a, Inst> {
    pub fn def(self) -> &'a mut InstDef {
        &mut self.insts[self.position]
    }
}

impl<'a> PlanAtMut<'a, Recipe> {
    pub fn def(self) -> &'a mut RecipeDef {
        &mut self.recipes[self.position]
    }
}

impl Plan {
    /// Start immutably traversing the plan at `position`.
    pub fn at<P: Copy>(&self, position: P) -> PlanAt<'_, P> {
        PlanAt {
            basic_blocks: &self.basic_blocks,
            regions: &self.regions,
            insts: &self.insts,
            recipes: &self.recipes,
            position,
        }
    }

    /// Start mutably traversing the plan at `position`.
    pub fn at_mut<P: Copy>(&mut self, position: P) -> PlanAtMut<'_, P> {
        PlanAtMut {
            basic_blocks: &mut self.basic_blocks,
            regions: &mut self.regions,
            insts: &mut self.insts,
            recipes: &mut self.recipes,
            position,
        }
    }
}
