//! Immutable IR traversal.

use crate::plan_at::PlanAt;
use crate::{
    BasicBlock, BlockContents, CfgNode, External, FxIndexMap, Inst, InstDef, Plan, Recipe,
    RecipeDef, Region, RegionDef, Value,
};
use smallvec::SmallVec;

// FIXME(eddyb) `Sized` bound shouldn't be needed but removing it requires
// writing `impl Visitor<'a> + ?Sized` in `fn inner_visit_with` signatures.
pub trait Visitor<'a>: Sized {
    // Context-interned leaves (noop default behavior).
    fn visit_external_use(&mut self, _external: External) {}

    // Non-leaves (defaulting to calling `.inner_visit_with(self)`).
    fn visit_plan(&mut self, plan: &'a Plan) {
        plan.inner_visit_with(self);
    }
    fn visit_region_def(&mut self, plan_at_region: PlanAt<'a, Region>) {
        plan_at_region.inner_visit_with(self);
    }
    fn visit_basic_block_def(&mut self, plan_at_bb: PlanAt<'a, BasicBlock>) {
        plan_at_bb.inner_visit_with(self);
    }
    fn visit_inst_def(&mut self, plan_at_inst: PlanAt<'a, Inst>) {
        plan_at_inst.inner_visit_with(self);
    }
    fn visit_recipe_def(&mut self, plan_at_recipe: PlanAt<'a, Recipe>) {
        plan_at_recipe.inner_visit_with(self);
    }
    fn visit_value_use(&mut self, v: &'a Value) {
        v.inner_visit_with(self);
    }

    /// Use of `v` as the condition bit of `bb` (defaults to a plain use).
    fn visit_cond_bit_use(&mut self, _bb: BasicBlock, v: &'a Value) {
        self.visit_value_use(v);
    }
}

/// Trait implemented on "deeply visitable" types, to further "explore" a type
/// by visiting its "interior" (i.e. variants and/or fields).
///
/// That is, an `impl InnerVisit for X` will call the relevant [`Visitor`] method
/// for each `X` field, effectively performing a single level of a deep visit.
/// Also, if `Visitor::visit_X` exists for a given `X`, its default should be to
/// call `X::inner_visit_with` (i.e. so that visiting is mostly-deep by default).
pub trait InnerVisit {
    fn inner_visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>);
}

impl InnerVisit for Plan {
    fn inner_visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>) {
        if let Some(entry) = self.entry {
            self.at(entry).inner_visit_with(visitor);
        }
    }
}

impl<'a> PlanAt<'a, CfgNode> {
    // HACK(eddyb) this can't be an `InnerVisit` impl, as `PlanAt` is passed
    // by value (and needs `'a`, not the lifetime of some `&self` borrow).
    pub fn inner_visit_with(self, visitor: &mut impl Visitor<'a>) {
        match self.position {
            CfgNode::BasicBlock(bb) => visitor.visit_basic_block_def(self.at(bb)),
            CfgNode::Region(region) => visitor.visit_region_def(self.at(region)),
        }
    }
}

impl<'a> PlanAt<'a, Region> {
    pub fn inner_visit_with(self, visitor: &mut impl Visitor<'a>) {
        let RegionDef { name: _, links: _, is_replicator: _, entry: _, exiting: _, children } =
            self.def();

        for &child in children {
            self.at(child).inner_visit_with(visitor);
        }
    }
}

impl<'a> PlanAt<'a, BasicBlock> {
    pub fn inner_visit_with(self, visitor: &mut impl Visitor<'a>) {
        let bb = self.position;
        let def = self.def();

        match &def.contents {
            BlockContents::Insts(insts) => {
                for &inst in insts {
                    visitor.visit_inst_def(self.at(inst));
                }
            }
            BlockContents::Recipes(recipes) => {
                for &recipe in recipes {
                    visitor.visit_recipe_def(self.at(recipe));
                }
            }
        }

        // NOTE(eddyb) detached instructions aren't elements, but still have uses.
        for &inst in &def.detached {
            visitor.visit_inst_def(self.at(inst));
        }
        if let Some(cond_bit) = &def.cond_bit {
            visitor.visit_cond_bit_use(bb, cond_bit);
        }
    }
}

impl<'a> PlanAt<'a, Inst> {
    pub fn inner_visit_with(self, visitor: &mut impl Visitor<'a>) {
        self.def().inner_visit_with(visitor);
    }
}

impl<'a> PlanAt<'a, Recipe> {
    pub fn inner_visit_with(self, visitor: &mut impl Visitor<'a>) {
        self.def().inner_visit_with(visitor);
    }
}

impl InnerVisit for InstDef {
    fn inner_visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>) {
        let Self { opcode: _, operands, ty: _, underlying: _ } = self;

        for v in operands {
            visitor.visit_value_use(v);
        }
    }
}

impl InnerVisit for RecipeDef {
    fn inner_visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>) {
        let Self { kind: _, operands, ty: _, underlying: _ } = self;

        for v in operands {
            visitor.visit_value_use(v);
        }
    }
}

impl InnerVisit for Value {
    fn inner_visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>) {
        match *self {
            Self::External(external) => visitor.visit_external_use(external),
            Self::InstOutput(_) | Self::RecipeOutput(_) => {}
        }
    }
}

/// Anything that can use a [`Value`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::From)]
pub enum User {
    Inst(Inst),
    Recipe(Recipe),

    /// The condition bit of a [`BasicBlock`].
    CondBit(BasicBlock),
}

/// All the uses of every [`Value`] reachable from [`Plan::entry`], collected
/// in one traversal (and invalidated by any later mutation of the [`Plan`]).
#[derive(Default)]
pub struct DefUses {
    users: FxIndexMap<Value, SmallVec<[User; 2]>>,
}

impl DefUses {
    pub fn collect(plan: &Plan) -> Self {
        let mut collector = DefUsesCollector { def_uses: Self::default(), current_user: None };
        collector.visit_plan(plan);
        collector.def_uses
    }

    /// The users of `v`, in traversal order (with a user appearing once per use).
    pub fn users(&self, v: Value) -> &[User] {
        match self.users.get(&v) {
            Some(users) => users,
            None => &[],
        }
    }

    /// Whether `v` has any use other than as a condition bit.
    pub fn has_data_uses(&self, v: Value) -> bool {
        self.users(v).iter().any(|user| !matches!(user, User::CondBit(_)))
    }

    /// Every used [`Value`], alongside its users.
    pub fn iter(&self) -> impl Iterator<Item = (Value, &[User])> + '_ {
        self.users.iter().map(|(&v, users)| (v, &users[..]))
    }
}

struct DefUsesCollector {
    def_uses: DefUses,
    current_user: Option<User>,
}

impl<'a> Visitor<'a> for DefUsesCollector {
    fn visit_inst_def(&mut self, plan_at_inst: PlanAt<'a, Inst>) {
        self.current_user = Some(User::Inst(plan_at_inst.position));
        plan_at_inst.inner_visit_with(self);
        self.current_user = None;
    }
    fn visit_recipe_def(&mut self, plan_at_recipe: PlanAt<'a, Recipe>) {
        self.current_user = Some(User::Recipe(plan_at_recipe.position));
        plan_at_recipe.inner_visit_with(self);
        self.current_user = None;
    }
    fn visit_value_use(&mut self, v: &'a Value) {
        if let Some(user) = self.current_user {
            self.def_uses.users.entry(*v).or_default().push(user);
        }
    }
    fn visit_cond_bit_use(&mut self, bb: BasicBlock, v: &'a Value) {
        self.def_uses.users.entry(*v).or_default().push(User::CondBit(bb));
    }
}
