//! Lowering of generic [`Inst`]ructions into [`Recipe`]s.
//!
//! Only blocks of the vector loop body are lowered (i.e. not the plan's entry
//! block, nor any block without successors, like the loop exit), each block
//! getting a fresh sequence of [`Recipe`]s swapped in for its [`Inst`]s, in
//! the same order (minus any elided instructions).
//!
//! Instructions are elided (not given a [`Recipe`]) when they're either:
//! * known to be dead (see [`DeadInsts`]), in which case they're removed, or
//!   kept detached if anything live still uses them (see below)
//! * only used as a condition bit (see [`CondBitRecipes`]), in which case they
//!   stay defined, detached, backing that condition
//!
//! Detached instructions (see [`BasicBlockDef::detached`](crate::BasicBlockDef::detached))
//! follow all the elements of their block, so they can only be used by phis,
//! condition bits, other detached instructions, and other blocks.

use crate::scalar::legality::{DeadInsts, InductionList};
use crate::scalar::{Opcode, ScalarInst};
use crate::transform::{Transformed, Transformer};
use crate::visit::{DefUses, User};
use crate::{
    BasicBlock, BlockContents, Inst, MemAccess, MemAccessKind, Plan, PlanError, Recipe,
    RecipeDef, RecipeKind, Value,
};
use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

/// Policy for instructions whose only uses are as condition bits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CondBitRecipes {
    /// Keep no recipe for them, leaving the condition bit to refer to the
    /// (detached) instruction itself.
    ///
    /// Phis are exempt, and always get a [`RecipeKind::WidenPhi`].
    #[default]
    ElideConditionOnly,

    /// Lower them like any other instruction, with the condition bit then
    /// referring to the resulting recipe.
    Materialize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LoweringConfig {
    pub cond_bit_recipes: CondBitRecipes,

    /// Run [`Plan::verify`] after lowering (clearing the plan on failure).
    pub verify: bool,
}

impl LoweringConfig {
    pub const ELIDE_CONDITIONS: Self =
        Self { cond_bit_recipes: CondBitRecipes::ElideConditionOnly, verify: true };
    pub const MATERIALIZE_CONDITIONS: Self =
        Self { cond_bit_recipes: CondBitRecipes::Materialize, verify: true };
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self::ELIDE_CONDITIONS
    }
}

/// Counts of what [`instructions_to_recipes`] did.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LoweringSummary {
    pub blocks_lowered: usize,
    pub recipes_created: usize,
    pub dead_removed: usize,

    /// Dead instructions kept detached, for their remaining uses.
    pub dead_retained: usize,

    pub conditions_elided: usize,
}

/// Lower every [`Inst`] of the loop body in `plan` into a [`Recipe`], using
/// the default [`LoweringConfig`].
pub fn instructions_to_recipes(
    plan: &mut Plan,
    inductions: &InductionList,
    dead: &DeadInsts,
) -> Result<LoweringSummary, PlanError> {
    instructions_to_recipes_with_config(plan, inductions, dead, &LoweringConfig::default())
}

/// Lower every [`Inst`] of the loop body in `plan` into a [`Recipe`].
///
/// Blocks already holding [`Recipe`]s are left alone, so lowering the same
/// [`Plan`] again is a noop.
///
/// Every instruction is classified before `plan` is changed in any way, so
/// [`PlanError::UnsupportedInstruction`] and [`PlanError::DeadInstInUse`]
/// leave `plan` as it was. On a [`PlanError::InvariantViolation`] from the
/// final verification, `plan` is cleared instead (see [`Plan::clear`]).
pub fn instructions_to_recipes_with_config(
    plan: &mut Plan,
    inductions: &InductionList,
    dead: &DeadInsts,
    config: &LoweringConfig,
) -> Result<LoweringSummary, PlanError> {
    let lowering = Lowering::classify(plan, inductions, dead, config)?;
    let summary = lowering.apply(plan);

    debug!(
        "recipes: lowered {} blocks into {} recipes \
         ({} dead removed, {} dead retained, {} conditions elided)",
        summary.blocks_lowered,
        summary.recipes_created,
        summary.dead_removed,
        summary.dead_retained,
        summary.conditions_elided,
    );

    if config.verify {
        if let Err(violation) = plan.verify() {
            debug!("recipes: verification failed: {violation}");
            plan.clear();
            return Err(violation.into());
        }
    }
    Ok(summary)
}

/// What happens to one [`Inst`].
#[derive(Clone, PartialEq, Eq)]
enum InstFate {
    Recipe(RecipeKind),

    /// Removed (no recipe, no uses left).
    Dead,

    /// Marked dead, but kept detached for its remaining uses.
    DeadRetained,

    /// Kept detached only as the definition of a condition bit.
    ConditionOnly,
}

/// The complete plan for lowering, computed without changing the [`Plan`].
struct Lowering {
    /// Blocks to lower, with the fate of each of their instructions.
    blocks: Vec<(BasicBlock, Vec<(Inst, InstFate)>)>,
}

impl Lowering {
    fn classify(
        plan: &Plan,
        inductions: &InductionList,
        dead: &DeadInsts,
        config: &LoweringConfig,
    ) -> Result<Self, PlanError> {
        let def_uses = DefUses::collect(plan);
        let entry = plan.entry_basic_block();

        let mut blocks = vec![];
        for bb in plan.rev_post_order() {
            let plan_at_bb = plan.at(bb);
            if Some(bb) == entry || plan.flattened_successors(bb).is_empty() {
                trace!("recipes: skipping {bb:?} (outside the loop body)");
                continue;
            }
            if plan_at_bb.has_recipes() {
                trace!("recipes: skipping {bb:?} (already lowered)");
                continue;
            }

            let mut fates = vec![];
            for &inst in plan_at_bb.insts() {
                let inst_def = plan.at(inst).def();

                // NOTE(eddyb) dead instructions are only checked for uses later.
                if dead.contains(&inst_def.underlying) {
                    fates.push((inst, InstFate::Dead));
                    continue;
                }

                let kind = match &inst_def.opcode {
                    Opcode::Phi => RecipeKind::WidenPhi {
                        induction: inductions.get(&inst_def.underlying).cloned(),
                    },
                    &Opcode::Load { align } => {
                        RecipeKind::WidenMemory(MemAccess { kind: MemAccessKind::Load, align })
                    }
                    &Opcode::Store { align } => {
                        RecipeKind::WidenMemory(MemAccess { kind: MemAccessKind::Store, align })
                    }
                    opcode @ (Opcode::Call(_)
                    | Opcode::Br
                    | Opcode::CondBr
                    | Opcode::Ret
                    | Opcode::Unreachable) => {
                        return Err(PlanError::UnsupportedInstruction {
                            inst,
                            opcode: opcode.clone(),
                        });
                    }
                    opcode @ (Opcode::Binary(_)
                    | Opcode::ICmp(_)
                    | Opcode::FCmp(_)
                    | Opcode::GetElementPtr { .. }
                    | Opcode::Cast(_)
                    | Opcode::Select) => RecipeKind::Widen { opcode: opcode.clone() },
                };

                // NOTE(eddyb) a phi can't be moved after the other elements,
                // as its operands are only available at the start of the block.
                let output = Value::InstOutput(inst);
                let condition_only = config.cond_bit_recipes == CondBitRecipes::ElideConditionOnly
                    && !matches!(kind, RecipeKind::WidenPhi { .. })
                    && def_uses.users(output).len() == 1
                    && !def_uses.has_data_uses(output);
                let fate =
                    if condition_only { InstFate::ConditionOnly } else { InstFate::Recipe(kind) };
                fates.push((inst, fate));
            }
            blocks.push((bb, fates));
        }

        let mut lowering = Self { blocks };
        lowering.retain_used_dead_insts(plan, &def_uses)?;
        Ok(lowering)
    }

    /// Turn [`InstFate::Dead`] into [`InstFate::DeadRetained`] for every dead
    /// instruction still used by anything not removed, as long as that can be
    /// done without breaking dominance (see the module docs).
    fn retain_used_dead_insts(&mut self, plan: &Plan, def_uses: &DefUses) -> Result<(), PlanError> {
        let fate_of: FxHashMap<Inst, (BasicBlock, &InstFate)> = self
            .blocks
            .iter()
            .flat_map(|(bb, fates)| fates.iter().map(move |(inst, fate)| (*inst, (*bb, fate))))
            .collect();
        let mut removed: FxHashSet<Inst> = fate_of
            .iter()
            .filter(|(_, (_, fate))| **fate == InstFate::Dead)
            .map(|(&inst, _)| inst)
            .collect();

        // NOTE(eddyb) keeping one instruction makes its operands live, so this
        // has to be repeated until nothing else is kept.
        loop {
            let still_used: Vec<Inst> = removed
                .iter()
                .copied()
                .filter(|&inst| {
                    def_uses.users(Value::InstOutput(inst)).iter().any(|user| match user {
                        User::Inst(user_inst) => !removed.contains(user_inst),
                        User::Recipe(_) | User::CondBit(_) => true,
                    })
                })
                .collect();
            if still_used.is_empty() {
                break;
            }
            for inst in still_used {
                removed.remove(&inst);
            }
        }

        let mut retained = FxHashSet::default();
        for (bb, fates) in &self.blocks {
            for (inst, fate) in fates {
                if *fate != InstFate::Dead || removed.contains(inst) {
                    continue;
                }

                // Only uses from elements of the same block would come before
                // the detached definition (phis excepted, and phis themselves
                // can't be detached at all).
                let inst_is_phi = plan.insts[*inst].opcode == Opcode::Phi;
                for &user in def_uses.users(Value::InstOutput(*inst)) {
                    let conflict = match user {
                        User::Inst(user_inst) => match fate_of.get(&user_inst) {
                            Some(&(user_bb, InstFate::Recipe(kind))) if user_bb == *bb => {
                                inst_is_phi || !matches!(kind, RecipeKind::WidenPhi { .. })
                            }
                            _ => inst_is_phi,
                        },
                        User::Recipe(_) | User::CondBit(_) => inst_is_phi,
                    };
                    if conflict {
                        return Err(PlanError::DeadInstInUse { inst: *inst, user });
                    }
                }
                retained.insert(*inst);
            }
        }

        for (_, fates) in &mut self.blocks {
            for (inst, fate) in fates {
                if retained.contains(&*inst) {
                    *fate = InstFate::DeadRetained;
                }
            }
        }
        Ok(())
    }

    fn apply(self, plan: &mut Plan) -> LoweringSummary {
        let cx = plan.cx();
        let mut summary = LoweringSummary::default();

        let mut recipe_for = FxHashMap::default();
        let mut removed = vec![];
        for (bb, fates) in self.blocks {
            let mut recipes = Vec::with_capacity(fates.len());
            let mut detached = vec![];
            for (inst, fate) in fates {
                match fate {
                    InstFate::Recipe(kind) => {
                        let inst_def = &plan.insts[inst];
                        trace!("recipes: {inst:?} `{}` -> {}", inst_def.opcode, kind.name());
                        let recipe_def = RecipeDef {
                            kind,
                            operands: inst_def.operands.clone(),
                            ty: inst_def.ty,
                            underlying: inst_def.underlying,
                        };
                        let recipe = plan.recipes.define(&cx, recipe_def);
                        recipe_for.insert(inst, recipe);
                        recipes.push(recipe);
                    }
                    InstFate::Dead => {
                        trace!("recipes: {inst:?} is dead");
                        removed.push(inst);
                    }
                    InstFate::DeadRetained => {
                        trace!("recipes: {inst:?} is dead, but still used");
                        summary.dead_retained += 1;
                        detached.push(inst);
                    }
                    InstFate::ConditionOnly => {
                        trace!("recipes: {inst:?} only backs a condition bit");
                        summary.conditions_elided += 1;
                        detached.push(inst);
                    }
                }
            }

            debug!(
                "recipes: {bb:?} now has {} recipes ({} detached)",
                recipes.len(),
                detached.len()
            );
            summary.blocks_lowered += 1;
            summary.recipes_created += recipes.len();

            // NOTE(eddyb) the instructions are replaced all at once, and their
            // definitions only removed below, after all operands are redirected.
            let bb_def = &mut plan.basic_blocks[bb];
            bb_def.contents = BlockContents::Recipes(recipes);
            bb_def.detached = detached;
        }

        // Redirect all uses (including in unlowered blocks, detached instructions
        // and condition bits) from lowered instructions to their recipes.
        RedirectToRecipes { recipe_for: &recipe_for }.in_place_transform_plan(plan);

        for inst in recipe_for.keys().copied().chain(removed.iter().copied()) {
            plan.insts.remove(inst);
        }
        summary.dead_removed = removed.len();

        summary
    }
}

struct RedirectToRecipes<'a> {
    recipe_for: &'a FxHashMap<Inst, Recipe>,
}

impl Transformer for RedirectToRecipes<'_> {
    fn transform_value_use(&mut self, v: &Value) -> Transformed<Value> {
        match *v {
            Value::InstOutput(inst) => match self.recipe_for.get(&inst) {
                Some(&recipe) => Transformed::Changed(Value::RecipeOutput(recipe)),
                None => Transformed::Unchanged,
            },
            Value::External(_) | Value::RecipeOutput(_) => Transformed::Unchanged,
        }
    }
}

/// The scalar instructions behind the [`Recipe`]s of `bb`, in order (mostly
/// useful for checking which instructions got lowered, and how).
pub fn recipe_sources(plan: &Plan, bb: BasicBlock) -> Vec<(ScalarInst, &RecipeKind)> {
    plan.at(bb)
        .recipes()
        .iter()
        .map(|&recipe| {
            let recipe_def = plan.at(recipe).def();
            (recipe_def.underlying, &recipe_def.kind)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hcfg::HcfgBuilder;
    use crate::scalar::loops::LoopForest;
    use crate::scalar::{BinOp, Function, IntPredicate, ScalarType, ScalarValue};
    use crate::Context;
    use std::rc::Rc;

    fn built(f: &Function) -> Plan {
        let forest = LoopForest::compute(f);
        let lp = forest.top_level_loops().next().unwrap();
        let mut plan = Plan::new(Rc::new(Context::new()));
        HcfgBuilder::new(f, &forest, lp).build_hierarchical_cfg(&mut plan).unwrap();
        plan
    }

    fn body(plan: &Plan) -> BasicBlock {
        plan.rev_post_order().nth(1).unwrap()
    }

    #[test]
    fn call_is_unsupported() {
        let mut f = Function::new("g", [ScalarType::Int(1)]);
        let entry = f.add_block("entry");
        let loop_bb = f.add_block("loop");
        let end = f.add_block("end");
        let c = f.param(0);
        f.br(entry, loop_bb);
        f.call(loop_bb, "opaque", ScalarType::Void, []);
        f.cond_br(loop_bb, c, loop_bb, end);
        f.ret(end, None);

        let mut plan = built(&f);
        let body = body(&plan);
        let call = plan.at(body).insts()[0];
        match instructions_to_recipes(&mut plan, &InductionList::default(), &DeadInsts::default()) {
            Err(PlanError::UnsupportedInstruction { inst, opcode }) => {
                assert_eq!(inst, call);
                assert_eq!(opcode, Opcode::Call("opaque".into()));
            }
            other => panic!("unexpected {other:?}"),
        }

        // Nothing was changed.
        assert!(!plan.at(body).has_recipes());
        assert!(plan.recipes.is_empty());
    }

    #[test]
    fn dead_inst_with_live_user() {
        let f = crate::scalar::tests::inner_loop();
        let mut plan = built(&f);
        let body = body(&plan);
        let [_, gep, load] = [0, 1, 2].map(|i| plan.at(body).insts()[i]);

        let dead: DeadInsts = [plan.insts[gep].underlying].into_iter().collect();
        match instructions_to_recipes(&mut plan, &InductionList::default(), &dead) {
            Err(err @ PlanError::DeadInstInUse { inst, user }) => {
                assert!(err.is_recoverable());
                assert_eq!(inst, gep);
                assert_eq!(user, User::Inst(load));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(plan.recipes.is_empty());
    }

    #[test]
    fn recipe_sources_follow_program_order() {
        let f = crate::scalar::tests::inner_loop();
        let mut plan = built(&f);
        let body = body(&plan);
        let expected: Vec<_> = plan.at(body).insts()[..6]
            .iter()
            .map(|&inst| plan.insts[inst].underlying)
            .collect();

        instructions_to_recipes(&mut plan, &InductionList::default(), &DeadInsts::default())
            .unwrap();
        let sources = recipe_sources(&plan, body);
        assert_eq!(sources.iter().map(|&(scalar, _)| scalar).collect::<Vec<_>>(), expected);
    }

    /// ```text
    /// loop:
    ///   %i = phi i64 [0, entry], [%i.next, loop]
    ///   %c = phi i1 [1, entry], [%d, loop]
    ///   %i.next = add %i, 1
    ///   %d = icmp ult %i.next, %n
    ///   br %c, loop, end
    /// ```
    #[test]
    fn phi_used_only_as_condition() {
        let mut f = Function::new("g", [ScalarType::Int(64)]);
        let entry = f.add_block("entry");
        let loop_bb = f.add_block("loop");
        let end = f.add_block("end");
        let n = f.param(0);
        f.br(entry, loop_bb);
        let i = f.phi(loop_bb, ScalarType::Int(64));
        let c = f.phi(loop_bb, ScalarType::Int(1));
        let i_next = f.binary(loop_bb, BinOp::Add, i, ScalarValue::int(64, 1));
        let d = f.icmp(loop_bb, IntPredicate::Ult, i_next, n);
        f.cond_br(loop_bb, c, loop_bb, end);
        f.ret(end, None);
        f.add_incoming(i, ScalarValue::int(64, 0), entry);
        f.add_incoming(i, i_next, loop_bb);
        f.add_incoming(c, ScalarValue::int(1, 1), entry);
        f.add_incoming(c, d, loop_bb);

        let mut plan = built(&f);
        let body = body(&plan);
        let summary =
            instructions_to_recipes(&mut plan, &InductionList::default(), &DeadInsts::default())
                .unwrap();
        assert_eq!(summary.conditions_elided, 0);

        let kinds: Vec<_> =
            recipe_sources(&plan, body).into_iter().map(|(_, kind)| kind.name()).collect();
        assert_eq!(kinds, ["widen-phi", "widen-phi", "widen", "widen"]);

        let recipes = plan.at(body).recipes();
        assert_eq!(plan.at(body).cond_bit(), Some(Value::RecipeOutput(recipes[1])));
        assert!(plan.at(body).detached_insts().is_empty());
    }

    #[test]
    fn dead_chain_is_removed() {
        let f = crate::scalar::tests::inner_loop();
        let mut plan = built(&f);
        let body = body(&plan);
        let insts = plan.at(body).insts().to_vec();

        // `%res` is dead, and only used by the store, which is dead too.
        let [add, store] = [insts[3], insts[4]];
        let dead: DeadInsts =
            [add, store].into_iter().map(|inst| plan.insts[inst].underlying).collect();
        let summary = instructions_to_recipes(&mut plan, &InductionList::default(), &dead)
            .unwrap();
        assert_eq!(summary.dead_removed, 2);
        assert_eq!(summary.dead_retained, 0);
        assert_eq!(summary.recipes_created, 4);
        assert!(!plan.insts.contains(add) && !plan.insts.contains(store));
    }
}
