//! Hierarchical CFG (HCFG) construction, from a natural loop of a scalar
//! [`Function`].
//!
//! The loop is built as a plain CFG nested in one top [`Region`](crate::Region)
//! (named `TopRegion`), with:
//! * an empty [`BasicBlock`](crate::BasicBlock) standing in for the preheader,
//!   as the region's entry
//! * one block per loop block (including those of nested loops), in
//!   loop-local reverse post-order, starting with the header
//! * the loop's unique exit block, as the region's exiting node
//!
//! Branches aren't materialized as [`Inst`]s: a conditional branch instead
//! sets [`BasicBlockDef::cond_bit`](crate::BasicBlockDef::cond_bit), and all
//! branches become edges (other than those leaving the exit block).

use crate::dom;
use crate::scalar::loops::{Loop, LoopAnalysis};
use crate::scalar::{Function, Opcode, ScalarBlock, ScalarInst, ScalarValue};
use crate::{
    BlockContents, External, ExternalDef, Inst, InstDef, Plan, PlanError, Value, Violation,
};
use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

/// Ways in which a loop can fail to have the (simplified) shape expected by
/// [`HcfgBuilder`], all detected before anything is added to the [`Plan`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("loop header {header:?} has no preheader")]
    MissingPreheader { header: ScalarBlock },

    #[error("expected exactly one latch, found {count}")]
    Latches { count: usize },

    #[error("expected exactly one exit edge, found {count}")]
    ExitEdges { count: usize },

    #[error("loop block {block:?} doesn't end in a well-formed branch")]
    MissingTerminator { block: ScalarBlock },

    #[error("loop block {block:?} branches to {succ:?}, which is neither in the loop nor its exit")]
    UnexpectedSuccessor { block: ScalarBlock, succ: ScalarBlock },

    #[error("{inst:?} uses a loop value whose definition doesn't dominate it")]
    NonDominatingUse { inst: ScalarInst },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HcfgConfig {
    /// Run [`Plan::verify`] after building (clearing the plan on failure).
    pub verify: bool,
}

impl HcfgConfig {
    pub const VERIFIED: Self = Self { verify: true };
    pub const UNVERIFIED: Self = Self { verify: false };
}

impl Default for HcfgConfig {
    fn default() -> Self {
        Self::VERIFIED
    }
}

/// Builder for the [`Plan`] of one loop.
///
/// Both the scalar function and the loop analysis are only borrowed, and
/// nothing about them is kept in the [`Plan`] (other than interned names).
pub struct HcfgBuilder<'a, L: LoopAnalysis + ?Sized> {
    func: &'a Function,
    loops: &'a L,
    lp: Loop,

    config: HcfgConfig,
}

/// The blocks of a loop accepted by [`HcfgBuilder::analyze_shape`].
struct LoopShape {
    preheader: ScalarBlock,

    /// The only edge leaving the loop, `exiting -> exit`.
    exiting: ScalarBlock,
    exit: ScalarBlock,

    /// All loop blocks, in loop-local reverse post-order (header first).
    body: Vec<ScalarBlock>,
}

impl LoopShape {
    fn header(&self) -> ScalarBlock {
        self.body[0]
    }

    /// Blocks whose instructions are materialized, in creation order.
    fn materialized_blocks(&self) -> impl Iterator<Item = ScalarBlock> + '_ {
        self.body.iter().copied().chain([self.exit])
    }
}

impl<'a, L: LoopAnalysis + ?Sized> HcfgBuilder<'a, L> {
    pub fn new(func: &'a Function, loops: &'a L, lp: Loop) -> Self {
        Self { func, loops, lp, config: HcfgConfig::default() }
    }

    pub fn with_config(self, config: HcfgConfig) -> Self {
        Self { config, ..self }
    }

    /// Populate the (empty) `plan` with the hierarchical CFG of the loop.
    ///
    /// On [`PlanError::UnsupportedShape`], `plan` is left untouched, while on
    /// [`PlanError::InvariantViolation`] it's cleared (see [`Plan::clear`]).
    pub fn build_hierarchical_cfg(&self, plan: &mut Plan) -> Result<(), PlanError> {
        if !plan.is_empty() {
            return Err(Violation::PlanNotEmpty.into());
        }

        let shape = self.analyze_shape()?;
        self.build(plan, &shape);

        debug!(
            "hcfg: built `{}` loop at {:?}: {} blocks, {} instructions, {} externals",
            self.func.name,
            shape.header(),
            plan.basic_blocks.len(),
            plan.insts.len(),
            plan.external_defs.len(),
        );

        if self.config.verify {
            if let Err(violation) = plan.verify() {
                debug!("hcfg: verification failed: {violation}");
                plan.clear();
                return Err(violation.into());
            }
        }
        Ok(())
    }

    fn analyze_shape(&self) -> Result<LoopShape, ShapeError> {
        let (func, loops, lp) = (self.func, self.loops, self.lp);

        let header = loops.header(lp);
        let preheader = loops.preheader(lp).ok_or(ShapeError::MissingPreheader { header })?;

        let latches = loops.latches(lp);
        if latches.len() != 1 {
            return Err(ShapeError::Latches { count: latches.len() });
        }

        let exit_edges = loops.exit_edges(lp);
        let &[(exiting, exit)] = exit_edges else {
            return Err(ShapeError::ExitEdges { count: exit_edges.len() });
        };

        let body = dom::reverse_post_order(header, &mut |block| {
            func.successors(block).into_iter().filter(move |&succ| loops.contains(lp, succ))
        });

        for &block in &body {
            let well_formed = func.terminator(block).map(|term| func.inst(term)).is_some_and(
                |term| match term.opcode {
                    Opcode::Br => term.blocks.len() == 1,
                    Opcode::CondBr => term.operands.len() == 1 && term.blocks.len() == 2,
                    _ => false,
                },
            );
            if !well_formed {
                return Err(ShapeError::MissingTerminator { block });
            }
            for succ in func.successors(block) {
                if succ != exit && !loops.contains(lp, succ) {
                    return Err(ShapeError::UnexpectedSuccessor { block, succ });
                }
            }
        }

        let shape = LoopShape { preheader, exiting, exit, body };

        // Non-phi uses of materialized values must be dominated by their
        // definition in the plan, where the exit is only reachable through
        // the exiting block (no matter its scalar predecessors).
        let materialized = |block| block == exit || loops.contains(lp, block);
        let mut defined = FxHashSet::default();
        for block in shape.materialized_blocks() {
            let plan_block = if block == exit { shape.exiting } else { block };
            for &inst in &func.block(block).insts {
                let data = func.inst(inst);
                if data.opcode != Opcode::Phi {
                    for &operand in &data.operands {
                        let ScalarValue::Inst(def) = operand else {
                            continue;
                        };
                        let def_block = func.inst(def).parent;
                        if !materialized(def_block) {
                            continue;
                        }
                        let dominated = if def_block == block {
                            defined.contains(&def)
                        } else {
                            loops.dominates(def_block, plan_block)
                        };
                        if !dominated {
                            return Err(ShapeError::NonDominatingUse { inst });
                        }
                    }
                }
                defined.insert(inst);
            }
        }

        Ok(shape)
    }

    fn build(&self, plan: &mut Plan, shape: &LoopShape) {
        let func = self.func;
        let cx = plan.cx();

        let top = plan.create_region("TopRegion", false);
        let mut block_map = FxHashMap::default();
        for block in [shape.preheader].into_iter().chain(shape.materialized_blocks()) {
            let bb = plan.create_basic_block(&func.block(block).name);
            plan.insert_into_region(top, bb);
            block_map.insert(block, bb);
        }
        let preheader_bb = block_map[&shape.preheader];
        let exit_bb = block_map[&shape.exit];
        plan.regions[top].entry = Some(preheader_bb.into());
        plan.regions[top].exiting = Some(exit_bb.into());
        plan.entry = Some(top.into());

        // NOTE(eddyb) connected first, so that it's the header's first predecessor.
        plan.connect(preheader_bb, block_map[&shape.header()]);

        let mut inst_map = FxHashMap::default();
        let mut phis = vec![];
        for block in shape.materialized_blocks() {
            let bb = block_map[&block];
            let mut insts = vec![];
            for &scalar_inst in &func.block(block).insts {
                let data = func.inst(scalar_inst);
                if data.opcode.is_branch() {
                    continue;
                }

                // Phis may use values defined later (e.g. along a backedge),
                // so their operands are only filled in once all exist.
                let operands = if data.opcode == Opcode::Phi {
                    SmallVec::new()
                } else {
                    data.operands.iter().map(|&v| self.map_value(plan, &inst_map, v)).collect()
                };
                let inst = plan.insts.define(
                    &cx,
                    InstDef {
                        opcode: data.opcode.clone(),
                        operands,
                        ty: data.ty,
                        underlying: scalar_inst,
                    },
                );
                trace!("hcfg: {scalar_inst:?} `{}` -> {inst:?} (in {bb:?})", data.opcode);

                if data.opcode == Opcode::Phi {
                    phis.push((inst, scalar_inst));
                }
                inst_map.insert(scalar_inst, inst);
                insts.push(inst);
            }
            debug!("hcfg: `{}` -> {bb:?}, {} instructions", func.block(block).name, insts.len());
            plan.basic_blocks[bb].contents = BlockContents::Insts(insts);
        }

        for (inst, scalar_inst) in phis {
            let operands = func
                .inst(scalar_inst)
                .operands
                .iter()
                .map(|&v| self.map_value(plan, &inst_map, v))
                .collect();
            plan.insts[inst].operands = operands;
        }

        for &block in &shape.body {
            let bb = block_map[&block];
            let Some(term) = func.terminator(block) else {
                continue;
            };
            let term = func.inst(term);
            match (&term.opcode, &term.operands[..], &term.blocks[..]) {
                (Opcode::CondBr, &[cond], &[if_true, if_false]) if if_true != if_false => {
                    let cond_bit = self.map_value(plan, &inst_map, cond);
                    let (if_true, if_false) = (block_map[&if_true], block_map[&if_false]);
                    plan.set_two_successors(bb, cond_bit, if_true, if_false);
                }

                // NOTE(eddyb) a conditional branch with both targets being the
                // same block can't choose anything, so it's unconditional.
                (_, _, &[target, ..]) => plan.connect(bb, block_map[&target]),

                _ => {}
            }
        }
    }

    /// Map a scalar operand to the [`Inst`] created for it, or an [`External`]
    /// (registered with `plan`) for anything defined outside of the plan.
    fn map_value(
        &self,
        plan: &mut Plan,
        inst_map: &FxHashMap<ScalarInst, Inst>,
        v: ScalarValue,
    ) -> Value {
        let func = self.func;
        let cx = plan.cx();

        let ty = func.value_type(v);
        let def = match v {
            ScalarValue::Inst(inst) => match inst_map.get(&inst) {
                Some(&inst) => return Value::InstOutput(inst),
                None => ExternalDef::Inst { func: cx.intern(func.name.as_str()), inst, ty },
            },
            ScalarValue::Param(idx) => {
                ExternalDef::FuncParam { func: cx.intern(func.name.as_str()), idx, ty }
            }
            ScalarValue::Const { ty, bits } => ExternalDef::Const { ty, bits },
            ScalarValue::Undef(ty) => ExternalDef::Undef(ty),
        };
        let external: External = cx.intern(def);
        plan.external_defs.insert(external);
        Value::External(external)
    }
}
