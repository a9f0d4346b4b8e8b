//! Structural and SSA dominance verification of a [`Plan`].
//!
//! Any [`Violation`] found here indicates a bug in whatever built or last
//! mutated the [`Plan`] (and not a problem with the scalar input).

use crate::plan_at::PlanAt;
use crate::visit::User;
use crate::{BasicBlock, BlockElement, CfgNode, Plan, Region, Value};
use rustc_hash::FxHashMap;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("plan already has contents")]
    PlanNotEmpty,

    #[error("plan has no entry")]
    MissingEntry,

    #[error("{0:?} has no definition")]
    DanglingNode(CfgNode),

    #[error("{node:?} has parent {found:?}, expected {expected:?}")]
    WrongParent { node: CfgNode, expected: Option<Region>, found: Option<Region> },

    #[error("{region:?} has no entry")]
    RegionWithoutEntry { region: Region },

    #[error("{region:?} has no exiting node")]
    RegionWithoutExiting { region: Region },

    #[error("entry {entry:?} of {region:?} has predecessors")]
    RegionEntryHasPredecessors { region: Region, entry: CfgNode },

    #[error("exiting node {exiting:?} of {region:?} has successors")]
    RegionExitingHasSuccessors { region: Region, exiting: CfgNode },

    #[error("edge {from:?} -> {to:?} is not mirrored by a predecessor")]
    UnmirroredEdge { from: CfgNode, to: CfgNode },

    #[error("{node:?} lists {succ:?} as a successor more than once")]
    DuplicateSuccessor { node: CfgNode, succ: CfgNode },

    #[error("{node:?} has {successors} successors (has_cond_bit: {has_cond_bit})")]
    CondBitMismatch { node: CfgNode, successors: usize, has_cond_bit: bool },

    #[error("{0:?} appears in more than one place")]
    DuplicateElement(BlockElement),

    #[error("{bb:?} contains {element:?}, which has no definition")]
    DanglingElement { bb: BasicBlock, element: BlockElement },

    #[error("{user:?} uses {value:?}, which has no definition")]
    DanglingOperand { user: User, value: Value },

    #[error("{user:?} uses {value:?}, which isn't registered with the plan")]
    UnregisteredExternal { user: User, value: Value },

    #[error("{user:?} uses {value:?}, whose definition doesn't dominate it")]
    UseNotDominated { user: User, value: Value },
}

/// Position of a definition: its block, and its index in that block (with
/// detached instructions placed after all elements, and the condition bit
/// used after those).
type DefPos = (BasicBlock, usize);

/// Check every structural invariant of `plan`, returning the first violation.
pub fn verify_plan(plan: &Plan) -> Result<(), Violation> {
    let entry = plan.entry.ok_or(Violation::MissingEntry)?;

    let mut verifier = Verifier { plan, def_pos: FxHashMap::default(), uses: vec![] };
    verifier.verify_node(entry, None)?;
    verifier.verify_uses()
}

struct Verifier<'a> {
    plan: &'a Plan,

    def_pos: FxHashMap<Value, DefPos>,

    /// Every use seen so far, as `(user, user position, used value, is_phi)`.
    uses: Vec<(User, DefPos, Value, bool)>,
}

impl<'a> Verifier<'a> {
    fn verify_node(
        &mut self,
        node: CfgNode,
        expected_parent: Option<Region>,
    ) -> Result<(), Violation> {
        let plan = self.plan;

        let exists = match node {
            CfgNode::BasicBlock(bb) => plan.basic_blocks.contains(bb),
            CfgNode::Region(region) => plan.regions.contains(region),
        };
        if !exists {
            return Err(Violation::DanglingNode(node));
        }

        let plan_at_node = plan.at(node);
        let found = plan_at_node.parent();
        if found != expected_parent {
            return Err(Violation::WrongParent { node, expected: expected_parent, found });
        }

        let succs = plan_at_node.successors();
        for (i, &succ) in succs.iter().enumerate() {
            if succs[..i].contains(&succ) {
                return Err(Violation::DuplicateSuccessor { node, succ });
            }
            let mirrored = match succ {
                CfgNode::BasicBlock(bb) => plan.basic_blocks.get(bb).map(|def| &def.links),
                CfgNode::Region(region) => plan.regions.get(region).map(|def| &def.links),
            }
            .is_some_and(|succ_links| succ_links.predecessors.contains(&node));
            if !mirrored {
                return Err(Violation::UnmirroredEdge { from: node, to: succ });
            }
        }
        for &pred in plan_at_node.predecessors() {
            let mirrored = match pred {
                CfgNode::BasicBlock(bb) => plan.basic_blocks.get(bb).map(|def| &def.links),
                CfgNode::Region(region) => plan.regions.get(region).map(|def| &def.links),
            }
            .is_some_and(|pred_links| pred_links.successors.contains(&node));
            if !mirrored {
                return Err(Violation::UnmirroredEdge { from: pred, to: node });
            }
        }

        match node {
            CfgNode::BasicBlock(bb) => self.verify_basic_block(plan.at(bb)),
            CfgNode::Region(region) => {
                // NOTE(eddyb) only basic blocks have condition bits.
                if succs.len() > 1 {
                    return Err(Violation::CondBitMismatch {
                        node,
                        successors: succs.len(),
                        has_cond_bit: false,
                    });
                }
                self.verify_region(region)
            }
        }
    }

    fn verify_region(&mut self, region: Region) -> Result<(), Violation> {
        let plan = self.plan;
        let region_def = &plan.regions[region];

        let entry = region_def.entry.ok_or(Violation::RegionWithoutEntry { region })?;
        let exiting = region_def.exiting.ok_or(Violation::RegionWithoutExiting { region })?;
        for child in [entry, exiting] {
            if !region_def.children.contains(&child) {
                return Err(Violation::WrongParent {
                    node: child,
                    expected: Some(region),
                    found: plan.at(child).parent(),
                });
            }
        }
        if !plan.at(entry).predecessors().is_empty() {
            return Err(Violation::RegionEntryHasPredecessors { region, entry });
        }
        if !plan.at(exiting).successors().is_empty() {
            return Err(Violation::RegionExitingHasSuccessors { region, exiting });
        }

        for &child in &region_def.children {
            self.verify_node(child, Some(region))?;
        }
        Ok(())
    }

    fn verify_basic_block(&mut self, plan_at_bb: PlanAt<'a, BasicBlock>) -> Result<(), Violation> {
        let plan = self.plan;
        let bb = plan_at_bb.position;
        let bb_def = plan_at_bb.def();

        let successors = plan_at_bb.num_successors();
        let has_cond_bit = bb_def.cond_bit.is_some();
        if has_cond_bit != (successors == 2) {
            return Err(Violation::CondBitMismatch { node: bb.into(), successors, has_cond_bit });
        }

        for (idx, element) in plan_at_bb.elements().enumerate() {
            let defined = match element {
                BlockElement::Inst(inst) => plan.insts.contains(inst),
                BlockElement::Recipe(recipe) => plan.recipes.contains(recipe),
            };
            if !defined {
                return Err(Violation::DanglingElement { bb, element });
            }
            if self.def_pos.insert(element.output(), (bb, idx)).is_some() {
                return Err(Violation::DuplicateElement(element));
            }

            let plan_at_element = plan.at(element);
            let user = match element {
                BlockElement::Inst(inst) => User::Inst(inst),
                BlockElement::Recipe(recipe) => User::Recipe(recipe),
            };
            let is_phi = plan_at_element.is_phi();
            for &v in plan_at_element.operands() {
                self.uses.push((user, (bb, idx), v, is_phi));
            }
        }

        let num_elements = plan_at_bb.len();
        for (i, &inst) in plan_at_bb.detached_insts().iter().enumerate() {
            let pos = (bb, num_elements + i);
            if !plan.insts.contains(inst) {
                return Err(Violation::DanglingElement { bb, element: inst.into() });
            }
            if self.def_pos.insert(inst.into(), pos).is_some() {
                return Err(Violation::DuplicateElement(inst.into()));
            }
            for &v in &plan.insts[inst].operands {
                self.uses.push((User::Inst(inst), pos, v, false));
            }
        }
        if let Some(cond_bit) = bb_def.cond_bit {
            let end = (bb, num_elements + bb_def.detached.len());
            self.uses.push((User::CondBit(bb), end, cond_bit, false));
        }

        Ok(())
    }

    fn verify_uses(&self) -> Result<(), Violation> {
        let dom = self.plan.dom_tree();

        for &(user, (use_bb, use_idx), value, is_phi) in &self.uses {
            let defined = match value {
                Value::External(external) => {
                    if !self.plan.external_defs.contains(&external) {
                        return Err(Violation::UnregisteredExternal { user, value });
                    }
                    continue;
                }
                Value::InstOutput(inst) => self.plan.insts.contains(inst),
                Value::RecipeOutput(recipe) => self.plan.recipes.contains(recipe),
            };
            let Some(&(def_bb, def_idx)) = self.def_pos.get(&value).filter(|_| defined) else {
                return Err(Violation::DanglingOperand { user, value });
            };

            // NOTE(eddyb) phis can use values from any predecessor (including
            // along backedges), which can't be checked without per-operand
            // incoming blocks, so only their existence is checked above.
            if is_phi {
                continue;
            }
            let dominated = if def_bb == use_bb {
                def_idx < use_idx
            } else {
                match &dom {
                    Some(dom) if dom.is_reachable(use_bb) => dom.dominates(def_bb, use_bb),
                    _ => true,
                }
            };
            if !dominated {
                return Err(Violation::UseNotDominated { user, value });
            }
        }
        Ok(())
    }
}

impl Plan {
    /// Shorthand for [`verify_plan`].
    pub fn verify(&self) -> Result<(), Violation> {
        verify_plan(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::{BinOp, Opcode, ScalarInst, ScalarType};
    use crate::{BlockContents, Context, External, ExternalDef, Inst, InstDef};
    use std::rc::Rc;

    /// `top: entry -> body -> exit` (no instructions yet).
    fn skeleton() -> (Plan, [BasicBlock; 3]) {
        let mut plan = Plan::new(Rc::new(Context::new()));
        let top = plan.create_region("top", false);
        let bbs = ["entry", "body", "exit"].map(|name| plan.create_basic_block(name));
        for bb in bbs {
            plan.insert_into_region(top, bb);
        }
        plan.regions[top].entry = Some(bbs[0].into());
        plan.regions[top].exiting = Some(bbs[2].into());
        plan.entry = Some(top.into());
        plan.connect(bbs[0], bbs[1]);
        plan.connect(bbs[1], bbs[2]);
        (plan, bbs)
    }

    fn add(plan: &mut Plan, bb: BasicBlock, operands: [Value; 2]) -> Inst {
        let inst = plan.insts.define(
            &plan.cx(),
            InstDef {
                opcode: Opcode::Binary(BinOp::Add),
                operands: operands.into_iter().collect(),
                ty: ScalarType::Int(64),
                underlying: ScalarInst(0),
            },
        );
        match &mut plan.basic_blocks[bb].contents {
            BlockContents::Insts(insts) => insts.push(inst),
            BlockContents::Recipes(_) => unreachable!(),
        }
        inst
    }

    fn one(plan: &mut Plan) -> Value {
        let one: External =
            plan.cx_ref().intern(ExternalDef::Const { ty: ScalarType::Int(64), bits: 1 });
        plan.external_defs.insert(one);
        Value::External(one)
    }

    #[test]
    fn well_formed() {
        let (mut plan, [_, body, exit]) = skeleton();
        let one = one(&mut plan);
        let a = add(&mut plan, body, [one, one]);
        add(&mut plan, exit, [Value::InstOutput(a), one]);
        assert_eq!(verify_plan(&plan), Ok(()));
    }

    #[test]
    fn empty_plan() {
        let plan = Plan::new(Rc::new(Context::new()));
        assert_eq!(verify_plan(&plan), Err(Violation::MissingEntry));
    }

    #[test]
    fn unmirrored_edge() {
        let (mut plan, [entry, body, _]) = skeleton();
        plan.basic_blocks[body].links.predecessors.clear();
        assert_eq!(
            verify_plan(&plan),
            Err(Violation::UnmirroredEdge { from: entry.into(), to: body.into() })
        );
    }

    #[test]
    fn cond_bit_without_two_successors() {
        let (mut plan, [_, body, _]) = skeleton();
        let one = one(&mut plan);
        plan.basic_blocks[body].cond_bit = Some(one);
        assert_eq!(
            verify_plan(&plan),
            Err(Violation::CondBitMismatch { node: body.into(), successors: 1, has_cond_bit: true })
        );
    }

    #[test]
    fn use_before_def() {
        let (mut plan, [_, body, exit]) = skeleton();
        let one = one(&mut plan);
        let late = add(&mut plan, exit, [one, one]);
        let early = add(&mut plan, body, [Value::InstOutput(late), one]);
        assert_eq!(
            verify_plan(&plan),
            Err(Violation::UseNotDominated { user: User::Inst(early), value: late.into() })
        );
    }

    #[test]
    fn unregistered_external() {
        let (mut plan, [_, body, _]) = skeleton();
        let two: External =
            plan.cx_ref().intern(ExternalDef::Const { ty: ScalarType::Int(64), bits: 2 });
        let a = add(&mut plan, body, [Value::External(two), Value::External(two)]);
        assert_eq!(
            verify_plan(&plan),
            Err(Violation::UnregisteredExternal { user: User::Inst(a), value: two.into() })
        );
    }

    #[test]
    fn dangling_operand() {
        let (mut plan, [_, body, _]) = skeleton();
        let one = one(&mut plan);
        let a = add(&mut plan, body, [one, one]);
        let b = add(&mut plan, body, [Value::InstOutput(a), one]);
        plan.insts.remove(a);
        if let BlockContents::Insts(insts) = &mut plan.basic_blocks[body].contents {
            insts.retain(|&inst| inst != a);
        }
        assert_eq!(
            verify_plan(&plan),
            Err(Violation::DanglingOperand { user: User::Inst(b), value: a.into() })
        );
    }

    #[test]
    fn detached_inst_after_elements() {
        let (mut plan, [_, body, _]) = skeleton();
        let one = one(&mut plan);
        let a = add(&mut plan, body, [one, one]);
        let b = add(&mut plan, body, [Value::InstOutput(a), one]);

        // Detaching `a` places it after `b`, its user.
        if let BlockContents::Insts(insts) = &mut plan.basic_blocks[body].contents {
            insts.retain(|&inst| inst != a);
        }
        plan.basic_blocks[body].detached.push(a);
        assert_eq!(
            verify_plan(&plan),
            Err(Violation::UseNotDominated { user: User::Inst(b), value: a.into() })
        );

        // Detaching `b` too (after `a`) restores the order.
        if let BlockContents::Insts(insts) = &mut plan.basic_blocks[body].contents {
            insts.clear();
        }
        plan.basic_blocks[body].detached.push(b);
        assert_eq!(verify_plan(&plan), Ok(()));
    }
}
