//! Control-flow graph (CFG) editing and traversal, for the hierarchical CFG
//! of a [`Plan`] (i.e. [`CfgNode`]s nested in [`Region`]s).
//!
//! All edge editing goes through the methods here, which keep the
//! predecessor/successor lists of [`NodeLinks`] exact mirrors of eachother.

use crate::dom::DomTree;
use crate::{
    BasicBlock, BasicBlockDef, BlockContents, CfgNode, NodeLinks, Plan, Region, RegionDef, Value,
};
use itertools::Either;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

impl Plan {
    pub fn create_basic_block(&mut self, name: &str) -> BasicBlock {
        let cx = self.cx();
        self.basic_blocks.define(
            &cx,
            BasicBlockDef {
                name: cx.intern(name),
                links: NodeLinks::default(),
                contents: BlockContents::default(),
                detached: vec![],
                cond_bit: None,
            },
        )
    }

    pub fn create_region(&mut self, name: &str, is_replicator: bool) -> Region {
        let cx = self.cx();
        self.regions.define(
            &cx,
            RegionDef { name: Some(cx.intern(name)), is_replicator, ..Default::default() },
        )
    }

    /// Attach `node` (which must not have a parent yet) to `region`, as its
    /// last child.
    pub fn insert_into_region(&mut self, region: Region, node: impl Into<CfgNode>) {
        let node = node.into();
        let links = self.at_mut(node).links();
        assert!(links.parent.is_none(), "cfg: {node:?} already has a parent");
        links.parent = Some(region);
        self.regions[region].children.push(node);
    }

    /// Add the edge `from -> to`, which must not exist yet, and can only be
    /// between siblings (i.e. nodes with the same parent [`Region`]).
    ///
    /// A node can have at most two successors, and a second one requires a
    /// condition bit (see [`Plan::set_two_successors`]).
    pub fn connect(&mut self, from: impl Into<CfgNode>, to: impl Into<CfgNode>) {
        let (from, to) = (from.into(), to.into());
        assert_eq!(
            self.at(from).parent(),
            self.at(to).parent(),
            "cfg: {from:?} -> {to:?} would cross region boundaries"
        );

        let succs = &mut self.at_mut(from).links().successors;
        assert!(!succs.contains(&to), "cfg: duplicate edge {from:?} -> {to:?}");
        if succs.try_push(to).is_err() {
            panic!("cfg: {from:?} already has two successors");
        }
        self.at_mut(to).links().predecessors.push(from);
    }

    /// Add the edges `from -> if_true` and `from -> if_false` (in that order),
    /// choosing between them with `cond_bit`.
    pub fn set_two_successors(
        &mut self,
        from: BasicBlock,
        cond_bit: Value,
        if_true: impl Into<CfgNode>,
        if_false: impl Into<CfgNode>,
    ) {
        assert!(
            self.at(from).successors().is_empty(),
            "cfg: {from:?} already has successors"
        );
        self.connect(from, if_true);
        self.connect(from, if_false);
        self.basic_blocks[from].cond_bit = Some(cond_bit);
    }

    /// Remove the edge `from -> to`, returning whether it existed.
    ///
    /// Any condition bit of `from` is also removed, as it can't choose between
    /// less than two successors.
    pub fn disconnect(&mut self, from: impl Into<CfgNode>, to: impl Into<CfgNode>) -> bool {
        let (from, to) = (from.into(), to.into());

        let succs = &mut self.at_mut(from).links().successors;
        let Some(succ_idx) = succs.iter().position(|&succ| succ == to) else {
            return false;
        };
        succs.remove(succ_idx);

        let preds = &mut self.at_mut(to).links().predecessors;
        if let Some(pred_idx) = preds.iter().position(|&pred| pred == from) {
            preds.remove(pred_idx);
        }

        if let CfgNode::BasicBlock(from) = from {
            self.basic_blocks[from].cond_bit = None;
        }
        true
    }

    /// Remove `node` and everything it owns (for a [`Region`], recursively
    /// all of its children), after disconnecting all of its edges.
    ///
    /// Nothing is done about *uses* of [`Value`]s defined by removed elements,
    /// see [`visit`](crate::visit) for finding them first.
    pub fn remove_node(&mut self, node: impl Into<CfgNode>) {
        let node = node.into();

        let links = self.at(node).links().clone();
        for succ in links.successors {
            self.disconnect(node, succ);
        }
        for pred in links.predecessors {
            self.disconnect(pred, node);
        }

        if let Some(parent) = links.parent {
            let parent_def = &mut self.regions[parent];
            parent_def.children.retain(|&child| child != node);
            if parent_def.entry == Some(node) {
                parent_def.entry = None;
            }
            if parent_def.exiting == Some(node) {
                parent_def.exiting = None;
            }
        }
        if self.entry == Some(node) {
            self.entry = None;
        }

        self.remove_subtree(node);
    }

    fn remove_subtree(&mut self, node: CfgNode) {
        match node {
            CfgNode::BasicBlock(bb) => {
                let Some(bb_def) = self.basic_blocks.remove(bb) else {
                    return;
                };
                match bb_def.contents {
                    BlockContents::Insts(insts) => {
                        for inst in insts {
                            self.insts.remove(inst);
                        }
                    }
                    BlockContents::Recipes(recipes) => {
                        for recipe in recipes {
                            self.recipes.remove(recipe);
                        }
                    }
                }
                // NOTE(eddyb) a condition bit may be backed by an instruction
                // that isn't part of the block (see `passes::recipes`).
                if let Some(Value::InstOutput(inst)) = bb_def.cond_bit {
                    self.insts.remove(inst);
                }
            }
            CfgNode::Region(region) => {
                let Some(region_def) = self.regions.remove(region) else {
                    return;
                };
                for child in region_def.children {
                    self.remove_subtree(child);
                }
            }
        }
    }

    /// The successors of `bb` in the "flattened" CFG, i.e. with [`Region`]s
    /// replaced by their entry [`BasicBlock`], and with the successors of a
    /// [`Region`] applying to its exiting [`BasicBlock`].
    pub fn flattened_successors(&self, bb: BasicBlock) -> SmallVec<[BasicBlock; 2]> {
        self.at(bb)
            .hierarchical_successors()
            .iter()
            .filter_map(|&succ| self.at(succ).entry_basic_block())
            .collect()
    }

    /// Iterate over all [`BasicBlock`]s reachable from [`Plan::entry`], in
    /// reverse post-order (RPO) of the flattened CFG.
    ///
    /// RPO iteration over a CFG provides certain guarantees, most importantly
    /// that dominators are visited before the entire subgraph they dominate.
    pub fn rev_post_order(&self) -> impl DoubleEndedIterator<Item = BasicBlock> + use<> {
        let mut post_order = SmallVec::<[_; 8]>::new();
        if let Some(entry) = self.entry_basic_block() {
            self.traverse(
                entry,
                &mut TraversalState {
                    visited: FxHashSet::default(),

                    pre_order_visit: |_| {},
                    post_order_visit: |bb| post_order.push(bb),

                    // NOTE(eddyb) this doesn't impact semantics, but combined with
                    // the final reversal, it keeps successors in their original
                    // order (e.g. the loop body before the loop exit).
                    reverse_targets: true,
                },
            );
        }
        post_order.into_iter().rev()
    }

    /// Compute the dominator tree of the flattened CFG (see [`Plan::rev_post_order`]).
    pub fn dom_tree(&self) -> Option<DomTree<BasicBlock>> {
        let entry = self.entry_basic_block()?;
        Some(DomTree::compute(entry, |bb| self.flattened_successors(bb)))
    }

    fn traverse(
        &self,
        bb: BasicBlock,
        state: &mut TraversalState<impl FnMut(BasicBlock), impl FnMut(BasicBlock)>,
    ) {
        if !state.visited.insert(bb) {
            return;
        }

        (state.pre_order_visit)(bb);

        let targets = self.flattened_successors(bb).into_iter();
        let targets = if state.reverse_targets {
            Either::Left(targets.rev())
        } else {
            Either::Right(targets)
        };
        for target in targets {
            self.traverse(target, state);
        }

        (state.post_order_visit)(bb);
    }
}

struct TraversalState<PreVisit: FnMut(BasicBlock), PostVisit: FnMut(BasicBlock)> {
    visited: FxHashSet<BasicBlock>,
    pre_order_visit: PreVisit,
    post_order_visit: PostVisit,

    reverse_targets: bool,
}

#[cfg(test)]
mod tests {
    use crate::{CfgNode, Context, External, ExternalDef, Plan, Value};
    use crate::scalar::ScalarType;
    use std::rc::Rc;

    fn cond(plan: &Plan) -> Value {
        let ext: External = plan.cx_ref().intern(ExternalDef::Undef(ScalarType::Int(1)));
        Value::External(ext)
    }

    #[test]
    fn edges_are_mirrored() {
        let mut plan = Plan::new(Rc::new(Context::new()));
        let top = plan.create_region("top", false);
        let [a, b, c] = ["a", "b", "c"].map(|name| plan.create_basic_block(name));
        for bb in [a, b, c] {
            plan.insert_into_region(top, bb);
        }

        plan.connect(a, b);
        let cond = cond(&plan);
        plan.set_two_successors(b, cond, b, c);

        assert_eq!(plan.at(a).successors(), [CfgNode::from(b)]);
        assert_eq!(plan.at(b).predecessors(), [CfgNode::from(a), CfgNode::from(b)]);
        assert_eq!(plan.at(b).num_successors(), 2);
        assert_eq!(plan.at(b).cond_bit(), Some(cond));
        assert_eq!(plan.at(c).single_predecessor(), Some(b.into()));

        assert!(plan.disconnect(b, b));
        assert!(!plan.disconnect(b, b));
        assert_eq!(plan.at(b).cond_bit(), None);
        assert_eq!(plan.at(b).single_successor(), Some(c.into()));
        assert_eq!(plan.at(b).single_predecessor(), Some(a.into()));
    }

    #[test]
    #[should_panic(expected = "cross region boundaries")]
    fn edges_stay_within_regions() {
        let mut plan = Plan::new(Rc::new(Context::new()));
        let top = plan.create_region("top", false);
        let a = plan.create_basic_block("a");
        let b = plan.create_basic_block("b");
        plan.insert_into_region(top, a);
        plan.connect(a, b);
    }

    #[test]
    fn nested_regions_flatten() {
        // top: a -> inner -> d, with inner: b -> c
        let mut plan = Plan::new(Rc::new(Context::new()));
        let top = plan.create_region("top", false);
        let inner = plan.create_region("inner", false);
        let [a, b, c, d] = ["a", "b", "c", "d"].map(|name| plan.create_basic_block(name));
        plan.insert_into_region(top, a);
        plan.insert_into_region(top, inner);
        plan.insert_into_region(top, d);
        plan.insert_into_region(inner, b);
        plan.insert_into_region(inner, c);
        plan.regions[top].entry = Some(a.into());
        plan.regions[top].exiting = Some(d.into());
        plan.regions[inner].entry = Some(b.into());
        plan.regions[inner].exiting = Some(c.into());
        plan.entry = Some(top.into());

        plan.connect(a, inner);
        plan.connect(b, c);
        plan.connect(inner, d);

        assert_eq!(plan.entry_basic_block(), Some(a));
        let a_succ = plan.at(a).single_successor();
        assert_eq!(a_succ.and_then(|s| plan.at(s).entry_basic_block()), Some(b));
        assert_eq!(plan.flattened_successors(c).as_slice(), [d]);
        assert_eq!(plan.rev_post_order().collect::<Vec<_>>(), [a, b, c, d]);

        let dom = plan.dom_tree().unwrap();
        assert!(dom.dominates(b, d));
        assert_eq!(dom.idom(c), Some(b));

        plan.remove_node(inner);
        assert!(!plan.regions.contains(inner));
        assert!(!plan.basic_blocks.contains(b) && !plan.basic_blocks.contains(c));
        assert_eq!(plan.at(a).num_successors(), 0);
        assert_eq!(plan.at(d).num_predecessors(), 0);
        assert_eq!(plan.regions[top].children, [CfgNode::from(a), CfgNode::from(d)]);
    }
}
