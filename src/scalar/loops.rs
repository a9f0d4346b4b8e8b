//! Natural loop queries over a scalar [`Function`].
//!
//! The HCFG builder only consumes loops through the [`LoopAnalysis`] trait,
//! so that any existing loop/dominator analysis can be plugged in, while
//! [`LoopForest`] is a self-contained implementation, based on detecting
//! backedges (`n -> h` where `h` dominates `n`) and growing each loop body
//! backwards from its latches.

use crate::dom::DomTree;
use crate::scalar::{Function, ScalarBlock};
use crate::{FxIndexMap, FxIndexSet};
use smallvec::SmallVec;

/// Handle for a natural loop, as identified by some [`LoopAnalysis`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Loop(pub u32);

/// Read-only loop/dominance queries, as needed by [`HcfgBuilder`](crate::hcfg::HcfgBuilder).
pub trait LoopAnalysis {
    /// The innermost loop containing `block`, if any.
    fn loop_for(&self, block: ScalarBlock) -> Option<Loop>;

    fn header(&self, lp: Loop) -> ScalarBlock;

    /// All blocks in `lp` (including those of nested loops).
    fn blocks(&self, lp: Loop) -> &[ScalarBlock];

    fn contains(&self, lp: Loop, block: ScalarBlock) -> bool {
        self.blocks(lp).contains(&block)
    }

    /// Blocks inside `lp` with a backedge to its header.
    fn latches(&self, lp: Loop) -> &[ScalarBlock];

    /// The only predecessor of the header from outside `lp`, if there is
    /// exactly one, and it has no other successors.
    fn preheader(&self, lp: Loop) -> Option<ScalarBlock>;

    /// Edges `(exiting, exit)` leaving `lp`, from blocks inside it.
    fn exit_edges(&self, lp: Loop) -> &[(ScalarBlock, ScalarBlock)];

    fn parent(&self, lp: Loop) -> Option<Loop>;

    fn dominates(&self, a: ScalarBlock, b: ScalarBlock) -> bool;
}

struct LoopData {
    header: ScalarBlock,
    blocks: Vec<ScalarBlock>,
    latches: SmallVec<[ScalarBlock; 1]>,
    preheader: Option<ScalarBlock>,
    exit_edges: SmallVec<[(ScalarBlock, ScalarBlock); 1]>,
    parent: Option<Loop>,
}

/// All the natural loops of a [`Function`], with their nesting.
pub struct LoopForest {
    dom: DomTree<ScalarBlock>,

    /// Loops ordered by their header's RPO position (so outer loops always
    /// precede the loops nested in them).
    loops: Vec<LoopData>,

    innermost: FxIndexMap<ScalarBlock, Loop>,
}

impl LoopForest {
    pub fn compute(func: &Function) -> Self {
        let Some(entry) = func.entry_block() else {
            return Self {
                dom: DomTree::compute(ScalarBlock(0), |_| []),
                loops: vec![],
                innermost: FxIndexMap::default(),
            };
        };
        let dom = DomTree::compute(entry, |block| func.successors(block));

        // Find all backedges, grouping them (and the loop bodies) by header.
        let mut bodies: FxIndexMap<
            ScalarBlock,
            (SmallVec<[ScalarBlock; 1]>, FxIndexSet<ScalarBlock>),
        > = FxIndexMap::default();
        for &block in dom.rev_post_order() {
            for succ in func.successors(block) {
                if !dom.dominates(succ, block) {
                    continue;
                }
                let (latches, body) = bodies.entry(succ).or_insert_with(|| {
                    (SmallVec::new(), [succ].into_iter().collect())
                });
                if !latches.contains(&block) {
                    latches.push(block);
                }

                // Grow the body backwards from the latch, stopping at the header.
                let mut worklist = vec![block];
                while let Some(node) = worklist.pop() {
                    if body.insert(node) {
                        worklist.extend(
                            func.predecessors(node).into_iter().filter(|&p| dom.is_reachable(p)),
                        );
                    }
                }
            }
        }

        let mut headers: Vec<_> = bodies.keys().copied().collect();
        headers.sort_by_key(|&h| dom.rpo_index(h));

        let mut loops: Vec<LoopData> = headers
            .iter()
            .map(|header| {
                let (latches, body) = &bodies[header];
                let mut blocks: Vec<_> = body.iter().copied().collect();
                blocks.sort_by_key(|&b| dom.rpo_index(b));

                let outside_preds: SmallVec<[_; 1]> = func
                    .predecessors(*header)
                    .into_iter()
                    .filter(|p| !body.contains(p))
                    .collect();
                let preheader = match outside_preds[..] {
                    [pred] if func.successors(pred).as_slice() == [*header] => Some(pred),
                    _ => None,
                };

                let exit_edges = blocks
                    .iter()
                    .flat_map(move |&b| {
                        func.successors(b)
                            .into_iter()
                            .filter(move |s| !body.contains(s))
                            .map(move |s| (b, s))
                    })
                    .collect();

                LoopData {
                    header: *header,
                    blocks,
                    latches: latches.clone(),
                    preheader,
                    exit_edges,
                    parent: None,
                }
            })
            .collect();

        // The parent of a loop is the closest (i.e. last in RPO order) earlier
        // loop that contains its header.
        for i in 0..loops.len() {
            let header = loops[i].header;
            loops[i].parent = (0..i)
                .rev()
                .find(|&j| loops[j].blocks.contains(&header))
                .map(|j| Loop(j as u32));
        }

        let mut innermost = FxIndexMap::default();
        for (i, data) in loops.iter().enumerate() {
            for &block in &data.blocks {
                // Later loops are nested deeper, so they overwrite outer ones.
                innermost.insert(block, Loop(i as u32));
            }
        }

        Self { dom, loops, innermost }
    }

    pub fn loops(&self) -> impl ExactSizeIterator<Item = Loop> + use<> {
        (0..self.loops.len() as u32).map(Loop)
    }

    pub fn top_level_loops(&self) -> impl Iterator<Item = Loop> + '_ {
        self.loops().filter(|&lp| self.parent(lp).is_none())
    }

    pub fn depth(&self, lp: Loop) -> usize {
        std::iter::successors(Some(lp), |&lp| self.parent(lp)).count()
    }

    pub fn dom_tree(&self) -> &DomTree<ScalarBlock> {
        &self.dom
    }

    fn data(&self, lp: Loop) -> &LoopData {
        &self.loops[lp.0 as usize]
    }
}

impl LoopAnalysis for LoopForest {
    fn loop_for(&self, block: ScalarBlock) -> Option<Loop> {
        self.innermost.get(&block).copied()
    }

    fn header(&self, lp: Loop) -> ScalarBlock {
        self.data(lp).header
    }

    fn blocks(&self, lp: Loop) -> &[ScalarBlock] {
        &self.data(lp).blocks
    }

    fn latches(&self, lp: Loop) -> &[ScalarBlock] {
        &self.data(lp).latches
    }

    fn preheader(&self, lp: Loop) -> Option<ScalarBlock> {
        self.data(lp).preheader
    }

    fn exit_edges(&self, lp: Loop) -> &[(ScalarBlock, ScalarBlock)] {
        &self.data(lp).exit_edges
    }

    fn parent(&self, lp: Loop) -> Option<Loop> {
        self.data(lp).parent
    }

    fn dominates(&self, a: ScalarBlock, b: ScalarBlock) -> bool {
        self.dom.dominates(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::{BinOp, IntPredicate, ScalarType, ScalarValue};

    #[test]
    fn single_block_loop() {
        let f = crate::scalar::tests::inner_loop();
        let forest = LoopForest::compute(&f);
        let [entry, body, end] = [0, 1, 2].map(|i| f.blocks().nth(i).unwrap());

        let lp = forest.loop_for(body).unwrap();
        assert_eq!(forest.loops().len(), 1);
        assert_eq!(forest.header(lp), body);
        assert_eq!(forest.blocks(lp), [body]);
        assert_eq!(forest.latches(lp), [body]);
        assert_eq!(forest.preheader(lp), Some(entry));
        assert_eq!(forest.exit_edges(lp), [(body, end)]);
        assert_eq!(forest.parent(lp), None);
        assert_eq!(forest.loop_for(entry), None);
        assert!(forest.dominates(entry, end));
    }

    /// ```text
    /// entry -> outer.header -> inner.header <-> inner.header (self-loop)
    ///          inner.header -> outer.latch -> {outer.header, exit}
    /// ```
    #[test]
    fn nested_loops() {
        let mut f = Function::new("nested", [ScalarType::Int(64)]);
        let entry = f.add_block("entry");
        let outer = f.add_block("outer.header");
        let inner = f.add_block("inner.header");
        let latch = f.add_block("outer.latch");
        let exit = f.add_block("exit");
        let n = f.param(0);

        f.br(entry, outer);
        let i = f.phi(outer, ScalarType::Int(64));
        f.br(outer, inner);
        let j = f.phi(inner, ScalarType::Int(64));
        let j_next = f.binary(inner, BinOp::Add, j, ScalarValue::int(64, 1));
        let inner_cond = f.icmp(inner, IntPredicate::Ult, j_next, n);
        f.cond_br(inner, inner_cond, inner, latch);
        let i_next = f.binary(latch, BinOp::Add, i, ScalarValue::int(64, 1));
        let outer_cond = f.icmp(latch, IntPredicate::Ult, i_next, n);
        f.cond_br(latch, outer_cond, outer, exit);
        f.ret(exit, None);
        f.add_incoming(i, ScalarValue::int(64, 0), entry);
        f.add_incoming(i, i_next, latch);
        f.add_incoming(j, ScalarValue::int(64, 0), outer);
        f.add_incoming(j, j_next, inner);

        let forest = LoopForest::compute(&f);
        assert_eq!(forest.loops().len(), 2);
        let outer_loop = forest.loop_for(outer).unwrap();
        let inner_loop = forest.loop_for(inner).unwrap();
        assert_ne!(outer_loop, inner_loop);
        assert_eq!(forest.parent(inner_loop), Some(outer_loop));
        assert_eq!(forest.top_level_loops().collect::<Vec<_>>(), [outer_loop]);
        assert_eq!(forest.depth(inner_loop), 2);
        assert_eq!(forest.blocks(outer_loop), [outer, inner, latch]);
        assert_eq!(forest.preheader(inner_loop), Some(outer));
        assert_eq!(forest.exit_edges(inner_loop), [(inner, latch)]);
        assert_eq!(forest.exit_edges(outer_loop), [(latch, exit)]);
        assert_eq!(forest.loop_for(latch), Some(outer_loop));
    }
}
