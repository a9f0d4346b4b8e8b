//! Dominator trees, over any graph given as an entry and a successor function.
//!
//! Uses the "engineered" iterative algorithm from "A Simple, Fast Dominance
//! Algorithm" (Cooper, Harvey and Kennedy), which intersects dominator chains
//! by their reverse post-order (RPO) position until a fixpoint is reached.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::hash::Hash;

pub struct DomTree<N> {
    /// All nodes reachable from the entry (which is always `rpo[0]`).
    rpo: Vec<N>,
    rpo_idx: FxHashMap<N, usize>,

    /// `idom[i]` is the RPO index of the immediate dominator of `rpo[i]`
    /// (with the entry being its own immediate dominator).
    idom: Vec<usize>,
}

impl<N: Copy + Eq + Hash> DomTree<N> {
    pub fn compute<I: IntoIterator<Item = N>>(
        entry: N,
        mut successors: impl FnMut(N) -> I,
    ) -> Self {
        let rpo = reverse_post_order(entry, &mut successors);
        let rpo_idx: FxHashMap<_, _> = rpo.iter().enumerate().map(|(i, &n)| (n, i)).collect();

        let mut preds = vec![SmallVec::<[usize; 2]>::new(); rpo.len()];
        for (i, &node) in rpo.iter().enumerate() {
            for succ in successors(node) {
                preds[rpo_idx[&succ]].push(i);
            }
        }

        const UNDEF: usize = usize::MAX;
        let mut idom = vec![UNDEF; rpo.len()];
        idom[0] = 0;

        let intersect = |idom: &[usize], mut a: usize, mut b: usize| {
            while a != b {
                while a > b {
                    a = idom[a];
                }
                while b > a {
                    b = idom[b];
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for i in 1..rpo.len() {
                let new_idom = preds[i]
                    .iter()
                    .copied()
                    .filter(|&p| idom[p] != UNDEF)
                    .reduce(|a, b| intersect(&idom, a, b));
                if let Some(new_idom) = new_idom {
                    if idom[i] != new_idom {
                        idom[i] = new_idom;
                        changed = true;
                    }
                }
            }
        }

        Self { rpo, rpo_idx, idom }
    }

    pub fn entry(&self) -> N {
        self.rpo[0]
    }

    /// Reachable nodes, in reverse post-order.
    pub fn rev_post_order(&self) -> &[N] {
        &self.rpo
    }

    pub fn rpo_index(&self, node: N) -> Option<usize> {
        self.rpo_idx.get(&node).copied()
    }

    pub fn is_reachable(&self, node: N) -> bool {
        self.rpo_idx.contains_key(&node)
    }

    /// Immediate dominator of `node` (`None` for the entry, or unreachable nodes).
    pub fn idom(&self, node: N) -> Option<N> {
        let i = self.rpo_index(node)?;
        (i != 0).then(|| self.rpo[self.idom[i]])
    }

    /// Whether every path from the entry to `b` goes through `a` (which
    /// includes `a == b`). Unreachable nodes dominate, and are dominated by,
    /// nothing.
    pub fn dominates(&self, a: N, b: N) -> bool {
        let (Some(a), Some(mut b)) = (self.rpo_index(a), self.rpo_index(b)) else {
            return false;
        };
        // NOTE(eddyb) dominators always precede in RPO, so walking up from `b`
        // can stop as soon as it goes past `a`.
        while b > a {
            b = self.idom[b];
        }
        a == b
    }
}

/// Depth-first reverse post-order, visiting successors in their given order.
pub(crate) fn reverse_post_order<N: Copy + Eq + Hash, I: IntoIterator<Item = N>>(
    entry: N,
    successors: &mut impl FnMut(N) -> I,
) -> Vec<N> {
    let mut visited = rustc_hash::FxHashSet::default();
    let mut post_order = vec![];

    // Explicit stack of `(node, remaining successors)`, to avoid recursion.
    let mut stack: Vec<(N, std::vec::IntoIter<N>)> = vec![];
    visited.insert(entry);
    stack.push((entry, successors(entry).into_iter().collect::<Vec<_>>().into_iter()));
    while let Some((node, succs)) = stack.last_mut() {
        match succs.find(|succ| !visited.contains(succ)) {
            Some(succ) => {
                visited.insert(succ);
                let succ_succs = successors(succ).into_iter().collect::<Vec<_>>().into_iter();
                stack.push((succ, succ_succs));
            }
            None => {
                post_order.push(*node);
                stack.pop();
            }
        }
    }

    post_order.reverse();
    post_order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &'static [(u32, u32)]) -> impl FnMut(u32) -> Vec<u32> {
        move |n| edges.iter().filter(|&&(from, _)| from == n).map(|&(_, to)| to).collect()
    }

    #[test]
    fn diamond_with_loop() {
        // 0 -> 1 -> {2, 3} -> 4 -> 1 (backedge), 4 -> 5
        let edges = &[(0, 1), (1, 2), (1, 3), (2, 4), (3, 4), (4, 1), (4, 5)];
        let dom = DomTree::compute(0, graph(edges));

        assert_eq!(dom.rev_post_order()[0], 0);
        assert_eq!(dom.idom(0), None);
        assert_eq!(dom.idom(1), Some(0));
        assert_eq!(dom.idom(2), Some(1));
        assert_eq!(dom.idom(3), Some(1));
        assert_eq!(dom.idom(4), Some(1));
        assert_eq!(dom.idom(5), Some(4));

        assert!(dom.dominates(1, 5));
        assert!(dom.dominates(4, 4));
        assert!(!dom.dominates(2, 4));
        assert!(!dom.dominates(5, 1));
    }

    #[test]
    fn unreachable_nodes_are_excluded() {
        let edges = &[(0, 1), (7, 1)];
        let dom = DomTree::compute(0, graph(edges));
        assert!(dom.is_reachable(1));
        assert!(!dom.is_reachable(7));
        assert!(!dom.dominates(7, 1));
        assert_eq!(dom.idom(7), None);
    }
}
