//! Plain-text dumps of a [`Plan`], for debugging and tests.
//!
//! The output lists every node in the hierarchical CFG (with nested regions
//! indented), one element per line, e.g.:
//! ```text
//! region TopRegion {
//!   for.body:  ; preds: entry, for.body
//!     v0 = widen-phi [i64 0, v5] : i64
//!     v1 = widen getelementptr inbounds i32 [@f.arg0, v0] : ptr
//!     ...
//!     br v6 ? for.body : for.end
//! }
//! ```

use crate::plan_at::PlanAt;
use crate::{
    BasicBlock, BlockElement, CfgNode, Context, ExternalDef, MemAccessKind, Plan, RecipeKind,
    Region, Value,
};
use itertools::Itertools as _;
use rustc_hash::FxHashMap;
use std::fmt::{self, Write as _};

impl Plan {
    /// Printable form of the whole plan (use `.to_string()` for a [`String`]).
    pub fn print(&self) -> Printed<'_> {
        Printed { plan: self }
    }
}

pub struct Printed<'a> {
    plan: &'a Plan,
}

impl fmt::Display for Printed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(entry) = self.plan.entry else {
            return f.write_str("<empty plan>\n");
        };

        let mut printer = Printer {
            plan: self.plan,
            cx: self.plan.cx_ref(),
            node_names: FxHashMap::default(),
            value_names: FxHashMap::default(),
        };
        printer.name_node(entry);

        let mut out = String::new();
        printer.print_node(&mut out, entry, 0)?;
        f.write_str(&out)
    }
}

struct Printer<'a> {
    plan: &'a Plan,
    cx: &'a Context,

    node_names: FxHashMap<CfgNode, String>,
    value_names: FxHashMap<Value, String>,
}

impl Printer<'_> {
    /// Name `node` and everything in it, in printing order (so that numbering
    /// is stable, and phis can refer to values printed later).
    fn name_node(&mut self, node: CfgNode) {
        let plan = self.plan;

        let base_name = match node {
            CfgNode::BasicBlock(bb) => self.cx[plan.basic_blocks[bb].name].to_string(),
            CfgNode::Region(region) => match plan.regions[region].name {
                Some(name) => self.cx[name].to_string(),
                None => "region".to_string(),
            },
        };
        let mut name = base_name.clone();
        let mut suffix = 1;
        while self.node_names.values().any(|existing| *existing == name) {
            name = format!("{base_name}.{suffix}");
            suffix += 1;
        }
        self.node_names.insert(node, name);

        match node {
            CfgNode::BasicBlock(bb) => {
                let plan_at_bb = plan.at(bb);
                let outputs = plan_at_bb
                    .elements()
                    .map(BlockElement::output)
                    .chain(plan_at_bb.detached_insts().iter().copied().map(Value::InstOutput));
                for output in outputs {
                    let name = format!("v{}", self.value_names.len());
                    self.value_names.insert(output, name);
                }
            }
            CfgNode::Region(region) => {
                for &child in &plan.regions[region].children {
                    self.name_node(child);
                }
            }
        }
    }

    fn node_name(&self, node: CfgNode) -> &str {
        self.node_names.get(&node).map_or("<unknown>", String::as_str)
    }

    fn value(&self, v: Value) -> String {
        let cx = self.cx;
        match v {
            Value::External(external) => match &cx[external] {
                ExternalDef::FuncParam { func, idx, .. } => format!("@{}.arg{idx}", &cx[*func]),
                ExternalDef::Const { ty, bits } => format!("{ty} {bits}"),
                ExternalDef::Undef(ty) => format!("{ty} undef"),
                ExternalDef::Inst { func, inst, .. } => {
                    format!("@{}.inst{}", &cx[*func], inst.index())
                }
            },
            Value::InstOutput(_) | Value::RecipeOutput(_) => match self.value_names.get(&v) {
                Some(name) => name.clone(),
                None => format!("<dangling {v:?}>"),
            },
        }
    }

    fn print_node(&self, out: &mut String, node: CfgNode, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        let plan_at_node = self.plan.at(node);

        match node {
            CfgNode::BasicBlock(bb) => self.print_basic_block(out, self.plan.at(bb), depth)?,
            CfgNode::Region(region) => self.print_region(out, region, depth)?,
        }

        // NOTE(eddyb) block successors are printed as their terminator.
        if let CfgNode::Region(_) = node {
            if !plan_at_node.successors().is_empty() {
                let succs = plan_at_node.successors().iter().map(|&succ| self.node_name(succ));
                writeln!(out, "{indent}-> {}", succs.format(", "))?;
            }
        }
        Ok(())
    }

    fn print_region(&self, out: &mut String, region: Region, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        let region_def = &self.plan.regions[region];

        let kind = if region_def.is_replicator { "replicate-region" } else { "region" };
        writeln!(out, "{indent}{kind} {} {{", self.node_name(region.into()))?;
        for &child in &region_def.children {
            self.print_node(out, child, depth + 1)?;
        }
        writeln!(out, "{indent}}}")
    }

    fn print_basic_block(
        &self,
        out: &mut String,
        plan_at_bb: PlanAt<'_, BasicBlock>,
        depth: usize,
    ) -> fmt::Result {
        let indent = "  ".repeat(depth);
        let bb = plan_at_bb.position;

        write!(out, "{indent}{}:", self.node_name(bb.into()))?;
        if plan_at_bb.num_predecessors() > 0 {
            let preds = plan_at_bb.predecessors().iter().map(|&pred| self.node_name(pred));
            write!(out, "  ; preds: {}", preds.format(", "))?;
        }
        out.push('\n');

        let elements = plan_at_bb.elements().map(|element| (element, false));
        let detached =
            plan_at_bb.detached_insts().iter().map(|&inst| (BlockElement::Inst(inst), true));
        for (element, is_detached) in elements.chain(detached) {
            write!(out, "{indent}  ")?;
            if is_detached {
                out.push_str("(detached) ");
            }
            self.print_element(out, plan_at_bb.at(element))?;
            out.push('\n');
        }

        match (plan_at_bb.successors(), plan_at_bb.cond_bit()) {
            ([], _) => {}
            (&[succ], _) => writeln!(out, "{indent}  br {}", self.node_name(succ))?,
            (&[if_true, if_false], Some(cond_bit)) => writeln!(
                out,
                "{indent}  br {} ? {} : {}",
                self.value(cond_bit),
                self.node_name(if_true),
                self.node_name(if_false),
            )?,
            (succs, _) => {
                let succs = succs.iter().map(|&succ| self.node_name(succ));
                writeln!(out, "{indent}  br <no condition> {}", succs.format(", "))?;
            }
        }
        Ok(())
    }

    fn print_element(
        &self,
        out: &mut String,
        plan_at_element: PlanAt<'_, BlockElement>,
    ) -> fmt::Result {
        let element = plan_at_element.position;
        let (what, ty) = match element {
            BlockElement::Inst(inst) => {
                let inst_def = plan_at_element.at(inst).def();
                (inst_def.opcode.to_string(), inst_def.ty)
            }
            BlockElement::Recipe(recipe) => {
                let recipe_def = plan_at_element.at(recipe).def();
                let what = match &recipe_def.kind {
                    RecipeKind::WidenPhi { induction: None } => "widen-phi".to_string(),
                    RecipeKind::WidenPhi { induction: Some(_) } => {
                        "widen-phi (induction)".to_string()
                    }
                    RecipeKind::Widen { opcode } => format!("widen {opcode}"),
                    RecipeKind::WidenMemory(access) => {
                        let kind = match access.kind {
                            MemAccessKind::Load => "load",
                            MemAccessKind::Store => "store",
                        };
                        match access.align {
                            Some(align) => format!("widen-memory {kind} (align {align})"),
                            None => format!("widen-memory {kind}"),
                        }
                    }
                };
                (what, recipe_def.ty)
            }
        };

        let operands = plan_at_element.operands().iter().map(|&v| self.value(v));
        if ty == crate::scalar::ScalarType::Void {
            write!(out, "{what} [{}]", operands.format(", "))
        } else {
            let name = self.value(element.output());
            write!(out, "{name} = {what} [{}] : {ty}", operands.format(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::hcfg::HcfgBuilder;
    use crate::scalar::loops::LoopForest;
    use crate::{Context, Plan};
    use std::rc::Rc;

    #[test]
    fn empty() {
        let plan = Plan::new(Rc::new(Context::new()));
        assert_eq!(plan.print().to_string(), "<empty plan>\n");
    }

    #[test]
    fn inner_loop() {
        let f = crate::scalar::tests::inner_loop();
        let forest = LoopForest::compute(&f);
        let lp = forest.top_level_loops().next().unwrap();
        let mut plan = Plan::new(Rc::new(Context::new()));
        HcfgBuilder::new(&f, &forest, lp).build_hierarchical_cfg(&mut plan).unwrap();

        let expected = "\
region TopRegion {
  entry:
    br for.body
  for.body:  ; preds: entry, for.body
    v0 = phi [i64 0, v5] : i64
    v1 = getelementptr inbounds i32 [@f.arg0, v0] : ptr
    v2 = load [v1] : i32
    v3 = add [v2, i32 10] : i32
    store [v3, v1]
    v5 = add [v0, i64 1] : i64
    v6 = icmp ne [v5, @f.arg1] : i1
    br v6 ? for.body : for.end
  for.end:  ; preds: for.body
    ret []
}
";
        assert_eq!(plan.print().to_string(), expected);
    }
}
