mod common;

use common::{block_named, build, inner_loop, multi_block, nested};
use vecplan::scalar::{Function, Opcode, ScalarType};
use vecplan::{CfgNode, ExternalDef, Inst, PlanError, ShapeError, Value};

#[test]
fn inner_loop_structure() {
    let l = inner_loop();
    let plan = build(&l.func, l.body).unwrap();

    // The entry block stands in for the preheader.
    let entry = plan.entry_basic_block().unwrap();
    let plan_at_entry = plan.at(entry);
    assert_eq!(plan_at_entry.num_successors(), 1);
    assert_eq!(plan_at_entry.num_predecessors(), 0);
    assert!(plan_at_entry.is_empty());

    let body = block_named(&plan, "for.body");
    assert_eq!(plan_at_entry.single_successor(), Some(CfgNode::from(body)));

    let plan_at_body = plan.at(body);
    assert_eq!(plan_at_body.num_predecessors(), 2);
    assert_eq!(plan_at_body.predecessors(), [CfgNode::from(entry), CfgNode::from(body)]);
    assert_eq!(plan_at_body.num_successors(), 2);
    assert_eq!(plan_at_body.len(), 7);

    let exit = block_named(&plan, "for.end");
    assert_eq!(plan_at_body.successors(), [CfgNode::from(body), CfgNode::from(exit)]);
    assert_eq!(plan.at(exit).num_successors(), 0);

    assert_eq!(plan.verify(), Ok(()));
}

#[test]
fn operands_mirror_scalar_uses() {
    let l = inner_loop();
    let plan = build(&l.func, l.body).unwrap();
    let body = block_named(&plan, "for.body");

    let insts = plan.at(body).insts();
    let [phi, gep, load, add, store, iv_next, icmp] =
        [0, 1, 2, 3, 4, 5, 6].map(|i| insts[i]);
    let underlying: Vec<_> = insts.iter().map(|&inst| plan.insts[inst].underlying).collect();
    assert_eq!(underlying, [l.phi, l.gep, l.load, l.add, l.store, l.iv_next, l.exitcond]);

    let operand = |inst: Inst, i: usize| plan.at(inst).def().operands[i];
    assert_eq!(operand(gep, 1), Value::from(phi));
    assert_eq!(operand(load, 0), Value::from(gep));
    assert_eq!(operand(add, 0), Value::from(load));
    assert_eq!(operand(store, 0), Value::from(add));
    assert_eq!(operand(store, 1), Value::from(gep));
    assert_eq!(operand(iv_next, 0), Value::from(phi));
    assert_eq!(operand(icmp, 0), Value::from(iv_next));

    // Back-edge operand of the phi, filled in after the whole loop was built.
    assert_eq!(operand(phi, 1), Value::from(iv_next));

    assert_eq!(plan.at(body).cond_bit(), Some(Value::from(icmp)));
    assert!(
        insts.iter().all(|&inst| !matches!(plan.insts[inst].opcode, Opcode::Br | Opcode::CondBr))
    );
}

#[test]
fn external_operands() {
    let l = inner_loop();
    let plan = build(&l.func, l.body).unwrap();
    let cx = plan.cx();
    let body = block_named(&plan, "for.body");
    let insts = plan.at(body).insts();

    let Value::External(base) = plan.insts[insts[1]].operands[0] else {
        panic!("GEP base should be external");
    };
    assert!(matches!(cx[base], ExternalDef::FuncParam { idx: 0, ty: ScalarType::Ptr, .. }));
    assert!(plan.external_defs.contains(&base));

    let Value::External(start) = plan.insts[insts[0]].operands[0] else {
        panic!("phi start should be external");
    };
    assert_eq!(cx[start], ExternalDef::Const { ty: ScalarType::Int(64), bits: 0 });
}

#[test]
fn multi_block_body() {
    let (f, header) = multi_block();
    let plan = build(&f, header).unwrap();
    assert_eq!(plan.basic_blocks.len(), 5);

    let names: Vec<_> =
        plan.rev_post_order().map(|bb| plan.cx()[plan.basic_blocks[bb].name].to_string()).collect();
    assert_eq!(names, ["entry", "header", "then", "latch", "exit"]);

    let [header_bb, then_bb, latch_bb, exit_bb] =
        ["header", "then", "latch", "exit"].map(|name| block_named(&plan, name));
    assert_eq!(plan.at(then_bb).num_predecessors(), 1);
    // `br latch` isn't materialized, leaving only `%t`.
    assert_eq!(plan.at(then_bb).len(), 1);
    assert_eq!(plan.at(latch_bb).num_predecessors(), 2);
    assert_eq!(plan.at(header_bb).num_predecessors(), 2);

    // `%n2` is defined before the loop, so it's external.
    let cx = plan.cx();
    let t = plan.at(then_bb).insts()[0];
    let Value::External(n2_ext) = plan.insts[t].operands[1] else {
        panic!("`%n2` should be external");
    };
    assert!(matches!(cx[n2_ext], ExternalDef::Inst { ty: ScalarType::Int(64), .. }));

    // The exit block keeps its `ret`, using the loop's value.
    let ret = plan.at(exit_bb).insts()[0];
    assert_eq!(plan.insts[ret].opcode, Opcode::Ret);
    assert_eq!(plan.insts[ret].operands[0], Value::from(plan.at(latch_bb).insts()[0]));

    let dom = plan.dom_tree().unwrap();
    assert!(dom.dominates(header_bb, latch_bb));
    assert!(!dom.dominates(then_bb, latch_bb));
}

#[test]
fn nested_outer_loop() {
    let f = nested();
    let outer = f.blocks().nth(1).unwrap();
    let plan = build(&f, outer).unwrap();

    // entry, outer.header, inner.header, outer.latch, exit
    assert_eq!(plan.basic_blocks.len(), 5);
    let inner_bb = block_named(&plan, "inner.header");
    let plan_at_inner = plan.at(inner_bb);
    assert_eq!(plan_at_inner.num_predecessors(), 2);
    assert_eq!(plan_at_inner.successors()[0], CfgNode::from(inner_bb));
    assert!(plan_at_inner.cond_bit().is_some());
    assert_eq!(plan.verify(), Ok(()));
}

#[test]
fn nested_inner_loop() {
    let f = nested();
    let inner = f.blocks().nth(2).unwrap();
    let plan = build(&f, inner).unwrap();

    // The outer header is the preheader, and the outer latch is the exit.
    let names: Vec<_> =
        plan.rev_post_order().map(|bb| plan.cx()[plan.basic_blocks[bb].name].to_string()).collect();
    assert_eq!(names, ["outer.header", "inner.header", "outer.latch"]);

    // `%i` comes from the (outer) preheader, and is thus external.
    let cx = plan.cx();
    let latch_bb = block_named(&plan, "outer.latch");
    let i_next = plan.at(latch_bb).insts()[0];
    let Value::External(i) = plan.insts[i_next].operands[0] else {
        panic!("`%i` should be external");
    };
    assert!(matches!(cx[i], ExternalDef::Inst { .. }));

    // The exit's branch is dropped, but not the compare feeding it.
    assert_eq!(plan.at(latch_bb).len(), 2);
    assert_eq!(plan.at(latch_bb).num_successors(), 0);
    assert_eq!(plan.at(latch_bb).cond_bit(), None);
}

#[test]
fn multiple_exits_are_rejected() {
    let mut f = Function::new("g", [ScalarType::Int(1)]);
    let entry = f.add_block("entry");
    let body = f.add_block("body");
    let latch = f.add_block("latch");
    let end = f.add_block("end");
    let c = f.param(0);
    f.br(entry, body);
    f.cond_br(body, c, latch, end);
    f.cond_br(latch, c, body, end);
    f.ret(end, None);

    match build(&f, body) {
        Err(err @ PlanError::UnsupportedShape(ShapeError::ExitEdges { count: 2 })) => {
            assert!(err.is_recoverable());
        }
        Err(err) => panic!("unexpected error: {err}"),
        Ok(_) => panic!("multiple exits should be rejected"),
    }
}
