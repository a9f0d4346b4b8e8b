#![allow(dead_code)]

use std::rc::Rc;
use vecplan::scalar::loops::{LoopAnalysis, LoopForest};
use vecplan::scalar::{
    BinOp, Function, IntPredicate, ScalarBlock, ScalarInst, ScalarType, ScalarValue,
};
use vecplan::{BasicBlock, Context, HcfgBuilder, Plan, PlanError};

pub fn inst(v: ScalarValue) -> ScalarInst {
    match v {
        ScalarValue::Inst(inst) => inst,
        _ => panic!("{v:?} is not an instruction"),
    }
}

/// Handles into the function built by [`inner_loop`].
pub struct InnerLoop {
    pub func: Function,
    pub entry: ScalarBlock,
    pub body: ScalarBlock,
    pub end: ScalarBlock,

    pub phi: ScalarInst,
    pub gep: ScalarInst,
    pub load: ScalarInst,
    pub add: ScalarInst,
    pub store: ScalarInst,
    pub iv_next: ScalarInst,
    pub exitcond: ScalarInst,
}

/// ```text
/// define void @f(i32* %A, i64 %N) {
/// entry:
///   br label %for.body
/// for.body:
///   %indvars.iv = phi i64 [ 0, %entry ], [ %indvars.iv.next, %for.body ]
///   %arr.idx = getelementptr inbounds i32, i32* %A, i64 %indvars.iv
///   %l1 = load i32, i32* %arr.idx, align 4
///   %res = add i32 %l1, 10
///   store i32 %res, i32* %arr.idx, align 4
///   %indvars.iv.next = add i64 %indvars.iv, 1
///   %exitcond = icmp ne i64 %indvars.iv.next, %N
///   br i1 %exitcond, label %for.body, label %for.end
/// for.end:
///   ret void
/// }
/// ```
pub fn inner_loop() -> InnerLoop {
    inner_loop_with(|_, _| {})
}

/// Like [`inner_loop`], but with `extra` called just before the loop branch
/// is appended (with the function and the loop body block).
pub fn inner_loop_with(extra: impl FnOnce(&mut Function, &InnerLoopValues)) -> InnerLoop {
    let mut f = Function::new("f", [ScalarType::Ptr, ScalarType::Int(64)]);
    let entry = f.add_block("entry");
    let body = f.add_block("for.body");
    let end = f.add_block("for.end");
    let (a, n) = (f.param(0), f.param(1));

    f.br(entry, body);
    let iv = f.phi(body, ScalarType::Int(64));
    let idx = f.gep(body, ScalarType::Int(32), a, iv);
    let l1 = f.load(body, ScalarType::Int(32), idx, Some(4));
    let res = f.binary(body, BinOp::Add, l1, ScalarValue::int(32, 10));
    let store = f.store(body, res, idx, Some(4));
    let iv_next = f.binary(body, BinOp::Add, iv, ScalarValue::int(64, 1));
    let exitcond = f.icmp(body, IntPredicate::Ne, iv_next, n);
    extra(&mut f, &InnerLoopValues { body, iv, res, iv_next, exitcond });
    f.cond_br(body, exitcond, body, end);
    f.add_incoming(iv, ScalarValue::int(64, 0), entry);
    f.add_incoming(iv, iv_next, body);
    f.ret(end, None);

    InnerLoop {
        func: f,
        entry,
        body,
        end,
        phi: inst(iv),
        gep: inst(idx),
        load: inst(l1),
        add: inst(res),
        store,
        iv_next: inst(iv_next),
        exitcond: inst(exitcond),
    }
}

pub struct InnerLoopValues {
    pub body: ScalarBlock,
    pub iv: ScalarValue,
    pub res: ScalarValue,
    pub iv_next: ScalarValue,
    pub exitcond: ScalarValue,
}

/// ```text
/// entry:  %n2 = mul %n, 2 ; br header
/// header: %i = phi [0, entry], [%i.next, latch] ; %odd = icmp ne %i, %n ; br %odd, then, latch
/// then:   %t = add %i, %n2 ; br latch
/// latch:  %i.next = add %i, 1 ; %c = icmp ult %i.next, %n2 ; br %c, header, exit
/// exit:   ret %i.next
/// ```
/// Returns the function and the loop header.
pub fn multi_block() -> (Function, ScalarBlock) {
    let mut f = Function::new("g", [ScalarType::Int(64)]);
    let entry = f.add_block("entry");
    let header = f.add_block("header");
    let then = f.add_block("then");
    let latch = f.add_block("latch");
    let exit = f.add_block("exit");
    let n = f.param(0);

    let n2 = f.binary(entry, BinOp::Mul, n, ScalarValue::int(64, 2));
    f.br(entry, header);
    let i = f.phi(header, ScalarType::Int(64));
    let odd = f.icmp(header, IntPredicate::Ne, i, n);
    f.cond_br(header, odd, then, latch);
    f.binary(then, BinOp::Add, i, n2);
    f.br(then, latch);
    let i_next = f.binary(latch, BinOp::Add, i, ScalarValue::int(64, 1));
    let c = f.icmp(latch, IntPredicate::Ult, i_next, n2);
    f.cond_br(latch, c, header, exit);
    f.ret(exit, Some(i_next));
    f.add_incoming(i, ScalarValue::int(64, 0), entry);
    f.add_incoming(i, i_next, latch);
    (f, header)
}

/// `entry -> outer.header -> inner.header (self-loop) -> outer.latch -> {outer.header, exit}`
pub fn nested() -> Function {
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
    f
}

/// Build the plan of the loop headed by `header`.
pub fn build(func: &Function, header: ScalarBlock) -> Result<Plan, PlanError> {
    let forest = LoopForest::compute(func);
    let lp = forest.loop_for(header).expect("no loop at the given header");
    assert_eq!(forest.header(lp), header);

    let mut plan = Plan::new(Rc::new(Context::new()));
    HcfgBuilder::new(func, &forest, lp).build_hierarchical_cfg(&mut plan)?;
    Ok(plan)
}

/// The plan block named `name`.
pub fn block_named(plan: &Plan, name: &str) -> BasicBlock {
    let cx = plan.cx();
    plan.basic_blocks
        .iter()
        .find(|(_, def)| &cx[def.name] == name)
        .map(|(bb, _)| bb)
        .unwrap_or_else(|| panic!("no block named `{name}`"))
}
