//! Scalar input IR: the control-flow graph of a function, as produced by some
//! front-end, before any vectorization planning takes place.
//!
//! Only the parts needed to plan a loop are modeled: blocks with an ordered
//! list of instructions (the last one being a terminator), SSA values, and
//! opcodes which [`Plan`](crate::Plan) instructions mirror one-to-one.
//
// NOTE(eddyb) handles here are plain indices (not `Context` entities), as a
// scalar `Function` is read-only input that outlives any `Plan` built from it.

use smallvec::SmallVec;
use std::fmt;
use std::rc::Rc;

// NOTE(eddyb) all the modules are declared here, but they're documented "inside"
// (i.e. using inner doc comments).
pub mod legality;
pub mod loops;

/// Types of scalar values (only as precise as printing and recipes need).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Void,
    Int(u16),
    Float(u16),
    Ptr,
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Void => f.write_str("void"),
            Self::Int(bits) => write!(f, "i{bits}"),
            Self::Float(16) => f.write_str("half"),
            Self::Float(32) => f.write_str("float"),
            Self::Float(64) => f.write_str("double"),
            Self::Float(bits) => write!(f, "f{bits}"),
            Self::Ptr => f.write_str("ptr"),
        }
    }
}

/// Index of a block in a [`Function`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScalarBlock(pub(crate) u32);

impl ScalarBlock {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an instruction in a [`Function`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScalarInst(pub(crate) u32);

impl ScalarInst {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScalarValue {
    /// The `idx`th parameter of the function.
    Param(u32),

    /// Integer (or raw float bits) constant.
    Const { ty: ScalarType, bits: i64 },

    Undef(ScalarType),

    /// The result of an instruction.
    Inst(ScalarInst),
}

impl ScalarValue {
    pub fn int(bits_width: u16, value: i64) -> Self {
        Self::Const { ty: ScalarType::Int(bits_width), bits: value }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IntPredicate {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FloatPredicate {
    Oeq,
    One,
    Ogt,
    Oge,
    Olt,
    Ole,
    Ord,
    Uno,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpToSi,
    SiToFp,
    PtrToInt,
    IntToPtr,
    BitCast,
}

/// Scalar operation performed by an instruction, shared by [`InstData`] and
/// the [`InstDef`](crate::InstDef)s mirroring them in a [`Plan`](crate::Plan).
///
/// Operand layout per opcode:
/// * `Phi`: one incoming value per predecessor (see [`InstData::blocks`])
/// * `GetElementPtr`: `[base, index]`
/// * `Load`: `[address]`
/// * `Store`: `[stored value, address]`
/// * `Select`: `[condition, if_true, if_false]`
/// * `CondBr`: `[condition]`, with targets in [`InstData::blocks`]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Phi,
    Binary(BinOp),
    ICmp(IntPredicate),
    FCmp(FloatPredicate),
    GetElementPtr { inbounds: bool, elem_ty: ScalarType },
    Load { align: Option<u32> },
    Store { align: Option<u32> },
    Cast(CastOp),
    Select,
    Call(Rc<str>),

    Br,
    CondBr,
    Ret,
    Unreachable,
}

impl Opcode {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Br | Self::CondBr | Self::Ret | Self::Unreachable)
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Self::Br | Self::CondBr)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phi => f.write_str("phi"),
            Self::Binary(op) => f.write_str(match op {
                BinOp::Add => "add",
                BinOp::Sub => "sub",
                BinOp::Mul => "mul",
                BinOp::UDiv => "udiv",
                BinOp::SDiv => "sdiv",
                BinOp::URem => "urem",
                BinOp::SRem => "srem",
                BinOp::Shl => "shl",
                BinOp::LShr => "lshr",
                BinOp::AShr => "ashr",
                BinOp::And => "and",
                BinOp::Or => "or",
                BinOp::Xor => "xor",
                BinOp::FAdd => "fadd",
                BinOp::FSub => "fsub",
                BinOp::FMul => "fmul",
                BinOp::FDiv => "fdiv",
            }),
            Self::ICmp(pred) => write!(f, "icmp {}", format!("{pred:?}").to_lowercase()),
            Self::FCmp(pred) => write!(f, "fcmp {}", format!("{pred:?}").to_lowercase()),
            Self::GetElementPtr { inbounds, elem_ty } => {
                f.write_str("getelementptr")?;
                if *inbounds {
                    f.write_str(" inbounds")?;
                }
                write!(f, " {elem_ty}")
            }
            Self::Load { .. } => f.write_str("load"),
            Self::Store { .. } => f.write_str("store"),
            Self::Cast(op) => f.write_str(&format!("{op:?}").to_lowercase()),
            Self::Select => f.write_str("select"),
            Self::Call(callee) => write!(f, "call @{callee}"),
            Self::Br => f.write_str("br"),
            Self::CondBr => f.write_str("br"),
            Self::Ret => f.write_str("ret"),
            Self::Unreachable => f.write_str("unreachable"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct InstData {
    pub opcode: Opcode,

    /// Result type, [`ScalarType::Void`] if the instruction produces no value.
    pub ty: ScalarType,

    pub operands: SmallVec<[ScalarValue; 2]>,

    /// Branch targets, or (for `Phi`) the incoming block of each operand.
    pub blocks: SmallVec<[ScalarBlock; 2]>,

    pub parent: ScalarBlock,
}

#[derive(Clone, Debug)]
pub struct BlockData {
    pub name: String,

    /// Instructions in program order, ending with a terminator (once complete).
    pub insts: Vec<ScalarInst>,
}

/// A scalar function, with its first block as the entry.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<ScalarType>,

    blocks: Vec<BlockData>,
    insts: Vec<InstData>,
}

impl Function {
    pub fn new(name: impl Into<String>, params: impl IntoIterator<Item = ScalarType>) -> Self {
        Self {
            name: name.into(),
            params: params.into_iter().collect(),
            blocks: vec![],
            insts: vec![],
        }
    }

    pub fn entry_block(&self) -> Option<ScalarBlock> {
        (!self.blocks.is_empty()).then_some(ScalarBlock(0))
    }

    pub fn blocks(&self) -> impl ExactSizeIterator<Item = ScalarBlock> + use<> {
        (0..self.blocks.len() as u32).map(ScalarBlock)
    }

    pub fn block(&self, block: ScalarBlock) -> &BlockData {
        &self.blocks[block.index()]
    }

    pub fn inst(&self, inst: ScalarInst) -> &InstData {
        &self.insts[inst.index()]
    }

    pub fn param(&self, idx: u32) -> ScalarValue {
        assert!((idx as usize) < self.params.len(), "`{}` has no parameter #{idx}", self.name);
        ScalarValue::Param(idx)
    }

    pub fn value_type(&self, value: ScalarValue) -> ScalarType {
        match value {
            ScalarValue::Param(idx) => self.params[idx as usize],
            ScalarValue::Const { ty, .. } | ScalarValue::Undef(ty) => ty,
            ScalarValue::Inst(inst) => self.inst(inst).ty,
        }
    }

    /// The terminator of `block`, if its last instruction is one.
    pub fn terminator(&self, block: ScalarBlock) -> Option<ScalarInst> {
        let &last = self.block(block).insts.last()?;
        self.inst(last).opcode.is_terminator().then_some(last)
    }

    pub fn successors(&self, block: ScalarBlock) -> SmallVec<[ScalarBlock; 2]> {
        match self.terminator(block) {
            Some(term) => self.inst(term).blocks.clone(),
            None => SmallVec::new(),
        }
    }

    /// All blocks with an edge to `block`, in block order (an edge being
    /// listed once per occurrence in a terminator's targets).
    pub fn predecessors(&self, block: ScalarBlock) -> SmallVec<[ScalarBlock; 2]> {
        self.blocks()
            .flat_map(|pred| {
                self.successors(pred)
                    .into_iter()
                    .filter(move |&succ| succ == block)
                    .map(move |_| pred)
            })
            .collect()
    }

    pub fn add_block(&mut self, name: impl Into<String>) -> ScalarBlock {
        let block = ScalarBlock(self.blocks.len().try_into().unwrap());
        self.blocks.push(BlockData { name: name.into(), insts: vec![] });
        block
    }

    /// Append a new instruction to the end of `block`.
    pub fn append(
        &mut self,
        block: ScalarBlock,
        opcode: Opcode,
        ty: ScalarType,
        operands: impl IntoIterator<Item = ScalarValue>,
        blocks: impl IntoIterator<Item = ScalarBlock>,
    ) -> ScalarInst {
        assert!(
            self.terminator(block).is_none(),
            "appending to `{}` after its terminator",
            self.block(block).name
        );
        let inst = ScalarInst(self.insts.len().try_into().unwrap());
        self.insts.push(InstData {
            opcode,
            ty,
            operands: operands.into_iter().collect(),
            blocks: blocks.into_iter().collect(),
            parent: block,
        });
        self.blocks[block.index()].insts.push(inst);
        inst
    }

    /// Append an (initially empty) phi, see [`Function::add_incoming`].
    pub fn phi(&mut self, block: ScalarBlock, ty: ScalarType) -> ScalarValue {
        ScalarValue::Inst(self.append(block, Opcode::Phi, ty, [], []))
    }

    pub fn add_incoming(&mut self, phi: ScalarValue, value: ScalarValue, from: ScalarBlock) {
        let ScalarValue::Inst(phi) = phi else {
            panic!("add_incoming: {phi:?} is not a phi");
        };
        let data = &mut self.insts[phi.index()];
        assert_eq!(data.opcode, Opcode::Phi);
        data.operands.push(value);
        data.blocks.push(from);
    }

    pub fn binary(
        &mut self,
        block: ScalarBlock,
        op: BinOp,
        lhs: ScalarValue,
        rhs: ScalarValue,
    ) -> ScalarValue {
        let ty = self.value_type(lhs);
        ScalarValue::Inst(self.append(block, Opcode::Binary(op), ty, [lhs, rhs], []))
    }

    pub fn icmp(
        &mut self,
        block: ScalarBlock,
        pred: IntPredicate,
        lhs: ScalarValue,
        rhs: ScalarValue,
    ) -> ScalarValue {
        let inst = self.append(block, Opcode::ICmp(pred), ScalarType::Int(1), [lhs, rhs], []);
        ScalarValue::Inst(inst)
    }

    pub fn fcmp(
        &mut self,
        block: ScalarBlock,
        pred: FloatPredicate,
        lhs: ScalarValue,
        rhs: ScalarValue,
    ) -> ScalarValue {
        let inst = self.append(block, Opcode::FCmp(pred), ScalarType::Int(1), [lhs, rhs], []);
        ScalarValue::Inst(inst)
    }

    pub fn gep(
        &mut self,
        block: ScalarBlock,
        elem_ty: ScalarType,
        base: ScalarValue,
        index: ScalarValue,
    ) -> ScalarValue {
        let opcode = Opcode::GetElementPtr { inbounds: true, elem_ty };
        ScalarValue::Inst(self.append(block, opcode, ScalarType::Ptr, [base, index], []))
    }

    pub fn load(
        &mut self,
        block: ScalarBlock,
        ty: ScalarType,
        addr: ScalarValue,
        align: Option<u32>,
    ) -> ScalarValue {
        ScalarValue::Inst(self.append(block, Opcode::Load { align }, ty, [addr], []))
    }

    pub fn store(
        &mut self,
        block: ScalarBlock,
        value: ScalarValue,
        addr: ScalarValue,
        align: Option<u32>,
    ) -> ScalarInst {
        self.append(block, Opcode::Store { align }, ScalarType::Void, [value, addr], [])
    }

    pub fn cast(
        &mut self,
        block: ScalarBlock,
        op: CastOp,
        value: ScalarValue,
        to: ScalarType,
    ) -> ScalarValue {
        ScalarValue::Inst(self.append(block, Opcode::Cast(op), to, [value], []))
    }

    pub fn select(
        &mut self,
        block: ScalarBlock,
        cond: ScalarValue,
        if_true: ScalarValue,
        if_false: ScalarValue,
    ) -> ScalarValue {
        let ty = self.value_type(if_true);
        ScalarValue::Inst(self.append(block, Opcode::Select, ty, [cond, if_true, if_false], []))
    }

    pub fn call(
        &mut self,
        block: ScalarBlock,
        callee: &str,
        ret_ty: ScalarType,
        args: impl IntoIterator<Item = ScalarValue>,
    ) -> ScalarInst {
        self.append(block, Opcode::Call(callee.into()), ret_ty, args, [])
    }

    pub fn br(&mut self, block: ScalarBlock, target: ScalarBlock) -> ScalarInst {
        self.append(block, Opcode::Br, ScalarType::Void, [], [target])
    }

    pub fn cond_br(
        &mut self,
        block: ScalarBlock,
        cond: ScalarValue,
        if_true: ScalarBlock,
        if_false: ScalarBlock,
    ) -> ScalarInst {
        self.append(block, Opcode::CondBr, ScalarType::Void, [cond], [if_true, if_false])
    }

    pub fn ret(&mut self, block: ScalarBlock, value: Option<ScalarValue>) -> ScalarInst {
        self.append(block, Opcode::Ret, ScalarType::Void, value, [])
    }
}
