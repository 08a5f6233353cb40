//! The intermediate representation: a module of functions and globals, with
//! instructions and basic blocks stored in arenas and referred to by stable
//! integer handles. Handle equality is identity equality; erased entries stay
//! in the arena so handles held by passes never dangle.

use std::fmt;

mod parser;

pub use parser::{parse, ParseError};

/// Handle of an instruction. The handle doubles as the identity of the
/// instruction's result for value-producing opcodes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Value(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BasicBlock(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Function(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Global(pub u32);

/// An instruction operand: a value defined by an instruction, a global
/// variable, or an integer literal. Literals are not arena entities.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Operand {
  Inst(Value),
  Global(Global),
  Const(i32),
}

/// The identity of a defined value (an operand that is not a literal).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Def {
  Inst(Value),
  Global(Global),
}

impl Operand {
  pub fn def(self) -> Option<Def> {
    match self {
      Operand::Inst(v) => Some(Def::Inst(v)),
      Operand::Global(g) => Some(Def::Global(g)),
      Operand::Const(_) => None,
    }
  }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Sdiv,
  Srem,
}

impl BinaryOp {
  pub fn mnemonic(self) -> &'static str {
    match self {
      BinaryOp::Add => "add",
      BinaryOp::Sub => "sub",
      BinaryOp::Mul => "mul",
      BinaryOp::Sdiv => "sdiv",
      BinaryOp::Srem => "srem",
    }
  }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IcmpOp {
  Eq,
  Ne,
  Slt,
  Sle,
  Sgt,
  Sge,
}

impl IcmpOp {
  pub fn mnemonic(self) -> &'static str {
    match self {
      IcmpOp::Eq => "eq",
      IcmpOp::Ne => "ne",
      IcmpOp::Slt => "slt",
      IcmpOp::Sle => "sle",
      IcmpOp::Sgt => "sgt",
      IcmpOp::Sge => "sge",
    }
  }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum InstKind {
  Alloca,
  Load { addr: Operand },
  Store { value: Operand, addr: Operand },
  Zext { value: Operand },
  Binary { op: BinaryOp, lhs: Operand, rhs: Operand },
  Icmp { op: IcmpOp, lhs: Operand, rhs: Operand },
  Branch { cond: Operand, then_bb: BasicBlock, else_bb: BasicBlock },
  Jump { target: BasicBlock },
  Ret { value: Operand },
  Unreachable,
}

impl InstKind {
  /// Whether the instruction defines a result value. The void opcodes are
  /// store and the terminators.
  pub fn has_result(&self) -> bool {
    !matches!(
      self,
      InstKind::Store { .. }
        | InstKind::Branch { .. }
        | InstKind::Jump { .. }
        | InstKind::Ret { .. }
        | InstKind::Unreachable
    )
  }

  pub fn is_terminator(&self) -> bool {
    matches!(
      self,
      InstKind::Branch { .. } | InstKind::Jump { .. } | InstKind::Ret { .. } | InstKind::Unreachable
    )
  }

  /// Operands in source order. For store that is value first, address second.
  pub fn operands(&self) -> Vec<Operand> {
    match self {
      InstKind::Alloca | InstKind::Jump { .. } | InstKind::Unreachable => Vec::new(),
      InstKind::Load { addr } => vec![*addr],
      InstKind::Store { value, addr } => vec![*value, *addr],
      InstKind::Zext { value } => vec![*value],
      InstKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
      InstKind::Icmp { lhs, rhs, .. } => vec![*lhs, *rhs],
      InstKind::Branch { cond, .. } => vec![*cond],
      InstKind::Ret { value } => vec![*value],
    }
  }

  pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
    match self {
      InstKind::Alloca | InstKind::Jump { .. } | InstKind::Unreachable => Vec::new(),
      InstKind::Load { addr } => vec![addr],
      InstKind::Store { value, addr } => vec![value, addr],
      InstKind::Zext { value } => vec![value],
      InstKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
      InstKind::Icmp { lhs, rhs, .. } => vec![lhs, rhs],
      InstKind::Branch { cond, .. } => vec![cond],
      InstKind::Ret { value } => vec![value],
    }
  }
}

#[derive(Debug)]
pub struct ValueData {
  pub kind: InstKind,
  pub block: BasicBlock,
}

#[derive(Debug)]
pub struct BlockData {
  pub name: String,
  pub func: Function,
  pub insts: Vec<Value>,
}

#[derive(Debug)]
pub struct FunctionData {
  pub name: String,
  /// Blocks in layout order; the first block is the entry.
  pub blocks: Vec<BasicBlock>,
}

#[derive(Debug)]
pub struct GlobalData {
  pub name: String,
  pub init: i32,
}

#[derive(Default, Debug)]
pub struct Module {
  globals: Vec<GlobalData>,
  funcs: Vec<FunctionData>,
  blocks: Vec<BlockData>,
  values: Vec<ValueData>,
}

impl Module {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_global(&mut self, name: &str, init: i32) -> Global {
    let g = Global(self.globals.len() as u32);
    self.globals.push(GlobalData { name: name.to_string(), init });
    g
  }

  pub fn add_function(&mut self, name: &str) -> Function {
    let f = Function(self.funcs.len() as u32);
    self.funcs.push(FunctionData { name: name.to_string(), blocks: Vec::new() });
    f
  }

  pub fn add_block(&mut self, func: Function, name: &str) -> BasicBlock {
    let bb = BasicBlock(self.blocks.len() as u32);
    self.blocks.push(BlockData { name: name.to_string(), func, insts: Vec::new() });
    self.funcs[func.0 as usize].blocks.push(bb);
    bb
  }

  pub fn append(&mut self, bb: BasicBlock, kind: InstKind) -> Value {
    let v = Value(self.values.len() as u32);
    self.values.push(ValueData { kind, block: bb });
    self.blocks[bb.0 as usize].insts.push(v);
    v
  }

  pub fn global(&self, g: Global) -> &GlobalData {
    &self.globals[g.0 as usize]
  }

  pub fn func(&self, f: Function) -> &FunctionData {
    &self.funcs[f.0 as usize]
  }

  pub fn block(&self, bb: BasicBlock) -> &BlockData {
    &self.blocks[bb.0 as usize]
  }

  pub fn block_mut(&mut self, bb: BasicBlock) -> &mut BlockData {
    &mut self.blocks[bb.0 as usize]
  }

  pub fn value(&self, v: Value) -> &ValueData {
    &self.values[v.0 as usize]
  }

  pub fn value_mut(&mut self, v: Value) -> &mut ValueData {
    &mut self.values[v.0 as usize]
  }

  pub fn functions(&self) -> impl Iterator<Item = Function> {
    (0..self.funcs.len() as u32).map(Function)
  }

  pub fn globals(&self) -> impl Iterator<Item = Global> {
    (0..self.globals.len() as u32).map(Global)
  }

  pub fn entry(&self, f: Function) -> Option<BasicBlock> {
    self.func(f).blocks.first().copied()
  }

  pub fn first_inst(&self, bb: BasicBlock) -> Option<Value> {
    self.block(bb).insts.first().copied()
  }

  pub fn terminator(&self, bb: BasicBlock) -> Option<Value> {
    self.block(bb).insts.last().copied()
  }

  /// Every instruction of every live block, in program order.
  pub fn all_insts(&self) -> Vec<Value> {
    let mut insts = Vec::new();
    for func in &self.funcs {
      for &bb in &func.blocks {
        insts.extend_from_slice(&self.blocks[bb.0 as usize].insts);
      }
    }
    insts
  }

  /// Unlink an instruction from its block. The arena entry is left behind so
  /// outstanding handles stay valid.
  pub fn erase(&mut self, v: Value) {
    let bb = self.values[v.0 as usize].block;
    self.blocks[bb.0 as usize].insts.retain(|&i| i != v);
  }

  /// Unlink a block from its function's layout.
  pub fn remove_block(&mut self, bb: BasicBlock) {
    let f = self.blocks[bb.0 as usize].func;
    self.funcs[f.0 as usize].blocks.retain(|&b| b != bb);
  }

  /// Rewrite every use of `old` across the module to the given operand.
  pub fn replace_all_uses(&mut self, old: Value, new: Operand) {
    let insts = self.all_insts();
    for inst in insts {
      for op in self.values[inst.0 as usize].kind.operands_mut() {
        if *op == Operand::Inst(old) {
          *op = new;
        }
      }
    }
  }

  fn fmt_operand(&self, op: Operand, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match op {
      Operand::Inst(v) => write!(f, "%{}", v.0),
      Operand::Global(g) => write!(f, "@{}", self.global(g).name),
      Operand::Const(c) => write!(f, "{}", c),
    }
  }

  fn fmt_inst(&self, v: Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.value(v).kind {
      InstKind::Alloca => write!(f, "%{} = alloca", v.0),
      InstKind::Load { addr } => {
        write!(f, "%{} = load ", v.0)?;
        self.fmt_operand(*addr, f)
      }
      InstKind::Store { value, addr } => {
        write!(f, "store ")?;
        self.fmt_operand(*value, f)?;
        write!(f, ", ")?;
        self.fmt_operand(*addr, f)
      }
      InstKind::Zext { value } => {
        write!(f, "%{} = zext ", v.0)?;
        self.fmt_operand(*value, f)
      }
      InstKind::Binary { op, lhs, rhs } => {
        write!(f, "%{} = {} ", v.0, op.mnemonic())?;
        self.fmt_operand(*lhs, f)?;
        write!(f, ", ")?;
        self.fmt_operand(*rhs, f)
      }
      InstKind::Icmp { op, lhs, rhs } => {
        write!(f, "%{} = {} ", v.0, op.mnemonic())?;
        self.fmt_operand(*lhs, f)?;
        write!(f, ", ")?;
        self.fmt_operand(*rhs, f)
      }
      InstKind::Branch { cond, then_bb, else_bb } => {
        write!(f, "br ")?;
        self.fmt_operand(*cond, f)?;
        write!(f, ", %{}, %{}", self.block(*then_bb).name, self.block(*else_bb).name)
      }
      InstKind::Jump { target } => write!(f, "jump %{}", self.block(*target).name),
      InstKind::Ret { value } => {
        write!(f, "ret ")?;
        self.fmt_operand(*value, f)
      }
      InstKind::Unreachable => write!(f, "unreachable"),
    }
  }
}

impl fmt::Display for Module {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for g in self.globals() {
      let data = self.global(g);
      if data.init != 0 {
        writeln!(f, "global @{} = {}", data.name, data.init)?;
      } else {
        writeln!(f, "global @{}", data.name)?;
      }
    }
    for (i, func) in self.functions().enumerate() {
      if i > 0 || !self.globals.is_empty() {
        writeln!(f)?;
      }
      let data = self.func(func);
      writeln!(f, "fun @{}() {{", data.name)?;
      for &bb in &data.blocks {
        writeln!(f, "%{}:", self.block(bb).name)?;
        for &v in &self.block(bb).insts {
          write!(f, "  ")?;
          self.fmt_inst(v, f)?;
          writeln!(f)?;
        }
      }
      writeln!(f, "}}")?;
    }
    Ok(())
  }
}
