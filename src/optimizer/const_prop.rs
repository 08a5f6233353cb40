//! Sparse conditional constant propagation over the worklist engine. Facts
//! are per-identity lattice values; memory cells (allocas and globals) carry
//! the abstract value currently stored in them, and conditional branches only
//! propagate along edges their condition has not ruled out.

use std::collections::HashSet;

use crate::ir::{BinaryOp, Def, IcmpOp, InstKind, Module, Operand, Value};

use super::cfg::Cfg;
use super::dataflow::{Analysis, FactMap, Lattice, Solver};

/// Abstract scalar: not yet proven (`Undef`), a known constant, or proven
/// non-constant.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Scalar {
  Undef,
  Constant(i32),
  NonConstant,
}

impl Scalar {
  fn meet(self, other: Scalar) -> Scalar {
    match (self, other) {
      (Scalar::Undef, v) | (v, Scalar::Undef) => v,
      (Scalar::Constant(a), Scalar::Constant(b)) if a == b => Scalar::Constant(a),
      _ => Scalar::NonConstant,
    }
  }
}

/// A fact is either a scalar or the content of a memory cell. The same
/// identity can never be both; meeting one with the other means the input IR
/// is structurally broken, and there is nothing sensible to recover to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CpValue {
  Scalar(Scalar),
  Ref(Scalar),
}

impl Lattice for CpValue {
  fn bottom() -> Self {
    CpValue::Scalar(Scalar::Undef)
  }

  fn meet(&self, other: &Self) -> Self {
    match (*self, *other) {
      (CpValue::Scalar(Scalar::Undef), v) | (v, CpValue::Scalar(Scalar::Undef)) => v,
      (CpValue::Ref(a), CpValue::Ref(b)) => CpValue::Ref(a.meet(b)),
      (CpValue::Scalar(a), CpValue::Scalar(b)) => CpValue::Scalar(a.meet(b)),
      _ => panic!("constant lattice: meet of a memory-cell fact and a scalar fact"),
    }
  }
}

impl CpValue {
  fn deref(self) -> Scalar {
    match self {
      CpValue::Ref(inner) => inner,
      CpValue::Scalar(Scalar::Undef) => Scalar::Undef,
      CpValue::Scalar(_) => panic!("constant lattice: deref of a scalar fact"),
    }
  }

  fn scalar(self) -> Scalar {
    match self {
      CpValue::Scalar(s) => s,
      CpValue::Ref(_) => panic!("constant lattice: memory-cell fact used as a scalar"),
    }
  }
}

/// Both operands known folds to a known result; an `Undef` operand wins over
/// `NonConstant`, since the value might still turn out constant.
fn binary_scalar(lhs: Scalar, rhs: Scalar, fold: impl Fn(i32, i32) -> Scalar) -> Scalar {
  match (lhs, rhs) {
    (Scalar::Undef, _) | (_, Scalar::Undef) => Scalar::Undef,
    (Scalar::Constant(a), Scalar::Constant(b)) => fold(a, b),
    _ => Scalar::NonConstant,
  }
}

fn fold_binary(op: BinaryOp, a: i32, b: i32) -> Scalar {
  match op {
    BinaryOp::Add => Scalar::Constant(a.wrapping_add(b)),
    BinaryOp::Sub => Scalar::Constant(a.wrapping_sub(b)),
    BinaryOp::Mul => Scalar::Constant(a.wrapping_mul(b)),
    // a division that would fault at run time is left to fault at run time
    BinaryOp::Sdiv if b == 0 => Scalar::NonConstant,
    BinaryOp::Sdiv => Scalar::Constant(a.wrapping_div(b)),
    BinaryOp::Srem if b == 0 => Scalar::NonConstant,
    BinaryOp::Srem => Scalar::Constant(a.wrapping_rem(b)),
  }
}

fn fold_icmp(op: IcmpOp, a: i32, b: i32) -> Scalar {
  let holds = match op {
    IcmpOp::Eq => a == b,
    IcmpOp::Ne => a != b,
    IcmpOp::Slt => a < b,
    IcmpOp::Sle => a <= b,
    IcmpOp::Sgt => a > b,
    IcmpOp::Sge => a >= b,
  };
  Scalar::Constant(holds as i32)
}

type Facts = FactMap<Def, CpValue>;

fn operand_fact(facts: &Facts, op: Operand) -> CpValue {
  match op {
    Operand::Const(c) => CpValue::Scalar(Scalar::Constant(c)),
    _ => facts.get(op.def().expect("literal handled above")),
  }
}

struct ConstAnalysis;

impl Analysis for ConstAnalysis {
  type Facts = Facts;

  fn transfer(&self, module: &Module, inst: Value, input: &Facts) -> Facts {
    let mut out = input.clone();
    match &module.value(inst).kind {
      InstKind::Alloca => out.set(Def::Inst(inst), CpValue::Ref(Scalar::Undef)),
      InstKind::Load { addr } => {
        out.set(Def::Inst(inst), CpValue::Scalar(operand_fact(input, *addr).deref()));
      }
      InstKind::Zext { value } => out.set(Def::Inst(inst), operand_fact(input, *value)),
      InstKind::Store { value, addr } => {
        let cell = addr.def().expect("store to a literal address");
        out.set(cell, CpValue::Ref(operand_fact(input, *value).scalar()));
      }
      InstKind::Binary { op, lhs, rhs } => {
        let result = binary_scalar(
          operand_fact(input, *lhs).scalar(),
          operand_fact(input, *rhs).scalar(),
          |a, b| fold_binary(*op, a, b),
        );
        out.set(Def::Inst(inst), CpValue::Scalar(result));
      }
      InstKind::Icmp { op, lhs, rhs } => {
        let result = binary_scalar(
          operand_fact(input, *lhs).scalar(),
          operand_fact(input, *rhs).scalar(),
          |a, b| fold_icmp(*op, a, b),
        );
        out.set(Def::Inst(inst), CpValue::Scalar(result));
      }
      InstKind::Branch { .. } | InstKind::Jump { .. } | InstKind::Ret { .. } | InstKind::Unreachable => {}
    }
    out
  }

  fn flow_successors(&self, module: &Module, cfg: &Cfg, inst: Value, input: &Facts) -> Vec<Value> {
    match &module.value(inst).kind {
      InstKind::Branch { cond, then_bb, else_bb } => {
        let first = |bb| module.first_inst(bb).expect("empty block");
        match operand_fact(input, *cond) {
          CpValue::Scalar(Scalar::Constant(c)) => {
            vec![first(if c != 0 { *then_bb } else { *else_bb })]
          }
          CpValue::Scalar(Scalar::NonConstant) => vec![first(*then_bb), first(*else_bb)],
          // not yet proven either way: hold the edges back for now
          _ => Vec::new(),
        }
      }
      _ => cfg.inst_successors(inst).iter().copied().collect(),
    }
  }
}

pub fn run_const_prop(module: &mut Module) -> bool {
  let cfg = Cfg::build(module);
  let mut solver = Solver::new(module, &cfg, ConstAnalysis);

  // Global initializers are installed at a single designated entry point,
  // the first instruction of the module's last function. Loads of a global
  // elsewhere stay unproven rather than wrong; see DESIGN.md.
  let entry_inst = module
    .functions()
    .last()
    .and_then(|f| module.entry(f))
    .and_then(|bb| module.first_inst(bb));
  if let Some(entry_inst) = entry_inst {
    let mut facts = Facts::default();
    for g in module.globals() {
      facts.set(Def::Global(g), CpValue::Ref(Scalar::Constant(module.global(g).init)));
    }
    solver.seed(entry_inst, facts);
  }

  solver.solve(module);
  rewrite(module, &solver)
}

fn rewrite(module: &mut Module, solver: &Solver<ConstAnalysis>) -> bool {
  let mut changed = false;
  let insts = module.all_insts();
  let mut erased = HashSet::new();

  // Fold every instruction whose own fact settled on a constant.
  for &inst in &insts {
    if let CpValue::Scalar(Scalar::Constant(c)) = solver.fact_out(inst).get(Def::Inst(inst)) {
      module.replace_all_uses(inst, Operand::Const(c));
      module.erase(inst);
      erased.insert(inst);
      changed = true;
    }
  }

  // Fold constant operands of the survivors, even where the defining
  // instruction itself did not settle.
  for &inst in &insts {
    if erased.contains(&inst) {
      continue;
    }
    let input = solver.fact_in(inst).clone();
    for op in module.value_mut(inst).kind.operands_mut() {
      if let Some(def) = op.def() {
        if let CpValue::Scalar(Scalar::Constant(c)) = input.get(def) {
          *op = Operand::Const(c);
          changed = true;
        }
      }
    }
  }

  changed |= fold_const_branches(module);
  changed
}

/// Rewrite conditional branches whose condition is a literal into
/// unconditional jumps to the selected arm.
fn fold_const_branches(module: &mut Module) -> bool {
  let mut changed = false;
  for func in module.functions() {
    for bb in module.func(func).blocks.clone() {
      let Some(term) = module.terminator(bb) else { continue };
      if let InstKind::Branch { cond: Operand::Const(c), then_bb, else_bb } =
        module.value(term).kind
      {
        let target = if c != 0 { then_bb } else { else_bb };
        module.value_mut(term).kind = InstKind::Jump { target };
        changed = true;
      }
    }
  }
  changed
}
