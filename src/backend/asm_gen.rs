//! Single-pass lowering to RV32 assembly text. Blocks and instructions are
//! walked once in program order; there is no fixpoint here and the IR is
//! never mutated. A value's live range ends at its last use inside its own
//! block, or at the end of the function as soon as any other block uses it
//! (the deliberate cross-block approximation).

use crate::ir::{BasicBlock, BinaryOp, Function, IcmpOp, InstKind, Module, Operand, Value};

use super::regalloc::{Allocator, Location, RETURN_REGISTER};

pub fn generate_program(module: &Module) -> String {
  let mut asm = String::new();
  for g in module.globals() {
    let data = module.global(g);
    asm.push_str(&format!(
      "  .data\n  .globl {}\n{}:\n  .word {}\n",
      data.name, data.name, data.init
    ));
  }
  for func in module.functions() {
    asm.push_str(&generate_function(module, func));
  }
  asm
}

fn generate_function(module: &Module, func: Function) -> String {
  let data = module.func(func);
  let mut allocator = Allocator::new();
  let mut body = String::new();

  for &bb in &data.blocks {
    body.push_str(&format!("{}:\n", block_label(module, bb)));
    for (index, &inst) in module.block(bb).insts.iter().enumerate() {
      generate_inst(module, bb, index, inst, &mut body, &mut allocator);
    }
  }

  // the frame size is known only after the walk; the prologue goes in front
  let frame = allocator.stack_size();
  let mut asm = format!("  .text\n  .globl {}\n{}:\n", data.name, data.name);
  asm.push_str(&format!("  addi  sp, sp, -{}\n", frame));
  asm.push_str(&body);
  asm.push_str(&format!("{}_ret:\n", data.name));
  asm.push_str(&format!("  addi  sp, sp, {}\n", frame));
  asm.push_str("  li    x17, 93\n  ecall\n");
  asm
}

fn generate_inst(
  module: &Module,
  bb: BasicBlock,
  index: usize,
  inst: Value,
  asm: &mut String,
  allocator: &mut Allocator,
) {
  let kind = &module.value(inst).kind;
  let operands: Vec<Location> =
    kind.operands().into_iter().map(|op| operand_location(op, allocator)).collect();

  let result = if kind.has_result() {
    let end = if is_cross_block(module, inst) {
      i64::MAX
    } else {
      last_use_in_block(module, bb, inst)
    };
    Some(allocator.allocate(inst, end, module, asm))
  } else {
    None
  };

  match kind {
    // an alloca's location *is* the memory cell, nothing to execute
    InstKind::Alloca | InstKind::Unreachable => {}
    InstKind::Load { .. } | InstKind::Zext { .. } => {
      let value = operands[0].load(module, asm, allocator);
      result.expect("value-producing opcode").store(value, module, asm, allocator);
      allocator.free_temporaries();
    }
    InstKind::Store { .. } => {
      let value = operands[0].load(module, asm, allocator);
      operands[1].store(value, module, asm, allocator);
      allocator.free_temporaries();
    }
    InstKind::Ret { .. } => {
      let value = operands[0].load(module, asm, allocator);
      Location::Reg(RETURN_REGISTER).store(value, module, asm, allocator);
      allocator.free_temporaries();
      asm.push_str(&format!("  j     {}_ret\n", module.func(module.block(bb).func).name));
    }
    InstKind::Binary { op, .. } => {
      binary_inst(
        arith_mnemonic(*op),
        result.expect("value-producing opcode"),
        &operands,
        module,
        asm,
        allocator,
      );
    }
    InstKind::Icmp { op, .. } => {
      compare_inst(
        inst,
        *op,
        result.expect("value-producing opcode"),
        &operands,
        module,
        asm,
        allocator,
      );
    }
    InstKind::Branch { then_bb, else_bb, .. } => {
      let cond = operands[0].load(module, asm, allocator);
      asm.push_str(&format!("  beqz  {}, {}\n", cond, block_label(module, *else_bb)));
      allocator.free_temporaries();
      asm.push_str(&format!("  j     {}\n", block_label(module, *then_bb)));
    }
    InstKind::Jump { target } => {
      asm.push_str(&format!("  j     {}\n", block_label(module, *target)));
    }
  }

  allocator.free_until(index as i64);
}

fn binary_inst(
  mnemonic: &str,
  dest: Location,
  operands: &[Location],
  module: &Module,
  asm: &mut String,
  allocator: &mut Allocator,
) {
  let a = operands[0].load(module, asm, allocator);
  let b = operands[1].load(module, asm, allocator);
  // the staged operands stay readable until the op is emitted, so the
  // result may reuse the first temporary
  allocator.free_temporaries();
  let dest_reg = match dest {
    Location::Reg(reg) => reg,
    _ => allocator.allocate_temporary(),
  };
  asm.push_str(&format!("  {:<6}{}, {}, {}\n", mnemonic, dest_reg, a, b));
  if !matches!(dest, Location::Reg(_)) {
    dest.store(dest_reg, module, asm, allocator);
  }
  allocator.free_temporaries();
}

/// Comparisons lower to a branch-on-predicate plus a 0/1 diamond: the fall
/// through assigns false, the labelled arm assigns true, both meet at a
/// merge label.
fn compare_inst(
  inst: Value,
  op: IcmpOp,
  dest: Location,
  operands: &[Location],
  module: &Module,
  asm: &mut String,
  allocator: &mut Allocator,
) {
  let a = operands[0].load(module, asm, allocator);
  let b = operands[1].load(module, asm, allocator);
  let true_label = format!("cmp{}_true", inst.0);
  let merge_label = format!("cmp{}_merge", inst.0);
  asm.push_str(&format!("  {:<6}{}, {}, {}\n", branch_mnemonic(op), a, b, true_label));
  allocator.free_temporaries();
  let zero = Location::Const(0).load(module, asm, allocator);
  dest.store(zero, module, asm, allocator);
  allocator.free_temporaries();
  asm.push_str(&format!("  j     {}\n", merge_label));
  asm.push_str(&format!("{}:\n", true_label));
  let one = Location::Const(1).load(module, asm, allocator);
  dest.store(one, module, asm, allocator);
  allocator.free_temporaries();
  asm.push_str(&format!("{}:\n  nop\n", merge_label));
}

fn arith_mnemonic(op: BinaryOp) -> &'static str {
  match op {
    BinaryOp::Add => "add",
    BinaryOp::Sub => "sub",
    BinaryOp::Mul => "mul",
    BinaryOp::Sdiv => "div",
    BinaryOp::Srem => "rem",
  }
}

fn branch_mnemonic(op: IcmpOp) -> &'static str {
  match op {
    IcmpOp::Eq => "beq",
    IcmpOp::Ne => "bne",
    IcmpOp::Slt => "blt",
    IcmpOp::Sle => "ble",
    IcmpOp::Sgt => "bgt",
    IcmpOp::Sge => "bge",
  }
}

fn operand_location(op: Operand, allocator: &Allocator) -> Location {
  match op {
    Operand::Const(c) => Location::Const(c),
    Operand::Global(g) => Location::Global(g),
    Operand::Inst(v) => allocator.location(v),
  }
}

fn block_label(module: &Module, bb: BasicBlock) -> String {
  let data = module.block(bb);
  format!("{}_{}", module.func(data.func).name, data.name)
}

fn last_use_in_block(module: &Module, bb: BasicBlock, value: Value) -> i64 {
  let mut last = -1;
  for (index, &inst) in module.block(bb).insts.iter().enumerate() {
    if module.value(inst).kind.operands().contains(&Operand::Inst(value)) {
      last = index as i64;
    }
  }
  last
}

fn is_cross_block(module: &Module, value: Value) -> bool {
  let home = module.value(value).block;
  let func = module.block(home).func;
  module
    .func(func)
    .blocks
    .iter()
    .any(|&bb| bb != home && last_use_in_block(module, bb, value) != -1)
}
