//! Unused value elimination: one marking sweep over every operand, then a
//! sweep deleting value-producing instructions nobody read. A store does not
//! keep its destination cell alive (only loads do), so an alloca that is
//! written but never read goes away together with all of its stores.

use std::collections::{HashMap, HashSet};

use crate::ir::{InstKind, Module, Operand, Value};

pub fn run_dce(module: &mut Module) -> bool {
  let insts = module.all_insts();

  let mut used: HashSet<Value> = HashSet::new();
  let mut alloca_stores: HashMap<Value, Vec<Value>> = insts
    .iter()
    .filter(|&&v| matches!(module.value(v).kind, InstKind::Alloca))
    .map(|&v| (v, Vec::new()))
    .collect();

  for &inst in &insts {
    match &module.value(inst).kind {
      InstKind::Store { value, addr } => {
        if let Operand::Inst(v) = value {
          used.insert(*v);
        }
        if let Operand::Inst(cell) = addr {
          if let Some(stores) = alloca_stores.get_mut(cell) {
            stores.push(inst);
          }
        }
      }
      kind => {
        for op in kind.operands() {
          if let Operand::Inst(v) = op {
            used.insert(v);
          }
        }
      }
    }
  }

  let mut changed = false;
  for &inst in &insts {
    if !module.value(inst).kind.has_result() || used.contains(&inst) {
      continue;
    }
    changed = true;
    if let Some(stores) = alloca_stores.get(&inst) {
      for &store in stores {
        module.erase(store);
      }
    }
    module.erase(inst);
  }
  changed
}
