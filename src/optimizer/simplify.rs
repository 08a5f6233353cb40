//! CFG cleanup: drop blocks no function entry can reach, then merge
//! straight-line block chains. Edges are rebuilt from scratch between
//! structural edits rather than patched.

use std::collections::HashSet;

use crate::ir::{BasicBlock, Module, Value};

use super::cfg::Cfg;

pub fn run_simplify(module: &mut Module) -> bool {
  let mut changed = remove_unreachable(module);
  while merge_one(module) {
    changed = true;
  }
  changed
}

fn remove_unreachable(module: &mut Module) -> bool {
  let cfg = Cfg::build(module);
  let mut reachable: HashSet<BasicBlock> = HashSet::new();
  let mut worklist: Vec<BasicBlock> =
    module.functions().filter_map(|f| module.entry(f)).collect();

  while let Some(bb) = worklist.pop() {
    if !reachable.insert(bb) {
      continue;
    }
    for &succ in cfg.block_successors(bb) {
      if !reachable.contains(&succ) {
        worklist.push(succ);
      }
    }
  }

  let mut changed = false;
  for func in module.functions() {
    for bb in module.func(func).blocks.clone() {
      if !reachable.contains(&bb) {
        module.remove_block(bb);
        changed = true;
      }
    }
  }
  changed
}

/// Merge one block into its sole predecessor, if any candidate exists, and
/// report whether a merge happened. The caller loops; the CFG is recomputed
/// on every call so the edges never go stale.
fn merge_one(module: &mut Module) -> bool {
  let cfg = Cfg::build(module);
  for func in module.functions() {
    let entry = module.entry(func);
    for bb in module.func(func).blocks.clone() {
      let succs = cfg.block_successors(bb);
      if succs.len() != 1 {
        continue;
      }
      let succ = *succs.iter().next().expect("checked size");
      if succ == bb || Some(succ) == entry {
        continue;
      }
      if cfg.block_predecessors(succ).len() != 1 {
        continue;
      }

      let term = module.terminator(bb).expect("unterminated block");
      module.erase(term);
      splice(module, succ, bb);
      module.remove_block(succ);
      return true;
    }
  }
  false
}

fn splice(module: &mut Module, from: BasicBlock, into: BasicBlock) {
  let moved: Vec<Value> = module.block(from).insts.clone();
  for &inst in &moved {
    module.value_mut(inst).block = into;
  }
  module.block_mut(from).insts.clear();
  module.block_mut(into).insts.extend(moved);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ir::{parse, InstKind, Operand};

  #[test]
  fn drops_blocks_with_no_path_from_entry() {
    let mut module = parse(
      "fun @main() {\n\
       %entry:\n\
       \x20 jump %exit\n\
       %orphan:\n\
       \x20 ret 1\n\
       %exit:\n\
       \x20 ret 0\n\
       }\n",
    )
    .unwrap();
    assert!(run_simplify(&mut module));
    let func = module.functions().next().unwrap();
    // the orphan block is gone and entry has been merged with exit
    assert_eq!(module.func(func).blocks.len(), 1);
    let entry = module.entry(func).unwrap();
    assert_eq!(
      module.value(module.terminator(entry).unwrap()).kind,
      InstKind::Ret { value: Operand::Const(0) }
    );
  }

  #[test]
  fn merges_straight_line_chains() {
    let mut module = parse(
      "fun @main() {\n\
       %entry:\n\
       \x20 %c = alloca\n\
       \x20 jump %mid\n\
       %mid:\n\
       \x20 store 1, %c\n\
       \x20 jump %exit\n\
       %exit:\n\
       \x20 %v = load %c\n\
       \x20 ret %v\n\
       }\n",
    )
    .unwrap();
    assert!(run_simplify(&mut module));
    let func = module.functions().next().unwrap();
    assert_eq!(module.func(func).blocks.len(), 1);
    let entry = module.entry(func).unwrap();
    let kinds: Vec<_> =
      module.block(entry).insts.iter().map(|&v| module.value(v).kind.clone()).collect();
    assert_eq!(kinds.len(), 4);
    assert!(matches!(kinds[0], InstKind::Alloca));
    assert!(matches!(kinds[1], InstKind::Store { .. }));
    assert!(matches!(kinds[2], InstKind::Load { .. }));
    assert!(matches!(kinds[3], InstKind::Ret { .. }));
    assert!(!run_simplify(&mut module));
  }

  #[test]
  fn keeps_blocks_with_multiple_predecessors() {
    let mut module = parse(
      "fun @main() {\n\
       %entry:\n\
       \x20 %c = alloca\n\
       \x20 %cv = load %c\n\
       \x20 br %cv, %then, %else\n\
       %then:\n\
       \x20 jump %merge\n\
       %else:\n\
       \x20 jump %merge\n\
       %merge:\n\
       \x20 ret 0\n\
       }\n",
    )
    .unwrap();
    assert!(!run_simplify(&mut module));
    let func = module.functions().next().unwrap();
    assert_eq!(module.func(func).blocks.len(), 4);
  }

  #[test]
  fn self_loop_is_left_alone() {
    let mut module = parse(
      "fun @main() {\n\
       %entry:\n\
       \x20 jump %spin\n\
       %spin:\n\
       \x20 jump %spin\n\
       }\n",
    )
    .unwrap();
    // %spin's only successor is itself; entry cannot absorb it either,
    // because %spin has two predecessors (entry and itself)
    assert!(!run_simplify(&mut module));
    let func = module.functions().next().unwrap();
    assert_eq!(module.func(func).blocks.len(), 2);
  }
}
