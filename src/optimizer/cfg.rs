//! Control-flow edges at block and instruction granularity. Edges are always
//! rebuilt from the terminators; passes that do structural surgery must call
//! `Cfg::build` again instead of patching the maps, or the next fixpoint
//! would run over stale edges.

use std::collections::{HashMap, HashSet};

use crate::ir::{BasicBlock, InstKind, Module, Value};

pub struct Cfg {
  block_succs: HashMap<BasicBlock, HashSet<BasicBlock>>,
  block_preds: HashMap<BasicBlock, HashSet<BasicBlock>>,
  inst_succs: HashMap<Value, HashSet<Value>>,
  inst_preds: HashMap<Value, HashSet<Value>>,
}

impl Cfg {
  pub fn build(module: &Module) -> Cfg {
    let mut cfg = Cfg {
      block_succs: HashMap::new(),
      block_preds: HashMap::new(),
      inst_succs: HashMap::new(),
      inst_preds: HashMap::new(),
    };

    for func in module.functions() {
      for &bb in &module.func(func).blocks {
        cfg.block_succs.entry(bb).or_default();
        cfg.block_preds.entry(bb).or_default();
        for &inst in &module.block(bb).insts {
          cfg.inst_succs.entry(inst).or_default();
          cfg.inst_preds.entry(inst).or_default();
        }
      }
    }

    for func in module.functions() {
      for &bb in &module.func(func).blocks {
        let insts = &module.block(bb).insts;
        for (index, &inst) in insts.iter().enumerate() {
          match &module.value(inst).kind {
            InstKind::Branch { then_bb, else_bb, .. } => {
              cfg.add_block_edge(bb, *then_bb);
              cfg.add_block_edge(bb, *else_bb);
              cfg.add_inst_edge(inst, module.first_inst(*then_bb).expect("empty block"));
              cfg.add_inst_edge(inst, module.first_inst(*else_bb).expect("empty block"));
            }
            InstKind::Jump { target } => {
              cfg.add_block_edge(bb, *target);
              cfg.add_inst_edge(inst, module.first_inst(*target).expect("empty block"));
            }
            _ => {
              if let Some(&next) = insts.get(index + 1) {
                cfg.add_inst_edge(inst, next);
              }
            }
          }
        }
      }
    }

    cfg
  }

  fn add_block_edge(&mut self, from: BasicBlock, to: BasicBlock) {
    self.block_succs.entry(from).or_default().insert(to);
    self.block_preds.entry(to).or_default().insert(from);
  }

  fn add_inst_edge(&mut self, from: Value, to: Value) {
    self.inst_succs.entry(from).or_default().insert(to);
    self.inst_preds.entry(to).or_default().insert(from);
  }

  pub fn block_successors(&self, bb: BasicBlock) -> &HashSet<BasicBlock> {
    &self.block_succs[&bb]
  }

  pub fn block_predecessors(&self, bb: BasicBlock) -> &HashSet<BasicBlock> {
    &self.block_preds[&bb]
  }

  pub fn inst_successors(&self, inst: Value) -> &HashSet<Value> {
    &self.inst_succs[&inst]
  }

  pub fn inst_predecessors(&self, inst: Value) -> &HashSet<Value> {
    &self.inst_preds[&inst]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ir::{parse, Module};

  fn diamond() -> Module {
    parse(
      "fun @main() {\n\
       %entry:\n\
       \x20 %c = slt 1, 2\n\
       \x20 br %c, %then, %else\n\
       %then:\n\
       \x20 jump %merge\n\
       %else:\n\
       \x20 jump %merge\n\
       %merge:\n\
       \x20 ret 0\n\
       }\n",
    )
    .unwrap()
  }

  #[test]
  fn block_edges_follow_terminators() {
    let module = diamond();
    let cfg = Cfg::build(&module);
    let func = module.functions().next().unwrap();
    let blocks = &module.func(func).blocks;
    let (entry, then_bb, else_bb, merge) = (blocks[0], blocks[1], blocks[2], blocks[3]);

    assert_eq!(cfg.block_successors(entry).len(), 2);
    assert!(cfg.block_successors(entry).contains(&then_bb));
    assert!(cfg.block_successors(entry).contains(&else_bb));
    assert!(cfg.block_predecessors(entry).is_empty());
    assert_eq!(cfg.block_predecessors(merge).len(), 2);
    assert!(cfg.block_successors(merge).is_empty());
  }

  #[test]
  fn inst_edges_thread_through_blocks() {
    let module = diamond();
    let cfg = Cfg::build(&module);
    let func = module.functions().next().unwrap();
    let blocks = &module.func(func).blocks;
    let cmp = module.block(blocks[0]).insts[0];
    let br = module.block(blocks[0]).insts[1];
    let then_jump = module.block(blocks[1]).insts[0];
    let else_jump = module.block(blocks[2]).insts[0];
    let ret = module.block(blocks[3]).insts[0];

    assert_eq!(cfg.inst_successors(cmp).len(), 1);
    assert!(cfg.inst_successors(cmp).contains(&br));
    assert_eq!(cfg.inst_successors(br).len(), 2);
    assert!(cfg.inst_successors(br).contains(&then_jump));
    assert!(cfg.inst_successors(br).contains(&else_jump));
    assert_eq!(cfg.inst_predecessors(ret).len(), 2);
    assert!(cfg.inst_successors(ret).is_empty());
  }
}
