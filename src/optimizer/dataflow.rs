//! Generic forward worklist fixpoint engine. An analysis supplies the
//! lattice, the per-instruction transfer function, and the classification of
//! branch edges that are reachable under the current facts; the engine owns
//! the IN/OUT maps and the set of control edges it has discovered so far.
//!
//! Edges start empty and appear only when the analysis reports them
//! reachable, so an edge whose branch condition is provably one-sided is
//! never propagated along. IN is the meet over OUT of the discovered
//! predecessors; an instruction with no discovered predecessor keeps
//! whatever was seeded into its IN. Worklist order is unspecified and must
//! not affect the result, only the iteration count.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use crate::ir::{Module, Value};

use super::cfg::Cfg;

/// An abstract value with a least element and a greatest-lower-bound.
pub trait Lattice: Clone + PartialEq {
  fn bottom() -> Self;
  fn meet(&self, other: &Self) -> Self;
}

/// Pointwise meet of whole fact maps.
pub trait Meet {
  fn meet_with(&mut self, other: &Self);
}

/// A map from value identities to lattice elements; missing keys read as
/// bottom.
#[derive(Clone, Debug, PartialEq)]
pub struct FactMap<K: Copy + Eq + Hash, V: Lattice> {
  facts: HashMap<K, V>,
}

impl<K: Copy + Eq + Hash, V: Lattice> FactMap<K, V> {
  pub fn get(&self, key: K) -> V {
    self.facts.get(&key).cloned().unwrap_or_else(V::bottom)
  }

  pub fn set(&mut self, key: K, value: V) {
    self.facts.insert(key, value);
  }
}

impl<K: Copy + Eq + Hash, V: Lattice> Default for FactMap<K, V> {
  fn default() -> Self {
    FactMap { facts: HashMap::new() }
  }
}

impl<K: Copy + Eq + Hash, V: Lattice> Meet for FactMap<K, V> {
  fn meet_with(&mut self, other: &Self) {
    for (key, value) in &other.facts {
      match self.facts.get_mut(key) {
        Some(current) => *current = current.meet(value),
        None => {
          self.facts.insert(*key, value.clone());
        }
      }
    }
  }
}

pub trait Analysis {
  type Facts: Clone + Default + PartialEq + Meet;

  /// Compute OUT from IN for one instruction.
  fn transfer(&self, module: &Module, inst: Value, input: &Self::Facts) -> Self::Facts;

  /// The successor instructions reachable from `inst` under `input`. For
  /// everything but a conditional branch this is the static successor set.
  fn flow_successors(
    &self,
    module: &Module,
    cfg: &Cfg,
    inst: Value,
    input: &Self::Facts,
  ) -> Vec<Value>;
}

pub struct Solver<'a, A: Analysis> {
  analysis: A,
  cfg: &'a Cfg,
  ins: HashMap<Value, A::Facts>,
  outs: HashMap<Value, A::Facts>,
  succs: HashMap<Value, HashSet<Value>>,
  preds: HashMap<Value, HashSet<Value>>,
  worklist: VecDeque<Value>,
  queued: HashSet<Value>,
}

impl<'a, A: Analysis> Solver<'a, A> {
  pub fn new(module: &Module, cfg: &'a Cfg, analysis: A) -> Self {
    let insts = module.all_insts();
    let mut solver = Solver {
      analysis,
      cfg,
      ins: HashMap::new(),
      outs: HashMap::new(),
      succs: HashMap::new(),
      preds: HashMap::new(),
      worklist: VecDeque::new(),
      queued: HashSet::new(),
    };
    for &inst in &insts {
      solver.ins.insert(inst, A::Facts::default());
      solver.outs.insert(inst, A::Facts::default());
      solver.succs.insert(inst, HashSet::new());
      solver.preds.insert(inst, HashSet::new());
      solver.worklist.push_back(inst);
      solver.queued.insert(inst);
    }
    solver
  }

  /// Install external facts at an instruction's IN before solving. They
  /// survive as long as the instruction has no discovered predecessor.
  pub fn seed(&mut self, inst: Value, facts: A::Facts) {
    self.ins.insert(inst, facts);
  }

  pub fn solve(&mut self, module: &Module) {
    while let Some(inst) = self.worklist.pop_front() {
      self.queued.remove(&inst);

      let preds: Vec<Value> =
        self.preds.get(&inst).map(|set| set.iter().copied().collect()).unwrap_or_default();
      if !preds.is_empty() {
        let mut input = A::Facts::default();
        for pred in &preds {
          input.meet_with(&self.outs[pred]);
        }
        self.ins.insert(inst, input);
      }

      let input = self.ins[&inst].clone();
      let out = self.analysis.transfer(module, inst, &input);
      let mut grew = false;
      for succ in self.analysis.flow_successors(module, self.cfg, inst, &input) {
        grew |= self.add_edge(inst, succ);
      }

      if grew || self.outs[&inst] != out {
        self.outs.insert(inst, out);
        let succs: Vec<Value> = self.succs[&inst].iter().copied().collect();
        for succ in succs {
          self.push(succ);
        }
      }
    }
  }

  fn add_edge(&mut self, from: Value, to: Value) -> bool {
    if !self.succs.get_mut(&from).expect("unknown instruction").insert(to) {
      return false;
    }
    self.preds.get_mut(&to).expect("unknown instruction").insert(from);
    true
  }

  fn push(&mut self, inst: Value) {
    if self.queued.insert(inst) {
      self.worklist.push_back(inst);
    }
  }

  pub fn fact_in(&self, inst: Value) -> &A::Facts {
    &self.ins[&inst]
  }

  pub fn fact_out(&self, inst: Value) -> &A::Facts {
    &self.outs[&inst]
  }
}
