//! Storage assignment for the code generator. Three temporaries (x5-x7)
//! stage operands for one instruction at a time; everything that lives
//! across instructions goes through the general pool (x8-x31, which by
//! convention includes the return-value register x10) or, under pressure,
//! 4-byte stack slots. Slots are reused first-fit once their owner dies.

use std::collections::HashMap;
use std::fmt;

use crate::ir::{Global, Module, Value};

pub const RETURN_REGISTER: Register = Register(10);

const TEMPORARY_REGISTERS: [u32; 3] = [5, 6, 7];
const AVAILABLE_REGISTERS: [u32; 24] = [
  8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31,
];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Register(pub u32);

impl fmt::Display for Register {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "x{}", self.0)
  }
}

/// Where a value currently is. Literals and globals are locations too, so
/// every operand can be staged through the same two methods.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Location {
  Reg(Register),
  Stack(i32),
  Global(Global),
  Const(i32),
}

impl Location {
  /// Materialize the value in a register, emitting whatever staging code
  /// that takes. Register locations come back as themselves; everything
  /// else lands in a temporary.
  pub fn load(self, module: &Module, asm: &mut String, allocator: &mut Allocator) -> Register {
    match self {
      Location::Reg(reg) => reg,
      Location::Stack(offset) => {
        let tmp = allocator.allocate_temporary();
        asm.push_str(&format!("  lw    {}, {}(sp)\n", tmp, offset));
        tmp
      }
      Location::Const(value) => {
        let tmp = allocator.allocate_temporary();
        asm.push_str(&format!("  li    {}, {}\n", tmp, value));
        tmp
      }
      Location::Global(g) => {
        let tmp = allocator.allocate_temporary();
        let name = &module.global(g).name;
        asm.push_str(&format!("  la    {}, {}\n", tmp, name));
        asm.push_str(&format!("  lw    {}, 0({})\n", tmp, tmp));
        tmp
      }
    }
  }

  pub fn store(self, value: Register, module: &Module, asm: &mut String, allocator: &mut Allocator) {
    match self {
      Location::Reg(reg) => {
        asm.push_str(&format!("  mv    {}, {}\n", reg, value));
      }
      Location::Stack(offset) => {
        asm.push_str(&format!("  sw    {}, {}(sp)\n", value, offset));
      }
      Location::Global(g) => {
        let tmp = allocator.allocate_temporary();
        let name = &module.global(g).name;
        asm.push_str(&format!("  la    {}, {}\n", tmp, name));
        asm.push_str(&format!("  sw    {}, 0({})\n", value, tmp));
      }
      Location::Const(_) => panic!("store into a literal"),
    }
  }
}

pub struct Allocator {
  temporaries: [bool; 3],
  registers: [Option<Value>; 24],
  stack: Vec<Option<Value>>,
  locations: HashMap<Value, Location>,
  live_until: HashMap<Value, i64>,
}

impl Allocator {
  pub fn new() -> Self {
    Allocator {
      temporaries: [false; 3],
      registers: [None; 24],
      stack: Vec::new(),
      locations: HashMap::new(),
      live_until: HashMap::new(),
    }
  }

  pub fn location(&self, value: Value) -> Location {
    *self.locations.get(&value).expect("value has no storage location")
  }

  /// Place a value that lives until instruction index `end`. Prefer a free
  /// register; else evict the resident needed furthest in the future, but
  /// only when it outlives the newcomer; else the newcomer itself goes on
  /// the stack.
  pub fn allocate(&mut self, value: Value, end: i64, module: &Module, asm: &mut String) -> Location {
    self.live_until.insert(value, end);
    if let Some(loc) = self.try_allocate_register(value, end, module, asm) {
      return loc;
    }
    self.allocate_stack(value)
  }

  fn try_allocate_register(
    &mut self,
    value: Value,
    end: i64,
    module: &Module,
    asm: &mut String,
  ) -> Option<Location> {
    for i in 0..self.registers.len() {
      if self.registers[i].is_none() {
        self.registers[i] = Some(value);
        let loc = Location::Reg(Register(AVAILABLE_REGISTERS[i]));
        self.locations.insert(value, loc);
        return Some(loc);
      }
    }

    let mut victim = 0;
    let mut victim_end = i64::MIN;
    for i in 0..self.registers.len() {
      let owner = self.registers[i].expect("full register file");
      let owner_end = self.live_until[&owner];
      if owner_end > victim_end {
        victim = i;
        victim_end = owner_end;
      }
    }

    if victim_end > end {
      let owner = self.registers[victim].expect("full register file");
      self.spill(owner, module, asm);
      self.registers[victim] = Some(value);
      let loc = Location::Reg(Register(AVAILABLE_REGISTERS[victim]));
      self.locations.insert(value, loc);
      return Some(loc);
    }

    None
  }

  /// Persist a register resident into a fresh stack slot and retarget its
  /// location there; the caller hands the register itself to the newcomer.
  fn spill(&mut self, value: Value, module: &Module, asm: &mut String) {
    let current = self.location(value);
    let slot = self.allocate_stack(value);
    let reg = current.load(module, asm, self);
    slot.store(reg, module, asm, self);
    self.free_temporaries();
  }

  fn allocate_stack(&mut self, value: Value) -> Location {
    for i in 0..self.stack.len() {
      if self.stack[i].is_none() {
        self.stack[i] = Some(value);
        let loc = Location::Stack((i * 4) as i32);
        self.locations.insert(value, loc);
        return loc;
      }
    }
    let loc = Location::Stack((self.stack.len() * 4) as i32);
    self.stack.push(Some(value));
    self.locations.insert(value, loc);
    loc
  }

  /// Release every register and slot whose owner's live range has ended at
  /// or before `end`.
  pub fn free_until(&mut self, end: i64) {
    for i in 0..self.registers.len() {
      if let Some(owner) = self.registers[i] {
        if self.live_until[&owner] <= end {
          self.registers[i] = None;
          self.locations.remove(&owner);
          self.live_until.remove(&owner);
        }
      }
    }
    for i in 0..self.stack.len() {
      if let Some(owner) = self.stack[i] {
        if self.live_until[&owner] <= end {
          self.stack[i] = None;
          self.locations.remove(&owner);
          self.live_until.remove(&owner);
        }
      }
    }
  }

  pub fn allocate_temporary(&mut self) -> Register {
    for i in 0..self.temporaries.len() {
      if !self.temporaries[i] {
        self.temporaries[i] = true;
        return Register(TEMPORARY_REGISTERS[i]);
      }
    }
    panic!("out of temporary registers");
  }

  pub fn free_temporaries(&mut self) {
    self.temporaries = [false; 3];
  }

  /// Frame bytes used, rounded up to the ABI's 16-byte alignment.
  pub fn stack_size(&self) -> i32 {
    ((self.stack.len() * 4 + 15) & !15) as i32
  }
}

impl Default for Allocator {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ir::Module;

  #[test]
  fn simultaneously_live_values_get_disjoint_storage() {
    let module = Module::new();
    let mut asm = String::new();
    let mut allocator = Allocator::new();
    let locations: Vec<Location> =
      (0..30).map(|i| allocator.allocate(Value(i), 1000 + i as i64, &module, &mut asm)).collect();
    for (i, a) in locations.iter().enumerate() {
      for b in &locations[i + 1..] {
        assert_ne!(a, b);
      }
    }
    assert_eq!(locations.iter().filter(|l| matches!(l, Location::Reg(_))).count(), 24);
    assert_eq!(locations.iter().filter(|l| matches!(l, Location::Stack(_))).count(), 6);
  }

  #[test]
  fn return_register_sits_in_the_general_pool() {
    // x10 is deliberately allocatable, faithful to the reference convention
    let module = Module::new();
    let mut asm = String::new();
    let mut allocator = Allocator::new();
    allocator.allocate(Value(0), 100, &module, &mut asm);
    allocator.allocate(Value(1), 100, &module, &mut asm);
    let third = allocator.allocate(Value(2), 100, &module, &mut asm);
    assert_eq!(third, Location::Reg(RETURN_REGISTER));
  }

  #[test]
  fn evicts_the_resident_needed_furthest() {
    let module = Module::new();
    let mut asm = String::new();
    let mut allocator = Allocator::new();
    for i in 0..24 {
      allocator.allocate(Value(i), 100 + i as i64, &module, &mut asm);
    }
    // x31's owner (end 123) is the furthest and outlives the newcomer
    let loc = allocator.allocate(Value(99), 50, &module, &mut asm);
    assert_eq!(loc, Location::Reg(Register(31)));
    assert!(asm.contains("sw    x31, 0(sp)"));
    assert_eq!(allocator.location(Value(23)), Location::Stack(0));
  }

  #[test]
  fn newcomer_outliving_everyone_goes_to_the_stack() {
    let module = Module::new();
    let mut asm = String::new();
    let mut allocator = Allocator::new();
    for i in 0..24 {
      allocator.allocate(Value(i), 10, &module, &mut asm);
    }
    let loc = allocator.allocate(Value(99), 50, &module, &mut asm);
    assert_eq!(loc, Location::Stack(0));
    assert!(asm.is_empty(), "no resident may be disturbed: {}", asm);
  }

  #[test]
  fn released_storage_is_reused() {
    let module = Module::new();
    let mut asm = String::new();
    let mut allocator = Allocator::new();
    let first = allocator.allocate(Value(0), 5, &module, &mut asm);
    allocator.free_until(5);
    let second = allocator.allocate(Value(1), 9, &module, &mut asm);
    assert_eq!(first, second);
  }

  #[test]
  fn cross_block_values_survive_every_release() {
    let module = Module::new();
    let mut asm = String::new();
    let mut allocator = Allocator::new();
    let loc = allocator.allocate(Value(0), i64::MAX, &module, &mut asm);
    allocator.free_until(1_000_000);
    assert_eq!(allocator.location(Value(0)), loc);
  }

  #[test]
  #[should_panic(expected = "out of temporary registers")]
  fn temporary_budget_is_three() {
    let mut allocator = Allocator::new();
    allocator.allocate_temporary();
    allocator.allocate_temporary();
    allocator.allocate_temporary();
    allocator.allocate_temporary();
  }
}
