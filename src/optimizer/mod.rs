//! The optimization pipeline. Each pass reports whether it changed the
//! module; a pass can expose work for the others (folding a condition makes
//! a branch dead, dead code makes blocks mergeable), so the sequence repeats
//! until a full round changes nothing.

pub mod cfg;
pub mod const_prop;
pub mod dataflow;
pub mod dce;
pub mod simplify;

use crate::ir::Module;

pub fn optimize(module: &mut Module) {
  let mut changed = true;
  while changed {
    changed = const_prop::run_const_prop(module);
    changed |= dce::run_dce(module);
    changed |= simplify::run_simplify(module);
  }
}
