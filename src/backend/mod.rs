pub mod asm_gen;
pub mod regalloc;

use crate::ir::Module;

pub struct Backend;

impl Backend {
  /// Lower a module to RV32 assembly text. Works on optimized and
  /// unoptimized IR alike; the module is never mutated.
  pub fn generate_asm(module: &Module) -> String {
    asm_gen::generate_program(module)
  }
}
