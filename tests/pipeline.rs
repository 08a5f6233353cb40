//! End-to-end checks over parse -> optimize -> print/emit.

use glint::backend::Backend;
use glint::ir::parse;
use glint::optimizer::{const_prop, dce, simplify};

const CELL_ARITHMETIC: &str = "fun @main() {\n\
                               %entry:\n\
                               \x20 %c = alloca\n\
                               \x20 store 5, %c\n\
                               \x20 %v = load %c\n\
                               \x20 %s = add %v, 3\n\
                               \x20 ret %s\n\
                               }\n";

const COUNTING_LOOP: &str = "fun @main() {\n\
                             %entry:\n\
                             \x20 %i = alloca\n\
                             \x20 store 0, %i\n\
                             \x20 jump %loop\n\
                             %loop:\n\
                             \x20 %v = load %i\n\
                             \x20 %n = add %v, 1\n\
                             \x20 store %n, %i\n\
                             \x20 %c = slt %n, 10\n\
                             \x20 br %c, %loop, %exit\n\
                             %exit:\n\
                             \x20 %r = load %i\n\
                             \x20 ret %r\n\
                             }\n";

#[test]
fn cell_arithmetic_reduces_to_a_literal_return() {
  let mut module = parse(CELL_ARITHMETIC).unwrap();
  glint::optimizer::optimize(&mut module);
  assert_eq!(module.to_string(), "fun @main() {\n%entry:\n  ret 8\n}\n");
}

#[test]
fn pipeline_is_idempotent() {
  for src in [CELL_ARITHMETIC, COUNTING_LOOP] {
    let mut module = parse(src).unwrap();
    glint::optimizer::optimize(&mut module);
    let settled = module.to_string();
    // a second full round must change nothing and report nothing
    assert!(!const_prop::run_const_prop(&mut module));
    assert!(!dce::run_dce(&mut module));
    assert!(!simplify::run_simplify(&mut module));
    assert_eq!(module.to_string(), settled);
  }
}

#[test]
fn provably_true_branch_leaves_straight_line_code() {
  let mut module = parse(
    "fun @main() {\n\
     %entry:\n\
     \x20 %c = slt 1, 2\n\
     \x20 br %c, %then, %else\n\
     %then:\n\
     \x20 ret 1\n\
     %else:\n\
     \x20 ret 0\n\
     }\n",
  )
  .unwrap();
  glint::optimizer::optimize(&mut module);
  assert_eq!(module.to_string(), "fun @main() {\n%entry:\n  ret 1\n}\n");
}

#[test]
fn unreachable_blocks_are_removed() {
  let mut module = parse(
    "fun @main() {\n\
     %entry:\n\
     \x20 jump %exit\n\
     %orphan:\n\
     \x20 ret 7\n\
     %exit:\n\
     \x20 ret 0\n\
     }\n",
  )
  .unwrap();
  glint::optimizer::optimize(&mut module);
  let text = module.to_string();
  assert!(!text.contains("orphan"));
  assert!(!text.contains("ret 7"));
}

#[test]
fn written_only_cells_disappear_with_their_stores() {
  let mut module = parse(
    "fun @main() {\n\
     %entry:\n\
     \x20 %dead = alloca\n\
     \x20 store 1, %dead\n\
     \x20 store 2, %dead\n\
     \x20 ret 0\n\
     }\n",
  )
  .unwrap();
  glint::optimizer::optimize(&mut module);
  assert_eq!(module.to_string(), "fun @main() {\n%entry:\n  ret 0\n}\n");
}

#[test]
fn cells_with_surviving_loads_are_kept() {
  let mut module = parse(COUNTING_LOOP).unwrap();
  glint::optimizer::optimize(&mut module);
  let text = module.to_string();
  // the loop-carried counter never folds, so its cell and loads remain
  assert!(text.contains("alloca"));
  assert!(text.contains("load"));
  assert!(text.contains("br "));
}

#[test]
fn optimized_module_lowers_to_assembly() {
  let mut module = parse(CELL_ARITHMETIC).unwrap();
  glint::optimizer::optimize(&mut module);
  let asm = Backend::generate_asm(&module);
  assert!(asm.contains("main_entry:\n"));
  assert!(asm.contains("  li    x5, 8\n"));
  assert!(asm.contains("  mv    x10, x5\n"));
  assert!(asm.contains("  j     main_ret\n"));
}

#[test]
fn codegen_runs_on_unoptimized_ir_too() {
  let module = parse(COUNTING_LOOP).unwrap();
  let asm = Backend::generate_asm(&module);
  assert!(asm.contains("main_loop:\n"));
  assert!(asm.contains("main_exit:\n"));
  assert!(asm.contains("  beqz  "));
}
