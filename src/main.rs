use std::fs::read_to_string;

use clap::{Parser, ValueEnum};

use glint::backend::Backend;
use glint::{ir, optimizer};

/// Output Mode
#[derive(Debug, Clone, ValueEnum)]
enum Mode {
  #[value(name = "-ir")]
  Ir,
  #[value(name = "-riscv")]
  Riscv,
}

#[derive(Parser, Debug)]
#[command(version, about = "An optimizing RISC-V backend for a small imperative language")]
struct Cli {
  /// Output mode: -ir for optimized IR, -riscv for RISC-V assembly
  #[arg(value_enum, allow_hyphen_values = true)]
  mode: Mode,

  /// Input IR file
  input: String,

  /// Output file for the generated code
  #[arg(short = 'o', long = "output")]
  output: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let args = Cli::parse();
  let input = read_to_string(&args.input)?;

  let mut module = ir::parse(&input)?;
  optimizer::optimize(&mut module);

  match args.mode {
    Mode::Ir => {
      std::fs::write(&args.output, module.to_string())?;
    }
    Mode::Riscv => {
      std::fs::write(&args.output, Backend::generate_asm(&module))?;
    }
  }

  Ok(())
}
