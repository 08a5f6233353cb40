//! An optimizing backend for a small imperative language: a CFG-based IR,
//! a dataflow optimization pipeline, and a RISC-V 32-bit code generator.

pub mod backend;
pub mod ir;
pub mod optimizer;
