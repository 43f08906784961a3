//! Bytecode representation and the template compiler.
//!
//! # Module Structure
//!
//! - `op` - Opcode and tracker kind definitions
//! - `builder` - CodeBuilder for emitting bytecode during compilation
//! - `compiler` - Template tree to bytecode compiler

pub use builder::jump_target;
pub use compiler::CompilationContext;
pub use op::{Opcode, TrackerKind};

mod builder;
mod compiler;
mod op;
