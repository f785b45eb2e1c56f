//! Front-end core for a Go-family language: semantic analysis over a
//! parser-produced AST, and lowering of the checked program into a typed
//! SSA module for the backend.

pub mod frontend;
pub mod ir;
pub mod sema;

pub use frontend::diagnostic::{Diagnostic, Diagnostics};
pub use ir::lower::{lower, EmitError};
pub use sema::{check, Program};
