//! Bytecode code generator (§4.4, §3.4, §6): turns SSA IR into a linear,
//! linkable bytecode representation.

mod builder;
mod lower;
mod opcode;

pub mod link;

pub use link::{LinkFunction, LinkFunctionId, LinkItem, LinkItemId, LinkObject, MemberKind, MemberPayload};
pub use opcode::Opcode;

use crate::intern::StringTable;
use crate::ir::Module;

#[must_use]
pub fn generate(module: Module, strings: &StringTable) -> LinkObject {
    lower::generate(module, strings)
}
