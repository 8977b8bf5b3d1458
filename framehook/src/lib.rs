mod access;
mod assembler;
mod bytecode;
mod debugger;
mod frame;
mod interpreter;
mod layout;
mod natives;
mod records;
mod replay;
mod stack;
mod trace;
mod value;
mod vm;

pub use access::*;
pub use assembler::*;
pub use bytecode::*;
pub use debugger::*;
pub use frame::*;
pub use interpreter::*;
pub use layout::*;
pub use natives::{NATIVES, Native, NativeFunction, find_native};
pub use records::*;
pub use replay::*;
pub use stack::*;
pub use trace::*;
pub use value::*;
pub use vm::*;
