mod bytecode;
mod compiler;
mod error;
mod events;
mod heap;
mod infer;
mod interpreter;
mod opcode;
mod parker;
mod parser;
mod ping;
mod registers;
mod stack;
mod symbols;
mod threads;
mod value;
mod vm;

pub use bytecode::*;
pub use compiler::*;
pub use error::*;
pub use events::*;
pub use heap::*;
pub use infer::*;
pub use interpreter::*;
pub use opcode::*;
pub use parker::*;
pub use parser::*;
pub use ping::*;
pub use registers::*;
pub use stack::*;
pub use symbols::*;
pub use threads::*;
pub use value::*;
pub use vm::*;
