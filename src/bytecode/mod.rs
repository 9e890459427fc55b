pub mod disasm;
pub mod encoding;
pub mod ir;
pub mod op;

pub use encoding::EncodingError;
pub use ir::{Bytecode, CompiledFunction};
pub use op::{Opcode, make_instruction};
