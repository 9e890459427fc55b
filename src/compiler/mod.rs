pub mod compile;
pub mod compile_error;
pub mod modules;
pub mod symbol_table;

pub use compile::{Compiler, MAX_ERRORS};
pub use compile_error::{CompileError, ErrorList};
pub use modules::{Module, ModuleMap};
pub use symbol_table::{Symbol, SymbolScope, SymbolTable};
