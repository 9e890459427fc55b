//! Runtime values and the native functions that operate on them.

pub mod builtins;
pub mod errors;
pub mod format;
pub mod iterator;
pub mod object;

pub use builtins::{BUILTINS, builtin_index};
pub use errors::{Error, Result};
pub use iterator::{ArrayIterator, MapIterator, StringIterator};
pub use object::{BuiltinFunction, Closure, FreeCell, NativeFn, Object, ObjectMap, UserFunction};

/// Largest string, in bytes, an operation may produce.
pub const MAX_STRING_LEN: usize = 2_147_483_647;

/// Largest byte buffer an operation may produce.
pub const MAX_BYTES_LEN: usize = 2_147_483_647;

/// How deep equality, copying, counting and printing descend into nested
/// containers. Containers can hold themselves, so the walk stops here.
pub const MAX_NESTING: usize = 256;
