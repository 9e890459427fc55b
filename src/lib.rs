//! Cinder: an embeddable scripting engine.
//!
//! A host hands the [`compiler`] a syntax tree ([`ast`]), gets back
//! [`bytecode`], and runs it on the stack-based [`runtime`] VM. The
//! [`script`] module wraps both steps with host variables and modules.

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod objects;
pub mod runtime;
pub mod script;
pub mod source;

pub use bytecode::{Bytecode, CompiledFunction, Opcode};
pub use compiler::{CompileError, Compiler, ErrorList, ModuleMap};
pub use objects::{Object, ObjectMap};
pub use runtime::{RuntimeError, Vm, VmConfig};
pub use script::{Compiled, Script, ScriptError};

use tracing_subscriber::{EnvFilter, fmt};

/// Install a `tracing` subscriber on stderr.
///
/// `RUST_LOG` overrides the default filter of `warn`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
