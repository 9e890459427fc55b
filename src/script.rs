//! Host-facing entry point: compile a syntax tree together with host
//! variables and modules, then run it and read variables back.

use crate::ast::File;
use crate::bytecode::Bytecode;
use crate::compiler::{Compiler, ErrorList, ModuleMap, SymbolTable};
use crate::objects::Object;
use crate::runtime::{RuntimeError, Vm, VmConfig};
use crate::source::SourceFileSet;
use indexmap::IndexMap;
use std::rc::Rc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Compile(#[from] ErrorList),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("'{0}' is not defined")]
    NotDefined(String),
}

pub type Result<T> = std::result::Result<T, ScriptError>;

/// A program plus the host variables and modules it is compiled against.
#[derive(Debug, Clone)]
pub struct Script {
    file: File,
    file_set: SourceFileSet,
    variables: IndexMap<String, Object>,
    modules: ModuleMap,
    config: VmConfig,
}

impl Script {
    pub fn new(file: File) -> Self {
        Script {
            file,
            file_set: SourceFileSet::new(),
            variables: IndexMap::new(),
            modules: ModuleMap::new(),
            config: VmConfig::default(),
        }
    }

    /// Source files the tree's positions refer to.
    pub fn with_file_set(mut self, file_set: SourceFileSet) -> Self {
        self.file_set = file_set;
        self
    }

    /// Make `value` available to the script as the global `name`.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Object>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.variables.shift_remove(name).is_some()
    }

    pub fn set_modules(&mut self, modules: ModuleMap) {
        self.modules = modules;
    }

    pub fn set_config(&mut self, config: VmConfig) {
        self.config = config;
    }

    pub fn compile(&self) -> Result<Compiled> {
        let mut table = SymbolTable::with_builtins();
        let host: Vec<(usize, Object)> = self
            .variables
            .iter()
            .map(|(name, value)| (table.define(name).index, value.clone()))
            .collect();

        let mut compiler = Compiler::new(self.file_set.clone())
            .with_symbol_table(table)
            .with_modules(self.modules.clone());
        let mut bytecode = compiler.compile(&self.file)?;
        bytecode.remove_duplicates();

        let table = compiler.symbol_table();
        let mut globals = vec![Object::Undefined; table.max_globals()];
        for (idx, value) in host {
            globals[idx] = value;
        }
        let indexes = table
            .globals()
            .into_iter()
            .filter(|s| !s.name.starts_with(':'))
            .map(|s| (s.name, s.index))
            .collect();

        Ok(Compiled {
            bytecode: Rc::new(bytecode),
            globals,
            indexes,
            config: self.config.clone(),
        })
    }

    /// Compile and run once.
    pub fn run(&self) -> Result<Compiled> {
        let mut compiled = self.compile()?;
        compiled.run()?;
        Ok(compiled)
    }
}

/// A compiled script with its global variables.
#[derive(Debug)]
pub struct Compiled {
    bytecode: Rc<Bytecode>,
    globals: Vec<Object>,
    indexes: IndexMap<String, usize>,
    config: VmConfig,
}

impl Clone for Compiled {
    /// Shares the bytecode; globals are deep copies.
    fn clone(&self) -> Self {
        Compiled {
            bytecode: Rc::clone(&self.bytecode),
            globals: self.globals.iter().map(Object::copy).collect(),
            indexes: self.indexes.clone(),
            config: self.config.clone(),
        }
    }
}

impl Compiled {
    pub fn bytecode(&self) -> &Bytecode {
        &self.bytecode
    }

    /// Run against this instance's globals, updating them in place.
    pub fn run(&mut self) -> Result<()> {
        info!(
            globals = self.globals.len(),
            constants = self.bytecode.constants.len(),
            "script run started"
        );
        let globals = std::mem::take(&mut self.globals);
        let mut vm = Vm::with_config(Rc::clone(&self.bytecode), globals, self.config.clone());
        let result = vm.run();
        let steps = vm.steps();
        self.globals = vm.into_globals();

        match &result {
            Ok(()) => info!(steps, "script run finished"),
            Err(err) => info!(steps, error = %err.message, "script run failed"),
        }
        Ok(result?)
    }

    /// Run against a deep copy of the globals and return that copy; this
    /// instance is left untouched.
    pub fn run_protected(&self) -> Result<Compiled> {
        let mut copy = self.clone();
        copy.run()?;
        Ok(copy)
    }

    /// Value of the global `name`; Undefined if it was never assigned.
    pub fn get(&self, name: &str) -> Option<Object> {
        let idx = *self.indexes.get(name)?;
        Some(self.globals.get(idx).cloned().unwrap_or(Object::Undefined))
    }

    pub fn set(&mut self, name: &str, value: impl Into<Object>) -> Result<()> {
        let idx = *self
            .indexes
            .get(name)
            .ok_or_else(|| ScriptError::NotDefined(name.to_string()))?;
        if idx >= self.globals.len() {
            self.globals.resize(idx + 1, Object::Undefined);
        }
        self.globals[idx] = value.into();
        Ok(())
    }

    /// True if `name` is a global holding a value other than Undefined.
    pub fn is_defined(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.is_undefined())
    }

    /// Global names with their current values, in slot order.
    pub fn variables(&self) -> Vec<(String, Object)> {
        let mut vars: Vec<(String, Object, usize)> = self
            .indexes
            .iter()
            .map(|(name, idx)| {
                let value = self.globals.get(*idx).cloned().unwrap_or(Object::Undefined);
                (name.clone(), value, *idx)
            })
            .collect();
        vars.sort_by_key(|(_, _, idx)| *idx);
        vars.into_iter().map(|(name, value, _)| (name, value)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Stmt, Token};
    use crate::objects::{self, ObjectMap};

    fn ident(name: &str) -> Expr {
        Expr::ident(name)
    }

    #[test]
    fn test_host_variables_in_and_out() {
        // b := a * 2; a = a + 1
        let mut script = Script::new(File::new(vec![
            Stmt::define("b", Expr::binary(ident("a"), Token::Mul, Expr::int(2))),
            Stmt::assign_op(ident("a"), Token::AddAssign, Expr::int(1)),
        ]));
        script.add("a", 20i64);

        let compiled = script.run().expect("run");
        assert_eq!(compiled.get("a"), Some(Object::Int(21)));
        assert_eq!(compiled.get("b"), Some(Object::Int(40)));
        assert_eq!(compiled.get("c"), None);
        assert!(compiled.is_defined("b"));
        assert!(!compiled.is_defined("c"));
        assert_eq!(
            compiled.variables(),
            vec![("a".to_string(), Object::Int(21)), ("b".to_string(), Object::Int(40))]
        );
    }

    #[test]
    fn test_set_before_run() {
        let mut script = Script::new(File::new(vec![Stmt::define(
            "out",
            Expr::binary(ident("x"), Token::Add, Expr::int(1)),
        )]));
        script.add("x", 0i64);
        let mut compiled = script.compile().expect("compile");
        compiled.set("x", 41i64).expect("x is a global");
        compiled.run().expect("run");
        assert_eq!(compiled.get("out"), Some(Object::Int(42)));

        let err = compiled.set("nope", 1i64).expect_err("not a global");
        assert_eq!(err.to_string(), "'nope' is not defined");
    }

    #[test]
    fn test_run_protected_leaves_bindings_untouched() {
        // m.n += 1
        let mut script = Script::new(File::new(vec![Stmt::assign_op(
            Expr::selector(ident("m"), "n"),
            Token::AddAssign,
            Expr::int(1),
        )]));
        let mut attrs = ObjectMap::new();
        attrs.insert("n".into(), Object::Int(1));
        script.add("m", Object::map(attrs));

        let compiled = script.compile().expect("compile");
        let first = compiled.run_protected().expect("run");
        let second = compiled.run_protected().expect("run");
        let n = |c: &Compiled| c.get("m").and_then(|m| m.index_get(&Object::string("n")).ok());
        assert_eq!(n(&first), Some(Object::Int(2)));
        assert_eq!(n(&second), Some(Object::Int(2)));
        assert_eq!(n(&compiled), Some(Object::Int(1)));
    }

    #[test]
    fn test_clone_is_independent() {
        let mut script = Script::new(File::new(vec![Stmt::inc(ident("n"))]));
        script.add("n", 0i64);
        let mut a = script.compile().expect("compile");
        let mut b = a.clone();
        a.run().expect("run");
        a.run().expect("run");
        b.run().expect("run");
        assert_eq!(a.get("n"), Some(Object::Int(2)));
        assert_eq!(b.get("n"), Some(Object::Int(1)));
    }

    #[test]
    fn test_user_function() {
        let mut script = Script::new(File::new(vec![
            Stmt::define("ok", Expr::call(ident("twice"), vec![Expr::int(21)])),
            Stmt::define("bad", Expr::call(ident("twice"), vec![Expr::str("x")])),
        ]));
        script.add(
            "twice",
            Object::user_function("twice", |args| match args {
                [Object::Int(v)] => Ok(Object::Int(v * 2)),
                [other] => Err(objects::Error::invalid_argument_type("first", "int", other.type_name())),
                _ => Err(objects::Error::WrongNumArguments),
            }),
        );
        let compiled = script.run().expect("run");
        assert_eq!(compiled.get("ok"), Some(Object::Int(42)));
        let bad = compiled.get("bad").expect("bad is a global");
        assert!(matches!(bad, Object::Error(_)));
        assert_eq!(
            bad.index_get(&Object::string("value")).ok(),
            Some(Object::string("invalid type for argument 'first': expected int, found string"))
        );
    }

    #[test]
    fn test_errors_are_reported() {
        let script = Script::new(File::new(vec![Stmt::expr(ident("missing"))]));
        match script.compile() {
            Err(ScriptError::Compile(errs)) => {
                assert!(errs.to_string().contains("unresolved reference 'missing'"))
            }
            other => panic!("expected a compile error, got {:?}", other.map(|_| ())),
        }

        let script = Script::new(File::new(vec![Stmt::define(
            "x",
            Expr::binary(Expr::int(1), Token::Quo, Expr::int(0)),
        )]));
        match script.run() {
            Err(ScriptError::Runtime(err)) => assert_eq!(err.message, "division by zero"),
            other => panic!("expected a runtime error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_step_budget_from_config() {
        let mut script = Script::new(File::new(vec![Stmt::for_(None, None, None, vec![])]));
        script.set_config(VmConfig {
            max_steps: Some(100),
            ..VmConfig::default()
        });
        let err = script.run().expect_err("endless loop");
        assert!(err.to_string().contains("execution step limit exceeded (100)"));
    }
}
