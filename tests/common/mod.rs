//! Helpers shared by the integration tests.

#![allow(dead_code)]

use cinder::ast::{Expr, File, Stmt, Token};
use cinder::compiler::ModuleMap;
use cinder::{Compiled, Object, Script, ScriptError};

pub fn ident(name: &str) -> Expr {
    Expr::ident(name)
}

pub fn int(v: i64) -> Expr {
    Expr::int(v)
}

pub fn bin(lhs: Expr, op: Token, rhs: Expr) -> Expr {
    Expr::binary(lhs, op, rhs)
}

pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::call(ident(name), args)
}

pub fn ret(value: Expr) -> Stmt {
    Stmt::ret(Some(value))
}

/// Compile and run `stmts` with an `out` host variable.
pub fn run_script(stmts: Vec<Stmt>, modules: ModuleMap) -> Result<Compiled, ScriptError> {
    let mut script = Script::new(File::new(stmts));
    script.add("out", Object::Undefined);
    script.set_modules(modules);
    script.run()
}

/// Value of `out` after running `stmts`.
pub fn eval_out(stmts: Vec<Stmt>) -> Object {
    eval_out_with(stmts, ModuleMap::new())
}

pub fn eval_out_with(stmts: Vec<Stmt>, modules: ModuleMap) -> Object {
    let compiled = run_script(stmts, modules).unwrap_or_else(|e| panic!("script failed: {}", e));
    compiled.get("out").unwrap_or(Object::Undefined)
}

/// `out = <expr>`
pub fn out(value: Expr) -> Stmt {
    Stmt::assign(ident("out"), value)
}

pub fn ints(items: &[i64]) -> Object {
    Object::array(items.iter().map(|v| Object::Int(*v)).collect())
}
