use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tracing::debug;

use crate::{
    ast::{Block, Expr, ExprKind, File, FuncLit, Stmt, StmtKind, Token},
    bytecode::{
        Bytecode, CompiledFunction, Opcode,
        op::{make_instruction, max_operand, patch_u16},
    },
    compiler::{
        compile_error::{CompileError, ErrorList},
        modules::{Module, ModuleMap},
        symbol_table::{Symbol, SymbolScope, SymbolTable},
    },
    objects::{MAX_STRING_LEN, Object},
    source::{Pos, SourceFileSet},
};

/// Errors collected before compilation gives up.
pub const MAX_ERRORS: usize = 10;

type Result<T> = std::result::Result<T, CompileError>;

/// Pending jump positions of one loop.
#[derive(Debug, Default)]
struct Loop {
    continues: Vec<usize>,
    breaks: Vec<usize>,
}

/// Output of the function currently being compiled.
#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Vec<u8>,
    source_map: BTreeMap<usize, Pos>,
    loops: Vec<Loop>,
}

/// State to roll back to when a statement fails.
#[derive(Debug, Clone, Copy)]
struct Mark {
    symbols: usize,
    scopes: usize,
    loops: usize,
}

pub struct Compiler {
    file_set: SourceFileSet,
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
    /// Scope index of the main program or module being compiled; `export`
    /// is only valid there.
    unit_base: usize,
    modules: ModuleMap,
    compiled_modules: HashMap<String, Rc<CompiledFunction>>,
    import_stack: Vec<String>,
    errors: Vec<CompileError>,
    aborted: bool,
}

impl Compiler {
    pub fn new(file_set: SourceFileSet) -> Self {
        Self {
            file_set,
            constants: Vec::new(),
            symbol_table: SymbolTable::with_builtins(),
            scopes: vec![CompilationScope::default()],
            unit_base: 0,
            modules: ModuleMap::new(),
            compiled_modules: HashMap::new(),
            import_stack: Vec::new(),
            errors: Vec::new(),
            aborted: false,
        }
    }

    /// Compile against an existing table, e.g. one with host globals
    /// already defined.
    pub fn with_symbol_table(mut self, symbol_table: SymbolTable) -> Self {
        self.symbol_table = symbol_table;
        self
    }

    pub fn with_modules(mut self, modules: ModuleMap) -> Self {
        self.modules = modules;
        self
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    /// Compile a whole file into a program.
    ///
    /// Compilation carries on after a failed statement so one run reports
    /// several errors, up to [`MAX_ERRORS`] + 1. Each call starts with an
    /// empty constant pool and module cache; only the symbol table carries
    /// over, so globals keep their slots across calls.
    pub fn compile(&mut self, file: &File) -> std::result::Result<Bytecode, ErrorList> {
        self.constants.clear();
        self.compiled_modules.clear();
        self.import_stack.clear();
        self.scopes = vec![CompilationScope::default()];
        self.unit_base = 0;
        self.errors.clear();
        self.aborted = false;

        if self.compile_stmts(&file.stmts).is_ok() && self.errors.is_empty() {
            self.emit(Pos::NONE, Opcode::Suspend, &[])?;
        }
        if !self.errors.is_empty() {
            debug!(errors = self.errors.len(), "compilation failed");
            return Err(ErrorList(std::mem::take(&mut self.errors)));
        }

        let main = self.scopes.pop().unwrap_or_default();
        self.scopes.push(CompilationScope::default());
        let mut main_function = CompiledFunction::new(main.instructions);
        main_function.source_map = main.source_map;

        debug!(
            constants = self.constants.len(),
            globals = self.symbol_table.max_globals(),
            bytes = main_function.instructions.len(),
            "compiled program"
        );

        Ok(Bytecode {
            file_set: self.file_set.clone(),
            main_function: Rc::new(main_function),
            constants: self.constants.clone(),
        })
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Compile statements in order. Returns true once one of them leaves
    /// the block unconditionally; anything after it is unreachable and not
    /// compiled.
    fn compile_stmts(&mut self, stmts: &[Stmt]) -> Result<bool> {
        for stmt in stmts {
            let mark = self.mark();
            match self.compile_stmt(stmt) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(err) => self.recover(mark, err)?,
            }
        }
        Ok(false)
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<bool> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit(stmt.pos, Opcode::Pop, &[])?;
                Ok(false)
            }
            StmtKind::Assign { lhs, op, rhs } => {
                self.compile_assign(stmt.pos, lhs, *op, rhs)?;
                Ok(false)
            }
            StmtKind::IncDec { expr, op } => {
                let op = if *op == Token::Inc {
                    Token::AddAssign
                } else {
                    Token::SubAssign
                };
                let one = Expr::int(1).at(stmt.pos);
                self.compile_assign(stmt.pos, std::slice::from_ref(expr), op, &[one])?;
                Ok(false)
            }
            StmtKind::Block(block) => self.compile_block(block),
            StmtKind::If {
                init,
                cond,
                body,
                other,
            } => {
                self.symbol_table.fork(true);
                let result = self.compile_if(stmt.pos, init.as_deref(), cond, body, other.as_deref());
                self.symbol_table.leave();
                result
            }
            StmtKind::For {
                init,
                cond,
                post,
                body,
            } => {
                self.symbol_table.fork(true);
                let result = self.compile_for(stmt.pos, init.as_deref(), cond.as_ref(), post.as_deref(), body);
                self.symbol_table.leave();
                result
            }
            StmtKind::ForIn {
                key,
                value,
                iterable,
                body,
            } => {
                self.symbol_table.fork(true);
                let result = self.compile_for_in(
                    stmt.pos,
                    &key.name,
                    value.as_ref().map(|v| v.name.as_str()),
                    iterable,
                    body,
                );
                self.symbol_table.leave();
                result
            }
            StmtKind::Break => {
                if self.scope().loops.is_empty() {
                    return Err(self.error(stmt.pos, "break not allowed outside loop"));
                }
                let at = self.emit(stmt.pos, Opcode::Jump, &[0])?;
                if let Some(current) = self.scope_mut().loops.last_mut() {
                    current.breaks.push(at);
                }
                Ok(true)
            }
            StmtKind::Continue => {
                if self.scope().loops.is_empty() {
                    return Err(self.error(stmt.pos, "continue not allowed outside loop"));
                }
                let at = self.emit(stmt.pos, Opcode::Jump, &[0])?;
                if let Some(current) = self.scope_mut().loops.last_mut() {
                    current.continues.push(at);
                }
                Ok(true)
            }
            StmtKind::Return(value) => {
                if self.symbol_table.in_global() {
                    return Err(self.error(stmt.pos, "return not allowed outside function"));
                }
                match value {
                    Some(value) => {
                        self.compile_expr(value)?;
                        self.emit(stmt.pos, Opcode::Return, &[1])?;
                    }
                    None => {
                        self.emit(stmt.pos, Opcode::Return, &[0])?;
                    }
                }
                Ok(true)
            }
            StmtKind::Export(value) => {
                if self.scopes.len() - 1 != self.unit_base {
                    return Err(self.error(stmt.pos, "export not allowed inside function"));
                }
                self.compile_expr(value)?;
                self.emit(stmt.pos, Opcode::Immutable, &[])?;
                self.emit(stmt.pos, Opcode::Return, &[1])?;
                Ok(true)
            }
            StmtKind::Empty => Ok(false),
        }
    }

    fn compile_block(&mut self, block: &Block) -> Result<bool> {
        self.symbol_table.fork(true);
        let result = self.compile_stmts(&block.stmts);
        self.symbol_table.leave();
        result
    }

    fn compile_if(
        &mut self,
        pos: Pos,
        init: Option<&Stmt>,
        cond: &Expr,
        body: &Block,
        other: Option<&Stmt>,
    ) -> Result<bool> {
        if let Some(init) = init {
            self.compile_stmt(init)?;
        }
        self.compile_expr(cond)?;
        let jump_falsy = self.emit(pos, Opcode::JumpFalsy, &[0])?;
        let then_exits = self.compile_block(body)?;

        let Some(other) = other else {
            let here = self.ip();
            self.patch_jump(jump_falsy, here, pos)?;
            return Ok(false);
        };

        // no jump over the else branch when the then branch never falls through
        let jump = if then_exits {
            None
        } else {
            Some(self.emit(pos, Opcode::Jump, &[0])?)
        };
        let here = self.ip();
        self.patch_jump(jump_falsy, here, pos)?;

        let else_exits = self.compile_stmt(other)?;
        if let Some(jump) = jump {
            let here = self.ip();
            self.patch_jump(jump, here, pos)?;
        }
        Ok(then_exits && else_exits)
    }

    fn compile_for(
        &mut self,
        pos: Pos,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        post: Option<&Stmt>,
        body: &Block,
    ) -> Result<bool> {
        if let Some(init) = init {
            self.compile_stmt(init)?;
        }

        let pre_cond = self.ip();
        let post_cond = match cond {
            Some(cond) => {
                self.compile_expr(cond)?;
                Some(self.emit(pos, Opcode::JumpFalsy, &[0])?)
            }
            None => None,
        };

        let (body_exits, current) = self.compile_loop_body(body)?;

        let post_body = self.ip();
        if !body_exits || !current.continues.is_empty() {
            if let Some(post) = post {
                self.compile_stmt(post)?;
            }
            self.emit(pos, Opcode::Jump, &[pre_cond])?;
        }

        let post_stmt = self.ip();
        if let Some(post_cond) = post_cond {
            self.patch_jump(post_cond, post_stmt, pos)?;
        }
        self.patch_loop(&current, post_body, post_stmt, pos)?;

        // an endless loop only ends through break
        Ok(cond.is_none() && current.breaks.is_empty())
    }

    /// `for k, v in x { body }` runs like
    ///
    /// ```text
    /// :it := iterator(x)
    /// for :it.next() { k, v := :it.key(), :it.value(); body }
    /// ```
    ///
    /// `:it` can not clash with user names since `:` is not valid in one.
    fn compile_for_in(
        &mut self,
        pos: Pos,
        key: &str,
        value: Option<&str>,
        iterable: &Expr,
        body: &Block,
    ) -> Result<bool> {
        self.compile_expr(iterable)?;
        self.emit(pos, Opcode::IteratorInit, &[])?;
        let iterator = self.symbol_table.define(":it");
        self.emit_define(pos, &iterator)?;

        let pre_cond = self.ip();
        self.emit_load(pos, &iterator)?;
        self.emit(pos, Opcode::IteratorNext, &[])?;
        let post_cond = self.emit(pos, Opcode::JumpFalsy, &[0])?;

        self.scope_mut().loops.push(Loop::default());
        let bound = self.bind_iteration(pos, &iterator, key, value);
        if let Err(err) = bound {
            self.scope_mut().loops.pop();
            return Err(err);
        }
        let body_result = self.compile_block(body);
        let current = self.scope_mut().loops.pop().unwrap_or_default();
        let body_exits = body_result?;

        let post_body = self.ip();
        if !body_exits || !current.continues.is_empty() {
            self.emit(pos, Opcode::Jump, &[pre_cond])?;
        }

        let post_stmt = self.ip();
        self.patch_jump(post_cond, post_stmt, pos)?;
        self.patch_loop(&current, post_body, post_stmt, pos)?;
        Ok(false)
    }

    fn bind_iteration(&mut self, pos: Pos, iterator: &Symbol, key: &str, value: Option<&str>) -> Result<()> {
        if key != "_" {
            let symbol = self.symbol_table.define(key);
            self.emit_load(pos, iterator)?;
            self.emit(pos, Opcode::IteratorKey, &[])?;
            self.emit_define(pos, &symbol)?;
        }
        if let Some(value) = value.filter(|v| *v != "_") {
            let symbol = self.symbol_table.define(value);
            self.emit_load(pos, iterator)?;
            self.emit(pos, Opcode::IteratorValue, &[])?;
            self.emit_define(pos, &symbol)?;
        }
        Ok(())
    }

    fn compile_loop_body(&mut self, body: &Block) -> Result<(bool, Loop)> {
        self.scope_mut().loops.push(Loop::default());
        let result = self.compile_block(body);
        let current = self.scope_mut().loops.pop().unwrap_or_default();
        Ok((result?, current))
    }

    fn patch_loop(&mut self, current: &Loop, post_body: usize, post_stmt: usize, pos: Pos) -> Result<()> {
        for at in &current.breaks {
            self.patch_jump(*at, post_stmt, pos)?;
        }
        for at in &current.continues {
            self.patch_jump(*at, post_body, pos)?;
        }
        Ok(())
    }

    fn compile_assign(&mut self, pos: Pos, lhs: &[Expr], op: Token, rhs: &[Expr]) -> Result<()> {
        let ([target], [value]) = (lhs, rhs) else {
            return Err(self.error(pos, "tuple assignment not allowed"));
        };
        let Some((name, selectors)) = assign_target(target) else {
            return Err(self.error(pos, "invalid assignment target"));
        };
        if op == Token::Define && !selectors.is_empty() {
            return Err(self.error(pos, "operator ':=' not allowed with selector"));
        }

        let existing = if op == Token::Define {
            let shadowable = self
                .symbol_table
                .resolve_local(name)
                .is_none_or(|s| matches!(s.scope, SymbolScope::Builtin | SymbolScope::Function));
            if !shadowable {
                return Err(CompileError::redeclared(name, self.position(pos)));
            }
            None
        } else {
            match self.symbol_table.resolve(name) {
                None => return Err(CompileError::unresolved(name, self.position(pos))),
                Some((symbol, _)) if symbol.scope == SymbolScope::Builtin => {
                    return Err(self.error(pos, format!("cannot assign to builtin function '{}'", name)));
                }
                Some((symbol, _)) if symbol.scope == SymbolScope::Function => {
                    return Err(self.error(pos, format!("cannot assign to '{}' inside its own body", name)));
                }
                Some((symbol, _)) => Some(symbol),
            }
        };

        let binary = op.assign_operator();
        if binary.is_some() {
            self.compile_expr(target)?;
        }

        let self_name = (op == Token::Define).then_some(name);
        self.compile_value(value, self_name)?;

        let symbol = match existing {
            Some(symbol) => symbol,
            None => self.symbol_table.define(name),
        };

        if let Some(binary) = binary {
            self.emit(pos, Opcode::BinaryOp, &[binary.code() as usize])?;
        }

        for selector in selectors.iter().rev() {
            self.compile_expr(selector)?;
        }

        let num_sel = selectors.len();
        match (symbol.scope, num_sel) {
            (SymbolScope::Global, 0) => self.emit(pos, Opcode::SetGlobal, &[symbol.index])?,
            (SymbolScope::Global, n) => self.emit(pos, Opcode::SetSelGlobal, &[symbol.index, n])?,
            (SymbolScope::Local, 0) if op == Token::Define => {
                self.emit(pos, Opcode::DefineLocal, &[symbol.index])?
            }
            (SymbolScope::Local, 0) => self.emit(pos, Opcode::SetLocal, &[symbol.index])?,
            (SymbolScope::Local, n) => self.emit(pos, Opcode::SetSelLocal, &[symbol.index, n])?,
            (SymbolScope::Free, 0) => self.emit(pos, Opcode::SetFree, &[symbol.index])?,
            (SymbolScope::Free, n) => self.emit(pos, Opcode::SetSelFree, &[symbol.index, n])?,
            (scope, _) => {
                return Err(self.error(pos, format!("invalid assignment variable scope: {}", scope)));
            }
        };
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Compile the right-hand side of an assignment. A function literal
    /// bound with `:=` can refer to itself by `self_name`.
    fn compile_value(&mut self, expr: &Expr, self_name: Option<&str>) -> Result<()> {
        match &expr.kind {
            ExprKind::Func(lit) => self.compile_func_lit(expr.pos, lit, self_name),
            _ => self.compile_expr(expr),
        }
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<()> {
        let pos = expr.pos;
        match &expr.kind {
            ExprKind::Ident(name) => {
                let Some((symbol, _)) = self.symbol_table.resolve(name) else {
                    return Err(CompileError::unresolved(name, self.position(pos)));
                };
                self.emit_load(pos, &symbol)?;
            }
            ExprKind::Int(v) => self.emit_constant(pos, Object::Int(*v))?,
            ExprKind::Float(v) => self.emit_constant(pos, Object::Float(*v))?,
            ExprKind::Char(v) => self.emit_constant(pos, Object::Char(*v))?,
            ExprKind::Str(v) => {
                if v.len() > MAX_STRING_LEN {
                    return Err(self.error(pos, "string length exceeds the limit"));
                }
                self.emit_constant(pos, Object::string(v.as_str()))?;
            }
            ExprKind::Bool(true) => {
                self.emit(pos, Opcode::True, &[])?;
            }
            ExprKind::Bool(false) => {
                self.emit(pos, Opcode::False, &[])?;
            }
            ExprKind::Undefined => {
                self.emit(pos, Opcode::Null, &[])?;
            }
            ExprKind::Array(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit(pos, Opcode::Array, &[items.len()])?;
            }
            ExprKind::Map(entries) => {
                for (key, value) in entries {
                    self.emit_constant(pos, Object::string(key.as_str()))?;
                    self.compile_expr(value)?;
                }
                self.emit(pos, Opcode::Map, &[entries.len() * 2])?;
            }
            ExprKind::Binary { op, lhs, rhs } => self.compile_binary(pos, *op, lhs, rhs)?,
            ExprKind::Unary { op, expr: operand } => {
                self.compile_expr(operand)?;
                match op {
                    Token::Not => {
                        self.emit(pos, Opcode::LNot, &[])?;
                    }
                    Token::Sub => {
                        self.emit(pos, Opcode::Minus, &[])?;
                    }
                    Token::Xor => {
                        self.emit(pos, Opcode::BComplement, &[])?;
                    }
                    Token::Add => {}
                    other => {
                        return Err(self.error(pos, format!("invalid unary operator: {}", other)));
                    }
                }
            }
            ExprKind::Cond { cond, then, other } => {
                self.compile_expr(cond)?;
                let jump_falsy = self.emit(pos, Opcode::JumpFalsy, &[0])?;
                self.compile_expr(then)?;
                let jump = self.emit(pos, Opcode::Jump, &[0])?;
                let here = self.ip();
                self.patch_jump(jump_falsy, here, pos)?;
                self.compile_expr(other)?;
                let here = self.ip();
                self.patch_jump(jump, here, pos)?;
            }
            ExprKind::Index { expr: target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.emit(pos, Opcode::Index, &[])?;
            }
            ExprKind::Slice { expr: target, low, high } => {
                self.compile_expr(target)?;
                for bound in [low, high] {
                    match bound {
                        Some(bound) => self.compile_expr(bound)?,
                        None => {
                            self.emit(pos, Opcode::Null, &[])?;
                        }
                    }
                }
                self.emit(pos, Opcode::SliceIndex, &[])?;
            }
            ExprKind::Selector { expr: target, name } => {
                self.compile_expr(target)?;
                self.emit_constant(pos, Object::string(name.as_str()))?;
                self.emit(pos, Opcode::Index, &[])?;
            }
            ExprKind::Call { func, args, ellipsis } => {
                self.compile_expr(func)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(pos, Opcode::Call, &[args.len(), usize::from(*ellipsis)])?;
            }
            ExprKind::Func(lit) => self.compile_func_lit(pos, lit, None)?,
            ExprKind::Import(name) => self.compile_import(pos, name)?,
            ExprKind::Error(inner) => {
                self.compile_expr(inner)?;
                self.emit(pos, Opcode::Error, &[])?;
            }
            ExprKind::Immutable(inner) => {
                self.compile_expr(inner)?;
                self.emit(pos, Opcode::Immutable, &[])?;
            }
        }
        Ok(())
    }

    fn compile_binary(&mut self, pos: Pos, op: Token, lhs: &Expr, rhs: &Expr) -> Result<()> {
        match op {
            Token::LAnd | Token::LOr => {
                self.compile_expr(lhs)?;
                let jump_op = if op == Token::LAnd {
                    Opcode::AndJump
                } else {
                    Opcode::OrJump
                };
                let jump = self.emit(pos, jump_op, &[0])?;
                self.compile_expr(rhs)?;
                let here = self.ip();
                self.patch_jump(jump, here, pos)?;
            }
            // `a < b` is `b > a`
            Token::Less | Token::LessEq => {
                self.compile_expr(rhs)?;
                self.compile_expr(lhs)?;
                let swapped = if op == Token::Less {
                    Token::Greater
                } else {
                    Token::GreaterEq
                };
                self.emit(pos, Opcode::BinaryOp, &[swapped.code() as usize])?;
            }
            Token::Equal | Token::NotEqual => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                let cmp = if op == Token::Equal {
                    Opcode::Equal
                } else {
                    Opcode::NotEqual
                };
                self.emit(pos, cmp, &[])?;
            }
            Token::Add
            | Token::Sub
            | Token::Mul
            | Token::Quo
            | Token::Rem
            | Token::And
            | Token::Or
            | Token::Xor
            | Token::Shl
            | Token::Shr
            | Token::AndNot
            | Token::Greater
            | Token::GreaterEq => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.emit(pos, Opcode::BinaryOp, &[op.code() as usize])?;
            }
            other => {
                return Err(self.error(pos, format!("invalid binary operator: {}", other)));
            }
        }
        Ok(())
    }

    fn compile_func_lit(&mut self, pos: Pos, lit: &FuncLit, self_name: Option<&str>) -> Result<()> {
        if lit.params.len() > max_operand(1) {
            return Err(CompileError::limit("parameters", max_operand(1), self.position(pos)));
        }
        if lit.variadic && lit.params.is_empty() {
            return Err(self.error(pos, "variadic function needs a parameter"));
        }

        self.scopes.push(CompilationScope::default());
        self.symbol_table.fork(false);

        for param in &lit.params {
            if self.symbol_table.resolve_local(&param.name).is_some() {
                return Err(CompileError::redeclared(&param.name, self.position(param.pos)));
            }
            self.symbol_table.define(&param.name);
        }
        if let Some(name) = self_name {
            if self.symbol_table.resolve_local(name).is_none() {
                self.symbol_table.define_function(name);
            }
        }

        if !self.compile_block(&lit.body)? {
            self.emit(Pos::NONE, Opcode::Return, &[0])?;
        }

        let summary = self.symbol_table.leave();
        let scope = self.scopes.pop().unwrap_or_default();
        if scope.instructions.len() > max_operand(2) {
            return Err(CompileError::limit("instruction bytes", max_operand(2), self.position(pos)));
        }

        let func = CompiledFunction {
            instructions: scope.instructions,
            num_locals: summary.num_locals,
            num_parameters: lit.params.len(),
            variadic: lit.variadic,
            free_symbols: summary.free_symbols.iter().map(|s| s.name.clone()).collect(),
            source_map: scope.source_map,
        };
        debug!(
            name = self_name.unwrap_or("<anonymous>"),
            locals = func.num_locals,
            free = func.free_symbols.len(),
            bytes = func.instructions.len(),
            "compiled function"
        );
        let idx = self.add_constant(Object::CompiledFunction(Rc::new(func)));

        if summary.free_symbols.is_empty() {
            self.emit(pos, Opcode::Constant, &[idx])?;
            return Ok(());
        }

        for symbol in &summary.free_symbols {
            match symbol.scope {
                SymbolScope::Local => self.emit(pos, Opcode::GetLocalPtr, &[symbol.index])?,
                SymbolScope::Free => self.emit(pos, Opcode::GetFreePtr, &[symbol.index])?,
                SymbolScope::Function => self.emit(pos, Opcode::CurrentFuncPtr, &[])?,
                scope => {
                    return Err(self.error(pos, format!("cannot capture {} variable '{}'", scope, symbol.name)));
                }
            };
        }
        self.emit(pos, Opcode::Closure, &[idx, summary.free_symbols.len()])?;
        Ok(())
    }

    fn compile_import(&mut self, pos: Pos, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(self.error(pos, "empty module name"));
        }
        match self.modules.get(name).cloned() {
            None => Err(CompileError::module_not_found(name, self.position(pos))),
            Some(Module::Builtin(attrs)) => {
                self.emit_constant(pos, Module::builtin_value(&attrs))?;
                Ok(())
            }
            Some(Module::Source(file)) => {
                let func = self.compile_module(pos, name, &file)?;
                self.emit_constant(pos, Object::CompiledFunction(func))?;
                self.emit(pos, Opcode::Call, &[0, 0])?;
                Ok(())
            }
        }
    }

    /// Compile a source module into a function of no arguments. Its top
    /// level gets locals instead of globals, with only the builtins in view.
    fn compile_module(&mut self, pos: Pos, name: &str, file: &File) -> Result<Rc<CompiledFunction>> {
        if self.import_stack.iter().any(|m| m == name) {
            return Err(CompileError::cyclic_import(name, self.position(pos)));
        }
        if let Some(func) = self.compiled_modules.get(name) {
            return Ok(func.clone());
        }

        let mut table = SymbolTable::new();
        for builtin in self.symbol_table.builtin_symbols() {
            table.define_builtin(builtin.index, &builtin.name);
        }
        table.fork(false);

        let outer_table = std::mem::replace(&mut self.symbol_table, table);
        let outer_base = self.unit_base;
        self.scopes.push(CompilationScope::default());
        self.unit_base = self.scopes.len() - 1;
        self.import_stack.push(name.to_string());
        let errors_before = self.errors.len();

        let result = self.compile_stmts(&file.stmts).and_then(|exits| {
            if !exits {
                self.emit(Pos::NONE, Opcode::Return, &[0])?;
            }
            Ok(())
        });

        let summary = self.symbol_table.leave();
        self.scopes.truncate(self.unit_base + 1);
        let scope = self.scopes.pop().unwrap_or_default();
        self.import_stack.pop();
        self.unit_base = outer_base;
        self.symbol_table = outer_table;
        result?;

        let mut func = CompiledFunction::new(scope.instructions);
        func.num_locals = summary.num_locals;
        func.source_map = scope.source_map;
        let func = Rc::new(func);
        if self.errors.len() == errors_before {
            self.compiled_modules.insert(name.to_string(), func.clone());
        }
        debug!(module = name, bytes = func.instructions.len(), "compiled module");
        Ok(func)
    }

    // =========================================================================
    // Emitting
    // =========================================================================

    fn scope(&self) -> &CompilationScope {
        &self.scopes[self.scopes.len() - 1]
    }

    fn scope_mut(&mut self) -> &mut CompilationScope {
        let top = self.scopes.len() - 1;
        &mut self.scopes[top]
    }

    fn ip(&self) -> usize {
        self.scope().instructions.len()
    }

    /// Append an instruction and return its offset.
    fn emit(&mut self, pos: Pos, op: Opcode, operands: &[usize]) -> Result<usize> {
        for (idx, (width, operand)) in op.operand_widths().iter().zip(operands).enumerate() {
            let max = max_operand(*width);
            if *operand > max {
                return Err(CompileError::limit(operand_subject(op, idx), max, self.position(pos)));
            }
        }
        let scope = self.scope_mut();
        let at = scope.instructions.len();
        if pos.is_valid() {
            scope.source_map.insert(at, pos);
        }
        scope.instructions.extend(make_instruction(op, operands));
        Ok(at)
    }

    fn patch_jump(&mut self, at: usize, target: usize, pos: Pos) -> Result<()> {
        if target > max_operand(2) {
            return Err(CompileError::limit("instruction bytes", max_operand(2), self.position(pos)));
        }
        patch_u16(&mut self.scope_mut().instructions, at + 1, target);
        Ok(())
    }

    fn add_constant(&mut self, obj: Object) -> usize {
        self.constants.push(obj);
        self.constants.len() - 1
    }

    fn emit_constant(&mut self, pos: Pos, obj: Object) -> Result<()> {
        let idx = self.add_constant(obj);
        self.emit(pos, Opcode::Constant, &[idx])?;
        Ok(())
    }

    fn emit_load(&mut self, pos: Pos, symbol: &Symbol) -> Result<()> {
        match symbol.scope {
            SymbolScope::Global => self.emit(pos, Opcode::GetGlobal, &[symbol.index])?,
            SymbolScope::Local => self.emit(pos, Opcode::GetLocal, &[symbol.index])?,
            SymbolScope::Free => self.emit(pos, Opcode::GetFree, &[symbol.index])?,
            SymbolScope::Builtin => self.emit(pos, Opcode::GetBuiltin, &[symbol.index])?,
            SymbolScope::Function => self.emit(pos, Opcode::CurrentFunc, &[])?,
        };
        Ok(())
    }

    fn emit_define(&mut self, pos: Pos, symbol: &Symbol) -> Result<()> {
        if symbol.scope == SymbolScope::Global {
            self.emit(pos, Opcode::SetGlobal, &[symbol.index])?;
        } else {
            self.emit(pos, Opcode::DefineLocal, &[symbol.index])?;
        }
        Ok(())
    }

    // =========================================================================
    // Errors
    // =========================================================================

    fn position(&self, pos: Pos) -> crate::source::SourceFilePos {
        self.file_set.position(pos)
    }

    fn error(&self, pos: Pos, message: impl Into<String>) -> CompileError {
        CompileError::new(message, self.position(pos))
    }

    fn mark(&self) -> Mark {
        Mark {
            symbols: self.symbol_table.depth(),
            scopes: self.scopes.len(),
            loops: self.scope().loops.len(),
        }
    }

    /// Record a failed statement and roll scope state back so the next one
    /// compiles in a clean context. Fails once the error cap is passed.
    fn recover(&mut self, mark: Mark, err: CompileError) -> Result<()> {
        if self.aborted {
            return Err(err);
        }
        self.symbol_table.truncate(mark.symbols);
        self.scopes.truncate(mark.scopes);
        self.scope_mut().loops.truncate(mark.loops);

        self.errors.push(err.clone());
        if self.errors.len() > MAX_ERRORS {
            self.aborted = true;
            return Err(err);
        }
        Ok(())
    }
}

/// Base name and index expressions of an assignment target such as
/// `a.b[1]`, outermost first.
fn assign_target(expr: &Expr) -> Option<(&str, Vec<Expr>)> {
    match &expr.kind {
        ExprKind::Ident(name) => Some((name.as_str(), Vec::new())),
        ExprKind::Index { expr: inner, index } => {
            let (name, mut selectors) = assign_target(inner)?;
            selectors.push(index.as_ref().clone());
            Some((name, selectors))
        }
        ExprKind::Selector { expr: inner, name: sel } => {
            let (name, mut selectors) = assign_target(inner)?;
            selectors.push(Expr::str(sel.as_str()).at(expr.pos));
            Some((name, selectors))
        }
        _ => None,
    }
}

fn operand_subject(op: Opcode, operand: usize) -> &'static str {
    match (op, operand) {
        (Opcode::Constant, _) | (Opcode::Closure, 0) => "constants",
        (Opcode::Closure, _) => "free variables",
        (Opcode::GetGlobal | Opcode::SetGlobal | Opcode::SetSelGlobal, 0) => "global variables",
        (Opcode::GetLocal | Opcode::SetLocal | Opcode::DefineLocal | Opcode::GetLocalPtr, _)
        | (Opcode::SetSelLocal, 0) => "local variables",
        (Opcode::GetFree | Opcode::SetFree | Opcode::GetFreePtr, _) | (Opcode::SetSelFree, 0) => {
            "free variables"
        }
        (Opcode::SetSelGlobal | Opcode::SetSelLocal | Opcode::SetSelFree, _) => "selectors",
        (Opcode::Call, _) => "arguments",
        (Opcode::Array | Opcode::Map, _) => "elements",
        (op, _) if op.is_jump() => "instruction bytes",
        _ => "operands",
    }
}
