use crate::ast::Token;
use crate::bytecode::op::{read_u8, read_u16};
use crate::bytecode::{Bytecode, CompiledFunction, Opcode};
use crate::objects::{self, BUILTINS, Closure, FreeCell, Object, ObjectMap};
use crate::runtime::runtime_error::{
    RuntimeError, invalid_operation, stack_overflow, stack_underflow, wrong_num_arguments,
};
use crate::source::SourceFilePos;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{trace, warn};

type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    pub max_call_depth: usize,
    /// Operand stack slots.
    pub max_stack_size: usize,
    /// Instructions a run may execute.
    pub max_steps: Option<usize>,
    /// Objects a run may create.
    pub max_allocs: Option<i64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 1024,
            max_stack_size: 2048,
            max_steps: None,
            max_allocs: None,
        }
    }
}

/// A local variable slot. Becomes a shared cell once a closure captures it.
#[derive(Debug)]
enum Slot {
    Value(Object),
    Cell(FreeCell),
}

impl Slot {
    fn get(&self) -> Object {
        match self {
            Slot::Value(v) => v.clone(),
            Slot::Cell(cell) => cell.borrow().clone(),
        }
    }

    fn set(&mut self, value: Object) {
        match self {
            Slot::Value(v) => *v = value,
            Slot::Cell(cell) => *cell.borrow_mut() = value,
        }
    }

    fn share(&mut self) -> FreeCell {
        match self {
            Slot::Cell(cell) => Rc::clone(cell),
            Slot::Value(v) => {
                let cell = Rc::new(RefCell::new(std::mem::replace(v, Object::Undefined)));
                *self = Slot::Cell(Rc::clone(&cell));
                cell
            }
        }
    }
}

#[derive(Debug)]
struct Frame {
    func: Rc<CompiledFunction>,
    closure: Option<Rc<Closure>>,
    /// Next instruction.
    ip: usize,
    /// Instruction being executed.
    cur: usize,
    locals_base: usize,
    /// Operand stack height below the callee.
    stack_base: usize,
}

impl Frame {
    fn new(func: Rc<CompiledFunction>, closure: Option<Rc<Closure>>, locals_base: usize, stack_base: usize) -> Self {
        Frame {
            func,
            closure,
            ip: 0,
            cur: 0,
            locals_base,
            stack_base,
        }
    }

    fn callee(&self) -> Object {
        match &self.closure {
            Some(closure) => Object::Closure(Rc::clone(closure)),
            None => Object::CompiledFunction(Rc::clone(&self.func)),
        }
    }
}

/// Executes one compiled program against a set of global slots.
pub struct Vm {
    bytecode: Rc<Bytecode>,
    globals: Vec<Object>,
    stack: Vec<Object>,
    locals: Vec<Slot>,
    /// Cells taken by the `*Ptr` opcodes, waiting for `Closure`.
    captures: Vec<FreeCell>,
    frames: Vec<Frame>,
    config: VmConfig,
    steps: usize,
    allocs: Option<i64>,
}

impl Vm {
    pub fn new(bytecode: Rc<Bytecode>, globals: Vec<Object>) -> Self {
        Self::with_config(bytecode, globals, VmConfig::default())
    }

    pub fn with_config(bytecode: Rc<Bytecode>, globals: Vec<Object>, config: VmConfig) -> Self {
        Vm {
            bytecode,
            globals,
            stack: Vec::new(),
            locals: Vec::new(),
            captures: Vec::new(),
            frames: Vec::new(),
            config,
            steps: 0,
            allocs: None,
        }
    }

    pub fn globals(&self) -> &[Object] {
        &self.globals
    }

    pub fn into_globals(self) -> Vec<Object> {
        self.globals
    }

    /// Operand stack height; zero after every completed run.
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    fn reset_execution_state(&mut self) {
        self.steps = 0;
        self.allocs = self.config.max_allocs;
        self.stack.clear();
        self.locals.clear();
        self.captures.clear();
        self.frames.clear();
    }

    /// Run the program from its first instruction until `Suspend`.
    pub fn run(&mut self) -> Result<()> {
        self.reset_execution_state();
        let main = Rc::clone(&self.bytecode.main_function);
        self.frames.push(Frame::new(main, None, 0, 0));

        let result = self.execute().map_err(|err| self.locate(err));

        self.stack.clear();
        self.locals.clear();
        self.captures.clear();
        self.frames.clear();
        result
    }

    // Execution

    fn check_limits(&mut self) -> Result<()> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                warn!(max, "run aborted: step limit");
                return Err(RuntimeError::new(format!(
                    "execution step limit exceeded ({})",
                    max
                )));
            }
        }

        if self.stack.len() > self.config.max_stack_size {
            warn!(max = self.config.max_stack_size, "run aborted: stack size limit");
            return Err(stack_overflow());
        }

        Ok(())
    }

    /// Count one object creation against the allocation budget.
    fn alloc(&mut self) -> Result<()> {
        if let Some(left) = self.allocs.as_mut() {
            *left -= 1;
            if *left < 0 {
                warn!(max = self.config.max_allocs, "run aborted: allocation limit");
                return Err(RuntimeError::new("allocation limit exceeded"));
            }
        }
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        loop {
            self.check_limits()?;

            let Some(frame) = self.frames.last_mut() else {
                return Ok(());
            };
            let func = Rc::clone(&frame.func);
            let ins = func.instructions.as_slice();
            let ip = frame.ip;

            if ip >= ins.len() {
                // a body without a trailing return
                if self.frames.len() == 1 {
                    return Ok(());
                }
                self.return_from(Object::Undefined)?;
                continue;
            }

            let op = Opcode::from_byte(ins[ip])
                .ok_or_else(|| RuntimeError::new(format!("invalid opcode: {}", ins[ip])))?;
            let next = ip + 1 + op.operand_widths().iter().sum::<usize>();
            if next > ins.len() {
                return Err(RuntimeError::new(format!(
                    "truncated instruction: {}",
                    op.name()
                )));
            }
            frame.cur = ip;
            frame.ip = next;

            trace!(
                ip,
                op = op.name(),
                depth = self.frames.len(),
                sp = self.stack.len(),
                "dispatch"
            );

            match op {
                Opcode::Constant => {
                    let idx = read_u16(ins, ip + 1);
                    let obj = self.constant(idx)?;
                    self.push(obj);
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::True => self.push(Object::Bool(true)),
                Opcode::False => self.push(Object::Bool(false)),
                Opcode::Null => self.push(Object::Undefined),

                Opcode::Equal | Opcode::NotEqual => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    let eq = lhs.equals(&rhs);
                    self.push(Object::Bool(if op == Opcode::Equal { eq } else { !eq }));
                }
                Opcode::BinaryOp => {
                    let code = read_u8(ins, ip + 1);
                    let token = u8::try_from(code)
                        .ok()
                        .and_then(Token::from_code)
                        .ok_or_else(|| RuntimeError::new(format!("invalid operator code: {}", code)))?;
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    let res = lhs.binary_op(token, &rhs).map_err(|err| match err {
                        objects::Error::InvalidOperator => {
                            invalid_operation(&lhs.type_name(), token.as_str(), &rhs.type_name())
                        }
                        err => RuntimeError::new(err.to_string()),
                    })?;
                    self.alloc()?;
                    self.push(res);
                }
                Opcode::Minus => {
                    let res = match self.pop()? {
                        Object::Int(v) => Object::Int(v.wrapping_neg()),
                        Object::Float(v) => Object::Float(-v),
                        other => {
                            return Err(RuntimeError::new(format!(
                                "invalid operation: -{}",
                                other.type_name()
                            )));
                        }
                    };
                    self.alloc()?;
                    self.push(res);
                }
                Opcode::BComplement => {
                    let res = match self.pop()? {
                        Object::Int(v) => Object::Int(!v),
                        other => {
                            return Err(RuntimeError::new(format!(
                                "invalid operation: ^{}",
                                other.type_name()
                            )));
                        }
                    };
                    self.alloc()?;
                    self.push(res);
                }
                Opcode::LNot => {
                    let v = self.pop()?;
                    self.push(Object::Bool(v.is_falsy()));
                }

                Opcode::Jump => self.jump(read_u16(ins, ip + 1)),
                Opcode::JumpFalsy => {
                    let cond = self.pop()?;
                    if cond.is_falsy() {
                        self.jump(read_u16(ins, ip + 1));
                    }
                }
                // the operand stays as the result when the jump is taken
                Opcode::AndJump => {
                    if self.peek()?.is_falsy() {
                        self.jump(read_u16(ins, ip + 1));
                    } else {
                        self.pop()?;
                    }
                }
                Opcode::OrJump => {
                    if self.peek()?.is_falsy() {
                        self.pop()?;
                    } else {
                        self.jump(read_u16(ins, ip + 1));
                    }
                }

                Opcode::Array => {
                    let items = self.pop_n(read_u16(ins, ip + 1))?;
                    self.alloc()?;
                    self.push(Object::array(items));
                }
                Opcode::Map => {
                    let items = self.pop_n(read_u16(ins, ip + 1))?;
                    let mut entries = ObjectMap::with_capacity(items.len() / 2);
                    let mut items = items.into_iter();
                    while let (Some(key), Some(value)) = (items.next(), items.next()) {
                        let Object::String(key) = key else {
                            return Err(RuntimeError::new(format!(
                                "invalid map key type: {}",
                                key.type_name()
                            )));
                        };
                        entries.insert(key.to_string(), value);
                    }
                    self.alloc()?;
                    self.push(Object::map(entries));
                }
                Opcode::Error => {
                    let payload = self.pop()?;
                    self.alloc()?;
                    self.push(Object::error(payload));
                }
                Opcode::Immutable => {
                    let value = self.pop()?;
                    if matches!(value, Object::Array(_) | Object::Map(_)) {
                        self.alloc()?;
                    }
                    self.push(value.to_immutable());
                }

                Opcode::Index => {
                    let index = self.pop()?;
                    let target = self.pop()?;
                    let value = target
                        .index_get(&index)
                        .map_err(|err| index_error(err, &target, &index))?;
                    self.push(value);
                }
                Opcode::SliceIndex => {
                    let high = self.pop()?;
                    let low = self.pop()?;
                    let target = self.pop()?;
                    let value = slice(&target, &low, &high)?;
                    self.alloc()?;
                    self.push(value);
                }

                Opcode::Call => {
                    let argc = read_u8(ins, ip + 1);
                    let spread = read_u8(ins, ip + 2) == 1;
                    self.call(argc, spread)?;
                }
                Opcode::Return => {
                    let value = if read_u8(ins, ip + 1) == 1 {
                        self.pop()?
                    } else {
                        Object::Undefined
                    };
                    if self.frames.len() == 1 {
                        return Ok(());
                    }
                    self.return_from(value)?;
                }
                Opcode::Suspend => return Ok(()),

                Opcode::GetGlobal => {
                    let idx = read_u16(ins, ip + 1);
                    let value = self.globals.get(idx).cloned().unwrap_or(Object::Undefined);
                    self.push(value);
                }
                Opcode::SetGlobal => {
                    let value = self.pop()?;
                    self.set_global(read_u16(ins, ip + 1), value);
                }
                Opcode::SetSelGlobal => {
                    let idx = read_u16(ins, ip + 1);
                    let selectors = self.pop_n(read_u8(ins, ip + 3))?;
                    let value = self.pop()?;
                    let dst = self.globals.get(idx).cloned().unwrap_or(Object::Undefined);
                    index_assign(dst, value, &selectors)?;
                }

                Opcode::GetLocal => {
                    let value = self.local(read_u8(ins, ip + 1))?.get();
                    self.push(value);
                }
                Opcode::SetLocal => {
                    let value = self.pop()?;
                    self.local(read_u8(ins, ip + 1))?.set(value);
                }
                // a fresh binding: closures over the previous one keep it
                Opcode::DefineLocal => {
                    let value = self.pop()?;
                    *self.local(read_u8(ins, ip + 1))? = Slot::Value(value);
                }
                Opcode::SetSelLocal => {
                    let idx = read_u8(ins, ip + 1);
                    let selectors = self.pop_n(read_u8(ins, ip + 2))?;
                    let value = self.pop()?;
                    let dst = self.local(idx)?.get();
                    index_assign(dst, value, &selectors)?;
                }
                Opcode::GetLocalPtr => {
                    let cell = self.local(read_u8(ins, ip + 1))?.share();
                    self.captures.push(cell);
                }

                Opcode::GetFree => {
                    let value = self.free(read_u8(ins, ip + 1))?.borrow().clone();
                    self.push(value);
                }
                Opcode::SetFree => {
                    let value = self.pop()?;
                    *self.free(read_u8(ins, ip + 1))?.borrow_mut() = value;
                }
                Opcode::SetSelFree => {
                    let idx = read_u8(ins, ip + 1);
                    let selectors = self.pop_n(read_u8(ins, ip + 2))?;
                    let value = self.pop()?;
                    let dst = self.free(idx)?.borrow().clone();
                    index_assign(dst, value, &selectors)?;
                }
                Opcode::GetFreePtr => {
                    let cell = self.free(read_u8(ins, ip + 1))?;
                    self.captures.push(cell);
                }

                Opcode::GetBuiltin => {
                    let idx = read_u8(ins, ip + 1);
                    let builtin = BUILTINS
                        .get(idx)
                        .copied()
                        .ok_or_else(|| RuntimeError::new(format!("invalid builtin index: {}", idx)))?;
                    self.push(Object::BuiltinFunction(builtin));
                }
                Opcode::Closure => {
                    let idx = read_u16(ins, ip + 1);
                    let num_free = read_u8(ins, ip + 3);
                    let Object::CompiledFunction(func) = self.constant(idx)? else {
                        return Err(RuntimeError::new(format!("not a function: constant {}", idx)));
                    };
                    if self.captures.len() < num_free {
                        return Err(stack_underflow());
                    }
                    let free = self.captures.split_off(self.captures.len() - num_free);
                    self.alloc()?;
                    self.push(Object::Closure(Rc::new(Closure { func, free })));
                }
                Opcode::CurrentFunc => {
                    let callee = self.current_frame()?.callee();
                    self.push(callee);
                }
                Opcode::CurrentFuncPtr => {
                    let callee = self.current_frame()?.callee();
                    self.captures.push(Rc::new(RefCell::new(callee)));
                }

                Opcode::IteratorInit => {
                    let iterable = self.pop()?;
                    let it = iterable.iterate().ok_or_else(|| {
                        RuntimeError::new(format!("not iterable: {}", iterable.type_name()))
                    })?;
                    self.alloc()?;
                    self.push(it);
                }
                Opcode::IteratorNext => {
                    let it = self.pop()?;
                    let more = it
                        .iterator_next()
                        .map_err(|err| RuntimeError::new(err.to_string()))?;
                    self.push(Object::Bool(more));
                }
                Opcode::IteratorKey => {
                    let it = self.pop()?;
                    let key = it
                        .iterator_key()
                        .map_err(|err| RuntimeError::new(err.to_string()))?;
                    self.push(key);
                }
                Opcode::IteratorValue => {
                    let it = self.pop()?;
                    let value = it
                        .iterator_value()
                        .map_err(|err| RuntimeError::new(err.to_string()))?;
                    self.push(value);
                }
            }
        }
    }

    // Calls

    fn call(&mut self, argc: usize, spread: bool) -> Result<()> {
        if self.stack.len() < argc + 1 {
            return Err(stack_underflow());
        }

        let mut argc = argc;
        if spread && argc > 0 {
            let last = self.pop()?;
            let items = match &last {
                Object::Array(_) | Object::ImmutableArray(_) => last.array_items().unwrap_or_default(),
                other => {
                    return Err(RuntimeError::new(format!(
                        "not an array: {}",
                        other.type_name()
                    )));
                }
            };
            argc = argc - 1 + items.len();
            self.stack.extend(items);
        }

        let callee = self
            .stack
            .get(self.stack.len() - argc - 1)
            .cloned()
            .ok_or_else(stack_underflow)?;

        match callee {
            Object::CompiledFunction(func) => self.call_compiled(func, None, argc),
            Object::Closure(closure) => {
                let func = Rc::clone(&closure.func);
                self.call_compiled(func, Some(closure), argc)
            }
            Object::BuiltinFunction(builtin) => self.call_native(argc, |args| (builtin.func)(args)),
            Object::UserFunction(user) => self.call_native(argc, |args| (user.func)(args)),
            other => Err(RuntimeError::new(format!(
                "not callable: {}",
                other.type_name()
            ))),
        }
    }

    fn call_compiled(&mut self, func: Rc<CompiledFunction>, closure: Option<Rc<Closure>>, argc: usize) -> Result<()> {
        let mut argc = argc;
        if func.variadic {
            let fixed = func.num_parameters.saturating_sub(1);
            if argc < fixed {
                return Err(wrong_num_arguments(fixed, true, argc));
            }
            let rest = self.stack.split_off(self.stack.len() - (argc - fixed));
            self.alloc()?;
            self.push(Object::array(rest));
            argc = fixed + 1;
        } else if argc != func.num_parameters {
            return Err(wrong_num_arguments(func.num_parameters, false, argc));
        }

        if self.frames.len() >= self.config.max_call_depth {
            warn!(max = self.config.max_call_depth, "run aborted: call depth limit");
            return Err(RuntimeError::new(format!(
                "stack overflow: call depth limit exceeded ({})",
                self.config.max_call_depth
            )));
        }

        let args = self.stack.split_off(self.stack.len() - argc);
        self.stack.pop();

        let locals_base = self.locals.len();
        let num_locals = func.num_locals.max(argc);
        self.locals.extend(args.into_iter().map(Slot::Value));
        self.locals
            .resize_with(locals_base + num_locals, || Slot::Value(Object::Undefined));

        let stack_base = self.stack.len();
        self.frames.push(Frame::new(func, closure, locals_base, stack_base));
        Ok(())
    }

    /// Native failures come back to the script as error values.
    fn call_native(&mut self, argc: usize, f: impl FnOnce(&[Object]) -> objects::Result<Object>) -> Result<()> {
        let args = self.stack.split_off(self.stack.len() - argc);
        self.stack.pop();
        let ret = match f(&args) {
            Ok(value) => value,
            Err(err) => Object::error_message(err.to_string()),
        };
        self.alloc()?;
        self.push(ret);
        Ok(())
    }

    fn return_from(&mut self, value: Object) -> Result<()> {
        let frame = self.frames.pop().ok_or_else(stack_underflow)?;
        self.stack.truncate(frame.stack_base);
        self.locals.truncate(frame.locals_base);
        self.push(value);
        Ok(())
    }

    // Frame state

    fn current_frame(&self) -> Result<&Frame> {
        self.frames.last().ok_or_else(stack_underflow)
    }

    fn jump(&mut self, target: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.ip = target;
        }
    }

    fn constant(&self, idx: usize) -> Result<Object> {
        self.bytecode
            .constants
            .get(idx)
            .cloned()
            .ok_or_else(|| RuntimeError::new(format!("invalid constant index: {}", idx)))
    }

    fn set_global(&mut self, idx: usize, value: Object) {
        if idx >= self.globals.len() {
            self.globals.resize(idx + 1, Object::Undefined);
        }
        self.globals[idx] = value;
    }

    fn local(&mut self, idx: usize) -> Result<&mut Slot> {
        let base = self.current_frame()?.locals_base;
        self.locals
            .get_mut(base + idx)
            .ok_or_else(|| RuntimeError::new(format!("invalid local index: {}", idx)))
    }

    fn free(&self, idx: usize) -> Result<FreeCell> {
        self.current_frame()?
            .closure
            .as_ref()
            .and_then(|closure| closure.free.get(idx))
            .cloned()
            .ok_or_else(|| RuntimeError::new(format!("invalid free variable index: {}", idx)))
    }

    /// Attach the fault position and the call sites below it.
    fn locate(&self, mut err: RuntimeError) -> RuntimeError {
        if err.pos.is_some() {
            return err;
        }
        let mut frames = self.frames.iter().rev();
        if let Some(top) = frames.next() {
            let pos = self.position(top);
            if pos.is_valid() {
                err.pos = Some(pos);
            }
        }
        for frame in frames {
            let pos = self.position(frame);
            if pos.is_valid() {
                err = err.with_context(pos);
            }
        }
        err
    }

    fn position(&self, frame: &Frame) -> SourceFilePos {
        self.bytecode
            .file_set
            .position(frame.func.source_pos(frame.cur))
    }

    // Stack operations

    fn push(&mut self, value: Object) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Object> {
        self.stack.pop().ok_or_else(stack_underflow)
    }

    fn peek(&self) -> Result<&Object> {
        self.stack.last().ok_or_else(stack_underflow)
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Object>> {
        if self.stack.len() < n {
            return Err(stack_underflow());
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }
}

fn index_error(err: objects::Error, target: &Object, index: &Object) -> RuntimeError {
    match err {
        objects::Error::NotIndexable => {
            RuntimeError::new(format!("not indexable: {}", target.type_name()))
        }
        objects::Error::NotIndexAssignable => {
            RuntimeError::new(format!("not index-assignable: {}", target.type_name()))
        }
        objects::Error::InvalidIndexType => {
            RuntimeError::new(format!("invalid index type: {}", index.type_name()))
        }
        err => RuntimeError::new(err.to_string()),
    }
}

/// `dst[s_{n-1}]...[s_1][s_0] = value`, where `selectors[0]` is the
/// innermost selector.
fn index_assign(dst: Object, value: Object, selectors: &[Object]) -> Result<()> {
    let Some((last, path)) = selectors.split_first() else {
        return Err(RuntimeError::new("missing selector"));
    };
    let mut dst = dst;
    for sel in path.iter().rev() {
        let next = dst.index_get(sel).map_err(|err| index_error(err, &dst, sel))?;
        dst = next;
    }
    dst.index_set(last, value)
        .map_err(|err| index_error(err, &dst, last))
}

fn slice_bound(bound: &Object) -> Result<Option<i64>> {
    match bound {
        Object::Undefined => Ok(None),
        Object::Int(v) => Ok(Some(*v)),
        other => Err(RuntimeError::new(format!(
            "invalid slice index type: {}",
            other.type_name()
        ))),
    }
}

/// Bounds are clamped to the sequence; only an inverted range is an error.
fn slice_range(len: usize, low: Option<i64>, high: Option<i64>) -> Result<(usize, usize)> {
    let len = len as i64;
    let low = low.unwrap_or(0);
    let high = high.unwrap_or(len);
    if low > high {
        return Err(RuntimeError::new(format!(
            "invalid slice index: {} > {}",
            low, high
        )));
    }
    Ok((low.clamp(0, len) as usize, high.clamp(0, len) as usize))
}

fn slice(target: &Object, low: &Object, high: &Object) -> Result<Object> {
    let (low, high) = (slice_bound(low)?, slice_bound(high)?);
    match target {
        Object::Array(items) => {
            let items = items.borrow();
            let (l, h) = slice_range(items.len(), low, high)?;
            Ok(Object::array(items[l..h].to_vec()))
        }
        Object::ImmutableArray(items) => {
            let (l, h) = slice_range(items.len(), low, high)?;
            Ok(Object::array(items[l..h].to_vec()))
        }
        Object::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (l, h) = slice_range(chars.len(), low, high)?;
            Ok(Object::string(chars[l..h].iter().collect::<String>()))
        }
        Object::Bytes(b) => {
            let b = b.borrow();
            let (l, h) = slice_range(b.len(), low, high)?;
            Ok(Object::bytes(b[l..h].to_vec()))
        }
        other => Err(RuntimeError::new(format!(
            "not indexable: {}",
            other.type_name()
        ))),
    }
}
