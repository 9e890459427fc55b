use crate::bytecode::disasm::format_instructions;
use crate::bytecode::op::{Opcode, patch_u16, read_u16};
use crate::objects::Object;
use crate::source::{Pos, SourceFileSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::debug;

/// A single compiled function body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledFunction {
    pub instructions: Vec<u8>,
    pub num_locals: usize,
    pub num_parameters: usize,
    pub variadic: bool,
    /// Names of the captured variables, in capture order.
    pub free_symbols: Vec<String>,
    /// Instruction offset -> source position of the node that emitted it.
    pub source_map: BTreeMap<usize, Pos>,
}

impl CompiledFunction {
    pub fn new(instructions: Vec<u8>) -> Self {
        Self {
            instructions,
            ..Self::default()
        }
    }

    /// Position of the instruction at `ip`, or of the closest instruction
    /// before it that has one.
    pub fn source_pos(&self, ip: usize) -> Pos {
        self.source_map
            .range(..=ip)
            .next_back()
            .map(|(_, pos)| *pos)
            .unwrap_or(Pos::NONE)
    }
}

/// A compiled program.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub file_set: SourceFileSet,
    pub main_function: Rc<CompiledFunction>,
    /// Convention: referenced by index from `Constant` and `Closure`.
    pub constants: Vec<Object>,
}

impl Bytecode {
    /// Number of objects held by the constant pool.
    pub fn count_objects(&self) -> usize {
        self.constants.iter().map(Object::count_objects).sum()
    }

    pub fn format_instructions(&self) -> Vec<String> {
        format_instructions(&self.main_function.instructions, 0)
    }

    pub fn format_constants(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (idx, constant) in self.constants.iter().enumerate() {
            match constant {
                Object::CompiledFunction(f) => {
                    out.push(format!("[{:3}] (compiled-function)", idx));
                    for line in format_instructions(&f.instructions, 0) {
                        out.push(format!("     {}", line));
                    }
                }
                other => out.push(format!("[{:3}] {} ({})", idx, other, other.type_name())),
            }
        }
        out
    }

    /// Merge structurally equal constants and rewrite every `Constant` and
    /// `Closure` operand to the new indices.
    ///
    /// Function constants are only merged when they are the same function;
    /// two identical bodies stay separate.
    pub fn remove_duplicates(&mut self) {
        let before = self.constants.len();
        let mut deduped: Vec<Object> = Vec::with_capacity(before);
        let mut index_map: HashMap<usize, usize> = HashMap::new();
        let mut fns: HashMap<*const CompiledFunction, usize> = HashMap::new();
        let mut ints: HashMap<i64, usize> = HashMap::new();
        let mut floats: HashMap<u64, usize> = HashMap::new();
        let mut chars: HashMap<char, usize> = HashMap::new();
        let mut strings: HashMap<Rc<str>, usize> = HashMap::new();
        let mut bools: HashMap<bool, usize> = HashMap::new();

        for (cur, constant) in self.constants.iter().enumerate() {
            let next = deduped.len();
            let existing = match constant {
                Object::CompiledFunction(f) => *fns.entry(Rc::as_ptr(f)).or_insert(next),
                Object::Int(v) => *ints.entry(*v).or_insert(next),
                Object::Float(v) => *floats.entry(v.to_bits()).or_insert(next),
                Object::Char(v) => *chars.entry(*v).or_insert(next),
                Object::Bool(v) => *bools.entry(*v).or_insert(next),
                Object::String(v) => *strings.entry(v.clone()).or_insert(next),
                Object::ImmutableArray(_) | Object::ImmutableMap(_) => deduped
                    .iter()
                    .position(|d| {
                        matches!(d, Object::ImmutableArray(_) | Object::ImmutableMap(_))
                            && d.equals(constant)
                    })
                    .unwrap_or(next),
                _ => next,
            };
            if existing == next {
                deduped.push(constant.clone());
            }
            index_map.insert(cur, existing);
        }

        // rewrite operands: main, then every function still in the pool
        let main = Rc::make_mut(&mut self.main_function);
        update_const_indexes(&mut main.instructions, &index_map);
        for constant in deduped.iter_mut() {
            if let Object::CompiledFunction(f) = constant {
                let mut func = f.as_ref().clone();
                update_const_indexes(&mut func.instructions, &index_map);
                *f = Rc::new(func);
            }
        }
        self.constants = deduped;

        debug!(before, after = self.constants.len(), "constants deduplicated");
    }
}

fn update_const_indexes(ins: &mut [u8], index_map: &HashMap<usize, usize>) {
    let mut ip = 0;
    while ip < ins.len() {
        let Some(op) = Opcode::from_byte(ins[ip]) else {
            break;
        };
        if matches!(op, Opcode::Constant | Opcode::Closure) {
            let cur = read_u16(ins, ip + 1);
            if let Some(new) = index_map.get(&cur) {
                patch_u16(ins, ip + 1, *new);
            }
        }
        ip += 1 + op.operand_widths().iter().sum::<usize>();
    }
}

fn constant_eq(a: &Object, b: &Object) -> bool {
    if a.type_name() != b.type_name() {
        return false;
    }
    match (a, b) {
        (Object::CompiledFunction(x), Object::CompiledFunction(y)) => x == y,
        (Object::Float(x), Object::Float(y)) => x.to_bits() == y.to_bits(),
        (Object::Error(x), Object::Error(y)) => constant_eq(x, y),
        _ => {
            if let (Some(x), Some(y)) = (a.array_items(), b.array_items()) {
                return x.len() == y.len() && x.iter().zip(&y).all(|(l, r)| constant_eq(l, r));
            }
            if let (Some(x), Some(y)) = (a.map_entries(), b.map_entries()) {
                return x.len() == y.len()
                    && x
                        .iter()
                        .all(|(k, v)| y.get(k).is_some_and(|other| constant_eq(v, other)));
            }
            a.equals(b)
        }
    }
}

/// Structural equality: function constants compare by content, not identity.
impl PartialEq for Bytecode {
    fn eq(&self, other: &Self) -> bool {
        self.file_set == other.file_set
            && self.main_function == other.main_function
            && self.constants.len() == other.constants.len()
            && self
                .constants
                .iter()
                .zip(&other.constants)
                .all(|(a, b)| constant_eq(a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::make_instruction;

    fn concat(parts: &[Vec<u8>]) -> Vec<u8> {
        parts.concat()
    }

    fn func(parts: &[Vec<u8>]) -> Object {
        Object::CompiledFunction(Rc::new(CompiledFunction::new(concat(parts))))
    }

    fn bytecode(main: &[Vec<u8>], constants: Vec<Object>) -> Bytecode {
        Bytecode {
            file_set: SourceFileSet::new(),
            main_function: Rc::new(CompiledFunction::new(concat(main))),
            constants,
        }
    }

    fn fn_instructions(obj: &Object) -> &[u8] {
        match obj {
            Object::CompiledFunction(f) => &f.instructions,
            other => panic!("not a function: {:?}", other),
        }
    }

    #[test]
    fn test_remove_duplicates_merges_simple_constants() {
        let mut bc = bytecode(
            &[
                make_instruction(Opcode::Constant, &[0]),
                make_instruction(Opcode::Constant, &[1]),
                make_instruction(Opcode::Constant, &[2]),
                make_instruction(Opcode::Constant, &[3]),
            ],
            vec![
                Object::Int(1),
                Object::string("foo"),
                Object::Int(1),
                Object::string("foo"),
            ],
        );
        bc.remove_duplicates();
        assert_eq!(bc.constants, vec![Object::Int(1), Object::string("foo")]);
        assert_eq!(
            bc.main_function.instructions,
            concat(&[
                make_instruction(Opcode::Constant, &[0]),
                make_instruction(Opcode::Constant, &[1]),
                make_instruction(Opcode::Constant, &[0]),
                make_instruction(Opcode::Constant, &[1]),
            ])
        );
    }

    #[test]
    fn test_remove_duplicates_rewrites_function_bodies() {
        let body = [
            make_instruction(Opcode::Constant, &[2]),
            make_instruction(Opcode::Return, &[1]),
        ];
        let mut bc = bytecode(
            &[
                make_instruction(Opcode::Constant, &[0]),
                make_instruction(Opcode::Closure, &[1, 0]),
                make_instruction(Opcode::Closure, &[3, 0]),
            ],
            vec![
                Object::Int(7),
                func(&body),
                Object::Int(7),
                // same body, separate function
                func(&body),
            ],
        );
        bc.remove_duplicates();
        assert_eq!(bc.constants.len(), 3);
        assert_eq!(bc.constants[0], Object::Int(7));
        let expected = concat(&[
            make_instruction(Opcode::Constant, &[0]),
            make_instruction(Opcode::Return, &[1]),
        ]);
        assert_eq!(fn_instructions(&bc.constants[1]), expected.as_slice());
        assert_eq!(fn_instructions(&bc.constants[2]), expected.as_slice());
        assert_eq!(
            bc.main_function.instructions,
            concat(&[
                make_instruction(Opcode::Constant, &[0]),
                make_instruction(Opcode::Closure, &[1, 0]),
                make_instruction(Opcode::Closure, &[2, 0]),
            ])
        );
    }

    #[test]
    fn test_remove_duplicates_is_idempotent() {
        let mut bc = bytecode(
            &[
                make_instruction(Opcode::Constant, &[0]),
                make_instruction(Opcode::Constant, &[1]),
                make_instruction(Opcode::Constant, &[2]),
            ],
            vec![Object::Float(1.5), Object::Char('x'), Object::Float(1.5)],
        );
        bc.remove_duplicates();
        let once = bc.clone();
        bc.remove_duplicates();
        assert_eq!(bc, once);
    }

    #[test]
    fn test_count_objects() {
        let bc = bytecode(
            &[],
            vec![
                Object::Int(55),
                Object::Int(66),
                Object::Int(77),
                Object::Int(88),
                func(&[make_instruction(Opcode::Constant, &[3])]),
                func(&[make_instruction(Opcode::Constant, &[2])]),
                func(&[make_instruction(Opcode::Constant, &[1])]),
            ],
        );
        assert_eq!(bc.count_objects(), 7);
    }

    #[test]
    fn test_source_pos_falls_back_to_previous_instruction() {
        let mut f = CompiledFunction::new(vec![0; 10]);
        f.source_map.insert(0, Pos(3));
        f.source_map.insert(5, Pos(9));
        assert_eq!(f.source_pos(4), Pos(3));
        assert_eq!(f.source_pos(7), Pos(9));
    }
}
