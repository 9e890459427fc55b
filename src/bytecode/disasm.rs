use crate::ast::Token;
use crate::bytecode::op::{Opcode, read_operands};
use crate::bytecode::{Bytecode, CompiledFunction};
use crate::objects::Object;
use std::collections::BTreeSet;

/// Print disassembly of a whole program: main first, then every function
/// in the constant pool.
pub fn print_bytecode(bc: &Bytecode) {
    println!("=== BYTECODE PROGRAM ===\n");

    print_function("main", &bc.main_function, &bc.constants);

    for (idx, constant) in bc.constants.iter().enumerate() {
        if let Object::CompiledFunction(f) = constant {
            print_function(&format!("const[{}]", idx), f, &bc.constants);
        }
    }

    println!("=== CONSTANTS ===\n");
    for line in bc.format_constants() {
        println!("{}", line);
    }
}

fn print_function(name: &str, func: &CompiledFunction, constants: &[Object]) {
    println!("════════════════════════════════════════");
    println!(" {}", name);
    println!(
        " {} bytes, {} locals, {} params{}",
        func.instructions.len(),
        func.num_locals,
        func.num_parameters,
        if func.variadic { " (variadic)" } else { "" }
    );
    if !func.free_symbols.is_empty() {
        println!(" free: {}", func.free_symbols.join(", "));
    }
    println!("════════════════════════════════════════");
    disassemble(&func.instructions, constants);
    println!();
}

/// Disassemble one instruction stream with jump-target markers and
/// resolved constants.
pub fn disassemble(ins: &[u8], constants: &[Object]) {
    let jump_targets = collect_jump_targets(ins);

    for (ip, op, operands) in decode(ins) {
        if jump_targets.contains(&ip) {
            println!("      ┌──────────────────────────────────");
        }
        let marker = if jump_targets.contains(&ip) { "► " } else { "  " };
        println!("{:04} {}{}", ip, marker, describe(op, &operands, constants));
    }
}

fn describe(op: Opcode, operands: &[usize], constants: &[Object]) -> String {
    let base = format_line(op, operands);
    match op {
        Opcode::Constant | Opcode::Closure => match constants.get(operands[0]) {
            Some(Object::CompiledFunction(_)) => format!("{:<20} ; <fn const[{}]>", base, operands[0]),
            Some(c) => format!("{:<20} ; {}", base, c),
            None => format!("{:<20} ; <missing>", base),
        },
        Opcode::BinaryOp => match Token::from_code(operands[0] as u8) {
            Some(tok) => format!("{:<20} ; {}", base, tok),
            None => base,
        },
        op if op.is_jump() => format!("{:<20} ; → {:04}", base, operands[0]),
        _ => base,
    }
}

fn collect_jump_targets(ins: &[u8]) -> BTreeSet<usize> {
    decode(ins)
        .into_iter()
        .filter(|(_, op, _)| op.is_jump())
        .map(|(_, _, operands)| operands[0])
        .collect()
}

/// Split an instruction stream into `(offset, opcode, operands)`. Stops at
/// the first unknown opcode byte.
pub fn decode(ins: &[u8]) -> Vec<(usize, Opcode, Vec<usize>)> {
    let mut out = Vec::new();
    let mut ip = 0;
    while ip < ins.len() {
        let Some(op) = Opcode::from_byte(ins[ip]) else {
            break;
        };
        let (operands, read) = read_operands(op.operand_widths(), &ins[ip + 1..]);
        out.push((ip, op, operands));
        ip += 1 + read;
    }
    out
}

fn format_line(op: Opcode, operands: &[usize]) -> String {
    let mut line = format!("{:<7}", op.name());
    for operand in operands {
        line.push_str(&format!(" {:<5}", operand));
    }
    line.trim_end().to_string()
}

/// One line per instruction, e.g. `0000 CONST   1`. `pos_offset` is added
/// to every printed offset.
pub fn format_instructions(ins: &[u8], pos_offset: usize) -> Vec<String> {
    decode(ins)
        .into_iter()
        .map(|(ip, op, operands)| format!("{:04} {}", pos_offset + ip, format_line(op, &operands)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::make_instruction;

    #[test]
    fn test_format_instructions() {
        let ins = [
            make_instruction(Opcode::Constant, &[1]),
            make_instruction(Opcode::BinaryOp, &[11]),
            make_instruction(Opcode::GetLocal, &[1]),
            make_instruction(Opcode::Closure, &[2, 1]),
            make_instruction(Opcode::Pop, &[]),
        ]
        .concat();
        assert_eq!(
            format_instructions(&ins, 0),
            vec![
                "0000 CONST   1",
                "0003 BINARYOP 11",
                "0005 GETL    1",
                "0007 CLOSURE 2     1",
                "0011 POP",
            ]
        );
    }

    #[test]
    fn test_format_instructions_with_offset() {
        let ins = make_instruction(Opcode::Constant, &[65535]);
        assert_eq!(format_instructions(&ins, 10), vec!["0010 CONST   65535"]);
    }

    #[test]
    fn test_jump_targets() {
        let ins = [
            make_instruction(Opcode::True, &[]),
            make_instruction(Opcode::JumpFalsy, &[7]),
            make_instruction(Opcode::Jump, &[8]),
            make_instruction(Opcode::Null, &[]),
            make_instruction(Opcode::Suspend, &[]),
        ]
        .concat();
        let targets: Vec<usize> = collect_jump_targets(&ins).into_iter().collect();
        assert_eq!(targets, vec![7, 8]);
    }
}
