use serde::{Deserialize, Serialize};

// =============================================================================
// OPCODE - Bytecode instructions
// =============================================================================

/// One instruction is an opcode byte followed by its operands, each encoded
/// big-endian with the width given by [`Opcode::operand_widths`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // constants and literals
    Constant = 0,
    BComplement,
    Pop,
    True,
    False,

    // comparison and unary
    Equal,
    NotEqual,
    Minus,
    LNot,

    // ==========================================================================
    // Jumps: absolute byte offsets into the current function
    // ==========================================================================
    /// Pop; jump if falsy.
    JumpFalsy,
    /// Jump keeping the value if falsy, otherwise pop and continue.
    AndJump,
    /// Jump keeping the value if truthy, otherwise pop and continue.
    OrJump,
    Jump,

    // containers
    Null,
    Array,
    Map,
    Error,
    Immutable,
    Index,
    SliceIndex,

    // calls
    Call,
    Return,

    // ==========================================================================
    // Variables
    // ==========================================================================
    GetGlobal,
    SetGlobal,
    SetSelGlobal,
    GetLocal,
    SetLocal,
    DefineLocal,
    SetSelLocal,
    GetFreePtr,
    GetFree,
    SetFree,
    GetLocalPtr,
    SetSelFree,
    GetBuiltin,
    Closure,

    // iterators
    IteratorInit,
    IteratorNext,
    IteratorKey,
    IteratorValue,

    BinaryOp,
    Suspend,

    // self reference for recursive function literals
    CurrentFunc,
    CurrentFuncPtr,
}

impl Opcode {
    pub const ALL: [Opcode; 44] = [
        Opcode::Constant,
        Opcode::BComplement,
        Opcode::Pop,
        Opcode::True,
        Opcode::False,
        Opcode::Equal,
        Opcode::NotEqual,
        Opcode::Minus,
        Opcode::LNot,
        Opcode::JumpFalsy,
        Opcode::AndJump,
        Opcode::OrJump,
        Opcode::Jump,
        Opcode::Null,
        Opcode::Array,
        Opcode::Map,
        Opcode::Error,
        Opcode::Immutable,
        Opcode::Index,
        Opcode::SliceIndex,
        Opcode::Call,
        Opcode::Return,
        Opcode::GetGlobal,
        Opcode::SetGlobal,
        Opcode::SetSelGlobal,
        Opcode::GetLocal,
        Opcode::SetLocal,
        Opcode::DefineLocal,
        Opcode::SetSelLocal,
        Opcode::GetFreePtr,
        Opcode::GetFree,
        Opcode::SetFree,
        Opcode::GetLocalPtr,
        Opcode::SetSelFree,
        Opcode::GetBuiltin,
        Opcode::Closure,
        Opcode::IteratorInit,
        Opcode::IteratorNext,
        Opcode::IteratorKey,
        Opcode::IteratorValue,
        Opcode::BinaryOp,
        Opcode::Suspend,
        Opcode::CurrentFunc,
        Opcode::CurrentFuncPtr,
    ];

    pub fn from_byte(b: u8) -> Option<Opcode> {
        Self::ALL.get(b as usize).copied()
    }

    /// Mnemonic used by the disassembler.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Constant => "CONST",
            Opcode::BComplement => "COMPL",
            Opcode::Pop => "POP",
            Opcode::True => "TRUE",
            Opcode::False => "FALSE",
            Opcode::Equal => "EQL",
            Opcode::NotEqual => "NEQ",
            Opcode::Minus => "NEG",
            Opcode::LNot => "NOT",
            Opcode::JumpFalsy => "JMPF",
            Opcode::AndJump => "ANDJMP",
            Opcode::OrJump => "ORJMP",
            Opcode::Jump => "JMP",
            Opcode::Null => "NULL",
            Opcode::Array => "ARR",
            Opcode::Map => "MAP",
            Opcode::Error => "ERROR",
            Opcode::Immutable => "IMMUT",
            Opcode::Index => "INDEX",
            Opcode::SliceIndex => "SLICE",
            Opcode::Call => "CALL",
            Opcode::Return => "RET",
            Opcode::GetGlobal => "GETG",
            Opcode::SetGlobal => "SETG",
            Opcode::SetSelGlobal => "SETSG",
            Opcode::GetLocal => "GETL",
            Opcode::SetLocal => "SETL",
            Opcode::DefineLocal => "DEFL",
            Opcode::SetSelLocal => "SETSL",
            Opcode::GetFreePtr => "GETFP",
            Opcode::GetFree => "GETF",
            Opcode::SetFree => "SETF",
            Opcode::GetLocalPtr => "GETLP",
            Opcode::SetSelFree => "SETSF",
            Opcode::GetBuiltin => "BUILTIN",
            Opcode::Closure => "CLOSURE",
            Opcode::IteratorInit => "ITER",
            Opcode::IteratorNext => "ITNXT",
            Opcode::IteratorKey => "ITKEY",
            Opcode::IteratorValue => "ITVAL",
            Opcode::BinaryOp => "BINARYOP",
            Opcode::Suspend => "SUSPEND",
            Opcode::CurrentFunc => "CURFN",
            Opcode::CurrentFuncPtr => "CURFNP",
        }
    }

    /// Byte width of each operand.
    pub fn operand_widths(self) -> &'static [usize] {
        match self {
            Opcode::Constant
            | Opcode::JumpFalsy
            | Opcode::AndJump
            | Opcode::OrJump
            | Opcode::Jump
            | Opcode::Array
            | Opcode::Map
            | Opcode::GetGlobal
            | Opcode::SetGlobal => &[2],
            Opcode::SetSelGlobal | Opcode::Closure => &[2, 1],
            Opcode::GetLocal
            | Opcode::SetLocal
            | Opcode::DefineLocal
            | Opcode::GetFreePtr
            | Opcode::GetFree
            | Opcode::SetFree
            | Opcode::GetLocalPtr
            | Opcode::GetBuiltin
            | Opcode::Return
            | Opcode::BinaryOp => &[1],
            Opcode::SetSelLocal | Opcode::SetSelFree | Opcode::Call => &[1, 1],
            _ => &[],
        }
    }

    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::JumpFalsy | Opcode::AndJump | Opcode::OrJump | Opcode::Jump
        )
    }
}

/// Largest value an operand of `width` bytes can carry.
pub fn max_operand(width: usize) -> usize {
    match width {
        1 => u8::MAX as usize,
        2 => u16::MAX as usize,
        _ => u32::MAX as usize,
    }
}

/// Encode one instruction. Operands wider than their slot are truncated, so
/// callers check [`max_operand`] first.
pub fn make_instruction(op: Opcode, operands: &[usize]) -> Vec<u8> {
    let widths = op.operand_widths();
    let mut out = Vec::with_capacity(1 + widths.iter().sum::<usize>());
    out.push(op as u8);
    for (width, operand) in widths.iter().zip(operands) {
        write_operand(&mut out, *width, *operand);
    }
    out
}

fn write_operand(out: &mut Vec<u8>, width: usize, value: usize) {
    match width {
        1 => out.push(value as u8),
        2 => out.extend_from_slice(&(value as u16).to_be_bytes()),
        4 => out.extend_from_slice(&(value as u32).to_be_bytes()),
        _ => {}
    }
}

/// Decode the operands of an instruction from `ins` (the bytes right after
/// the opcode). Returns the operands and the number of bytes read.
pub fn read_operands(widths: &[usize], ins: &[u8]) -> (Vec<usize>, usize) {
    let mut operands = Vec::with_capacity(widths.len());
    let mut offset = 0;
    for width in widths {
        operands.push(read_operand(*width, &ins[offset.min(ins.len())..]));
        offset += width;
    }
    (operands, offset)
}

fn read_operand(width: usize, ins: &[u8]) -> usize {
    let byte = |i: usize| ins.get(i).copied().unwrap_or(0) as usize;
    match width {
        1 => byte(0),
        2 => (byte(0) << 8) | byte(1),
        4 => (byte(0) << 24) | (byte(1) << 16) | (byte(2) << 8) | byte(3),
        _ => 0,
    }
}

/// Read a 1-byte operand at `ip`.
#[inline]
pub fn read_u8(ins: &[u8], ip: usize) -> usize {
    ins.get(ip).copied().unwrap_or(0) as usize
}

/// Read a 2-byte operand at `ip`.
#[inline]
pub fn read_u16(ins: &[u8], ip: usize) -> usize {
    (read_u8(ins, ip) << 8) | read_u8(ins, ip + 1)
}

/// Overwrite the 2-byte operand at `pos` (used when patching jumps).
pub fn patch_u16(ins: &mut [u8], pos: usize, value: usize) {
    let bytes = (value as u16).to_be_bytes();
    if let Some(slot) = ins.get_mut(pos..pos + 2) {
        slot.copy_from_slice(&bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_instruction() {
        assert_eq!(
            make_instruction(Opcode::Constant, &[65534]),
            vec![Opcode::Constant as u8, 255, 254]
        );
        assert_eq!(make_instruction(Opcode::Pop, &[]), vec![Opcode::Pop as u8]);
        assert_eq!(
            make_instruction(Opcode::SetSelGlobal, &[258, 3]),
            vec![Opcode::SetSelGlobal as u8, 1, 2, 3]
        );
        assert_eq!(
            make_instruction(Opcode::Call, &[2, 1]),
            vec![Opcode::Call as u8, 2, 1]
        );
    }

    #[test]
    fn test_read_operands() {
        for (op, operands, bytes_read) in [
            (Opcode::Constant, vec![65535], 2),
            (Opcode::GetLocal, vec![255], 1),
            (Opcode::Closure, vec![300, 4], 3),
            (Opcode::Suspend, vec![], 0),
        ] {
            let ins = make_instruction(op, &operands);
            let (read, n) = read_operands(op.operand_widths(), &ins[1..]);
            assert_eq!(read, operands, "{:?}", op);
            assert_eq!(n, bytes_read, "{:?}", op);
        }
    }

    #[test]
    fn test_opcode_byte_round_trip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_byte(op as u8), Some(op));
        }
        assert_eq!(Opcode::from_byte(200), None);
    }

    #[test]
    fn test_patch_u16() {
        let mut ins = make_instruction(Opcode::Jump, &[0]);
        patch_u16(&mut ins, 1, 0x1234);
        assert_eq!(read_u16(&ins, 1), 0x1234);
    }
}
