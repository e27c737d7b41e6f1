use crate::error::{Error, Result};
use crate::reader::read_i4_at;

pub(crate) const ILOAD: u8 = 0x15;
pub(crate) const LLOAD: u8 = 0x16;
pub(crate) const FLOAD: u8 = 0x17;
pub(crate) const DLOAD: u8 = 0x18;
pub(crate) const ALOAD: u8 = 0x19;

pub(crate) const IALOAD: u8 = 0x2e;
pub(crate) const LALOAD: u8 = 0x2f;
pub(crate) const FALOAD: u8 = 0x30;
pub(crate) const DALOAD: u8 = 0x31;
pub(crate) const AALOAD: u8 = 0x32;
pub(crate) const BALOAD: u8 = 0x33;
pub(crate) const CALOAD: u8 = 0x34;
pub(crate) const SALOAD: u8 = 0x35;

pub(crate) const IASTORE: u8 = 0x4f;
pub(crate) const LASTORE: u8 = 0x50;
pub(crate) const FASTORE: u8 = 0x51;
pub(crate) const DASTORE: u8 = 0x52;
pub(crate) const AASTORE: u8 = 0x53;
pub(crate) const BASTORE: u8 = 0x54;
pub(crate) const CASTORE: u8 = 0x55;
pub(crate) const SASTORE: u8 = 0x56;

pub(crate) const IRETURN: u8 = 0xac;
pub(crate) const LRETURN: u8 = 0xad;
pub(crate) const FRETURN: u8 = 0xae;
pub(crate) const DRETURN: u8 = 0xaf;
pub(crate) const ARETURN: u8 = 0xb0;
pub(crate) const RETURN: u8 = 0xb1;

pub(crate) const GETSTATIC: u8 = 0xb2;
pub(crate) const PUTSTATIC: u8 = 0xb3;
pub(crate) const GETFIELD: u8 = 0xb4;
pub(crate) const PUTFIELD: u8 = 0xb5;
pub(crate) const INVOKEVIRTUAL: u8 = 0xb6;
pub(crate) const INVOKESPECIAL: u8 = 0xb7;
pub(crate) const INVOKESTATIC: u8 = 0xb8;
pub(crate) const INVOKEINTERFACE: u8 = 0xb9;

pub(crate) const TABLESWITCH: u8 = 0xaa;
pub(crate) const LOOKUPSWITCH: u8 = 0xab;
pub(crate) const GOTO: u8 = 0xa7;
pub(crate) const JSR: u8 = 0xa8;
pub(crate) const WIDE: u8 = 0xc4;
pub(crate) const IINC: u8 = 0x84;
pub(crate) const IFNULL: u8 = 0xc6;
pub(crate) const IFNONNULL: u8 = 0xc7;
pub(crate) const GOTO_W: u8 = 0xc8;
pub(crate) const JSR_W: u8 = 0xc9;

/// Padding after a switch opcode at `pc` so its operands start 4-byte aligned.
pub(crate) fn switch_padding(pc: usize) -> usize {
    (4 - (pc + 1) % 4) % 4
}

/// Branch instructions with a 16-bit relative offset: `if*`, `goto`, `jsr`, `ifnull`, `ifnonnull`.
pub(crate) fn is_short_branch(opcode: u8) -> bool {
    matches!(opcode, 0x99..=JSR | IFNULL | IFNONNULL)
}

/// Length in bytes of the instruction starting at `pc`.
pub(crate) fn instruction_len(code: &[u8], pc: usize) -> Result<usize> {
    let opcode = *code.get(pc).ok_or(Error::UnexpectedEof)?;
    let len = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        0x12 => 2,
        0x13 | 0x14 => 3,
        ILOAD..=ALOAD => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        IINC => 3,
        0x85..=0x98 => 1,
        0x99..=JSR => 3,
        0xa9 => 2,
        TABLESWITCH => {
            let base = pc + 1 + switch_padding(pc);
            let low = read_i4_at(code, base + 4)? as i64;
            let high = read_i4_at(code, base + 8)? as i64;
            if high < low {
                return Err(Error::InvalidOpcode { pc, opcode });
            }
            let entries = (high - low + 1) as usize;
            (base - pc) + 12 + entries * 4
        }
        LOOKUPSWITCH => {
            let base = pc + 1 + switch_padding(pc);
            let npairs = read_i4_at(code, base + 4)?;
            if npairs < 0 {
                return Err(Error::InvalidOpcode { pc, opcode });
            }
            (base - pc) + 8 + npairs as usize * 8
        }
        IRETURN..=RETURN => 1,
        GETSTATIC..=INVOKESTATIC => 3,
        INVOKEINTERFACE | 0xba => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        WIDE => {
            let inner = *code.get(pc + 1).ok_or(Error::UnexpectedEof)?;
            match inner {
                IINC => 6,
                ILOAD..=ALOAD | 0x36..=0x3a | 0xa9 => 4,
                _ => return Err(Error::InvalidOpcode { pc, opcode: inner }),
            }
        }
        0xc5 => 4,
        IFNULL | IFNONNULL => 3,
        GOTO_W | JSR_W => 5,
        _ => return Err(Error::InvalidOpcode { pc, opcode }),
    };
    if pc + len > code.len() {
        return Err(Error::UnexpectedEof);
    }
    Ok(len)
}

/// Start offsets of every instruction in `code`.
pub(crate) fn instruction_starts(code: &[u8]) -> Result<Vec<usize>> {
    let mut starts = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        starts.push(pc);
        pc += instruction_len(code, pc)?;
    }
    Ok(starts)
}
