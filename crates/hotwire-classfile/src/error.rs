use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    UnexpectedEof,
    TrailingBytes(usize),
    InvalidMagic(u32),
    InvalidConstantPoolIndex(u16),
    InvalidConstantPoolTag(u8),
    ConstantPoolTypeMismatch {
        index: u16,
        expected: &'static str,
        found: &'static str,
    },
    ConstantPoolOverflow,
    InvalidModifiedUtf8,
    InvalidDescriptor(String),
    MalformedAttribute(&'static str),
    InvalidOpcode {
        pc: usize,
        opcode: u8,
    },
    InvalidBranchTarget {
        pc: usize,
        target: i64,
    },
    BranchOutOfRange {
        pc: usize,
        offset: i64,
    },
    CodeTooLarge(usize),
    MemberNotFound {
        name: String,
        descriptor: String,
    },
    Unsupported(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnexpectedEof => write!(f, "unexpected end of input"),
            Error::TrailingBytes(n) => write!(f, "{n} trailing bytes after structure"),
            Error::InvalidMagic(magic) => write!(f, "invalid classfile magic: 0x{magic:08x}"),
            Error::InvalidConstantPoolIndex(index) => {
                write!(f, "invalid constant pool index: {index}")
            }
            Error::InvalidConstantPoolTag(tag) => write!(f, "invalid constant pool tag: {tag}"),
            Error::ConstantPoolTypeMismatch {
                index,
                expected,
                found,
            } => write!(
                f,
                "constant pool type mismatch at index {index}: expected {expected}, found {found}"
            ),
            Error::ConstantPoolOverflow => write!(f, "constant pool exceeds 65535 entries"),
            Error::InvalidModifiedUtf8 => write!(f, "invalid modified UTF-8 constant"),
            Error::InvalidDescriptor(desc) => write!(f, "invalid descriptor: {desc}"),
            Error::MalformedAttribute(name) => write!(f, "malformed {name} attribute"),
            Error::InvalidOpcode { pc, opcode } => {
                write!(f, "invalid opcode 0x{opcode:02x} at pc {pc}")
            }
            Error::InvalidBranchTarget { pc, target } => {
                write!(f, "instruction at pc {pc} targets {target}, which is not an instruction start")
            }
            Error::BranchOutOfRange { pc, offset } => write!(
                f,
                "relocated branch at pc {pc} needs offset {offset}, which does not fit in 16 bits"
            ),
            Error::CodeTooLarge(len) => write!(f, "method code is {len} bytes (limit 65535)"),
            Error::MemberNotFound { name, descriptor } => {
                write!(f, "member {name}:{descriptor} not found")
            }
            Error::Unsupported(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {}
