//! Rewrites array element loads and stores into static calls on a replacement class.
//!
//! Each replaced opcode is one byte and its `invokestatic` replacement is three,
//! so every instruction after a rewrite moves. Branch offsets, switch padding,
//! the exception table and the offset-bearing `Code` attributes are relocated
//! to match. The replacement methods take and return exactly what the original
//! opcode consumed and produced, so `max_stack` is unchanged.

use std::collections::HashMap;

use crate::classfile::{Attribute, ClassFile};
use crate::code::{Code, MAX_CODE_LEN};
use crate::constant_pool::ConstantPool;
use crate::error::{Error, Result};
use crate::opcodes::{
    instruction_len, instruction_starts, is_short_branch, switch_padding, AASTORE, BALOAD,
    BASTORE, CALOAD, CASTORE, DALOAD, DASTORE, FALOAD, FASTORE, GOTO_W, IALOAD, IASTORE,
    INVOKESTATIC, JSR_W, LALOAD, LASTORE, LOOKUPSWITCH, SALOAD, SASTORE, TABLESWITCH,
};
use crate::reader::{read_i2_at, read_i4_at, Reader};
use crate::stackmap::remap_stack_map;
use crate::writer::Writer;

/// Which accesses to redirect, and to which class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayAccessPolicy {
    /// Internal name of the class declaring the `arrayRead*`/`arrayWrite*` methods.
    pub owner: String,
    pub reads: bool,
    pub writes: bool,
}

/// Replacement `(name, descriptor)` for `opcode`, if the policy redirects it.
///
/// `aaload` is never redirected: its replacement would return `Object` and the
/// call site would need a `checkcast` to the element type.
fn replacement(opcode: u8, policy: &ArrayAccessPolicy) -> Option<(&'static str, &'static str)> {
    let read = match opcode {
        IALOAD => Some(("arrayReadInt", "(Ljava/lang/Object;I)I")),
        LALOAD => Some(("arrayReadLong", "(Ljava/lang/Object;I)J")),
        FALOAD => Some(("arrayReadFloat", "(Ljava/lang/Object;I)F")),
        DALOAD => Some(("arrayReadDouble", "(Ljava/lang/Object;I)D")),
        BALOAD => Some(("arrayReadByteOrBoolean", "(Ljava/lang/Object;I)B")),
        CALOAD => Some(("arrayReadChar", "(Ljava/lang/Object;I)C")),
        SALOAD => Some(("arrayReadShort", "(Ljava/lang/Object;I)S")),
        _ => None,
    };
    if read.is_some() {
        return read.filter(|_| policy.reads);
    }
    let write = match opcode {
        IASTORE => Some(("arrayWriteInt", "(Ljava/lang/Object;II)V")),
        LASTORE => Some(("arrayWriteLong", "(Ljava/lang/Object;IJ)V")),
        FASTORE => Some(("arrayWriteFloat", "(Ljava/lang/Object;IF)V")),
        DASTORE => Some(("arrayWriteDouble", "(Ljava/lang/Object;ID)V")),
        AASTORE => Some(("arrayWriteObject", "(Ljava/lang/Object;ILjava/lang/Object;)V")),
        BASTORE => Some(("arrayWriteByteOrBoolean", "(Ljava/lang/Object;IB)V")),
        CASTORE => Some(("arrayWriteChar", "(Ljava/lang/Object;IC)V")),
        SASTORE => Some(("arrayWriteShort", "(Ljava/lang/Object;IS)V")),
        _ => None,
    };
    write.filter(|_| policy.writes)
}

/// Rewrite every matching array access in every method of `class`.
///
/// Returns the number of rewritten instructions. The policy's own owner class
/// is left alone so the replacement methods do not call themselves.
pub fn rewrite_array_access(class: &mut ClassFile, policy: &ArrayAccessPolicy) -> Result<usize> {
    if class.class_name()? == policy.owner || !(policy.reads || policy.writes) {
        return Ok(0);
    }

    let mut refs: HashMap<u8, u16> = HashMap::new();
    let mut total = 0;
    for index in 0..class.methods.len() {
        let Some(mut code) = class.code(&class.methods[index])? else {
            continue;
        };
        let rewritten = rewrite_code(&mut class.constant_pool, &mut code, policy, &mut refs)?;
        if rewritten > 0 {
            class.set_code(index, &code)?;
            total += rewritten;
        }
    }
    Ok(total)
}

struct Slot {
    old_pc: usize,
    len: usize,
    new_pc: usize,
    call: Option<u16>,
}

/// Old-to-new offset table. The end of the code array maps too, for ranges.
struct Relocation {
    new_pc_of: Vec<Option<usize>>,
    old_len: usize,
}

impl Relocation {
    fn range_end(&self, old: usize) -> Result<usize> {
        self.new_pc_of
            .get(old)
            .copied()
            .flatten()
            .ok_or(Error::InvalidBranchTarget {
                pc: old,
                target: old as i64,
            })
    }

    fn offset_u16(&self, old: u16) -> Result<u16> {
        Ok(self.range_end(old as usize)? as u16)
    }

    /// New relative offset for a branch at `old_pc` (now at `new_pc`) with `offset`.
    fn branch(&self, old_pc: usize, new_pc: usize, offset: i64) -> Result<i64> {
        let target = old_pc as i64 + offset;
        if target < 0 || target as usize >= self.old_len {
            return Err(Error::InvalidBranchTarget { pc: old_pc, target });
        }
        let new_target = self
            .new_pc_of
            .get(target as usize)
            .copied()
            .flatten()
            .ok_or(Error::InvalidBranchTarget { pc: old_pc, target })?;
        Ok(new_target as i64 - new_pc as i64)
    }
}

fn rewrite_code(
    cp: &mut ConstantPool,
    code: &mut Code,
    policy: &ArrayAccessPolicy,
    refs: &mut HashMap<u8, u16>,
) -> Result<usize> {
    let old = &code.code;
    let mut slots = Vec::new();
    let mut new_pc_of = vec![None; old.len() + 1];
    let mut new_pc = 0usize;
    let mut rewritten = 0;

    for old_pc in instruction_starts(old)? {
        let opcode = old[old_pc];
        let len = instruction_len(old, old_pc)?;
        let call = match replacement(opcode, policy) {
            Some((name, descriptor)) => {
                let index = match refs.get(&opcode) {
                    Some(index) => *index,
                    None => {
                        let index = cp.add_method_ref(&policy.owner, name, descriptor, false)?;
                        refs.insert(opcode, index);
                        index
                    }
                };
                rewritten += 1;
                Some(index)
            }
            None => None,
        };
        let new_len = match (call, opcode) {
            (Some(_), _) => 3,
            (None, TABLESWITCH | LOOKUPSWITCH) => {
                len - switch_padding(old_pc) + switch_padding(new_pc)
            }
            (None, _) => len,
        };
        new_pc_of[old_pc] = Some(new_pc);
        slots.push(Slot {
            old_pc,
            len,
            new_pc,
            call,
        });
        new_pc += new_len;
    }

    if rewritten == 0 {
        return Ok(0);
    }
    if new_pc > MAX_CODE_LEN {
        return Err(Error::CodeTooLarge(new_pc));
    }
    new_pc_of[old.len()] = Some(new_pc);
    let reloc = Relocation {
        new_pc_of,
        old_len: old.len(),
    };

    let mut out = Vec::with_capacity(new_pc);
    for slot in &slots {
        emit(&mut out, old, slot, &reloc)?;
    }

    for handler in &mut code.exception_table {
        handler.start_pc = reloc.offset_u16(handler.start_pc)?;
        handler.end_pc = reloc.offset_u16(handler.end_pc)?;
        handler.handler_pc = reloc.offset_u16(handler.handler_pc)?;
    }

    let mut attributes = Vec::with_capacity(code.attributes.len());
    for attr in code.attributes.drain(..) {
        let info = match cp.get_utf8(attr.name_index)? {
            "LineNumberTable" => remap_line_numbers(&attr.info, &reloc)?,
            "LocalVariableTable" | "LocalVariableTypeTable" => {
                remap_local_variables(&attr.info, &reloc)?
            }
            "StackMapTable" => remap_stack_map(&attr.info, |pc| reloc.offset_u16(pc))?,
            // Type annotation offsets point into the old code; drop rather than mislead.
            "RuntimeVisibleTypeAnnotations" | "RuntimeInvisibleTypeAnnotations" => continue,
            _ => attr.info,
        };
        attributes.push(Attribute {
            name_index: attr.name_index,
            info,
        });
    }
    code.attributes = attributes;
    code.code = out;
    Ok(rewritten)
}

fn emit(out: &mut Vec<u8>, old: &[u8], slot: &Slot, reloc: &Relocation) -> Result<()> {
    let Slot {
        old_pc,
        len,
        new_pc,
        call,
    } = *slot;
    debug_assert_eq!(out.len(), new_pc);
    let opcode = old[old_pc];

    if let Some(index) = call {
        out.push(INVOKESTATIC);
        out.extend_from_slice(&index.to_be_bytes());
        return Ok(());
    }

    if is_short_branch(opcode) {
        let offset = reloc.branch(old_pc, new_pc, read_i2_at(old, old_pc + 1)? as i64)?;
        let offset = i16::try_from(offset).map_err(|_| Error::BranchOutOfRange {
            pc: new_pc,
            offset,
        })?;
        out.push(opcode);
        out.extend_from_slice(&offset.to_be_bytes());
        return Ok(());
    }

    match opcode {
        GOTO_W | JSR_W => {
            let offset = reloc.branch(old_pc, new_pc, read_i4_at(old, old_pc + 1)? as i64)?;
            out.push(opcode);
            out.extend_from_slice(&(offset as i32).to_be_bytes());
        }
        TABLESWITCH | LOOKUPSWITCH => {
            out.push(opcode);
            out.resize(out.len() + switch_padding(new_pc), 0);
            let base = old_pc + 1 + switch_padding(old_pc);
            let remap = |at: usize| -> Result<[u8; 4]> {
                let offset = reloc.branch(old_pc, new_pc, read_i4_at(old, at)? as i64)?;
                Ok((offset as i32).to_be_bytes())
            };
            // default
            out.extend_from_slice(&remap(base)?);
            if opcode == TABLESWITCH {
                out.extend_from_slice(&old[base + 4..base + 12]);
                let mut at = base + 12;
                while at < old_pc + len {
                    out.extend_from_slice(&remap(at)?);
                    at += 4;
                }
            } else {
                out.extend_from_slice(&old[base + 4..base + 8]);
                let mut at = base + 8;
                while at < old_pc + len {
                    out.extend_from_slice(&old[at..at + 4]);
                    out.extend_from_slice(&remap(at + 4)?);
                    at += 8;
                }
            }
        }
        _ => out.extend_from_slice(&old[old_pc..old_pc + len]),
    }
    Ok(())
}

fn remap_line_numbers(info: &[u8], reloc: &Relocation) -> Result<Vec<u8>> {
    let mut r = Reader::new(info);
    let mut w = Writer::new();
    let count = r.read_u2()?;
    w.write_u2(count);
    for _ in 0..count {
        w.write_u2(reloc.offset_u16(r.read_u2()?)?);
        w.write_u2(r.read_u2()?);
    }
    r.ensure_empty()?;
    Ok(w.into_vec())
}

fn remap_local_variables(info: &[u8], reloc: &Relocation) -> Result<Vec<u8>> {
    let mut r = Reader::new(info);
    let mut w = Writer::new();
    let count = r.read_u2()?;
    w.write_u2(count);
    for _ in 0..count {
        let start = r.read_u2()? as usize;
        let length = r.read_u2()? as usize;
        let new_start = reloc.range_end(start)?;
        let new_end = reloc.range_end(start + length)?;
        w.write_u2(new_start as u16);
        w.write_u2((new_end - new_start) as u16);
        // name, descriptor (or signature), slot
        w.write_u2(r.read_u2()?);
        w.write_u2(r.read_u2()?);
        w.write_u2(r.read_u2()?);
    }
    r.ensure_empty()?;
    Ok(w.into_vec())
}
