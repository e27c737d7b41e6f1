//! `StackMapTable` decoding and re-encoding with relocated bytecode offsets.

use crate::error::{Error, Result};
use crate::reader::Reader;
use crate::writer::Writer;

const ATTR: &str = "StackMapTable";

#[derive(Debug, Clone, PartialEq, Eq)]
enum VerificationType {
    /// Tags 0-6 carry no payload (top, int, float, double, long, null, uninitializedThis).
    Simple(u8),
    Object(u16),
    /// Offset of the `new` instruction that created the value.
    Uninitialized(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FrameKind {
    Same,
    SameLocals1(VerificationType),
    Chop(u8),
    Append(Vec<VerificationType>),
    Full {
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    offset: u32,
    kind: FrameKind,
}

fn read_vtype(r: &mut Reader<'_>) -> Result<VerificationType> {
    Ok(match r.read_u1()? {
        tag @ 0..=6 => VerificationType::Simple(tag),
        7 => VerificationType::Object(r.read_u2()?),
        8 => VerificationType::Uninitialized(r.read_u2()?),
        _ => return Err(Error::MalformedAttribute(ATTR)),
    })
}

fn read_vtypes(r: &mut Reader<'_>, n: usize) -> Result<Vec<VerificationType>> {
    (0..n).map(|_| read_vtype(r)).collect()
}

fn write_vtype(w: &mut Writer, vtype: &VerificationType) {
    match vtype {
        VerificationType::Simple(tag) => w.write_u1(*tag),
        VerificationType::Object(index) => {
            w.write_u1(7);
            w.write_u2(*index);
        }
        VerificationType::Uninitialized(offset) => {
            w.write_u1(8);
            w.write_u2(*offset);
        }
    }
}

fn parse(info: &[u8]) -> Result<Vec<Frame>> {
    let mut r = Reader::new(info);
    let count = r.read_u2()? as usize;
    let mut frames = Vec::with_capacity(count);
    let mut previous: Option<u32> = None;
    for _ in 0..count {
        let frame_type = r.read_u1()?;
        let (delta, kind) = match frame_type {
            0..=63 => (frame_type as u32, FrameKind::Same),
            64..=127 => (
                (frame_type - 64) as u32,
                FrameKind::SameLocals1(read_vtype(&mut r)?),
            ),
            247 => {
                let delta = r.read_u2()? as u32;
                (delta, FrameKind::SameLocals1(read_vtype(&mut r)?))
            }
            248..=250 => (r.read_u2()? as u32, FrameKind::Chop(251 - frame_type)),
            251 => (r.read_u2()? as u32, FrameKind::Same),
            252..=254 => {
                let delta = r.read_u2()? as u32;
                let locals = read_vtypes(&mut r, (frame_type - 251) as usize)?;
                (delta, FrameKind::Append(locals))
            }
            255 => {
                let delta = r.read_u2()? as u32;
                let n = r.read_u2()? as usize;
                let locals = read_vtypes(&mut r, n)?;
                let n = r.read_u2()? as usize;
                let stack = read_vtypes(&mut r, n)?;
                (delta, FrameKind::Full { locals, stack })
            }
            _ => return Err(Error::MalformedAttribute(ATTR)),
        };
        let offset = match previous {
            None => delta,
            Some(prev) => prev + delta + 1,
        };
        previous = Some(offset);
        frames.push(Frame { offset, kind });
    }
    r.ensure_empty()?;
    Ok(frames)
}

fn encode(frames: &[Frame]) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.write_u2(
        u16::try_from(frames.len()).map_err(|_| Error::MalformedAttribute(ATTR))?,
    );
    let mut previous: Option<u32> = None;
    for frame in frames {
        let delta = match previous {
            None => frame.offset,
            Some(prev) => frame
                .offset
                .checked_sub(prev + 1)
                .ok_or(Error::MalformedAttribute(ATTR))?,
        };
        previous = Some(frame.offset);
        let delta16 = u16::try_from(delta).map_err(|_| Error::MalformedAttribute(ATTR))?;

        match &frame.kind {
            FrameKind::Same if delta < 64 => w.write_u1(delta as u8),
            FrameKind::Same => {
                w.write_u1(251);
                w.write_u2(delta16);
            }
            FrameKind::SameLocals1(vtype) => {
                if delta < 64 {
                    w.write_u1(64 + delta as u8);
                } else {
                    w.write_u1(247);
                    w.write_u2(delta16);
                }
                write_vtype(&mut w, vtype);
            }
            FrameKind::Chop(k) => {
                w.write_u1(251 - k);
                w.write_u2(delta16);
            }
            FrameKind::Append(locals) => {
                w.write_u1(251 + locals.len() as u8);
                w.write_u2(delta16);
                for vtype in locals {
                    write_vtype(&mut w, vtype);
                }
            }
            FrameKind::Full { locals, stack } => {
                w.write_u1(255);
                w.write_u2(delta16);
                w.write_u2(locals.len() as u16);
                for vtype in locals {
                    write_vtype(&mut w, vtype);
                }
                w.write_u2(stack.len() as u16);
                for vtype in stack {
                    write_vtype(&mut w, vtype);
                }
            }
        }
    }
    Ok(w.into_vec())
}

fn remap_vtypes(
    vtypes: &mut [VerificationType],
    remap: &impl Fn(u16) -> Result<u16>,
) -> Result<()> {
    for vtype in vtypes {
        if let VerificationType::Uninitialized(offset) = vtype {
            *offset = remap(*offset)?;
        }
    }
    Ok(())
}

/// Re-encode a `StackMapTable` attribute body after instructions moved.
///
/// `remap` translates an old instruction offset into its new offset. Frame
/// offsets and `Uninitialized` allocation sites are both translated.
pub(crate) fn remap_stack_map(
    info: &[u8],
    remap: impl Fn(u16) -> Result<u16>,
) -> Result<Vec<u8>> {
    let mut frames = parse(info)?;
    for frame in &mut frames {
        let old = u16::try_from(frame.offset).map_err(|_| Error::MalformedAttribute(ATTR))?;
        frame.offset = remap(old)? as u32;
        match &mut frame.kind {
            FrameKind::SameLocals1(vtype) => remap_vtypes(std::slice::from_mut(vtype), &remap)?,
            FrameKind::Append(locals) => remap_vtypes(locals, &remap)?,
            FrameKind::Full { locals, stack } => {
                remap_vtypes(locals, &remap)?;
                remap_vtypes(stack, &remap)?;
            }
            FrameKind::Same | FrameKind::Chop(_) => {}
        }
    }
    encode(&frames)
}
