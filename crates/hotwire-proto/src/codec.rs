//! Frame encoding.
//!
//! ```text
//! u32 len (LE, header + payload) | u16 version (LE) | u16 kind (LE) | bincode payload
//! ```
//!
//! Lengths are checked against the configured maximum before anything is
//! allocated, and a frame is always read in full before its payload is decoded
//! so a bad payload never desynchronizes the stream.

use std::io::{self, Read, Write};

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::packet::{Packet, PacketKind};

pub const PROTOCOL_VERSION: u16 = 1;

/// Default cap on `len` (header + payload).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024; // 64 MiB

/// Version + kind.
pub const HEADER_LEN: usize = 4;

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode_options()
        .serialize(value)
        .map_err(|err| ProtocolError::Io(io::Error::new(io::ErrorKind::InvalidData, err)))
}

fn decode_payload<T: DeserializeOwned>(kind: PacketKind, bytes: &[u8]) -> Result<T, ProtocolError> {
    bincode_options()
        .with_limit(bytes.len() as u64)
        .deserialize(bytes)
        .map_err(|err| ProtocolError::Malformed {
            kind: Some(kind),
            message: err.to_string(),
        })
}

/// Encode `packet` as a complete frame, length prefix included.
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let payload = match packet {
        Packet::CompileRequest(p) => encode_payload(p)?,
        Packet::CompileResponse(p) => encode_payload(p)?,
        Packet::RedefineRequest(p) => encode_payload(p)?,
        Packet::RedefineResponse(p) => encode_payload(p)?,
        Packet::InvokeRequest(p) => encode_payload(p)?,
        Packet::InvokeResponse(p) => encode_payload(p)?,
        Packet::ClearResultRequest(p) => encode_payload(p)?,
        Packet::ClearResultResponse(p) => encode_payload(p)?,
        Packet::GetResultRequest(p) => encode_payload(p)?,
        Packet::GetResultResponse(p) => encode_payload(p)?,
        Packet::HotSwapRequest(p) => encode_payload(p)?,
        Packet::HotSwapResponse(p) => encode_payload(p)?,
        Packet::ErrorResponse(p) => encode_payload(p)?,
    };
    encode_frame(PROTOCOL_VERSION, packet.kind().as_u16(), &payload)
}

/// Frame an arbitrary header and payload. Exposed for tests that need
/// deliberately wrong versions or kinds.
pub fn encode_frame(version: u16, kind: u16, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = HEADER_LEN + payload.len();
    let len32 = u32::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
        len,
        max: u32::MAX as usize,
    })?;
    let mut out = Vec::with_capacity(4 + len);
    out.extend_from_slice(&len32.to_le_bytes());
    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode the body of a frame (everything after the length prefix).
pub fn decode_body(body: &[u8]) -> Result<Packet, ProtocolError> {
    if body.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated);
    }
    let version = u16::from_le_bytes([body[0], body[1]]);
    let raw_kind = u16::from_le_bytes([body[2], body[3]]);
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let kind = PacketKind::from_u16(raw_kind).ok_or(ProtocolError::UnknownKind(raw_kind))?;
    let payload = &body[HEADER_LEN..];

    Ok(match kind {
        PacketKind::CompileRequest => Packet::CompileRequest(decode_payload(kind, payload)?),
        PacketKind::CompileResponse => Packet::CompileResponse(decode_payload(kind, payload)?),
        PacketKind::RedefineRequest => Packet::RedefineRequest(decode_payload(kind, payload)?),
        PacketKind::RedefineResponse => Packet::RedefineResponse(decode_payload(kind, payload)?),
        PacketKind::InvokeRequest => Packet::InvokeRequest(decode_payload(kind, payload)?),
        PacketKind::InvokeResponse => Packet::InvokeResponse(decode_payload(kind, payload)?),
        PacketKind::ClearResultRequest => {
            Packet::ClearResultRequest(decode_payload(kind, payload)?)
        }
        PacketKind::ClearResultResponse => {
            Packet::ClearResultResponse(decode_payload(kind, payload)?)
        }
        PacketKind::GetResultRequest => Packet::GetResultRequest(decode_payload(kind, payload)?),
        PacketKind::GetResultResponse => {
            Packet::GetResultResponse(decode_payload(kind, payload)?)
        }
        PacketKind::HotSwapRequest => Packet::HotSwapRequest(decode_payload(kind, payload)?),
        PacketKind::HotSwapResponse => Packet::HotSwapResponse(decode_payload(kind, payload)?),
        PacketKind::ErrorResponse => Packet::ErrorResponse(decode_payload(kind, payload)?),
    })
}

/// Decode exactly one frame from `bytes`, which must contain nothing else.
pub fn decode_frame(bytes: &[u8], max_frame_bytes: usize) -> Result<Packet, ProtocolError> {
    let prefix: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(ProtocolError::Truncated)?;
    let len = check_len(u32::from_le_bytes(prefix), max_frame_bytes)?;
    let body = &bytes[4..];
    if body.len() < len {
        return Err(ProtocolError::Truncated);
    }
    if body.len() > len {
        return Err(ProtocolError::Malformed {
            kind: None,
            message: format!("{} trailing bytes after frame", body.len() - len),
        });
    }
    decode_body(body)
}

fn check_len(len: u32, max_frame_bytes: usize) -> Result<usize, ProtocolError> {
    let len = len as usize;
    if len > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: max_frame_bytes,
        });
    }
    if len < HEADER_LEN {
        return Err(ProtocolError::Truncated);
    }
    Ok(len)
}

fn alloc_body(len: usize) -> Result<Vec<u8>, ProtocolError> {
    // Reserve fallibly so allocation failure surfaces as an error instead of aborting.
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|err| {
        ProtocolError::Io(io::Error::new(
            io::ErrorKind::OutOfMemory,
            format!("allocate frame buffer ({len} bytes): {err}"),
        ))
    })?;
    buf.resize(len, 0);
    Ok(buf)
}

fn map_body_read(err: io::Error) -> ProtocolError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ProtocolError::Truncated
    } else {
        ProtocolError::Io(err)
    }
}

/// Read one packet from a blocking stream.
pub fn read_packet<R: Read>(reader: &mut R, max_frame_bytes: usize) -> Result<Packet, ProtocolError> {
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Err(ProtocolError::ConnectionClosed),
            Ok(0) => return Err(ProtocolError::Truncated),
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(ProtocolError::Io(err)),
        }
    }
    let len = check_len(u32::from_le_bytes(prefix), max_frame_bytes)?;
    let mut body = alloc_body(len)?;
    reader.read_exact(&mut body).map_err(map_body_read)?;
    decode_body(&body)
}

pub fn write_packet<W: Write>(writer: &mut W, packet: &Packet) -> Result<(), ProtocolError> {
    let frame = encode_packet(packet)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one packet from an async stream.
pub async fn read_packet_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_bytes: usize,
) -> Result<Packet, ProtocolError> {
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]).await? {
            0 if filled == 0 => return Err(ProtocolError::ConnectionClosed),
            0 => return Err(ProtocolError::Truncated),
            n => filled += n,
        }
    }
    let len = check_len(u32::from_le_bytes(prefix), max_frame_bytes)?;
    let mut body = alloc_body(len)?;
    reader.read_exact(&mut body).await.map_err(map_body_read)?;
    decode_body(&body)
}

pub async fn write_packet_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), ProtocolError> {
    let frame = encode_packet(packet)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
