//! Control protocol between a hotwire controller and the in-process agent.
//!
//! Every exchange is a single request frame answered by a single response
//! frame. Packets form a closed set ([`Packet`]); an unknown kind, a foreign
//! protocol version or an undecodable payload is answered with an
//! [`ErrorResponse`] while the connection stays usable.

mod client;
mod codec;
mod error;
mod packet;
mod types;

pub use client::Client;
pub use codec::{
    decode_body, decode_frame, encode_frame, encode_packet, read_packet, read_packet_async,
    write_packet, write_packet_async, DEFAULT_MAX_FRAME_BYTES, HEADER_LEN, PROTOCOL_VERSION,
};
pub use error::{ClientError, ProtocolError};
pub use packet::{
    ClearResultRequest, ClearResultResponse, CompileOutcome, CompileRequest, CompileResponse,
    ErrorResponse, GetResultRequest, GetResultResponse, HotSwapClassResult, HotSwapOutcome,
    HotSwapRequest, HotSwapResponse, HotSwapStatus, InvokeRequest, InvokeResponse, Packet,
    PacketKind, RedefineRequest, RedefineResponse,
};
pub use types::{
    AccessorKind, CompiledUnit, Diagnostic, Failure, InstrumentationDirective, InvocationResult,
    ObjectRef, Offset, Severity, SourceUnit, TargetDescriptor, Value,
};
