use serde::{Deserialize, Serialize};

use crate::types::{
    CompiledUnit, Diagnostic, Failure, InstrumentationDirective, InvocationResult, Offset,
    SourceUnit, TargetDescriptor,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompileRequest {
    pub units: Vec<SourceUnit>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompileOutcome {
    Compiled(Vec<CompiledUnit>),
    Failed {
        failure: Failure,
        diagnostics: Vec<Diagnostic>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompileResponse {
    pub outcome: CompileOutcome,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedefineRequest {
    pub class_name: String,
    pub bytecode: Vec<u8>,
    pub directives: Vec<InstrumentationDirective>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedefineResponse {
    pub class_name: String,
    pub result: Result<(), Failure>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvokeRequest {
    pub target: TargetDescriptor,
    pub offset: Offset,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InvokeResponse {
    pub offset: Offset,
    pub result: InvocationResult,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearResultRequest {
    pub offsets: Vec<Offset>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearResultResponse {
    /// The requested offsets that had an entry, in request order. Offsets with
    /// nothing cached are left out; clearing them is still a success.
    pub removed: Vec<Offset>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetResultRequest {
    pub offset: Offset,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GetResultResponse {
    pub offset: Offset,
    pub result: Option<InvocationResult>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HotSwapRequest {
    pub units: Vec<SourceUnit>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum HotSwapStatus {
    /// An already-loaded class now runs the new definition.
    Redefined,
    /// The class was not loaded yet and has been defined fresh.
    Defined,
    Failed(Failure),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HotSwapClassResult {
    pub class_name: String,
    pub status: HotSwapStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum HotSwapOutcome {
    CompileFailed {
        failure: Failure,
        diagnostics: Vec<Diagnostic>,
    },
    Applied(Vec<HotSwapClassResult>),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HotSwapResponse {
    pub outcome: HotSwapOutcome,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub failure: Failure,
}

/// Wire discriminant carried in every frame header.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketKind {
    CompileRequest = 1,
    CompileResponse = 2,
    RedefineRequest = 3,
    RedefineResponse = 4,
    InvokeRequest = 5,
    InvokeResponse = 6,
    ClearResultRequest = 7,
    ClearResultResponse = 8,
    GetResultRequest = 9,
    GetResultResponse = 10,
    HotSwapRequest = 11,
    HotSwapResponse = 12,
    ErrorResponse = 255,
}

impl PacketKind {
    pub fn from_u16(raw: u16) -> Option<Self> {
        Some(match raw {
            1 => PacketKind::CompileRequest,
            2 => PacketKind::CompileResponse,
            3 => PacketKind::RedefineRequest,
            4 => PacketKind::RedefineResponse,
            5 => PacketKind::InvokeRequest,
            6 => PacketKind::InvokeResponse,
            7 => PacketKind::ClearResultRequest,
            8 => PacketKind::ClearResultResponse,
            9 => PacketKind::GetResultRequest,
            10 => PacketKind::GetResultResponse,
            11 => PacketKind::HotSwapRequest,
            12 => PacketKind::HotSwapResponse,
            255 => PacketKind::ErrorResponse,
            _ => return None,
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn is_request(self) -> bool {
        matches!(
            self,
            PacketKind::CompileRequest
                | PacketKind::RedefineRequest
                | PacketKind::InvokeRequest
                | PacketKind::ClearResultRequest
                | PacketKind::GetResultRequest
                | PacketKind::HotSwapRequest
        )
    }
}

/// Every message that can cross the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    CompileRequest(CompileRequest),
    CompileResponse(CompileResponse),
    RedefineRequest(RedefineRequest),
    RedefineResponse(RedefineResponse),
    InvokeRequest(InvokeRequest),
    InvokeResponse(InvokeResponse),
    ClearResultRequest(ClearResultRequest),
    ClearResultResponse(ClearResultResponse),
    GetResultRequest(GetResultRequest),
    GetResultResponse(GetResultResponse),
    HotSwapRequest(HotSwapRequest),
    HotSwapResponse(HotSwapResponse),
    ErrorResponse(ErrorResponse),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::CompileRequest(_) => PacketKind::CompileRequest,
            Packet::CompileResponse(_) => PacketKind::CompileResponse,
            Packet::RedefineRequest(_) => PacketKind::RedefineRequest,
            Packet::RedefineResponse(_) => PacketKind::RedefineResponse,
            Packet::InvokeRequest(_) => PacketKind::InvokeRequest,
            Packet::InvokeResponse(_) => PacketKind::InvokeResponse,
            Packet::ClearResultRequest(_) => PacketKind::ClearResultRequest,
            Packet::ClearResultResponse(_) => PacketKind::ClearResultResponse,
            Packet::GetResultRequest(_) => PacketKind::GetResultRequest,
            Packet::GetResultResponse(_) => PacketKind::GetResultResponse,
            Packet::HotSwapRequest(_) => PacketKind::HotSwapRequest,
            Packet::HotSwapResponse(_) => PacketKind::HotSwapResponse,
            Packet::ErrorResponse(_) => PacketKind::ErrorResponse,
        }
    }

    pub fn error(failure: Failure) -> Self {
        Packet::ErrorResponse(ErrorResponse { failure })
    }
}
