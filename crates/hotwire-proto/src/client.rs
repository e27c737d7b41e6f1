use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::codec::{read_packet_async, write_packet_async, DEFAULT_MAX_FRAME_BYTES};
use crate::error::{ClientError, ProtocolError};
use crate::packet::{
    ClearResultRequest, ClearResultResponse, CompileOutcome, CompileRequest, GetResultRequest,
    GetResultResponse, HotSwapOutcome, HotSwapRequest, InvokeRequest, InvokeResponse, Packet,
    PacketKind, RedefineRequest, RedefineResponse,
};
use crate::types::{InstrumentationDirective, SourceUnit, TargetDescriptor};

/// Lockstep controller-side connection: one request in flight at a time.
pub struct Client<S = TcpStream> {
    stream: S,
    max_frame_bytes: usize,
}

impl Client<TcpStream> {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(ProtocolError::from)?;
        stream.set_nodelay(true).map_err(ProtocolError::from)?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Send `packet` and wait for the reply. An `ErrorResponse` becomes
    /// [`ClientError::Remote`].
    pub async fn request(&mut self, packet: Packet) -> Result<Packet, ClientError> {
        let kind = packet.kind();
        tracing::debug!(?kind, "sending request");
        write_packet_async(&mut self.stream, &packet).await?;
        let reply = read_packet_async(&mut self.stream, self.max_frame_bytes).await?;
        tracing::debug!(request = ?kind, reply = ?reply.kind(), "received reply");
        match reply {
            Packet::ErrorResponse(err) => Err(ClientError::Remote(err.failure)),
            other => Ok(other),
        }
    }

    pub async fn compile(&mut self, units: Vec<SourceUnit>) -> Result<CompileOutcome, ClientError> {
        match self
            .request(Packet::CompileRequest(CompileRequest { units }))
            .await?
        {
            Packet::CompileResponse(resp) => Ok(resp.outcome),
            other => Err(unexpected(PacketKind::CompileRequest, &other)),
        }
    }

    pub async fn redefine(
        &mut self,
        class_name: impl Into<String>,
        bytecode: Vec<u8>,
        directives: Vec<InstrumentationDirective>,
    ) -> Result<RedefineResponse, ClientError> {
        let request = RedefineRequest {
            class_name: class_name.into(),
            bytecode,
            directives,
        };
        match self.request(Packet::RedefineRequest(request)).await? {
            Packet::RedefineResponse(resp) => Ok(resp),
            other => Err(unexpected(PacketKind::RedefineRequest, &other)),
        }
    }

    pub async fn hot_swap(&mut self, units: Vec<SourceUnit>) -> Result<HotSwapOutcome, ClientError> {
        match self
            .request(Packet::HotSwapRequest(HotSwapRequest { units }))
            .await?
        {
            Packet::HotSwapResponse(resp) => Ok(resp.outcome),
            other => Err(unexpected(PacketKind::HotSwapRequest, &other)),
        }
    }

    pub async fn invoke(
        &mut self,
        target: TargetDescriptor,
        offset: impl Into<String>,
    ) -> Result<InvokeResponse, ClientError> {
        let request = InvokeRequest {
            target,
            offset: offset.into(),
        };
        match self.request(Packet::InvokeRequest(request)).await? {
            Packet::InvokeResponse(resp) => Ok(resp),
            other => Err(unexpected(PacketKind::InvokeRequest, &other)),
        }
    }

    pub async fn get_result(
        &mut self,
        offset: impl Into<String>,
    ) -> Result<GetResultResponse, ClientError> {
        let request = GetResultRequest {
            offset: offset.into(),
        };
        match self.request(Packet::GetResultRequest(request)).await? {
            Packet::GetResultResponse(resp) => Ok(resp),
            other => Err(unexpected(PacketKind::GetResultRequest, &other)),
        }
    }

    pub async fn clear_results<I>(&mut self, offsets: I) -> Result<ClearResultResponse, ClientError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let request = ClearResultRequest {
            offsets: offsets.into_iter().map(Into::into).collect(),
        };
        match self.request(Packet::ClearResultRequest(request)).await? {
            Packet::ClearResultResponse(resp) => Ok(resp),
            other => Err(unexpected(PacketKind::ClearResultRequest, &other)),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

fn unexpected(request: PacketKind, actual: &Packet) -> ClientError {
    ClientError::UnexpectedResponse {
        request,
        actual: actual.kind(),
    }
}
