//! Request dispatch and the per-connection frame loop.

use std::sync::Arc;

use hotwire_classfile::{BytecodeEditor, ClassfileEditor};
use hotwire_config::AgentConfig;
use hotwire_proto::{
    read_packet_async, write_packet_async, ClearResultResponse, CompileOutcome, CompileResponse,
    CompiledUnit, Failure, GetResultResponse, HotSwapOutcome, HotSwapResponse, InvokeResponse,
    Packet, PacketKind, ProtocolError, RedefineResponse,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;

use crate::cache::ResultCache;
use crate::compiler::{Compiler, JavacCompiler};
use crate::container::ContainerLookup;
use crate::invoke::InvocationDispatcher;
use crate::redefine::RedefinitionAuthority;
use crate::resolve::InstanceResolver;
use crate::runtime::ManagedRuntime;

/// Shared state behind every session. Cloning is cheap.
#[derive(Clone)]
pub struct Agent {
    authority: Arc<RwLock<RedefinitionAuthority>>,
    dispatcher: Arc<InvocationDispatcher>,
}

pub struct AgentBuilder {
    runtime: Arc<dyn ManagedRuntime>,
    compiler: Arc<dyn Compiler>,
    editor: Arc<dyn BytecodeEditor + Send + Sync>,
    resolver: InstanceResolver,
}

impl AgentBuilder {
    /// Register a container lookup. Lookups are consulted in registration order.
    pub fn lookup(mut self, lookup: Arc<dyn ContainerLookup>) -> Self {
        self.resolver.register(lookup);
        self
    }

    pub fn editor(mut self, editor: Arc<dyn BytecodeEditor + Send + Sync>) -> Self {
        self.editor = editor;
        self
    }

    pub fn build(self) -> Agent {
        let authority = RedefinitionAuthority::with_editor(self.runtime, self.compiler, self.editor);
        Agent {
            authority: Arc::new(RwLock::new(authority)),
            dispatcher: Arc::new(InvocationDispatcher::new(
                self.resolver,
                Arc::new(ResultCache::new()),
            )),
        }
    }
}

impl Agent {
    pub fn builder(runtime: Arc<dyn ManagedRuntime>, compiler: Arc<dyn Compiler>) -> AgentBuilder {
        AgentBuilder {
            runtime,
            compiler,
            editor: Arc::new(ClassfileEditor),
            resolver: InstanceResolver::new(),
        }
    }

    pub fn new(runtime: Arc<dyn ManagedRuntime>, compiler: Arc<dyn Compiler>) -> Self {
        Self::builder(runtime, compiler).build()
    }

    /// A builder for an agent compiling with `javac` as configured.
    pub fn builder_from_config(config: &AgentConfig, runtime: Arc<dyn ManagedRuntime>) -> AgentBuilder {
        Self::builder(
            runtime,
            Arc::new(JavacCompiler::from_config(&config.compiler)),
        )
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        self.dispatcher.cache()
    }

    pub fn authority(&self) -> &Arc<RwLock<RedefinitionAuthority>> {
        &self.authority
    }

    /// Handle one request. Always produces a response; failures become payloads.
    pub async fn dispatch(&self, packet: Packet) -> Packet {
        let kind = packet.kind();
        tracing::debug!(target: "hotwire.session", ?kind, "dispatching");

        match packet {
            Packet::CompileRequest(req) => {
                let authority = self.authority.clone().read_owned().await;
                blocking(kind, move || {
                    let outcome = match authority.compile(&req.units) {
                        Ok(units) => CompileOutcome::Compiled(units),
                        Err(err) => CompileOutcome::Failed {
                            failure: err.to_failure(),
                            diagnostics: err.diagnostics().to_vec(),
                        },
                    };
                    Packet::CompileResponse(CompileResponse { outcome })
                })
                .await
            }
            Packet::RedefineRequest(req) => {
                let mut authority = self.authority.clone().write_owned().await;
                blocking(kind, move || {
                    let unit = CompiledUnit {
                        class_name: req.class_name.clone(),
                        bytecode: req.bytecode,
                    };
                    let result = authority
                        .redefine(&req.class_name, &unit, &req.directives)
                        .map_err(|err| {
                            tracing::warn!(
                                target: "hotwire.redefine",
                                class = %req.class_name,
                                error = %err,
                                "redefinition failed"
                            );
                            err.to_failure()
                        });
                    Packet::RedefineResponse(RedefineResponse {
                        class_name: req.class_name,
                        result,
                    })
                })
                .await
            }
            Packet::HotSwapRequest(req) => {
                let mut authority = self.authority.clone().write_owned().await;
                blocking(kind, move || {
                    let outcome = match authority.hot_swap(&req.units) {
                        Ok(results) => HotSwapOutcome::Applied(results),
                        Err(err) => HotSwapOutcome::CompileFailed {
                            failure: err.to_failure(),
                            diagnostics: err.diagnostics().to_vec(),
                        },
                    };
                    Packet::HotSwapResponse(HotSwapResponse { outcome })
                })
                .await
            }
            Packet::InvokeRequest(req) => {
                let authority = self.authority.clone().read_owned().await;
                let dispatcher = self.dispatcher.clone();
                blocking(kind, move || {
                    let result = dispatcher.invoke(authority.runtime(), &req.target, &req.offset);
                    Packet::InvokeResponse(InvokeResponse {
                        offset: req.offset,
                        result,
                    })
                })
                .await
            }
            Packet::ClearResultRequest(req) => {
                let removed = self.cache().remove_all(req.offsets.iter().map(String::as_str));
                tracing::debug!(
                    target: "hotwire.session",
                    requested = req.offsets.len(),
                    removed = removed.len(),
                    "cleared results"
                );
                Packet::ClearResultResponse(ClearResultResponse { removed })
            }
            Packet::GetResultRequest(req) => {
                let result = self.cache().get(&req.offset);
                Packet::GetResultResponse(GetResultResponse {
                    offset: req.offset,
                    result,
                })
            }
            Packet::CompileResponse(_)
            | Packet::RedefineResponse(_)
            | Packet::InvokeResponse(_)
            | Packet::ClearResultResponse(_)
            | Packet::GetResultResponse(_)
            | Packet::HotSwapResponse(_)
            | Packet::ErrorResponse(_) => Packet::error(Failure::new(
                "UnexpectedPacket",
                format!("{kind:?} is not a request"),
            )),
        }
    }
}

/// Run a handler on the blocking pool; a panic becomes an `ErrorResponse`.
async fn blocking(kind: PacketKind, handler: impl FnOnce() -> Packet + Send + 'static) -> Packet {
    match tokio::task::spawn_blocking(handler).await {
        Ok(packet) => packet,
        Err(err) => {
            let message = if err.is_panic() {
                let panic = err.into_panic();
                panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string())
            } else {
                err.to_string()
            };
            tracing::warn!(target: "hotwire.session", ?kind, error = %message, "handler failed");
            Packet::error(Failure::new(
                "Panic",
                format!("{kind:?} handler failed: {message}"),
            ))
        }
    }
}

/// One controller connection: read a request, dispatch it, write the response.
pub struct Session<S> {
    stream: S,
    agent: Agent,
    max_frame_bytes: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(stream: S, agent: Agent, max_frame_bytes: usize) -> Self {
        Self {
            stream,
            agent,
            max_frame_bytes,
        }
    }

    /// Serve until the peer disconnects (`Ok`) or the stream breaks.
    ///
    /// A request that was already dispatched runs to completion even when
    /// the response can no longer be written.
    pub async fn run(mut self) -> Result<(), ProtocolError> {
        let mut handled: u64 = 0;
        loop {
            let response = match read_packet_async(&mut self.stream, self.max_frame_bytes).await {
                Ok(packet) => self.agent.dispatch(packet).await,
                Err(ProtocolError::ConnectionClosed) => {
                    tracing::info!(target: "hotwire.session", handled, "session ended");
                    return Ok(());
                }
                Err(err) if err.is_fatal() => {
                    if matches!(err, ProtocolError::FrameTooLarge { .. }) {
                        // Best effort: the peer may still be reading.
                        let _ = write_packet_async(&mut self.stream, &Packet::error(err.to_failure())).await;
                    }
                    tracing::warn!(target: "hotwire.session", handled, error = %err, "session aborted");
                    return Err(err);
                }
                Err(err) => {
                    tracing::debug!(target: "hotwire.session", error = %err, "rejected frame");
                    Packet::error(err.to_failure())
                }
            };
            write_packet_async(&mut self.stream, &response).await?;
            handled += 1;
        }
    }
}
