use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hotwire_config::ServerConfig;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::Instrument;

use crate::session::{Agent, Session};

/// Accepts controller connections and runs one [`Session`] task per connection.
pub struct AgentServer {
    listener: TcpListener,
    agent: Agent,
    max_frame_bytes: usize,
    next_session_id: AtomicU64,
}

impl AgentServer {
    pub async fn bind(config: &ServerConfig, agent: Agent) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen.as_str()).await.map_err(|err| {
            io::Error::new(err.kind(), format!("failed to bind {}: {err}", config.listen))
        })?;
        Ok(Self::from_listener(listener, agent, config.max_frame_bytes))
    }

    pub fn from_listener(listener: TcpListener, agent: Agent, max_frame_bytes: usize) -> Self {
        Self {
            listener,
            agent,
            max_frame_bytes,
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let addr = self.local_addr()?;
        tracing::info!(target: "hotwire.server", %addr, "agent listening");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(target: "hotwire.server", %addr, "agent stopped accepting");
                        return Ok(());
                    }
                }
                res = self.listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            // Usually transient (e.g. out of file descriptors).
                            tracing::warn!(target: "hotwire.server", error = %err, "accept failed");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            continue;
                        }
                    };
                    let _ = stream.set_nodelay(true);

                    let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                    let span = tracing::info_span!("hotwire.session", session_id, peer = %peer);
                    let session = Session::new(stream, self.agent.clone(), self.max_frame_bytes);
                    tokio::spawn(
                        async move {
                            tracing::info!(target: "hotwire.session", "session started");
                            if let Err(err) = session.run().await {
                                tracing::debug!(target: "hotwire.session", error = %err, "session closed with error");
                            }
                        }
                        .instrument(span),
                    );
                }
            }
        }
    }
}
