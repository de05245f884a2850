//! TFTP Server Implementation
//!
//! A single receive loop owns the server socket and routes every datagram by
//! its source address. Datagrams from a peer with a live transfer go to that
//! transfer's queue; anything else is decoded here, and only a valid read
//! request opens a new [`TransferSession`]. Nothing a client sends can stop
//! the loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::files::FileProvider;
use crate::protocol::{DATAGRAM_SIZE, TftpErrorCode, TftpErrorPacket, TftpPacket, TftpRequest};
use crate::transfer::{TransferConfig, TransferSession};

const DEFAULT_BIND: &str = "127.0.0.1:6060";
const MAX_SESSIONS: usize = 128;

/// Receive buffer size, one byte larger than any valid datagram so oversized
/// packets are seen as such instead of being silently truncated to fit.
const RECV_BUFFER: usize = DATAGRAM_SIZE + 1;

/// TFTP Server configuration
#[derive(Debug, Clone)]
pub struct TftpServerConfig {
    pub bind_address: String,
    pub transfer_config: TransferConfig,
    /// Concurrent transfers allowed before new requests are refused
    pub max_sessions: usize,
}

impl Default for TftpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND.to_string(),
            transfer_config: TransferConfig::default(),
            max_sessions: MAX_SESSIONS,
        }
    }
}

/// Dispatcher-side handle of a running session
struct SessionHandle {
    id: u64,
    inbox: mpsc::Sender<Vec<u8>>,
}

/// Live sessions keyed by peer address
#[derive(Default)]
struct SessionTable {
    sessions: HashMap<SocketAddr, SessionHandle>,
    next_id: u64,
}

impl SessionTable {
    /// Live session for `peer`, pruning one that has already finished
    fn get(&mut self, peer: &SocketAddr) -> Option<&SessionHandle> {
        if self.sessions.get(peer).is_some_and(|h| h.inbox.is_closed()) {
            self.sessions.remove(peer);
        }
        self.sessions.get(peer)
    }

    fn insert(&mut self, peer: SocketAddr, inbox: mpsc::Sender<Vec<u8>>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.sessions.insert(peer, SessionHandle { id, inbox });
        id
    }

    /// Remove `peer` only if it still maps to session `id`
    fn remove(&mut self, peer: &SocketAddr, id: u64) {
        if self.sessions.get(peer).is_some_and(|h| h.id == id) {
            self.sessions.remove(peer);
        }
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// Main TFTP server
pub struct TftpServer {
    config: TftpServerConfig,
    provider: Arc<dyn FileProvider>,
    socket: Option<Arc<UdpSocket>>,
}

impl TftpServer {
    /// Create a new TFTP server with the given configuration
    pub fn new(config: TftpServerConfig, provider: Arc<dyn FileProvider>) -> Self {
        Self {
            config,
            provider,
            socket: None,
        }
    }

    /// Create a server listening on `bind_address` with default transfer settings
    pub fn with_config(bind_address: String, provider: Arc<dyn FileProvider>) -> Self {
        let config = TftpServerConfig {
            bind_address,
            ..Default::default()
        };
        Self::new(config, provider)
    }

    pub fn config(&self) -> &TftpServerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut TftpServerConfig {
        &mut self.config
    }

    /// Bind the server socket. Called by [`run`](Self::run) when needed.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let socket = UdpSocket::bind(&self.config.bind_address)
            .await
            .with_context(|| format!("Failed to bind TFTP server socket to {}", self.config.bind_address))?;

        let local_addr = socket.local_addr().context("Failed to get local address")?;
        tracing::info!("TFTP server listening on {}", local_addr);

        self.socket = Some(Arc::new(socket));
        Ok(local_addr)
    }

    /// Get the local address the server is bound to (if bound)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bind if necessary and serve until the process ends
    pub async fn run(&mut self) -> Result<()> {
        self.serve(CancellationToken::new()).await
    }

    /// Bind if necessary and serve until `shutdown` is cancelled.
    ///
    /// Cancelling also cancels every running session, and this returns once
    /// all of them have stopped.
    pub async fn serve(&mut self, shutdown: CancellationToken) -> Result<()> {
        if self.socket.is_none() {
            self.bind().await?;
        }
        let socket = self.socket.clone().context("TFTP server socket is not bound")?;

        let mut sessions = SessionTable::default();
        let tracker = TaskTracker::new();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(SocketAddr, u64)>();
        let mut buffer = [0u8; RECV_BUFFER];

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("TFTP server shutting down ({} active transfers)", sessions.len());
                    break;
                }
                Some((peer, id)) = done_rx.recv() => {
                    sessions.remove(&peer, id);
                }
                received = socket.recv_from(&mut buffer) => {
                    match received {
                        Ok((len, peer)) => {
                            let ctx = DispatchContext {
                                socket: &socket,
                                shutdown: &shutdown,
                                tracker: &tracker,
                                done_tx: &done_tx,
                            };
                            self.dispatch(&buffer[..len], peer, &mut sessions, ctx);
                        }
                        Err(e) => {
                            tracing::warn!("Error receiving TFTP datagram: {}", e);
                        }
                    }
                }
            }
        }

        tracker.close();
        tracker.wait().await;
        tracing::info!("TFTP server stopped");
        Ok(())
    }

    /// Route one datagram. Never waits, so one client cannot hold up another.
    fn dispatch(&self, packet: &[u8], peer: SocketAddr, sessions: &mut SessionTable, ctx: DispatchContext<'_>) {
        if let Some(handle) = sessions.get(&peer) {
            if handle.inbox.try_send(packet.to_vec()).is_err() {
                tracing::debug!("Session queue for {} is full, dropping datagram", peer);
            }
            return;
        }

        match TftpPacket::decode(packet) {
            Ok(TftpPacket::ReadRequest(request)) => {
                self.handle_read_request(request, peer, sessions, ctx);
            }
            Ok(other) => {
                tracing::debug!("Ignoring {} from {} with no active transfer", other.opcode(), peer);
            }
            Err(e) => {
                tracing::debug!("Dropping malformed datagram from {}: {}", peer, e);
            }
        }
    }

    /// Claim a session slot for `peer` and hand the request to a task that
    /// opens the file and runs the transfer, or answers with an ERROR.
    ///
    /// The slot is taken before the file is opened, so datagrams the peer
    /// sends meanwhile queue in the session's inbox.
    fn handle_read_request(
        &self,
        request: TftpRequest,
        peer: SocketAddr,
        sessions: &mut SessionTable,
        ctx: DispatchContext<'_>,
    ) {
        tracing::info!("RRQ for '{}' in {} mode from {}", request.filename, request.mode, peer);

        let socket = Arc::clone(ctx.socket);

        if sessions.len() >= self.config.max_sessions {
            tracing::warn!("Refusing '{}' for {}: {} transfers active", request.filename, peer, sessions.len());
            let busy = TftpErrorPacket::new(TftpErrorCode::Unknown, "server busy");
            ctx.tracker.spawn(async move {
                send_error(&socket, &busy, peer).await;
            });
            return;
        }

        let (inbox_tx, inbox_rx) = mpsc::channel(self.config.transfer_config.queue_depth.max(1));
        let id = sessions.insert(peer, inbox_tx);

        let provider = Arc::clone(&self.provider);
        let config = self.config.transfer_config.clone();
        let cancel = ctx.shutdown.child_token();
        let done_tx = ctx.done_tx.clone();

        ctx.tracker.spawn(async move {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = provider.open(&request.filename) => Some(res),
            };

            match opened {
                Some(Ok(source)) => {
                    let mut session = TransferSession::new(peer, request, source, socket, inbox_rx, config);
                    // Outcome is logged by the session itself
                    let _ = session.run(cancel).await;
                }
                Some(Err(e)) => {
                    drop(inbox_rx);
                    tracing::warn!("Cannot serve '{}' to {}: {}", request.filename, peer, e);
                    send_error(&socket, &e.to_packet(), peer).await;
                }
                None => {
                    tracing::debug!("Shutdown before '{}' was opened for {}", request.filename, peer);
                }
            }

            let _ = done_tx.send((peer, id));
        });
    }
}

/// Shared state the receive loop lends to each dispatch
#[derive(Clone, Copy)]
struct DispatchContext<'a> {
    socket: &'a Arc<UdpSocket>,
    shutdown: &'a CancellationToken,
    tracker: &'a TaskTracker,
    done_tx: &'a mpsc::UnboundedSender<(SocketAddr, u64)>,
}

/// Send a one-shot ERROR datagram. It is never retransmitted.
async fn send_error(socket: &UdpSocket, error: &TftpErrorPacket, peer: SocketAddr) {
    if let Err(e) = socket.send_to(&error.encode(), peer).await {
        tracing::debug!("Failed to send ERROR to {}: {}", peer, e);
    }
}

/// Run a TFTP server with the given bind address and file provider
///
/// This is a convenience function that creates and runs a TFTP server.
pub async fn run_tftp_server(bind_address: String, provider: Arc<dyn FileProvider>) -> Result<()> {
    let mut server = TftpServer::with_config(bind_address, provider);
    server.run().await
}
