//! TFTP Transfer Sessions
//!
//! A [`TransferSession`] delivers one file to one peer, one block at a time:
//! it sends DATA block N, waits for ACK N from the same peer, and only then
//! moves on to block N+1. Unanswered blocks are retransmitted unchanged until
//! the retry budget runs out.
//!
//! Sessions never read the socket themselves. The dispatcher forwards every
//! datagram from the bound peer into the session's inbox, and the session
//! sends through a [`PacketSink`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::files::BlockSource;
use crate::protocol::{BLOCK_SIZE, DataEncoder, HEADER_SIZE, TftpErrorCode, TftpErrorPacket, TftpPacket, TftpRequest};

const TIMEOUT_SECS: u64 = 3;
const MAX_RETRIES: usize = 8;
const QUEUE_DEPTH: usize = 16;

/// Transfer session configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// How long to wait for the ACK of one transmission
    pub timeout: Duration,
    /// Transmissions of a single block before the session gives up
    pub max_retries: usize,
    /// Datagrams buffered per session before the dispatcher drops them
    pub queue_depth: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(TIMEOUT_SECS),
            max_retries: MAX_RETRIES,
            queue_depth: QUEUE_DEPTH,
        }
    }
}

/// Outbound half of the socket a session talks through
#[async_trait]
pub trait PacketSink: Send + Sync {
    async fn send_to(&self, packet: &[u8], peer: SocketAddr) -> io::Result<()>;
}

#[async_trait]
impl PacketSink for UdpSocket {
    async fn send_to(&self, packet: &[u8], peer: SocketAddr) -> io::Result<()> {
        UdpSocket::send_to(self, packet, peer).await.map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no DATA sent yet
    AwaitingRequest,
    /// DATA `block` is in flight
    AwaitingAck { block: u16 },
    Complete,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Why a session ended in [`SessionState::Failed`]
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("no ACK for block {block} after {attempts} transmissions")]
    RetriesExhausted { block: u16, attempts: usize },
    #[error("failed to read file: {0}")]
    Source(#[source] io::Error),
    #[error("failed to send to peer: {0}")]
    Send(#[source] io::Error),
    #[error("peer aborted transfer: {code} - {message}")]
    PeerError { code: TftpErrorCode, message: String },
    #[error("transfer cancelled")]
    Cancelled,
    #[error("session inbox closed")]
    Disconnected,
}

/// Outcome of a completed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    /// DATA blocks delivered, including a trailing empty block
    pub blocks: u64,
    /// File bytes delivered
    pub bytes: u64,
    /// Transmissions beyond the first of each block
    pub retransmissions: u64,
}

enum AckWait {
    Acked,
    TimedOut,
}

/// One peer's download
pub struct TransferSession<S: ?Sized> {
    peer: SocketAddr,
    request: TftpRequest,
    encoder: DataEncoder<BlockSource>,
    sink: Arc<S>,
    inbox: mpsc::Receiver<Vec<u8>>,
    config: TransferConfig,
    state: SessionState,
    summary: TransferSummary,
}

impl<S: PacketSink + ?Sized> TransferSession<S> {
    pub fn new(
        peer: SocketAddr,
        request: TftpRequest,
        source: BlockSource,
        sink: Arc<S>,
        inbox: mpsc::Receiver<Vec<u8>>,
        config: TransferConfig,
    ) -> Self {
        Self {
            peer,
            request,
            encoder: DataEncoder::new(source),
            sink,
            inbox,
            config,
            state: SessionState::AwaitingRequest,
            summary: TransferSummary {
                blocks: 0,
                bytes: 0,
                retransmissions: 0,
            },
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the transfer to a terminal state.
    ///
    /// Returns once the final block is acknowledged, the retry budget of a
    /// block is spent, the source fails, the peer sends an ERROR, or
    /// `cancel` fires. The session is unusable afterwards.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<TransferSummary, TransferError> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            res = self.transfer() => res,
        };

        match &result {
            Ok(summary) => {
                self.state = SessionState::Complete;
                tracing::info!(
                    "Transferred '{}' to {}: {} bytes in {} blocks ({} retransmissions)",
                    self.request.filename,
                    self.peer,
                    summary.bytes,
                    summary.blocks,
                    summary.retransmissions
                );
            }
            Err(e) => {
                self.state = SessionState::Failed;
                tracing::warn!("Failed to transfer '{}' to {}: {}", self.request.filename, self.peer, e);
            }
        }

        // No further datagrams are accepted under this session's identity.
        self.inbox.close();
        result
    }

    async fn transfer(&mut self) -> Result<TransferSummary, TransferError> {
        loop {
            let packet = match self.encoder.encode_next().await {
                Ok(packet) => packet,
                Err(e) => {
                    let notice = TftpErrorPacket::new(TftpErrorCode::Unknown, "read error");
                    if let Err(send_err) = self.sink.send_to(&notice.encode(), self.peer).await {
                        tracing::debug!("Could not notify {} of read error: {}", self.peer, send_err);
                    }
                    return Err(TransferError::Source(e));
                }
            };

            let block = self.encoder.block();
            let payload_len = packet.len() - HEADER_SIZE;
            self.state = SessionState::AwaitingAck { block };

            self.send_block_with_retries(&packet, block).await?;

            self.summary.blocks += 1;
            self.summary.bytes += payload_len as u64;

            // A short block carried the last of the file
            if payload_len < BLOCK_SIZE {
                return Ok(self.summary);
            }
        }
    }

    /// Send a data block with retries and wait for its ACK
    async fn send_block_with_retries(&mut self, packet: &[u8], block: u16) -> Result<(), TransferError> {
        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                self.summary.retransmissions += 1;
                tracing::debug!("Retransmitting block {} to {} (attempt {})", block, self.peer, attempt + 1);
            }

            self.sink
                .send_to(packet, self.peer)
                .await
                .map_err(TransferError::Send)?;

            match self.wait_for_ack(block).await? {
                AckWait::Acked => return Ok(()),
                AckWait::TimedOut => {}
            }
        }

        Err(TransferError::RetriesExhausted {
            block,
            attempts: self.config.max_retries,
        })
    }

    /// Wait up to one timeout for ACK `block`.
    ///
    /// Stale ACKs and anything undecodable are discarded without restarting
    /// the timer.
    async fn wait_for_ack(&mut self, block: u16) -> Result<AckWait, TransferError> {
        let peer = self.peer;
        let inbox = &mut self.inbox;

        let wait = async {
            loop {
                let Some(datagram) = inbox.recv().await else {
                    return Err(TransferError::Disconnected);
                };

                match TftpPacket::decode(&datagram) {
                    Ok(TftpPacket::Ack(ack)) if ack.block == block => return Ok(()),
                    Ok(TftpPacket::Ack(ack)) => {
                        tracing::debug!("Ignoring stale ACK {} from {} (awaiting {})", ack.block, peer, block);
                    }
                    Ok(TftpPacket::Error(error)) => {
                        return Err(TransferError::PeerError {
                            code: error.code,
                            message: error.message,
                        });
                    }
                    Ok(other) => {
                        tracing::debug!("Ignoring unexpected {} from {}", other.opcode(), peer);
                    }
                    Err(e) => {
                        tracing::debug!("Dropping malformed datagram from {}: {}", peer, e);
                    }
                }
            }
        };

        match timeout(self.config.timeout, wait).await {
            Ok(Ok(())) => Ok(AckWait::Acked),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(AckWait::TimedOut),
        }
    }
}
