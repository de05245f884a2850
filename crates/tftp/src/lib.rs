//! Read-only TFTP (Trivial File Transfer Protocol) Implementation
//!
//! This crate provides a TFTP server that delivers files over plain UDP as a
//! reliably ordered byte stream, following RFC 1350:
//! - Read requests (RRQ) in octet mode
//! - Fixed 512-byte blocks, each acknowledged before the next is sent
//! - Bounded retransmission with a per-attempt timeout
//! - Many concurrent transfers multiplexed over one socket
//! - Single-payload or directory-backed file providers
//!
//! # Organization
//!
//! - [`protocol`] - packet codec: [`TftpPacket`] and the per-kind types
//!   [`TftpRequest`], [`TftpData`], [`TftpAck`], [`TftpErrorPacket`]
//! - [`files`] - [`FileProvider`] implementations [`SingleFile`] and [`RootDirectory`]
//! - [`transfer`] - the per-peer [`TransferSession`] state machine
//! - [`server`] - [`TftpServer`], the receive loop and session dispatcher
//!
//! # Basic Server Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tftp::{SingleFile, TftpServer, TftpServerConfig, run_tftp_server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Serve one payload for every requested name
//!     let payload = SingleFile::load("./payload").await?;
//!     run_tftp_server("127.0.0.1:6060".to_string(), Arc::new(payload)).await?;
//!
//!     // Or use the server struct for more control
//!     let mut server = TftpServer::new(TftpServerConfig::default(), Arc::new(SingleFile::new(&b"hi"[..])));
//!     let addr = server.bind().await?;
//!     println!("listening on {addr}");
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Working with Packets
//!
//! ```rust
//! use tftp::{TftpAck, TftpPacket, TftpRequest};
//!
//! let rrq = TftpRequest::new("greeting.txt").encode();
//! match TftpPacket::decode(&rrq).unwrap() {
//!     TftpPacket::ReadRequest(request) => assert_eq!(request.filename, "greeting.txt"),
//!     other => panic!("unexpected {:?}", other),
//! }
//!
//! assert_eq!(TftpAck::decode(&TftpAck::new(7).encode()).unwrap().block, 7);
//! ```

pub mod files;
pub mod protocol;
pub mod server;
pub mod transfer;

pub use files::*;
pub use protocol::*;
pub use server::*;
pub use transfer::*;
