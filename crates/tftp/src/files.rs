//! File Sources
//!
//! A [`FileProvider`] turns the filename of a read request into a fresh,
//! forward-only byte source for one transfer. Each call returns its own
//! cursor, so concurrent transfers of the same content never share a read
//! position.

use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::protocol::{TftpErrorCode, TftpErrorPacket};

/// Sequential byte source handed to a transfer session
pub type BlockSource = Box<dyn AsyncRead + Send + Unpin>;

/// Why a requested file could not be opened
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("file not found")]
    NotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("failed to open file: {0}")]
    Io(#[from] std::io::Error),
}

impl OpenError {
    pub fn error_code(&self) -> TftpErrorCode {
        match self {
            Self::NotFound => TftpErrorCode::FileNotFound,
            Self::AccessDenied => TftpErrorCode::AccessViolation,
            Self::Io(_) => TftpErrorCode::Unknown,
        }
    }

    /// The ERROR packet sent to a client whose request failed to open.
    ///
    /// I/O details stay in the server log.
    pub fn to_packet(&self) -> TftpErrorPacket {
        TftpErrorPacket::with_default_message(self.error_code())
    }
}

/// Resolves requested filenames to byte sources
#[async_trait]
pub trait FileProvider: Send + Sync {
    async fn open(&self, filename: &str) -> Result<BlockSource, OpenError>;
}

/// Serves the same in-memory payload for every filename
#[derive(Debug, Clone)]
pub struct SingleFile {
    payload: Bytes,
}

impl SingleFile {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Load the payload from disk once, up front
    pub async fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let payload = tokio::fs::read(path).await?;
        Ok(Self::new(payload))
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[async_trait]
impl FileProvider for SingleFile {
    async fn open(&self, _filename: &str) -> Result<BlockSource, OpenError> {
        Ok(Box::new(Cursor::new(self.payload.clone())))
    }
}

/// Serves files by name from below a root directory
#[derive(Debug, Clone)]
pub struct RootDirectory {
    root: PathBuf,
}

impl RootDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `filename` below the root, rejecting anything that
    /// canonicalizes outside of it.
    async fn resolve(&self, filename: &str) -> Result<PathBuf, OpenError> {
        let relative = filename.trim_start_matches('/');
        if relative.is_empty() || relative.contains('\0') {
            return Err(OpenError::NotFound);
        }

        let root_canon = tokio::fs::canonicalize(&self.root).await?;
        let path_canon = tokio::fs::canonicalize(self.root.join(relative))
            .await
            .map_err(map_io_error)?;

        if !path_canon.starts_with(&root_canon) {
            tracing::warn!("path traversal attempt rejected: {}", filename);
            return Err(OpenError::AccessDenied);
        }

        let metadata = tokio::fs::metadata(&path_canon).await.map_err(map_io_error)?;
        if !metadata.is_file() {
            return Err(OpenError::NotFound);
        }

        Ok(path_canon)
    }
}

#[async_trait]
impl FileProvider for RootDirectory {
    async fn open(&self, filename: &str) -> Result<BlockSource, OpenError> {
        let path = self.resolve(filename).await?;
        let file = tokio::fs::File::open(&path).await.map_err(map_io_error)?;
        tracing::debug!("opened {} for '{}'", path.display(), filename);
        Ok(Box::new(file))
    }
}

fn map_io_error(err: std::io::Error) -> OpenError {
    match err.kind() {
        ErrorKind::NotFound => OpenError::NotFound,
        ErrorKind::PermissionDenied => OpenError::AccessDenied,
        _ => OpenError::Io(err),
    }
}
