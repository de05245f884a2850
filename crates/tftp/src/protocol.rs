//! TFTP Packet Codec
//!
//! Encoding and decoding of the four packet kinds exchanged by a read-only
//! TFTP server (RFC 1350). Every packet starts with a 2-byte big-endian
//! opcode followed by kind-specific fields:
//!
//! ```text
//! RRQ   | 01 | Filename | 0 | Mode | 0 |
//! DATA  | 03 | Block#   | Data (0..=512 bytes) |
//! ACK   | 04 | Block#   |
//! ERROR | 05 | ErrCode  | ErrMsg | 0 |
//! ```
//!
//! Opcode 2 (WRQ) is reserved: it is never encoded, and decoding it yields
//! [`PacketError::UnknownOpCode`] like any other unassigned value.
//!
//! Textual fields are terminated by a single zero byte rather than being
//! length-prefixed, as on the wire of every RFC 1350 implementation.

use std::fmt;
use std::io;
use std::str::FromStr;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest datagram the protocol produces or accepts as DATA.
pub const DATAGRAM_SIZE: usize = 516;

/// Opcode plus block number (or error code).
pub const HEADER_SIZE: usize = 4;

/// Payload bytes carried by a full DATA packet.
pub const BLOCK_SIZE: usize = DATAGRAM_SIZE - HEADER_SIZE;

/// Mode written by [`TftpRequest::encode`] when none is given.
pub const DEFAULT_MODE: &str = "octet";

/// TFTP Protocol Opcodes
///
/// These opcodes identify the type of TFTP packet being sent or received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpOpcode {
    /// Read Request (RRQ) - Opcode 1
    ///
    /// Packet format: | Opcode | Filename | 0 | Mode | 0 |
    ReadRequest = 1,

    /// Data Packet (DATA) - Opcode 3
    ///
    /// Carries one block of file content. A payload shorter than
    /// [`BLOCK_SIZE`] ends the transfer.
    ///
    /// Packet format: | Opcode | Block# | Data |
    Data = 3,

    /// Acknowledgment (ACK) - Opcode 4
    ///
    /// Packet format: | Opcode | Block# |
    Acknowledgment = 4,

    /// Error Packet (ERROR) - Opcode 5
    ///
    /// Packet format: | Opcode | ErrorCode | ErrMsg | 0 |
    Error = 5,
}

impl TftpOpcode {
    /// Convert a u16 value to a TftpOpcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::from_u16(1), Some(TftpOpcode::ReadRequest));
    /// assert_eq!(TftpOpcode::from_u16(2), None); // WRQ is not supported
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ReadRequest),
            3 => Some(Self::Data),
            4 => Some(Self::Acknowledgment),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadRequest => "RRQ",
            Self::Data => "DATA",
            Self::Acknowledgment => "ACK",
            Self::Error => "ERROR",
        }
    }
}

impl From<TftpOpcode> for u16 {
    fn from(opcode: TftpOpcode) -> Self {
        opcode.as_u16()
    }
}

impl fmt::Display for TftpOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// TFTP Error Codes
///
/// Standard error codes as defined in RFC 1350.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpErrorCode {
    /// Error code 0: Not defined, see error message
    Unknown = 0,

    /// Error code 1: File not found
    FileNotFound = 1,

    /// Error code 2: Access violation
    ///
    /// Includes requests for files outside the served directory tree.
    AccessViolation = 2,

    /// Error code 3: Disk full or allocation exceeded
    DiskFull = 3,

    /// Error code 4: Illegal TFTP operation
    IllegalOperation = 4,

    /// Error code 5: Unknown transfer ID
    UnknownTransferId = 5,

    /// Error code 6: File already exists
    FileAlreadyExists = 6,

    /// Error code 7: No such user
    NoSuchUser = 7,
}

impl TftpErrorCode {
    /// Convert a u16 value to a TftpErrorCode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpErrorCode;
    ///
    /// assert_eq!(TftpErrorCode::from_u16(1), Some(TftpErrorCode::FileNotFound));
    /// assert_eq!(TftpErrorCode::from_u16(99), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::AccessViolation),
            3 => Some(Self::DiskFull),
            4 => Some(Self::IllegalOperation),
            5 => Some(Self::UnknownTransferId),
            6 => Some(Self::FileAlreadyExists),
            7 => Some(Self::NoSuchUser),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the default error message for this error code
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpErrorCode;
    ///
    /// assert_eq!(TftpErrorCode::FileNotFound.default_message(), "File not found");
    /// ```
    pub fn default_message(self) -> &'static str {
        match self {
            Self::Unknown => "Undefined error",
            Self::FileNotFound => "File not found",
            Self::AccessViolation => "Access violation",
            Self::DiskFull => "Disk full or allocation exceeded",
            Self::IllegalOperation => "Illegal TFTP operation",
            Self::UnknownTransferId => "Unknown transfer ID",
            Self::FileAlreadyExists => "File already exists",
            Self::NoSuchUser => "No such user",
        }
    }
}

impl From<TftpErrorCode> for u16 {
    fn from(error_code: TftpErrorCode) -> Self {
        error_code.as_u16()
    }
}

impl fmt::Display for TftpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.as_u16())
    }
}

/// TFTP Transfer Modes
///
/// RFC 1350 names three modes. Only octet is served; the others are
/// recognized so they can be refused by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// Binary mode, data is transferred as-is. Mode string: "octet"
    Octet,
    /// Text mode with CR-LF line endings. Mode string: "netascii"
    NetAscii,
    /// Obsolete mail delivery mode. Mode string: "mail"
    Mail,
}

impl TransferMode {
    /// Parse a transfer mode from a string
    ///
    /// The comparison is case-insensitive.
    ///
    /// # Examples
    /// ```
    /// use tftp::TransferMode;
    ///
    /// assert_eq!(TransferMode::from_str_opt("OCTET"), Some(TransferMode::Octet));
    /// assert_eq!(TransferMode::from_str_opt("Netascii"), Some(TransferMode::NetAscii));
    /// assert_eq!(TransferMode::from_str_opt("binary"), None);
    /// ```
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "octet" => Some(Self::Octet),
            "netascii" => Some(Self::NetAscii),
            "mail" => Some(Self::Mail),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Octet => "octet",
            Self::NetAscii => "netascii",
            Self::Mail => "mail",
        }
    }

    /// Only octet transfers are served; no text translation is done.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Octet)
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_opt(s).ok_or_else(|| format!("Unsupported transfer mode: {}", s))
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reasons a datagram could not be decoded.
///
/// Decode failures never carry partially parsed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("packet shorter than an opcode")]
    Truncated,
    #[error("unknown opcode {0}")]
    UnknownOpCode(u16),
    #[error("invalid RRQ")]
    InvalidRequest,
    #[error("only binary transfers supported")]
    UnsupportedMode,
    #[error("invalid DATA")]
    InvalidData,
    #[error("invalid ACK")]
    InvalidAck,
    #[error("invalid ERROR")]
    InvalidError,
}

/// TFTP Read Request (RRQ)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftpRequest {
    /// Requested filename, never empty once decoded
    pub filename: String,
    /// Transfer mode as sent by the client (case preserved)
    pub mode: String,
}

impl TftpRequest {
    /// Create an octet read request
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpRequest;
    ///
    /// let request = TftpRequest::new("greeting.txt");
    /// let decoded = TftpRequest::decode(&request.encode()).unwrap();
    /// assert_eq!(decoded, request);
    /// ```
    pub fn new(filename: impl Into<String>) -> Self {
        Self::with_mode(filename, DEFAULT_MODE)
    }

    pub fn with_mode(filename: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            mode: mode.into(),
        }
    }

    /// Encode as `| 01 | filename | 0 | mode | 0 |`, writing [`DEFAULT_MODE`]
    /// when the mode is empty.
    pub fn encode(&self) -> Vec<u8> {
        let mode = if self.mode.is_empty() { DEFAULT_MODE } else { &self.mode };

        let mut v = Vec::with_capacity(2 + self.filename.len() + 1 + mode.len() + 1);
        v.extend_from_slice(&TftpOpcode::ReadRequest.as_u16().to_be_bytes());
        v.extend_from_slice(self.filename.as_bytes());
        v.push(0);
        v.extend_from_slice(mode.as_bytes());
        v.push(0);
        v
    }

    /// Decode an RRQ.
    ///
    /// Any structural problem (wrong opcode, missing terminator, empty
    /// filename or mode, non UTF-8 text) is reported as
    /// [`PacketError::InvalidRequest`]. A well-formed request for any mode
    /// other than octet is [`PacketError::UnsupportedMode`]. Bytes after the
    /// mode terminator (RFC 2347 options) are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if get_opcode(buf) != Some(TftpOpcode::ReadRequest.as_u16()) {
            return Err(PacketError::InvalidRequest);
        }

        let (filename, next) = read_string(buf, 2).ok_or(PacketError::InvalidRequest)?;
        if filename.is_empty() {
            return Err(PacketError::InvalidRequest);
        }

        let (mode, _) = read_string(buf, next).ok_or(PacketError::InvalidRequest)?;
        if mode.is_empty() {
            return Err(PacketError::InvalidRequest);
        }

        if !TransferMode::from_str_opt(mode).is_some_and(TransferMode::is_supported) {
            return Err(PacketError::UnsupportedMode);
        }

        Ok(Self::with_mode(filename, mode))
    }
}

/// TFTP Data packet
///
/// The payload borrows from the buffer it was decoded from and must not
/// outlive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TftpData<'a> {
    /// Block number, 1 for the first block of a transfer
    pub block: u16,
    pub payload: &'a [u8],
}

impl<'a> TftpData<'a> {
    pub fn new(block: u16, payload: &'a [u8]) -> Self {
        Self { block, payload }
    }

    /// A payload shorter than a full block ends the transfer
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpData;
    ///
    /// assert!(TftpData::new(1, &[0; 100]).is_last_block());
    /// assert!(!TftpData::new(1, &[0; 512]).is_last_block());
    /// ```
    pub fn is_last_block(&self) -> bool {
        self.payload.len() < BLOCK_SIZE
    }

    pub fn encode(&self) -> Vec<u8> {
        build_data(self.block, self.payload)
    }

    /// Decode a DATA packet of 4 to 516 bytes.
    pub fn decode(buf: &'a [u8]) -> Result<Self, PacketError> {
        if !(HEADER_SIZE..=DATAGRAM_SIZE).contains(&buf.len()) {
            return Err(PacketError::InvalidData);
        }

        if get_opcode(buf) != Some(TftpOpcode::Data.as_u16()) {
            return Err(PacketError::InvalidData);
        }

        Ok(Self {
            block: u16::from_be_bytes([buf[2], buf[3]]),
            payload: &buf[HEADER_SIZE..],
        })
    }
}

/// Produces consecutive DATA packets from a sequential byte source.
///
/// The block counter is advanced before each packet is encoded, so an
/// encoder seeded with block 0 emits block 1 first. Block numbers wrap from
/// 65535 to 0.
#[derive(Debug)]
pub struct DataEncoder<R> {
    block: u16,
    reader: R,
}

impl<R: AsyncRead + Unpin> DataEncoder<R> {
    /// Encoder for a fresh transfer, first packet is block 1
    pub fn new(reader: R) -> Self {
        Self::starting_at(0, reader)
    }

    /// Encoder whose next packet carries `block + 1`
    pub fn starting_at(block: u16, reader: R) -> Self {
        Self { block, reader }
    }

    /// Block number of the most recently encoded packet (0 before the first)
    pub fn block(&self) -> u16 {
        self.block
    }

    /// Encode the next DATA packet with up to [`BLOCK_SIZE`] bytes read from
    /// the source.
    ///
    /// Running out of source bytes is not an error: the packet is simply
    /// shorter than [`DATAGRAM_SIZE`], which signals end of file. Once the
    /// source is exhausted every further packet is header-only.
    pub async fn encode_next(&mut self) -> io::Result<Vec<u8>> {
        self.block = self.block.wrapping_add(1);

        let mut packet = Vec::with_capacity(DATAGRAM_SIZE);
        packet.extend_from_slice(&TftpOpcode::Data.as_u16().to_be_bytes());
        packet.extend_from_slice(&self.block.to_be_bytes());

        (&mut self.reader)
            .take(BLOCK_SIZE as u64)
            .read_to_end(&mut packet)
            .await?;

        Ok(packet)
    }
}

/// TFTP ACK packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TftpAck {
    /// Block number being acknowledged
    pub block: u16,
}

impl TftpAck {
    pub fn new(block: u16) -> Self {
        Self { block }
    }

    pub fn encode(&self) -> Vec<u8> {
        build_ack(self.block)
    }

    /// Decode an ACK. Bytes beyond the block number are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_SIZE || get_opcode(buf) != Some(TftpOpcode::Acknowledgment.as_u16()) {
            return Err(PacketError::InvalidAck);
        }

        Ok(Self::new(u16::from_be_bytes([buf[2], buf[3]])))
    }
}

/// TFTP Error packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftpErrorPacket {
    pub code: TftpErrorCode,
    /// Human-readable error message
    pub message: String,
}

impl TftpErrorPacket {
    /// Create a new error packet with a custom message
    ///
    /// # Examples
    /// ```
    /// use tftp::{TftpErrorCode, TftpErrorPacket};
    ///
    /// let error = TftpErrorPacket::new(TftpErrorCode::FileNotFound, "boot.img not found");
    /// assert_eq!(TftpErrorPacket::decode(&error.encode()).unwrap(), error);
    /// ```
    pub fn new(code: TftpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn with_default_message(code: TftpErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn file_not_found() -> Self {
        Self::with_default_message(TftpErrorCode::FileNotFound)
    }

    pub fn access_violation() -> Self {
        Self::with_default_message(TftpErrorCode::AccessViolation)
    }

    pub fn encode(&self) -> Vec<u8> {
        build_error(self.code, &self.message)
    }

    /// Decode an ERROR packet. The message must be zero-terminated and the
    /// error code must be one RFC 1350 defines.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_SIZE || get_opcode(buf) != Some(TftpOpcode::Error.as_u16()) {
            return Err(PacketError::InvalidError);
        }

        let code =
            TftpErrorCode::from_u16(u16::from_be_bytes([buf[2], buf[3]])).ok_or(PacketError::InvalidError)?;
        let (message, _) = read_string(buf, HEADER_SIZE).ok_or(PacketError::InvalidError)?;

        Ok(Self::new(code, message))
    }
}

impl fmt::Display for TftpErrorPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Any packet this crate can decode, discriminated by its opcode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TftpPacket<'a> {
    ReadRequest(TftpRequest),
    Data(TftpData<'a>),
    Ack(TftpAck),
    Error(TftpErrorPacket),
}

impl<'a> TftpPacket<'a> {
    /// Peek the opcode and hand the buffer to the matching decoder.
    pub fn decode(buf: &'a [u8]) -> Result<Self, PacketError> {
        let raw = get_opcode(buf).ok_or(PacketError::Truncated)?;
        let opcode = TftpOpcode::from_u16(raw).ok_or(PacketError::UnknownOpCode(raw))?;

        match opcode {
            TftpOpcode::ReadRequest => TftpRequest::decode(buf).map(Self::ReadRequest),
            TftpOpcode::Data => TftpData::decode(buf).map(Self::Data),
            TftpOpcode::Acknowledgment => TftpAck::decode(buf).map(Self::Ack),
            TftpOpcode::Error => TftpErrorPacket::decode(buf).map(Self::Error),
        }
    }

    pub fn opcode(&self) -> TftpOpcode {
        match self {
            Self::ReadRequest(_) => TftpOpcode::ReadRequest,
            Self::Data(_) => TftpOpcode::Data,
            Self::Ack(_) => TftpOpcode::Acknowledgment,
            Self::Error(_) => TftpOpcode::Error,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::ReadRequest(request) => request.encode(),
            Self::Data(data) => data.encode(),
            Self::Ack(ack) => ack.encode(),
            Self::Error(error) => error.encode(),
        }
    }
}

/// Find the next null byte in a buffer starting from a given position
pub fn find_zero(buf: &[u8], start: usize) -> Option<usize> {
    buf.get(start..)?.iter().position(|&b| b == 0).map(|pos| start + pos)
}

/// Read a zero-terminated UTF-8 field starting at `start`.
///
/// Returns the field without its terminator and the index just past it.
fn read_string(buf: &[u8], start: usize) -> Option<(&str, usize)> {
    let end = find_zero(buf, start)?;
    let field = std::str::from_utf8(&buf[start..end]).ok()?;
    Some((field, end + 1))
}

/// Build a TFTP Data packet
pub fn build_data(block: u16, data: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(HEADER_SIZE + data.len());
    v.extend_from_slice(&TftpOpcode::Data.as_u16().to_be_bytes());
    v.extend_from_slice(&block.to_be_bytes());
    v.extend_from_slice(data);
    v
}

/// Build a TFTP ACK packet
pub fn build_ack(block: u16) -> Vec<u8> {
    let mut v = Vec::with_capacity(HEADER_SIZE);
    v.extend_from_slice(&TftpOpcode::Acknowledgment.as_u16().to_be_bytes());
    v.extend_from_slice(&block.to_be_bytes());
    v
}

/// Build a TFTP Error packet
pub fn build_error(code: TftpErrorCode, msg: &str) -> Vec<u8> {
    let mut v = Vec::with_capacity(HEADER_SIZE + msg.len() + 1);
    v.extend_from_slice(&TftpOpcode::Error.as_u16().to_be_bytes());
    v.extend_from_slice(&code.as_u16().to_be_bytes());
    v.extend_from_slice(msg.as_bytes());
    v.push(0);
    v
}

/// Get the raw opcode from a TFTP packet
pub fn get_opcode(buf: &[u8]) -> Option<u16> {
    if buf.len() >= 2 {
        Some(u16::from_be_bytes([buf[0], buf[1]]))
    } else {
        None
    }
}

/// Get the TFTP opcode enum from a packet buffer
pub fn get_tftp_opcode(buf: &[u8]) -> Option<TftpOpcode> {
    get_opcode(buf).and_then(TftpOpcode::from_u16)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn rrq(filename: &[u8], mode: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&TftpOpcode::ReadRequest.as_u16().to_be_bytes());
        buf.extend_from_slice(filename);
        buf.push(0);
        buf.extend_from_slice(mode);
        buf.push(0);
        buf
    }

    #[test]
    fn test_tftp_opcode_conversion() {
        assert_eq!(TftpOpcode::ReadRequest.as_u16(), 1);
        assert_eq!(TftpOpcode::Data.as_u16(), 3);
        assert_eq!(TftpOpcode::Acknowledgment.as_u16(), 4);
        assert_eq!(TftpOpcode::Error.as_u16(), 5);
        assert_eq!(TftpOpcode::from_u16(2), None);
        assert_eq!(TftpOpcode::from_u16(6), None);
        assert_eq!(TftpOpcode::Acknowledgment.to_string(), "ACK");
    }

    #[test]
    fn test_tftp_error_code_conversion() {
        for value in 0..=7 {
            let code = TftpErrorCode::from_u16(value).unwrap();
            assert_eq!(code.as_u16(), value);
        }
        assert_eq!(TftpErrorCode::from_u16(8), None);
        assert_eq!(TftpErrorCode::NoSuchUser.default_message(), "No such user");
    }

    #[test]
    fn test_transfer_mode() {
        assert_eq!("octet".parse::<TransferMode>(), Ok(TransferMode::Octet));
        assert_eq!("MAIL".parse::<TransferMode>(), Ok(TransferMode::Mail));
        assert!("binary".parse::<TransferMode>().is_err());

        assert!(TransferMode::Octet.is_supported());
        assert!(!TransferMode::NetAscii.is_supported());
        assert!(!TransferMode::Mail.is_supported());
    }

    #[test]
    fn test_rrq_encoding() {
        let packet = TftpRequest::new("greeting.txt").encode();
        assert_eq!(packet, b"\x00\x01greeting.txt\x00octet\x00");

        // An empty mode falls back to octet
        let packet = TftpRequest::with_mode("a", "").encode();
        assert_eq!(packet, b"\x00\x01a\x00octet\x00");
    }

    #[test]
    fn test_rrq_round_trip() {
        let request = TftpRequest::with_mode("boot/pxelinux.0", "OCTET");
        assert_eq!(TftpRequest::decode(&request.encode()), Ok(request));
    }

    #[test]
    fn test_rrq_rejects_empty_fields() {
        assert_eq!(TftpRequest::decode(&rrq(b"", b"octet")), Err(PacketError::InvalidRequest));
        assert_eq!(TftpRequest::decode(&rrq(b"test.txt", b"")), Err(PacketError::InvalidRequest));
    }

    #[test]
    fn test_rrq_rejects_text_modes() {
        assert_eq!(
            TftpRequest::decode(&rrq(b"test.txt", b"netascii")),
            Err(PacketError::UnsupportedMode)
        );
        assert_eq!(
            TftpRequest::decode(&rrq(b"test.txt", b"Netascii")),
            Err(PacketError::UnsupportedMode)
        );
        assert_eq!(
            TftpRequest::decode(&rrq(b"test.txt", b"binary")),
            Err(PacketError::UnsupportedMode)
        );
        assert!(TftpRequest::decode(&rrq(b"test.txt", b"OcTeT")).is_ok());
    }

    #[test]
    fn test_rrq_rejects_malformed() {
        // Wrong opcode
        let mut buf = rrq(b"test.txt", b"octet");
        buf[1] = TftpOpcode::Data.as_u16() as u8;
        assert_eq!(TftpRequest::decode(&buf), Err(PacketError::InvalidRequest));

        // Missing final terminator
        let mut buf = rrq(b"test.txt", b"octet");
        buf.pop();
        assert_eq!(TftpRequest::decode(&buf), Err(PacketError::InvalidRequest));

        // No mode at all
        assert_eq!(TftpRequest::decode(b"\x00\x01test.txt\x00"), Err(PacketError::InvalidRequest));

        // Filename is not UTF-8
        assert_eq!(
            TftpRequest::decode(&rrq(&[0xff, 0xfe], b"octet")),
            Err(PacketError::InvalidRequest)
        );

        assert_eq!(TftpRequest::decode(&[0]), Err(PacketError::InvalidRequest));
        assert_eq!(TftpRequest::decode(&[]), Err(PacketError::InvalidRequest));
    }

    #[test]
    fn test_rrq_ignores_trailing_options() {
        let mut buf = rrq(b"boot.img", b"octet");
        buf.extend_from_slice(b"blksize\x001400\x00");

        let request = TftpRequest::decode(&buf).unwrap();
        assert_eq!(request.filename, "boot.img");
        assert_eq!(request.mode, "octet");
    }

    #[test]
    fn test_data_decode_bounds() {
        assert_eq!(TftpData::decode(&[]), Err(PacketError::InvalidData));
        assert_eq!(TftpData::decode(&[0, 3, 0]), Err(PacketError::InvalidData));

        let oversized = build_data(1, &[0xaa; BLOCK_SIZE + 1]);
        assert_eq!(oversized.len(), DATAGRAM_SIZE + 1);
        assert_eq!(TftpData::decode(&oversized), Err(PacketError::InvalidData));

        let full = build_data(7, &[0xaa; BLOCK_SIZE]);
        let data = TftpData::decode(&full).unwrap();
        assert_eq!(data.block, 7);
        assert_eq!(data.payload.len(), BLOCK_SIZE);
        assert!(!data.is_last_block());

        let empty = TftpData::decode(&[0, 3, 0, 9]).unwrap();
        assert_eq!(empty.block, 9);
        assert!(empty.payload.is_empty());
        assert!(empty.is_last_block());
    }

    #[test]
    fn test_data_decode_rejects_wrong_opcode() {
        assert_eq!(TftpData::decode(&build_ack(1)), Err(PacketError::InvalidData));
    }

    #[tokio::test]
    async fn test_data_encoder_short_file() {
        let mut encoder = DataEncoder::new(Cursor::new(b"0123456789".to_vec()));

        let packet = encoder.encode_next().await.unwrap();
        assert_eq!(packet.len(), HEADER_SIZE + 10);

        let data = TftpData::decode(&packet).unwrap();
        assert_eq!(data.block, 1);
        assert_eq!(data.payload, b"0123456789");
        assert!(data.is_last_block());
        assert_eq!(encoder.block(), 1);
    }

    #[tokio::test]
    async fn test_data_encoder_exact_multiple() {
        let file: Vec<u8> = (0..1024u32).map(|i| i as u8).collect();
        let mut encoder = DataEncoder::new(Cursor::new(file.clone()));

        let first = encoder.encode_next().await.unwrap();
        let second = encoder.encode_next().await.unwrap();
        let third = encoder.encode_next().await.unwrap();

        assert_eq!(first.len(), DATAGRAM_SIZE);
        assert_eq!(second.len(), DATAGRAM_SIZE);
        assert_eq!(third.len(), HEADER_SIZE);

        assert_eq!(TftpData::decode(&first).unwrap().payload, &file[..512]);
        assert_eq!(TftpData::decode(&second).unwrap().payload, &file[512..]);

        let last = TftpData::decode(&third).unwrap();
        assert_eq!(last.block, 3);
        assert!(last.is_last_block());
    }

    #[tokio::test]
    async fn test_data_encoder_wraps_block_number() {
        let mut encoder = DataEncoder::starting_at(u16::MAX - 1, Cursor::new(vec![0u8; 2 * BLOCK_SIZE]));

        let packet = encoder.encode_next().await.unwrap();
        assert_eq!(TftpData::decode(&packet).unwrap().block, u16::MAX);

        let packet = encoder.encode_next().await.unwrap();
        assert_eq!(TftpData::decode(&packet).unwrap().block, 0);
    }

    #[test]
    fn test_ack_codec() {
        let packet = TftpAck::new(42).encode();
        assert_eq!(packet, [0, 4, 0, 42]);
        assert_eq!(TftpAck::decode(&packet), Ok(TftpAck::new(42)));

        assert_eq!(TftpAck::decode(&build_data(42, &[])), Err(PacketError::InvalidAck));
        assert_eq!(TftpAck::decode(&[0, 4, 0]), Err(PacketError::InvalidAck));
    }

    #[test]
    fn test_error_codec() {
        let packet = build_error(TftpErrorCode::FileNotFound, "File not found");
        assert_eq!(&packet[..4], &[0, 5, 0, 1]);
        assert_eq!(&packet[4..packet.len() - 1], b"File not found");
        assert_eq!(packet[packet.len() - 1], 0);

        let decoded = TftpErrorPacket::decode(&packet).unwrap();
        assert_eq!(decoded, TftpErrorPacket::file_not_found());

        let empty = TftpErrorPacket::new(TftpErrorCode::DiskFull, "");
        assert_eq!(TftpErrorPacket::decode(&empty.encode()), Ok(empty));
    }

    #[test]
    fn test_error_decode_rejects_malformed() {
        // Unterminated message
        assert_eq!(
            TftpErrorPacket::decode(b"\x00\x05\x00\x01oops"),
            Err(PacketError::InvalidError)
        );
        // Undefined error code
        assert_eq!(
            TftpErrorPacket::decode(b"\x00\x05\x00\x09oops\x00"),
            Err(PacketError::InvalidError)
        );
        assert_eq!(TftpErrorPacket::decode(&build_ack(1)), Err(PacketError::InvalidError));
    }

    #[test]
    fn test_packet_dispatch() {
        let request = TftpRequest::new("test.txt").encode();
        assert!(matches!(
            TftpPacket::decode(&request),
            Ok(TftpPacket::ReadRequest(r)) if r.filename == "test.txt"
        ));

        let data = build_data(3, b"abc");
        let packet = TftpPacket::decode(&data).unwrap();
        assert_eq!(packet.opcode(), TftpOpcode::Data);
        assert_eq!(packet.encode(), data);

        assert_eq!(TftpPacket::decode(&build_ack(5)), Ok(TftpPacket::Ack(TftpAck::new(5))));

        let error = TftpErrorPacket::access_violation();
        assert_eq!(TftpPacket::decode(&error.encode()), Ok(TftpPacket::Error(error)));
    }

    #[test]
    fn test_packet_dispatch_rejects_unknown() {
        assert_eq!(TftpPacket::decode(&[1]), Err(PacketError::Truncated));
        assert_eq!(
            TftpPacket::decode(b"\x00\x02file\x00octet\x00"),
            Err(PacketError::UnknownOpCode(2))
        );
        assert_eq!(TftpPacket::decode(&[0, 6, 0, 0]), Err(PacketError::UnknownOpCode(6)));
    }

    #[test]
    fn test_find_zero() {
        let buf = b"hello\0world\0";
        assert_eq!(find_zero(buf, 0), Some(5));
        assert_eq!(find_zero(buf, 6), Some(11));
        assert_eq!(find_zero(buf, 12), None);
        assert_eq!(find_zero(buf, 20), None);
    }

    #[test]
    fn test_get_opcode() {
        let data_packet = build_data(1, b"test");
        assert_eq!(get_opcode(&data_packet), Some(TftpOpcode::Data.as_u16()));
        assert_eq!(get_tftp_opcode(&data_packet), Some(TftpOpcode::Data));

        assert_eq!(get_opcode(&[]), None);
        assert_eq!(get_opcode(&[1]), None);
        assert_eq!(get_tftp_opcode(&[0, 2]), None);
    }
}
