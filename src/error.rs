//! Error types shared by the server engine and the client driver.

use std::io;

/// Violations of the wire protocol's framing or ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Length header did not hold a non-negative decimal integer
    InvalidHeader(String),
    /// Decimal length does not fit in the fixed header width
    HeaderOverflow { digits: usize, width: usize },
    /// Declared frame payload exceeds the allowed maximum
    FrameTooLarge { len: u64, max: usize },
    /// Bytes that do not start any known opcode
    UnknownOpcode(Vec<u8>),
    /// Status byte other than `'0'` or `'1'`
    InvalidStatus(u8),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::InvalidHeader(raw) => write!(f, "Invalid length header: {:?}", raw),
            ProtocolError::HeaderOverflow { digits, width } => {
                write!(f, "Length needs {} digits, header holds {}", digits, width)
            }
            ProtocolError::FrameTooLarge { len, max } => {
                write!(f, "Frame of {} bytes exceeds maximum of {}", len, max)
            }
            ProtocolError::UnknownOpcode(bytes) => {
                write!(f, "Unknown opcode: {}", String::from_utf8_lossy(bytes))
            }
            ProtocolError::InvalidStatus(byte) => write!(f, "Invalid status byte: {:#04x}", byte),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Errors that end a connection.
#[derive(Debug)]
pub enum Error {
    /// Peer sent something the protocol does not allow
    Protocol(ProtocolError),
    /// Socket failure, including the peer closing mid-exchange
    Connection(io::Error),
    /// Local file failure that cannot be reported to the peer
    Storage(io::Error),
}

impl Error {
    /// True when the peer went away rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Connection(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    pub(crate) fn closed_mid_exchange() -> Self {
        Error::Connection(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-exchange",
        ))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Connection(e) => write!(f, "Connection error: {}", e),
            Error::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Protocol(e) => Some(e),
            Error::Connection(e) | Error::Storage(e) => Some(e),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
