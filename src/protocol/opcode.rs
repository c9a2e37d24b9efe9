//! Opcode tokens.
//!
//! Opcodes are written as raw ASCII with no padding or terminator. None is
//! a prefix of another, so a reader can stop as soon as the bytes seen so
//! far spell one out.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, ProtocolError, Result};

/// Operations a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Register,
    Store,
    Get,
    Dir,
    Leave,
}

impl Opcode {
    pub const ALL: [Opcode; 5] = [
        Opcode::Register,
        Opcode::Store,
        Opcode::Get,
        Opcode::Dir,
        Opcode::Leave,
    ];

    /// Bytes sent on the wire.
    pub fn token(self) -> &'static [u8] {
        match self {
            Opcode::Register => b"/register",
            Opcode::Store => b"/store",
            Opcode::Get => b"/get",
            Opcode::Dir => b"/dir",
            Opcode::Leave => b"/leave",
        }
    }

    /// Whether a framed argument follows the token.
    pub fn has_argument(self) -> bool {
        matches!(self, Opcode::Register | Opcode::Store | Opcode::Get)
    }

    /// Match a complete token.
    pub fn from_token(bytes: &[u8]) -> Option<Opcode> {
        Self::ALL.into_iter().find(|op| op.token() == bytes)
    }

    fn is_prefix(bytes: &[u8]) -> bool {
        Self::ALL.iter().any(|op| op.token().starts_with(bytes))
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Tokens are ASCII
        f.write_str(std::str::from_utf8(self.token()).unwrap_or("?"))
    }
}

/// Read the next opcode.
///
/// Returns `Ok(None)` if the peer closed the connection before sending any
/// byte of a new token.
pub async fn read_opcode<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Opcode>> {
    let mut seen = Vec::with_capacity(16);
    let mut byte = [0u8; 1];

    loop {
        let n = reader.read(&mut byte).await.map_err(Error::Connection)?;
        if n == 0 {
            if seen.is_empty() {
                return Ok(None);
            }
            return Err(Error::closed_mid_exchange());
        }

        seen.push(byte[0]);
        if let Some(op) = Opcode::from_token(&seen) {
            return Ok(Some(op));
        }
        if !Opcode::is_prefix(&seen) {
            return Err(ProtocolError::UnknownOpcode(seen).into());
        }
    }
}

/// Write an opcode token.
pub async fn write_opcode<W: AsyncWrite + Unpin>(writer: &mut W, op: Opcode) -> Result<()> {
    writer
        .write_all(op.token())
        .await
        .map_err(Error::Connection)
}
