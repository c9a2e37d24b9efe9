//! Frame codec: fixed-width decimal length headers and the payloads they
//! announce, plus the single status byte used outside framing.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{HEADER_WIDTH, MAX_FRAME_SIZE, STATUS_OK, STATUS_REJECTED};
use crate::error::{Error, ProtocolError, Result};

/// Fill byte for the unused tail of a header.
const FILL: u8 = b' ';

/// Encode `len` as a left-justified, space-padded header.
pub fn encode_header(len: u64) -> std::result::Result<BytesMut, ProtocolError> {
    encode_header_with_width(len, HEADER_WIDTH)
}

fn encode_header_with_width(
    len: u64,
    width: usize,
) -> std::result::Result<BytesMut, ProtocolError> {
    let digits = len.to_string();
    if digits.len() > width {
        return Err(ProtocolError::HeaderOverflow {
            digits: digits.len(),
            width,
        });
    }

    let mut header = BytesMut::with_capacity(width);
    header.extend_from_slice(digits.as_bytes());
    header.resize(width, FILL);
    Ok(header)
}

/// Decode a header back into a byte count.
pub fn decode_header(raw: &[u8]) -> std::result::Result<u64, ProtocolError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| ProtocolError::InvalidHeader(String::from_utf8_lossy(raw).into_owned()))?;
    let digits = text.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0');

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidHeader(digits.to_string()));
    }
    digits
        .parse()
        .map_err(|_| ProtocolError::InvalidHeader(digits.to_string()))
}

/// Write a header announcing `len` bytes.
pub async fn write_header<W: AsyncWrite + Unpin>(writer: &mut W, len: u64) -> Result<()> {
    let header = encode_header(len)?;
    writer.write_all(&header).await.map_err(Error::Connection)
}

/// Read a full header and decode it.
pub async fn read_header<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64> {
    let mut raw = vec![0u8; HEADER_WIDTH];
    reader
        .read_exact(&mut raw)
        .await
        .map_err(Error::Connection)?;
    Ok(decode_header(&raw)?)
}

/// Write `payload` as one frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    write_header(writer, payload.len() as u64).await?;
    writer.write_all(payload).await.map_err(Error::Connection)
}

/// Read one frame and return its payload.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes> {
    let len = read_header(reader).await?;
    if len > MAX_FRAME_SIZE as u64 {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_SIZE,
        }
        .into());
    }

    let mut payload = BytesMut::zeroed(len as usize);
    reader
        .read_exact(&mut payload)
        .await
        .map_err(Error::Connection)?;
    Ok(payload.freeze())
}

/// Write a single status byte.
pub async fn write_status<W: AsyncWrite + Unpin>(writer: &mut W, ok: bool) -> Result<()> {
    let byte = if ok { STATUS_OK } else { STATUS_REJECTED };
    writer.write_all(&[byte]).await.map_err(Error::Connection)
}

/// Read a single status byte.
pub async fn read_status<R: AsyncRead + Unpin>(reader: &mut R) -> Result<bool> {
    let byte = reader.read_u8().await.map_err(Error::Connection)?;
    match byte {
        STATUS_OK => Ok(true),
        STATUS_REJECTED => Ok(false),
        other => Err(ProtocolError::InvalidStatus(other).into()),
    }
}
