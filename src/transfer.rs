//! File transfer engine.
//!
//! Moves file contents over a connection as a size header followed by raw
//! bytes in [`CHUNK_SIZE`] blocks. Reads never go past the announced size,
//! so the next opcode on the stream is left untouched.
//!
//! On the receiving side, local write failures are split in two:
//! - Recoverable (permission, disk full, quota, read-only, file too large):
//!   the rest of the announced bytes are drained and the caller is told the
//!   transfer was aborted. The partial file stays on disk.
//! - Anything else ends the connection.

use chrono::{DateTime, Local};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    read_header, write_frame, write_header, write_status, CHUNK_SIZE, EMPTY_DIRECTORY,
    UPLOAD_ABORTED,
};
use crate::storage::FileStore;

/// Shown in upload confirmations when the session never registered.
const UNREGISTERED: &str = "(unregistered)";

/// Result of consuming an announced byte stream.
#[derive(Debug)]
pub enum Received {
    /// Every byte was written to the sink
    Complete(u64),
    /// Bytes were drained after the sink failed with a recoverable error
    Aborted { received: u64, reason: io::Error },
}

/// Whether a local write failure can be reported to the peer while keeping
/// the connection open.
pub fn is_recoverable(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    #[cfg(unix)]
    if let Some(code) = err.raw_os_error() {
        return matches!(
            code,
            libc::ENOSPC | libc::EDQUOT | libc::EROFS | libc::EFBIG | libc::EACCES | libc::EPERM
        );
    }
    false
}

/// Stream exactly `len` bytes from `source` after a size header.
pub async fn send_file<W, R>(writer: &mut W, source: &mut R, len: u64) -> Result<()>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    write_header(writer, len).await?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent = 0u64;
    while sent < len {
        let want = (len - sent).min(CHUNK_SIZE as u64) as usize;
        let n = source.read(&mut buf[..want]).await.map_err(Error::Storage)?;
        if n == 0 {
            return Err(Error::Storage(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank during transfer",
            )));
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(Error::Connection)?;
        sent += n as u64;
    }

    writer.flush().await.map_err(Error::Connection)
}

/// Read exactly `size` bytes from `reader` into `sink`.
///
/// Partial reads are accepted; a read of zero bytes before `size` is
/// reached means the peer closed the connection.
pub async fn receive_file<R, W>(reader: &mut R, sink: &mut W, size: u64) -> Result<Received>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut received = 0u64;
    let mut failure: Option<io::Error> = None;

    while received < size {
        let want = (size - received).min(CHUNK_SIZE as u64) as usize;
        let n = reader
            .read(&mut buf[..want])
            .await
            .map_err(Error::Connection)?;
        if n == 0 {
            return Err(Error::closed_mid_exchange());
        }
        received += n as u64;

        if failure.is_none() {
            if let Err(e) = sink.write_all(&buf[..n]).await {
                failure = Some(classify(e)?);
            }
        }
    }

    if failure.is_none() {
        if let Err(e) = sink.flush().await {
            failure = Some(classify(e)?);
        }
    }

    Ok(match failure {
        None => Received::Complete(received),
        Some(reason) => Received::Aborted { received, reason },
    })
}

fn classify(err: io::Error) -> Result<io::Error> {
    if is_recoverable(&err) {
        warn!(error = %err, "Write failed, draining remaining bytes");
        Ok(err)
    } else {
        Err(Error::Storage(err))
    }
}

/// Consume `size` bytes and throw them away.
pub async fn drain<R: AsyncRead + Unpin>(reader: &mut R, size: u64) -> Result<()> {
    let mut sink = tokio::io::sink();
    receive_file(reader, &mut sink, size).await.map(|_| ())
}

/// Confirmation text for a finished upload.
pub fn upload_confirmation(handle: Option<&str>, filename: &str, at: DateTime<Local>) -> String {
    format!(
        "{}{}:\nUploaded\n{}",
        handle.unwrap_or(UNREGISTERED),
        at.format("<%Y-%m-%d %H:%M:%S>"),
        filename
    )
}

/// Server side of `/store`: size header, file bytes, then a text frame.
///
/// `filename` is `None` when the framed name was not valid UTF-8.
pub async fn serve_upload<S>(
    stream: &mut S,
    store: &FileStore,
    filename: Option<&str>,
    handle: Option<&str>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let size = read_header(stream).await?;

    let resolved = match filename {
        Some(name) => store.resolve(name).await.map(|path| (name, path)),
        None => Err(crate::storage::FilenameError::Empty),
    };
    let (name, path) = match resolved {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, "Rejected upload");
            drain(stream, size).await?;
            return reply(stream, &format!("Error: {}", e)).await;
        }
    };

    let mut file = match File::create(&path).await {
        Ok(file) => file,
        Err(e) if is_recoverable(&e) => {
            warn!(file = name, error = %e, "Cannot create upload target");
            drain(stream, size).await?;
            return reply(stream, UPLOAD_ABORTED).await;
        }
        Err(e) => return Err(Error::Storage(e)),
    };

    match receive_file(stream, &mut file, size).await? {
        Received::Complete(bytes) => {
            let now = Local::now();
            info!(
                handle = handle.unwrap_or(UNREGISTERED),
                file = name,
                bytes,
                "File uploaded"
            );
            reply(stream, &upload_confirmation(handle, name, now)).await
        }
        Received::Aborted { received, reason } => {
            warn!(file = name, received, error = %reason, "Upload aborted");
            reply(stream, UPLOAD_ABORTED).await
        }
    }
}

/// Server side of `/get`: status byte, then size header and bytes if found.
///
/// Returns whether the file was sent.
pub async fn serve_download<S>(
    stream: &mut S,
    store: &FileStore,
    filename: Option<&str>,
) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let opened = match filename {
        Some(name) => open_stored(store, name).await,
        None => None,
    };

    let Some((mut file, len)) = opened else {
        debug!(file = ?filename, "Requested file not found");
        write_status(stream, false).await?;
        stream.flush().await.map_err(Error::Connection)?;
        return Ok(false);
    };

    write_status(stream, true).await?;
    send_file(stream, &mut file, len).await?;
    debug!(file = ?filename, bytes = len, "File sent");
    Ok(true)
}

async fn open_stored(store: &FileStore, name: &str) -> Option<(File, u64)> {
    let path = store.resolve(name).await.ok()?;
    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(file = name, error = %e, "Cannot open stored file");
            }
            return None;
        }
    };
    let meta = file.metadata().await.ok()?;
    meta.is_file().then(|| (file, meta.len()))
}

/// Listing text for `/dir`.
pub async fn directory_listing(store: &FileStore) -> Result<String> {
    let names = store.list().await.map_err(Error::Storage)?;
    Ok(if names.is_empty() {
        EMPTY_DIRECTORY.to_string()
    } else {
        names.join("\n")
    })
}

/// Server side of `/dir`.
pub async fn serve_listing<S>(stream: &mut S, store: &FileStore) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let listing = directory_listing(store).await?;
    reply(stream, &listing).await
}

async fn reply<S: AsyncWrite + Unpin>(stream: &mut S, text: &str) -> Result<()> {
    write_frame(stream, text.as_bytes()).await?;
    stream.flush().await.map_err(Error::Connection)
}

/// Open a local file for upload and return it with its length.
pub async fn open_local(path: &Path) -> io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let len = file.metadata().await?.len();
    Ok((file, len))
}
