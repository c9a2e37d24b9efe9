//! Client side of the file exchange protocol.
//!
//! [`Client`] mirrors the server's session engine: every command writes the
//! opcode and its framed argument, then reads the matching response before
//! returning. Local checks (connection and registration gates, argument and
//! filename validation) run before any byte is written, so a rejected
//! command leaves the session untouched.
//!
//! Any failure while talking to the server drops the connection.

use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::Error;
use crate::protocol::{read_frame, read_header, read_status, write_frame, write_opcode, Opcode};
use crate::storage::{validate_filename, FilenameError};
use crate::transfer::{drain, open_local, receive_file, send_file, Received};

/// Reasons a command did not complete.
#[derive(Debug)]
pub enum ClientError {
    NotConnected,
    AlreadyConnected,
    NotRegistered,
    AlreadyRegistered,
    /// Missing or malformed command argument
    InvalidArguments(String),
    InvalidFilename(FilenameError),
    /// File to upload does not exist locally
    LocalFileMissing(PathBuf),
    /// Connecting to the server failed
    Connect(io::Error),
    /// File to upload could not be read
    LocalRead(io::Error),
    /// Local file could not be written while downloading
    LocalWrite(io::Error),
    /// Exchange with the server failed; the connection was dropped
    Remote(Error),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::NotConnected => write!(f, "Not connected to a server"),
            ClientError::AlreadyConnected => {
                write!(f, "Still connected to server. Leave from the server first")
            }
            ClientError::NotRegistered => write!(f, "No handle registered with the server"),
            ClientError::AlreadyRegistered => write!(f, "Already registered to the server"),
            ClientError::InvalidArguments(msg) => write!(f, "Invalid arguments: {}", msg),
            ClientError::InvalidFilename(e) => write!(f, "{}", e),
            ClientError::LocalFileMissing(path) => {
                write!(f, "File not found: {}", path.display())
            }
            ClientError::Connect(e) => write!(f, "Connection to the server failed: {}", e),
            ClientError::LocalRead(e) => write!(f, "Cannot read file to upload: {}", e),
            ClientError::LocalWrite(e) => write!(f, "Cannot write downloaded file: {}", e),
            ClientError::Remote(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<FilenameError> for ClientError {
    fn from(e: FilenameError) -> Self {
        ClientError::InvalidFilename(e)
    }
}

/// Outcome of `/register`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Accepted,
    /// Another connection holds the handle
    Duplicate,
}

/// Outcome of `/get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    Saved { path: PathBuf, bytes: u64 },
    NotFound,
}

/// Protocol driver for one user session.
pub struct Client {
    conn: Option<BufReader<TcpStream>>,
    handle: Option<String>,
    workdir: PathBuf,
}

impl Client {
    /// Create a disconnected client reading and writing files in `workdir`
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            conn: None,
            handle: None,
            workdir: workdir.into(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Connect to a server. Refused while a connection is open.
    pub async fn join(&mut self, addr: SocketAddr) -> Result<(), ClientError> {
        if self.conn.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        let stream = TcpStream::connect(addr)
            .await
            .map_err(ClientError::Connect)?;
        info!(server = %addr, "Connected");
        self.conn = Some(BufReader::new(stream));
        Ok(())
    }

    /// Send `/leave` and close the connection.
    pub async fn leave(&mut self) -> Result<(), ClientError> {
        let mut conn = self.conn.take().ok_or(ClientError::NotConnected)?;
        self.handle = None;

        let sent = write_opcode(&mut conn, Opcode::Leave).await;
        let _ = conn.shutdown().await;
        sent.map_err(ClientError::Remote)
    }

    /// Claim `handle` on the server.
    pub async fn register(&mut self, handle: &str) -> Result<Registration, ClientError> {
        if self.conn.is_none() {
            return Err(ClientError::NotConnected);
        }
        if self.handle.is_some() {
            return Err(ClientError::AlreadyRegistered);
        }
        if handle.is_empty() {
            return Err(ClientError::InvalidArguments("handle is empty".to_string()));
        }

        let conn = self.connection()?;
        let result = request_register(conn, handle).await;
        if self.settle(result)? {
            debug!(handle, "Registered");
            self.handle = Some(handle.to_string());
            Ok(Registration::Accepted)
        } else {
            Ok(Registration::Duplicate)
        }
    }

    /// Upload `<workdir>/<filename>` and return the server's reply text.
    ///
    /// The reply is either a confirmation or an abort message; both leave
    /// the connection usable.
    pub async fn store(&mut self, filename: &str) -> Result<String, ClientError> {
        self.require_registered()?;
        let path = validate_filename(&self.workdir, filename)?;
        let (mut file, len) = open_local(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ClientError::LocalFileMissing(path.clone()),
            _ => ClientError::LocalRead(e),
        })?;

        let conn = self.connection()?;
        let result = request_store(conn, filename, &mut file, len).await;
        let reply = self.settle(result)?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    /// Fetch `filename` into `<workdir>/<filename>`.
    ///
    /// The local file is only created once the server reports it found.
    pub async fn get(&mut self, filename: &str) -> Result<Download, ClientError> {
        self.require_registered()?;
        let path = validate_filename(&self.workdir, filename)?;

        let conn = self.connection()?;
        let result = request_get(conn, filename, &path).await;
        match self.settle(result)? {
            None => Ok(Download::NotFound),
            Some(Received::Complete(bytes)) => Ok(Download::Saved { path, bytes }),
            Some(Received::Aborted { reason, .. }) => Err(ClientError::LocalWrite(reason)),
        }
    }

    /// Fetch the server's directory listing.
    pub async fn dir(&mut self) -> Result<String, ClientError> {
        self.require_registered()?;

        let conn = self.connection()?;
        let result = request_dir(conn).await;
        let listing = self.settle(result)?;
        Ok(String::from_utf8_lossy(&listing).into_owned())
    }

    fn require_registered(&self) -> Result<(), ClientError> {
        if self.conn.is_none() {
            return Err(ClientError::NotConnected);
        }
        if self.handle.is_none() {
            return Err(ClientError::NotRegistered);
        }
        Ok(())
    }

    fn connection(&mut self) -> Result<&mut BufReader<TcpStream>, ClientError> {
        self.conn.as_mut().ok_or(ClientError::NotConnected)
    }

    /// Drop the connection if an exchange failed.
    fn settle<T>(&mut self, result: Result<T, Error>) -> Result<T, ClientError> {
        result.map_err(|e| {
            debug!(error = %e, "Exchange failed, dropping connection");
            self.conn = None;
            self.handle = None;
            ClientError::Remote(e)
        })
    }
}

async fn request_register<S>(conn: &mut S, handle: &str) -> Result<bool, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_opcode(conn, Opcode::Register).await?;
    write_frame(conn, handle.as_bytes()).await?;
    conn.flush().await.map_err(Error::Connection)?;
    read_status(conn).await
}

async fn request_store<S>(
    conn: &mut S,
    filename: &str,
    file: &mut File,
    len: u64,
) -> Result<Bytes, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_opcode(conn, Opcode::Store).await?;
    write_frame(conn, filename.as_bytes()).await?;
    send_file(conn, file, len).await?;
    read_frame(conn).await
}

/// `None` when the server reports the file missing.
async fn request_get<S>(
    conn: &mut S,
    filename: &str,
    target: &Path,
) -> Result<Option<Received>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_opcode(conn, Opcode::Get).await?;
    write_frame(conn, filename.as_bytes()).await?;
    conn.flush().await.map_err(Error::Connection)?;
    if !read_status(conn).await? {
        return Ok(None);
    }

    let size = read_header(conn).await?;
    match File::create(target).await {
        Ok(mut file) => receive_file(conn, &mut file, size).await.map(Some),
        Err(reason) => {
            drain(conn, size).await?;
            Ok(Some(Received::Aborted {
                received: size,
                reason,
            }))
        }
    }
}

async fn request_dir<S>(conn: &mut S) -> Result<Bytes, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_opcode(conn, Opcode::Dir).await?;
    conn.flush().await.map_err(Error::Connection)?;
    read_frame(conn).await
}
