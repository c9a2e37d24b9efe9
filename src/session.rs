//! Per-connection protocol engine.
//!
//! A session starts `Unregistered`, becomes `Registered` once a handle is
//! claimed, and ends `Closed` after `/leave`, a protocol violation, or an
//! I/O failure. Requests are strictly sequential: the next opcode is only
//! read after the current response has been written in full.
//!
//! File and directory operations do not require registration on the server
//! side; clients gate them locally, and an absent handle is carried through
//! to logs and confirmation text.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, trace};

use crate::error::{Error, Result};
use crate::protocol::{read_frame, read_opcode, write_status, Opcode};
use crate::registry::HandleRegistry;
use crate::storage::FileStore;
use crate::transfer;

/// Lifecycle of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registered(String),
    Closed,
}

impl SessionState {
    pub fn handle(&self) -> Option<&str> {
        match self {
            SessionState::Registered(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Protocol engine bound to one connection.
pub struct Session<S> {
    stream: BufReader<S>,
    state: SessionState,
    registry: Arc<HandleRegistry>,
    store: Arc<FileStore>,
    idle_timeout: Option<Duration>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, registry: Arc<HandleRegistry>, store: Arc<FileStore>) -> Self {
        Self {
            stream: BufReader::new(stream),
            state: SessionState::Unregistered,
            registry,
            store,
            idle_timeout: None,
        }
    }

    /// Close the connection if no opcode arrives within `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Serve requests until the connection ends.
    ///
    /// The session's handle is released and the stream shut down however
    /// the loop exits. A clean `/leave` or peer close returns `Ok`.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.serve().await;
        self.close().await;
        result
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            let Some(op) = self.next_opcode().await? else {
                trace!("Connection closed by client");
                return Ok(());
            };

            let argument = if op.has_argument() {
                Some(read_frame(&mut self.stream).await?)
            } else {
                None
            };
            // Non-UTF-8 names fall through as None and are rejected downstream
            let text = argument
                .as_deref()
                .and_then(|raw| std::str::from_utf8(raw).ok());

            trace!(%op, argument = ?text, "Processing request");

            match op {
                Opcode::Register => self.register(text).await?,
                Opcode::Store => {
                    transfer::serve_upload(
                        &mut self.stream,
                        &self.store,
                        text,
                        self.state.handle(),
                    )
                    .await?
                }
                Opcode::Get => {
                    transfer::serve_download(&mut self.stream, &self.store, text).await?;
                }
                Opcode::Dir => transfer::serve_listing(&mut self.stream, &self.store).await?,
                Opcode::Leave => {
                    debug!(handle = ?self.state.handle(), "Client left");
                    return Ok(());
                }
            }
        }
    }

    async fn next_opcode(&mut self) -> Result<Option<Opcode>> {
        match self.idle_timeout {
            None => read_opcode(&mut self.stream).await,
            Some(limit) => tokio::time::timeout(limit, read_opcode(&mut self.stream))
                .await
                .map_err(|_| {
                    Error::Connection(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "idle timeout",
                    ))
                })?,
        }
    }

    async fn register(&mut self, handle: Option<&str>) -> Result<()> {
        let accepted = match (&self.state, handle) {
            (SessionState::Unregistered, Some(handle)) if !handle.is_empty() => {
                self.registry.try_register(handle)
            }
            _ => false,
        };

        match handle {
            Some(handle) if accepted => {
                info!(
                    handle,
                    active = ?self.registry.snapshot(),
                    "Handle registered"
                );
                self.state = SessionState::Registered(handle.to_string());
            }
            _ => debug!(handle = ?handle, "Registration rejected"),
        }

        write_status(&mut self.stream, accepted).await?;
        self.stream.flush().await.map_err(Error::Connection)
    }

    async fn close(&mut self) {
        if let Some(handle) = self.state.handle() {
            self.registry.unregister(handle);
            info!(
                handle,
                active = ?self.registry.snapshot(),
                "Handle released"
            );
        }
        self.state = SessionState::Closed;

        if let Err(e) = self.stream.shutdown().await {
            trace!(error = %e, "Shutdown after close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::protocol::{
        read_header, read_status, write_frame, write_header, write_opcode, EMPTY_DIRECTORY,
        UPLOAD_ABORTED,
    };
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::task::JoinHandle;

    struct Harness {
        client: DuplexStream,
        registry: Arc<HandleRegistry>,
        task: JoinHandle<(Result<()>, SessionState)>,
        storage: tempfile::TempDir,
    }

    fn start() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let registry = HandleRegistry::new();
        let (client, server) = tokio::io::duplex(64 * 1024);

        let mut session = Session::new(server, Arc::clone(&registry), store);
        let task = tokio::spawn(async move {
            let result = session.run().await;
            (result, session.state().clone())
        });

        Harness {
            client,
            registry,
            task,
            storage: dir,
        }
    }

    async fn register(client: &mut DuplexStream, handle: &[u8]) -> bool {
        write_opcode(client, Opcode::Register).await.unwrap();
        write_frame(client, handle).await.unwrap();
        read_status(client).await.unwrap()
    }

    #[test]
    fn test_state_handle() {
        assert_eq!(SessionState::Unregistered.handle(), None);
        assert_eq!(SessionState::Registered("a".into()).handle(), Some("a"));
        assert_eq!(SessionState::Closed.handle(), None);
    }

    #[tokio::test]
    async fn test_register_then_leave_releases_handle() {
        let mut h = start();

        assert!(register(&mut h.client, b"alice").await);
        assert!(h.registry.contains("alice"));

        write_opcode(&mut h.client, Opcode::Leave).await.unwrap();
        let (result, state) = h.task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(state, SessionState::Closed);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_second_register_in_session_rejected() {
        let mut h = start();

        assert!(register(&mut h.client, b"alice").await);
        assert!(!register(&mut h.client, b"bob").await);
        assert_eq!(h.registry.snapshot(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_handles() {
        let mut h = start();
        h.registry.try_register("taken");

        assert!(!register(&mut h.client, b"taken").await);
        assert!(!register(&mut h.client, b"").await);
        assert!(!register(&mut h.client, &[0xff, 0xfe]).await);
        assert!(register(&mut h.client, b"fresh").await);
    }

    #[tokio::test]
    async fn test_unknown_opcode_closes_and_releases() {
        let mut h = start();

        assert!(register(&mut h.client, b"alice").await);
        h.client.write_all(b"/delete").await.unwrap();

        let (result, state) = h.task.await.unwrap();
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::UnknownOpcode(_)))
        ));
        assert_eq!(state, SessionState::Closed);
        assert!(!h.registry.contains("alice"));
    }

    #[tokio::test]
    async fn test_disconnect_mid_upload_releases_handle() {
        let mut h = start();

        assert!(register(&mut h.client, b"alice").await);
        write_opcode(&mut h.client, Opcode::Store).await.unwrap();
        write_frame(&mut h.client, b"big.bin").await.unwrap();
        write_header(&mut h.client, 10_000).await.unwrap();
        h.client.write_all(&[0u8; 100]).await.unwrap();
        drop(h.client);

        let (result, state) = h.task.await.unwrap();
        assert!(result.unwrap_err().is_disconnect());
        assert_eq!(state, SessionState::Closed);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_store_get_dir_sequence() {
        let mut h = start();
        let client = &mut h.client;

        write_opcode(client, Opcode::Dir).await.unwrap();
        assert_eq!(&read_frame(client).await.unwrap()[..], EMPTY_DIRECTORY.as_bytes());

        assert!(register(client, b"alice").await);

        write_opcode(client, Opcode::Store).await.unwrap();
        write_frame(client, b"hello.txt").await.unwrap();
        write_header(client, 5).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let reply = read_frame(client).await.unwrap();
        assert!(reply.starts_with(b"alice<"));

        write_opcode(client, Opcode::Dir).await.unwrap();
        assert_eq!(&read_frame(client).await.unwrap()[..], b"hello.txt");

        write_opcode(client, Opcode::Get).await.unwrap();
        write_frame(client, b"hello.txt").await.unwrap();
        assert!(read_status(client).await.unwrap());
        assert_eq!(read_header(client).await.unwrap(), 5);
        let mut body = [0u8; 5];
        client.read_exact(&mut body).await.unwrap();
        assert_eq!(&body, b"hello");

        write_opcode(client, Opcode::Get).await.unwrap();
        write_frame(client, b"missing.txt").await.unwrap();
        assert!(!read_status(client).await.unwrap());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_store_on_full_disk_aborts_and_session_continues() {
        let mut h = start();
        std::os::unix::fs::symlink("/dev/full", h.storage.path().join("full.bin")).unwrap();
        let client = &mut h.client;

        assert!(register(client, b"alice").await);

        write_opcode(client, Opcode::Store).await.unwrap();
        write_frame(client, b"full.bin").await.unwrap();
        write_header(client, 5000).await.unwrap();
        client.write_all(&[7u8; 5000]).await.unwrap();
        assert_eq!(&read_frame(client).await.unwrap()[..], UPLOAD_ABORTED.as_bytes());

        // Every announced byte was consumed, so the next opcode parses
        write_opcode(client, Opcode::Dir).await.unwrap();
        assert_eq!(&read_frame(client).await.unwrap()[..], EMPTY_DIRECTORY.as_bytes());
        assert!(h.registry.contains("alice"));
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let registry = HandleRegistry::new();
        let (_client, server) = tokio::io::duplex(1024);

        let mut session = Session::new(server, registry, store)
            .with_idle_timeout(Some(Duration::from_millis(50)));
        match session.run().await {
            Err(Error::Connection(e)) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(session.state(), &SessionState::Closed);
    }
}
