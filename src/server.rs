//! TCP listener for the file exchange protocol.
//!
//! Accepts connections and runs one [`Session`] per connection on its own
//! task. The accept loop never waits on connection work; when the
//! connection limit is reached, new connections are closed on the spot.

use crate::config::Config;
use crate::registry::HandleRegistry;
use crate::session::Session;
use crate::storage::FileStore;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server instance
pub struct Server {
    config: Config,
    registry: Arc<HandleRegistry>,
    store: Arc<FileStore>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance, opening (or creating) its storage
    pub fn new(config: Config) -> io::Result<Self> {
        let store = FileStore::open(&config.storage_dir)?;

        Ok(Server {
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            registry: HandleRegistry::new(),
            store,
            config,
        })
    }

    /// Bind the configured address
    pub fn bind(&self) -> io::Result<TcpListener> {
        let listener = create_listener(self.config.listen)?;
        TcpListener::from_std(listener)
    }

    /// Bind and serve until the task is dropped
    pub async fn run(&self) -> io::Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Accept connections from `listener` forever
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        info!(address = %listener.local_addr()?, "Server listening");

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => self.spawn_session(stream, addr),
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let Ok(permit) = Arc::clone(&self.connection_limit).try_acquire_owned() else {
            warn!(%peer, "Connection limit reached, closing");
            return;
        };

        info!(%peer, "Client connected");
        let registry = Arc::clone(&self.registry);
        let store = Arc::clone(&self.store);
        let mut session =
            Session::new(stream, registry, store).with_idle_timeout(self.config.idle_timeout);

        tokio::spawn(
            async move {
                match session.run().await {
                    Ok(()) => {}
                    Err(e) if e.is_disconnect() => {
                        warn!("Connection abruptly closed");
                    }
                    Err(e) => warn!(error = %e, "Closing connection"),
                }
                info!("Client disconnected");
                drop(permit);
            }
            .instrument(info_span!("connection", %peer)),
        );
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    /// Number of sessions currently running
    pub fn active_connections(&self) -> usize {
        self.config.max_connections - self.connection_limit.available_permits()
    }
}

/// Create a TCP listener with SO_REUSEADDR so restarts can rebind at once.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    debug!(%addr, "Listener socket bound");

    Ok(socket.into())
}
