//! file-exchange: a small file exchange service over TCP
//!
//! Clients register a unique handle, then upload, download, or list files
//! held in a server-side directory.
//!
//! Components:
//! - `protocol`: frame codec and opcode tokens
//! - `registry`: handles held by live connections
//! - `transfer`: chunked file send/receive and directory listing
//! - `session`: per-connection protocol engine
//! - `server`: listener spawning one session per connection
//! - `client`: client-side protocol driver

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;
pub mod transfer;

pub use client::{Client, ClientError, Download, Registration};
pub use config::Config;
pub use error::{Error, ProtocolError};
pub use registry::HandleRegistry;
pub use server::Server;
pub use session::{Session, SessionState};
pub use storage::FileStore;
