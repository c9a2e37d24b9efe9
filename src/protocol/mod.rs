//! Wire protocol shared by the server engine and the client driver.
//!
//! Every exchange starts with a raw opcode token. Variable-length fields
//! travel as frames: a fixed-width header holding the ASCII decimal length,
//! space padded, followed by exactly that many payload bytes.
//!
//! ```text
//! /register <frame: handle>          -> status byte
//! /store <frame: name> <size> <data> -> frame: confirmation or error text
//! /get <frame: name>                 -> status byte [<size> <data>]
//! /dir                               -> frame: listing
//! /leave                             -> (connection closed)
//! ```
//!
//! `<size>` uses the same fixed-width field as a frame header, and `<data>`
//! is streamed in chunks of [`CHUNK_SIZE`].

pub mod frame;
pub mod opcode;

pub use frame::{
    decode_header, encode_header, read_frame, read_header, read_status, write_frame,
    write_header, write_status,
};
pub use opcode::{read_opcode, write_opcode, Opcode};

/// Width of every length and size header in bytes.
pub const HEADER_WIDTH: usize = 1024;

/// Block size used when streaming file contents.
pub const CHUNK_SIZE: usize = 1024;

/// Largest payload accepted in a single frame.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Status byte for an accepted registration or a found file.
pub const STATUS_OK: u8 = b'1';

/// Status byte for a duplicate handle or a missing file.
pub const STATUS_REJECTED: u8 = b'0';

/// Listing text sent when storage holds no files.
pub const EMPTY_DIRECTORY: &str = "Server Directory is empty";

/// Text sent instead of a confirmation when an upload could not be written.
pub const UPLOAD_ABORTED: &str = "Error: File receiving aborted.";
