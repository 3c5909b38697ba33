//! # pharos-protocol
//!
//! Wire protocol implementation for Pharos.
//!
//! The protocol is line-oriented, with ideas borrowed from the Redis
//! protocol (RESP). It aims to be easy to implement, efficient to parse,
//! and human readable.
//!
//! Three kinds of message travel over a connection:
//!
//! - **Request** — a client command sent to the server. The first line is a
//!   4-byte request id followed by the command token (`QUIT`, `PING`,
//!   `GET <key>`, `SET <key>`); `SET` carries its value on a second line.
//! - **Response** — the server's reply to a request, prefixed with the same
//!   request id (`OK`, `PONG`, `GET` plus a value line, `ERR <message>`).
//! - **Update** — an unsolicited key-change notification pushed by the
//!   server whenever any client writes a key. Updates carry no request id
//!   and are marked by a leading `*`.
//!
//! Because updates can interleave with request/response exchanges on the
//! same socket, responses echo the client-chosen request id so the client
//! can correlate them with in-flight requests. The server treats the id as
//! an opaque 32-bit blob. A single request, response, or update is atomic
//! on the wire: frames never interleave with each other mid-frame.
//!
//! Lines are terminated with `\n` on read (an optional preceding `\r` is
//! stripped) and emitted with `\r\n` on write. Update frames are the one
//! exception: they are emitted with bare `\n` separators.
//!
//! Known weakness: a client that picks `*` as the first byte of a request
//! id would make the server's response indistinguishable from a pushed
//! update. [`read_request`] therefore rejects such ids at admission, and
//! the client library never allocates them.

pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use error::ProtocolError;
pub use message::{Command, Request, RequestId, Response, ResponseKind, ServerMessage, Update};
pub use reader::{read_message, read_request};

/// Default port for the Pharos TCP listener.
pub const DEFAULT_PORT: u16 = 7363;

/// Prefix byte that marks a server-pushed update frame.
pub const UPDATE_PREFIX: u8 = b'*';

/// Minimum length of a request line, terminator included
/// (4-byte request id + 4-character command token + `\n`).
pub const MIN_REQUEST_LEN: usize = 9;

/// Minimum length of a response line, terminator included
/// (4-byte request id + `OK` + `\n`).
pub const MIN_RESPONSE_LEN: usize = 7;

/// Command and response tokens as they appear on the wire.
pub mod tokens {
    pub const QUIT: &[u8] = b"QUIT";
    pub const PING: &[u8] = b"PING";
    pub const GET: &[u8] = b"GET";
    pub const SET: &[u8] = b"SET";
    pub const PONG: &[u8] = b"PONG";
    pub const OK: &[u8] = b"OK";
    pub const ERR: &[u8] = b"ERR";
}
