//! Encoding response, request, and update frames.
//!
//! Every encoder produces exactly one well-formed frame as a contiguous
//! byte buffer, so a caller can hand the frame to a queue or socket and
//! rely on it never interleaving with another frame mid-write.

use crate::message::RequestId;
use crate::UPDATE_PREFIX;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Line terminator emitted on write.
pub const TERMINATOR: &[u8] = b"\r\n";

/// Encodes `<id>OK\r\n`.
pub fn encode_ok(id: RequestId) -> Bytes {
    encode_string(id, "OK")
}

/// Encodes `<id><s>\r\n`.
pub fn encode_string(id: RequestId, s: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + s.len() + 2);
    buf.put_slice(id.as_bytes());
    buf.put_slice(s.as_bytes());
    buf.put_slice(TERMINATOR);
    buf.freeze()
}

/// Encodes `<id>ERR <message>\r\n`.
pub fn encode_error(id: RequestId, message: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + 4 + message.len() + 2);
    buf.put_slice(id.as_bytes());
    buf.put_slice(b"ERR ");
    buf.put_slice(message.as_bytes());
    buf.put_slice(TERMINATOR);
    buf.freeze()
}

/// Encodes a multi-line frame: the request id prefixes the first line,
/// lines are joined with `\r\n`, and the whole frame ends with `\r\n`.
///
/// An empty line list encodes to an empty buffer.
pub fn encode_lines(id: RequestId, lines: &[&[u8]]) -> Bytes {
    if lines.is_empty() {
        return Bytes::new();
    }

    let mut buf = BytesMut::new();
    buf.put_slice(id.as_bytes());
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            buf.put_slice(TERMINATOR);
        }
        buf.put_slice(line);
    }
    buf.put_slice(TERMINATOR);
    buf.freeze()
}

/// Encodes an unsolicited update frame: `*<key>\n<value>\n`.
///
/// Update frames carry no request id and terminate lines with bare `\n`,
/// not `\r\n` — the one asymmetry in the protocol, preserved for
/// compatibility with existing clients.
pub fn encode_update(key: &[u8], value: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + key.len() + 1 + value.len() + 1);
    buf.put_u8(UPDATE_PREFIX);
    buf.put_slice(key);
    buf.put_u8(b'\n');
    buf.put_slice(value);
    buf.put_u8(b'\n');
    buf.freeze()
}

/// Encodes `<id>PING\r\n`.
pub fn encode_ping(id: RequestId) -> Bytes {
    encode_string(id, "PING")
}

/// Encodes `<id>QUIT\r\n`.
pub fn encode_quit(id: RequestId) -> Bytes {
    encode_string(id, "QUIT")
}

/// Encodes `<id>GET <key>\r\n`.
pub fn encode_get(id: RequestId, key: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + 4 + key.len() + 2);
    buf.put_slice(id.as_bytes());
    buf.put_slice(b"GET ");
    buf.put_slice(key);
    buf.put_slice(TERMINATOR);
    buf.freeze()
}

/// Encodes `<id>SET <key>\r\n<value>\r\n`.
pub fn encode_set(id: RequestId, key: &[u8], value: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + 4 + key.len() + 2 + value.len() + 2);
    buf.put_slice(id.as_bytes());
    buf.put_slice(b"SET ");
    buf.put_slice(key);
    buf.put_slice(TERMINATOR);
    buf.put_slice(value);
    buf.put_slice(TERMINATOR);
    buf.freeze()
}

/// Writes an `OK` frame to the sink.
pub async fn write_ok<W>(w: &mut W, id: RequestId) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&encode_ok(id)).await
}

/// Writes a single-line string frame to the sink.
pub async fn write_string<W>(w: &mut W, id: RequestId, s: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&encode_string(id, s)).await
}

/// Writes an `ERR` frame to the sink.
pub async fn write_error<W>(w: &mut W, id: RequestId, message: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&encode_error(id, message)).await
}

/// Writes a multi-line frame to the sink.
pub async fn write_lines<W>(w: &mut W, id: RequestId, lines: &[&[u8]]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_lines(id, lines);
    if frame.is_empty() {
        return Ok(());
    }
    w.write_all(&frame).await
}

/// Writes an update frame to the sink.
pub async fn write_update<W>(w: &mut W, key: &[u8], value: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&encode_update(key, value)).await
}
