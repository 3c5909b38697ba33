//! Decoding requests and responses from a byte stream.
//!
//! Callers must hold ONE buffered reader per connection for the lifetime of
//! that connection: frames span multiple lines, and bytes buffered beyond
//! the current frame belong to the next one. Constructing a fresh buffered
//! reader per call would silently discard them.
//!
//! To avoid denial of service, the stream handed to these functions should
//! be bounded by the caller (e.g. a socket with sane read limits).

use crate::error::ProtocolError;
use crate::message::{Command, Request, RequestId, Response, ResponseKind, ServerMessage, Update};
use crate::{tokens, MIN_REQUEST_LEN, MIN_RESPONSE_LEN, UPDATE_PREFIX};
use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Reads one request frame from the stream.
///
/// Errors with [`ProtocolError::Closed`] on a clean EOF at a frame
/// boundary, [`ProtocolError::UnexpectedEof`] when the stream ends
/// mid-frame, and one of the decode errors when the frame is malformed.
pub async fn read_request<R>(reader: &mut R) -> Result<Request, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader, true).await?;

    if line.len() < MIN_REQUEST_LEN - 1 {
        return Err(ProtocolError::RequestTooShort);
    }

    if line[0] == UPDATE_PREFIX {
        // A response to this request could not be told apart from a pushed
        // update, so the id is rejected at admission.
        return Err(ProtocolError::ReservedRequestId);
    }

    let id = request_id(&line);
    let raw = &line[4..];

    if raw.starts_with(tokens::QUIT) {
        return Ok(Request {
            id,
            command: Command::Quit,
        });
    }

    if raw.starts_with(tokens::PING) {
        return Ok(Request {
            id,
            command: Command::Ping,
        });
    }

    if raw.starts_with(tokens::GET) {
        if raw[3] != b' ' {
            return Err(ProtocolError::MissingSpace("GET"));
        }
        let key = Bytes::copy_from_slice(trim_cr(&raw[4..]));
        return Ok(Request {
            id,
            command: Command::Get { key },
        });
    }

    if raw.starts_with(tokens::SET) {
        if raw[3] != b' ' {
            return Err(ProtocolError::MissingSpace("SET"));
        }
        let key = Bytes::copy_from_slice(trim_cr(&raw[4..]));

        let value_line = read_line(reader, false).await?;
        let value = Bytes::copy_from_slice(trim_cr(&value_line));
        return Ok(Request {
            id,
            command: Command::Set { key, value },
        });
    }

    Err(ProtocolError::UnknownCommand(
        String::from_utf8_lossy(raw).into_owned(),
    ))
}

/// Reads one server message — a response or a pushed update — from the
/// stream.
///
/// Update frames are recognized by their leading `*` before any length
/// check, since an update line can be as short as the prefix plus a
/// one-byte key.
pub async fn read_message<R>(reader: &mut R) -> Result<ServerMessage, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader, true).await?;

    if line.first() == Some(&UPDATE_PREFIX) {
        let key = Bytes::copy_from_slice(trim_cr(&line[1..]));
        let value_line = read_line(reader, false).await?;
        let value = Bytes::copy_from_slice(trim_cr(&value_line));
        return Ok(ServerMessage::Update(Update { key, value }));
    }

    // The shortest response line is `<id>OK`, two bytes shorter than the
    // four-character command tokens, so responses use a smaller floor than
    // requests.
    if line.len() < MIN_RESPONSE_LEN - 1 {
        return Err(ProtocolError::RequestTooShort);
    }

    let id = request_id(&line);
    let raw = &line[4..];

    if raw.starts_with(tokens::PONG) {
        return Ok(ServerMessage::Response(Response {
            id,
            kind: ResponseKind::Pong,
        }));
    }

    if raw.starts_with(tokens::OK) {
        return Ok(ServerMessage::Response(Response {
            id,
            kind: ResponseKind::Ok,
        }));
    }

    if raw.starts_with(tokens::GET) {
        let value_line = read_line(reader, false).await?;
        let value = Bytes::copy_from_slice(trim_cr(&value_line));
        return Ok(ServerMessage::Response(Response {
            id,
            kind: ResponseKind::Get { value },
        }));
    }

    if raw.starts_with(tokens::ERR) {
        if raw.len() < 4 || raw[3] != b' ' {
            return Err(ProtocolError::MissingSpace("ERR"));
        }
        let message = String::from_utf8_lossy(trim_cr(&raw[4..])).into_owned();
        return Ok(ServerMessage::Response(Response {
            id,
            kind: ResponseKind::Err { message },
        }));
    }

    Err(ProtocolError::UnknownCommand(
        String::from_utf8_lossy(raw).into_owned(),
    ))
}

/// Strips the optional trailing `\r` from a line read with a bare `\n`
/// terminator.
pub fn trim_cr(data: &[u8]) -> &[u8] {
    match data.last() {
        Some(&b'\r') => &data[..data.len() - 1],
        _ => data,
    }
}

/// Reads one `\n`-terminated line, returning it without the terminator.
///
/// `at_boundary` distinguishes a clean EOF before any bytes were read (the
/// peer closed the connection between frames) from an EOF inside a frame.
async fn read_line<R>(reader: &mut R, at_boundary: bool) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;

    if n == 0 {
        return Err(if at_boundary {
            ProtocolError::Closed
        } else {
            ProtocolError::UnexpectedEof
        });
    }

    if line.last() != Some(&b'\n') {
        return Err(ProtocolError::UnexpectedEof);
    }

    line.pop();
    Ok(line)
}

fn request_id(line: &[u8]) -> RequestId {
    let mut id = [0u8; 4];
    id.copy_from_slice(&line[..4]);
    RequestId(id)
}
