//! Request, response, and update message types.

use bytes::Bytes;
use std::fmt;

/// A 4-byte opaque token chosen by the client and echoed by the server in
/// each response, used to correlate responses to in-flight requests.
///
/// The server treats the id as uninterpreted bits; uniqueness is the
/// client's responsibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RequestId(pub [u8; 4]);

impl RequestId {
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl From<[u8; 4]> for RequestId {
    fn from(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// A client request, decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: RequestId,
    pub command: Command,
}

/// The set of client commands.
///
/// Keys and values are arbitrary byte sequences not containing a newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Ping,
    Get { key: Bytes },
    Set { key: Bytes, value: Bytes },
}

impl Command {
    /// The wire token for this command.
    pub fn token(&self) -> &'static str {
        match self {
            Command::Quit => "QUIT",
            Command::Ping => "PING",
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
        }
    }
}

/// A server response correlated to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: RequestId,
    pub kind: ResponseKind,
}

/// The set of server responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    Ok,
    Pong,
    Get { value: Bytes },
    Err { message: String },
}

/// An unsolicited server-pushed key change notification.
///
/// Updates carry no request id; `value` is the key's encoded value as the
/// store would return it from a `GET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub key: Bytes,
    pub value: Bytes,
}

/// Anything the server can send on a connection: a response correlated to
/// a request, or a pushed update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Response(Response),
    Update(Update),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_display() {
        let id = RequestId(*b"1234");
        assert_eq!(id.to_string(), "1234");
    }

    #[test]
    fn test_request_id_from_bytes() {
        let id: RequestId = [0x01, 0x02, 0x03, 0x04].into();
        assert_eq!(id.as_bytes(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_command_tokens() {
        assert_eq!(Command::Quit.token(), "QUIT");
        assert_eq!(Command::Ping.token(), "PING");
        assert_eq!(
            Command::Get {
                key: Bytes::from_static(b"k")
            }
            .token(),
            "GET"
        );
        assert_eq!(
            Command::Set {
                key: Bytes::from_static(b"k"),
                value: Bytes::from_static(b"v")
            }
            .token(),
            "SET"
        );
    }
}
