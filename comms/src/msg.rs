use std::{borrow::Cow, fmt, io};

use crate::{
    Deserialize, Serialize,
    protocol::{self, KIND_SIZE, Kind},
};

/// A connection close status code, numbered like websocket close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// The peer finished on purpose, the connection must not be re-established.
    pub const NORMAL: Self = Self(1000);
    /// Never sent on the wire, reported locally when the stream ended without a close message.
    pub const ABNORMAL: Self = Self(1006);

    /// Whether this code is a normal closure.
    pub fn is_normal(self) -> bool {
        self == Self::NORMAL
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The transport layer message carried over a persistent connection.
#[derive(Debug, PartialEq)]
pub enum Msg<'a> {
    Binary(&'a [u8]),
    Text(Cow<'a, str>),
    Close(CloseCode),
}

impl Msg<'_> {
    /// A short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Binary(_) => "binary",
            Msg::Text(_) => "text",
            Msg::Close(_) => "close",
        }
    }

    fn buf_is_too_small<T>(size: usize, needed: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {needed} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Kind) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid message kind {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Close(code) => {
                buf.extend_from_slice(&protocol::CLOSE.to_be_bytes());
                buf.extend_from_slice(&code.0.to_be_bytes());
                None
            }
            Msg::Text(text) => {
                buf.extend_from_slice(&protocol::TEXT.to_be_bytes());
                Some(text.as_bytes())
            }
            Msg::Binary(bytes) => {
                buf.extend_from_slice(&protocol::BINARY.to_be_bytes());
                Some(*bytes)
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let Some((kind_buf, rest)) = buf.split_first_chunk::<KIND_SIZE>() else {
            return Self::buf_is_too_small(buf.len(), KIND_SIZE);
        };

        match Kind::from_be_bytes(*kind_buf) {
            protocol::CLOSE => {
                let Some(code) = rest.first_chunk::<2>() else {
                    return Self::buf_is_too_small(buf.len(), KIND_SIZE + 2);
                };

                Ok(Self::Close(CloseCode(u16::from_be_bytes(*code))))
            }
            protocol::TEXT => {
                let text = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Text(Cow::Borrowed(text)))
            }
            protocol::BINARY => Ok(Self::Binary(rest)),
            kind => Self::invalid_kind(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &Msg<'_>) -> Vec<u8> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf);
        buf.extend_from_slice(tail.unwrap_or_default());
        buf
    }

    #[test]
    fn close_carries_its_code() {
        let bytes = roundtrip(&Msg::Close(CloseCode(4000)));
        assert_eq!(Msg::deserialize(&bytes).unwrap(), Msg::Close(CloseCode(4000)));
        assert_eq!(Msg::Close(CloseCode::NORMAL).kind(), "close");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let bytes = 7u32.to_be_bytes();
        let err = Msg::deserialize(&bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert!(Msg::deserialize(&[0, 0]).is_err());
        assert!(Msg::deserialize(&[0, 0, 0, 0, 3]).is_err());
    }

    #[test]
    fn invalid_utf8_text_is_rejected() {
        let mut bytes = protocol::TEXT.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        assert!(Msg::deserialize(&bytes).is_err());
    }
}
