//! Protocol and server error types.
use bytes::{Buf, Bytes};

use crate::{common::ByteStr, ext::BytesExt};

/// An error when translating a buffer from postgres.
///
/// Any occurrence means the byte stream can no longer be trusted, so the
/// connection is closed.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unexpected backend message")]
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    #[error("unknown backend message `{found}`")]
    Unknown {
        found: u8,
    },
    #[error("unknown authentication method `{method}`")]
    UnknownAuth {
        method: u32,
    },
    #[error("invalid message length {len}")]
    InvalidLength {
        msgtype: u8,
        len: i32,
    },
    #[error("malformed message payload: {reason}")]
    Malformed {
        msgtype: u8,
        reason: &'static str,
    },
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unknown { found }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: Some(phase),
        }
    }

    pub(crate) fn unknown_auth(method: u32) -> ProtocolError {
        Self::UnknownAuth { method }
    }

    pub(crate) fn invalid_length(msgtype: u8, len: i32) -> ProtocolError {
        Self::InvalidLength { msgtype, len }
    }

    pub(crate) fn malformed(msgtype: u8, reason: &'static str) -> ProtocolError {
        Self::Malformed { msgtype, reason }
    }
}

impl From<crate::ext::NulStrError> for ProtocolError {
    fn from(err: crate::ext::NulStrError) -> Self {
        Self::Malformed {
            msgtype: 0,
            reason: match err {
                crate::ext::NulStrError::MissingNul => "missing nul terminator",
                crate::ext::NulStrError::Utf8(_) => "invalid utf8 string",
            },
        }
    }
}

/// An error reported by the server via `ErrorResponse`.
///
/// The message body consists of one or more identified fields, followed by
/// a zero byte as a terminator. Fields can appear in any order, and unknown
/// field types are skipped.
#[derive(Debug, Clone, Default)]
pub struct DatabaseError {
    severity: ByteStr,
    code: ByteStr,
    message: ByteStr,
    detail: Option<ByteStr>,
    hint: Option<ByteStr>,
    position: Option<u32>,
    constraint: Option<ByteStr>,
}

impl DatabaseError {
    /// Parse the fields of an `ErrorResponse` or `NoticeResponse` body.
    pub(crate) fn parse(mut body: Bytes) -> DatabaseError {
        let mut me = DatabaseError::default();

        while body.has_remaining() {
            let field = body.get_u8();
            if field == 0 {
                break;
            }
            let Ok(value) = body.get_nul_bytestr() else {
                break;
            };
            match field {
                b'S' => me.severity = value,
                b'C' => me.code = value,
                b'M' => me.message = value,
                b'D' => me.detail = Some(value),
                b'H' => me.hint = Some(value),
                b'P' => me.position = value.parse().ok(),
                b'n' => me.constraint = Some(value),
                // frontends should silently ignore fields of unrecognized type
                _ => {}
            }
        }

        me
    }

    /// Severity, e.g. `ERROR`, `FATAL`, `PANIC`, or a localized equivalent.
    pub fn severity(&self) -> &str {
        &self.severity
    }

    /// The `SQLSTATE` code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// 1-indexed character position of the error within the query string.
    pub fn position(&self) -> Option<u32> {
        self.position
    }

    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    /// Whether the `SQLSTATE` class is `28` (invalid authorization).
    ///
    /// Those errors terminate the session on the server side.
    pub fn is_auth_error(&self) -> bool {
        self.code.as_str().starts_with("28")
    }
}

impl std::error::Error for DatabaseError { }

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if !self.code.is_empty() {
            write!(f, " (SQLSTATE {})", self.code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

impl PartialEq for DatabaseError {
    /// Errors compare by `SQLSTATE` code.
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, BytesMut};

    use super::DatabaseError;

    fn body(fields: &[(u8, &str)]) -> bytes::Bytes {
        let mut buf = BytesMut::new();
        for (tag, value) in fields {
            buf.put_u8(*tag);
            buf.put_slice(value.as_bytes());
            buf.put_u8(0);
        }
        buf.put_u8(0);
        buf.freeze()
    }

    #[test]
    fn parses_fields_in_any_order() {
        let err = DatabaseError::parse(body(&[
            (b'M', "invalid input syntax for type integer"),
            (b'C', "22P02"),
            (b'S', "ERROR"),
            (b'P', "17"),
            (b'X', "ignored unknown field"),
        ]));
        assert_eq!(err.code(), "22P02");
        assert_eq!(err.severity(), "ERROR");
        assert_eq!(err.position(), Some(17));
        assert!(!err.is_auth_error());
    }

    #[test]
    fn auth_class_is_fatal() {
        let err = DatabaseError::parse(body(&[(b'C', "28P01"), (b'M', "password authentication failed")]));
        assert!(err.is_auth_error());
    }

    #[test]
    fn equality_compares_sqlstate() {
        let a = DatabaseError::parse(body(&[(b'C', "22P02"), (b'M', "one")]));
        let b = DatabaseError::parse(body(&[(b'C', "22P02"), (b'M', "different message")]));
        let c = DatabaseError::parse(body(&[(b'C', "42601"), (b'M', "one")]));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
