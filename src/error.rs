//! `postgate` error types.
use std::{backtrace::Backtrace, fmt, io, str::Utf8Error};

use crate::{
    connection::{AuthError, ParseError, Poisoned},
    fetch::{EmptyQueryError, InvalidCommandTag, TooManyParameters},
    net::TlsError,
    pool::PoolClosed,
    postgres::{DatabaseError, ProtocolError},
    row::{DecodeError, RowNotFound},
};

/// A specialized [`Result`] type for `postgate` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible errors from the `postgate` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub(crate) fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Whether the connection that produced this error must be closed.
    ///
    /// Wire level failures mean the byte stream can no longer be trusted;
    /// server errors terminate the session only for the authorization class
    /// (`SQLSTATE 28xxx`). Value decoding failures and empty results leave
    /// the session usable.
    pub fn is_fatal(&self) -> bool {
        match &self.kind {
            ErrorKind::Io(_) => true,
            ErrorKind::Protocol(_) => true,
            ErrorKind::Tls(_) => true,
            ErrorKind::Auth(_) => true,
            ErrorKind::Poisoned(_) => true,
            ErrorKind::Database(db) => db.is_auth_error(),
            ErrorKind::Config(_) => false,
            ErrorKind::Utf8(_) => false,
            ErrorKind::Decode(_) => false,
            ErrorKind::RowNotFound(_) => false,
            ErrorKind::EmptyQuery(_) => false,
            ErrorKind::TooManyParameters(_) => false,
            ErrorKind::InvalidCommandTag(_) => false,
            ErrorKind::PoolClosed(_) => false,
        }
    }
}

/// All possible error kinds from the `postgate` library.
pub enum ErrorKind {
    /// Configuration or url parsing failure.
    Config(ParseError),
    /// Socket level failure, including unclean connection shutdown.
    Io(io::Error),
    /// The backend byte stream violated the protocol.
    Protocol(ProtocolError),
    /// TLS negotiation failure.
    Tls(TlsError),
    /// Authentication failure on the client side.
    Auth(AuthError),
    /// An error reported by the server.
    Database(DatabaseError),
    /// A row value failed to decode into the requested type.
    Decode(DecodeError),
    /// Postgres returned a non UTF-8 string.
    Utf8(Utf8Error),
    /// A query expecting rows returned none.
    RowNotFound(RowNotFound),
    /// The sql string was empty.
    EmptyQuery(EmptyQueryError),
    /// More bind parameters than the wire format can carry.
    TooManyParameters(TooManyParameters),
    /// Unparsable command completion tag.
    InvalidCommandTag(InvalidCommandTag),
    /// The pool worker has shut down.
    PoolClosed(PoolClosed),
    /// Operation on a connection already closed by an earlier fatal error.
    Poisoned(Poisoned),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<TlsError>e => ErrorKind::Tls(e));
from!(<AuthError>e => ErrorKind::Auth(e));
from!(<DatabaseError>e => ErrorKind::Database(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));
from!(<RowNotFound>e => ErrorKind::RowNotFound(e));
from!(<EmptyQueryError>e => ErrorKind::EmptyQuery(e));
from!(<TooManyParameters>e => ErrorKind::TooManyParameters(e));
from!(<InvalidCommandTag>e => ErrorKind::InvalidCommandTag(e));
from!(<PoolClosed>e => ErrorKind::PoolClosed(e));
from!(<Poisoned>e => ErrorKind::Poisoned(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Tls(e) => e.fmt(f),
            Self::Auth(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
            Self::RowNotFound(e) => e.fmt(f),
            Self::EmptyQuery(e) => e.fmt(f),
            Self::TooManyParameters(e) => e.fmt(f),
            Self::InvalidCommandTag(e) => e.fmt(f),
            Self::PoolClosed(e) => e.fmt(f),
            Self::Poisoned(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn database_error(code: &str) -> Error {
        let mut body = bytes::BytesMut::new();
        for (tag, value) in [(b'C', code), (b'M', "boom"), (b'S', "ERROR")] {
            bytes::BufMut::put_u8(&mut body, tag);
            bytes::BufMut::put_slice(&mut body, value.as_bytes());
            bytes::BufMut::put_u8(&mut body, 0);
        }
        bytes::BufMut::put_u8(&mut body, 0);
        DatabaseError::parse(body.freeze()).into()
    }

    #[test]
    fn fatality_classification() {
        assert!(Error::from(io::Error::from(io::ErrorKind::UnexpectedEof)).is_fatal());
        assert!(Error::from(ProtocolError::unknown(b'?')).is_fatal());
        assert!(Error::from(TlsError::Unsupported).is_fatal());
        assert!(!Error::from(RowNotFound).is_fatal());
        assert!(!Error::from(EmptyQueryError).is_fatal());
    }

    #[test]
    fn server_errors_close_only_auth_class() {
        assert!(database_error("28P01").is_fatal());
        assert!(database_error("28000").is_fatal());
        assert!(!database_error("22P02").is_fatal());
        assert!(!database_error("42601").is_fatal());
    }
}
