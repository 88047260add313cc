//! Prepared statement and portal naming.
use std::sync::atomic::Ordering;

use bytes::Bytes;

use crate::{common::ByteStr, postgres::Oid};

type AtomicId = std::sync::atomic::AtomicU16;

/// A short server-side object name generated from a process-wide counter.
///
/// The counter wraps; names are opaque and only need to be unique among the
/// live objects of one connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Id([u8; 6]);

impl Id {
    pub(crate) fn unnamed(prefix: u8) -> Self {
        let mut buf = [b'?'; 6];
        buf[0] = prefix;
        Self(buf)
    }

    pub(crate) fn next(atomic: &AtomicId, prefix: u8) -> Self {
        let id = atomic.fetch_add(1, Ordering::SeqCst);
        let mut buf = [prefix, b'0', b'0', b'0', b'0', b'0'];
        let len = buf.len();

        let mut b = itoa::Buffer::new();
        let id = b.format(id);
        let i = id.as_bytes();
        buf[len - i.len()..].copy_from_slice(i);

        Self(buf)
    }

    pub fn as_str(&self) -> &str {
        if self.is_unnamed() {
            return "";
        }
        // SAFETY: string only construction and is immutable
        unsafe { std::str::from_utf8_unchecked(&self.0[..]) }
    }

    pub fn is_unnamed(&self) -> bool {
        self.0[1] == b'?'
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.as_str()).finish()
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

macro_rules! delegate {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, PartialEq, Eq)]
        pub struct $name(Id);

        impl $name {
            pub(crate) fn unnamed() -> Self {
                Self(Id::unnamed($prefix))
            }

            #[allow(unused, reason = "named portals used for chunked execution later")]
            pub(crate) fn next() -> Self {
                static ID: AtomicId = AtomicId::new(0);
                Self(Id::next(&ID, $prefix))
            }
        }

        impl std::ops::Deref for $name {
            type Target = Id;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.as_str()).finish()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

delegate!(StatementName, b's');
delegate!(PortalName, b'p');

/// A prepared statement handle.
///
/// Produced by [`prepare`][crate::query::prepare]; executing one skips the
/// `Parse`/`Describe` round and binds directly. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Statement {
    pub(crate) name: StatementName,
    pub(crate) sql: ByteStr,
    /// `RowDescription` body captured at prepare time, `None` for
    /// statements that return no rows.
    pub(crate) row: Option<(u16, Bytes)>,
    /// Parameter type oids from `ParameterDescription`.
    pub(crate) params: Vec<Oid>,
}

impl Statement {
    /// The server-side prepared statement name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// The sql text this statement was prepared from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of bind parameters the statement expects.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_names_are_unique() {
        let a = StatementName::next();
        let b = StatementName::next();
        assert_ne!(a.as_str(), b.as_str());
        assert!(a.as_str().starts_with('s'));
    }

    #[test]
    fn unnamed_is_empty_string() {
        assert_eq!(StatementName::unnamed().as_str(), "");
        assert_eq!(PortalName::unnamed().as_str(), "");
    }
}
