//! Extension traits for wire buffer operations.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::common::ByteStr;

/// Checked conversion from rust lengths to the protocol's integer widths.
pub trait UsizeExt {
    /// Length is `usize` in rust, while the protocol wants `i32`,
    /// this will panic when overflow instead of wrapping.
    fn to_i32(self) -> i32;
    /// Length is `usize` in rust, while the protocol wants `u16`,
    /// this will panic when overflow instead of wrapping.
    fn to_u16(self) -> u16;
}

impl UsizeExt for usize {
    fn to_i32(self) -> i32 {
        self.try_into().expect("message size too large for protocol")
    }

    fn to_u16(self) -> u16 {
        self.try_into().expect("message size too large for protocol")
    }
}

/// Nul string operation.
pub trait StrExt {
    /// String length plus nul (1).
    fn nul_string_len(&self) -> i32;
}

impl StrExt for str {
    fn nul_string_len(&self) -> i32 {
        self.len().to_i32() + 1/* nul */
    }
}

/// Nul string operation in [`BufMut`].
pub trait BufMutExt {
    /// Write string and nul termination.
    fn put_nul_string(&mut self, string: &str);
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

/// An error when reading a nul terminated wire string.
#[derive(Debug)]
pub enum NulStrError {
    /// The buffer ended before a nul terminator.
    MissingNul,
    /// The string is not valid UTF-8.
    Utf8(std::str::Utf8Error),
}

impl std::error::Error for NulStrError { }

impl std::fmt::Display for NulStrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingNul => f.write_str("string is not nul terminated"),
            Self::Utf8(e) => e.fmt(f),
        }
    }
}

/// Nul string operation in [`Bytes`].
pub trait BytesExt {
    /// Try to read a nul terminated string.
    ///
    /// Using [`ByteStr`] avoids the allocation required by [`String::from_utf8`].
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, NulStrError>;
}

impl BytesExt for Bytes {
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, NulStrError> {
        let end = self
            .iter()
            .position(|e| matches!(e, b'\0'))
            .ok_or(NulStrError::MissingNul)?;
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        ByteStr::from_utf8(me).map_err(NulStrError::Utf8)
    }
}

impl BytesExt for BytesMut {
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, NulStrError> {
        let end = self
            .iter()
            .position(|e| matches!(e, b'\0'))
            .ok_or(NulStrError::MissingNul)?;
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        ByteStr::from_utf8(me.freeze()).map_err(NulStrError::Utf8)
    }
}

/// Helper trait to [`Display`][std::fmt::Display] bytes.
pub trait FmtExt {
    /// Lossy [`Display`][std::fmt::Display] bytes.
    fn lossy(&self) -> LossyFmt<'_>;
}

/// Lossy [`Display`][std::fmt::Display] implementation for bytes.
pub struct LossyFmt<'a>(pub &'a [u8]);

impl FmtExt for [u8] {
    fn lossy(&self) -> LossyFmt<'_> {
        LossyFmt(self)
    }
}

impl std::fmt::Display for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in self.0 {
            if b.is_ascii_graphic() || b.is_ascii_whitespace() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nul_string_roundtrip() {
        let mut buf = BytesMut::new();
        buf.put_nul_string("application_name");
        let mut bytes = buf.freeze();
        assert_eq!(bytes.get_nul_bytestr().unwrap(), "application_name");
        assert!(bytes.is_empty());
    }

    #[test]
    fn missing_nul_is_an_error() {
        let mut bytes = Bytes::from_static(b"no terminator");
        assert!(matches!(bytes.get_nul_bytestr(), Err(NulStrError::MissingNul)));
    }
}
