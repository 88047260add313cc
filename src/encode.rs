//! Parameter binding and the binary value encoders.
use bytes::{Buf, BufMut, BytesMut};

use crate::{
    ext::UsizeExt,
    postgres::{Oid, PgType},
    value::ValueRef,
};

/// Value that can be encoded to be bound to an sql parameter.
pub trait Encode<'q> {
    fn encode(self) -> Encoded<'q>;
}

/// A postgres encoded parameter value.
///
/// Carries the binary representation and the parameter [`Oid`] sent in
/// `Parse`; a NULL is a value of length `-1` on the wire.
#[derive(Debug)]
pub struct Encoded<'q> {
    value: ValueRef<'q>,
    is_null: bool,
    oid: Oid,
}

impl<'q> Encoded<'q> {
    pub(crate) fn new(value: impl Into<ValueRef<'q>>, oid: Oid) -> Self {
        Self { value: value.into(), oid, is_null: false }
    }

    pub(crate) fn owned(value: impl Into<ValueRef<'static>>, oid: Oid) -> Encoded<'static> {
        Encoded { value: value.into(), oid, is_null: false }
    }

    pub(crate) fn inline(value: &[u8], oid: Oid) -> Encoded<'static> {
        Encoded { value: ValueRef::inline(value), oid, is_null: false }
    }

    pub(crate) fn null(oid: Oid) -> Encoded<'static> {
        Encoded { value: ValueRef::inline(&[]), oid, is_null: true }
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn is_null(&self) -> bool {
        self.is_null
    }

    /// The wire length prefix: value length in bytes, `-1` for NULL.
    pub fn size(&self) -> i32 {
        match self.is_null {
            true => -1,
            false => self.value.len().to_i32(),
        }
    }
}

impl Buf for Encoded<'_> {
    fn remaining(&self) -> usize {
        self.value.remaining()
    }

    fn chunk(&self) -> &[u8] {
        self.value.chunk()
    }

    fn advance(&mut self, cnt: usize) {
        self.value.advance(cnt);
    }
}

// ===== Scalar encoders =====

impl Encode<'static> for bool {
    fn encode(self) -> Encoded<'static> {
        Encoded::inline(&[self as u8], Self::OID)
    }
}

macro_rules! encode_be {
    ($($ty:ty),*) => {$(
        impl Encode<'static> for $ty {
            fn encode(self) -> Encoded<'static> {
                Encoded::inline(&self.to_be_bytes(), Self::OID)
            }
        }
    )*};
}

encode_be!(i16, i32, i64, f32, f64);

impl<'q> Encode<'q> for &'q str {
    fn encode(self) -> Encoded<'q> {
        Encoded::new(self, str::OID)
    }
}

impl<'q> Encode<'q> for &'q String {
    fn encode(self) -> Encoded<'q> {
        Encoded::new(self.as_str(), str::OID)
    }
}

impl Encode<'static> for String {
    fn encode(self) -> Encoded<'static> {
        Encoded::owned(self, String::OID)
    }
}

impl<'q> Encode<'q> for &'q [u8] {
    fn encode(self) -> Encoded<'q> {
        Encoded::new(self, <[u8]>::OID)
    }
}

impl Encode<'static> for Vec<u8> {
    fn encode(self) -> Encoded<'static> {
        Encoded::owned(self, Vec::<u8>::OID)
    }
}

impl<'q, T> Encode<'q> for Option<T>
where
    T: Encode<'q> + PgType,
{
    fn encode(self) -> Encoded<'q> {
        match self {
            Some(value) => value.encode(),
            None => Encoded::null(T::OID),
        }
    }
}

// ===== One dimensional arrays =====

/// Write the array header: dimension count, null flag, element oid, and the
/// single `{len, lower_bound}` pair. Empty arrays have zero dimensions.
fn put_array_header(buf: &mut BytesMut, len: usize, elem_oid: Oid) {
    if len == 0 {
        buf.put_i32(0);
        buf.put_i32(0);
        buf.put_u32(elem_oid);
        return;
    }
    buf.put_i32(1);
    buf.put_i32(0);
    buf.put_u32(elem_oid);
    buf.put_i32(len.to_i32());
    // postgres arrays are 1-based
    buf.put_i32(1);
}

macro_rules! encode_be_array {
    ($($ty:ty),*) => {$(
        impl<'a> Encode<'static> for &'a [$ty] {
            fn encode(self) -> Encoded<'static> {
                const SIZE: usize = size_of::<$ty>();
                let mut buf = BytesMut::with_capacity(20 + self.len() * (4 + SIZE));
                put_array_header(&mut buf, self.len(), <$ty>::OID);
                for item in self {
                    buf.put_i32(SIZE as i32);
                    buf.put_slice(&item.to_be_bytes());
                }
                Encoded::owned(buf.freeze(), <$ty>::ARRAY_OID)
            }
        }

        impl Encode<'static> for Vec<$ty> {
            fn encode(self) -> Encoded<'static> {
                self.as_slice().encode()
            }
        }
    )*};
}

encode_be_array!(i16, i32, i64, f64);

impl<'a> Encode<'static> for &'a [&'a str] {
    fn encode(self) -> Encoded<'static> {
        let mut buf = BytesMut::new();
        put_array_header(&mut buf, self.len(), str::OID);
        for item in self {
            buf.put_i32(item.len().to_i32());
            buf.put_slice(item.as_bytes());
        }
        Encoded::owned(buf.freeze(), str::ARRAY_OID)
    }
}

impl Encode<'static> for Vec<String> {
    fn encode(self) -> Encoded<'static> {
        let mut buf = BytesMut::new();
        put_array_header(&mut buf, self.len(), String::OID);
        for item in &self {
            buf.put_i32(item.len().to_i32());
            buf.put_slice(item.as_bytes());
        }
        Encoded::owned(buf.freeze(), String::ARRAY_OID)
    }
}

#[cfg(test)]
mod test {
    use bytes::Buf;

    use super::*;
    use crate::postgres::oid;

    #[test]
    fn null_has_negative_size() {
        let encoded = Option::<i32>::None.encode();
        assert_eq!(encoded.size(), -1);
        assert_eq!(encoded.oid(), oid::INT4);
        assert!(encoded.is_null());
    }

    #[test]
    fn int_is_big_endian() {
        let encoded = 0x01020304i32.encode();
        assert_eq!(encoded.size(), 4);
        assert_eq!(encoded.chunk(), &[1, 2, 3, 4]);
    }

    #[test]
    fn int8_array_layout() {
        // SELECT $1::int8[] with [1, 2, 3]
        let mut encoded = [1i64, 2, 3].as_slice().encode();
        assert_eq!(encoded.oid(), oid::INT8_ARRAY);
        assert_eq!(encoded.get_i32(), 1); // dims
        assert_eq!(encoded.get_i32(), 0); // has nulls
        assert_eq!(encoded.get_u32(), oid::INT8); // element oid
        assert_eq!(encoded.get_i32(), 3); // dimension length
        assert_eq!(encoded.get_i32(), 1); // lower bound
        for expect in [1i64, 2, 3] {
            assert_eq!(encoded.get_i32(), 8);
            assert_eq!(encoded.get_i64(), expect);
        }
        assert!(!encoded.has_remaining());
    }

    #[test]
    fn empty_array_has_zero_dims() {
        let empty: &[i32] = &[];
        let mut encoded = empty.encode();
        assert_eq!(encoded.get_i32(), 0);
        assert_eq!(encoded.get_i32(), 0);
        assert_eq!(encoded.get_u32(), oid::INT4);
        assert!(!encoded.has_remaining());
    }

    #[test]
    fn text_borrows_without_copy() {
        let value = String::from("hello");
        let encoded = value.as_str().encode();
        assert_eq!(encoded.size(), 5);
        assert_eq!(encoded.oid(), oid::TEXT);
    }
}
