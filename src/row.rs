//! Postgres row operation.
//!
//! - [`Row`]
//! - [`Column`]
//! - [`FromRow`]
//! - [`Decode`]
//! - [`Index`]
//! - [`DecodeError`]
use bytes::{Buf, Bytes};
use std::{borrow::Cow, fmt, panic::Location, str::Utf8Error};

use crate::{
    common::ByteStr,
    ext::{BytesExt, FmtExt},
    postgres::{Oid, PgFormat, PgType},
};

// <https://www.postgresql.org/docs/current/protocol-message-formats.html#PROTOCOL-MESSAGE-FORMATS-ROWDESCRIPTION>
// table_oid
// attribute_len
// oid
// data_type_size
// type_modifier
// format_code
const SUFFIX: usize = size_of::<u32>()
    + size_of::<u16>()
    + size_of::<u32>()
    + size_of::<i16>()
    + size_of::<i32>()
    + size_of::<u16>();

const OID_OFFSET: usize = size_of::<u32>() + size_of::<u16>();

const FORMAT_OFFSET: usize = SUFFIX - size_of::<u16>();

/// One result row.
///
/// Keeps the raw `RowDescription` and `DataRow` payloads and decodes cells
/// on demand; both buffers are shared slices of the connection read buffer.
pub struct Row {
    field_len: u16,
    /// `RowDescription` body after the field count.
    body: Bytes,
    /// `DataRow` body after the column count, empty for the description template.
    values: Bytes,
    /// Cell format override.
    ///
    /// A statement level `Describe` reports text formats since the real
    /// formats are only fixed at `Bind` time; the extended query path binds
    /// every result column binary and overrides accordingly.
    format: Option<PgFormat>,
}

impl Row {
    /// Build the row template from a `RowDescription` payload.
    pub(crate) fn new(field_len: u16, body: Bytes) -> Self {
        Self {
            field_len,
            body,
            values: Bytes::new(),
            format: None,
        }
    }

    /// Mark every cell as binary, whatever the description says.
    pub(crate) fn binary(mut self) -> Self {
        self.format = Some(PgFormat::Binary);
        self
    }

    /// Pair the template with one `DataRow` payload.
    pub(crate) fn with_values(&self, values: Bytes) -> Row {
        Self {
            field_len: self.field_len,
            body: self.body.clone(),
            values,
            format: self.format,
        }
    }

    /// Returns `true` if the row contains no columns.
    pub const fn is_empty(&self) -> bool {
        self.field_len == 0
    }

    /// Returns the number of fields/columns in the row.
    pub const fn len(&self) -> u16 {
        self.field_len
    }

    /// Try to get and decode a column by index or name.
    #[track_caller]
    pub fn try_get<I: Index, R: Decode>(&self, idx: I) -> Result<R, DecodeError> {
        let caller = Location::caller();
        self.try_get_inner(idx).map_err(|e| e.relocate(caller))
    }

    fn try_get_inner<I: Index, R: Decode>(&self, idx: I) -> Result<R, DecodeError> {
        let (offset, nul, nth) = idx.position(&self.body, self.field_len)?;

        let name = ByteStr::from_utf8(self.body.slice(offset..nul))?;

        let mut i = 0;
        let mut values = self.values.clone();
        let value = loop {
            let len = values.get_i32();
            let value = match len {
                -1 => None,
                len => Some(values.split_to(len as usize)),
            };
            if i == nth {
                break value;
            }
            i += 1;
        };

        Column::new(name, &self.body[nul + 1..], value, self.format).decode()
    }
}

impl IntoIterator for Row {
    type Item = Result<Column, DecodeError>;

    type IntoIter = IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            field_len: self.field_len,
            body: self.body,
            values: self.values,
            format: self.format,
            iter_n: 0,
        }
    }
}

#[derive(Debug)]
pub struct IntoIter {
    field_len: u16,
    body: Bytes,
    values: Bytes,
    format: Option<PgFormat>,

    iter_n: u16,
}

impl Iterator for IntoIter {
    type Item = Result<Column, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.iter_n == self.field_len {
            return None;
        }

        let field_name = match self.body.get_nul_bytestr() {
            Ok(ok) => ok,
            Err(err) => {
                self.iter_n = self.field_len;
                return Some(Err(err.into()));
            },
        };
        let column = self.body.split_to(SUFFIX);
        let value = match self.values.get_i32() {
            -1 => None,
            len => Some(self.values.split_to(len as usize)),
        };
        self.iter_n += 1;

        Some(Ok(Column::new(field_name, &column, value, self.format)))
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        let mut b = self.body.clone();
        let mut v = self.values.clone();
        for _ in 0..self.field_len {
            let Ok(key) = b.get_nul_bytestr() else { break };
            b.advance(SUFFIX);
            dbg.key(&key);
            match v.get_i32() {
                -1 => dbg.value(&"NULL"),
                len => dbg.value(&v.split_to(len as usize).lossy()),
            };
        }
        dbg.finish()
    }
}

/// One cell of a row, with its column metadata.
#[derive(Debug)]
pub struct Column {
    name: ByteStr,
    oid: Oid,
    format: PgFormat,
    value: Option<Bytes>,
}

impl Column {
    /// `desc` is the column description **after** the field name.
    fn new(name: ByteStr, desc: &[u8], value: Option<Bytes>, format: Option<PgFormat>) -> Self {
        Self {
            name,
            oid: (&mut &desc[OID_OFFSET..]).get_u32(),
            format: format
                .unwrap_or_else(|| PgFormat::from_code((&mut &desc[FORMAT_OFFSET..]).get_u16())),
            value,
        }
    }

    /// Returns the column type [`Oid`].
    pub const fn oid(&self) -> Oid {
        self.oid
    }

    /// Returns the column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wire format this cell arrived in.
    ///
    /// Cells of an extended query are binary; a statement level `Describe`
    /// reports text since formats are only fixed at `Bind` time.
    pub const fn format(&self) -> PgFormat {
        self.format
    }

    pub const fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Clone the inner [`Bytes`], `None` for NULL.
    pub fn value(&self) -> Option<Bytes> {
        self.value.clone()
    }

    /// Decode a value from self.
    pub fn decode<D: Decode>(self) -> Result<D, DecodeError> {
        D::decode(self)
    }

    // ===== decoder support =====

    /// Check the column oid is decodable as `T`.
    pub(crate) fn check<T: PgType + ?Sized>(&self) -> Result<(), DecodeError> {
        if !T::accepts(self.oid) {
            return Err(DecodeError::new(DecodeErrorKind::OidMismatch {
                column: self.name.clone(),
                expect: std::any::type_name::<T>(),
                found: self.oid,
            }));
        }
        Ok(())
    }

    /// The cell bytes, NULL is an error.
    pub(crate) fn bytes(&self) -> Result<&[u8], DecodeError> {
        match &self.value {
            Some(value) => Ok(value),
            None => Err(DecodeError::new(DecodeErrorKind::UnexpectedNull {
                column: self.name.clone(),
            })),
        }
    }

    /// A fixed width binary cell.
    pub(crate) fn fixed<const N: usize>(&self, ty: &'static str) -> Result<[u8; N], DecodeError> {
        let bytes = self.bytes()?;
        bytes
            .try_into()
            .map_err(|_| self.malformed(ty, format!("expected {N} bytes, got {}", bytes.len())))
    }

    /// The cell as UTF-8 text.
    pub(crate) fn text(&self) -> Result<&str, DecodeError> {
        std::str::from_utf8(self.bytes()?).map_err(Into::into)
    }

    pub(crate) fn malformed(
        &self,
        ty: &'static str,
        reason: impl Into<Cow<'static, str>>,
    ) -> DecodeError {
        DecodeError::new(DecodeErrorKind::Malformed {
            column: self.name.clone(),
            ty,
            reason: reason.into(),
            value: self.value.clone(),
        })
    }
}

// ===== Traits =====

/// Type that can be constructed from a row.
pub trait FromRow: Sized {
    /// Construct self from row.
    fn from_row(row: Row) -> Result<Self, DecodeError>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, DecodeError> {
        Ok(row)
    }
}

impl FromRow for () {
    fn from_row(_: Row) -> Result<Self, DecodeError> {
        Ok(())
    }
}

macro_rules! from_row_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t),*> FromRow for ($($t),*,)
        where
            $($t: Decode),*
        {
            fn from_row(row: Row) -> Result<Self, DecodeError> {
                Ok((
                    $(row.try_get($i)?),*,
                ))
            }
        }
    };
}

from_row_tuple!(T0 0);
from_row_tuple!(T0 0, T1 1);
from_row_tuple!(T0 0, T1 1, T2 2);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3);

/// A type that can be constructed from a [`Column`].
pub trait Decode: Sized {
    fn decode(column: Column) -> Result<Self, DecodeError>;
}

impl Decode for Column {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        Ok(column)
    }
}

impl Decode for () {
    fn decode(_: Column) -> Result<Self, DecodeError> {
        Ok(())
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        match column.is_null() {
            true => Ok(None),
            false => T::decode(column).map(Some),
        }
    }
}

impl Decode for bool {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        col.check::<bool>()?;
        match col.format() {
            PgFormat::Binary => Ok(col.fixed::<1>("bool")?[0] != 0),
            PgFormat::Text => match col.text()? {
                "t" | "true" | "1" => Ok(true),
                "f" | "false" | "0" => Ok(false),
                _ => Err(col.malformed("bool", "unrecognized boolean literal")),
            },
        }
    }
}

macro_rules! decode_be {
    ($($ty:ty: $name:literal),*) => {$(
        impl Decode for $ty {
            fn decode(col: Column) -> Result<Self, DecodeError> {
                col.check::<$ty>()?;
                match col.format() {
                    PgFormat::Binary => Ok(<$ty>::from_be_bytes(col.fixed($name)?)),
                    PgFormat::Text => col
                        .text()?
                        .parse()
                        .map_err(|_| col.malformed($name, "invalid numeric literal")),
                }
            }
        }
    )*};
}

decode_be! {
    i16: "int2",
    i32: "int4",
    i64: "int8",
    f32: "float4",
    f64: "float8"
}

impl Decode for String {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        col.check::<String>()?;
        Ok(col.text()?.to_string())
    }
}

impl Decode for ByteStr {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        col.check::<String>()?;
        let Some(bytes) = col.value() else {
            return Err(DecodeError::new(DecodeErrorKind::UnexpectedNull {
                column: ByteStr::copy_from_str(col.name()),
            }));
        };
        Ok(ByteStr::from_utf8(bytes)?)
    }
}

impl Decode for Vec<u8> {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        col.check::<Vec<u8>>()?;
        match col.format() {
            PgFormat::Binary => Ok(col.bytes()?.to_vec()),
            PgFormat::Text => {
                // canonical text form is `\x` followed by hex digits
                let text = col.text()?;
                let Some(hex) = text.strip_prefix("\\x") else {
                    return Err(col.malformed("bytea", "missing \\x prefix"));
                };
                let mut out = Vec::with_capacity(hex.len() / 2);
                let mut chars = hex.as_bytes().chunks_exact(2);
                for pair in &mut chars {
                    let s = std::str::from_utf8(pair).expect("subslice of str");
                    let byte = u8::from_str_radix(s, 16)
                        .map_err(|_| col.malformed("bytea", "invalid hex digit"))?;
                    out.push(byte);
                }
                if !chars.remainder().is_empty() {
                    return Err(col.malformed("bytea", "odd number of hex digits"));
                }
                Ok(out)
            },
        }
    }
}

/// Decode a one dimensional binary array.
pub(crate) fn decode_array<T: Decode + PgType>(
    col: Column,
    ty: &'static str,
) -> Result<Vec<T>, DecodeError> {
    if col.oid() != T::ARRAY_OID {
        return Err(DecodeError::new(DecodeErrorKind::OidMismatch {
            column: ByteStr::copy_from_str(col.name()),
            expect: ty,
            found: col.oid(),
        }));
    }
    if col.format() != PgFormat::Binary {
        return Err(col.malformed(ty, "array decoding requires binary format"));
    }

    let mut buf = Bytes::copy_from_slice(col.bytes()?);
    if buf.remaining() < 12 {
        return Err(col.malformed(ty, "array header too short"));
    }

    let dims = buf.get_i32();
    let _has_nulls = buf.get_i32();
    let elem_oid = buf.get_u32();

    if dims == 0 {
        return Ok(Vec::new());
    }
    if dims != 1 {
        return Err(col.malformed(ty, "multidimensional arrays are not supported"));
    }
    if !T::accepts(elem_oid) {
        return Err(col.malformed(ty, format!("unexpected element oid {elem_oid}")));
    }
    if buf.remaining() < 8 {
        return Err(col.malformed(ty, "array dimension header too short"));
    }

    let len = buf.get_i32();
    let _lower_bound = buf.get_i32();

    let mut out = Vec::with_capacity(len.max(0) as usize);
    for _ in 0..len {
        if buf.remaining() < 4 {
            return Err(col.malformed(ty, "array element header too short"));
        }
        let value = match buf.get_i32() {
            -1 => None,
            elen => {
                if buf.remaining() < elen as usize {
                    return Err(col.malformed(ty, "array element too short"));
                }
                Some(buf.split_to(elen as usize))
            },
        };
        let elem = Column {
            name: ByteStr::copy_from_str(col.name()),
            oid: elem_oid,
            format: PgFormat::Binary,
            value,
        };
        out.push(T::decode(elem)?);
    }

    Ok(out)
}

macro_rules! decode_array {
    ($($ty:ty: $name:literal),*) => {$(
        impl Decode for Vec<$ty> {
            fn decode(col: Column) -> Result<Self, DecodeError> {
                decode_array::<$ty>(col, $name)
            }
        }
    )*};
}

decode_array! {
    i16: "int2[]",
    i32: "int4[]",
    i64: "int8[]",
    f64: "float8[]",
    String: "text[]"
}

/// Type that can be used for indexing a column.
pub trait Index: Sized + sealed::Sealed {
    /// Returns (bytes start offset, nul string index, nth column).
    fn position(self, body: &[u8], len: u16) -> Result<(usize, usize, u16), DecodeError>;
}

macro_rules! position {
    (
        $self:pat, $body:ident, $len:ident,
        ($offset:ident,$i_nul:ident,$nth:ident) => $test:expr,
        () => $into:expr
    ) => {
        let mut iter = $body.iter().copied().enumerate();
        let mut $offset = 0;

        for $nth in 0..$len {
            let Some(($i_nul, _)) = iter.find(|(_, e)| matches!(e, b'\0')) else {
                break;
            };

            if $test {
                return Ok(($offset, $i_nul, $nth));
            }

            match iter.$nth(SUFFIX) {
                Some((i, _)) => {
                    $offset = i;
                },
                None => break,
            }
        }

        Err(DecodeError::new(DecodeErrorKind::ColumnNotFound($into)))
    };
}

impl Index for usize {
    fn position(self, body: &[u8], len: u16) -> Result<(usize, usize, u16), DecodeError> {
        position! {
            self, body, len,
            (off,i_nul,nth) => self == nth as usize,
            () => String::from(itoa::Buffer::new().format(self)).into()
        }
    }
}

impl Index for &str {
    fn position(self, body: &[u8], len: u16) -> Result<(usize, usize, u16), DecodeError> {
        position! {
            self, body, len,
            (off,i_nul,nth) => self.as_bytes() == &body[off..i_nul],
            () => String::from(self).into()
        }
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

/// An error when decoding a row value.
///
/// Carries the column, the target type, the offending bytes and the caller
/// location, enough to diagnose a cast failure from a log line. Decoding
/// errors never close the connection.
pub struct DecodeError {
    kind: DecodeErrorKind,
    location: &'static Location<'static>,
}

#[derive(Debug)]
pub enum DecodeErrorKind {
    /// Column requested not found.
    ColumnNotFound(Cow<'static, str>),
    /// Column type does not decode into the requested rust type.
    OidMismatch {
        column: ByteStr,
        expect: &'static str,
        found: Oid,
    },
    /// NULL cell decoded into a non optional type.
    UnexpectedNull {
        column: ByteStr,
    },
    /// The cell bytes do not form a valid value of the type.
    Malformed {
        column: ByteStr,
        ty: &'static str,
        reason: Cow<'static, str>,
        value: Option<Bytes>,
    },
    /// Postgres returned a non UTF-8 string.
    Utf8(Utf8Error),
}

impl DecodeError {
    #[track_caller]
    pub(crate) fn new(kind: DecodeErrorKind) -> Self {
        Self { kind, location: Location::caller() }
    }

    pub fn kind(&self) -> &DecodeErrorKind {
        &self.kind
    }

    /// File and line of the decode call site.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    pub(crate) fn relocate(mut self, location: &'static Location<'static>) -> Self {
        self.location = location;
        self
    }
}

impl std::error::Error for DecodeError { }

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match &self.kind {
            DecodeErrorKind::ColumnNotFound(name) => write!(f, "column not found: {name}")?,
            DecodeErrorKind::OidMismatch { column, expect, found } => {
                write!(f, "column `{column}` with oid {found} does not decode as {expect}")?
            },
            DecodeErrorKind::UnexpectedNull { column } => {
                write!(f, "column `{column}` is NULL")?
            },
            DecodeErrorKind::Malformed { column, ty, reason, value } => {
                write!(f, "column `{column}` is not a valid {ty}: {reason}")?;
                if let Some(value) = value {
                    write!(f, " (bytes: {:?})", value.lossy())?;
                }
            },
            DecodeErrorKind::Utf8(e) => write!(f, "{e}")?,
        }
        write!(f, " at {}", self.location)
    }
}

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for DecodeError {
            #[track_caller]
            fn from($pat: $ty) -> Self {
                DecodeError::new($body)
            }
        }
    };
}

from!(<Utf8Error>e => DecodeErrorKind::Utf8(e));
from!(<std::string::FromUtf8Error>e => DecodeErrorKind::Utf8(e.utf8_error()));
from!(<crate::ext::NulStrError>e => match e {
    crate::ext::NulStrError::Utf8(e) => DecodeErrorKind::Utf8(e),
    crate::ext::NulStrError::MissingNul => DecodeErrorKind::Malformed {
        column: ByteStr::default(),
        ty: "string",
        reason: "missing nul terminator".into(),
        value: None,
    },
});

/// No rows returned by a query that expected at least one.
#[derive(Debug)]
pub struct RowNotFound;

impl std::error::Error for RowNotFound { }

impl fmt::Display for RowNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no rows returned")
    }
}

/// Outcome of a statement that does not stream rows back.
#[derive(Debug, Clone)]
pub struct RowResult {
    /// Rows affected as reported by the command tag.
    pub rows_affected: u64,
    /// The textual command completion tag, e.g. `INSERT 0 1`.
    pub tag: ByteStr,
}

#[cfg(test)]
pub(crate) mod test {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::postgres::oid;

    /// Build a `RowDescription` body (after the field count).
    pub(crate) fn description(cols: &[(&str, Oid, u16)]) -> Bytes {
        let mut buf = BytesMut::new();
        for (name, oid, format) in cols {
            buf.put_slice(name.as_bytes());
            buf.put_u8(0);
            buf.put_u32(0); // table oid
            buf.put_u16(0); // attribute number
            buf.put_u32(*oid);
            buf.put_i16(0); // type size
            buf.put_i32(-1); // type modifier
            buf.put_u16(*format);
        }
        buf.freeze()
    }

    /// Build a `DataRow` body (after the column count).
    pub(crate) fn values(cells: &[Option<&[u8]>]) -> Bytes {
        let mut buf = BytesMut::new();
        for cell in cells {
            match cell {
                Some(bytes) => {
                    buf.put_i32(bytes.len() as i32);
                    buf.put_slice(bytes);
                },
                None => buf.put_i32(-1),
            }
        }
        buf.freeze()
    }

    #[test]
    fn get_by_index_and_name() {
        let template = Row::new(2, description(&[
            ("id", oid::INT4, 1),
            ("name", oid::TEXT, 1),
        ]));
        let row = template.with_values(values(&[
            Some(&42i32.to_be_bytes()),
            Some(b"hello"),
        ]));

        assert_eq!(row.try_get::<_, i32>(0).unwrap(), 42);
        assert_eq!(row.try_get::<_, String>("name").unwrap(), "hello");
        assert!(row.try_get::<_, i32>("missing").is_err());
    }

    #[test]
    fn null_decodes_as_option() {
        let template = Row::new(1, description(&[("v", oid::INT8, 1)]));
        let row = template.with_values(values(&[None]));

        assert_eq!(row.try_get::<_, Option<i64>>(0).unwrap(), None);
        assert!(matches!(
            row.try_get::<_, i64>(0).unwrap_err().kind(),
            DecodeErrorKind::UnexpectedNull { .. },
        ));
    }

    #[test]
    fn oid_mismatch_is_reported() {
        let template = Row::new(1, description(&[("v", oid::TEXT, 1)]));
        let row = template.with_values(values(&[Some(b"not an int")]));

        let err = row.try_get::<_, i32>(0).unwrap_err();
        assert!(matches!(
            err.kind(),
            DecodeErrorKind::OidMismatch { found: oid::TEXT, .. },
        ));
    }

    #[test]
    fn tuple_from_row() {
        let template = Row::new(2, description(&[
            ("a", oid::INT4, 1),
            ("b", oid::BOOL, 1),
        ]));
        let row = template.with_values(values(&[Some(&7i32.to_be_bytes()), Some(&[1])]));
        let (a, b) = <(i32, bool)>::from_row(row).unwrap();
        assert_eq!((a, b), (7, true));
    }

    #[test]
    fn binary_int8_array() {
        let encoded = crate::encode::Encode::encode([1i64, 2, 3].as_slice());
        let cell = bytes::Buf::chunk(&encoded).to_vec();

        let template = Row::new(1, description(&[("v", oid::INT8_ARRAY, 1)]));
        let row = template.with_values(values(&[Some(&cell)]));
        assert_eq!(row.try_get::<_, Vec<i64>>(0).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn text_format_decoding() {
        let template = Row::new(2, description(&[
            ("n", oid::INT4, 0),
            ("f", oid::FLOAT8, 0),
        ]));
        let row = template.with_values(values(&[Some(b"123"), Some(b"1.5")]));
        assert_eq!(row.try_get::<_, i32>(0).unwrap(), 123);
        assert_eq!(row.try_get::<_, f64>(1).unwrap(), 1.5);
    }

    #[test]
    fn bytea_text_form() {
        let template = Row::new(1, description(&[("v", oid::BYTEA, 0)]));
        let row = template.with_values(values(&[Some(b"\\x01ff")]));
        assert_eq!(row.try_get::<_, Vec<u8>>(0).unwrap(), vec![0x01, 0xff]);
    }

    #[test]
    fn decode_error_carries_caller_location() {
        let template = Row::new(1, description(&[("v", oid::INT4, 1)]));
        let row = template.with_values(values(&[Some(&[0, 0])]));
        let err = row.try_get::<_, i32>(0).unwrap_err();
        assert_eq!(err.location().file(), file!());
    }
}
