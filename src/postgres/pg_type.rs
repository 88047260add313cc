/// A 32-bit postgres assigned type identifier.
pub type Oid = u32;

/// Builtin type [`Oid`] constants used by the binary codecs.
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const JSON: Oid = 114;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const NUMERIC: Oid = 1700;
    pub const UUID: Oid = 2950;
    pub const JSONB: Oid = 3802;

    pub const INT2_ARRAY: Oid = 1005;
    pub const INT4_ARRAY: Oid = 1007;
    pub const INT8_ARRAY: Oid = 1016;
    pub const TEXT_ARRAY: Oid = 1009;
    pub const FLOAT8_ARRAY: Oid = 1022;
}

/// A rust type with a corresponding postgres type.
pub trait PgType {
    /// The parameter [`Oid`] sent for this type in `Parse` and `Bind`.
    const OID: Oid;

    /// The [`Oid`] of the one dimensional array of this type,
    /// `0` when unsupported.
    const ARRAY_OID: Oid = 0;

    /// Whether a column of `oid` can decode into this type.
    fn accepts(oid: Oid) -> bool {
        oid == Self::OID
    }
}

impl PgType for () {
    const OID: Oid = 0;
}

impl PgType for bool {
    const OID: Oid = oid::BOOL;
}

impl PgType for i16 {
    const OID: Oid = oid::INT2;
    const ARRAY_OID: Oid = oid::INT2_ARRAY;
}

impl PgType for i32 {
    const OID: Oid = oid::INT4;
    const ARRAY_OID: Oid = oid::INT4_ARRAY;
}

impl PgType for i64 {
    const OID: Oid = oid::INT8;
    const ARRAY_OID: Oid = oid::INT8_ARRAY;
}

impl PgType for f32 {
    const OID: Oid = oid::FLOAT4;
}

impl PgType for f64 {
    const OID: Oid = oid::FLOAT8;
    const ARRAY_OID: Oid = oid::FLOAT8_ARRAY;
}

/// Any of the textual oids decode into string types.
fn is_textual(o: Oid) -> bool {
    matches!(o, oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME)
}

impl PgType for str {
    const OID: Oid = oid::TEXT;
    const ARRAY_OID: Oid = oid::TEXT_ARRAY;

    fn accepts(oid: Oid) -> bool {
        is_textual(oid)
    }
}

impl PgType for String {
    const OID: Oid = oid::TEXT;
    const ARRAY_OID: Oid = oid::TEXT_ARRAY;

    fn accepts(oid: Oid) -> bool {
        is_textual(oid)
    }
}

impl PgType for [u8] {
    const OID: Oid = oid::BYTEA;
}

impl PgType for Vec<u8> {
    const OID: Oid = oid::BYTEA;
}
