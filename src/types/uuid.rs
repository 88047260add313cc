use uuid::Uuid;

use crate::{
    Decode, DecodeError, Encode,
    encode::Encoded,
    postgres::{Oid, PgFormat, PgType, oid},
    row::Column,
};

impl PgType for Uuid {
    const OID: Oid = oid::UUID;
}

impl Decode for Uuid {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        column.check::<Self>()?;
        match column.format() {
            // 16 big-endian bytes
            PgFormat::Binary => Ok(Uuid::from_bytes(column.fixed("uuid")?)),
            PgFormat::Text => Uuid::parse_str(column.text()?)
                .map_err(|e| column.malformed("uuid", e.to_string())),
        }
    }
}

impl Encode<'static> for Uuid {
    fn encode(self) -> Encoded<'static> {
        Encoded::owned(self.as_bytes().to_vec(), Self::OID)
    }
}

#[cfg(test)]
mod test {
    use bytes::Buf;

    use super::*;

    #[test]
    fn binary_is_sixteen_raw_bytes() {
        let id = Uuid::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef);
        let encoded = id.encode();
        assert_eq!(encoded.oid(), oid::UUID);
        assert_eq!(encoded.chunk(), id.as_bytes());
        assert_eq!(encoded.chunk().len(), 16);
    }
}
