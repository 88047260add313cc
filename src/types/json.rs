use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Decode, DecodeError, Encode,
    encode::Encoded,
    postgres::{Oid, PgType, oid},
    row::Column,
};

/// Decode and Encode a postgres `json`/`jsonb` value.
///
/// # Panics
///
/// Note that when performing [`Encode`], if the [`Serialize`]
/// implementation decides to fail, it will panic.
#[derive(Debug)]
pub struct Json<T>(pub T);

impl<T> PgType for Json<T> {
    /// jsonb, binary json
    const OID: Oid = oid::JSONB;

    fn accepts(o: Oid) -> bool {
        matches!(o, oid::JSON | oid::JSONB)
    }
}

impl<T> Decode for Json<T>
where
    T: DeserializeOwned,
{
    fn decode(column: Column) -> Result<Self, DecodeError> {
        column.check::<Json<T>>()?;
        let bytes = column.bytes()?;

        let data = match column.oid() {
            // jsonb carries a version byte before the payload
            oid::JSONB => match bytes.split_first() {
                Some((1, rest)) => rest,
                _ => return Err(column.malformed("jsonb", "unknown jsonb version")),
            },
            _ => bytes,
        };

        match serde_json::from_slice(data) {
            Ok(value) => Ok(Self(value)),
            Err(err) => Err(column.malformed("json", err.to_string())),
        }
    }
}

impl<T: Serialize> Encode<'static> for Json<T> {
    fn encode(self) -> Encoded<'static> {
        let mut buf = vec![1u8];
        serde_json::to_writer(&mut buf, &self.0).expect("Serialize implementation failed");
        Encoded::owned(buf, Self::OID)
    }
}

impl<T: Serialize> Serialize for Json<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Json<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self(T::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod test {
    use bytes::Buf;

    use super::*;

    #[test]
    fn jsonb_encode_has_version_byte() {
        let encoded = Json(vec![1, 2, 3]).encode();
        assert_eq!(encoded.oid(), oid::JSONB);
        assert_eq!(encoded.chunk()[0], 1);
        assert_eq!(&encoded.chunk()[1..], b"[1,2,3]");
    }
}
