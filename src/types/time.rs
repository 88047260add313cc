//! Binary codecs for the `time` crate.
//!
//! On the wire a `timestamp`/`timestamptz` is microseconds and a `date` is
//! days, both counted from 2000-01-01; text format is only parsed as a
//! fallback.
use time::{
    Date, Duration, OffsetDateTime, PrimitiveDateTime,
    format_description::{BorrowedFormatItem as I, Component as C, modifier},
};

use crate::{
    Decode, DecodeError, Encode,
    encode::Encoded,
    postgres::{Oid, PgFormat, PgType, oid},
    row::Column,
};

fn pg_epoch() -> PrimitiveDateTime {
    Date::from_ordinal_date(2000, 1)
        .expect("2000-01-01 is a valid date")
        .midnight()
}

impl PgType for PrimitiveDateTime {
    /// date and time, without time zone
    const OID: Oid = oid::TIMESTAMP;
}

impl PgType for OffsetDateTime {
    /// date and time, with time zone
    const OID: Oid = oid::TIMESTAMPTZ;
}

impl PgType for Date {
    const OID: Oid = oid::DATE;
}

impl Decode for PrimitiveDateTime {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        column.check::<Self>()?;
        match column.format() {
            PgFormat::Binary => {
                let micros = i64::from_be_bytes(column.fixed("timestamp")?);
                pg_epoch()
                    .checked_add(Duration::microseconds(micros))
                    .ok_or_else(|| column.malformed("timestamp", "out of range"))
            },
            PgFormat::Text => PrimitiveDateTime::parse(column.text()?, &TIMESTAMP)
                .map_err(|e| column.malformed("timestamp", e.to_string())),
        }
    }
}

impl Decode for OffsetDateTime {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        column.check::<Self>()?;
        match column.format() {
            PgFormat::Binary => {
                let micros = i64::from_be_bytes(column.fixed("timestamptz")?);
                pg_epoch()
                    .assume_utc()
                    .checked_add(Duration::microseconds(micros))
                    .ok_or_else(|| column.malformed("timestamptz", "out of range"))
            },
            PgFormat::Text => OffsetDateTime::parse(column.text()?, &TIMESTAMPTZ)
                .map_err(|e| column.malformed("timestamptz", e.to_string())),
        }
    }
}

impl Decode for Date {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        column.check::<Self>()?;
        match column.format() {
            PgFormat::Binary => {
                let days = i32::from_be_bytes(column.fixed("date")?);
                pg_epoch()
                    .date()
                    .checked_add(Duration::days(days as i64))
                    .ok_or_else(|| column.malformed("date", "out of range"))
            },
            PgFormat::Text => Date::parse(column.text()?, &DATE)
                .map_err(|e| column.malformed("date", e.to_string())),
        }
    }
}

impl Encode<'static> for PrimitiveDateTime {
    fn encode(self) -> Encoded<'static> {
        let micros = (self - pg_epoch()).whole_microseconds() as i64;
        Encoded::inline(&micros.to_be_bytes(), Self::OID)
    }
}

impl Encode<'static> for OffsetDateTime {
    fn encode(self) -> Encoded<'static> {
        let micros = (self - pg_epoch().assume_utc()).whole_microseconds() as i64;
        Encoded::inline(&micros.to_be_bytes(), Self::OID)
    }
}

impl Encode<'static> for Date {
    fn encode(self) -> Encoded<'static> {
        let days = (self - pg_epoch().date()).whole_days() as i32;
        Encoded::inline(&days.to_be_bytes(), Self::OID)
    }
}

const DATE: &[I<'_>] = &[
    I::Component {
        0: C::Year(modifier::Year::default()),
    },
    I::Literal { 0: b"-" },
    I::Component {
        0: C::Month(modifier::Month::default()),
    },
    I::Literal { 0: b"-" },
    I::Component {
        0: C::Day(modifier::Day::default()),
    },
];

const TIME: &[I<'_>] = &[
    I::Component {
        0: C::Hour(modifier::Hour::default()),
    },
    I::Literal { 0: b":" },
    I::Component {
        0: C::Minute(modifier::Minute::default()),
    },
    I::Literal { 0: b":" },
    I::Component {
        0: C::Second(modifier::Second::default()),
    },
    I::Optional {
        0: &I::Compound {
            0: &[
                I::Literal { 0: b"." },
                I::Component {
                    0: C::Subsecond(modifier::Subsecond::default()),
                },
            ],
        },
    },
];

const TIMESTAMP: &[I<'_>] = &[
    I::Compound { 0: DATE },
    I::Literal { 0: b" " },
    I::Compound { 0: TIME },
];

const TIMESTAMPTZ: &[I<'_>] = &[
    I::Compound { 0: TIMESTAMP },
    I::Component {
        0: C::OffsetHour({
            let mut m = modifier::OffsetHour::default();
            m.sign_is_mandatory = true;
            m
        }),
    },
];

#[cfg(test)]
mod test {
    use bytes::Buf;

    use super::*;

    #[test]
    fn timestamp_binary_epoch() {
        let epoch = pg_epoch();
        let encoded = epoch.encode();
        assert_eq!(encoded.chunk(), &0i64.to_be_bytes());
    }

    #[test]
    fn date_binary_is_days_since_2000() {
        let date = Date::from_calendar_date(2000, time::Month::January, 11).unwrap();
        let encoded = date.encode();
        assert_eq!(encoded.chunk(), &10i32.to_be_bytes());
    }
}
