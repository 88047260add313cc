//! The `numeric` arbitrary precision decimal.
use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use crate::{
    Decode, DecodeError, Encode,
    encode::Encoded,
    postgres::{Oid, PgFormat, PgType, oid},
    row::Column,
};

const SIGN_POSITIVE: u16 = 0x0000;
const SIGN_NEGATIVE: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;

/// Sign of a [`PgNumeric`] value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumericSign {
    Positive,
    Negative,
    NaN,
}

/// An exact representation of a postgres `numeric` value.
///
/// The wire encoding is kept as-is: a sequence of base-10000 digit groups,
/// `weight` the exponent of the first group, `dscale` the number of
/// fractional decimal digits to display. Convert through [`Display`] /
/// [`FromStr`][std::str::FromStr] or [`to_f64`][PgNumeric::to_f64];
/// round-trips through the wire and through text are lossless.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PgNumeric {
    sign: NumericSign,
    weight: i16,
    dscale: u16,
    digits: Vec<i16>,
}

impl PgNumeric {
    pub fn nan() -> Self {
        Self {
            sign: NumericSign::NaN,
            weight: 0,
            dscale: 0,
            digits: Vec::new(),
        }
    }

    pub fn sign(&self) -> NumericSign {
        self.sign
    }

    pub fn is_nan(&self) -> bool {
        self.sign == NumericSign::NaN
    }

    /// Lossy conversion through the shortest decimal text form.
    pub fn to_f64(&self) -> f64 {
        self.to_string().parse().unwrap_or(f64::NAN)
    }

    pub(crate) fn from_binary(col: &Column, mut buf: bytes::Bytes) -> Result<Self, DecodeError> {
        if buf.remaining() < 8 {
            return Err(col.malformed("numeric", "header too short"));
        }

        let ndigits = buf.get_u16();
        let weight = buf.get_i16();
        let sign = match buf.get_u16() {
            SIGN_POSITIVE => NumericSign::Positive,
            SIGN_NEGATIVE => NumericSign::Negative,
            SIGN_NAN => NumericSign::NaN,
            code => return Err(col.malformed("numeric", format!("unknown sign {code:#06x}"))),
        };
        let dscale = buf.get_u16();

        if buf.remaining() < ndigits as usize * 2 {
            return Err(col.malformed("numeric", "digit array too short"));
        }

        let mut digits = Vec::with_capacity(ndigits as usize);
        for _ in 0..ndigits {
            let digit = buf.get_i16();
            if !(0..10000).contains(&digit) {
                return Err(col.malformed("numeric", format!("digit {digit} out of range")));
            }
            digits.push(digit);
        }

        Ok(Self { sign, weight, dscale, digits })
    }
}

impl PgType for PgNumeric {
    const OID: Oid = oid::NUMERIC;
}

impl Decode for PgNumeric {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        column.check::<Self>()?;
        match column.format() {
            PgFormat::Binary => {
                let bytes = bytes::Bytes::copy_from_slice(column.bytes()?);
                Self::from_binary(&column, bytes)
            },
            PgFormat::Text => column
                .text()?
                .parse()
                .map_err(|e: ParseNumericError| column.malformed("numeric", e.0)),
        }
    }
}

impl Encode<'static> for PgNumeric {
    fn encode(self) -> Encoded<'static> {
        (&self).encode()
    }
}

impl Encode<'static> for &PgNumeric {
    fn encode(self) -> Encoded<'static> {
        let mut buf = BytesMut::with_capacity(8 + self.digits.len() * 2);
        buf.put_u16(self.digits.len() as u16);
        buf.put_i16(self.weight);
        buf.put_u16(match self.sign {
            NumericSign::Positive => SIGN_POSITIVE,
            NumericSign::Negative => SIGN_NEGATIVE,
            NumericSign::NaN => SIGN_NAN,
        });
        buf.put_u16(self.dscale);
        for digit in &self.digits {
            buf.put_i16(*digit);
        }
        Encoded::owned(buf.freeze(), PgNumeric::OID)
    }
}

impl fmt::Display for PgNumeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nan() {
            return f.write_str("NaN");
        }

        if self.sign == NumericSign::Negative {
            f.write_str("-")?;
        }

        // integer groups are the digit indices `0..=weight`
        if self.weight < 0 {
            f.write_str("0")?;
        } else {
            for i in 0..=self.weight as usize {
                let group = self.digits.get(i).copied().unwrap_or(0);
                match i {
                    0 => write!(f, "{group}")?,
                    _ => write!(f, "{group:04}")?,
                }
            }
        }

        if self.dscale > 0 {
            f.write_str(".")?;
            let mut written = 0u16;
            let mut index = self.weight as i32 + 1;
            while written < self.dscale {
                let group = match usize::try_from(index) {
                    Ok(i) => self.digits.get(i).copied().unwrap_or(0),
                    Err(_) => 0,
                };
                let text = [
                    b'0' + (group / 1000) as u8,
                    b'0' + (group / 100 % 10) as u8,
                    b'0' + (group / 10 % 10) as u8,
                    b'0' + (group % 10) as u8,
                ];
                for ch in text {
                    if written == self.dscale {
                        break;
                    }
                    write!(f, "{}", ch as char)?;
                    written += 1;
                }
                index += 1;
            }
        }

        Ok(())
    }
}

/// Error when parsing a decimal string into [`PgNumeric`].
#[derive(Debug)]
pub struct ParseNumericError(String);

impl std::error::Error for ParseNumericError { }

impl fmt::Display for ParseNumericError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid numeric literal: {}", self.0)
    }
}

impl std::str::FromStr for PgNumeric {
    type Err = ParseNumericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("nan") {
            return Ok(Self::nan());
        }

        let (sign, rest) = match s.as_bytes() {
            [b'-', ..] => (NumericSign::Negative, &s[1..]),
            [b'+', ..] => (NumericSign::Positive, &s[1..]),
            _ => (NumericSign::Positive, s),
        };

        let (int_part, frac_part) = match rest.split_once('.') {
            Some((i, f)) => (i, f),
            None => (rest, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(ParseNumericError(s.into()));
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(ParseNumericError(s.into()));
        }

        let dscale = frac_part.len() as u16;
        let int_part = int_part.trim_start_matches('0');

        // integer groups, chunked by 4 from the right
        let mut digits: Vec<i16> = Vec::new();
        {
            let bytes = int_part.as_bytes();
            let mut end = bytes.len();
            let mut rev = Vec::new();
            while end > 0 {
                let start = end.saturating_sub(4);
                rev.push(int_part[start..end].parse::<i16>().expect("ascii digits"));
                end = start;
            }
            rev.reverse();
            digits.extend(rev);
        }

        let mut weight = digits.len() as i16 - 1;

        // fractional groups, chunked by 4 from the left, padded with zeros
        for chunk in frac_part.as_bytes().chunks(4) {
            let mut group = 0i16;
            for (i, b) in chunk.iter().enumerate() {
                group += ((b - b'0') as i16) * [1000, 100, 10, 1][i];
            }
            digits.push(group);
        }

        // strip zero groups off both ends
        while digits.first() == Some(&0) {
            digits.remove(0);
            weight -= 1;
        }
        while digits.last() == Some(&0) {
            digits.pop();
        }

        if digits.is_empty() {
            return Ok(Self {
                sign: NumericSign::Positive,
                weight: 0,
                dscale,
                digits,
            });
        }

        Ok(Self { sign, weight, dscale, digits })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(s: &str) -> PgNumeric {
        s.parse().unwrap()
    }

    #[test]
    fn display_round_trips() {
        for s in ["0", "1", "42", "12345.678", "-12345.678", "0.0001", "10000", "9999.9999", "1.5", "-0.5"] {
            assert_eq!(parse(s).to_string(), s, "through {s}");
        }
    }

    #[test]
    fn zero_with_scale() {
        let zero = parse("0.00");
        assert_eq!(zero.to_string(), "0.00");
        assert_eq!(zero.sign(), NumericSign::Positive);
    }

    #[test]
    fn grouping() {
        let n = parse("12345.678");
        assert_eq!(n.weight, 1);
        assert_eq!(n.dscale, 3);
        assert_eq!(n.digits, vec![1, 2345, 6780]);
    }

    #[test]
    fn small_fraction_has_negative_weight() {
        let n = parse("0.0001");
        assert_eq!(n.weight, -1);
        assert_eq!(n.digits, vec![1]);
    }

    #[test]
    fn nan() {
        assert!(parse("NaN").is_nan());
        assert_eq!(parse("NaN").to_string(), "NaN");
        assert!(parse("NaN").to_f64().is_nan());
    }

    #[test]
    fn to_f64() {
        assert_eq!(parse("12345.678").to_f64(), 12345.678);
        assert_eq!(parse("-0.5").to_f64(), -0.5);
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<PgNumeric>().is_err());
        assert!("12a".parse::<PgNumeric>().is_err());
        assert!("1.2.3".parse::<PgNumeric>().is_err());
    }

    #[test]
    fn negative_zero_normalizes() {
        assert_eq!(parse("-0").sign(), NumericSign::Positive);
    }
}
