//! Type integration with external types.
//!
//! Implementations of [`Decode`][d], [`Encode`][e] for external types:
//!
//! - [`serde`]'s [`Deserialize`][sd] and [`Serialize`][ss] via [`Json`], requires the `json` feature
//! - [`time`][::time]'s [`PrimitiveDateTime`][tp], [`OffsetDateTime`][to] and [`Date`][td], requires the `time` feature
//! - [`uuid`][::uuid]'s [`Uuid`][tu], requires the `uuid` feature
//! - [`PgNumeric`], an exact representation of the `numeric` wire value
//!
//! [d]: crate::Decode
//! [e]: crate::Encode
//! [sd]: serde::Deserialize
//! [ss]: serde::Serialize
//! [tp]: ::time::PrimitiveDateTime
//! [to]: ::time::OffsetDateTime
//! [td]: ::time::Date
//! [tu]: ::uuid::Uuid

#[cfg(feature = "json")]
mod json;
#[cfg(feature = "json")]
pub use json::Json;

#[cfg(feature = "time")]
mod time;

#[cfg(feature = "uuid")]
mod uuid;

mod numeric;
pub use numeric::{NumericSign, PgNumeric};
