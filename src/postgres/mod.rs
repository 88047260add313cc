//! The postgres frontend/backend protocol, version 3.
pub mod backend;
pub mod frontend;
pub mod sasl;

mod error;
mod pg_format;
mod pg_type;

pub use backend::{BackendMessage, BackendProtocol, TxStatus};
pub use error::{DatabaseError, ProtocolError};
pub use frontend::FrontendProtocol;
pub use pg_format::PgFormat;
pub use pg_type::{Oid, PgType, oid};
