//! Async postgres driver with connection pooling.
//!
//! Speaks the v3 frontend/backend protocol over TCP or unix domain
//! sockets, optionally wrapped in TLS, with binary parameter and result
//! encoding throughout.
//!
//! # Examples
//!
//! Single connection:
//!
//! ```no_run
//! use postgate::Connection;
//!
//! # async fn app() -> postgate::Result<()> {
//! let mut conn = Connection::connect_env().await?;
//!
//! let res = postgate::query_as::<_, _, (i32, String)>("SELECT 420,$1", &mut conn)
//!     .bind("Foo")
//!     .fetch_one()
//!     .await?;
//!
//! assert_eq!(res.0, 420);
//! assert_eq!(res.1.as_str(), "Foo");
//! # Ok(())
//! # }
//! ```
//!
//! Database connection pooling:
//!
//! ```no_run
//! use postgate::Pool;
//!
//! # async fn app() -> postgate::Result<()> {
//! let mut pool = Pool::connect_env().await?;
//!
//! let mut handles = vec![];
//!
//! for i in 0..14 {
//!     let mut pool = pool.clone();
//!     let t = tokio::spawn(async move {
//!         postgate::execute("INSERT INTO foo(id) VALUES($1)", &mut pool)
//!             .bind(i)
//!             .execute()
//!             .await
//!     });
//!     handles.push(t);
//! }
//!
//! for h in handles {
//!     h.await.unwrap()?;
//! }
//!
//! let foos = postgate::query_as::<_, _, (i32,)>("SELECT * FROM foo", &mut pool)
//!     .fetch_all()
//!     .await?;
//!
//! assert_eq!(foos.len(), 14);
//! # Ok(())
//! # }
//! ```
//!
//! Begin a transaction:
//!
//! ```no_run
//! use postgate::Connection;
//!
//! # async fn app() -> postgate::Result<()> {
//! # fn fallible_operation() -> postgate::Result<()> { todo!() }
//! let mut conn = Connection::connect_env().await?;
//!
//! let mut tx = postgate::begin(&mut conn).await?;
//!
//! postgate::execute("INSERT INTO foo(id) VALUES($1)", &mut tx)
//!     .bind(14)
//!     .execute()
//!     .await?;
//!
//! // if this fails, `tx` is dropped and the transaction rolls back
//! fallible_operation()?;
//!
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Notifications:
//!
//! ```no_run
//! use postgate::Connection;
//!
//! # async fn app() -> postgate::Result<()> {
//! let mut conn = Connection::connect_env().await?;
//! let mut events = conn.listen("events").await?;
//!
//! while let Some(notification) = events.recv().await {
//!     println!("{}: {}", notification.channel, notification.payload);
//! }
//! # Ok(())
//! # }
//! ```

pub mod common;
mod net;
mod ext;

// Protocol
pub mod postgres;

// Encoding
mod value;
pub mod encode;

// Components
mod statement;
mod buffer;
pub mod sql;
pub mod row;

// Operations
pub mod transport;
pub mod executor;
pub mod fetch;
pub mod query;
pub mod transaction;
pub mod listen;

// Connection
pub mod connection;
pub mod pool;

pub mod types;

mod error;

#[doc(inline)]
pub use encode::Encode;
#[doc(inline)]
pub use row::{Decode, DecodeError, FromRow, Row};
pub use sql::SqlExt;
pub use statement::Statement;

#[doc(inline)]
pub use executor::Executor;
#[doc(inline)]
pub use connection::{Config, Connection};
#[doc(inline)]
pub use net::{TlsConnector, TlsMode};
#[doc(inline)]
pub use pool::{Pool, PoolConfig};
#[doc(inline)]
pub use query::{begin, execute, prepare, query, query_as, query_scalar};
#[doc(inline)]
pub use listen::{Listener, Notification};
#[doc(inline)]
pub use error::{Error, ErrorKind, Result};
