//! The [`Transaction`] type.
use std::io;

use crate::{
    Result,
    postgres::{
        BackendProtocol, TxStatus, backend,
        frontend::{self, FrontendProtocol},
    },
    statement::Statement,
    transport::{PgTransport, PgTransportExt},
};

/// An RAII implementation of a transaction scope.
///
/// To begin a transaction, use the [`begin`][crate::query::begin] function.
/// To commit, use [`Transaction::commit`]; when the value is dropped
/// without a commit, the transaction is rolled back.
///
/// # Example
///
/// ```no_run
/// # async fn test(mut conn: postgate::Connection) -> postgate::Result<()> {
/// let mut tx = postgate::begin(&mut conn).await?;
///
/// postgate::execute("insert into post(name) values('foo')", &mut tx)
///     .execute()
///     .await?;
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction<IO: PgTransport> {
    io: IO,
    committed: bool,
}

impl<IO> Transaction<IO>
where
    IO: PgTransport,
{
    pub(crate) fn new(io: IO) -> Self {
        Self { io, committed: false }
    }

    /// Commit the transaction.
    pub async fn commit(mut self) -> Result<()> {
        self.io.send(frontend::Query { sql: "COMMIT" });
        self.io.recv::<backend::CommandComplete>().await?;
        let ready = self.io.recv::<backend::ReadyForQuery>().await?;
        self.committed = true;
        match ready.tx_status {
            TxStatus::Idle => Ok(()),
            _ => Err(crate::postgres::ProtocolError::unexpected_phase(
                backend::ReadyForQuery::MSGTYPE,
                "transaction still open after COMMIT",
            )
            .into()),
        }
    }

    /// Roll the transaction back now instead of on drop.
    pub async fn rollback(mut self) -> Result<()> {
        self.io.send(frontend::Query { sql: "ROLLBACK" });
        self.io.recv::<backend::CommandComplete>().await?;
        self.io.recv::<backend::ReadyForQuery>().await?;
        self.committed = true;
        Ok(())
    }
}

impl<IO> Drop for Transaction<IO>
where
    IO: PgTransport,
{
    fn drop(&mut self) {
        if !self.committed {
            // buffered; goes out with the connection's next flush
            self.io.send(frontend::Query { sql: "ROLLBACK" });
            self.io.ready_request();
        }
    }
}

impl<IO> PgTransport for Transaction<IO>
where
    IO: PgTransport,
{
    fn poll_flush(&mut self, cx: &mut std::task::Context) -> std::task::Poll<io::Result<()>> {
        IO::poll_flush(&mut self.io, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut std::task::Context) -> std::task::Poll<Result<B>> {
        IO::poll_recv(&mut self.io, cx)
    }

    fn ready_request(&mut self) {
        IO::ready_request(&mut self.io)
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        IO::send(&mut self.io, message)
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        IO::send_startup(&mut self.io, startup)
    }

    fn get_stmt(&mut self, sql: u64) -> Option<Statement> {
        IO::get_stmt(&mut self.io, sql)
    }

    fn add_stmt(&mut self, sql: u64, stmt: Statement) {
        IO::add_stmt(&mut self.io, sql, stmt)
    }
}
