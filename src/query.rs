//! Query API types.
use std::marker::PhantomData;

use crate::{
    Decode, FromRow, Result, Row,
    encode::{Encode, Encoded},
    executor::Executor,
    fetch::{Fetch, FetchCollect, FetchStream, StreamMap},
    row::{RowNotFound, RowResult},
    sql::Sql,
    statement::Statement,
    transport::{PgTransport, PgTransportExt},
};

/// Entrypoint of the query API, untyped rows.
#[inline]
pub fn query<'val, SQL, Exe>(sql: SQL, exe: Exe) -> Query<'val, SQL, Exe, StreamRow<Row>> {
    Query { sql, exe, params: Vec::new(), _p: PhantomData }
}

/// Entrypoint of the query API, rows decoded via [`FromRow`].
#[inline]
pub fn query_as<'val, SQL, Exe, R>(sql: SQL, exe: Exe) -> Query<'val, SQL, Exe, StreamRow<R>> {
    Query { sql, exe, params: Vec::new(), _p: PhantomData }
}

/// Entrypoint of the query API, single column decoded via [`Decode`].
#[inline]
pub fn query_scalar<'val, SQL, Exe, D>(sql: SQL, exe: Exe) -> Query<'val, SQL, Exe, StreamScalar<D>> {
    Query { sql, exe, params: Vec::new(), _p: PhantomData }
}

/// Entrypoint of the query API for statements that return no rows.
#[inline]
pub fn execute<'val, SQL, Exe>(sql: SQL, exe: Exe) -> Query<'val, SQL, Exe, StreamRow<Row>> {
    query(sql, exe)
}

/// Prepare a named server-side statement.
///
/// The returned [`Statement`] can be executed with [`query`] family
/// functions, skipping `Parse` on every execution.
pub async fn prepare<SQL, Exe>(sql: SQL, exe: Exe) -> Result<Statement>
where
    SQL: Sql,
    Exe: Executor,
{
    use crate::{
        common::ByteStr,
        postgres::{backend, frontend},
        statement::StatementName,
    };
    use std::hash::{DefaultHasher, Hash, Hasher};

    let mut io = exe.connection().await?;

    let text = sql.sql().trim();
    let sqlid = {
        let mut buf = DefaultHasher::new();
        text.hash(&mut buf);
        buf.finish()
    };

    if let Some(stmt) = io.get_stmt(sqlid) {
        return Ok(stmt);
    }

    let name = StatementName::next();
    io.send(frontend::Parse {
        prepare_name: name.as_str(),
        sql: text,
        oids_len: 0,
        oids: std::iter::empty(),
    });
    io.send(frontend::Describe { kind: b'S', name: name.as_str() });
    io.send(frontend::Sync);

    io.recv::<backend::ParseComplete>().await?;

    let mut stmt = Statement {
        name,
        sql: ByteStr::copy_from_str(text),
        row: None,
        params: Vec::new(),
    };

    loop {
        use crate::postgres::BackendMessage::*;
        match io.recv().await? {
            ParameterDescription(pd) => stmt.params = pd.iter().collect(),
            RowDescription(rd) => stmt.row = Some((rd.field_len, rd.body)),
            NoData(_) => stmt.row = None,
            ReadyForQuery(_) => break,
            f => {
                io.ready_request();
                return Err(f.unexpected("statement preparation").into());
            },
        }
    }

    io.add_stmt(sqlid, stmt.clone());
    Ok(stmt)
}

/// Close a prepared statement on the server.
pub async fn close_statement<Exe>(stmt: &Statement, exe: Exe) -> Result<()>
where
    Exe: Executor,
{
    use crate::postgres::{backend, frontend};

    let mut io = exe.connection().await?;
    io.send(frontend::Close {
        variant: b'S',
        name: stmt.name(),
    });
    io.send(frontend::Sync);
    io.recv::<backend::CloseComplete>().await?;
    io.recv::<backend::ReadyForQuery>().await?;
    Ok(())
}

/// Begin a transaction.
///
/// The returned [`Transaction`][crate::transaction::Transaction] rolls back
/// on drop unless committed.
pub async fn begin<Exe>(exe: Exe) -> Result<crate::transaction::Transaction<Exe::Transport>>
where
    Exe: Executor,
{
    use crate::postgres::{backend, frontend};

    let mut io = exe.connection().await?;
    io.send(frontend::Query { sql: "BEGIN" });
    io.recv::<backend::CommandComplete>().await?;
    io.recv::<backend::ReadyForQuery>().await?;
    Ok(crate::transaction::Transaction::new(io))
}

/// The query API.
#[derive(Debug)]
#[must_use = "queries do nothing unless you `.await` or poll them"]
pub struct Query<'val, SQL, Exe, M> {
    sql: SQL,
    exe: Exe,
    params: Vec<Encoded<'val>>,
    _p: PhantomData<M>,
}

impl<'val, SQL, Exe, M> Query<'val, SQL, Exe, M> {
    /// Bind a query parameter.
    #[inline]
    pub fn bind<V: Encode<'val>>(mut self, value: V) -> Self {
        self.params.push(value.encode());
        self
    }
}

impl<'val, SQL, Exe, M> Query<'val, SQL, Exe, M> {
    /// Fetch rows using the [`Stream`][futures_core::Stream] api.
    ///
    /// The returned stream should be polled to completion, otherwise the
    /// connection drains the rest of the response before its next query.
    #[inline]
    pub fn fetch(self) -> FetchStream<'val, SQL, Exe::Future, Exe::Transport, M>
    where
        Exe: Executor,
        M: StreamMap,
    {
        FetchStream::new(self.sql, self.exe.connection(), self.params)
    }

    /// Fetch all rows into a [`Vec`].
    #[inline]
    pub fn fetch_all(self) -> Fetch<'val, SQL, Exe::Future, Exe::Transport, M, CollectAll<M::Output>>
    where
        Exe: Executor,
        M: StreamMap,
    {
        Fetch::new(
            self.sql,
            self.exe.connection(),
            self.params,
            CollectAll(Vec::new()),
        )
    }

    /// Fetch one row, erroring when none is returned.
    #[inline]
    pub fn fetch_one(self) -> Fetch<'val, SQL, Exe::Future, Exe::Transport, M, CollectOne<M::Output>>
    where
        Exe: Executor,
        M: StreamMap,
    {
        Fetch::new(
            self.sql,
            self.exe.connection(),
            self.params,
            CollectOne(None),
        )
    }

    /// Optionally fetch one row.
    #[inline]
    pub fn fetch_optional(self) -> Fetch<'val, SQL, Exe::Future, Exe::Transport, M, CollectOpt<M::Output>>
    where
        Exe: Executor,
        M: StreamMap,
    {
        Fetch::new(
            self.sql,
            self.exe.connection(),
            self.params,
            CollectOpt(None),
        )
    }

    /// Execute the statement and return the affected row count.
    #[inline]
    pub fn execute(self) -> Fetch<'val, SQL, Exe::Future, Exe::Transport, M, CollectCmd>
    where
        Exe: Executor,
    {
        Fetch::new(self.sql, self.exe.connection(), self.params, CollectCmd)
    }
}

impl<'val, SQL, Exe, M> IntoFuture for Query<'val, SQL, Exe, M>
where
    SQL: Sql + Unpin,
    Exe: Executor + Unpin,
    M: StreamMap<Output = Row> + Unpin,
{
    type Output = Result<RowResult>;

    type IntoFuture = Fetch<'val, SQL, Exe::Future, Exe::Transport, M, CollectCmd>;

    #[inline]
    fn into_future(self) -> Self::IntoFuture {
        self.execute()
    }
}

// ===== Stream Adapters =====

pub struct StreamRow<R>(PhantomData<R>);

pub struct StreamScalar<D>(PhantomData<D>);

impl<R> StreamMap for StreamRow<R>
where
    R: FromRow,
{
    type Output = R;

    #[inline]
    fn map(row: Row) -> Result<Self::Output> {
        R::from_row(row).map_err(Into::into)
    }
}

impl<D> StreamMap for StreamScalar<D>
where
    D: Decode,
{
    type Output = D;

    #[inline]
    fn map(row: Row) -> Result<Self::Output> {
        match <(D,)>::from_row(row) {
            Ok(ok) => Ok(ok.0),
            Err(err) => Err(err.into()),
        }
    }
}

// ===== Fetch Adapters =====

/// [`FetchCollect`] adapter used by [`fetch_all`][Query::fetch_all].
#[derive(Debug)]
pub struct CollectAll<R>(pub Vec<R>);

/// [`FetchCollect`] adapter used by [`fetch_one`][Query::fetch_one].
#[derive(Debug)]
pub struct CollectOne<R>(pub Option<R>);

/// [`FetchCollect`] adapter used by [`fetch_optional`][Query::fetch_optional].
#[derive(Debug)]
pub struct CollectOpt<R>(pub Option<R>);

/// [`FetchCollect`] adapter used by [`execute`][Query::execute].
#[derive(Debug)]
pub struct CollectCmd;

impl<R> FetchCollect<R> for CollectAll<R> {
    type Output = Vec<R>;

    #[inline]
    fn value(&mut self, input: R) {
        self.0.push(input);
    }

    #[inline]
    fn finish(&mut self, _: Option<RowResult>) -> Result<Self::Output> {
        Ok(std::mem::take(&mut self.0))
    }
}

impl<R> FetchCollect<R> for CollectOpt<R> {
    type Output = Option<R>;

    #[inline]
    fn value(&mut self, input: R) {
        self.0 = Some(input);
    }

    #[inline]
    fn finish(&mut self, _: Option<RowResult>) -> Result<Self::Output> {
        Ok(self.0.take())
    }
}

impl<R> FetchCollect<R> for CollectOne<R> {
    type Output = R;

    #[inline]
    fn value(&mut self, input: R) {
        self.0 = Some(input);
    }

    #[inline]
    fn finish(&mut self, _: Option<RowResult>) -> Result<Self::Output> {
        match self.0.take() {
            Some(ok) => Ok(ok),
            None => Err(RowNotFound.into()),
        }
    }
}

impl FetchCollect<Row> for CollectCmd {
    type Output = RowResult;

    #[inline]
    fn value(&mut self, _: Row) {}

    #[inline]
    fn finish(&mut self, cmd: Option<RowResult>) -> Result<Self::Output> {
        match cmd {
            Some(result) => Ok(result),
            // EmptyQueryResponse substitutes for CommandComplete
            None => Err(crate::fetch::EmptyQueryError.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{postgres::oid, transport::mock::MockTransport};

    #[tokio::test]
    async fn plain_query() {
        let mut io = MockTransport::new();
        io.serve_parse_complete();
        io.serve_parameter_description(&[]);
        io.serve_row_description(&[("?column?", oid::INT4, 0)]);
        io.serve_bind_complete();
        io.serve_data_row(&[Some(&1i32.to_be_bytes())]);
        io.serve_command_complete("SELECT 1");
        io.serve_ready_for_query();

        let row = query_as::<_, _, (i32,)>("SELECT 1", &mut io)
            .fetch_one()
            .await
            .unwrap();
        assert_eq!(row.0, 1);

        // the whole burst goes out before the first read
        assert_eq!(io.sent_types(), vec![b'P', b'D', b'B', b'E', b'S']);
    }

    #[tokio::test]
    async fn execute_reports_rows_affected() {
        let mut io = MockTransport::new();
        io.serve_parse_complete();
        io.serve_parameter_description(&[oid::INT4]);
        io.serve(b'n', b""); // NoData
        io.serve_bind_complete();
        io.serve_command_complete("INSERT 0 3");
        io.serve_ready_for_query();

        let result = execute("INSERT INTO t SELECT $1", &mut io)
            .bind(7)
            .execute()
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 3);
        assert_eq!(result.tag, "INSERT 0 3");
    }

    #[tokio::test]
    async fn statement_cache_skips_parse() {
        let mut io = MockTransport::new();
        // first run: full prepare
        io.serve_parse_complete();
        io.serve_parameter_description(&[]);
        io.serve_row_description(&[("n", oid::INT8, 0)]);
        io.serve_bind_complete();
        io.serve_data_row(&[Some(&1i64.to_be_bytes())]);
        io.serve_command_complete("SELECT 1");
        io.serve_ready_for_query();
        // second run: bind/execute only
        io.serve_bind_complete();
        io.serve_data_row(&[Some(&2i64.to_be_bytes())]);
        io.serve_command_complete("SELECT 1");
        io.serve_ready_for_query();

        let first = query_scalar::<_, _, i64>("SELECT n FROM t", &mut io)
            .fetch_one()
            .await
            .unwrap();
        let sent_before = io.sent.len();
        let second = query_scalar::<_, _, i64>("SELECT n FROM t", &mut io)
            .fetch_one()
            .await
            .unwrap();

        assert_eq!((first, second), (1, 2));
        let replay = io.sent_types()[sent_before..].to_vec();
        assert_eq!(replay, vec![b'B', b'E', b'S']);
    }

    #[tokio::test]
    async fn server_error_mid_stream_keeps_connection_usable() {
        let mut io = MockTransport::new();
        io.serve_parse_complete();
        io.serve_parameter_description(&[]);
        io.serve_row_description(&[("v", oid::INT4, 0)]);
        io.serve_bind_complete();
        io.serve_data_row(&[Some(&1i32.to_be_bytes())]);
        io.serve_error("22P02", "invalid input syntax");
        io.serve_ready_for_query(); // consumed by the drain
        // the next query succeeds
        io.serve_bind_complete();
        io.serve_data_row(&[Some(&5i32.to_be_bytes())]);
        io.serve_command_complete("SELECT 1");
        io.serve_ready_for_query();

        let err = query_scalar::<_, _, i32>("SELECT v FROM t", &mut io)
            .fetch_all()
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::Database(_)));
        assert!(!err.is_fatal());

        let again = query_scalar::<_, _, i32>("SELECT v FROM t", &mut io)
            .fetch_one()
            .await
            .unwrap();
        assert_eq!(again, 5);
    }

    #[tokio::test]
    async fn empty_query_is_an_error() {
        let mut io = MockTransport::new();
        io.serve_parse_complete();
        io.serve_parameter_description(&[]);
        io.serve(b'n', b"");
        io.serve_bind_complete();
        io.serve(b'I', b""); // EmptyQueryResponse
        io.serve_ready_for_query();

        let err = execute("", &mut io).execute().await.unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::EmptyQuery(_)));
    }

    #[tokio::test]
    async fn fetch_optional_none() {
        let mut io = MockTransport::new();
        io.serve_parse_complete();
        io.serve_parameter_description(&[]);
        io.serve_row_description(&[("v", oid::TEXT, 0)]);
        io.serve_bind_complete();
        io.serve_command_complete("SELECT 0");
        io.serve_ready_for_query();

        let row = query_scalar::<_, _, String>("SELECT v FROM t WHERE false", &mut io)
            .fetch_optional()
            .await
            .unwrap();
        assert_eq!(row, None);
    }

    #[tokio::test]
    async fn too_many_parameters() {
        let mut io = MockTransport::new();
        let mut q = query("SELECT 1", &mut io);
        for _ in 0..40_000 {
            q = q.bind(1);
        }
        let err = q.execute().await.unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::TooManyParameters(_)));
    }

    #[tokio::test]
    async fn prepare_returns_statement_handle() {
        let mut io = MockTransport::new();
        io.serve_parse_complete();
        io.serve_parameter_description(&[oid::INT8]);
        io.serve_row_description(&[("id", oid::INT8, 0)]);
        io.serve_ready_for_query();

        let stmt = prepare("SELECT id FROM t WHERE id = $1", &mut io)
            .await
            .unwrap();
        assert_eq!(stmt.param_count(), 1);
        assert!(!stmt.name().is_empty());
        assert_eq!(io.sent_types(), vec![b'P', b'D', b'S']);

        // executing the handle binds directly
        io.serve_bind_complete();
        io.serve_data_row(&[Some(&9i64.to_be_bytes())]);
        io.serve_command_complete("SELECT 1");
        io.serve_ready_for_query();

        let sent_before = io.sent.len();
        let id = query_scalar::<_, _, i64>(&stmt, &mut io)
            .bind(9i64)
            .fetch_one()
            .await
            .unwrap();
        assert_eq!(id, 9);
        assert_eq!(io.sent_types()[sent_before..].to_vec(), vec![b'B', b'E', b'S']);
    }
}
