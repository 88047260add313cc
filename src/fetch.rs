//! The extended query flow.
//!
//! One [`FetchStream`] owns a task from the `Parse`/`Bind`/`Describe`/
//! `Execute`/`Sync` burst to the matching `ReadyForQuery`. The whole burst
//! is buffered before the first read, so a task costs a single round trip.
use futures_core::Stream;
use std::{
    fmt,
    hash::{DefaultHasher, Hash, Hasher},
    marker::PhantomData,
    mem,
    pin::Pin,
    task::{
        Context,
        Poll::{self, *},
        ready,
    },
};

use crate::{
    Error, Result, Row,
    buffer::RowBuffer,
    common::ByteStr,
    encode::Encoded,
    ext::UsizeExt,
    postgres::{
        PgFormat, ProtocolError,
        backend::{self, BackendMessage},
        frontend,
    },
    row::RowResult,
    sql::Sql,
    statement::{PortalName, Statement, StatementName},
    transport::PgTransport,
};

/// The `Bind` parameter count is an `Int16` on the wire.
pub(crate) const MAX_PARAMETERS: usize = 32767;

#[derive(Debug)]
pub(crate) struct PrepareData {
    pub sqlid: u64,
    pub stmt: Statement,
    pub cache_hit: bool,
    pub persist: bool,
}

/// Write `Parse` + `Describe(statement)` unless the statement is cached.
fn prepare(sql: &impl Sql, params: &[Encoded], mut io: impl PgTransport) -> PrepareData {
    let persist = sql.persistent();
    let text = sql.sql().trim();

    let sqlid = {
        let mut buf = DefaultHasher::new();
        text.hash(&mut buf);
        buf.finish()
    };

    if persist {
        if let Some(stmt) = io.get_stmt(sqlid) {
            return PrepareData { sqlid, stmt, cache_hit: true, persist };
        }
    }

    let name = match persist {
        true => StatementName::next(),
        false => StatementName::unnamed(),
    };

    io.send(frontend::Parse {
        prepare_name: name.as_str(),
        sql: text,
        oids_len: params.len() as i16,
        oids: params.iter().map(Encoded::oid),
    });
    io.send(frontend::Describe { kind: b'S', name: name.as_str() });

    PrepareData {
        sqlid,
        stmt: Statement {
            name,
            sql: ByteStr::copy_from_str(text),
            row: None,
            params: params.iter().map(Encoded::oid).collect(),
        },
        cache_hit: false,
        persist,
    }
}

/// Write `Bind` + `Execute` + `Sync`.
///
/// Responses possible:
/// - `BindComplete` from `Bind`
/// - `DataRow` from `Execute`
/// - `Execute` phase is terminated by exactly one of `CommandComplete`,
///   `EmptyQueryResponse` or `ErrorResponse`
/// - `ReadyForQuery` from `Sync`
fn portal(stmt: &Statement, params: &mut Vec<Encoded>, mut io: impl PgTransport) {
    let portal = PortalName::unnamed();

    io.send(frontend::Bind {
        portal_name: portal.as_str(),
        stmt_name: stmt.name.as_str(),
        param_formats_len: 1,
        param_formats: [PgFormat::Binary],
        params_len: params.len().to_u16(),
        params_size_hint: params.iter().fold(0i32, |acc, p| acc + 4 + p.size().max(0)),
        params: mem::take(params).into_iter(),
        result_formats_len: 1,
        result_formats: [PgFormat::Binary],
    });
    io.send(frontend::Execute {
        portal_name: portal.as_str(),
        // no row limit, the portal always runs to completion
        max_row: 0,
    });
    io.send(frontend::Sync);
}

/// Decode the affected row count from a [`CommandComplete`][1] message.
///
/// [1]: backend::CommandComplete
pub(crate) fn command_complete(cmd: backend::CommandComplete) -> Result<RowResult> {
    let tag = ByteStr::from_utf8(cmd.tag).map_err(|_| InvalidCommandTag)?;

    let rows_affected = {
        let mut whs = tag.split_whitespace();
        match (whs.next(), whs.next(), whs.next()) {
            (Some("INSERT"), Some(_oid), Some(rows)) => rows.parse().unwrap_or_default(),
            (
                Some("SELECT" | "UPDATE" | "DELETE" | "MERGE" | "FETCH" | "MOVE" | "COPY"),
                Some(rows),
                _,
            ) => rows.parse().unwrap_or_default(),
            _ => 0,
        }
    };

    Ok(RowResult { rows_affected, tag })
}

/// Maps raw rows into the stream's item type.
pub trait StreamMap {
    type Output;

    fn map(row: Row) -> Result<Self::Output>;
}

/// Accumulates stream items into the final future output.
pub trait FetchCollect<R> {
    type Output;

    fn value(&mut self, input: R);

    fn finish(&mut self, cmd: Option<RowResult>) -> Result<Self::Output>;
}

/// Row stream for one extended query.
#[derive(Debug)]
#[must_use = "streams do nothing unless polled"]
pub struct FetchStream<'val, SQL, ExeFut, IO, M>
where
    IO: PgTransport + Unpin,
{
    sql: SQL,
    io: Option<IO>,
    data: Option<PrepareData>,
    phase: Phase<ExeFut>,
    params: Vec<Encoded<'val>>,
    buffer: RowBuffer,
    pub(crate) cmd: Option<RowResult>,
    _p: PhantomData<M>,
}

#[derive(Debug)]
enum Phase<ExeFut> {
    Connect { f: ExeFut },
    Prepare,
    ParseComplete,
    Describe,
    BindComplete,
    DataRow { template: Row },
    /// Command completed, flush rows still buffered.
    Tail,
    /// Statement returns no rows, await the completion tag.
    NoRows,
    ReadyForQuery,
    Complete,
    Failed(Option<Error>),
}

impl<'val, SQL, ExeFut, IO, M> FetchStream<'val, SQL, ExeFut, IO, M>
where
    IO: PgTransport + Unpin,
{
    pub(crate) fn new(sql: SQL, exe: ExeFut, params: Vec<Encoded<'val>>) -> Self {
        Self {
            sql,
            io: None,
            data: None,
            phase: Phase::Connect { f: exe },
            params,
            buffer: RowBuffer::new(),
            cmd: None,
            _p: PhantomData,
        }
    }

    /// End the stream with `err` on its next poll.
    fn fail(&mut self, err: Error) -> Poll<Option<Result<M::Output>>>
    where
        M: StreamMap,
    {
        self.phase = Phase::Complete;
        Ready(Some(Err(err)))
    }
}

impl<SQL, ExeFut, IO, M> Stream for FetchStream<'_, SQL, ExeFut, IO, M>
where
    SQL: Sql + Unpin,
    ExeFut: Future<Output = Result<IO>> + Unpin,
    IO: PgTransport + Unpin,
    M: StreamMap + Unpin,
{
    type Item = Result<M::Output>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();

        loop {
            match &mut me.phase {
                Phase::Connect { f } => {
                    let io = match ready!(Pin::new(f).poll(cx)) {
                        Ok(io) => io,
                        Err(err) => return me.fail(err),
                    };
                    me.io = Some(io);
                    if me.params.len() > MAX_PARAMETERS {
                        let err = TooManyParameters { given: me.params.len() };
                        me.phase = Phase::Failed(Some(err.into()));
                        continue;
                    }
                    me.phase = Phase::Prepare;
                },
                Phase::Prepare => {
                    let io = me.io.as_mut().unwrap();
                    let data = prepare(&me.sql, &me.params, &mut *io);
                    portal(&data.stmt, &mut me.params, &mut *io);
                    me.phase = match data.cache_hit {
                        true => Phase::BindComplete,
                        false => Phase::ParseComplete,
                    };
                    me.data = Some(data);
                },
                Phase::ParseComplete => {
                    let io = me.io.as_mut().unwrap();
                    match ready!(io.poll_recv::<backend::ParseComplete>(cx)) {
                        Ok(_) => me.phase = Phase::Describe,
                        Err(err) => return me.fail(err),
                    }
                },
                Phase::Describe => {
                    let io = me.io.as_mut().unwrap();
                    let msg = match ready!(io.poll_recv::<BackendMessage>(cx)) {
                        Ok(msg) => msg,
                        Err(err) => return me.fail(err),
                    };
                    let data = me.data.as_mut().unwrap();
                    match msg {
                        BackendMessage::ParameterDescription(pd) => {
                            data.stmt.params = pd.iter().collect();
                        },
                        BackendMessage::RowDescription(rd) => {
                            data.stmt.row = Some((rd.field_len, rd.body));
                            if data.persist {
                                io.add_stmt(data.sqlid, data.stmt.clone());
                            }
                            me.phase = Phase::BindComplete;
                        },
                        BackendMessage::NoData(_) => {
                            data.stmt.row = None;
                            if data.persist {
                                io.add_stmt(data.sqlid, data.stmt.clone());
                            }
                            me.phase = Phase::BindComplete;
                        },
                        f => {
                            io.ready_request();
                            return me.fail(f.unexpected("statement description").into());
                        },
                    }
                },
                Phase::BindComplete => {
                    let io = me.io.as_mut().unwrap();
                    match ready!(io.poll_recv::<backend::BindComplete>(cx)) {
                        Ok(_) => {},
                        Err(err) => return me.fail(err),
                    }
                    me.phase = match &me.data.as_ref().unwrap().stmt.row {
                        Some((field_len, body)) => Phase::DataRow {
                            template: Row::new(*field_len, body.clone()).binary(),
                        },
                        None => Phase::NoRows,
                    };
                },
                Phase::DataRow { template } => {
                    if let Some((row, _demand)) = me.buffer.pop() {
                        let result = M::map(row);
                        if result.is_err() {
                            me.io.as_mut().unwrap().ready_request();
                            me.phase = Phase::Complete;
                        }
                        return Ready(Some(result));
                    }

                    // fill from bytes already received while demand holds
                    loop {
                        let io = me.io.as_mut().unwrap();
                        match io.poll_recv::<BackendMessage>(cx) {
                            Pending => match me.buffer.is_empty() {
                                true => return Pending,
                                false => break,
                            },
                            Ready(Err(err)) => return me.fail(err),
                            Ready(Ok(BackendMessage::DataRow(dr))) => {
                                if dr.column_len != template.len() {
                                    io.ready_request();
                                    return me.fail(ProtocolError::malformed(
                                        backend::DataRow::MSGTYPE,
                                        "row column count differs from description",
                                    )
                                    .into());
                                }
                                me.buffer.push(template.with_values(dr.body));
                                if !me.buffer.demand() {
                                    me.buffer.filled();
                                    break;
                                }
                            },
                            Ready(Ok(BackendMessage::CommandComplete(cmd))) => {
                                match command_complete(cmd) {
                                    Ok(result) => me.cmd = Some(result),
                                    Err(err) => {
                                        io.ready_request();
                                        return me.fail(err);
                                    },
                                }
                                me.phase = Phase::Tail;
                                break;
                            },
                            Ready(Ok(BackendMessage::EmptyQueryResponse(_))) => {
                                me.phase = Phase::ReadyForQuery;
                                break;
                            },
                            Ready(Ok(f)) => {
                                // includes PortalSuspended, the portal
                                // never carries a row limit
                                io.ready_request();
                                return me.fail(f.unexpected("row streaming").into());
                            },
                        }
                    }
                },
                Phase::Tail => {
                    match me.buffer.pop() {
                        Some((row, _)) => {
                            let result = M::map(row);
                            if result.is_err() {
                                me.io.as_mut().unwrap().ready_request();
                                me.phase = Phase::Complete;
                            }
                            return Ready(Some(result));
                        },
                        None => me.phase = Phase::ReadyForQuery,
                    }
                },
                Phase::NoRows => {
                    let io = me.io.as_mut().unwrap();
                    let msg = match ready!(io.poll_recv::<BackendMessage>(cx)) {
                        Ok(msg) => msg,
                        Err(err) => return me.fail(err),
                    };
                    match msg {
                        BackendMessage::CommandComplete(cmd) => {
                            match command_complete(cmd) {
                                Ok(result) => me.cmd = Some(result),
                                Err(err) => {
                                    io.ready_request();
                                    return me.fail(err);
                                },
                            }
                            me.phase = Phase::ReadyForQuery;
                        },
                        BackendMessage::EmptyQueryResponse(_) => {
                            me.phase = Phase::ReadyForQuery;
                        },
                        f => {
                            io.ready_request();
                            return me.fail(f.unexpected("statement execution").into());
                        },
                    }
                },
                Phase::ReadyForQuery => {
                    let io = me.io.as_mut().unwrap();
                    match ready!(io.poll_recv::<backend::ReadyForQuery>(cx)) {
                        Ok(_) => me.phase = Phase::Complete,
                        Err(err) => return me.fail(err),
                    }
                },
                Phase::Complete => return Ready(None),
                Phase::Failed(err) => {
                    let err = err.take();
                    me.phase = Phase::Complete;
                    return match err {
                        Some(err) => Ready(Some(Err(err))),
                        None => Ready(None),
                    };
                },
            }
        }
    }
}

impl<SQL, ExeFut, IO, M> Drop for FetchStream<'_, SQL, ExeFut, IO, M>
where
    IO: PgTransport + Unpin,
{
    /// A stream dropped mid-query leaves the rest of its messages on the
    /// wire; request a drain to the next `ReadyForQuery` so the connection
    /// stays usable.
    fn drop(&mut self) {
        let abandoned = !matches!(
            self.phase,
            Phase::Connect { .. } | Phase::Prepare | Phase::Complete | Phase::Failed(_),
        );
        if abandoned {
            if let Some(io) = self.io.as_mut() {
                io.ready_request();
            }
        }
    }
}

/// Future driving a [`FetchStream`] into a [`FetchCollect`] adapter.
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Fetch<'val, SQL, ExeFut, IO, M, C>
where
    IO: PgTransport + Unpin,
{
    stream: FetchStream<'val, SQL, ExeFut, IO, M>,
    collect: C,
}

impl<'val, SQL, ExeFut, IO, M, C> Fetch<'val, SQL, ExeFut, IO, M, C>
where
    IO: PgTransport + Unpin,
{
    pub(crate) fn new(sql: SQL, exe: ExeFut, params: Vec<Encoded<'val>>, collect: C) -> Self {
        Self {
            stream: FetchStream::new(sql, exe, params),
            collect,
        }
    }
}

impl<SQL, ExeFut, IO, M, C> Future for Fetch<'_, SQL, ExeFut, IO, M, C>
where
    SQL: Sql + Unpin,
    ExeFut: Future<Output = Result<IO>> + Unpin,
    IO: PgTransport + Unpin,
    M: StreamMap + Unpin,
    C: FetchCollect<M::Output> + Unpin,
{
    type Output = Result<C::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        while let Some(result) = ready!(Pin::new(&mut me.stream).poll_next(cx)) {
            match result {
                Ok(value) => me.collect.value(value),
                Err(err) => return Ready(Err(err)),
            }
        }

        Ready(me.collect.finish(me.stream.cmd.take()))
    }
}

/// The sql string was empty.
#[derive(Debug)]
pub struct EmptyQueryError;

impl std::error::Error for EmptyQueryError { }

impl fmt::Display for EmptyQueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("query string is empty")
    }
}

/// More bind parameters than the wire format can carry.
#[derive(Debug)]
pub struct TooManyParameters {
    pub given: usize,
}

impl std::error::Error for TooManyParameters { }

impl fmt::Display for TooManyParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bind parameters, the protocol carries at most {MAX_PARAMETERS}", self.given)
    }
}

/// The command completion tag was not valid UTF-8.
#[derive(Debug)]
pub struct InvalidCommandTag;

impl std::error::Error for InvalidCommandTag { }

impl fmt::Display for InvalidCommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unparsable command completion tag")
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;

    fn tag(s: &str) -> backend::CommandComplete {
        backend::CommandComplete { tag: Bytes::copy_from_slice(s.as_bytes()) }
    }

    #[test]
    fn command_tags() {
        assert_eq!(command_complete(tag("SELECT 3")).unwrap().rows_affected, 3);
        assert_eq!(command_complete(tag("INSERT 0 5")).unwrap().rows_affected, 5);
        assert_eq!(command_complete(tag("UPDATE 2")).unwrap().rows_affected, 2);
        assert_eq!(command_complete(tag("DELETE 0")).unwrap().rows_affected, 0);
        assert_eq!(command_complete(tag("CREATE TABLE")).unwrap().rows_affected, 0);
        assert_eq!(command_complete(tag("LISTEN")).unwrap().rows_affected, 0);
    }

    #[test]
    fn command_tag_keeps_text() {
        let result = command_complete(tag("INSERT 0 1")).unwrap();
        assert_eq!(result.tag, "INSERT 0 1");
    }

    #[test]
    fn invalid_utf8_tag() {
        let cmd = backend::CommandComplete { tag: Bytes::from_static(&[0xff, 0xfe]) };
        assert!(command_complete(cmd).is_err());
    }
}
