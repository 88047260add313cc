//! The [`PgTransport`] trait.
use std::{
    io,
    task::{Context, Poll},
};

use crate::{
    Result,
    postgres::{BackendProtocol, FrontendProtocol, frontend},
    statement::Statement,
};

/// A buffered stream which can send and receive postgres messages.
pub trait PgTransport: Unpin {
    /// Poll to flush the underlying io.
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>>;

    /// Poll to receive a message.
    ///
    /// Calling `poll_recv` will also try to [`poll_flush`][1] if there is a
    /// buffered message.
    ///
    /// Implementor should handle `NoticeResponse`, `NotificationResponse`
    /// and `ParameterStatus` and should not return them.
    ///
    /// Implementor also should handle `ErrorResponse` and return it as
    /// [`Err`].
    ///
    /// [1]: PgTransport::poll_flush
    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>>;

    /// Request implementor to ignore all backend messages until the next
    /// `ReadyForQuery` is received.
    fn ready_request(&mut self);

    /// Send a message to the backend.
    ///
    /// Note that this send is buffered, the caller must also call
    /// [`poll_flush`][1] or [`flush`][2] afterwards.
    ///
    /// [1]: PgTransport::poll_flush
    /// [2]: PgTransportExt::flush
    fn send<F: FrontendProtocol>(&mut self, message: F);

    /// Send [`Startup`][1] message to the backend.
    ///
    /// For historical reasons, the very first message sent by the client
    /// (the startup message) has no initial message-type byte. Thus,
    /// [`Startup`][1] does not implement [`FrontendProtocol`].
    ///
    /// [1]: frontend::Startup
    fn send_startup(&mut self, startup: frontend::Startup);

    /// Check for an already prepared statement.
    fn get_stmt(&mut self, sql: u64) -> Option<Statement>;

    /// Add a new prepared statement.
    fn add_stmt(&mut self, sql: u64, stmt: Statement);
}

impl<P> PgTransport for &mut P where P: PgTransport {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        P::poll_flush(self, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        P::poll_recv(self, cx)
    }

    fn ready_request(&mut self) {
        P::ready_request(self);
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        P::send(self, message);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        P::send_startup(self, startup);
    }

    fn get_stmt(&mut self, sql: u64) -> Option<Statement> {
        P::get_stmt(self, sql)
    }

    fn add_stmt(&mut self, sql: u64, stmt: Statement) {
        P::add_stmt(self, sql, stmt);
    }
}

/// An extension trait to provide `Future` API for [`PgTransport`].
pub trait PgTransportExt: PgTransport {
    /// Flush the underlying io.
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        std::future::poll_fn(|cx| self.poll_flush(cx))
    }

    /// Receive a backend message.
    fn recv<B: BackendProtocol>(&mut self) -> impl Future<Output = Result<B>> {
        std::future::poll_fn(|cx| self.poll_recv(cx))
    }
}

impl<T> PgTransportExt for T where T: PgTransport { }

#[cfg(test)]
pub(crate) mod mock {
    //! A scripted transport: serves canned backend messages and records
    //! every frontend message for assertion, no sockets involved.
    use std::collections::{HashMap, VecDeque};

    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;
    use crate::{
        Error,
        postgres::backend,
    };

    pub(crate) struct MockTransport {
        script: VecDeque<(u8, Bytes)>,
        pub sent: Vec<(u8, Bytes)>,
        stmts: HashMap<u64, Statement>,
        sync_pending: usize,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                script: VecDeque::new(),
                sent: Vec::new(),
                stmts: HashMap::new(),
                sync_pending: 0,
            }
        }

        /// Queue a backend message for the client to receive.
        pub fn serve(&mut self, msgtype: u8, body: &[u8]) -> &mut Self {
            self.script.push_back((msgtype, Bytes::copy_from_slice(body)));
            self
        }

        pub fn serve_parse_complete(&mut self) -> &mut Self {
            self.serve(b'1', b"")
        }

        pub fn serve_bind_complete(&mut self) -> &mut Self {
            self.serve(b'2', b"")
        }

        pub fn serve_parameter_description(&mut self, oids: &[u32]) -> &mut Self {
            let mut body = BytesMut::new();
            body.put_u16(oids.len() as u16);
            for oid in oids {
                body.put_u32(*oid);
            }
            let body = body.freeze();
            self.serve(b't', &body)
        }

        pub fn serve_row_description(&mut self, cols: &[(&str, u32, u16)]) -> &mut Self {
            let mut body = BytesMut::new();
            body.put_u16(cols.len() as u16);
            body.put_slice(&crate::row::test::description(cols));
            let body = body.freeze();
            self.serve(b'T', &body)
        }

        pub fn serve_data_row(&mut self, cells: &[Option<&[u8]>]) -> &mut Self {
            let mut body = BytesMut::new();
            body.put_u16(cells.len() as u16);
            body.put_slice(&crate::row::test::values(cells));
            let body = body.freeze();
            self.serve(b'D', &body)
        }

        pub fn serve_command_complete(&mut self, tag: &str) -> &mut Self {
            let mut body = BytesMut::new();
            body.put_slice(tag.as_bytes());
            body.put_u8(0);
            let body = body.freeze();
            self.serve(b'C', &body)
        }

        pub fn serve_error(&mut self, sqlstate: &str, message: &str) -> &mut Self {
            let mut body = BytesMut::new();
            for (tag, value) in [(b'S', "ERROR"), (b'C', sqlstate), (b'M', message)] {
                body.put_u8(tag);
                body.put_slice(value.as_bytes());
                body.put_u8(0);
            }
            body.put_u8(0);
            let body = body.freeze();
            self.serve(b'E', &body)
        }

        pub fn serve_ready_for_query(&mut self) -> &mut Self {
            self.serve(b'Z', b"I")
        }

        /// The message types sent by the client, in order.
        pub fn sent_types(&self) -> Vec<u8> {
            self.sent.iter().map(|(t, _)| *t).collect()
        }
    }

    impl PgTransport for MockTransport {
        fn poll_flush(&mut self, _: &mut Context) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_recv<B: BackendProtocol>(&mut self, _: &mut Context) -> Poll<Result<B>> {
            loop {
                let Some((msgtype, body)) = self.script.pop_front() else {
                    // script exhausted, a correct test never gets here
                    return Poll::Pending;
                };

                if self.sync_pending > 0 {
                    if msgtype == backend::ReadyForQuery::MSGTYPE {
                        self.sync_pending -= 1;
                    }
                    continue;
                }

                if msgtype == backend::ErrorResponse::MSGTYPE {
                    let err = backend::ErrorResponse::decode(msgtype, body)
                        .expect("infallible")
                        .to_database_error();
                    self.sync_pending += 1;
                    return Poll::Ready(Err(Error::from(err)));
                }

                return Poll::Ready(B::decode(msgtype, body).map_err(Into::into));
            }
        }

        fn ready_request(&mut self) {
            self.sync_pending += 1;
        }

        fn send<F: FrontendProtocol>(&mut self, message: F) {
            let mut buf = BytesMut::new();
            frontend::write(message, &mut buf);
            let mut framed = buf.freeze();
            let msgtype = framed[0];
            let body = framed.split_off(5);
            self.sent.push((msgtype, body));
        }

        fn send_startup(&mut self, startup: frontend::Startup) {
            let mut buf = BytesMut::new();
            startup.write(&mut buf);
            self.sent.push((0, buf.freeze()));
        }

        fn get_stmt(&mut self, sql: u64) -> Option<Statement> {
            self.stmts.get(&sql).cloned()
        }

        fn add_stmt(&mut self, sql: u64, stmt: Statement) {
            self.stmts.insert(sql, stmt);
        }
    }
}
