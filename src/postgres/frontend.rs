//! Postgres frontend messages.
//!
//! All struct fields here mirror the actual message sent to postgres.
use bytes::{BufMut, BytesMut};

use super::{Oid, PgFormat};
use crate::{
    encode::Encoded,
    ext::{BufMutExt, StrExt, UsizeExt},
};

/// Write a frontend message to `buf`.
///
/// The message is buffered; flushing happens at the transport level so a
/// task's whole message burst goes out in one write.
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    // msgtype + length
    const PREFIX: usize = 1 + 4;

    let size = msg.size_hint();
    buf.reserve(PREFIX + size as usize);

    let offset = buf.len();
    buf.put_u8(F::MSGTYPE);
    buf.put_i32(4 + size);

    msg.encode(&mut *buf);

    assert_eq!(
        buf.len() - offset,
        PREFIX + size as usize,
        "frontend message body not equal to size hint"
    );
}

/// A type which can be encoded into a postgres frontend message.
///
/// For historical reasons, the very first message sent by the client (the
/// startup message) has no initial message-type byte. Thus, [`Startup`] and
/// the pre-startup pseudo messages do not implement [`FrontendProtocol`].
pub trait FrontendProtocol {
    /// message type
    const MSGTYPE: u8;

    /// Size of the main body, excluding the type byte and the length field.
    fn size_hint(&self) -> i32;

    /// Write the main body of the message.
    ///
    /// `buf` have the length returned from `size_hint`,
    /// writing less or past length results in panic.
    fn encode(self, buf: impl BufMut);
}

/// Postgres startup message.
///
/// Sent without a message-type byte; the protocol version number doubles as
/// the discriminator.
#[derive(Debug)]
pub struct Startup<'a> {
    /// The database user name to connect as. Required; there is no default.
    pub user: &'a str,
    /// The database to connect to. Defaults to the user name.
    pub database: Option<&'a str>,
    /// Reported in `pg_stat_activity` and log lines.
    pub application_name: Option<&'a str>,
    /// Additional run-time parameters applied as session defaults.
    pub params: &'a [(String, String)],
}

impl Startup<'_> {
    pub fn write(self, buf: &mut BytesMut) {
        let offset = buf.len();

        // Length of message contents in bytes, including self.
        // reserve 4 bytes for length
        buf.put_i32(0);

        // The protocol version number: 3 in the most significant 16 bits,
        // minor version 0 in the least significant.
        buf.put_i32(196608);

        // The protocol version number is followed by one or more pairs of
        // parameter name and value strings.

        buf.put_nul_string("user");
        buf.put_nul_string(self.user);

        if let Some(db) = self.database {
            buf.put_nul_string("database");
            buf.put_nul_string(db);
        }

        // The session always talks UTF-8; every string codec relies on it.
        buf.put_nul_string("client_encoding");
        buf.put_nul_string("UTF8");

        if let Some(name) = self.application_name {
            buf.put_nul_string("application_name");
            buf.put_nul_string(name);
        }

        for (k, v) in self.params {
            buf.put_nul_string(k);
            buf.put_nul_string(v);
        }

        // A zero byte is required as a terminator after the last name/value pair.
        buf.put_u8(b'\0');

        // write the length over the reserved bytes
        let mut written_buf = &mut buf[offset..];
        written_buf.put_i32(written_buf.len().to_i32());
    }
}

/// Out-of-band query cancellation, sent on its own connection.
///
/// Like [`Startup`] this carries no message-type byte.
#[derive(Debug)]
pub struct CancelRequest {
    /// The process ID of the target backend.
    pub process_id: u32,
    /// The secret key for the target backend.
    pub secret_key: u32,
}

impl CancelRequest {
    pub fn write(self, buf: &mut BytesMut) {
        buf.put_i32(16);
        // The cancel request code.
        buf.put_i32(80877102);
        buf.put_u32(self.process_id);
        buf.put_u32(self.secret_key);
    }
}

/// Password response, cleartext or md5 hashed as requested by the server.
#[derive(Debug)]
pub struct PasswordMessage<'a> {
    /// The password (encrypted, if requested).
    pub password: &'a str,
}

impl FrontendProtocol for PasswordMessage<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> i32 {
        self.password.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.password);
    }
}

/// Initial SASL response carrying the selected mechanism name.
#[derive(Debug)]
pub struct SaslInitialResponse<'a> {
    /// Name of the SASL authentication mechanism that the client selected.
    pub mechanism: &'a str,
    /// SASL mechanism specific "Initial Client Response".
    pub response: &'a [u8],
}

impl FrontendProtocol for SaslInitialResponse<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> i32 {
        self.mechanism.nul_string_len() + 4 + self.response.len().to_i32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.mechanism);
        buf.put_i32(self.response.len().to_i32());
        buf.put_slice(self.response);
    }
}

/// Continuation SASL response.
#[derive(Debug)]
pub struct SaslResponse<'a> {
    /// SASL mechanism specific message data.
    pub data: &'a [u8],
}

impl FrontendProtocol for SaslResponse<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> i32 {
        self.data.len().to_i32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_slice(self.data);
    }
}

/// Identifies the message as a simple query.
#[derive(Debug)]
pub struct Query<'a> {
    /// The query string itself.
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn size_hint(&self) -> i32 {
        self.sql.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Identifies the message as a Parse command.
#[derive(Debug)]
pub struct Parse<'a, I> {
    /// Prepared statement name (an empty string selects the unnamed prepared statement).
    pub prepare_name: &'a str,
    /// The query string to be parsed.
    pub sql: &'a str,
    /// The number of parameter data types specified (can be zero).
    ///
    /// Note that this is not an indication of the number of parameters that
    /// might appear in the query string, only the number that the frontend
    /// wants to prespecify types for.
    pub oids_len: i16,
    /// The object ID of each parameter data type.
    ///
    /// Placing a zero here is equivalent to leaving the type unspecified.
    pub oids: I,
}

impl<I> FrontendProtocol for Parse<'_, I>
where
    I: IntoIterator<Item = Oid>,
{
    const MSGTYPE: u8 = b'P';

    fn size_hint(&self) -> i32 {
        self.prepare_name.nul_string_len()
            + self.sql.nul_string_len()
            + 2
            + (self.oids_len as i32 * 4)
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.prepare_name);
        buf.put_nul_string(self.sql);
        buf.put_i16(self.oids_len);
        for oid in self.oids {
            buf.put_u32(oid);
        }
    }
}

/// Identifies the message as a Bind command.
pub struct Bind<'a, ParamFmts, Params, ResultFmts> {
    /// The name of the destination portal (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// The name of the source prepared statement (an empty string selects the
    /// unnamed prepared statement).
    pub stmt_name: &'a str,

    /// The number of parameter format codes that follow.
    ///
    /// This can be zero to indicate that there are no parameters or that the
    /// parameters all use the default format (text); or one, in which case the
    /// specified format code is applied to all parameters; or it can equal
    /// the actual number of parameters.
    pub param_formats_len: u16,

    /// The parameter [`PgFormat`]s.
    pub param_formats: ParamFmts,

    /// The number of parameter values that follow (possibly zero).
    ///
    /// This must match the number of parameters needed by the query.
    pub params_len: u16,

    /// Sum over parameters of `4 + value length`, with NULL values
    /// contributing `4`.
    pub params_size_hint: i32,

    /// The parameter values. Each is written as `Int32` length (`-1` for
    /// NULL, no value bytes follow) then the value bytes in the format
    /// indicated by the associated format code.
    pub params: Params,

    /// The number of result-column format codes that follow.
    ///
    /// This can be zero to indicate that there are no result columns or that
    /// the result columns should all use the default format (text); or one,
    /// in which case the specified format code is applied to all result
    /// columns (if any); or it can equal the actual number of result columns
    /// of the query.
    pub result_formats_len: u16,

    /// The result-column [`PgFormat`]s.
    pub result_formats: ResultFmts,
}

impl<'a, ParamFmts, Params, ResultFmts> FrontendProtocol for Bind<'a, ParamFmts, Params, ResultFmts>
where
    ParamFmts: IntoIterator<Item = PgFormat>,
    Params: IntoIterator<Item = Encoded<'a>>,
    ResultFmts: IntoIterator<Item = PgFormat>,
{
    const MSGTYPE: u8 = b'B';

    fn size_hint(&self) -> i32 {
        self.portal_name.nul_string_len()
            + self.stmt_name.nul_string_len()
            // param_formats_len (i16)
            + 2
            // param format codes (i16[])
            + (self.param_formats_len as i32 * 2)
            // params_len (i16)
            + 2
            // per parameter length prefix and value
            + self.params_size_hint
            // result_formats_len (i16)
            + 2
            // result format codes (i16[])
            + (self.result_formats_len as i32 * 2)
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_nul_string(self.stmt_name);

        buf.put_u16(self.param_formats_len);
        for format in self.param_formats {
            buf.put_u16(format.format_code());
        }

        buf.put_u16(self.params_len);
        for param in self.params {
            buf.put_i32(param.size());
            buf.put(param);
        }

        buf.put_u16(self.result_formats_len);
        for format in self.result_formats {
            buf.put_u16(format.format_code());
        }
    }
}

/// Identifies the message as a Describe command.
#[derive(Debug)]
pub struct Describe<'a> {
    /// `'S'` to describe a prepared statement; or `'P'` to describe a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal to describe
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Describe<'_> {
    const MSGTYPE: u8 = b'D';

    fn size_hint(&self) -> i32 {
        1 + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as an Execute command.
#[derive(Debug)]
pub struct Execute<'a> {
    /// The name of the portal to execute (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// Maximum number of rows to return, if portal contains a query that
    /// returns rows (ignored otherwise). Zero denotes "no limit".
    pub max_row: i32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn size_hint(&self) -> i32 {
        self.portal_name.nul_string_len() + 4
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_i32(self.max_row);
    }
}

/// Identifies the message as a Close command.
#[derive(Debug)]
pub struct Close<'a> {
    /// `'S'` to close a prepared statement; or `'P'` to close a portal.
    pub variant: u8,
    /// The name of the prepared statement or portal to close
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Close<'_> {
    const MSGTYPE: u8 = b'C';

    fn size_hint(&self) -> i32 {
        1 + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.variant);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as a Sync command.
///
/// Every extended-query burst ends with one, guaranteeing a matching
/// `ReadyForQuery`.
#[derive(Debug)]
pub struct Sync;

impl FrontendProtocol for Sync {
    const MSGTYPE: u8 = b'S';

    fn size_hint(&self) -> i32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// Identifies the message as a Flush command.
#[derive(Debug)]
pub struct Flush;

impl FrontendProtocol for Flush {
    const MSGTYPE: u8 = b'H';

    fn size_hint(&self) -> i32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// Identifies the message as a termination.
///
/// Sent on graceful close; the server then closes the connection.
#[derive(Debug)]
pub struct Terminate;

impl FrontendProtocol for Terminate {
    const MSGTYPE: u8 = b'X';

    fn size_hint(&self) -> i32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

#[cfg(test)]
mod test {
    use bytes::{Buf, BytesMut};

    use super::*;

    #[test]
    fn startup_layout() {
        let mut buf = BytesMut::new();
        Startup {
            user: "u",
            database: Some("d"),
            application_name: None,
            params: &[],
        }
        .write(&mut buf);

        let mut msg = buf.freeze();
        let len = msg.get_i32();
        assert_eq!(len as usize, msg.remaining() + 4);
        assert_eq!(msg.get_i32(), 196608);
        // parameter block ends with an extra nul
        assert_eq!(
            &msg[..],
            b"user\0u\0database\0d\0client_encoding\0UTF8\0\0",
        );
    }

    #[test]
    fn execute_layout() {
        let mut buf = BytesMut::new();
        write(Execute { portal_name: "", max_row: 0 }, &mut buf);
        assert_eq!(&buf[..], &[b'E', 0, 0, 0, 9, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn sync_is_empty() {
        let mut buf = BytesMut::new();
        write(Sync, &mut buf);
        assert_eq!(&buf[..], &[b'S', 0, 0, 0, 4]);
    }

    #[test]
    fn cancel_request_layout() {
        let mut buf = BytesMut::new();
        CancelRequest { process_id: 42, secret_key: 7 }.write(&mut buf);
        let mut msg = buf.freeze();
        assert_eq!(msg.get_i32(), 16);
        assert_eq!(msg.get_i32(), 80877102);
        assert_eq!(msg.get_u32(), 42);
        assert_eq!(msg.get_u32(), 7);
    }
}
