//! Postgres backend messages.
use bytes::{Buf, Bytes, BytesMut};

use super::ProtocolError;
use crate::{common::ByteStr, ext::BytesExt};

/// A type that can be decoded from a postgres backend message.
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Split one framed message off the front of `buf`.
///
/// Returns `None` when the buffer does not yet hold a complete message;
/// the caller reads more and retries. The length field includes itself and
/// excludes the type byte.
pub(crate) fn frame(buf: &mut BytesMut) -> Result<Option<(u8, Bytes)>, ProtocolError> {
    let Some(mut header) = buf.get(..5) else {
        return Ok(None);
    };

    let msgtype = header.get_u8();
    let len = header.get_i32();

    if len < 4 {
        return Err(ProtocolError::invalid_length(msgtype, len));
    }

    if buf.len() - 1/*msgtype*/ < len as usize {
        return Ok(None);
    }

    buf.advance(5);
    let body = buf.split_to(len as usize - 4).freeze();
    Ok(Some((msgtype, body)))
}

fn need(body: &Bytes, n: usize, msgtype: u8) -> Result<(), ProtocolError> {
    if body.remaining() < n {
        return Err(ProtocolError::malformed(msgtype, "payload too short"));
    }
    Ok(())
}

/// Postgres backend messages.
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    EmptyQueryResponse(EmptyQueryResponse),
    ErrorResponse(ErrorResponse),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    NoData(NoData),
    NoticeResponse(NoticeResponse),
    NotificationResponse(NotificationResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }

            /// Get message name from message type.
            ///
            /// Returns `"Unknown"` for unknown message type.
            pub fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }

            pub(crate) fn unexpected(&self, phase: &'static str) -> ProtocolError {
                ProtocolError::unexpected_phase(self.msgtype(), phase)
            }
        }

        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    DataRow,
    EmptyQueryResponse,
    ErrorResponse,
    NegotiateProtocolVersion,
    NoData,
    NoticeResponse,
    NotificationResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(Self::MSGTYPE, $typ));
        }
    };
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that Kerberos V5 authentication is required.
    KerberosV5,
    /// Specifies that a clear-text password is required.
    CleartextPassword,
    /// Specifies that an MD5-encrypted password is required.
    MD5Password {
        /// The salt to use when encrypting the password.
        salt: [u8; 4],
    },
    /// Specifies that GSSAPI authentication is required.
    GSS,
    /// GSSAPI or SSPI authentication data.
    GSSContinue {
        data: Bytes,
    },
    /// Specifies that SSPI authentication is required.
    SSPI,
    /// Specifies that SASL authentication is required.
    SASL {
        /// Nul separated list of SASL mechanism names, in the server's
        /// order of preference, terminated by an empty name.
        mechanisms: Bytes,
    },
    /// Specifies that this message contains a SASL challenge.
    SASLContinue {
        /// SASL data, specific to the SASL mechanism being used.
        data: Bytes,
    },
    /// Specifies that SASL authentication has completed.
    SASLFinal {
        /// SASL outcome "additional data", specific to the SASL mechanism being used.
        data: Bytes,
    },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';

    /// Iterate the advertised SASL mechanism names.
    pub fn sasl_mechanisms(mechanisms: &Bytes) -> impl Iterator<Item = &str> {
        mechanisms
            .split(|b| *b == 0)
            .filter(|m| !m.is_empty())
            .filter_map(|m| std::str::from_utf8(m).ok())
    }
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need(&body, 4, msgtype)?;
        let auth = match body.get_u32() {
            0 => Authentication::Ok,
            2 => Authentication::KerberosV5,
            3 => Authentication::CleartextPassword,
            5 => {
                need(&body, 4, msgtype)?;
                Authentication::MD5Password { salt: body.get_u32().to_be_bytes() }
            },
            7 => Authentication::GSS,
            8 => Authentication::GSSContinue { data: body },
            9 => Authentication::SSPI,
            10 => Authentication::SASL { mechanisms: body },
            11 => Authentication::SASLContinue { data: body },
            12 => Authentication::SASLFinal { data: body },
            method => return Err(ProtocolError::unknown_auth(method)),
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue
/// `CancelRequest` messages later.
#[derive(Clone, Copy, Debug)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: u32,
    /// The secret key of this backend.
    pub secret_key: u32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need(&body, 8, msgtype)?;
        Ok(Self {
            process_id: body.get_u32(),
            secret_key: body.get_u32(),
        })
    }
}

/// Identifies the message as a run-time parameter status report.
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported.
    pub name: ByteStr,
    /// The current value of the parameter.
    pub value: ByteStr,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            name: body.get_nul_bytestr()?,
            value: body.get_nul_bytestr()?,
        })
    }
}

/// An asynchronous notification from `NOTIFY`.
#[derive(Debug)]
pub struct NotificationResponse {
    /// The process ID of the notifying backend.
    pub process_id: u32,
    /// The name of the channel that the notify has been raised on.
    pub channel: ByteStr,
    /// The "payload" string passed from the notifying process.
    pub payload: ByteStr,
}

impl NotificationResponse {
    pub const MSGTYPE: u8 = b'A';
}

impl BackendProtocol for NotificationResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need(&body, 4, msgtype)?;
        Ok(Self {
            process_id: body.get_u32(),
            channel: body.get_nul_bytestr()?,
            payload: body.get_nul_bytestr()?,
        })
    }
}

/// A warning message. The frontend should display the message.
#[derive(Debug)]
pub struct NoticeResponse {
    /// Identified fields in the `ErrorResponse` layout.
    pub body: Bytes,
}

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(NoticeResponse { body })
    }
}

impl std::fmt::Display for NoticeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        super::DatabaseError::parse(self.body.clone()).fmt(f)
    }
}

/// Identifies the message as an error.
///
/// The message body consists of one or more identified fields, followed by
/// a zero byte as a terminator. Fields can appear in any order.
#[derive(Debug)]
pub struct ErrorResponse {
    pub body: Bytes,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';

    pub fn to_database_error(&self) -> super::DatabaseError {
        super::DatabaseError::parse(self.body.clone())
    }
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

/// Identifies the message as a row description.
#[derive(Debug)]
pub struct RowDescription {
    /// Specifies the number of fields in a row (can be zero).
    pub field_len: u16,
    /// Undecoded response body.
    pub body: Bytes,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need(&body, 2, msgtype)?;
        Ok(Self {
            field_len: body.get_u16(),
            body,
        })
    }
}

/// Identifies the message as a data row.
#[derive(Debug)]
pub struct DataRow {
    /// The number of column values that follow (possibly zero).
    pub column_len: u16,
    pub body: Bytes,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need(&body, 2, msgtype)?;
        Ok(Self {
            column_len: body.get_u16(),
            body,
        })
    }
}

/// Identifies the message as a command-completed response.
///
/// The tag is usually a single word that identifies which SQL command was
/// completed, followed by the affected row count, e.g. `INSERT 0 1`,
/// `SELECT 3`, `UPDATE 2`.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag.
    pub tag: Bytes,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let tag = match body.iter().position(|e| matches!(e, b'\0')) {
            Some(end) => body.split_to(end),
            None => body,
        };
        Ok(Self { tag })
    }
}

/// Identifies the message as a protocol version negotiation message.
#[derive(Debug)]
pub struct NegotiateProtocolVersion {
    /// Newest minor protocol version supported by the server for the major
    /// protocol version requested by the client.
    pub minor: u32,
    /// Number of protocol options not recognized by the server.
    pub len: u32,
    /// For each protocol option not recognized by the server, its name.
    pub opt_names: Bytes,
}

impl NegotiateProtocolVersion {
    pub const MSGTYPE: u8 = b'v';
}

impl BackendProtocol for NegotiateProtocolVersion {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need(&body, 8, msgtype)?;
        Ok(Self {
            minor: body.get_u32(),
            len: body.get_u32(),
            opt_names: body,
        })
    }
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription {
    /// The number of parameters used by the statement (can be zero).
    pub param_len: u16,
    /// The object ID of each parameter data type.
    pub oids: Bytes,
}

impl ParameterDescription {
    pub const MSGTYPE: u8 = b't';

    /// Iterate the parameter type oids.
    pub fn iter(&self) -> impl Iterator<Item = super::Oid> + '_ {
        self.oids.chunks_exact(4).map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
    }
}

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need(&body, 2, msgtype)?;
        let param_len = body.get_u16();
        need(&body, param_len as usize * 4, msgtype)?;
        Ok(Self { param_len, oids: body })
    }
}

/// Current backend transaction status indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    /// Idle (not in a transaction block).
    Idle,
    /// In a transaction block.
    Transaction,
    /// In a failed transaction block
    /// (queries will be rejected until block is ended).
    Failed,
}

/// ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    pub tx_status: TxStatus,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need(&body, 1, msgtype)?;
        let tx_status = match body.get_u8() {
            b'I' => TxStatus::Idle,
            b'T' => TxStatus::Transaction,
            b'E' => TxStatus::Failed,
            _ => return Err(ProtocolError::malformed(msgtype, "unknown transaction status")),
        };
        Ok(Self { tx_status })
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, _: Bytes) -> Result<Self, ProtocolError> {
                    if $name::MSGTYPE != msgtype {
                        return Err(ProtocolError::unexpected(Self::MSGTYPE, msgtype))
                    }
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';

    /// Identifies the message as a portal-suspended indicator.
    ///
    /// Note this only appears if an Execute message's row-count limit was reached.
    struct PortalSuspended, b's';
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, BytesMut};

    use super::*;

    pub(crate) fn put_msg(buf: &mut BytesMut, msgtype: u8, body: &[u8]) {
        buf.put_u8(msgtype);
        buf.put_i32(4 + body.len() as i32);
        buf.put_slice(body);
    }

    fn sample_stream() -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_msg(&mut buf, b'1', b"");
        put_msg(&mut buf, b'2', b"");
        put_msg(&mut buf, b'C', b"SELECT 1\0");
        put_msg(&mut buf, b'Z', b"I");
        buf.to_vec()
    }

    fn drain(buf: &mut BytesMut) -> Vec<u8> {
        let mut out = vec![];
        while let Some((msgtype, body)) = frame(buf).unwrap() {
            BackendMessage::decode(msgtype, body).unwrap();
            out.push(msgtype);
        }
        out
    }

    #[test]
    fn frame_whole_stream() {
        let mut buf = BytesMut::from(&sample_stream()[..]);
        assert_eq!(drain(&mut buf), vec![b'1', b'2', b'C', b'Z']);
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_split_at_every_boundary() {
        let stream = sample_stream();
        for split in 0..stream.len() {
            let mut buf = BytesMut::from(&stream[..split]);
            let mut out = drain(&mut buf);
            buf.extend_from_slice(&stream[split..]);
            out.extend(drain(&mut buf));
            assert_eq!(out, vec![b'1', b'2', b'C', b'Z'], "split at {split}");
        }
    }

    #[test]
    fn frame_rejects_negative_length() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'Z');
        buf.put_i32(-1);
        assert!(frame(&mut buf).is_err());
    }

    #[test]
    fn unknown_message_type() {
        let mut buf = BytesMut::new();
        put_msg(&mut buf, b'?', b"stuff");
        let (msgtype, body) = frame(&mut buf).unwrap().unwrap();
        assert!(matches!(
            BackendMessage::decode(msgtype, body),
            Err(ProtocolError::Unknown { found: b'?' }),
        ));
    }

    #[test]
    fn short_payload_is_malformed_not_panic() {
        // BackendKeyData requires 8 bytes
        assert!(matches!(
            BackendKeyData::decode(b'K', bytes::Bytes::from_static(&[0, 1])),
            Err(ProtocolError::Malformed { .. }),
        ));
    }

    #[test]
    fn ready_for_query_status() {
        let msg = ReadyForQuery::decode(b'Z', bytes::Bytes::from_static(b"T")).unwrap();
        assert_eq!(msg.tx_status, TxStatus::Transaction);
        assert!(ReadyForQuery::decode(b'Z', bytes::Bytes::from_static(b"x")).is_err());
    }

    #[test]
    fn sasl_mechanism_listing() {
        let mechanisms = bytes::Bytes::from_static(b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0");
        let names: Vec<_> = Authentication::sasl_mechanisms(&mechanisms).collect();
        assert_eq!(names, ["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"]);
    }
}
