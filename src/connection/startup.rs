//! The startup phase: authentication and session parameter collection.
//!
//! <https://www.postgresql.org/docs/17/protocol-flow.html#PROTOCOL-FLOW-START-UP>
use md5::{Digest, Md5};

use super::{Config, Connection};
use crate::{
    Result,
    postgres::{
        BackendMessage, ProtocolError,
        backend::Authentication,
        frontend,
        sasl::{SCRAM_SHA_256, ScramClient, ScramError},
    },
    transport::{PgTransport, PgTransportExt},
};

/// A client side authentication failure.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unsupported authentication mechanism: {mechanism}")]
    Unsupported { mechanism: std::borrow::Cow<'static, str> },
    #[error("server requested a password but none is configured")]
    RequiresPassword,
    #[error(transparent)]
    Scram(#[from] ScramError),
}

/// Drive the connection from startup message to the first `ReadyForQuery`.
pub(super) async fn startup(conn: &mut Connection, config: &Config) -> Result<()> {
    // To begin a session, a frontend opens a connection to the server
    // and sends a startup message.
    conn.send_startup(frontend::Startup {
        user: config.user.as_str(),
        database: Some(config.dbname.as_str()),
        application_name: config.application_name.as_deref(),
        params: &config.params,
    });
    conn.flush().await?;

    // The server then sends an appropriate authentication request message,
    // to which the frontend must reply with an appropriate authentication
    // response message (such as a password). For SASL, multiple exchanges
    // of packets may be needed.
    authenticate(conn, config).await?;

    // After having received AuthenticationOk, the frontend must wait for
    // further messages from the server: ParameterStatus messages,
    // BackendKeyData, and finally ReadyForQuery. It is still possible for
    // the startup attempt to fail (ErrorResponse).
    loop {
        match conn.recv().await? {
            BackendMessage::ReadyForQuery(_) => break,
            BackendMessage::BackendKeyData(key_data) => {
                conn.context.backend_key_data = Some(key_data);
            },
            // recv handles ParameterStatus and NoticeResponse itself
            BackendMessage::NegotiateProtocolVersion(v) => {
                #[cfg(feature = "log")]
                log::warn!("server downgraded to protocol minor version {}", v.minor);
                let _ = v;
            },
            f => return Err(f.unexpected("startup phase").into()),
        }
    }

    if config.require_backend_key_data && conn.context.backend_key_data.is_none() {
        return Err(ProtocolError::unexpected_phase(
            crate::postgres::backend::ReadyForQuery::MSGTYPE,
            "startup phase, backend key data missing",
        )
        .into());
    }

    Ok(())
}

async fn authenticate(conn: &mut Connection, config: &Config) -> Result<()> {
    let mut scram: Option<ScramClient> = None;

    loop {
        match conn.recv::<Authentication>().await? {
            Authentication::Ok => return Ok(()),
            Authentication::CleartextPassword => {
                let password = password(config)?;
                conn.send(frontend::PasswordMessage { password });
                conn.flush().await?;
            },
            Authentication::MD5Password { salt } => {
                let digest = md5_password(&config.user, password(config)?, salt);
                conn.send(frontend::PasswordMessage { password: &digest });
                conn.flush().await?;
            },
            Authentication::SASL { mechanisms } => {
                if !Authentication::sasl_mechanisms(&mechanisms).any(|m| m == SCRAM_SHA_256) {
                    let offered = Authentication::sasl_mechanisms(&mechanisms)
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(AuthError::Unsupported { mechanism: offered.into() }.into());
                }
                let client = scram.insert(ScramClient::new(password(config)?));
                let response = client.client_first();
                conn.send(frontend::SaslInitialResponse {
                    mechanism: SCRAM_SHA_256,
                    response: &response,
                });
                conn.flush().await?;
            },
            Authentication::SASLContinue { data } => {
                let Some(client) = scram.as_mut() else {
                    return Err(ProtocolError::unexpected_phase(
                        Authentication::MSGTYPE,
                        "SASL continue before SASL start",
                    )
                    .into());
                };
                let response = client.client_final(&data).map_err(AuthError::Scram)?;
                conn.send(frontend::SaslResponse { data: &response });
                conn.flush().await?;
            },
            Authentication::SASLFinal { data } => {
                let Some(client) = scram.as_ref() else {
                    return Err(ProtocolError::unexpected_phase(
                        Authentication::MSGTYPE,
                        "SASL final before SASL start",
                    )
                    .into());
                };
                client.verify_server_final(&data).map_err(AuthError::Scram)?;
                // AuthenticationOk follows
            },
            Authentication::KerberosV5 => return Err(unsupported("KerberosV5")),
            Authentication::GSS | Authentication::GSSContinue { .. } => {
                return Err(unsupported("GSSAPI"));
            },
            Authentication::SSPI => return Err(unsupported("SSPI")),
        }
    }
}

fn unsupported(mechanism: &'static str) -> crate::Error {
    AuthError::Unsupported { mechanism: mechanism.into() }.into()
}

fn password(config: &Config) -> Result<&str, AuthError> {
    match config.pass.is_empty() {
        true => Err(AuthError::RequiresPassword),
        false => Ok(&config.pass),
    }
}

/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(user.as_bytes());
    let inner = hex(&hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);

    format!("md5{}", hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("write to string is infallible");
    }
    out
}

#[cfg(test)]
mod test {
    use md5::{Digest, Md5};

    use super::{hex, md5_password};

    #[test]
    fn md5_digest_layout() {
        // psql sends this exact digest for user/password/salt below
        let digest = md5_password("user", "password", [0x01, 0x02, 0x03, 0x04]);
        assert!(digest.starts_with("md5"));
        assert_eq!(digest.len(), 3 + 32);

        // recompute by hand
        let inner = hex(&Md5::digest(b"passworduser"));
        let mut outer = Md5::new();
        outer.update(inner.as_bytes());
        outer.update([0x01, 0x02, 0x03, 0x04]);
        assert_eq!(digest, format!("md5{}", hex(&outer.finalize())));
    }
}
