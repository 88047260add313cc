//! SCRAM-SHA-256 client, RFC 5802 and RFC 7677.
//!
//! Postgres takes the authenticating user from the startup message, so the
//! `n=` attribute of the client-first-message stays empty. Channel binding
//! is not offered (`n,,` GS2 header, `c=biws` in the final message).
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// SCRAM-SHA-256 client exchange state.
///
/// One value drives the whole exchange:
/// [`client_first`](Self::client_first) →
/// [`client_final`](Self::client_final) →
/// [`verify_server_final`](Self::verify_server_final).
pub struct ScramClient {
    password: String,
    client_nonce: String,
    auth_message: Option<String>,
    salted_password: Option<[u8; 32]>,
}

impl ScramClient {
    pub fn new(password: &str) -> Self {
        // 18 bytes of randomness, base64 encoded to 24 characters
        let nonce_bytes: [u8; 18] = rand::thread_rng().r#gen();
        Self {
            password: password.to_string(),
            client_nonce: BASE64.encode(nonce_bytes),
            auth_message: None,
            salted_password: None,
        }
    }

    /// The client-first-message: `n,,n=,r=<client-nonce>`.
    pub fn client_first(&self) -> Vec<u8> {
        format!("n,,n=,r={}", self.client_nonce).into_bytes()
    }

    /// Process the server-first-message (`r=<nonce>,s=<salt>,i=<iterations>`)
    /// and produce the client-final-message carrying the proof.
    pub fn client_final(&mut self, server_first: &[u8]) -> Result<Vec<u8>, ScramError> {
        let server_str =
            std::str::from_utf8(server_first).map_err(|_| ScramError::InvalidServerMessage)?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations: Option<u32> = None;

        for part in server_str.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                nonce = Some(value.to_string());
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(BASE64.decode(value).map_err(|_| ScramError::InvalidSalt)?);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(value.parse().map_err(|_| ScramError::InvalidIterations)?);
            }
        }

        let combined_nonce = nonce.ok_or(ScramError::MissingAttribute("r"))?;
        let salt = salt.ok_or(ScramError::MissingAttribute("s"))?;
        let iterations = iterations.ok_or(ScramError::MissingAttribute("i"))?;

        // the server nonce must extend ours
        if !combined_nonce.starts_with(&self.client_nonce) {
            return Err(ScramError::NonceMismatch);
        }

        let salted_password = hi(&self.password, &salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);

        let client_first_bare = format!("n=,r={}", self.client_nonce);
        let client_final_without_proof = format!("c=biws,r={combined_nonce}");
        let auth_message = format!("{client_first_bare},{server_str},{client_final_without_proof}");

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let client_proof = xor(&client_key, &client_signature);

        self.auth_message = Some(auth_message);
        self.salted_password = Some(salted_password);

        let client_final = format!(
            "{client_final_without_proof},p={}",
            BASE64.encode(client_proof),
        );
        Ok(client_final.into_bytes())
    }

    /// Verify the server signature from the server-final-message (`v=<verifier>`).
    pub fn verify_server_final(&self, server_final: &[u8]) -> Result<(), ScramError> {
        let server_str =
            std::str::from_utf8(server_final).map_err(|_| ScramError::InvalidServerMessage)?;

        let verifier = server_str
            .strip_prefix("v=")
            .ok_or(ScramError::InvalidServerSignature)?;
        let server_signature = BASE64
            .decode(verifier)
            .map_err(|_| ScramError::InvalidServerSignature)?;

        let salted_password = self.salted_password.ok_or(ScramError::OutOfOrder)?;
        let auth_message = self.auth_message.as_ref().ok_or(ScramError::OutOfOrder)?;

        let server_key = hmac_sha256(&salted_password, b"Server Key");
        let expected = hmac_sha256(&server_key, auth_message.as_bytes());

        if server_signature != expected {
            return Err(ScramError::InvalidServerSignature);
        }

        Ok(())
    }
}

impl std::fmt::Debug for ScramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never expose the password or derived keys
        f.debug_struct("ScramClient")
            .field("client_nonce", &self.client_nonce)
            .finish_non_exhaustive()
    }
}

/// An error during the SCRAM exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScramError {
    #[error("server sent a malformed SCRAM message")]
    InvalidServerMessage,
    #[error("invalid salt encoding")]
    InvalidSalt,
    #[error("invalid iteration count")]
    InvalidIterations,
    #[error("missing `{0}=` attribute in server message")]
    MissingAttribute(&'static str),
    #[error("server nonce does not extend the client nonce")]
    NonceMismatch,
    #[error("server signature verification failed")]
    InvalidServerSignature,
    #[error("SCRAM messages arrived out of order")]
    OutOfOrder,
}

/// `Hi()`, PBKDF2 with HMAC-SHA-256.
fn hi(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut output = [0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut output)
        .expect("32 byte output is always valid");
    output
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn xor(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn full_exchange() {
        let mut client = ScramClient::new("pencil");

        let first = String::from_utf8(client.client_first()).unwrap();
        assert!(first.starts_with("n,,n=,r="));
        let client_nonce = first.strip_prefix("n,,n=,r=").unwrap().to_string();
        assert_eq!(client_nonce.len(), 24);

        let server_first = format!(
            "r={client_nonce}3rfcNHYJY1ZVvWVs7j,s={},i=4096",
            BASE64.encode(b"QSXCR+Q6sek8bf92"),
        );
        let final_msg = client.client_final(server_first.as_bytes()).unwrap();
        let final_str = String::from_utf8(final_msg).unwrap();
        assert!(final_str.starts_with(&format!("c=biws,r={client_nonce}3rfcNHYJY1ZVvWVs7j,p=")));

        // recompute the expected server signature out-of-band
        let salted = hi("pencil", b"QSXCR+Q6sek8bf92", 4096);
        let auth_message = format!(
            "n=,r={client_nonce},{server_first},c=biws,r={client_nonce}3rfcNHYJY1ZVvWVs7j",
        );
        let server_key = hmac_sha256(&salted, b"Server Key");
        let signature = hmac_sha256(&server_key, auth_message.as_bytes());
        let server_final = format!("v={}", BASE64.encode(signature));

        client.verify_server_final(server_final.as_bytes()).unwrap();
    }

    #[test]
    fn rejects_foreign_nonce() {
        let mut client = ScramClient::new("pencil");
        let server_first = format!("r=completelydifferent,s={},i=4096", BASE64.encode(b"salt"));
        assert_eq!(
            client.client_final(server_first.as_bytes()),
            Err(ScramError::NonceMismatch),
        );
    }

    #[test]
    fn rejects_bad_server_signature() {
        let mut client = ScramClient::new("pencil");
        let first = String::from_utf8(client.client_first()).unwrap();
        let nonce = first.strip_prefix("n,,n=,r=").unwrap();
        let server_first = format!("r={nonce}ext,s={},i=1024", BASE64.encode(b"salt"));
        client.client_final(server_first.as_bytes()).unwrap();
        assert_eq!(
            client.verify_server_final(format!("v={}", BASE64.encode(b"bogus")).as_bytes()),
            Err(ScramError::InvalidServerSignature),
        );
    }
}
