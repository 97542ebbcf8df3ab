//! SCRAM-SHA-256 client (RFC 5802 / RFC 7677) for the RethinkDB handshake.
//!
//! ```text
//! client-first  n,,n=<user>,r=<client nonce>
//! server-first  r=<client nonce + server nonce>,s=<salt b64>,i=<iterations>
//! client-final  c=biws,r=<nonce>,p=<proof b64>
//! server-final  v=<server signature b64>
//! ```
//!
//! Channel binding is not supported (`biws` is base64 of `n,,`).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{StoreError, StoreResult};

const GS2_HEADER: &str = "n,,";
const CHANNEL_BINDING: &str = "c=biws";

/// Client half of one SCRAM exchange.
pub struct ScramClient {
    password: String,
    client_nonce: String,
    client_first_bare: String,
}

/// Output of processing the server-first message.
pub struct ClientFinal {
    pub message: String,
    server_signature: [u8; 32],
}

impl ScramClient {
    /// Start an exchange with a fresh random nonce.
    pub fn new(user: &str, password: &str) -> Self {
        let nonce = STANDARD.encode(rand::random::<[u8; 18]>());
        Self::with_nonce(user, password, &nonce)
    }

    /// Start an exchange with a caller-chosen nonce.
    pub fn with_nonce(user: &str, password: &str, nonce: &str) -> Self {
        Self {
            password: password.to_string(),
            client_nonce: nonce.to_string(),
            client_first_bare: format!("n={},r={nonce}", escape_username(user)),
        }
    }

    pub fn client_first(&self) -> String {
        format!("{GS2_HEADER}{}", self.client_first_bare)
    }

    /// Compute the client-final message for `server_first`.
    pub fn client_final(&self, server_first: &str) -> StoreResult<ClientFinal> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => salt = Some(v),
                Some(("i", v)) => iterations = Some(v),
                _ => {}
            }
        }

        let nonce = nonce.ok_or_else(|| auth_err("server-first missing nonce"))?;
        if !nonce.starts_with(&self.client_nonce) {
            return Err(auth_err("server nonce does not extend client nonce"));
        }
        let salt = STANDARD
            .decode(salt.ok_or_else(|| auth_err("server-first missing salt"))?)
            .map_err(|e| auth_err(&format!("bad salt: {e}")))?;
        let iterations: u32 = iterations
            .ok_or_else(|| auth_err("server-first missing iteration count"))?
            .parse()
            .map_err(|_| auth_err("bad iteration count"))?;

        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(self.password.as_bytes(), &salt, iterations, &mut salted);

        let client_key = hmac_sha256(&salted, b"Client Key")?;
        let stored_key = sha256(&client_key);
        let without_proof = format!("{CHANNEL_BINDING},r={nonce}");
        let auth_message = format!("{},{server_first},{without_proof}", self.client_first_bare);

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature.iter()) {
            *p ^= s;
        }

        let server_key = hmac_sha256(&salted, b"Server Key")?;
        let server_signature = hmac_sha256(&server_key, auth_message.as_bytes())?;

        Ok(ClientFinal {
            message: format!("{without_proof},p={}", STANDARD.encode(proof)),
            server_signature,
        })
    }
}

impl ClientFinal {
    /// Check the server's proof that it also knows the password.
    pub fn verify_server_final(&self, server_final: &str) -> StoreResult<()> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(auth_err(err));
        }
        let signature = server_final
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| auth_err("server-final missing signature"))?;
        let signature = STANDARD
            .decode(signature)
            .map_err(|e| auth_err(&format!("bad server signature: {e}")))?;
        if signature.as_slice() != &self.server_signature[..] {
            return Err(auth_err("server signature mismatch"));
        }
        Ok(())
    }
}

/// `=` and `,` are reserved in SCRAM attribute values.
fn escape_username(user: &str) -> String {
    user.replace('=', "=3D").replace(',', "=2C")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> StoreResult<[u8; 32]> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).map_err(|e| auth_err(&format!("hmac key: {e}")))?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

fn auth_err(msg: &str) -> StoreError {
    StoreError::Auth(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test vector from RFC 7677, section 3.
    const NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const CLIENT_FINAL: &str = "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[test]
    fn rfc7677_exchange() {
        let client = ScramClient::with_nonce("user", "pencil", NONCE);
        assert_eq!(client.client_first(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let last = client.client_final(SERVER_FIRST).unwrap();
        assert_eq!(last.message, CLIENT_FINAL);
        last.verify_server_final(SERVER_FINAL).unwrap();
    }

    #[test]
    fn wrong_server_signature_rejected() {
        let client = ScramClient::with_nonce("user", "pencil", NONCE);
        let last = client.client_final(SERVER_FIRST).unwrap();
        let forged = format!("v={}", STANDARD.encode([0u8; 32]));
        let err = last.verify_server_final(&forged).unwrap_err();
        assert!(matches!(err, StoreError::Auth(_)));
    }

    #[test]
    fn server_error_attribute_rejected() {
        let client = ScramClient::with_nonce("user", "pencil", NONCE);
        let last = client.client_final(SERVER_FIRST).unwrap();
        assert!(last.verify_server_final("e=invalid-proof").is_err());
    }

    #[test]
    fn foreign_nonce_rejected() {
        let client = ScramClient::with_nonce("user", "pencil", NONCE);
        assert!(client.client_final("r=other,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096").is_err());
    }

    #[test]
    fn username_is_escaped() {
        let client = ScramClient::with_nonce("a=b,c", "pw", "n");
        assert_eq!(client.client_first(), "n,,n=a=3Db=2Cc,r=n");
    }

    #[test]
    fn random_nonces_differ() {
        let a = ScramClient::new("admin", "pw");
        let b = ScramClient::new("admin", "pw");
        assert_ne!(a.client_first(), b.client_first());
    }
}
