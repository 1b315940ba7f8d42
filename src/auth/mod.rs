//! Password authentication mechanisms.
//!
//! Supports:
//! - CRAM-MD5 (RFC 2195)
//! - PLAIN (RFC 4616)
//! - LOGIN (obsolete but widely used)

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::Md5;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use crate::errors::{DispatchError, DispatchResult};

/// Authentication mechanisms, in the order they are preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// CRAM-MD5 challenge-response; the password never crosses the wire.
    CramMd5,
    /// PLAIN authentication.
    Plain,
    /// LOGIN authentication.
    Login,
}

impl AuthMethod {
    /// Preference order used when several mechanisms are advertised.
    pub const PREFERENCE: [AuthMethod; 3] = [AuthMethod::CramMd5, AuthMethod::Plain, AuthMethod::Login];

    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMethod::CramMd5 => "CRAM-MD5",
            AuthMethod::Plain => "PLAIN",
            AuthMethod::Login => "LOGIN",
        }
    }

    /// Parses a mechanism name from the EHLO AUTH line.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CRAM-MD5" => Some(AuthMethod::CramMd5),
            "PLAIN" => Some(AuthMethod::Plain),
            "LOGIN" => Some(AuthMethod::Login),
            _ => None,
        }
    }

    /// Picks the most preferred mechanism among those advertised.
    pub fn select<'a, I>(advertised: I) -> Option<AuthMethod>
    where
        I: IntoIterator<Item = &'a AuthMethod>,
    {
        let advertised: Vec<AuthMethod> = advertised.into_iter().copied().collect();
        Self::PREFERENCE.into_iter().find(|m| advertised.contains(m))
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mechanism_name())
    }
}

/// Username and password for SMTP AUTH.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: SecretString,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// Returns the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// PLAIN initial response: base64 of `\0user\0password`.
    pub fn plain_initial_response(&self) -> String {
        let response = format!("\0{}\0{}", self.username, self.password.expose_secret());
        BASE64.encode(response)
    }

    /// LOGIN username response.
    pub fn login_username(&self) -> String {
        BASE64.encode(&self.username)
    }

    /// LOGIN password response.
    pub fn login_password(&self) -> String {
        BASE64.encode(self.password.expose_secret())
    }

    /// CRAM-MD5 response to a base64 challenge.
    pub fn cram_md5_response(&self, challenge: &str) -> DispatchResult<String> {
        let challenge_bytes = BASE64.decode(challenge.trim()).map_err(|e| {
            DispatchError::protocol("Invalid CRAM-MD5 challenge from server").with_cause(e)
        })?;

        type HmacMd5 = Hmac<Md5>;
        let mut mac = HmacMd5::new_from_slice(self.password.expose_secret().as_bytes())
            .map_err(|e| DispatchError::unexpected(format!("HMAC error: {}", e)))?;
        mac.update(&challenge_bytes);
        let digest = mac.finalize().into_bytes();

        let hex_digest: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Ok(BASE64.encode(format!("{} {}", self.username, hex_digest)))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}
