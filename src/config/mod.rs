//! Dispatch configuration.
//!
//! The configuration is read once from an [`EnvSource`] at startup and is
//! immutable afterwards. Defaults favour Gmail over implicit TLS.

mod env;

pub use env::{bool_var, int_var, parse_bool, require_var, string_var, EnvSource, ProcessEnv, TRUTHY_TOKENS};

use std::fmt;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Serialize, Serializer};

use crate::errors::DispatchResult;

/// Sender address variable.
pub const EMAIL_SENDER: &str = "EMAIL_SENDER";
/// Sender password variable.
pub const EMAIL_PASSWORD: &str = "EMAIL_PASSWORD";
/// Recipient address variable.
pub const EMAIL_RECEIVER: &str = "EMAIL_RECEIVER";
/// Subject variable.
pub const EMAIL_SUBJECT: &str = "EMAIL_SUBJECT";
/// Body variable.
pub const EMAIL_BODY: &str = "EMAIL_BODY";
/// Server host variable.
pub const SMTP_HOST: &str = "SMTP_HOST";
/// Implicit TLS flag variable.
pub const SMTP_USE_SSL: &str = "SMTP_USE_SSL";
/// STARTTLS flag variable.
pub const SMTP_USE_STARTTLS: &str = "SMTP_USE_STARTTLS";
/// Server port variable.
pub const SMTP_PORT: &str = "SMTP_PORT";
/// Timeout variable, in seconds.
pub const SMTP_TIMEOUT_SECONDS: &str = "SMTP_TIMEOUT_SECONDS";

/// Default subject line.
pub const DEFAULT_SUBJECT: &str = "Don't miss this email";
/// Default body.
pub const DEFAULT_BODY: &str = "Please read the details here";
/// Default SMTP host.
pub const DEFAULT_HOST: &str = "smtp.gmail.com";
/// Port for implicit TLS.
pub const SSL_PORT: u16 = 465;
/// Submission port for STARTTLS.
pub const STARTTLS_PORT: u16 = 587;
/// Plain SMTP port.
pub const PLAIN_PORT: u16 = 25;
/// Default timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How the session is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Plaintext for the whole session.
    None,
    /// Plaintext connect, upgraded with STARTTLS before authenticating.
    StartTls,
    /// TLS from the first byte.
    Implicit,
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsMode::None => write!(f, "plaintext"),
            TlsMode::StartTls => write!(f, "STARTTLS"),
            TlsMode::Implicit => write!(f, "implicit TLS"),
        }
    }
}

/// Fully resolved dispatch configuration.
#[derive(Clone, Serialize)]
pub struct DispatchConfig {
    /// Sender address, also the login name.
    pub sender: String,
    /// Sender password or app password.
    #[serde(serialize_with = "redact")]
    pub password: SecretString,
    /// Recipient address.
    pub receiver: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// SMTP server host.
    pub host: String,
    /// Connect over implicit TLS.
    pub use_ssl: bool,
    /// Upgrade a plaintext connection with STARTTLS.
    pub use_starttls: bool,
    /// SMTP server port.
    pub port: u16,
    /// Bound on connect and on every read, write and handshake.
    #[serde(serialize_with = "humantime_serde::serialize")]
    pub timeout: Duration,
}

fn redact<S: Serializer>(_: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str("[REDACTED]")
}

impl fmt::Debug for DispatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchConfig")
            .field("sender", &self.sender)
            .field("password", &"[REDACTED]")
            .field("receiver", &self.receiver)
            .field("subject", &self.subject)
            .field("body", &self.body)
            .field("host", &self.host)
            .field("use_ssl", &self.use_ssl)
            .field("use_starttls", &self.use_starttls)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DispatchConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> DispatchResult<Self> {
        Self::from_source(&ProcessEnv)
    }

    /// Loads the configuration from an arbitrary variable source.
    ///
    /// Required variables are checked first so that a missing one is
    /// reported before anything else is resolved.
    pub fn from_source<S: EnvSource + ?Sized>(source: &S) -> DispatchResult<Self> {
        let sender = require_var(source, EMAIL_SENDER)?;
        let password = require_var(source, EMAIL_PASSWORD)?;
        let receiver = require_var(source, EMAIL_RECEIVER)?;

        let subject = string_var(source, EMAIL_SUBJECT, DEFAULT_SUBJECT);
        let body = string_var(source, EMAIL_BODY, DEFAULT_BODY);

        let host = string_var(source, SMTP_HOST, DEFAULT_HOST);
        let use_ssl = bool_var(source, SMTP_USE_SSL, true);
        let use_starttls = bool_var(source, SMTP_USE_STARTTLS, !use_ssl);
        let port = int_var(source, SMTP_PORT, Self::default_port(use_ssl, use_starttls));
        let timeout_secs = int_var(source, SMTP_TIMEOUT_SECONDS, DEFAULT_TIMEOUT_SECS);

        let config = Self {
            sender,
            password: SecretString::new(password),
            receiver,
            subject,
            body,
            host,
            use_ssl,
            use_starttls,
            port,
            timeout: Duration::from_secs(timeout_secs),
        };

        tracing::debug!(
            config = %serde_json::to_string(&config).unwrap_or_default(),
            "Resolved dispatch configuration"
        );

        Ok(config)
    }

    /// Port used when `SMTP_PORT` is not set.
    pub fn default_port(use_ssl: bool, use_starttls: bool) -> u16 {
        if use_ssl {
            SSL_PORT
        } else if use_starttls {
            STARTTLS_PORT
        } else {
            PLAIN_PORT
        }
    }

    /// Session security derived from the two flags. Implicit TLS wins when
    /// both are set.
    pub fn tls_mode(&self) -> TlsMode {
        if self.use_ssl {
            TlsMode::Implicit
        } else if self.use_starttls {
            TlsMode::StartTls
        } else {
            TlsMode::None
        }
    }

    /// Returns the `host:port` address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

mod humantime_serde {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }
}
