//! Error types for email dispatch.
//!
//! Every failure is classified into one of four closed kinds. The kind
//! decides the diagnostic line printed by the binary; the message, SMTP
//! reply code and underlying cause are kept for logs.

use std::fmt;
use thiserror::Error;

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Diagnostic printed when the server rejects the credentials.
pub const AUTH_FAILED_HINT: &str =
    "Authentication failed. Check EMAIL_SENDER and EMAIL_PASSWORD (use an App Password for Gmail).";

/// Failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or unusable configuration, detected before any network activity.
    Config,
    /// The server rejected the credentials.
    Auth,
    /// SMTP-level failure: negative replies, malformed replies, missing
    /// extensions or a server that hung up mid-session.
    Protocol,
    /// Anything else: DNS, connect and handshake failures or timeouts, TLS.
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "Configuration error"),
            ErrorKind::Auth => write!(f, "Authentication error"),
            ErrorKind::Protocol => write!(f, "SMTP protocol error"),
            ErrorKind::Unexpected => write!(f, "Unexpected error"),
        }
    }
}

/// Enhanced SMTP status code (RFC 2034).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Class (2=success, 4=temporary, 5=permanent).
    pub class: u8,
    /// Subject (e.g., 1=addressing, 7=security).
    pub subject: u16,
    /// Detail code.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Creates a new enhanced status code.
    pub fn new(class: u8, subject: u16, detail: u16) -> Self {
        Self { class, subject, detail }
    }

    /// Parses an enhanced status code such as `5.7.8`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let class = parts.next()?.parse().ok()?;
        let subject = parts.next()?.parse().ok()?;
        let detail = parts.next()?.parse().ok()?;
        if parts.next().is_some() || !(2..=5).contains(&class) {
            return None;
        }
        Some(Self { class, subject, detail })
    }

    /// Returns true if this is a permanent failure.
    pub fn is_permanent(&self) -> bool {
        self.class == 5
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// Dispatch error with classification and SMTP details.
#[derive(Error, Debug)]
pub struct DispatchError {
    kind: ErrorKind,
    message: String,
    smtp_code: Option<u16>,
    enhanced_code: Option<EnhancedStatusCode>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DispatchError {
    /// Creates a new error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the enhanced status code.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if the error came from a server reply.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the enhanced status code if the server sent one.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    /// The single line the binary prints for this failure.
    pub fn diagnostic(&self) -> String {
        let line = match self.kind {
            ErrorKind::Config => format!("Configuration error: {}", self.message),
            ErrorKind::Auth => AUTH_FAILED_HINT.to_string(),
            ErrorKind::Protocol => format!("SMTP error occurred: {}", self.detail()),
            ErrorKind::Unexpected => format!("Unexpected error: {}", self.detail()),
        };
        line.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn detail(&self) -> String {
        let mut out = String::new();
        if let Some(code) = self.smtp_code {
            out.push_str(&format!("({}) ", code));
        }
        out.push_str(&self.message);
        if let Some(cause) = &self.cause {
            out.push_str(&format!(": {}", cause));
        }
        out
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Creates an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    /// Creates an unexpected error.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    /// Creates an error for the server closing the connection mid-session.
    pub fn disconnected() -> Self {
        Self::protocol("Connection unexpectedly closed")
    }

    /// Creates an error from a negative SMTP reply.
    pub fn from_smtp_response(kind: ErrorKind, code: u16, message: impl Into<String>) -> Self {
        Self::new(kind, message).with_smtp_code(code)
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        Ok(())
    }
}
