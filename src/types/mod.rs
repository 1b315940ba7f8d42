//! Core message types.
//!
//! - [`Address`]: envelope address extracted from a header value or list
//! - [`Email`]: the single plain-text message built from configuration
//! - [`SendReceipt`]: outcome of a successful send

use std::fmt;
use std::time::Duration;

use crate::config::DispatchConfig;
use crate::errors::{DispatchError, DispatchResult};

/// Envelope address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// Display name (e.g., "John Doe").
    pub name: Option<String>,
    /// Mailbox (e.g., "john@example.com").
    pub email: String,
}

impl Address {
    /// Creates a new address with just a mailbox.
    pub fn new(email: impl Into<String>) -> DispatchResult<Self> {
        let email = email.into();
        Self::validate_email(&email)?;
        Ok(Self { name: None, email })
    }

    /// Parses `John Doe <john@example.com>` or a bare mailbox.
    pub fn parse(s: &str) -> DispatchResult<Self> {
        let s = s.trim();

        if let (Some(start), Some(end)) = (s.find('<'), s.rfind('>')) {
            if start < end {
                let name = s[..start].trim().trim_matches('"').trim();
                let email = s[start + 1..end].trim();
                Self::validate_email(email)?;
                return Ok(Self {
                    name: (!name.is_empty()).then(|| name.to_string()),
                    email: email.to_string(),
                });
            }
        }

        Self::new(s)
    }

    /// Parses a comma-separated address list such as a To header value.
    ///
    /// Commas inside quoted display names or angle brackets do not split.
    /// Empty entries are skipped; at least one address is required.
    pub fn parse_list(s: &str) -> DispatchResult<Vec<Self>> {
        let mut entries = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut in_angle = false;

        for c in s.chars() {
            match c {
                '"' => in_quotes = !in_quotes,
                '<' if !in_quotes => in_angle = true,
                '>' if !in_quotes => in_angle = false,
                ',' if !in_quotes && !in_angle => {
                    entries.push(std::mem::take(&mut current));
                    continue;
                }
                _ => {}
            }
            current.push(c);
        }
        entries.push(current);

        let addresses = entries
            .iter()
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| Self::parse(entry))
            .collect::<DispatchResult<Vec<_>>>()?;

        if addresses.is_empty() {
            return Err(DispatchError::config(format!(
                "Invalid address list '{}': no addresses",
                s
            )));
        }
        Ok(addresses)
    }

    fn validate_email(email: &str) -> DispatchResult<()> {
        let invalid = |reason: &str| {
            Err(DispatchError::config(format!(
                "Invalid email address '{}': {}",
                email, reason
            )))
        };

        if email.is_empty() {
            return invalid("address cannot be empty");
        }
        if email.len() > 254 {
            return invalid("address too long (max 254 characters)");
        }
        if email.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return invalid("address cannot contain whitespace or control characters");
        }

        let Some((local, domain)) = email.split_once('@') else {
            return invalid("address must contain exactly one @");
        };
        if domain.contains('@') {
            return invalid("address must contain exactly one @");
        }
        if local.is_empty() || local.len() > 64 {
            return invalid("local part must be 1-64 characters");
        }
        if domain.is_empty() {
            return invalid("domain cannot be empty");
        }

        Ok(())
    }

    /// Returns the mailbox.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Returns the domain part of the mailbox.
    pub fn domain(&self) -> &str {
        self.email.rsplit('@').next().unwrap_or_default()
    }

    /// Formats the address for MAIL FROM / RCPT TO.
    pub fn to_smtp(&self) -> String {
        format!("<{}>", self.email)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.email),
            None => write!(f, "{}", self.email),
        }
    }
}

/// A single plain-text email.
///
/// `from` and `to` hold the header values exactly as configured; the
/// envelope sender and recipients are extracted from them once at
/// construction. `to` may list several comma-separated recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    from: String,
    to: String,
    subject: String,
    body: String,
    envelope_from: Address,
    envelope_to: Vec<Address>,
}

impl Email {
    /// Builds a message from header values and a body.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> DispatchResult<Self> {
        let from = from.into();
        let to = to.into();
        let subject = subject.into();

        for (header, value) in [("From", &from), ("To", &to), ("Subject", &subject)] {
            if value.contains(['\r', '\n']) {
                return Err(DispatchError::config(format!(
                    "{} header must not contain line breaks",
                    header
                )));
            }
        }

        let envelope_from = Address::parse(&from)?;
        let envelope_to = Address::parse_list(&to)?;

        Ok(Self {
            from,
            to,
            subject,
            body: body.into(),
            envelope_from,
            envelope_to,
        })
    }

    /// Builds the message described by the configuration.
    pub fn from_config(config: &DispatchConfig) -> DispatchResult<Self> {
        Self::new(
            config.sender.as_str(),
            config.receiver.as_str(),
            config.subject.as_str(),
            config.body.as_str(),
        )
    }

    /// From header value.
    pub fn from(&self) -> &str {
        &self.from
    }

    /// To header value.
    pub fn to(&self) -> &str {
        &self.to
    }

    /// Subject header value.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Plain-text body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Envelope sender.
    pub fn envelope_from(&self) -> &Address {
        &self.envelope_from
    }

    /// Envelope recipients, in header order.
    pub fn envelope_to(&self) -> &[Address] {
        &self.envelope_to
    }
}

/// Outcome of a successful send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Message-ID placed in the message headers (without angle brackets).
    pub message_id: String,
    /// Final reply text from the server after the message data.
    pub response: String,
    /// Recipients the server refused while accepting at least one other.
    pub refused: Vec<Address>,
    /// Time from connect to the final reply.
    pub duration: Duration,
}
