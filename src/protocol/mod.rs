//! SMTP protocol primitives.
//!
//! Command formatting, reply parsing and EHLO capability discovery for the
//! subset of RFC 5321 a single authenticated submission needs.

use std::collections::HashSet;
use std::fmt;

use crate::auth::AuthMethod;
use crate::errors::{DispatchError, DispatchResult, EnhancedStatusCode, ErrorKind};

/// SMTP commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Basic HELLO.
    Helo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Authenticate.
    Auth {
        /// Authentication mechanism.
        mechanism: AuthMethod,
        /// Initial response (optional).
        initial_response: Option<String>,
    },
    /// MAIL FROM command.
    MailFrom {
        /// Sender address, already in angle brackets.
        address: String,
        /// SIZE parameter (optional).
        size: Option<usize>,
    },
    /// RCPT TO command.
    RcptTo {
        /// Recipient address, already in angle brackets.
        address: String,
    },
    /// DATA command.
    Data,
    /// Reset transaction.
    Rset,
    /// Quit connection.
    Quit,
}

impl SmtpCommand {
    /// Formats the command line, without the trailing CRLF.
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::Helo(domain) => format!("HELO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => match initial_response {
                Some(response) => format!("AUTH {} {}", mechanism, response),
                None => format!("AUTH {}", mechanism),
            },
            SmtpCommand::MailFrom { address, size } => match size {
                Some(s) => format!("MAIL FROM:{} SIZE={}", address, s),
                None => format!("MAIL FROM:{}", address),
            },
            SmtpCommand::RcptTo { address } => format!("RCPT TO:{}", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Rset => "RSET".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // AUTH arguments carry credentials.
        match self {
            SmtpCommand::Auth { mechanism, initial_response: Some(_) } => {
                write!(f, "AUTH {} [REDACTED]", mechanism)
            }
            _ => write!(f, "{}", self.to_smtp_string()),
        }
    }
}

/// SMTP reply from the server.
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// Status code (e.g., 250, 354, 550).
    pub code: u16,
    /// Enhanced status code (optional).
    pub enhanced_code: Option<EnhancedStatusCode>,
    /// Reply text, one entry per line.
    pub message: Vec<String>,
}

impl SmtpResponse {
    /// Creates a single-line response.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced_code: None,
            message: vec![message.into()],
        }
    }

    /// Parses a reply from its raw lines (CRLF already stripped).
    ///
    /// Every line must start with the same three-digit code; all but the
    /// last use `-` as separator.
    pub fn parse(lines: &[String]) -> DispatchResult<Self> {
        if lines.is_empty() {
            return Err(DispatchError::protocol("Empty response"));
        }

        let mut messages = Vec::with_capacity(lines.len());
        let mut code = 0u16;
        let mut enhanced_code = None;

        for (i, line) in lines.iter().enumerate() {
            let digits = line.get(..3).filter(|d| d.bytes().all(|b| b.is_ascii_digit()));
            let parsed_code: u16 = digits
                .and_then(|d| d.parse().ok())
                .ok_or_else(|| DispatchError::protocol(format!("Invalid reply line: {:?}", line)))?;

            if i == 0 {
                code = parsed_code;
            } else if parsed_code != code {
                return Err(DispatchError::protocol(
                    "Inconsistent status codes in multiline response",
                ));
            }

            let text = line.get(4..).unwrap_or("");
            // Servers repeat the enhanced code on every line of a reply.
            if let Some((esc, rest)) = Self::parse_enhanced_code(text) {
                if i == 0 {
                    enhanced_code = Some(esc);
                }
                messages.push(rest.trim().to_string());
                continue;
            }
            messages.push(text.to_string());
        }

        Ok(Self {
            code,
            enhanced_code,
            message: messages,
        })
    }

    fn parse_enhanced_code(text: &str) -> Option<(EnhancedStatusCode, &str)> {
        let (first, rest) = text.split_once(' ').unwrap_or((text, ""));
        let code = EnhancedStatusCode::parse(first)?;
        Some((code, rest))
    }

    /// Returns true for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns true for 3xx.
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Returns the first line of text.
    pub fn first_message(&self) -> &str {
        self.message.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// Returns all lines joined with newlines.
    pub fn full_message(&self) -> String {
        self.message.join("\n")
    }

    /// Returns the reply text on a single line, lines separated by spaces.
    pub fn one_line(&self) -> String {
        self.message
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Converts a negative reply into an error of the given kind.
    pub fn to_error(&self, kind: ErrorKind) -> DispatchError {
        let mut err = DispatchError::from_smtp_response(kind, self.code, self.one_line());
        if let Some(enhanced) = &self.enhanced_code {
            err = err.with_enhanced_code(enhanced.clone());
        }
        err
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_message())
    }
}

/// Extensions advertised in the EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct EsmtpCapabilities {
    /// Maximum message size, when advertised with a value.
    pub size: Option<usize>,
    /// SIZE advertised at all.
    pub size_supported: bool,
    /// Authentication mechanisms we know how to speak.
    pub auth_mechanisms: HashSet<AuthMethod>,
    /// AUTH advertised at all, even with unknown mechanisms only.
    pub auth_advertised: bool,
    /// STARTTLS supported.
    pub starttls: bool,
    /// Raw keyword lines, uppercased.
    pub raw: Vec<String>,
}

impl EsmtpCapabilities {
    /// Parses capabilities from an EHLO reply. The first line is the server
    /// greeting and is skipped.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let mut caps = Self::default();

        for line in response.message.iter().skip(1) {
            let line = line.trim().to_uppercase();
            caps.raw.push(line.clone());

            // Some servers still send the pre-standard "AUTH=LOGIN" form.
            let (keyword, params) = line
                .split_once([' ', '='])
                .unwrap_or((line.as_str(), ""));

            match keyword {
                "SIZE" => {
                    caps.size_supported = true;
                    caps.size = params.trim().parse().ok().filter(|s| *s > 0);
                }
                "AUTH" => {
                    caps.auth_advertised = true;
                    caps.auth_mechanisms
                        .extend(params.split_whitespace().filter_map(AuthMethod::from_capability));
                }
                "STARTTLS" => caps.starttls = true,
                _ => {}
            }
        }

        caps
    }

    /// Checks whether a keyword was advertised.
    pub fn has_capability(&self, name: &str) -> bool {
        let upper = name.to_uppercase();
        self.raw
            .iter()
            .any(|c| c == &upper || c.starts_with(&format!("{} ", upper)))
    }
}

/// Reply codes used during a submission.
pub mod codes {
    /// Service ready.
    pub const SERVICE_READY: u16 = 220;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// Continue (AUTH).
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
    /// Bad command sequence; after AUTH it means already authenticated.
    pub const BAD_SEQUENCE: u16 = 503;
}
