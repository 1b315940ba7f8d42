//! RFC 5322 rendering of a single text/plain message.
//!
//! Provides:
//! - Header encoding (RFC 2047) and folding
//! - 7bit or quoted-printable body encoding
//! - Dot-stuffing for the DATA phase

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{DispatchError, DispatchResult};
use crate::types::Email;

/// Transfer encoding of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// Short-lined ASCII, sent as-is.
    SevenBit,
    /// Quoted-printable, for anything else.
    QuotedPrintable,
}

impl TransferEncoding {
    /// Picks the encoding for a body.
    pub fn for_body(body: &str) -> Self {
        let plain = body.is_ascii()
            && body.lines().all(|line| line.len() <= 998)
            && !body.chars().any(|c| c.is_control() && c != '\n' && c != '\r' && c != '\t');
        if plain {
            TransferEncoding::SevenBit
        } else {
            TransferEncoding::QuotedPrintable
        }
    }

    /// Returns the header value.
    pub fn header_value(&self) -> &'static str {
        match self {
            TransferEncoding::SevenBit => "7bit",
            TransferEncoding::QuotedPrintable => "quoted-printable",
        }
    }
}

/// Renders an [`Email`] into wire format.
#[derive(Debug, Clone)]
pub struct MimeEncoder {
    date: DateTime<Utc>,
    domain: String,
}

impl MimeEncoder {
    /// Creates an encoder stamping messages with the current time and
    /// generating Message-IDs under `domain`.
    pub fn new(domain: impl Into<String>) -> Self {
        Self::with_date(domain, Utc::now())
    }

    /// Creates an encoder with a fixed date.
    pub fn with_date(domain: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            date,
            domain: domain.into(),
        }
    }

    /// Encodes the message. Returns the rendered bytes with CRLF line endings.
    pub fn encode(&self, email: &Email, message_id: &str) -> DispatchResult<Vec<u8>> {
        let mut output = Vec::new();

        self.write_header(&mut output, "Date", &self.format_date())?;
        self.write_header(&mut output, "From", email.from())?;
        self.write_header(&mut output, "To", email.to())?;
        self.write_header(&mut output, "Subject", &Self::encode_header(email.subject()))?;
        self.write_header(&mut output, "Message-ID", &format!("<{}>", message_id))?;
        self.write_header(&mut output, "MIME-Version", "1.0")?;
        self.write_header(&mut output, "Content-Type", mime::TEXT_PLAIN_UTF_8.as_ref())?;

        let encoding = TransferEncoding::for_body(email.body());
        self.write_header(&mut output, "Content-Transfer-Encoding", encoding.header_value())?;
        output.extend_from_slice(b"\r\n");

        let body = normalize_line_endings(email.body());
        match encoding {
            TransferEncoding::SevenBit => output.extend_from_slice(body.as_bytes()),
            TransferEncoding::QuotedPrintable => {
                output.extend_from_slice(&quoted_printable::encode(body.as_bytes()))
            }
        }
        if !output.ends_with(b"\r\n") {
            output.extend_from_slice(b"\r\n");
        }

        Ok(output)
    }

    fn write_header(&self, output: &mut Vec<u8>, name: &str, value: &str) -> DispatchResult<()> {
        if value.contains(['\r', '\n']) {
            return Err(DispatchError::config(format!(
                "{} header must not contain line breaks",
                name
            )));
        }

        let header = format!("{}: {}", name, value);
        output.extend_from_slice(Self::fold_header(&header).as_bytes());
        output.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Folds a header line at whitespace so lines stay within 78 characters
    /// where possible. Removing every CRLF restores the input exactly.
    fn fold_header(header: &str) -> String {
        if header.len() <= 78 {
            return header.to_string();
        }

        let mut result = String::new();
        let mut current_line = String::new();

        for token in header.split_inclusive(' ') {
            let word = token.trim_end_matches(' ');
            if !word.is_empty() && current_line.len() + word.len() > 76 {
                // The space before the word becomes the continuation indent.
                if let Some(line) = current_line.strip_suffix(' ') {
                    if !line.trim().is_empty() {
                        result.push_str(line);
                        result.push_str("\r\n ");
                        current_line.clear();
                    }
                }
            }
            current_line.push_str(token);
        }

        result.push_str(&current_line);
        result
    }

    /// Encodes a header value using RFC 2047 when it is not printable ASCII.
    pub fn encode_header(value: &str) -> String {
        if value.chars().all(|c| c.is_ascii() && !c.is_control()) {
            return value.to_string();
        }

        // One encoded word per chunk keeps every word under 75 characters.
        let mut words = Vec::new();
        let mut chunk = String::new();
        for c in value.chars() {
            if chunk.len() + c.len_utf8() > 45 {
                words.push(format!("=?utf-8?b?{}?=", BASE64.encode(chunk.as_bytes())));
                chunk.clear();
            }
            chunk.push(c);
        }
        if !chunk.is_empty() {
            words.push(format!("=?utf-8?b?{}?=", BASE64.encode(chunk.as_bytes())));
        }
        words.join(" ")
    }

    /// Generates a unique Message-ID (without angle brackets).
    pub fn generate_message_id(&self) -> String {
        format!("{}.{}@{}", Uuid::new_v4().simple(), self.date.timestamp(), self.domain)
    }

    fn format_date(&self) -> String {
        self.date.to_rfc2822()
    }

    /// Prepares the DATA content with dot-stuffing and the terminating
    /// `CRLF.CRLF`.
    pub fn prepare_data_content(encoded_email: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(encoded_email.len() + 16);
        let mut at_line_start = true;

        for &byte in encoded_email {
            if at_line_start && byte == b'.' {
                output.push(b'.');
            }

            output.push(byte);
            at_line_start = byte == b'\n';
        }

        if !output.ends_with(b"\r\n") {
            if output.ends_with(b"\n") {
                output.pop();
            }
            output.extend_from_slice(b"\r\n");
        }

        output.extend_from_slice(b".\r\n");
        output
    }
}

/// Converts bare LF and bare CR to CRLF.
fn normalize_line_endings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
            }
            '\n' => out.push_str("\r\n"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encoder() -> MimeEncoder {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        MimeEncoder::with_date("x.com", date)
    }

    fn render(email: &Email) -> String {
        let bytes = encoder().encode(email, "id-1@x.com").unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_plain_text_message() {
        let email = Email::new("a@x.com", "b@y.com", "Don't miss this email", "Please read the details here").unwrap();
        let content = render(&email);

        assert!(content.starts_with("Date: Fri, "));
        assert!(content.contains("Mar 2024 12:30:00 +0000\r\n"));
        assert!(content.contains("\r\nFrom: a@x.com\r\n"));
        assert!(content.contains("\r\nTo: b@y.com\r\n"));
        assert!(content.contains("\r\nSubject: Don't miss this email\r\n"));
        assert!(content.contains("\r\nMessage-ID: <id-1@x.com>\r\n"));
        assert!(content.contains("\r\nMIME-Version: 1.0\r\n"));
        assert!(content.contains("\r\nContent-Type: text/plain; charset=utf-8\r\n"));
        assert!(content.contains("\r\nContent-Transfer-Encoding: 7bit\r\n"));
        assert!(content.ends_with("\r\n\r\nPlease read the details here\r\n"));
    }

    #[test]
    fn test_non_ascii_subject_and_body() {
        let email = Email::new("a@x.com", "b@y.com", "Grüße", "Hallo Welt, schöne Grüße").unwrap();
        let content = render(&email);

        assert!(content.contains("Subject: =?utf-8?b?"));
        assert!(content.contains("Content-Transfer-Encoding: quoted-printable"));
        assert!(content.contains("sch=C3=B6ne"));
    }

    #[test]
    fn test_long_subject_is_split_into_encoded_words() {
        let subject = "ü".repeat(60);
        let encoded = MimeEncoder::encode_header(&subject);
        let words: Vec<&str> = encoded.split(' ').collect();
        assert!(words.len() > 1);
        assert!(words.iter().all(|w| w.len() <= 75));
    }

    #[test]
    fn test_body_line_endings_normalized() {
        let email = Email::new("a@x.com", "b@y.com", "s", "one\ntwo\r\nthree\rfour").unwrap();
        let content = render(&email);
        assert!(content.ends_with("\r\n\r\none\r\ntwo\r\nthree\r\nfour\r\n"));
    }

    #[test]
    fn test_long_header_is_folded() {
        let subject = "word ".repeat(30);
        let email = Email::new("a@x.com", "b@y.com", subject.trim(), "b").unwrap();
        let content = render(&email);
        assert!(content.contains("\r\n word"));
    }

    #[test]
    fn test_folding_keeps_runs_of_spaces() {
        let subject = format!("{}   {} end", "x".repeat(60), "y".repeat(30));
        let email = Email::new("a@x.com", "b@y.com", &subject, "b").unwrap();
        let content = render(&email);

        assert!(content.contains("\r\n y"));
        let unfolded = content.replace("\r\n ", " ");
        assert!(unfolded.contains(&format!("Subject: {}\r\n", subject)));
    }

    #[test]
    fn test_message_id_generation() {
        let enc = encoder();
        let id1 = enc.generate_message_id();
        let id2 = enc.generate_message_id();
        assert!(id1.ends_with("@x.com"));
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_dot_stuffing() {
        let input = b"Hello\r\n.World\r\n..Test\r\n";
        let output = MimeEncoder::prepare_data_content(input);
        let output_str = String::from_utf8_lossy(&output);
        assert!(output_str.contains("\r\n..World"));
        assert!(output_str.contains("\r\n...Test"));
        assert!(output_str.ends_with("\r\n.\r\n"));
    }

    #[test]
    fn test_dot_on_first_line() {
        let output = MimeEncoder::prepare_data_content(b".starts with dot");
        assert_eq!(output, b"..starts with dot\r\n.\r\n");
    }
}
