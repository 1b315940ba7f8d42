//! Scripted SMTP server for integration tests.
//!
//! Serves one plaintext connection on 127.0.0.1 and records every line the
//! client sends.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Server replies. Multi-line replies are given without the code prefix.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub greeting: String,
    pub extensions: Vec<String>,
    pub auth_reply: String,
    pub mail_reply: String,
    pub rcpt_reply: String,
    /// Mailboxes refused at RCPT regardless of `rcpt_reply`.
    pub refused_rcpts: Vec<String>,
    pub data_reply: String,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            greeting: "220 fake.local ESMTP ready".to_string(),
            extensions: vec!["AUTH PLAIN LOGIN".to_string(), "SIZE 10240000".to_string()],
            auth_reply: "235 2.7.0 Authentication successful".to_string(),
            mail_reply: "250 2.1.0 OK".to_string(),
            rcpt_reply: "250 2.1.5 OK".to_string(),
            refused_rcpts: Vec::new(),
            data_reply: "250 2.0.0 OK queued as 1234".to_string(),
        }
    }
}

impl Behavior {
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn with_auth_reply(mut self, reply: &str) -> Self {
        self.auth_reply = reply.to_string();
        self
    }

    pub fn with_rcpt_reply(mut self, reply: &str) -> Self {
        self.rcpt_reply = reply.to_string();
        self
    }

    pub fn refusing_rcpt(mut self, mailbox: &str) -> Self {
        self.refused_rcpts.push(mailbox.to_string());
        self
    }
}

/// What the server saw.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    /// Command lines, including AUTH continuation lines.
    pub commands: Vec<String>,
    /// Raw DATA lines, before dot-unstuffing, without the final ".".
    pub data: Vec<String>,
}

impl Transcript {
    pub fn verbs(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|c| c.split([' ', ':']).next().unwrap_or_default().to_uppercase())
            .collect()
    }

    pub fn contains_verb(&self, verb: &str) -> bool {
        self.verbs().iter().any(|v| v == verb)
    }

    pub fn message(&self) -> String {
        self.data.join("\r\n")
    }
}

pub struct FakeSmtpServer {
    pub port: u16,
    transcript: Arc<Mutex<Transcript>>,
    handle: JoinHandle<()>,
}

impl FakeSmtpServer {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let transcript = Arc::new(Mutex::new(Transcript::default()));

        let recorded = Arc::clone(&transcript);
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            serve(socket, behavior, recorded).await;
        });

        Self {
            port,
            transcript,
            handle,
        }
    }

    /// Waits for the session to end and returns what was received.
    pub async fn finish(self) -> Transcript {
        self.handle.await.unwrap();
        let transcript = self.transcript.lock().unwrap();
        transcript.clone()
    }

    /// Environment for a plaintext session against this server.
    pub fn env(&self) -> HashMap<String, String> {
        plaintext_env(self.port)
    }
}

pub fn plaintext_env(port: u16) -> HashMap<String, String> {
    [
        ("EMAIL_SENDER", "sender@example.com"),
        ("EMAIL_PASSWORD", "app-password"),
        ("EMAIL_RECEIVER", "receiver@example.org"),
        ("SMTP_HOST", "127.0.0.1"),
        ("SMTP_USE_SSL", "false"),
        ("SMTP_USE_STARTTLS", "false"),
        ("SMTP_TIMEOUT_SECONDS", "5"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .chain([("SMTP_PORT".to_string(), port.to_string())])
    .collect()
}

async fn serve(socket: tokio::net::TcpStream, behavior: Behavior, transcript: Arc<Mutex<Transcript>>) {
    let (read_half, mut writer) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    macro_rules! reply {
        ($text:expr) => {
            if writer.write_all(format!("{}\r\n", $text).as_bytes()).await.is_err() {
                return;
            }
        };
    }

    macro_rules! next_line {
        () => {{
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) => line.trim_end_matches(['\r', '\n']).to_string(),
            }
        }};
    }

    reply!(behavior.greeting);

    loop {
        let line = next_line!();
        transcript.lock().unwrap().commands.push(line.clone());
        let upper = line.to_uppercase();

        if upper.starts_with("EHLO") {
            let mut lines = vec!["fake.local greets you".to_string()];
            lines.extend(behavior.extensions.iter().cloned());
            let last = lines.len() - 1;
            for (i, text) in lines.iter().enumerate() {
                let sep = if i == last { ' ' } else { '-' };
                reply!(format!("250{}{}", sep, text));
            }
        } else if upper.starts_with("HELO") {
            reply!("250 fake.local");
        } else if upper.starts_with("STARTTLS") {
            reply!("454 4.7.0 TLS not available");
        } else if upper.starts_with("AUTH LOGIN") {
            reply!("334 VXNlcm5hbWU6");
            let user = next_line!();
            transcript.lock().unwrap().commands.push(user);
            reply!("334 UGFzc3dvcmQ6");
            let pass = next_line!();
            transcript.lock().unwrap().commands.push(pass);
            reply!(behavior.auth_reply);
        } else if upper.starts_with("AUTH") {
            reply!(behavior.auth_reply);
        } else if upper.starts_with("MAIL FROM") {
            reply!(behavior.mail_reply);
        } else if upper.starts_with("RCPT TO") {
            let refused = behavior
                .refused_rcpts
                .iter()
                .any(|mailbox| line.contains(&format!("<{}>", mailbox)));
            if refused {
                reply!("550 5.1.1 No such user");
            } else {
                reply!(behavior.rcpt_reply);
            }
        } else if upper == "DATA" {
            reply!("354 End data with <CR><LF>.<CR><LF>");
            loop {
                let data_line = next_line!();
                if data_line == "." {
                    break;
                }
                transcript.lock().unwrap().data.push(data_line);
            }
            reply!(behavior.data_reply);
        } else if upper == "RSET" {
            reply!("250 2.0.0 Flushed");
        } else if upper == "QUIT" {
            reply!("221 2.0.0 Bye");
            return;
        } else {
            reply!("502 5.5.2 Command not recognized");
        }
    }
}
