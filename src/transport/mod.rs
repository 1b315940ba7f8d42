//! Transport layer for SMTP sessions.
//!
//! A [`TcpTransport`] is one TCP connection that is either plaintext,
//! TLS from the first byte, or upgraded in place by STARTTLS. Every
//! connect, read, write and handshake is bounded by the configured timeout.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{DispatchConfig, TlsMode};
use crate::errors::{DispatchError, DispatchResult, ErrorKind};
use crate::protocol::{codes, SmtpCommand, SmtpResponse};

/// Seam between the dispatcher and the wire.
#[async_trait]
pub trait SmtpTransport: Send + fmt::Debug {
    /// Sends a command and reads the reply.
    async fn send_command(&mut self, command: &SmtpCommand) -> DispatchResult<SmtpResponse>;

    /// Writes raw bytes (AUTH continuations, message data).
    async fn send_data(&mut self, data: &[u8]) -> DispatchResult<()>;

    /// Reads one (possibly multiline) reply.
    async fn read_response(&mut self) -> DispatchResult<SmtpResponse>;

    /// Performs the TLS handshake on the open connection after a 220 reply
    /// to STARTTLS.
    async fn upgrade_tls(&mut self) -> DispatchResult<()>;

    /// Returns true once the connection is encrypted.
    fn is_tls(&self) -> bool;

    /// Sends QUIT and shuts the connection down. Safe to call more than once.
    async fn close(&mut self) -> DispatchResult<()>;
}

/// Longest reply line accepted, terminator included.
pub const MAX_LINE: usize = 8192;

/// Most lines accepted in one reply.
pub const MAX_REPLY_LINES: usize = 512;

trait Stream: AsyncBufRead + AsyncWrite + Unpin + Send {}

impl<S: AsyncBufRead + AsyncWrite + Unpin + Send> Stream for S {}

enum TransportStream {
    Plain(BufReader<TcpStream>),
    #[cfg(feature = "rustls-tls")]
    Rustls(BufReader<tokio_rustls::client::TlsStream<TcpStream>>),
    #[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
    NativeTls(BufReader<tokio_native_tls::TlsStream<TcpStream>>),
    Closed,
}

/// TCP connection with optional TLS.
pub struct TcpTransport {
    stream: TransportStream,
    timeout: Duration,
    host: String,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("tls", &self.is_tls())
            .field("closed", &matches!(self.stream, TransportStream::Closed))
            .finish()
    }
}

impl TcpTransport {
    /// Opens the connection and consumes the server greeting.
    ///
    /// With implicit TLS the handshake happens before the greeting is read.
    pub async fn connect(config: &DispatchConfig) -> DispatchResult<Self> {
        let address = config.address();

        tracing::debug!(
            address = %address,
            mode = %config.tls_mode(),
            timeout = %humantime::format_duration(config.timeout),
            "Connecting to SMTP server"
        );

        let tcp = timeout(config.timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| DispatchError::unexpected(format!("Connection to {} timed out", address)))?
            .map_err(|e| {
                DispatchError::unexpected(format!("Connection to {} failed", address)).with_cause(e)
            })?;
        tcp.set_nodelay(true).ok();

        let stream = if config.tls_mode() == TlsMode::Implicit {
            tls_handshake(tcp, &config.host, config.timeout).await?
        } else {
            TransportStream::Plain(BufReader::new(tcp))
        };

        let mut transport = Self {
            stream,
            timeout: config.timeout,
            host: config.host.clone(),
        };

        let greeting = transport.read_response().await?;
        if greeting.code != codes::SERVICE_READY {
            return Err(greeting.to_error(ErrorKind::Protocol));
        }

        Ok(transport)
    }

    fn io(&mut self) -> DispatchResult<&mut dyn Stream> {
        match &mut self.stream {
            TransportStream::Plain(stream) => Ok(stream),
            #[cfg(feature = "rustls-tls")]
            TransportStream::Rustls(stream) => Ok(stream),
            #[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
            TransportStream::NativeTls(stream) => Ok(stream),
            TransportStream::Closed => Err(DispatchError::protocol("Please run connect() first")),
        }
    }

    /// Mid-session I/O failures are reported as the server disconnecting.
    fn lost(what: &str, cause: std::io::Error) -> DispatchError {
        DispatchError::protocol(format!("Connection unexpectedly closed during {}", what))
            .with_cause(cause)
    }

    async fn write_all(&mut self, data: &[u8]) -> DispatchResult<()> {
        let limit = self.timeout;
        let io = self.io()?;

        timeout(limit, io.write_all(data))
            .await
            .map_err(|_| DispatchError::protocol("Connection unexpectedly closed: write timed out"))?
            .map_err(|e| Self::lost("write", e))?;

        timeout(limit, io.flush())
            .await
            .map_err(|_| DispatchError::protocol("Connection unexpectedly closed: flush timed out"))?
            .map_err(|e| Self::lost("flush", e))?;

        Ok(())
    }
}

#[async_trait]
impl SmtpTransport for TcpTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> DispatchResult<SmtpResponse> {
        tracing::debug!(command = %command, "Sending SMTP command");

        let line = format!("{}\r\n", command.to_smtp_string());
        self.write_all(line.as_bytes()).await?;
        self.read_response().await
    }

    async fn send_data(&mut self, data: &[u8]) -> DispatchResult<()> {
        self.write_all(data).await
    }

    async fn read_response(&mut self) -> DispatchResult<SmtpResponse> {
        let limit = self.timeout;
        let io = self.io()?;
        let mut lines = Vec::new();

        loop {
            if lines.len() == MAX_REPLY_LINES {
                return Err(DispatchError::protocol("Too many lines in reply"));
            }

            let mut buf = Vec::new();
            let mut bounded = (&mut *io).take(MAX_LINE as u64 + 1);

            let read = timeout(limit, bounded.read_until(b'\n', &mut buf))
                .await
                .map_err(|_| DispatchError::protocol("Connection unexpectedly closed: timed out"))?
                .map_err(|e| Self::lost("read", e))?;

            if read == 0 {
                return Err(DispatchError::disconnected());
            }
            if buf.len() > MAX_LINE {
                return Err(DispatchError::protocol("Line too long"));
            }

            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            let is_continuation = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line);

            if !is_continuation {
                break;
            }
        }

        let response = SmtpResponse::parse(&lines)?;
        tracing::debug!(code = response.code, message = %response.first_message(), "Received SMTP response");
        Ok(response)
    }

    async fn upgrade_tls(&mut self) -> DispatchResult<()> {
        let tcp = match std::mem::replace(&mut self.stream, TransportStream::Closed) {
            TransportStream::Plain(reader) => reader.into_inner(),
            other => {
                let already = !matches!(other, TransportStream::Closed);
                self.stream = other;
                return if already {
                    Ok(())
                } else {
                    Err(DispatchError::protocol("Please run connect() first"))
                };
            }
        };

        self.stream = tls_handshake(tcp, &self.host, self.timeout).await?;
        tracing::debug!(host = %self.host, "Connection upgraded to TLS");
        Ok(())
    }

    fn is_tls(&self) -> bool {
        !matches!(self.stream, TransportStream::Plain(_) | TransportStream::Closed)
    }

    async fn close(&mut self) -> DispatchResult<()> {
        if matches!(self.stream, TransportStream::Closed) {
            return Ok(());
        }

        // The server may already have hung up.
        if let Err(e) = self.send_command(&SmtpCommand::Quit).await {
            tracing::debug!(error = %e, "QUIT failed");
        }
        let limit = self.timeout;
        if let Ok(io) = self.io() {
            let _ = timeout(limit, io.shutdown()).await;
        }
        self.stream = TransportStream::Closed;
        Ok(())
    }
}

#[cfg(feature = "rustls-tls")]
async fn tls_handshake(tcp: TcpStream, host: &str, limit: Duration) -> DispatchResult<TransportStream> {
    use rustls::pki_types::ServerName;
    use std::sync::Arc;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| DispatchError::unexpected(format!("Invalid server name {}: {}", host, e)))?;

    let stream = timeout(limit, connector.connect(server_name, tcp))
        .await
        .map_err(|_| DispatchError::unexpected("TLS handshake timed out"))?
        .map_err(|e| DispatchError::unexpected("TLS handshake failed").with_cause(e))?;

    Ok(TransportStream::Rustls(BufReader::new(stream)))
}

#[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
async fn tls_handshake(tcp: TcpStream, host: &str, limit: Duration) -> DispatchResult<TransportStream> {
    let connector = native_tls::TlsConnector::new()
        .map_err(|e| DispatchError::unexpected("Failed to build TLS connector").with_cause(e))?;
    let connector = tokio_native_tls::TlsConnector::from(connector);

    let stream = timeout(limit, connector.connect(host, tcp))
        .await
        .map_err(|_| DispatchError::unexpected("TLS handshake timed out"))?
        .map_err(|e| DispatchError::unexpected("TLS handshake failed").with_cause(e))?;

    Ok(TransportStream::NativeTls(BufReader::new(stream)))
}

#[cfg(not(any(feature = "rustls-tls", feature = "native-tls")))]
async fn tls_handshake(_tcp: TcpStream, _host: &str, _limit: Duration) -> DispatchResult<TransportStream> {
    Err(DispatchError::config("No TLS implementation available; enable rustls-tls or native-tls"))
}
