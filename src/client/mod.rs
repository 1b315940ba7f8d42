//! One-shot mail submission.
//!
//! [`MailDispatcher`] drives a single SMTP session over any
//! [`SmtpTransport`]:
//! - EHLO with HELO fallback
//! - STARTTLS upgrade when configured
//! - Authentication with the best advertised mechanism
//! - MAIL FROM, one RCPT TO per recipient, then DATA

use crate::auth::{AuthMethod, Credentials};
use crate::config::{DispatchConfig, EnvSource, ProcessEnv, TlsMode};
use crate::errors::{DispatchError, DispatchResult, ErrorKind};
use crate::mime::MimeEncoder;
use crate::observability::Timer;
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand, SmtpResponse};
use crate::transport::{SmtpTransport, TcpTransport};
use crate::types::{Email, SendReceipt};

/// Name announced in EHLO and HELO.
pub const CLIENT_ID: &str = "localhost";

/// Sends one message per call over a fresh connection.
#[derive(Debug)]
pub struct MailDispatcher {
    config: DispatchConfig,
    credentials: Credentials,
}

impl MailDispatcher {
    /// Creates a dispatcher. Authenticates as the configured sender.
    pub fn new(config: DispatchConfig) -> Self {
        let credentials = Credentials::new(config.sender.clone(), config.password.clone());
        Self { config, credentials }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Connects to the configured server and submits `email`.
    pub async fn send(&self, email: &Email) -> DispatchResult<SendReceipt> {
        let timer = Timer::start("send");

        let mut transport = TcpTransport::connect(&self.config).await?;
        let mut receipt = self.send_over(&mut transport, email).await?;

        receipt.duration = timer.stop();
        tracing::info!(
            message_id = %receipt.message_id,
            duration_ms = receipt.duration.as_millis() as u64,
            "Email sent"
        );
        Ok(receipt)
    }

    /// Runs the session on an already greeted transport and closes it
    /// afterwards, whether or not the session succeeded.
    pub async fn send_over<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        email: &Email,
    ) -> DispatchResult<SendReceipt> {
        let result = self.transact(transport, email).await;

        if let Err(e) = transport.close().await {
            tracing::debug!(error = %e, "Error closing connection");
        }

        if let Err(e) = &result {
            tracing::debug!(kind = %e.kind(), error = %e, "Email not sent");
        }
        result
    }

    async fn transact<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        email: &Email,
    ) -> DispatchResult<SendReceipt> {
        let mut capabilities = self.greet(transport).await?;

        if self.config.tls_mode() == TlsMode::StartTls && !transport.is_tls() {
            capabilities = self.start_tls(transport, &capabilities).await?;
        }

        self.authenticate(transport, &capabilities).await?;
        self.submit(transport, &capabilities, email).await
    }

    /// Sends EHLO, falling back to HELO when the server refuses it.
    async fn greet<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
    ) -> DispatchResult<EsmtpCapabilities> {
        let response = transport
            .send_command(&SmtpCommand::Ehlo(CLIENT_ID.to_string()))
            .await?;
        if response.is_success() {
            return Ok(EsmtpCapabilities::from_ehlo_response(&response));
        }

        tracing::debug!(code = response.code, "EHLO refused, trying HELO");
        let response = transport
            .send_command(&SmtpCommand::Helo(CLIENT_ID.to_string()))
            .await?;
        if !response.is_success() {
            return Err(response.to_error(ErrorKind::Protocol));
        }

        Ok(EsmtpCapabilities::default())
    }

    async fn start_tls<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        capabilities: &EsmtpCapabilities,
    ) -> DispatchResult<EsmtpCapabilities> {
        if !capabilities.starttls {
            return Err(DispatchError::protocol("STARTTLS extension not supported by server"));
        }

        let response = transport.send_command(&SmtpCommand::StartTls).await?;
        if response.code != codes::SERVICE_READY {
            return Err(response.to_error(ErrorKind::Protocol));
        }

        transport.upgrade_tls().await?;

        // Capabilities learned before the upgrade must be discarded.
        self.greet(transport).await
    }

    async fn authenticate<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        capabilities: &EsmtpCapabilities,
    ) -> DispatchResult<()> {
        if !capabilities.auth_advertised {
            return Err(DispatchError::protocol("SMTP AUTH extension not supported by server"));
        }

        let method = AuthMethod::select(&capabilities.auth_mechanisms)
            .ok_or_else(|| DispatchError::protocol("No suitable authentication method found"))?;

        tracing::debug!(method = %method, user = %self.credentials.username(), "Authenticating");

        let response = match method {
            AuthMethod::Plain => self.auth_plain(transport).await?,
            AuthMethod::Login => self.auth_login(transport).await?,
            AuthMethod::CramMd5 => self.auth_cram_md5(transport).await?,
        };

        match response.code {
            // 503: already authenticated.
            codes::AUTH_SUCCESS | codes::BAD_SEQUENCE => Ok(()),
            _ => Err(response.to_error(ErrorKind::Auth)),
        }
    }

    async fn auth_plain<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
    ) -> DispatchResult<SmtpResponse> {
        let command = SmtpCommand::Auth {
            mechanism: AuthMethod::Plain,
            initial_response: Some(self.credentials.plain_initial_response()),
        };
        transport.send_command(&command).await
    }

    async fn auth_login<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
    ) -> DispatchResult<SmtpResponse> {
        let command = SmtpCommand::Auth {
            mechanism: AuthMethod::Login,
            initial_response: None,
        };

        let response = transport.send_command(&command).await?;
        if response.code != codes::AUTH_CONTINUE {
            return Ok(response);
        }

        let username = self.credentials.login_username();
        let response = continue_auth(transport, &username).await?;
        if response.code != codes::AUTH_CONTINUE {
            return Ok(response);
        }

        let password = self.credentials.login_password();
        continue_auth(transport, &password).await
    }

    async fn auth_cram_md5<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
    ) -> DispatchResult<SmtpResponse> {
        let command = SmtpCommand::Auth {
            mechanism: AuthMethod::CramMd5,
            initial_response: None,
        };

        let response = transport.send_command(&command).await?;
        if response.code != codes::AUTH_CONTINUE {
            return Ok(response);
        }

        let answer = self.credentials.cram_md5_response(response.first_message())?;
        continue_auth(transport, &answer).await
    }

    async fn submit<T: SmtpTransport + ?Sized>(
        &self,
        transport: &mut T,
        capabilities: &EsmtpCapabilities,
        email: &Email,
    ) -> DispatchResult<SendReceipt> {
        let encoder = MimeEncoder::new(email.envelope_from().domain());
        let message_id = encoder.generate_message_id();
        let encoded = encoder.encode(email, &message_id)?;
        let data = MimeEncoder::prepare_data_content(&encoded);

        let mail_from = SmtpCommand::MailFrom {
            address: email.envelope_from().to_smtp(),
            size: capabilities.size_supported.then_some(encoded.len()),
        };
        let response = transport.send_command(&mail_from).await?;
        if !response.is_success() {
            return Err(abort(transport, &response, "Sender address refused").await);
        }

        // The message goes out as long as one recipient is accepted.
        let mut refused = Vec::new();
        let mut first_refusal = None;
        for recipient in email.envelope_to() {
            let rcpt_to = SmtpCommand::RcptTo {
                address: recipient.to_smtp(),
            };
            let response = transport.send_command(&rcpt_to).await?;
            if !response.is_success() {
                tracing::warn!(
                    recipient = %recipient.email(),
                    code = response.code,
                    "Recipient refused"
                );
                refused.push(recipient.clone());
                first_refusal.get_or_insert(response);
            }
        }
        if refused.len() == email.envelope_to().len() {
            if let Some(response) = first_refusal {
                return Err(abort(transport, &response, "Recipient address refused").await);
            }
        }

        let response = transport.send_command(&SmtpCommand::Data).await?;
        if response.code != codes::START_MAIL_INPUT {
            return Err(abort(transport, &response, "DATA command refused").await);
        }

        transport.send_data(&data).await?;
        let response = transport.read_response().await?;
        if response.code != codes::OK {
            return Err(abort(transport, &response, "Message data refused").await);
        }

        Ok(SendReceipt {
            message_id,
            response: response.full_message(),
            refused,
            duration: std::time::Duration::ZERO,
        })
    }
}

/// Sends one base64 line of an AUTH exchange and reads the reply.
async fn continue_auth<T: SmtpTransport + ?Sized>(
    transport: &mut T,
    line: &str,
) -> DispatchResult<SmtpResponse> {
    transport.send_data(format!("{}\r\n", line).as_bytes()).await?;
    transport.read_response().await
}

/// Resets the transaction after a refusal and builds the error to report.
async fn abort<T: SmtpTransport + ?Sized>(
    transport: &mut T,
    response: &SmtpResponse,
    context: &str,
) -> DispatchError {
    if let Err(e) = transport.send_command(&SmtpCommand::Rset).await {
        tracing::debug!(error = %e, "RSET failed");
    }

    let message = format!("{}: {}", context, response.one_line());
    let mut err = DispatchError::from_smtp_response(ErrorKind::Protocol, response.code, message);
    if let Some(enhanced) = &response.enhanced_code {
        err = err.with_enhanced_code(enhanced.clone());
    }
    err
}

/// Reads the configuration from `source` and sends the message it describes.
pub async fn run<S: EnvSource + ?Sized>(source: &S) -> DispatchResult<SendReceipt> {
    let config = DispatchConfig::from_source(source)?;
    let email = Email::from_config(&config)?;
    MailDispatcher::new(config).send(&email).await
}

/// [`run`] against the process environment.
pub async fn run_from_env() -> DispatchResult<SendReceipt> {
    run(&ProcessEnv).await
}
