//! Scripted transport for exercising the dispatcher without a network.
//!
//! Clones of a [`MockTransport`] share their state, so a test can hand one
//! clone to the dispatcher and inspect the other afterwards.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::{DispatchError, DispatchResult};
use crate::protocol::{codes, SmtpCommand, SmtpResponse};
use crate::transport::SmtpTransport;

#[derive(Debug, Default)]
struct MockState {
    commands: Vec<SmtpCommand>,
    responses: VecDeque<SmtpResponse>,
    data_received: Vec<Vec<u8>>,
    fail_next: Option<DispatchError>,
    tls_enabled: bool,
    closed: bool,
}

/// Mock SMTP transport.
///
/// Replies are served from a queue; once the queue is empty every command
/// gets `250 OK`.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Creates a mock with an empty reply queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues a reply.
    pub fn queue_response(&self, response: SmtpResponse) -> &Self {
        self.state().responses.push_back(response);
        self
    }

    /// Queues `250 OK`.
    pub fn queue_ok(&self) -> &Self {
        self.queue_response(SmtpResponse::new(codes::OK, "OK"))
    }

    /// Queues a single-line reply with the given code.
    pub fn queue_error(&self, code: u16, message: &str) -> &Self {
        self.queue_response(SmtpResponse::new(code, message))
    }

    /// Makes the next command or data write fail with `error`.
    pub fn fail_next_with(&self, error: DispatchError) -> &Self {
        self.state().fail_next = Some(error);
        self
    }

    /// Marks the connection as encrypted, as after an implicit TLS connect.
    pub fn set_tls(&self, enabled: bool) {
        self.state().tls_enabled = enabled;
    }

    /// Commands sent so far, including the QUIT from `close`.
    pub fn recorded_commands(&self) -> Vec<SmtpCommand> {
        self.state().commands.clone()
    }

    /// Raw writes made through `send_data`.
    pub fn received_data(&self) -> Vec<Vec<u8>> {
        self.state().data_received.clone()
    }

    /// Returns true once `close` was called.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn next_response(&self) -> SmtpResponse {
        self.state()
            .responses
            .pop_front()
            .unwrap_or_else(|| SmtpResponse::new(codes::OK, "OK"))
    }

    fn check(&self) -> DispatchResult<()> {
        let mut state = self.state();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        if state.closed {
            return Err(DispatchError::protocol("Please run connect() first"));
        }
        Ok(())
    }
}

#[async_trait]
impl SmtpTransport for MockTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> DispatchResult<SmtpResponse> {
        self.check()?;
        self.state().commands.push(command.clone());
        Ok(self.next_response())
    }

    async fn send_data(&mut self, data: &[u8]) -> DispatchResult<()> {
        self.check()?;
        self.state().data_received.push(data.to_vec());
        Ok(())
    }

    async fn read_response(&mut self) -> DispatchResult<SmtpResponse> {
        self.check()?;
        Ok(self.next_response())
    }

    async fn upgrade_tls(&mut self) -> DispatchResult<()> {
        self.check()?;
        self.state().tls_enabled = true;
        Ok(())
    }

    fn is_tls(&self) -> bool {
        self.state().tls_enabled
    }

    async fn close(&mut self) -> DispatchResult<()> {
        let mut state = self.state();
        if !state.closed {
            state.commands.push(SmtpCommand::Quit);
            state.closed = true;
        }
        Ok(())
    }
}
