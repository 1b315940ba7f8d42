//! # email-dispatch
//!
//! Sends a single plain-text email described entirely by environment
//! variables:
//! - Implicit TLS (port 465), STARTTLS (port 587) or plaintext (port 25)
//! - PLAIN, LOGIN and CRAM-MD5 authentication
//! - RFC 5322 message rendering with RFC 2047 subjects
//! - Four-way failure classification for the command-line outcome line
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use email_dispatch::{DispatchConfig, Email, MailDispatcher};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DispatchConfig::from_env()?;
//!     let email = Email::from_config(&config)?;
//!
//!     let receipt = MailDispatcher::new(config).send(&email).await?;
//!     println!("Message sent with ID: {}", receipt.message_id);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// MIME encoding
pub mod mime;

// Observability
pub mod observability;

// Client
pub mod client;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use client::{run, run_from_env, MailDispatcher};
pub use config::{DispatchConfig, EnvSource, ProcessEnv, TlsMode};
pub use errors::{DispatchError, DispatchResult, ErrorKind};
pub use types::{Address, Email, SendReceipt};
