//! Runs the built binary against a scripted server and checks what a user
//! sees: one stdout line and the exit code.

mod common;

use std::collections::HashMap;
use std::process::{Command, Output};

use common::{plaintext_env, Behavior, FakeSmtpServer};
use email_dispatch::errors::AUTH_FAILED_HINT;

/// Runs the binary with exactly `env` in an empty working directory, so no
/// stray `.env` file is picked up.
async fn run_binary(env: HashMap<String, String>) -> Output {
    tokio::task::spawn_blocking(move || {
        let dir = tempfile::tempdir().unwrap();
        Command::new(env!("CARGO_BIN_EXE_email-dispatch"))
            .env_clear()
            .envs(env)
            .current_dir(dir.path())
            .output()
            .unwrap()
    })
    .await
    .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[tokio::test]
async fn test_binary_reports_success() {
    // Arrange
    let server = FakeSmtpServer::start(Behavior::default()).await;

    // Act
    let output = run_binary(server.env()).await;
    let transcript = server.finish().await;

    // Assert
    assert_eq!(stdout(&output), "Email sent successfully.\n");
    assert_eq!(output.status.code(), Some(0));
    assert!(transcript.contains_verb("DATA"));
}

#[tokio::test]
async fn test_binary_reports_rejected_credentials() {
    // Arrange
    let server = FakeSmtpServer::start(
        Behavior::default().with_auth_reply("535 5.7.8 Username and Password not accepted"),
    )
    .await;

    // Act
    let output = run_binary(server.env()).await;
    server.finish().await;

    // Assert
    assert_eq!(stdout(&output), format!("{}\n", AUTH_FAILED_HINT));
    assert_eq!(output.status.code(), Some(1));

    // The outcome is printed once; stderr stays free of colour codes.
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("Dispatch failed"));
    assert!(!stderr.contains('\x1b'));
}

#[tokio::test]
async fn test_binary_reports_missing_variable() {
    let mut env = plaintext_env(1);
    env.remove("EMAIL_PASSWORD");

    let output = run_binary(env).await;

    assert_eq!(
        stdout(&output),
        "Configuration error: Missing required environment variable: EMAIL_PASSWORD\n"
    );
    assert_eq!(output.status.code(), Some(1));
}
