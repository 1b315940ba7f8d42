use std::process::ExitCode;

use email_dispatch::observability::init_tracing;
use email_dispatch::run_from_env;

fn main() -> ExitCode {
    // A missing .env is fine; variables already set keep their values.
    let dotenv = dotenvy::dotenv();

    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialise logging: {}", e);
    }
    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Could not load .env file"),
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            println!("Unexpected error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_from_env()) {
        Ok(_) => {
            println!("Email sent successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}", e.diagnostic());
            tracing::debug!(kind = %e.kind(), error = %e, "Dispatch failed");
            ExitCode::FAILURE
        }
    }
}
