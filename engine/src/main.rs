// crew multi-agent assistant
// Main entry point for the crew binary

use clap::Parser;
use crew_engine::cli::{Cli, Command};
use crew_engine::config::Config;
use crew_engine::handlers::{
    handle_clean, handle_resume, handle_sessions, handle_start, OutputFormat,
};
use crew_engine::telemetry::{init_telemetry_override, init_telemetry_with_level};
use sdk::errors::{CrewErrorExt, EngineError, EXIT_RUNTIME_ERROR, EXIT_SUCCESS};

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            let (code, hint) = match e.downcast_ref::<EngineError>() {
                Some(engine) => (engine.exit_code(), Some(engine.user_hint().to_string())),
                None => (EXIT_RUNTIME_ERROR, None),
            };
            tracing::error!(error = %format!("{:#}", e), "Command failed");
            eprintln!("Error: {:#}", e);
            if let Some(hint) = hint {
                eprintln!("Hint: {}", hint);
            }
            code
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    // Load configuration (or use custom path if provided)
    let config = Config::load(cli.config.as_deref())?;

    // --log beats CREW_LOG, which beats the config file
    match cli.log.as_deref() {
        Some(level) => init_telemetry_override(level),
        None => init_telemetry_with_level(&config.core.log_level),
    }

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");
    tracing::info!("crew v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Handle commands
    match cli.command {
        Command::Start { task } => {
            tracing::info!("Starting session");
            handle_start(task, &config, format).await
        }

        Command::Resume { id } => {
            tracing::info!("Resuming session: {}", id);
            handle_resume(id, &config, format).await
        }

        Command::Sessions => {
            handle_sessions(&config, format).await?;
            Ok(EXIT_SUCCESS)
        }

        Command::Clean { older_than, force } => {
            tracing::info!("Cleaning sessions older than {} days", older_than);
            handle_clean(older_than, force, &config, format).await?;
            Ok(EXIT_SUCCESS)
        }
    }
}
