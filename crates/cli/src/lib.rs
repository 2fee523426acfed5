pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use vendi_core::config::{AppConfig, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "vendi",
    about = "Vendi operator CLI",
    long_about = "Operate the Vendi conversational commerce agent: chat locally, seed demo \
                  data, inspect configuration, and run readiness checks.",
    after_help = "Examples:\n  vendi chat --in-memory\n  vendi seed\n  vendi doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Talk to the agent from the terminal (REPL or one-shot)")]
    Chat {
        #[arg(long, help = "Session key to converse under", default_value = "cli")]
        session: String,
        #[arg(long, help = "Send a single message and print the reply instead of a REPL")]
        message: Option<String>,
        #[arg(long, help = "Use the in-memory demo catalog instead of the database")]
        in_memory: bool,
        #[arg(long, help = "Persist sessions to the database instead of process memory")]
        persist_sessions: bool,
    },
    #[command(about = "Apply migrations and load the demo catalog")]
    Seed,
    #[command(about = "Print the effective configuration with secrets redacted")]
    Config,
    #[command(about = "Validate config, database connectivity, and model backend wiring")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Chat { session, message, in_memory, persist_sessions } => {
            commands::chat::run(&session, message.as_deref(), in_memory, persist_sessions)
        }
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}

pub fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        LogFormat::Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}
