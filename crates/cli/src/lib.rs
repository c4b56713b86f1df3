pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "leadflow",
    about = "Leadflow operator CLI",
    long_about = "Inspect Leadflow configuration, check runtime readiness, and preview how answers are split for Slack.",
    after_help = "Examples:\n  leadflow doctor --json\n  leadflow config\n  leadflow chunk answer.md --max-chars 500"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, Slack transport readiness, and LLM backend settings")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Split a text file into the parts that would be posted to Slack")]
    Chunk {
        #[arg(help = "File holding the answer text")]
        path: PathBuf,
        #[arg(long, help = "Maximum characters per part (defaults to delivery.max_chunk_chars)")]
        max_chars: Option<usize>,
        #[arg(long, help = "Keep paragraphs longer than the limit whole instead of splitting")]
        keep_oversized: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Chunk { path, max_chars, keep_oversized } => {
            commands::chunk::run(&path, max_chars, keep_oversized)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
