pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "fixtrack",
    about = "Fixtrack operator CLI",
    long_about = "Apply migrations, load demo reference data, and inspect the effective configuration.",
    after_help = "Examples:\n  fixtrack migrate\n  fixtrack seed\n  fixtrack config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and report the applied versions")]
    Migrate,
    #[command(about = "Load demo branches, equipment and role grants (idempotent)")]
    Seed,
    #[command(about = "Print the effective configuration with the source of every value")]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => commands::config::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
