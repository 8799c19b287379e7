pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::seed::SeedAction;

#[derive(Debug, Parser)]
#[command(
    name = "koperasi",
    about = "Koperasi operator CLI",
    long_about = "Operate the koperasi backend: migrations, demo data, config inspection, and readiness checks.",
    after_help = "Examples:\n  koperasi migrate\n  koperasi seed verify\n  koperasi doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load, verify, or remove the deterministic demo dataset")]
    Seed {
        #[command(subcommand)]
        action: Option<SeedAction>,
    },
    #[command(about = "Run end-to-end readiness checks with per-check timing details")]
    Smoke,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, token secret, mail transport, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { action } => commands::seed::run(action.unwrap_or(SeedAction::Load)),
        Command::Smoke => commands::smoke::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};
    use crate::commands::seed::SeedAction;

    #[test]
    fn seed_defaults_to_load() {
        let cli = Cli::try_parse_from(["koperasi", "seed"]).expect("parse");
        assert!(matches!(cli.command, Command::Seed { action: None }));

        let cli = Cli::try_parse_from(["koperasi", "seed", "verify"]).expect("parse");
        assert!(matches!(cli.command, Command::Seed { action: Some(SeedAction::Verify) }));
    }

    #[test]
    fn doctor_accepts_json_flag() {
        let cli = Cli::try_parse_from(["koperasi", "doctor", "--json"]).expect("parse");
        assert!(matches!(cli.command, Command::Doctor { json: true }));
        assert!(Cli::try_parse_from(["koperasi", "start"]).is_err());
    }
}
