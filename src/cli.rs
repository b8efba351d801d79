//! CLI argument parsing for the spark-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "spark-worker", about = "Spark lead import worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Import a CSV or spreadsheet file from disk
    Import {
        /// Path to a .csv, .xlsx, .xls or .ods file
        #[arg(long)]
        file: PathBuf,
        /// Lead source recorded on every imported contact
        #[arg(long, default_value = "Other")]
        source: String,
        /// Event tag for rows that have none
        #[arg(long)]
        event_tag: Option<String>,
        /// Do not push imported contacts to the mailer
        #[arg(long)]
        skip_sync: bool,
        /// Parse and import into memory only; nothing is written
        #[arg(long)]
        dry_run: bool,
    },
    /// Push all unsynced contacts to the mailer and exit
    SyncMailer,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["spark-worker", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["spark-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_import_defaults() {
        let cli = Cli::parse_from(["spark-worker", "import", "--file", "leads.csv"]);
        match cli.command {
            Some(Command::Import { file, source, event_tag, skip_sync, dry_run }) => {
                assert_eq!(file, PathBuf::from("leads.csv"));
                assert_eq!(source, "Other");
                assert!(event_tag.is_none());
                assert!(!skip_sync);
                assert!(!dry_run);
            }
            _ => panic!("expected import command"),
        }
    }

    #[test]
    fn test_cli_import_all_flags() {
        let cli = Cli::parse_from([
            "spark-worker", "import",
            "--file", "clay.xlsx",
            "--source", "Clay Import",
            "--event-tag", "saastr-2026",
            "--skip-sync",
            "--dry-run",
        ]);
        match cli.command {
            Some(Command::Import { source, event_tag, skip_sync, dry_run, .. }) => {
                assert_eq!(source, "Clay Import");
                assert_eq!(event_tag.as_deref(), Some("saastr-2026"));
                assert!(skip_sync);
                assert!(dry_run);
            }
            _ => panic!("expected import command"),
        }
    }

    #[test]
    fn test_cli_sync_mailer_parses() {
        let cli = Cli::parse_from(["spark-worker", "sync-mailer"]);
        assert!(matches!(cli.command, Some(Command::SyncMailer)));
    }
}
