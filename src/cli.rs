//! CLI argument parsing and command execution.
//!
//! Two subcommands: `serve` runs the scheduling daemon, `migrate` manages
//! the database schema. Configuration comes from the layered loader unless
//! an explicit file is given with `--config`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{ConfigLoader, Settings};
use crate::daemon;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::logger::init_logger;

// Include shadow-rs generated build information
use shadow_rs::shadow;
shadow!(build);

/// Scheduled report generation and delivery service
#[derive(Parser, Debug)]
#[command(name = "reportflow")]
#[command(about = "Scheduled report generation and delivery service")]
#[command(version = build::CLAP_LONG_VERSION)]
pub struct Cli {
    /// Subcommand to execute; defaults to `serve`
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    ///
    /// Use a single TOML file instead of the layered configuration
    /// directory.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the scheduling daemon (default)
    Serve {
        /// Validate configuration and exit without starting
        #[arg(long)]
        dry_run: bool,
    },
    /// Database migration operations
    Migrate {
        /// Show pending migrations without applying
        #[arg(long, conflicts_with = "rollback")]
        dry_run: bool,

        /// Number of migrations to rollback
        #[arg(long, value_name = "STEPS", conflicts_with = "dry_run")]
        rollback: Option<u32>,
    },
}

/// Parses arguments, loads configuration, and runs the selected command.
pub async fn run() -> AppResult<()> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_file(path.clone()),
        None => ConfigLoader::new(),
    };

    let mut settings = loader.load().map_err(|e| AppError::Configuration {
        key: "config".to_string(),
        source: anyhow::Error::from(e),
    })?;

    if cli.verbose {
        settings.logger.level = "debug".to_string();
    } else if cli.quiet {
        settings.logger.level = "error".to_string();
    }

    init_logger(&settings.logger)?;

    match cli.command.unwrap_or(Commands::Serve { dry_run: false }) {
        Commands::Serve { dry_run } => serve(settings, dry_run).await,
        Commands::Migrate { dry_run, rollback } => migrate(settings, dry_run, rollback).await,
    }
}

async fn serve(settings: Settings, dry_run: bool) -> AppResult<()> {
    settings
        .database
        .validate()
        .map_err(|e| AppError::Configuration {
            key: "database".to_string(),
            source: anyhow::Error::from(e),
        })?;

    if dry_run {
        println!("Configuration is valid");
        return Ok(());
    }

    daemon::run(settings).await
}

async fn migrate(settings: Settings, dry_run: bool, rollback: Option<u32>) -> AppResult<()> {
    settings
        .database
        .validate()
        .map_err(|e| AppError::Configuration {
            key: "database".to_string(),
            source: anyhow::Error::from(e),
        })?;

    if dry_run {
        let pending = db::pending_migration_count(&settings.database.url).await?;
        if pending == 0 {
            println!("No pending migrations found - database is up to date");
        } else {
            println!("Found {} pending migration(s)", pending);
            println!("Run without --dry-run to apply them");
        }
        return Ok(());
    }

    if let Some(steps) = rollback {
        if steps == 0 {
            return Err(AppError::Validation {
                field: "rollback".to_string(),
                reason: "Number of rollback steps must be greater than 0".to_string(),
            });
        }

        let reverted = db::revert_migrations(&settings.database.url, steps).await?;
        println!("Rolled back {} migration(s)", reverted);
        return Ok(());
    }

    let applied = db::run_pending_migrations(&settings.database.url).await?;
    if applied.is_empty() {
        println!("No migrations to apply - database is already up to date");
    } else {
        println!("Applied {} migration(s):", applied.len());
        for migration in &applied {
            println!("  - {}", migration);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_behavior() {
        let cli = Cli::try_parse_from(["reportflow"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
        assert!(!cli.quiet);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_serve_dry_run() {
        let cli = Cli::try_parse_from(["reportflow", "serve", "--dry-run"]).unwrap();
        match cli.command {
            Some(Commands::Serve { dry_run }) => assert!(dry_run),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_migrate_rollback() {
        let cli = Cli::try_parse_from(["reportflow", "migrate", "--rollback", "2"]).unwrap();
        match cli.command {
            Some(Commands::Migrate { dry_run, rollback }) => {
                assert!(!dry_run);
                assert_eq!(rollback, Some(2));
            }
            _ => panic!("Expected Migrate command"),
        }
    }

    #[test]
    fn test_migrate_conflicting_flags() {
        let result = Cli::try_parse_from(["reportflow", "migrate", "--dry-run", "--rollback", "1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_conflicting_verbose_quiet() {
        let result = Cli::try_parse_from(["reportflow", "--verbose", "--quiet"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ArgumentConflict
        );
    }
}
