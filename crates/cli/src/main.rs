mod commands;
mod logging;

use std::env;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::migrate;
use logging::LoggingConfig;
use quarry_migrate::MigrationSettings;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Schema migration version control")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct GlobalArgs {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Migrations directory (overrides MIGRATIONS_DIR)
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Ledger table name (overrides MIGRATIONS_TABLE)
    #[arg(long, global = true)]
    table: Option<String>,

    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Database migration management
    Migrate {
        #[command(subcommand)]
        migrate_command: MigrateCommands,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum MigrateCommands {
    /// Create a new migration
    Create {
        /// Migration name
        name: String,
    },

    /// Run pending migrations
    Run,

    /// Rollback a migration
    Rollback {
        /// Version to roll back
        #[arg(required_unless_present = "last")]
        version: Option<String>,

        /// Roll back the most recently applied migration
        #[arg(long, conflicts_with = "version")]
        last: bool,
    },

    /// Show migration status
    Status {
        /// Print ledger records as JSON
        #[arg(long)]
        json: bool,
    },
}

impl GlobalArgs {
    /// Environment settings with command line overrides applied
    fn settings(&self) -> Result<MigrationSettings> {
        let mut settings = MigrationSettings::from_lookup(|key| match (key, &self.database_url) {
            ("DATABASE_URL", Some(url)) => Some(url.clone()),
            _ => env::var(key).ok(),
        })?;

        if let Some(dir) = &self.migrations_dir {
            settings.migrations_dir = dir.clone();
        }
        if let Some(table) = &self.table {
            settings.migrations_table = table.clone();
        }

        settings.validate()?;
        Ok(settings)
    }

    fn migrations_dir(&self) -> PathBuf {
        self.migrations_dir
            .clone()
            .or_else(|| env::var("MIGRATIONS_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("migrations"))
    }

    /// Settings for commands that talk to the database, with logging started
    fn database_settings(&self) -> Result<MigrationSettings> {
        let settings = self.settings()?;
        init_logging(&self.logging(LoggingConfig::from_settings(&settings)))?;
        Ok(settings)
    }

    fn logging(&self, config: LoggingConfig) -> LoggingConfig {
        if self.verbose {
            config.with_env_filter("debug")
        } else {
            config
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let global = &cli.global;

    match cli.command {
        Commands::Migrate { migrate_command } => match migrate_command {
            MigrateCommands::Create { name } => {
                init_logging(&global.logging(LoggingConfig::from_env()))?;
                migrate::create(&global.migrations_dir(), &name)?;
            }
            MigrateCommands::Run => migrate::run(&global.database_settings()?).await?,
            MigrateCommands::Rollback { version, last } => {
                let version = if last { None } else { version };
                migrate::rollback(&global.database_settings()?, version.as_deref()).await?
            }
            MigrateCommands::Status { json } => migrate::status(&global.database_settings()?, json).await?,
        },
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    logging::init_logging(config).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
