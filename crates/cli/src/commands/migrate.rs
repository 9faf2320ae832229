use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use quarry_migrate::backends::redact_url;
use quarry_migrate::{connect, DatabasePool, MigrationRegistry, MigrationRunner, MigrationSettings, MigrationState};
use tracing::info;

/// Open the database and build a runner over the migrations directory
async fn open_runner(settings: &MigrationSettings) -> Result<(MigrationRunner, Arc<dyn DatabasePool>)> {
    let registry = MigrationRegistry::from_dir(&settings.migrations_dir)
        .with_context(|| format!("Failed to load migrations from {}", settings.migrations_dir.display()))?;

    info!(
        database = %redact_url(&settings.database_url),
        migrations = registry.len(),
        "Connecting to database"
    );
    let pool = connect(&settings.database_url, settings.pool.clone())
        .await
        .context("Failed to connect to database")?;

    let runner = MigrationRunner::new(registry, Arc::clone(&pool), settings.migration_config())?;
    Ok((runner, pool))
}

pub fn create(migrations_dir: &Path, name: &str) -> Result<()> {
    let path = quarry_migrate::migrations::create_migration(migrations_dir, name)?;
    println!("Created migration: {}", path.display());
    Ok(())
}

pub async fn run(settings: &MigrationSettings) -> Result<()> {
    let (runner, pool) = open_runner(settings).await?;
    let outcome = runner.run_all().await;
    pool.close().await?;
    let result = outcome?;

    if result.applied_count == 0 {
        println!("No pending migrations");
    } else {
        println!("Applied {} migration(s):", result.applied_count);
        for version in &result.applied_migrations {
            println!("  {}", version);
        }
    }
    println!(
        "Skipped {} migration(s) in {}ms",
        result.skipped_count, result.execution_time_ms
    );
    Ok(())
}

pub async fn rollback(settings: &MigrationSettings, version: Option<&str>) -> Result<()> {
    let (runner, pool) = open_runner(settings).await?;
    let outcome = match version {
        Some(version) => runner.rollback(version).await.map(Some),
        None => runner.rollback_latest().await,
    };
    pool.close().await?;

    match outcome? {
        Some(result) if result.down_executed => println!("Rolled back migration: {}", result.version),
        Some(result) => println!(
            "Marked migration {} as rolled back (no down migration to run)",
            result.version
        ),
        None => println!("No applied migrations to roll back"),
    }
    Ok(())
}

pub async fn status(settings: &MigrationSettings, json: bool) -> Result<()> {
    let (runner, pool) = open_runner(settings).await?;
    let outcome = async {
        let records = runner.status().await?;
        let plan = runner.plan().await?;
        Ok::<_, quarry_migrate::MigrationError>((records, plan))
    }
    .await;
    pool.close().await?;
    let (records, plan) = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("Migration Status:");
    println!("================");

    if plan.is_empty() {
        println!("No migrations found");
    }
    for entry in &plan {
        let marker = match entry.state {
            MigrationState::Applied => "✅",
            MigrationState::Pending => "⏳",
            MigrationState::RolledBack => "↩️",
        };
        let since = entry
            .record
            .as_ref()
            .map(|record| format!(" ({})", record.updated_at.format("%Y-%m-%d %H:%M:%S UTC")))
            .unwrap_or_default();
        println!("  {} {} - {}{}", marker, entry.version, entry.name, since);
    }

    let orphans: Vec<_> = records
        .iter()
        .filter(|record| !runner.registry().contains(&record.version))
        .collect();
    if !orphans.is_empty() {
        println!("\nRecorded but missing from {}:", settings.migrations_dir.display());
        for record in orphans {
            println!("  ❓ {} - {}", record.version, record.name);
        }
    }

    println!("\n✅ = Applied, ⏳ = Pending, ↩️ = Rolled back");
    Ok(())
}
