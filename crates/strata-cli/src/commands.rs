//! Subcommand handlers.

use crate::error::CliError;
use crate::{Args, Command};
use std::io::Write;
use std::sync::Arc;
use strata_core::migration::MigrationStatus;
use strata_core::{Migrator, MigratorConfig, RollbackScope, RunReport};
use strata_store::{SledStore, StoreConfig};
use tracing::{debug, info};

/// Run the selected command, writing its report to `out`.
pub fn execute(args: &Args, out: &mut impl Write) -> Result<(), CliError> {
    let config = migrator_config(args);
    debug!(
        data_dir = %args.data_dir.display(),
        migration_folder = %config.migration_dir.display(),
        ledger = %config.ledger_collection,
        force = config.force,
        rollback_scope = %config.rollback_scope,
        dry_run = config.dry_run,
        "configuration"
    );

    if !config.migration_dir.is_dir() {
        return Err(CliError::MissingFolder(config.migration_dir));
    }

    let store = SledStore::open(StoreConfig::new(&args.data_dir)).map_err(|source| {
        CliError::Store {
            path: args.data_dir.clone(),
            source,
        }
    })?;
    let store = Arc::new(store);
    let migrator = Migrator::new(store.clone(), config);

    match args.command.unwrap_or(Command::Migrate) {
        Command::Migrate => {
            let result = migrator.run();
            store.flush().map_err(|source| CliError::Store {
                path: args.data_dir.clone(),
                source,
            })?;
            let report = result?;
            write_report(out, &report)?;
        }
        Command::Status => {
            for entry in migrator.status()? {
                match &entry.status {
                    MigrationStatus::Applied { applied_at }
                    | MigrationStatus::Modified { applied_at, .. } => writeln!(
                        out,
                        "{:<10} {}  {}",
                        entry.status,
                        entry.id,
                        applied_at.to_rfc3339()
                    )?,
                    MigrationStatus::Pending => {
                        writeln!(out, "{:<10} {}", entry.status, entry.id)?
                    }
                }
            }
        }
        Command::Plan => {
            let plan = migrator.plan()?;
            if plan.pending.is_empty() {
                writeln!(out, "Nothing to apply.")?;
            }
            for pending in &plan.pending {
                writeln!(
                    out,
                    "{} ({} operations) {}",
                    pending.id,
                    pending.migration.up.len(),
                    pending.migration.description
                )?;
            }
            for id in &plan.modified {
                writeln!(out, "warning: {} changed after it was applied", id)?;
            }
        }
    }

    Ok(())
}

fn migrator_config(args: &Args) -> MigratorConfig {
    let scope = if args.auto_rollback {
        RollbackScope::Batch
    } else {
        RollbackScope::PerMigration
    };

    MigratorConfig::new(&args.migration_folder)
        .with_ledger_collection(args.migration_collection.clone())
        .with_force(args.force)
        .with_rollback_scope(scope)
        .with_dry_run(args.dry_run)
}

fn write_report(out: &mut impl Write, report: &RunReport) -> Result<(), CliError> {
    if report.dry_run {
        writeln!(out, "Dry run: {} migration(s) would be applied", report.pending.len())?;
        for id in &report.pending {
            writeln!(out, "  {}", id)?;
        }
        return Ok(());
    }

    info!(
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        operations = report.operations_applied,
        "migrations finished"
    );
    if report.applied.is_empty() {
        writeln!(out, "Database is up to date ({} already applied)", report.skipped.len())?;
    } else {
        writeln!(
            out,
            "Applied {} migration(s), {} operation(s)",
            report.applied.len(),
            report.operations_applied
        )?;
        for id in &report.applied {
            writeln!(out, "  {}", id)?;
        }
    }
    Ok(())
}
