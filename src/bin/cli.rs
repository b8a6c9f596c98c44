use sqlx::Row;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;

use rbac_builder::config::SecurityConfig;
use rbac_builder::events::{init_event_bus, start_audit_listener};
use rbac_builder::reconcile::{ApplyReport, Reconciler};
use rbac_builder::registry::Registry;
use rbac_builder::store::SecurityStore;

#[derive(Parser, Debug)]
#[command(author, version, about = "rbac-builder administration tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct RegistryArgs {
    /// Registration table (JSON); defaults to RBAC_REGISTRY_PATH
    #[arg(long)]
    registry: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Seed permissions and menu access for every registered resource
    Sync(RegistryArgs),
    /// Migrate role grants across renamed resources and permissions
    Converge {
        #[command(flatten)]
        registry: RegistryArgs,
        /// Print the plan without applying it
        #[arg(long)]
        dry: bool,
    },
    /// Remove resources no longer registered or referenced, then converge
    Cleanup(RegistryArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; fall back to the crate-local `.env`.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::Sync(args) => {
            let session = prepare(&args).await?;
            let report = session.reconciler.sync_registry(&session.registry).await?;
            session.finish().await?;
            print_report("sync", &report);
        }
        Commands::Converge { registry: args, dry } => {
            let session = prepare(&args).await?;
            let convergence = session.reconciler.converge(&session.registry, dry).await?;
            session.finish().await?;
            println!("{}", serde_json::to_string_pretty(&convergence.plan)?);
            if !dry {
                print_report("converge", &convergence.report);
            }
        }
        Commands::Cleanup(args) => {
            let session = prepare(&args).await?;
            let cleanup = session.reconciler.cleanup(&session.registry).await?;
            session.finish().await?;
            for orphan in &cleanup.orphans {
                println!("removed {}", orphan);
            }
            print_report("cleanup", &cleanup.convergence.report);
        }
    }

    Ok(())
}

/// A reconciler whose store writes are audited by a background listener.
struct Session {
    reconciler: Reconciler,
    registry: Registry,
    audit: JoinHandle<()>,
}

impl Session {
    /// Closes the event bus and waits until every audit event is persisted.
    async fn finish(self) -> anyhow::Result<()> {
        // the reconciler's store holds the only sender
        drop(self.reconciler);
        self.audit.await.context("security audit listener failed")
    }
}

async fn prepare(args: &RegistryArgs) -> anyhow::Result<Session> {
    let config = SecurityConfig::from_env()?;
    let path = args.registry.clone().or_else(|| config.registry_path.clone());
    let registry = Registry::load(path.as_deref()).context("failed to load resource registry")?;

    let pool = get_pool().await?;
    let (events, audit_rx) = init_event_bus();
    let audit = tokio::spawn(start_audit_listener(audit_rx, pool.clone()));

    let reconciler = Reconciler::new(SecurityStore::new(pool).with_events(events), config);
    reconciler
        .bootstrap()
        .await
        .context("failed to bootstrap security roles")?;
    Ok(Session {
        reconciler,
        registry,
        audit,
    })
}

fn print_report(action: &str, report: &ApplyReport) {
    println!(
        "{}: {} grants added, {} revoked, {} records deleted, {} skipped",
        action, report.grants_added, report.grants_revoked, report.records_deleted, report.skipped
    );
    for failure in &report.failures {
        eprintln!("failed: {}", failure);
    }
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let db_applied = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
        .fetch_optional(pool)
        .await?;
    let applied_versions: HashSet<i64> = if db_applied.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations; fall back to the crate-local folder when CWD differs.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}
