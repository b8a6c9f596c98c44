#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};

use rbac_builder::config::SecurityConfig;
use rbac_builder::models::security::PvmKey;
use rbac_builder::reconcile::Reconciler;
use rbac_builder::store::SecurityStore;

/// Fresh migrated database. Keep the `TempDir` alive for the duration of the test.
pub async fn test_pool() -> Result<(TempDir, SqlitePool)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    Ok((dir, pool))
}

pub async fn reconciler(pool: &SqlitePool) -> Result<Reconciler> {
    let reconciler = Reconciler::new(SecurityStore::new(pool.clone()), SecurityConfig::default());
    reconciler.bootstrap().await?;
    Ok(reconciler)
}

pub async fn grants_of(store: &SecurityStore, role: &str) -> Result<BTreeSet<PvmKey>> {
    let role = store.find_role(role).await?.context("role missing")?;
    Ok(store.role_grants(&role).await?.iter().map(|pvm| pvm.key()).collect())
}

pub fn key(resource: &str, permission: &str) -> PvmKey {
    PvmKey::new(resource, permission)
}

pub async fn count(pool: &SqlitePool, table: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?)
}
