//! Store primitives over the security graph.
//!
//! Every write runs in its own transaction: committed on success, rolled back and
//! reported as [`AppError::StoreWriteFailed`] on failure. Creation is find-or-create
//! and idempotent. Deletes check referential safety explicitly before touching a row
//! and refuse with [`AppError::ReferentialConflict`] while anything still points at
//! the target.

use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use uuid::Uuid;

use crate::db::row_parsers::{
    permission_from_row, permission_resource_from_row, resource_from_row, role_from_row,
    PERMISSION_RESOURCE_COLUMNS, PERMISSION_RESOURCE_JOIN,
};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, EventBus, Loggable};
use crate::models::security::{Permission, PermissionResource, Resource, Role, RoleGrant};

#[derive(Clone)]
pub struct SecurityStore {
    pool: SqlitePool,
    events: Option<EventBus>,
}

type RowParser<T> = fn(&SqliteRow) -> AppResult<T>;

impl SecurityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, events: None }
    }

    /// Publish every successful write on the audit bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // ROLES
    // =========================================================================

    pub async fn find_role(&self, name: &str) -> AppResult<Option<Role>> {
        self.find_named("role", name, role_from_row).await
    }

    pub async fn add_role(&self, name: &str) -> AppResult<Role> {
        let (role, created) = self.insert_named("role", "Add Role", name, role_from_row).await?;
        if created {
            tracing::info!(role = %role.name, "Inserted Role");
            self.record("created", &role);
        }
        Ok(role)
    }

    pub async fn list_roles(&self) -> AppResult<Vec<Role>> {
        self.list_named("role", role_from_row).await
    }

    /// Deletes the role together with its own grant rows.
    pub async fn delete_role(&self, name: &str) -> AppResult<()> {
        let role = self
            .find_role(name)
            .await?
            .ok_or_else(|| AppError::not_found(format!("role {name} does not exist")))?;

        let mut tx = self.begin("Delete Role").await?;
        let result = delete_role_rows(&mut *tx, &role.id.to_string()).await;
        finish(tx, result, "Delete Role").await?;

        tracing::info!(role = %role.name, "Deleted Role");
        self.record("deleted", &role);
        Ok(())
    }

    // =========================================================================
    // PERMISSIONS
    // =========================================================================

    pub async fn find_permission(&self, name: &str) -> AppResult<Option<Permission>> {
        self.find_named("permission", name, permission_from_row).await
    }

    pub async fn add_permission(&self, name: &str) -> AppResult<Permission> {
        let (permission, created) = self
            .insert_named("permission", "Add Permission", name, permission_from_row)
            .await?;
        if created {
            tracing::info!(permission = %permission.name, "Created Permission");
            self.record("created", &permission);
        }
        Ok(permission)
    }

    pub async fn delete_permission(&self, name: &str) -> AppResult<()> {
        let permission = match self.find_permission(name).await? {
            Some(permission) => permission,
            None => {
                tracing::warn!("Refused to delete, permission {} does not exist", name);
                return Err(AppError::not_found(format!("permission {name} does not exist")));
            }
        };

        let pairs = self.count_pairs("permission_id", &permission.id).await?;
        if pairs > 0 {
            tracing::warn!("Refused to delete permission {}, {} permission resources exist", name, pairs);
            return Err(AppError::referential_conflict(format!(
                "permission {name} is still used by {pairs} permission resources"
            )));
        }

        self.delete_by_id("permission", "Del Permission", &permission.id).await?;
        tracing::info!(permission = %name, "Deleted Permission");
        self.record("deleted", &permission);
        Ok(())
    }

    // =========================================================================
    // RESOURCES
    // =========================================================================

    pub async fn find_resource(&self, name: &str) -> AppResult<Option<Resource>> {
        self.find_named("resource", name, resource_from_row).await
    }

    pub async fn add_resource(&self, name: &str) -> AppResult<Resource> {
        let (resource, created) = self
            .insert_named("resource", "Add Resource", name, resource_from_row)
            .await?;
        if created {
            tracing::info!(resource = %resource.name, "Created Resource");
            self.record("created", &resource);
        }
        Ok(resource)
    }

    pub async fn list_resources(&self) -> AppResult<Vec<Resource>> {
        self.list_named("resource", resource_from_row).await
    }

    pub async fn delete_resource(&self, name: &str) -> AppResult<()> {
        let resource = match self.find_resource(name).await? {
            Some(resource) => resource,
            None => {
                tracing::warn!("Refused to delete, resource {} does not exist", name);
                return Err(AppError::not_found(format!("resource {name} does not exist")));
            }
        };

        let pairs = self.count_pairs("resource_id", &resource.id).await?;
        if pairs > 0 {
            tracing::warn!("Refused to delete resource {}, {} permission resources exist", name, pairs);
            return Err(AppError::referential_conflict(format!(
                "resource {name} is still used by {pairs} permission resources"
            )));
        }

        self.delete_by_id("resource", "Del Resource", &resource.id).await?;
        tracing::info!(resource = %name, "Deleted Resource");
        self.record("deleted", &resource);
        Ok(())
    }

    // =========================================================================
    // PERMISSION RESOURCES
    // =========================================================================

    pub async fn find_permission_resource(
        &self,
        permission: &str,
        resource: &str,
    ) -> AppResult<Option<PermissionResource>> {
        let sql = format!(
            "SELECT {PERMISSION_RESOURCE_COLUMNS} {PERMISSION_RESOURCE_JOIN} WHERE p.name = ? AND v.name = ?"
        );
        let row = sqlx::query(&sql)
            .bind(permission)
            .bind(resource)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(permission_resource_from_row).transpose()
    }

    /// All pairs defined on one resource, ordered by permission name.
    pub async fn permission_resources_on(&self, resource: &str) -> AppResult<Vec<PermissionResource>> {
        let sql = format!(
            "SELECT {PERMISSION_RESOURCE_COLUMNS} {PERMISSION_RESOURCE_JOIN} WHERE v.name = ? ORDER BY p.name"
        );
        let rows = sqlx::query(&sql).bind(resource).fetch_all(&self.pool).await?;
        rows.iter().map(permission_resource_from_row).collect()
    }

    /// Find-or-create the pair, creating the permission and resource first when missing.
    pub async fn add_permission_resource(
        &self,
        permission: &str,
        resource: &str,
    ) -> AppResult<PermissionResource> {
        if permission.trim().is_empty() || resource.trim().is_empty() {
            return Err(AppError::bad_request(
                "permission and resource names must not be empty",
            ));
        }

        if let Some(existing) = self.find_permission_resource(permission, resource).await? {
            return Ok(existing);
        }

        let resource_row = self.add_resource(resource).await?;
        let permission_row = self.add_permission(permission).await?;

        let mut tx = self.begin("Creation of Permission Resource").await?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO permission_resource (id, permission_id, resource_id) VALUES (?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(permission_row.id.to_string())
        .bind(resource_row.id.to_string())
        .execute(&mut *tx)
        .await;
        let created = finish(tx, result, "Creation of Permission Resource")
            .await?
            .rows_affected()
            > 0;

        let pvm = self
            .find_permission_resource(permission, resource)
            .await?
            .ok_or_else(|| {
                AppError::store_write(format!(
                    "Creation of Permission Resource: {resource}.{permission} missing after insert"
                ))
            })?;

        if created {
            tracing::info!("Created Permission Resource: {}", pvm);
            self.record("created", &pvm);
        }
        Ok(pvm)
    }

    /// Deletes the pair unless a role still holds it. With `cascade`, the permission
    /// goes too once no other pair uses it.
    pub async fn delete_permission_resource(
        &self,
        permission: &str,
        resource: &str,
        cascade: bool,
    ) -> AppResult<()> {
        let pvm = self
            .find_permission_resource(permission, resource)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!("permission resource {resource}.{permission} does not exist"))
            })?;

        let holders = self.roles_holding(&pvm).await?;
        if !holders.is_empty() {
            let names: Vec<&str> = holders.iter().map(|r| r.name.as_str()).collect();
            tracing::warn!(
                "Refused to delete permission resource, assoc with role exists {}.{} {:?}",
                resource,
                permission,
                names
            );
            return Err(AppError::referential_conflict(format!(
                "{resource}.{permission} is still granted to {}",
                names.join(", ")
            )));
        }

        self.delete_by_id("permission_resource", "Remove Permission from Resource", &pvm.id)
            .await?;
        tracing::info!("Removed Permission Resource: {} on {}", permission, resource);
        self.record("deleted", &pvm);

        if cascade && self.count_pairs("permission_id", &pvm.permission.id).await? == 0 {
            if let Err(err) = self.delete_permission(permission).await {
                tracing::warn!("cascade delete of permission {} skipped: {}", permission, err);
            }
        }
        Ok(())
    }

    // =========================================================================
    // GRANTS
    // =========================================================================

    pub async fn role_grants(&self, role: &Role) -> AppResult<Vec<PermissionResource>> {
        let sql = format!(
            "SELECT {PERMISSION_RESOURCE_COLUMNS} {PERMISSION_RESOURCE_JOIN} \
             JOIN role_permission_resource g ON g.permission_resource_id = pr.id \
             WHERE g.role_id = ? ORDER BY v.name, p.name"
        );
        let rows = sqlx::query(&sql)
            .bind(role.id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(permission_resource_from_row).collect()
    }

    pub async fn roles_holding(&self, pvm: &PermissionResource) -> AppResult<Vec<Role>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.name
            FROM role r
            INNER JOIN role_permission_resource g ON g.role_id = r.id
            WHERE g.permission_resource_id = ?
            ORDER BY r.name
            "#,
        )
        .bind(pvm.id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(role_from_row).collect()
    }

    pub async fn role_holds(&self, role: &Role, pvm: &PermissionResource) -> AppResult<bool> {
        let held: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM role_permission_resource WHERE role_id = ? AND permission_resource_id = ?",
        )
        .bind(role.id.to_string())
        .bind(pvm.id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(held > 0)
    }

    /// Idempotent grant. Returns `true` when the grant was newly added.
    pub async fn grant_to_role(&self, role: &Role, pvm: &PermissionResource) -> AppResult<bool> {
        let mut tx = self.begin("Add Permission to Role").await?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO role_permission_resource (role_id, permission_resource_id) VALUES (?, ?)",
        )
        .bind(role.id.to_string())
        .bind(pvm.id.to_string())
        .execute(&mut *tx)
        .await;
        let granted = finish(tx, result, "Add Permission to Role").await?.rows_affected() > 0;

        if granted {
            tracing::info!("Added Permission {} to role {}", pvm, role.name);
            self.record("granted", &RoleGrant::new(role, pvm));
        }
        Ok(granted)
    }

    /// Idempotent revoke. Returns `true` when a grant was removed.
    pub async fn revoke_from_role(&self, role: &Role, pvm: &PermissionResource) -> AppResult<bool> {
        let mut tx = self.begin("Remove Permission from Role").await?;
        let result = sqlx::query(
            "DELETE FROM role_permission_resource WHERE role_id = ? AND permission_resource_id = ?",
        )
        .bind(role.id.to_string())
        .bind(pvm.id.to_string())
        .execute(&mut *tx)
        .await;
        let revoked = finish(tx, result, "Remove Permission from Role").await?.rows_affected() > 0;

        if revoked {
            tracing::info!("Removed Permission {} from role {}", pvm, role.name);
            self.record("revoked", &RoleGrant::new(role, pvm));
        }
        Ok(revoked)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn record<T: Loggable>(&self, action: &str, entity: &T) {
        if let Some(bus) = &self.events {
            log_activity(bus, action, entity);
        }
    }

    async fn begin(&self, context: &str) -> AppResult<Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(|err| write_failed(context, err))
    }

    async fn find_named<T>(&self, table: &'static str, name: &str, parse: RowParser<T>) -> AppResult<Option<T>> {
        let sql = format!("SELECT id, name FROM {table} WHERE name = ?");
        let row = sqlx::query(&sql).bind(name).fetch_optional(&self.pool).await?;
        row.as_ref().map(parse).transpose()
    }

    async fn list_named<T>(&self, table: &'static str, parse: RowParser<T>) -> AppResult<Vec<T>> {
        let sql = format!("SELECT id, name FROM {table} ORDER BY name");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(parse).collect()
    }

    /// Returns the record and whether this call created it.
    async fn insert_named<T>(
        &self,
        table: &'static str,
        context: &str,
        name: &str,
        parse: RowParser<T>,
    ) -> AppResult<(T, bool)> {
        if name.trim().is_empty() {
            return Err(AppError::bad_request(format!("{table} name must not be empty")));
        }

        if let Some(existing) = self.find_named(table, name, parse).await? {
            return Ok((existing, false));
        }

        let sql = format!("INSERT OR IGNORE INTO {table} (id, name) VALUES (?, ?)");
        let mut tx = self.begin(context).await?;
        let result = sqlx::query(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(name)
            .execute(&mut *tx)
            .await;
        let created = finish(tx, result, context).await?.rows_affected() > 0;

        let record = self
            .find_named(table, name, parse)
            .await?
            .ok_or_else(|| AppError::store_write(format!("{context}: {name} missing after insert")))?;
        Ok((record, created))
    }

    async fn delete_by_id(&self, table: &'static str, context: &str, id: &Uuid) -> AppResult<()> {
        let sql = format!("DELETE FROM {table} WHERE id = ?");
        let mut tx = self.begin(context).await?;
        let result = sqlx::query(&sql).bind(id.to_string()).execute(&mut *tx).await;
        finish(tx, result, context).await?;
        Ok(())
    }

    async fn count_pairs(&self, column: &'static str, id: &Uuid) -> AppResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM permission_resource WHERE {column} = ?");
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

async fn delete_role_rows(conn: &mut SqliteConnection, role_id: &str) -> Result<SqliteQueryResult, sqlx::Error> {
    sqlx::query("DELETE FROM role_permission_resource WHERE role_id = ?")
        .bind(role_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM role WHERE id = ?")
        .bind(role_id)
        .execute(&mut *conn)
        .await
}

fn write_failed(context: &str, err: sqlx::Error) -> AppError {
    tracing::error!("{}: {}", context, err);
    AppError::store_write(format!("{context}: {err}"))
}

/// Commits on success; rolls back and reports `StoreWriteFailed` otherwise.
async fn finish<T>(
    tx: Transaction<'static, Sqlite>,
    result: Result<T, sqlx::Error>,
    context: &str,
) -> AppResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await.map_err(|err| write_failed(context, err))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!("{}: rollback failed: {}", context, rollback_err);
            }
            Err(write_failed(context, err))
        }
    }
}
