use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::security::{Permission, PermissionResource, Resource, Role};

fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, AppError> {
    let raw: String = row.try_get(column).map_err(|e| AppError::internal(format!("missing {}: {}", column, e)))?;
    Uuid::parse_str(&raw).map_err(|e| AppError::internal(format!("invalid uuid in {}: {}", column, e)))
}

fn parse_name(row: &SqliteRow, column: &str) -> Result<String, AppError> {
    row.try_get(column).map_err(|e| AppError::internal(format!("missing {}: {}", column, e)))
}

/// Expects `id, name`.
pub fn permission_from_row(row: &SqliteRow) -> Result<Permission, AppError> {
    Ok(Permission { id: parse_uuid(row, "id")?, name: parse_name(row, "name")? })
}

/// Expects `id, name`.
pub fn resource_from_row(row: &SqliteRow) -> Result<Resource, AppError> {
    Ok(Resource { id: parse_uuid(row, "id")?, name: parse_name(row, "name")? })
}

/// Expects `id, name`.
pub fn role_from_row(row: &SqliteRow) -> Result<Role, AppError> {
    Ok(Role { id: parse_uuid(row, "id")?, name: parse_name(row, "name")? })
}

/// Expects the columns selected by [`PERMISSION_RESOURCE_COLUMNS`].
pub fn permission_resource_from_row(row: &SqliteRow) -> Result<PermissionResource, AppError> {
    Ok(PermissionResource {
        id: parse_uuid(row, "pr_id")?,
        permission: Permission {
            id: parse_uuid(row, "permission_id")?,
            name: parse_name(row, "permission_name")?,
        },
        resource: Resource {
            id: parse_uuid(row, "resource_id")?,
            name: parse_name(row, "resource_name")?,
        },
    })
}

pub const PERMISSION_RESOURCE_COLUMNS: &str = "pr.id AS pr_id, p.id AS permission_id, p.name AS permission_name, v.id AS resource_id, v.name AS resource_name";

pub const PERMISSION_RESOURCE_JOIN: &str = "FROM permission_resource pr JOIN permission p ON p.id = pr.permission_id JOIN resource v ON v.id = pr.resource_id";
