use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::{Loggable, Severity};

// =============================================================================
// PERMISSION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    #[schema(example = "can_edit")]
    pub name: String,
}

impl Loggable for Permission {
    fn entity_type() -> &'static str { "permission" }
    fn subject(&self) -> String { self.name.clone() }
}

// =============================================================================
// RESOURCE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Resource {
    pub id: Uuid,
    #[schema(example = "InvoiceView")]
    pub name: String,
}

impl Loggable for Resource {
    fn entity_type() -> &'static str { "resource" }
    fn subject(&self) -> String { self.name.clone() }
}

// =============================================================================
// PERMISSION ON RESOURCE (the grantable unit)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PermissionResource {
    pub id: Uuid,
    pub permission: Permission,
    pub resource: Resource,
}

impl PermissionResource {
    pub fn key(&self) -> PvmKey {
        PvmKey::new(&self.resource.name, &self.permission.name)
    }
}

impl fmt::Display for PermissionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.permission.name.replace('_', " "), self.resource.name)
    }
}

impl Loggable for PermissionResource {
    fn entity_type() -> &'static str { "permission_resource" }
    fn subject(&self) -> String { self.key().to_string() }
}

/// Name-level identity of a permission/resource pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct PvmKey {
    #[schema(example = "InvoiceView")]
    pub resource: String,
    #[schema(example = "can_edit")]
    pub permission: String,
}

impl PvmKey {
    pub fn new(resource: impl Into<String>, permission: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            permission: permission.into(),
        }
    }
}

impl fmt::Display for PvmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.permission)
    }
}

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    #[schema(example = "Viewer")]
    pub name: String,
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject(&self) -> String { self.name.clone() }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "Viewer")]
    pub name: String,
}

// =============================================================================
// ROLE GRANT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleGrant {
    pub role: String,
    pub resource: String,
    pub permission: String,
}

impl RoleGrant {
    pub fn new(role: &Role, pvm: &PermissionResource) -> Self {
        Self {
            role: role.name.clone(),
            resource: pvm.resource.name.clone(),
            permission: pvm.permission.name.clone(),
        }
    }
}

impl Loggable for RoleGrant {
    fn entity_type() -> &'static str { "role_grant" }
    fn subject(&self) -> String { format!("{}:{}.{}", self.role, self.resource, self.permission) }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantRequest {
    #[schema(example = "can_edit")]
    pub permission: String,
    #[schema(example = "InvoiceView")]
    pub resource: String,
}
