use std::path::PathBuf;

use crate::errors::AppError;

pub const DEFAULT_ADMIN_ROLE: &str = "Admin";
pub const DEFAULT_PUBLIC_ROLE: &str = "Public";

/// Security settings shared by the reconciliation engine, the evaluator and the
/// admin API.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Role that must hold every pair of every registered resource.
    pub admin_role: String,
    /// Role consulted when a request carries no principal.
    pub public_role: String,
    /// Seed permissions for registered resources and menus at startup.
    pub update_perms: bool,
    pub registry_path: Option<PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            admin_role: DEFAULT_ADMIN_ROLE.to_string(),
            public_role: DEFAULT_PUBLIC_ROLE.to_string(),
            update_perms: true,
            registry_path: None,
        }
    }
}

impl SecurityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let admin_role = non_empty_var("AUTH_ROLE_ADMIN")?.unwrap_or_else(|| DEFAULT_ADMIN_ROLE.to_string());
        let public_role = non_empty_var("AUTH_ROLE_PUBLIC")?.unwrap_or_else(|| DEFAULT_PUBLIC_ROLE.to_string());

        if admin_role == public_role {
            return Err(AppError::configuration(
                "AUTH_ROLE_ADMIN and AUTH_ROLE_PUBLIC must name different roles",
            ));
        }

        let update_perms = match non_empty_var("RBAC_UPDATE_PERMS")? {
            Some(value) => parse_bool(&value)
                .ok_or_else(|| AppError::configuration("RBAC_UPDATE_PERMS must be true or false"))?,
            None => true,
        };

        let registry_path = non_empty_var("RBAC_REGISTRY_PATH")?.map(PathBuf::from);

        Ok(Self {
            admin_role,
            public_role,
            update_perms,
            registry_path,
        })
    }

    /// Roles that can never be deleted through the admin surface.
    pub fn is_builtin_role(&self, name: &str) -> bool {
        name == self.admin_role || name == self.public_role
    }
}

fn non_empty_var(key: &str) -> Result<Option<String>, AppError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(AppError::configuration(format!("{key} is not valid unicode")))
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
