//! Registration table for protected resources, menus and side groups.
//!
//! A [`Registry`] is built once at startup and passed explicitly to the
//! reconciliation engine, the access guard and the HTTP layer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::authz::PERMISSION_PREFIX;
use crate::errors::{AppError, AppResult};

pub mod menu;

pub use menu::{Menu, MenuEntry, MenuItem, MenuLink, Side, SideEntry, SideGroup};

/// Resource protecting the administrative HTTP surface.
pub const SECURITY_API: &str = "SecurityApi";

/// Static declaration of a protected resource and its operations.
///
/// `operations` maps an operation to its permission name without the
/// [`PERMISSION_PREFIX`]; several operations may share one permission.
/// `previous_operations` records the permission an operation used before it was
/// renamed or aggregated, so grants can be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    name: String,
    #[serde(default)]
    previous_name: Option<String>,
    #[serde(default)]
    operations: BTreeMap<String, String>,
    #[serde(default)]
    previous_operations: BTreeMap<String, String>,
    #[serde(default)]
    base_permissions: Option<BTreeSet<String>>,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            previous_name: None,
            operations: BTreeMap::new(),
            previous_operations: BTreeMap::new(),
            base_permissions: None,
        }
    }

    pub fn previous_name(mut self, name: impl Into<String>) -> Self {
        self.previous_name = Some(name.into());
        self
    }

    /// Protects `operation` with a permission of the same name.
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        let operation = operation.into();
        self.operations.insert(operation.clone(), operation);
        self
    }

    pub fn operation_with_permission(
        mut self,
        operation: impl Into<String>,
        permission: impl Into<String>,
    ) -> Self {
        self.operations.insert(operation.into(), permission.into());
        self
    }

    pub fn previous_permission(
        mut self,
        operation: impl Into<String>,
        permission: impl Into<String>,
    ) -> Self {
        self.previous_operations.insert(operation.into(), permission.into());
        self
    }

    /// Restricts the required set to these (already prefixed) permission names.
    pub fn base_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_permissions = Some(permissions.into_iter().map(Into::into).collect());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name the resource was persisted under before the current registration.
    pub fn old_name(&self) -> &str {
        self.previous_name.as_deref().unwrap_or(&self.name)
    }

    pub fn resource_renamed(&self) -> bool {
        self.previous_name.as_deref().is_some_and(|previous| previous != self.name)
    }

    pub fn has_previous_permissions(&self) -> bool {
        self.operations
            .keys()
            .any(|operation| self.previous_operations.contains_key(operation))
    }

    pub fn has_operation(&self, operation: &str) -> bool {
        self.operations.contains_key(operation)
    }

    /// Prefixed permission checked for `operation`: the declared permission when the
    /// operation has one, the operation's own name otherwise.
    pub fn permission_for(&self, operation: &str) -> String {
        let name = self.operations.get(operation).map(String::as_str).unwrap_or(operation);
        format!("{PERMISSION_PREFIX}{name}")
    }

    /// Prefixed permissions a role needs to use every operation on this resource.
    pub fn required_permissions(&self) -> BTreeSet<String> {
        match &self.base_permissions {
            Some(explicit) => explicit.clone(),
            None => self
                .operations
                .values()
                .map(|permission| format!("{PERMISSION_PREFIX}{permission}"))
                .collect(),
        }
    }

    /// `(old, current)` prefixed permission pairs, one per operation whose current
    /// permission is required. An operation's old permission is its recorded previous
    /// permission, or its current one when the whole resource was renamed.
    pub fn permission_transitions(&self) -> BTreeSet<(String, String)> {
        let required = self.required_permissions();
        let renamed = self.resource_renamed();
        let mut transitions = BTreeSet::new();
        for (operation, permission) in &self.operations {
            let current = format!("{PERMISSION_PREFIX}{permission}");
            if !required.contains(&current) {
                continue;
            }
            let old = match self.previous_operations.get(operation) {
                Some(old) => format!("{PERMISSION_PREFIX}{old}"),
                None if renamed => current.clone(),
                None => continue,
            };
            transitions.insert((old, current));
        }
        transitions
    }
}

/// Descriptor for the built-in security administration API.
pub fn security_api_descriptor() -> ResourceDescriptor {
    ResourceDescriptor::new(SECURITY_API)
        .operation_with_permission("list_roles", "read")
        .operation_with_permission("role_grants", "read")
        .operation_with_permission("create_role", "edit")
        .operation_with_permission("delete_role", "edit")
        .operation_with_permission("grant", "edit")
        .operation_with_permission("revoke", "edit")
        .operation_with_permission("converge", "converge")
        .operation_with_permission("cleanup", "converge")
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    descriptors: BTreeMap<String, ResourceDescriptor>,
    menu: Menu,
    side: Side,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor under its current name. A second registration of the
    /// same name is ignored and reported with `false`.
    pub fn register(&mut self, descriptor: ResourceDescriptor) -> bool {
        if self.descriptors.contains_key(descriptor.name()) {
            tracing::warn!("Resource already exists {} ignoring", descriptor.name());
            return false;
        }
        tracing::info!("Registering resource {}", descriptor.name());
        self.descriptors.insert(descriptor.name().to_string(), descriptor);
        true
    }

    /// Registers a descriptor and links it from the menu.
    pub fn add_view(&mut self, descriptor: ResourceDescriptor, link: MenuLink) -> AppResult<()> {
        self.register(descriptor);
        self.menu.add_link(link)
    }

    pub fn add_side_group(&mut self, name: &str, href: &str, label: &str, items: &[&str]) {
        self.side.add_group(name, href, label);
        for item in items {
            self.side.add_to_group(name, item);
        }
    }

    pub fn descriptor(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.descriptors.get(name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.descriptors.values()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    pub fn menu(&self) -> &Menu {
        &self.menu
    }

    pub fn menu_mut(&mut self) -> &mut Menu {
        &mut self.menu
    }

    pub fn side(&self) -> &Side {
        &self.side
    }

    /// Every name navigation structures refer to: menu entries, categories and side groups.
    pub fn referenced_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.menu.flat_names().into_iter().collect();
        names.extend(self.side.names());
        names
    }

    /// Loads the registration table from `path` when given, then registers the
    /// security API descriptor.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut registry = match path {
            Some(path) => Self::from_json_path(path)?,
            None => Self::new(),
        };
        registry.register(security_api_descriptor());
        Ok(registry)
    }

    pub fn from_json_str(raw: &str) -> AppResult<Self> {
        let file: RegistryFile = serde_json::from_str(raw)
            .map_err(|err| AppError::configuration(format!("invalid registry: {err}")))?;
        file.into_registry()
    }

    pub fn from_json_path(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AppError::configuration(format!("failed to read registry {}: {err}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    resources: Vec<ResourceDescriptor>,
    #[serde(default)]
    menu: Vec<MenuDeclaration>,
    #[serde(default)]
    side: Vec<SideDeclaration>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum MenuDeclaration {
    Category {
        name: String,
        #[serde(default)]
        icon: String,
        #[serde(default)]
        label: String,
        #[serde(default)]
        parent_category: String,
    },
    Link(MenuLink),
    Separator {
        category: String,
    },
}

#[derive(Debug, Deserialize)]
struct SideDeclaration {
    name: String,
    #[serde(default)]
    href: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    items: Vec<String>,
}

impl RegistryFile {
    fn into_registry(self) -> AppResult<Registry> {
        let mut registry = Registry::new();
        for descriptor in self.resources {
            registry.register(descriptor);
        }
        for declaration in self.menu {
            match declaration {
                MenuDeclaration::Category { name, icon, label, parent_category } => {
                    registry.menu.add_category(&name, &icon, &label, &parent_category)?
                }
                MenuDeclaration::Link(link) => registry.menu.add_link(link)?,
                MenuDeclaration::Separator { category } => registry.menu.add_separator(&category)?,
            }
        }
        for group in self.side {
            let items: Vec<&str> = group.items.iter().map(String::as_str).collect();
            registry.add_side_group(&group.name, &group.href, &group.label, &items);
        }
        Ok(registry)
    }
}
