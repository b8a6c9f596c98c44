//! Reconciliation engine.
//!
//! Seeds the grant graph from the registry and migrates role grants when resources
//! or permissions are renamed. Every sub-operation is isolated: a refusal is
//! counted as skipped, a failure is logged and listed, and the pass carries on.
//! Re-running a pass converges to the same end state.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::authz::MENU_ACCESS;
use crate::config::SecurityConfig;
use crate::errors::{AppError, AppResult};
use crate::models::security::{PermissionResource, PvmKey, Role};
use crate::registry::{Registry, ResourceDescriptor};
use crate::store::SecurityStore;

pub mod plan;

pub use plan::{build_plan, Plan};

/// Counts of what an apply, seed or cleanup pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub grants_added: usize,
    pub grants_revoked: usize,
    pub records_deleted: usize,
    /// Deletes refused by referential safety or aimed at missing records.
    pub skipped: usize,
    pub failures: Vec<String>,
}

impl ApplyReport {
    pub fn merge(&mut self, other: ApplyReport) {
        self.grants_added += other.grants_added;
        self.grants_revoked += other.grants_revoked;
        self.records_deleted += other.records_deleted;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn settle<T>(&mut self, context: &str, result: AppResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) if err.is_refusal() => {
                tracing::warn!("{}: {}", context, err);
                self.skipped += 1;
                None
            }
            Err(err) => {
                tracing::error!("{}: {}", context, err);
                self.failures.push(format!("{context}: {err}"));
                None
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Convergence {
    pub dry: bool,
    pub plan: Plan,
    pub report: ApplyReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct Cleanup {
    /// Resources removed by the orphan sweep.
    pub orphans: Vec<String>,
    /// Final convergence; its report includes the sweep.
    pub convergence: Convergence,
}

#[derive(Clone)]
pub struct Reconciler {
    store: SecurityStore,
    config: SecurityConfig,
}

impl Reconciler {
    pub fn new(store: SecurityStore, config: SecurityConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &SecurityStore {
        &self.store
    }

    /// Find-or-create the admin and public roles.
    pub async fn bootstrap(&self) -> AppResult<(Role, Role)> {
        let admin = self
            .store
            .add_role(&self.config.admin_role)
            .await
            .map_err(|err| AppError::backend_unavailable(format!("admin role: {err}")))?;
        let public = self
            .store
            .add_role(&self.config.public_role)
            .await
            .map_err(|err| AppError::backend_unavailable(format!("public role: {err}")))?;
        tracing::info!(admin = %admin.name, public = %public.name, "security roles ready");
        Ok((admin, public))
    }

    async fn admin_role(&self) -> AppResult<Role> {
        self.store.add_role(&self.config.admin_role).await
    }

    /// Seeds permissions for every descriptor and menu access for every menu name.
    pub async fn sync_registry(&self, registry: &Registry) -> AppResult<ApplyReport> {
        let admin = self.admin_role().await?;
        let pending: BTreeSet<PvmKey> = build_plan(registry).add.into_keys().collect();
        let mut report = ApplyReport::default();

        for descriptor in registry.descriptors() {
            self.seed_descriptor(&admin, descriptor, &pending, &mut report).await;
        }
        for name in registry.referenced_names() {
            self.seed_menu(&admin, &name, &mut report).await;
        }

        tracing::info!(
            added = report.grants_added,
            deleted = report.records_deleted,
            failures = report.failures.len(),
            "registry synced"
        );
        Ok(report)
    }

    /// Creates the descriptor's required pairs, grants them to admin, and drops pairs
    /// whose permission is no longer required. Pairs in `pending` are still waiting
    /// to be migrated by a convergence and are left alone.
    pub async fn seed_descriptor(
        &self,
        admin: &Role,
        descriptor: &ResourceDescriptor,
        pending: &BTreeSet<PvmKey>,
        report: &mut ApplyReport,
    ) {
        let name = descriptor.name();
        let context = format!("Seeding {name}");

        if report.settle(&context, self.store.add_resource(name).await).is_none() {
            return;
        }
        let Some(existing) = report.settle(&context, self.store.permission_resources_on(name).await)
        else {
            return;
        };

        let required = descriptor.required_permissions();
        for permission in &required {
            let pvm = match existing.iter().find(|pvm| &pvm.permission.name == permission) {
                Some(pvm) => Some(pvm.clone()),
                None => report.settle(
                    &context,
                    self.store.add_permission_resource(permission, name).await,
                ),
            };
            if let Some(pvm) = pvm {
                self.grant(admin, &pvm, report).await;
            }
        }

        for pvm in existing {
            if required.contains(&pvm.permission.name)
                || pvm.permission.name == MENU_ACCESS
                || pending.contains(&pvm.key())
            {
                continue;
            }
            self.remove_pair(&pvm, true, report).await;
        }
    }

    /// Creates the `menu_access` pair for a menu or side name and grants it to admin.
    pub async fn seed_menu(&self, admin: &Role, name: &str, report: &mut ApplyReport) {
        let context = format!("Seeding menu {name}");
        if let Some(pvm) = report.settle(
            &context,
            self.store.add_permission_resource(MENU_ACCESS, name).await,
        ) {
            self.grant(admin, &pvm, report).await;
        }
    }

    /// Builds the transition plan and, unless `dry`, applies it and tops up admin.
    pub async fn converge(&self, registry: &Registry, dry: bool) -> AppResult<Convergence> {
        let plan = build_plan(registry);
        tracing::debug!(?plan, dry, "state transition plan");

        if dry {
            return Ok(Convergence {
                dry,
                plan,
                report: ApplyReport::default(),
            });
        }

        let mut report = self.apply(&plan).await?;
        self.top_up_admin(registry, &mut report).await?;

        tracing::info!(
            added = report.grants_added,
            revoked = report.grants_revoked,
            deleted = report.records_deleted,
            skipped = report.skipped,
            failures = report.failures.len(),
            "converge finished"
        );
        Ok(Convergence { dry, plan, report })
    }

    async fn apply(&self, plan: &Plan) -> AppResult<ApplyReport> {
        let mut report = ApplyReport::default();

        for role in self.store.list_roles().await? {
            let context = format!("Migrating grants of {}", role.name);
            let Some(grants) = report.settle(&context, self.store.role_grants(&role).await) else {
                continue;
            };

            for pvm in grants {
                let key = pvm.key();
                let Some(targets) = plan.add.get(&key) else {
                    continue;
                };
                for target in targets {
                    let created = self
                        .store
                        .add_permission_resource(&target.permission, &target.resource)
                        .await;
                    if let Some(new_pvm) = report.settle(&context, created) {
                        self.grant(&role, &new_pvm, &mut report).await;
                    }
                }
                if plan.del_role_pvm.contains(&key) {
                    self.revoke(&role, &pvm, &mut report).await;
                }
            }
        }

        for key in &plan.del_role_pvm {
            let deleted = self
                .store
                .delete_permission_resource(&key.permission, &key.resource, false)
                .await;
            if report.settle(&format!("Deleting {key}"), deleted).is_some() {
                report.records_deleted += 1;
            }
        }
        for resource in &plan.del_resources {
            let deleted = self.store.delete_resource(resource).await;
            if report.settle(&format!("Deleting resource {resource}"), deleted).is_some() {
                report.records_deleted += 1;
            }
        }
        for permission in &plan.del_permissions {
            let deleted = self.store.delete_permission(permission).await;
            if report.settle(&format!("Deleting permission {permission}"), deleted).is_some() {
                report.records_deleted += 1;
            }
        }

        Ok(report)
    }

    /// Grants admin every required pair of every registered descriptor.
    async fn top_up_admin(&self, registry: &Registry, report: &mut ApplyReport) -> AppResult<()> {
        let admin = self.admin_role().await?;
        for descriptor in registry.descriptors() {
            for permission in descriptor.required_permissions() {
                let created = self
                    .store
                    .add_permission_resource(&permission, descriptor.name())
                    .await;
                if let Some(pvm) = report.settle("Admin top up", created) {
                    self.grant(&admin, &pvm, report).await;
                }
            }
        }
        Ok(())
    }

    /// Removes every resource neither registered nor referenced by navigation, then
    /// converges.
    pub async fn cleanup(&self, registry: &Registry) -> AppResult<Cleanup> {
        let mut keep: BTreeSet<String> = registry
            .descriptors()
            .map(|descriptor| descriptor.name().to_string())
            .collect();
        keep.extend(registry.referenced_names());

        let mut sweep = ApplyReport::default();
        let mut orphans = Vec::new();

        for resource in self.store.list_resources().await? {
            if keep.contains(&resource.name) {
                continue;
            }
            tracing::info!("Cleaning up orphaned resource {}", resource.name);
            let context = format!("Cleaning up {}", resource.name);

            let Some(pairs) = sweep.settle(&context, self.store.permission_resources_on(&resource.name).await)
            else {
                continue;
            };
            for pvm in &pairs {
                self.remove_pair(pvm, true, &mut sweep).await;
            }

            let deleted = self.store.delete_resource(&resource.name).await;
            if sweep.settle(&context, deleted).is_some() {
                sweep.records_deleted += 1;
                orphans.push(resource.name);
            }
        }

        let mut convergence = self.converge(registry, false).await?;
        convergence.report.merge(sweep);
        Ok(Cleanup { orphans, convergence })
    }

    /// Revokes the pair from every role, then deletes it.
    async fn remove_pair(&self, pvm: &PermissionResource, cascade: bool, report: &mut ApplyReport) {
        let context = format!("Removing {}", pvm.key());
        if let Some(holders) = report.settle(&context, self.store.roles_holding(pvm).await) {
            for role in holders {
                self.revoke(&role, pvm, report).await;
            }
        }

        let deleted = self
            .store
            .delete_permission_resource(&pvm.permission.name, &pvm.resource.name, cascade)
            .await;
        if report.settle(&context, deleted).is_some() {
            report.records_deleted += 1;
        }
    }

    async fn grant(&self, role: &Role, pvm: &PermissionResource, report: &mut ApplyReport) {
        let context = format!("Granting {} to {}", pvm.key(), role.name);
        if report.settle(&context, self.store.grant_to_role(role, pvm).await) == Some(true) {
            report.grants_added += 1;
        }
    }

    async fn revoke(&self, role: &Role, pvm: &PermissionResource, report: &mut ApplyReport) {
        let context = format!("Revoking {} from {}", pvm.key(), role.name);
        if report.settle(&context, self.store.revoke_from_role(role, pvm).await) == Some(true) {
            report.grants_revoked += 1;
        }
    }
}
