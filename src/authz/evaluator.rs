use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::principal::Principal;
use super::MENU_ACCESS;
use crate::errors::AppResult;
use crate::models::security::PvmKey;
use crate::registry::{MenuEntry, Registry, SideEntry};

const GRANT_JOIN: &str = "FROM role_permission_resource g \
     JOIN role r ON r.id = g.role_id \
     JOIN permission_resource pr ON pr.id = g.permission_resource_id \
     JOIN permission p ON p.id = pr.permission_id \
     JOIN resource v ON v.id = pr.resource_id";

/// SQLite's default limit on bound parameters in one statement.
const MAX_BIND_PARAMS: usize = 999;

/// Read-only access queries over the role grant graph.
#[async_trait]
pub trait AccessEvaluator: Send + Sync {
    /// True iff a role of `principal` (the public role when absent) holds the pair.
    async fn has_access(
        &self,
        principal: Option<&Principal>,
        permission: &str,
        resource: &str,
    ) -> AppResult<bool>;

    /// The subset of `candidates` the principal holds `menu_access` on.
    async fn visible_menu_names(
        &self,
        principal: Option<&Principal>,
        candidates: &BTreeSet<String>,
    ) -> AppResult<BTreeSet<String>>;

    /// Every pair the principal holds, `menu_access` pairs only when `include_menus`.
    async fn permissions_for(
        &self,
        principal: Option<&Principal>,
        include_menus: bool,
    ) -> AppResult<BTreeSet<PvmKey>>;
}

/// Evaluates access with one SQL query per call.
#[derive(Clone)]
pub struct StoreAccessEvaluator {
    pool: SqlitePool,
    public_role: String,
}

impl StoreAccessEvaluator {
    pub fn new(pool: SqlitePool, public_role: impl Into<String>) -> Self {
        Self {
            pool,
            public_role: public_role.into(),
        }
    }

    /// Roles consulted for the principal. Empty means no access at all.
    fn effective_roles(&self, principal: Option<&Principal>) -> Vec<String> {
        match principal {
            Some(principal) => principal.roles.iter().cloned().collect(),
            None => vec![self.public_role.clone()],
        }
    }
}

fn placeholders(count: usize) -> String {
    std::iter::repeat("?").take(count).collect::<Vec<_>>().join(",")
}

#[async_trait]
impl AccessEvaluator for StoreAccessEvaluator {
    async fn has_access(
        &self,
        principal: Option<&Principal>,
        permission: &str,
        resource: &str,
    ) -> AppResult<bool> {
        let roles = self.effective_roles(principal);
        if roles.is_empty() {
            return Ok(false);
        }

        let sql = format!(
            "SELECT EXISTS(SELECT 1 {GRANT_JOIN} WHERE p.name = ? AND v.name = ? AND r.name IN ({}))",
            placeholders(roles.len())
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(permission).bind(resource);
        for role in &roles {
            query = query.bind(role);
        }

        let found = query.fetch_one(&self.pool).await? != 0;
        tracing::debug!(?roles, permission, resource, found, "access evaluated");
        Ok(found)
    }

    /// One query per batch of candidates; large menus are split to stay under the
    /// bind limit.
    async fn visible_menu_names(
        &self,
        principal: Option<&Principal>,
        candidates: &BTreeSet<String>,
    ) -> AppResult<BTreeSet<String>> {
        let roles = self.effective_roles(principal);
        if roles.is_empty() || candidates.is_empty() {
            return Ok(BTreeSet::new());
        }

        let per_query = MAX_BIND_PARAMS.saturating_sub(roles.len() + 1).max(1);
        let candidates: Vec<&String> = candidates.iter().collect();
        let mut visible = BTreeSet::new();

        for chunk in candidates.chunks(per_query) {
            let sql = format!(
                "SELECT DISTINCT v.name {GRANT_JOIN} WHERE p.name = ? AND r.name IN ({}) AND v.name IN ({})",
                placeholders(roles.len()),
                placeholders(chunk.len())
            );
            let mut query = sqlx::query_scalar::<_, String>(&sql).bind(MENU_ACCESS);
            for role in &roles {
                query = query.bind(role);
            }
            for name in chunk {
                query = query.bind(*name);
            }
            visible.extend(query.fetch_all(&self.pool).await?);
        }

        tracing::debug!(?roles, visible = visible.len(), "menu visibility evaluated");
        Ok(visible)
    }

    async fn permissions_for(
        &self,
        principal: Option<&Principal>,
        include_menus: bool,
    ) -> AppResult<BTreeSet<PvmKey>> {
        let roles = self.effective_roles(principal);
        if roles.is_empty() {
            return Ok(BTreeSet::new());
        }

        let menu_filter = if include_menus { "" } else { " AND p.name <> ?" };
        let sql = format!(
            "SELECT DISTINCT v.name, p.name {GRANT_JOIN} WHERE r.name IN ({}){menu_filter}",
            placeholders(roles.len())
        );
        let mut query = sqlx::query_as::<_, (String, String)>(&sql);
        for role in &roles {
            query = query.bind(role);
        }
        if !include_menus {
            query = query.bind(MENU_ACCESS);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(resource, permission)| PvmKey::new(resource, permission))
            .collect())
    }
}

/// The registry's menu as visible to `principal`.
pub async fn render_menu(
    evaluator: &dyn AccessEvaluator,
    registry: &Registry,
    principal: Option<&Principal>,
) -> AppResult<Vec<MenuEntry>> {
    let candidates = registry.referenced_names();
    let visible = evaluator.visible_menu_names(principal, &candidates).await?;
    Ok(registry.menu().filter(&visible))
}

/// The registry's side groups as visible to `principal`.
pub async fn render_side(
    evaluator: &dyn AccessEvaluator,
    registry: &Registry,
    principal: Option<&Principal>,
) -> AppResult<Vec<SideEntry>> {
    let candidates = registry.referenced_names();
    let visible = evaluator.visible_menu_names(principal, &candidates).await?;
    Ok(registry.side().render(registry.menu(), &visible))
}
