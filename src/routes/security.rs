//! Security administration API.
//!
//! Every endpoint is guarded by an operation on the `SecurityApi` resource.
//! Role and grant changes reach the audit trail through the store.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::CurrentPrincipal;
use crate::models::security::{GrantRequest, PvmKey, Role, RoleCreateRequest, RoleGrant};
use crate::reconcile::{Cleanup, Convergence};
use crate::registry::SECURITY_API;

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:name", axum::routing::delete(delete_role))
        .route(
            "/roles/:name/grants",
            get(role_grants).post(grant).delete(revoke),
        )
        .route("/converge", post(converge))
        .route("/cleanup", post(cleanup))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConvergeQuery {
    /// Compute the plan without applying it.
    #[serde(default)]
    pub dry: bool,
}

async fn role_named(state: &AppState, name: &str) -> AppResult<Role> {
    state
        .store
        .find_role(name)
        .await?
        .ok_or_else(|| AppError::not_found(format!("role {name} does not exist")))
}

// =============================================================================
// ROLES
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/security/roles",
    tag = "Security",
    responses(
        (status = 200, description = "List of roles", body = Vec<Role>),
        (status = 403, description = "Missing can_read on SecurityApi")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> AppResult<Json<Vec<Role>>> {
    state.guard.require(principal.as_ref(), SECURITY_API, "list_roles").await?;
    Ok(Json(state.store.list_roles().await?))
}

#[utoipa::path(
    post,
    path = "/api/security/roles",
    tag = "Security",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created or already present", body = Role),
        (status = 400, description = "Empty role name")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(payload): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    state.guard.require(principal.as_ref(), SECURITY_API, "create_role").await?;
    let role = state.store.add_role(payload.name.trim()).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    delete,
    path = "/api/security/roles/{name}",
    tag = "Security",
    params(("name" = String, Path, description = "Role name")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 400, description = "Admin and public roles cannot be deleted"),
        (status = 404, description = "Role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(name): Path<String>,
) -> AppResult<StatusCode> {
    state.guard.require(principal.as_ref(), SECURITY_API, "delete_role").await?;
    if state.security.is_builtin_role(&name) {
        return Err(AppError::bad_request(format!("role {name} is built in")));
    }
    state.store.delete_role(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// GRANTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/security/roles/{name}/grants",
    tag = "Security",
    params(("name" = String, Path, description = "Role name")),
    responses(
        (status = 200, description = "Pairs granted to the role", body = Vec<PvmKey>),
        (status = 404, description = "Role not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn role_grants(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(name): Path<String>,
) -> AppResult<Json<Vec<PvmKey>>> {
    state.guard.require(principal.as_ref(), SECURITY_API, "role_grants").await?;
    let role = role_named(&state, &name).await?;
    let grants = state.store.role_grants(&role).await?;
    Ok(Json(grants.iter().map(|pvm| pvm.key()).collect()))
}

#[utoipa::path(
    post,
    path = "/api/security/roles/{name}/grants",
    tag = "Security",
    params(("name" = String, Path, description = "Role name")),
    request_body = GrantRequest,
    responses(
        (status = 201, description = "Grant recorded", body = RoleGrant),
        (status = 404, description = "Role or permission resource not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn grant(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(name): Path<String>,
    Json(payload): Json<GrantRequest>,
) -> AppResult<(StatusCode, Json<RoleGrant>)> {
    state.guard.require(principal.as_ref(), SECURITY_API, "grant").await?;
    let role = role_named(&state, &name).await?;
    let pvm = state
        .store
        .find_permission_resource(&payload.permission, &payload.resource)
        .await?
        .ok_or_else(|| {
            AppError::not_found(format!(
                "permission resource {}.{} does not exist",
                payload.resource, payload.permission
            ))
        })?;

    state.store.grant_to_role(&role, &pvm).await?;
    Ok((StatusCode::CREATED, Json(RoleGrant::new(&role, &pvm))))
}

#[utoipa::path(
    delete,
    path = "/api/security/roles/{name}/grants",
    tag = "Security",
    params(("name" = String, Path, description = "Role name")),
    request_body = GrantRequest,
    responses(
        (status = 204, description = "Grant removed or never present"),
        (status = 404, description = "Role or permission resource not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(name): Path<String>,
    Json(payload): Json<GrantRequest>,
) -> AppResult<StatusCode> {
    state.guard.require(principal.as_ref(), SECURITY_API, "revoke").await?;
    let role = role_named(&state, &name).await?;
    let pvm = state
        .store
        .find_permission_resource(&payload.permission, &payload.resource)
        .await?
        .ok_or_else(|| {
            AppError::not_found(format!(
                "permission resource {}.{} does not exist",
                payload.resource, payload.permission
            ))
        })?;

    state.store.revoke_from_role(&role, &pvm).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// RECONCILIATION
// =============================================================================

#[utoipa::path(
    post,
    path = "/api/security/converge",
    tag = "Security",
    params(ConvergeQuery),
    responses((status = 200, description = "Transition plan and apply report")),
    security(("bearerAuth" = []))
)]
pub async fn converge(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Query(query): Query<ConvergeQuery>,
) -> AppResult<Json<Convergence>> {
    state.guard.require(principal.as_ref(), SECURITY_API, "converge").await?;
    let _running = state.reconcile_lock.lock().await;
    let convergence = state.reconciler.converge(&state.registry, query.dry).await?;
    Ok(Json(convergence))
}

#[utoipa::path(
    post,
    path = "/api/security/cleanup",
    tag = "Security",
    responses((status = 200, description = "Removed orphans and the final convergence")),
    security(("bearerAuth" = []))
)]
pub async fn cleanup(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> AppResult<Json<Cleanup>> {
    state.guard.require(principal.as_ref(), SECURITY_API, "cleanup").await?;
    let _running = state.reconcile_lock.lock().await;
    let cleanup = state.reconciler.cleanup(&state.registry).await?;
    Ok(Json(cleanup))
}
