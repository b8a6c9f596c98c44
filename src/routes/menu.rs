//! Navigation and permission listings for the calling principal.

use std::collections::BTreeSet;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::app::AppState;
use crate::authz::{render_menu, render_side};
use crate::errors::AppResult;
use crate::jwt::CurrentPrincipal;
use crate::models::security::PvmKey;
use crate::registry::{MenuEntry, SideEntry};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PermissionsQuery {
    /// Include `menu_access` pairs.
    #[serde(default)]
    pub menus: bool,
}

#[utoipa::path(
    get,
    path = "/api/menu",
    tag = "Navigation",
    responses((status = 200, description = "Menu tree filtered by menu_access")),
    security(("bearerAuth" = []))
)]
pub async fn menu(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> AppResult<Json<Vec<MenuEntry>>> {
    let entries = render_menu(state.evaluator.as_ref(), &state.registry, principal.as_ref()).await?;
    Ok(Json(entries))
}

#[utoipa::path(
    get,
    path = "/api/side",
    tag = "Navigation",
    responses((status = 200, description = "Visible side groups with their filtered entries")),
    security(("bearerAuth" = []))
)]
pub async fn side(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> AppResult<Json<Vec<SideEntry>>> {
    let groups = render_side(state.evaluator.as_ref(), &state.registry, principal.as_ref()).await?;
    Ok(Json(groups))
}

#[utoipa::path(
    get,
    path = "/api/permissions",
    tag = "Navigation",
    params(PermissionsQuery),
    responses((status = 200, description = "Pairs held by the caller", body = Vec<PvmKey>)),
    security(("bearerAuth" = []))
)]
pub async fn permissions(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Query(query): Query<PermissionsQuery>,
) -> AppResult<Json<BTreeSet<PvmKey>>> {
    let held = state
        .evaluator
        .permissions_for(principal.as_ref(), query.menus)
        .await?;
    Ok(Json(held))
}
