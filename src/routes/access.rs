use axum::extract::{Path, State};
use axum::Json;

use crate::app::AppState;
use crate::authz::AccessDecision;
use crate::errors::AppResult;
use crate::jwt::CurrentPrincipal;

/// Runs the guard for one operation on a registered resource.
#[utoipa::path(
    get,
    path = "/api/access/{resource}/{operation}",
    tag = "Access",
    params(
        ("resource" = String, Path, description = "Registered resource name"),
        ("operation" = String, Path, description = "Operation on the resource")
    ),
    responses(
        (status = 200, description = "Access allowed, with the resolved permission"),
        (status = 403, description = "Access denied, with the resolved permission and resource"),
        (status = 404, description = "Resource is not registered")
    ),
    security(("bearerAuth" = []))
)]
pub async fn check_access(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path((resource, operation)): Path<(String, String)>,
) -> AppResult<Json<AccessDecision>> {
    match state.guard.authorize(principal.as_ref(), &resource, &operation).await? {
        allowed @ AccessDecision::Allowed { .. } => Ok(Json(allowed)),
        AccessDecision::Denied(denied) => Err(denied.into()),
    }
}
