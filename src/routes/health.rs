use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::query_scalar;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::errors::AppResult;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db_ok: bool,
    pub db_error: Option<String>,
    /// Number of registered resource descriptors.
    pub registered_resources: usize,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let db_check = query_scalar::<_, i64>("SELECT COUNT(*) FROM role").fetch_one(&state.pool).await;
    let registered_resources = state.registry.descriptors().count();

    let (db_ok, db_error) = match db_check {
        Ok(_) => (true, None),
        Err(e) => {
            tracing::warn!("health check failed: {}", e);
            (false, Some(e.to_string()))
        }
    };

    Ok(Json(HealthResponse {
        status: "ok",
        db_ok,
        db_error,
        registered_resources,
    }))
}
