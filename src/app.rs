use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{AccessEvaluator, Guard, StoreAccessEvaluator};
use crate::config::SecurityConfig;
use crate::errors::AppError;
use crate::events::EventBus;
use crate::jwt::JwtConfig;
use crate::reconcile::Reconciler;
use crate::registry::Registry;
use crate::routes::{access, health, menu, security};
use crate::store::SecurityStore;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub security: Arc<SecurityConfig>,
    pub registry: Arc<Registry>,
    pub store: SecurityStore,
    pub reconciler: Reconciler,
    pub evaluator: Arc<dyn AccessEvaluator>,
    pub guard: Guard,
    /// Held for the duration of a converge or cleanup pass.
    pub reconcile_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        jwt: JwtConfig,
        security: SecurityConfig,
        registry: Registry,
        events: Option<EventBus>,
    ) -> Self {
        let store = match events {
            Some(bus) => SecurityStore::new(pool.clone()).with_events(bus),
            None => SecurityStore::new(pool.clone()),
        };
        let registry = Arc::new(registry);
        let evaluator: Arc<dyn AccessEvaluator> =
            Arc::new(StoreAccessEvaluator::new(pool.clone(), security.public_role.clone()));
        let guard = Guard::new(Arc::clone(&registry), Arc::clone(&evaluator));
        let reconciler = Reconciler::new(store.clone(), security.clone());

        Self {
            pool,
            jwt: Arc::new(jwt),
            security: Arc::new(security),
            registry,
            store,
            reconciler,
            evaluator,
            guard,
            reconcile_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub async fn create_app(
    pool: SqlitePool,
    registry: Registry,
    events: Option<EventBus>,
) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let security = SecurityConfig::from_env()?;
    let state = AppState::new(pool, jwt_config, security, registry, events);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(health::health))
        .route("/menu", get(menu::menu))
        .route("/side", get(menu::side))
        .route("/permissions", get(menu::permissions))
        .route("/access/:resource/:operation", get(access::check_access))
        .nest("/security", security::routes());

    let router = Router::new()
        .nest("/api", api_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
