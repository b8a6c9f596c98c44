use anyhow::Context;

use rbac_builder::config::SecurityConfig;
use rbac_builder::events::{init_event_bus, start_audit_listener};
use rbac_builder::reconcile::Reconciler;
use rbac_builder::registry::Registry;
use rbac_builder::store::SecurityStore;
use rbac_builder::{app, db, docs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let pool = db::init().await?;
    let security = SecurityConfig::from_env()?;
    let registry = Registry::load(security.registry_path.as_deref())
        .context("failed to load resource registry")?;

    let (events, audit_rx) = init_event_bus();
    tokio::spawn(start_audit_listener(audit_rx, pool.clone()));

    let store = SecurityStore::new(pool.clone()).with_events(events.clone());
    let reconciler = Reconciler::new(store, security.clone());
    reconciler
        .bootstrap()
        .await
        .context("failed to bootstrap security roles")?;

    if security.update_perms {
        let report = reconciler.sync_registry(&registry).await?;
        if !report.is_clean() {
            tracing::warn!(failures = ?report.failures, "registry sync finished with failures");
        }
    }

    let port = std::env::var("APP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000);

    let openapi = docs::build_openapi(port)?;
    let app = app::create_app(pool, registry, Some(events))
        .await?
        .merge(docs::swagger_routes(openapi));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
