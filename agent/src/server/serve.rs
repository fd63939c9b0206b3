//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::AgentError;
use crate::server::handlers::{
    create_site_handler, delete_site_handler, get_deploy_handler, get_site_handler,
    health_handler, list_deploys_handler, list_sites_handler, php_versions_handler,
    reload_nginx_handler, rollback_handler, start_deploy_handler, switch_php_version_handler,
    update_site_handler, version_handler,
};
use crate::server::state::ServerState;

/// All routes of the local API
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Sites
        .route("/sites", get(list_sites_handler).post(create_site_handler))
        .route(
            "/sites/{id}",
            get(get_site_handler)
                .patch(update_site_handler)
                .delete(delete_site_handler),
        )
        .route("/sites/{id}/php-version", post(switch_php_version_handler))
        // Deploys
        .route(
            "/sites/{id}/deploys",
            get(list_deploys_handler).post(start_deploy_handler),
        )
        .route("/deploys/{id}", get(get_deploy_handler))
        .route("/deploys/{id}/rollback", post(rollback_handler))
        // Web server and runtimes
        .route("/nginx/reload", post(reload_nginx_handler))
        .route("/php/versions", get(php_versions_handler))
        // State and middleware
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), AgentError>>, AgentError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AgentError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| AgentError::ServerError(e.to_string()))
    });

    Ok(handle)
}
