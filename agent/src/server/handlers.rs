//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::deploy::service::DEFAULT_LIST_LIMIT;
use crate::errors::AgentError;
use crate::models::deploy::{Deploy, DeployOptions};
use crate::models::site::{CreatedSite, Site, SiteChanges, SiteSpec};
use crate::server::state::ServerState;
use crate::sites::php_fpm::PhpInfo;
use crate::utils::version_info;

/// Error body returned by every failing handler
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error: String,
}

impl AgentError {
    fn status_code(&self) -> StatusCode {
        match self {
            AgentError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AgentError::ValidationError(_) => "validation_error",
            AgentError::NotFound(_) => "not_found",
            AgentError::Conflict(_) => "conflict",
            AgentError::ExternalTool(_) => "external_tool_error",
            AgentError::PartialFailure { .. } => "partial_failure",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
            error: self.kind().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "siteagent".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

// ================================== SITES ======================================== //

pub async fn list_sites_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<Site>>, AgentError> {
    Ok(Json(state.provisioner.list_sites().await?))
}

pub async fn create_site_handler(
    State(state): State<Arc<ServerState>>,
    Json(spec): Json<SiteSpec>,
) -> Result<(StatusCode, Json<CreatedSite>), AgentError> {
    let created = state.provisioner.create_site(spec).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_site_handler(
    State(state): State<Arc<ServerState>>,
    Path(site_id): Path<String>,
) -> Result<Json<Site>, AgentError> {
    Ok(Json(state.provisioner.get_site(&site_id).await?))
}

pub async fn update_site_handler(
    State(state): State<Arc<ServerState>>,
    Path(site_id): Path<String>,
    Json(changes): Json<SiteChanges>,
) -> Result<Json<Site>, AgentError> {
    Ok(Json(state.provisioner.update_site(&site_id, changes).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteSiteQuery {
    #[serde(default)]
    pub remove_files: bool,
}

pub async fn delete_site_handler(
    State(state): State<Arc<ServerState>>,
    Path(site_id): Path<String>,
    Query(query): Query<DeleteSiteQuery>,
) -> Result<StatusCode, AgentError> {
    state
        .provisioner
        .delete_site(&site_id, query.remove_files)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PhpVersionRequest {
    pub version: String,
}

pub async fn switch_php_version_handler(
    State(state): State<Arc<ServerState>>,
    Path(site_id): Path<String>,
    Json(request): Json<PhpVersionRequest>,
) -> Result<Json<Site>, AgentError> {
    let site = state
        .provisioner
        .switch_php_version(&site_id, &request.version)
        .await?;
    Ok(Json(site))
}

// ================================= DEPLOYS ======================================= //

pub async fn start_deploy_handler(
    State(state): State<Arc<ServerState>>,
    Path(site_id): Path<String>,
    body: Option<Json<DeployOptions>>,
) -> Result<(StatusCode, Json<Deploy>), AgentError> {
    let options = body.map(|Json(options)| options).unwrap_or_default();
    let deploy = state.deploys.start_deploy(&site_id, options).await?;
    Ok((StatusCode::ACCEPTED, Json(deploy)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListDeploysQuery {
    pub limit: Option<usize>,
}

pub async fn list_deploys_handler(
    State(state): State<Arc<ServerState>>,
    Path(site_id): Path<String>,
    Query(query): Query<ListDeploysQuery>,
) -> Result<Json<Vec<Deploy>>, AgentError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    Ok(Json(state.deploys.list_deploys(&site_id, limit).await?))
}

pub async fn get_deploy_handler(
    State(state): State<Arc<ServerState>>,
    Path(deploy_id): Path<String>,
) -> Result<Json<Deploy>, AgentError> {
    Ok(Json(state.deploys.get_deploy(&deploy_id).await?))
}

pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
    Path(deploy_id): Path<String>,
) -> Result<Json<Deploy>, AgentError> {
    Ok(Json(state.deploys.rollback(&deploy_id).await?))
}

// ============================== NGINX / PHP ====================================== //

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

pub async fn reload_nginx_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<ActionResponse>, AgentError> {
    state.provisioner.reload_web_server().await?;
    Ok(Json(ActionResponse {
        success: true,
        message: "nginx reloaded".to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct PhpVersionsResponse {
    pub supported: Vec<String>,
    pub default_version: String,
    pub installed: Vec<PhpInfo>,
}

pub async fn php_versions_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let pools = state.provisioner.pools();
    let mut installed = Vec::new();
    for version in pools.installed_versions().await {
        if let Some(info) = pools.php_info(&version).await {
            installed.push(info);
        }
    }
    Json(PhpVersionsResponse {
        supported: pools.settings().versions.clone(),
        default_version: pools.settings().default_version.clone(),
        installed,
    })
}
