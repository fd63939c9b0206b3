//! HTTP API tests

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use siteagent::models::site::SiteType;
use siteagent::server::serve::router;
use siteagent::server::state::ServerState;

use crate::support::Fixture;

fn app(fx: &Fixture) -> Router {
    router(Arc::new(ServerState::from_app_state(&fx.state)))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn send_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let fx = Fixture::new();
    let response = app(&fx).oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "siteagent");
}

#[tokio::test]
async fn test_create_and_get_site() {
    let fx = Fixture::new();
    let app = app(&fx);

    let request = send_json(
        "POST",
        "/sites",
        json!({"domain": "WWW.Blog.Example.com", "site_type": "static"}),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["site"]["domain"], "blog.example.com");
    assert!(created.get("clone_error").is_none());

    let id = created["site"]["id"].as_str().unwrap();
    let response = app.clone().oneshot(get(&format!("/sites/{}", id))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["site_type"], "static");

    let response = app.oneshot(get("/sites")).await.unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_validation_error_maps_to_422() {
    let fx = Fixture::new();
    let request = send_json(
        "POST",
        "/sites",
        json!({"domain": "localhost", "site_type": "static"}),
    );
    let response = app(&fx).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "validation_error");
    assert!(body["message"].as_str().unwrap().contains("localhost"));
}

#[tokio::test]
async fn test_unknown_ids_map_to_404() {
    let fx = Fixture::new();
    let app = app(&fx);

    for uri in ["/sites/nope", "/deploys/nope", "/sites/nope/deploys"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body_json(response).await["error"], "not_found");
    }
}

#[tokio::test]
async fn test_start_deploy_is_accepted() {
    let mut fx = Fixture::new();
    let site = fx.site("example.com", SiteType::Static).await;
    let app = app(&fx);

    let request = send_json(
        "POST",
        &format!("/sites/{}/deploys", site.id),
        json!({"git_branch": "release", "run_migrations": true}),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let deploy = body_json(response).await;
    assert_eq!(deploy["status"], "pending");
    assert_eq!(deploy["number"], 1);
    assert_eq!(deploy["git_branch"], "release");
    assert_eq!(deploy["metadata"]["run_migrations"], true);
    assert_eq!(deploy["metadata"]["clear_cache"], true);

    // nothing ran on the request path
    assert!(fx.runner.calls().is_empty());
    let finished = fx.run_next().await;

    let response = app
        .oneshot(get(&format!("/deploys/{}", finished.id)))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["logs"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_start_deploy_without_body_uses_defaults() {
    let fx = Fixture::new();
    let site = fx.site("example.com", SiteType::Static).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/sites/{}/deploys", site.id))
        .body(Body::empty())
        .unwrap();
    let response = app(&fx).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let deploy = body_json(response).await;
    assert_eq!(deploy["git_branch"], "main");
    assert_eq!(deploy["metadata"]["install_dependencies"], true);
}

#[tokio::test]
async fn test_list_deploys_honors_limit() {
    let mut fx = Fixture::new();
    let site = fx.site("example.com", SiteType::Static).await;
    for _ in 0..3 {
        fx.deploy(&site).await;
    }

    let response = app(&fx)
        .oneshot(get(&format!("/sites/{}/deploys?limit=2", site.id)))
        .await
        .unwrap();
    let body = body_json(response).await;
    let numbers: Vec<u64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["number"].as_u64().unwrap())
        .collect();
    assert_eq!(numbers, vec![3, 2]);
}

#[tokio::test]
async fn test_rollback_conflicts_with_running_deploy() {
    let mut fx = Fixture::new();
    let site = fx.site("example.com", SiteType::Static).await;
    let deploy = fx.deploy(&site).await;
    let app = app(&fx);
    let uri = format!("/deploys/{}/rollback", deploy.id);

    let guard = fx.state.locks.lock(&site.id).await;
    let request = Request::builder().method("POST").uri(&uri).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    drop(guard);

    let request = Request::builder().method("POST").uri(&uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "rolled_back");
}

#[tokio::test]
async fn test_switch_php_version_and_delete() {
    let fx = Fixture::new();
    let site = fx.site("shop.example.com", SiteType::Laravel).await;
    let app = app(&fx);

    let request = send_json(
        "POST",
        &format!("/sites/{}/php-version", site.id),
        json!({"version": "8.3"}),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["php_version"], "8.3");

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/sites/{}?remove_files=true", site.id))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!site.root_path.exists());

    let response = app.oneshot(get(&format!("/sites/{}", site.id))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_nginx_reload_failure_maps_to_500() {
    let fx = Fixture::new();
    fx.runner.fail("nginx", &["-t"], "nginx: [emerg] invalid parameter");

    let request = Request::builder()
        .method("POST")
        .uri("/nginx/reload")
        .body(Body::empty())
        .unwrap();
    let response = app(&fx).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "external_tool_error");
    assert!(!fx.runner.ran("systemctl reload nginx"));
}

#[tokio::test]
async fn test_php_versions() {
    let fx = Fixture::new();
    fx.runner.fail("php8.1", &["-v"], "not found");
    fx.runner.succeed("php8.2", &["-v"], "PHP 8.2.12 (cli)\n");

    let response = app(&fx).oneshot(get("/php/versions")).await.unwrap();

    let body = body_json(response).await;
    assert_eq!(body["default_version"], "8.2");
    assert_eq!(body["supported"], json!(["8.1", "8.2", "8.3"]));
    let installed = body["installed"].as_array().unwrap();
    assert_eq!(installed.len(), 2);
    assert_eq!(installed[0]["full_version"], "PHP 8.2.12 (cli)");
}
