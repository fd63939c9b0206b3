//! PHP-FPM pool manager tests

use std::sync::Arc;

use siteagent::errors::AgentError;
use siteagent::sites::php_fpm::PoolManager;

use crate::support::{settings_in, FakeRunner};

fn manager(root: &std::path::Path, runner: Arc<FakeRunner>) -> PoolManager {
    let settings = settings_in(root);
    PoolManager::new(settings.php.clone(), "php", "systemctl", runner)
}

#[tokio::test]
async fn test_create_pool_writes_and_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    let pools = manager(dir.path(), runner.clone());

    pools.create_pool("shop-example-com", "8.2").await.unwrap();

    let pool = pools.pool_file("shop-example-com", "8.2");
    assert_eq!(
        pool.path(),
        dir.path().join("php/8.2/fpm/pool.d/shop-example-com.conf")
    );
    let contents = pool.read_string().await.unwrap();
    let socket = dir.path().join("run/php/php8.2-fpm-shop-example-com.sock");
    assert!(contents.contains(&format!("listen = {}", socket.display())));
    assert_eq!(runner.calls(), vec!["systemctl reload php8.2-fpm"]);
}

#[tokio::test]
async fn test_unsupported_version_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    let pools = manager(dir.path(), runner.clone());

    let err = pools.create_pool("shop-example-com", "5.6").await.unwrap_err();
    assert!(matches!(err, AgentError::ValidationError(_)));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_delete_missing_pool_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    let pools = manager(dir.path(), runner.clone());

    assert!(!pools.delete_pool("shop-example-com", "8.2").await.unwrap());
    assert!(runner.calls().is_empty());

    pools.create_pool("shop-example-com", "8.2").await.unwrap();
    assert!(pools.delete_pool("shop-example-com", "8.2").await.unwrap());
    assert!(!pools.pool_file("shop-example-com", "8.2").exists().await);
}

#[tokio::test]
async fn test_switch_version_moves_the_pool() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    let pools = manager(dir.path(), runner.clone());
    pools.create_pool("shop-example-com", "8.1").await.unwrap();

    pools
        .switch_version("shop-example-com", "8.1", "8.3")
        .await
        .unwrap();

    assert!(!pools.pool_file("shop-example-com", "8.1").exists().await);
    assert!(pools.pool_file("shop-example-com", "8.3").exists().await);
    assert!(runner.ran("php8.3 -v"));
}

#[tokio::test]
async fn test_switch_to_missing_runtime_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    runner.fail("php8.3", &["-v"], "php8.3: command not found");
    let pools = manager(dir.path(), runner.clone());
    pools.create_pool("shop-example-com", "8.1").await.unwrap();
    runner.clear();

    let err = pools
        .switch_version("shop-example-com", "8.1", "8.3")
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Validation error: PHP 8.3 is not installed");
    assert!(pools.pool_file("shop-example-com", "8.1").exists().await);
    assert!(!pools.pool_file("shop-example-com", "8.3").exists().await);
    assert_eq!(runner.calls(), vec!["php8.3 -v"]);
}

#[tokio::test]
async fn test_failed_switch_restores_old_pool() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    runner.fail("systemctl", &["reload", "php8.3-fpm"], "Unit php8.3-fpm.service not loaded");
    let pools = manager(dir.path(), runner.clone());
    pools.create_pool("shop-example-com", "8.1").await.unwrap();

    assert!(pools
        .switch_version("shop-example-com", "8.1", "8.3")
        .await
        .is_err());
    assert!(pools.pool_file("shop-example-com", "8.1").exists().await);
    assert!(!pools.pool_file("shop-example-com", "8.3").exists().await);
}

#[tokio::test]
async fn test_php_info_and_installed_versions() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    runner.fail("php8.1", &["-v"], "not found");
    runner.succeed(
        "php8.2",
        &["-v"],
        "PHP 8.2.12 (cli) (built: Nov  2 2023)\nCopyright (c) The PHP Group\n",
    );
    runner.succeed("systemctl", &["is-active", "php8.2-fpm"], "active\n");
    let pools = manager(dir.path(), runner.clone());

    assert_eq!(pools.installed_versions().await, vec!["8.2", "8.3"]);
    assert!(pools.php_info("8.1").await.is_none());

    let info = pools.php_info("8.2").await.unwrap();
    assert_eq!(info.full_version, "PHP 8.2.12 (cli) (built: Nov  2 2023)");
    assert_eq!(info.status, "active");
}
