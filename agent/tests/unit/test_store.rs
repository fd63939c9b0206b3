//! Record store tests

use chrono::{Duration, Utc};
use tokio_test::{assert_err, assert_ok};

use siteagent::errors::AgentError;
use siteagent::models::deploy::{Deploy, DeployOptions};
use siteagent::models::site::{Site, SiteStatus, SiteType};
use siteagent::storage::layout::StorageLayout;
use siteagent::storage::store::{Repository, Store};

fn site(domain: &str) -> Site {
    let now = Utc::now();
    Site {
        id: uuid::Uuid::new_v4().to_string(),
        domain: domain.to_string(),
        site_type: SiteType::Static,
        root_path: format!("/srv/{}", domain).into(),
        git_repo: None,
        git_branch: "main".to_string(),
        php_version: None,
        ssl_enabled: false,
        status: SiteStatus::Active,
        metadata: Default::default(),
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn test_duplicate_domain_rejected() {
    let store = Store::in_memory();
    assert_ok!(store.insert_site(&site("example.com")).await);
    let err = assert_err!(store.insert_site(&site("example.com")).await);
    assert!(matches!(err, AgentError::ValidationError(_)));
}

#[tokio::test]
async fn test_deploy_numbers_are_per_site() {
    let store = Store::in_memory();
    let a = site("a.example.com");
    let b = site("b.example.com");
    store.insert_site(&a).await.unwrap();
    store.insert_site(&b).await.unwrap();

    let first = store
        .insert_deploy(Deploy::pending(&a.id, "main", DeployOptions::default()))
        .await
        .unwrap();
    let second = store
        .insert_deploy(Deploy::pending(&a.id, "main", DeployOptions::default()))
        .await
        .unwrap();
    let other = store
        .insert_deploy(Deploy::pending(&b.id, "main", DeployOptions::default()))
        .await
        .unwrap();

    assert_eq!(first.number, 1);
    assert_eq!(second.number, 2);
    assert_eq!(other.number, 1);

    let listed = store.list_deploys(&a.id, 10).await.unwrap();
    let numbers: Vec<u64> = listed.iter().map(|d| d.number).collect();
    assert_eq!(numbers, vec![2, 1]);
    assert_eq!(store.list_deploys(&a.id, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_deploy_for_unknown_site_rejected() {
    let store = Store::in_memory();
    let err = store
        .insert_deploy(Deploy::pending("missing", "main", DeployOptions::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::NotFound(_)));
}

#[tokio::test]
async fn test_append_log_survives_stale_update() {
    let store = Store::in_memory();
    let s = site("example.com");
    store.insert_site(&s).await.unwrap();
    let deploy = store
        .insert_deploy(Deploy::pending(&s.id, "main", DeployOptions::default()))
        .await
        .unwrap();

    store.append_log(&deploy.id, "first").await.unwrap();
    store.append_log(&deploy.id, "second").await.unwrap();

    // `deploy` is a snapshot without logs
    let mut stale = deploy.clone();
    stale.commit_hash = Some("abc".to_string());
    store.update_deploy(&stale).await.unwrap();

    let stored = store.get_deploy(&deploy.id).await.unwrap().unwrap();
    assert_eq!(stored.log_messages(), vec!["first", "second"]);
    assert_eq!(stored.commit_hash.as_deref(), Some("abc"));
}

#[tokio::test]
async fn test_delete_site_cascades_to_deploys() {
    let store = Store::in_memory();
    let s = site("example.com");
    store.insert_site(&s).await.unwrap();
    let deploy = store
        .insert_deploy(Deploy::pending(&s.id, "main", DeployOptions::default()))
        .await
        .unwrap();

    store.delete_site(&s.id).await.unwrap();
    assert!(store.get_site(&s.id).await.unwrap().is_none());
    assert!(store.get_deploy(&deploy.id).await.unwrap().is_none());
    assert!(matches!(
        store.delete_site(&s.id).await,
        Err(AgentError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_sites_most_recent_first() {
    let store = Store::in_memory();
    let mut old = site("old.example.com");
    old.created_at = Utc::now() - Duration::hours(1);
    let new = site("new.example.com");
    store.insert_site(&old).await.unwrap();
    store.insert_site(&new).await.unwrap();

    let domains: Vec<String> = store
        .list_sites()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.domain)
        .collect();
    assert_eq!(domains, vec!["new.example.com", "old.example.com"]);
}

#[tokio::test]
async fn test_records_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let s = site("example.com");
    let deploy_id = {
        let store = Store::open(StorageLayout::new(dir.path())).await.unwrap();
        store.insert_site(&s).await.unwrap();
        let deploy = store
            .insert_deploy(Deploy::pending(&s.id, "main", DeployOptions::default()))
            .await
            .unwrap();
        store.append_log(&deploy.id, "Deploy #1 started").await.unwrap();
        deploy.id
    };

    let reopened = Store::open(StorageLayout::new(dir.path())).await.unwrap();
    let loaded = reopened.get_site(&s.id).await.unwrap().unwrap();
    assert_eq!(loaded.domain, "example.com");
    let deploy = reopened.get_deploy(&deploy_id).await.unwrap().unwrap();
    assert_eq!(deploy.log_messages(), vec!["Deploy #1 started"]);

    // numbering continues after a restart
    let next = reopened
        .insert_deploy(Deploy::pending(&s.id, "main", DeployOptions::default()))
        .await
        .unwrap();
    assert_eq!(next.number, 2);
}
