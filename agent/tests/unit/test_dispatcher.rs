//! Deploy dispatcher tests

use std::time::Duration;

use tokio::sync::oneshot;

use siteagent::models::deploy::{DeployOptions, DeployStatus};
use siteagent::models::site::SiteType;
use siteagent::workers::deployer::{self, execute_task};

use crate::support::Fixture;

#[tokio::test]
async fn test_deploy_past_the_limit_fails() {
    let mut fx = Fixture::new();
    let site = fx.site("example.com", SiteType::Static).await;
    fx.runner.hang("git", &["pull"], Duration::from_secs(30));

    let pending = fx
        .state
        .deploys
        .start_deploy(&site.id, DeployOptions::default())
        .await
        .unwrap();
    let task = fx.tasks.try_recv().unwrap();
    assert_eq!(task.deploy_id, pending.id);

    execute_task(
        task,
        &fx.state.pipeline,
        &fx.state.locks,
        Duration::from_secs(1),
    )
    .await;

    let deploy = fx.state.deploys.get_deploy(&pending.id).await.unwrap();
    assert_eq!(deploy.status, DeployStatus::Failed);
    assert_eq!(deploy.error.as_deref(), Some("deploy timed out after 1s"));
    assert_eq!(
        deploy.log_messages().last().copied(),
        Some("Deploy failed: deploy timed out after 1s")
    );
    assert!(deploy.completed_at.is_some());
}

#[tokio::test]
async fn test_deploy_waits_for_the_site_lock() {
    let mut fx = Fixture::new();
    let site = fx.site("example.com", SiteType::Static).await;
    let pending = fx
        .state
        .deploys
        .start_deploy(&site.id, DeployOptions::default())
        .await
        .unwrap();
    let task = fx.tasks.try_recv().unwrap();

    let guard = fx.state.locks.lock(&site.id).await;
    let pipeline = fx.state.pipeline.clone();
    let locks = fx.state.locks.clone();
    let handle = tokio::spawn(async move {
        execute_task(task, &pipeline, &locks, Duration::from_secs(30)).await;
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let waiting = fx.state.deploys.get_deploy(&pending.id).await.unwrap();
    assert_eq!(waiting.status, DeployStatus::Pending);
    assert!(fx.runner.calls().is_empty());

    drop(guard);
    handle.await.unwrap();
    let done = fx.state.deploys.get_deploy(&pending.id).await.unwrap();
    assert_eq!(done.status, DeployStatus::Success);
}

#[tokio::test]
async fn test_worker_runs_queued_deploys() {
    let fx = Fixture::new();
    let blog = fx.site("blog.example.com", SiteType::Static).await;
    let shop = fx.site("shop.example.com", SiteType::Php).await;

    let mut ids = Vec::new();
    for site in [&blog, &shop, &blog] {
        let pending = fx
            .state
            .deploys
            .start_deploy(&site.id, DeployOptions::default())
            .await
            .unwrap();
        ids.push(pending.id);
    }

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let options = deployer::Options {
        workers: 2,
        timeout: Duration::from_secs(30),
    };
    let pipeline = fx.state.pipeline.clone();
    let locks = fx.state.locks.clone();
    let tasks = fx.tasks;
    let worker = tokio::spawn(async move {
        deployer::run(
            &options,
            pipeline,
            locks,
            tasks,
            Box::pin(async move {
                let _ = stop_rx.await;
            }),
        )
        .await;
    });

    let mut finished = false;
    for _ in 0..100 {
        let mut done = true;
        for id in &ids {
            let deploy = fx.state.deploys.get_deploy(id).await.unwrap();
            done &= deploy.status.is_terminal();
        }
        if done {
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(finished, "queued deploys did not finish");

    for id in &ids {
        let deploy = fx.state.deploys.get_deploy(id).await.unwrap();
        assert_eq!(deploy.status, DeployStatus::Success);
    }
    let numbers: Vec<u64> = fx
        .state
        .deploys
        .list_deploys(&blog.id, 10)
        .await
        .unwrap()
        .iter()
        .map(|d| d.number)
        .collect();
    assert_eq!(numbers, vec![2, 1]);

    stop_tx.send(()).unwrap();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_busy_site_does_not_hold_back_other_sites() {
    let fx = Fixture::new();
    let blog = fx.site("blog.example.com", SiteType::Static).await;
    let shop = fx.site("shop.example.com", SiteType::Static).await;
    fx.runner.hang("git", &["pull"], Duration::from_secs(2));

    let mut ids = Vec::new();
    for site in [&blog, &blog, &shop] {
        let pending = fx
            .state
            .deploys
            .start_deploy(&site.id, DeployOptions::default())
            .await
            .unwrap();
        ids.push(pending.id);
    }

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let options = deployer::Options {
        workers: 2,
        timeout: Duration::from_secs(30),
    };
    let pipeline = fx.state.pipeline.clone();
    let locks = fx.state.locks.clone();
    let tasks = fx.tasks;
    let worker = tokio::spawn(async move {
        deployer::run(
            &options,
            pipeline,
            locks,
            tasks,
            Box::pin(async move {
                let _ = stop_rx.await;
            }),
        )
        .await;
    });

    // the second blog deploy queues behind the first without taking the
    // free worker, so the shop deploy starts right away
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let first_blog = fx.state.deploys.get_deploy(&ids[0]).await.unwrap();
    let second_blog = fx.state.deploys.get_deploy(&ids[1]).await.unwrap();
    let shop_deploy = fx.state.deploys.get_deploy(&ids[2]).await.unwrap();
    assert_eq!(first_blog.status, DeployStatus::InProgress);
    assert_eq!(second_blog.status, DeployStatus::Pending);
    assert_eq!(shop_deploy.status, DeployStatus::InProgress);

    let mut finished = false;
    for _ in 0..200 {
        let mut done = true;
        for id in &ids {
            done &= fx.state.deploys.get_deploy(id).await.unwrap().status.is_terminal();
        }
        if done {
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(finished, "queued deploys did not finish");
    for id in &ids {
        let deploy = fx.state.deploys.get_deploy(id).await.unwrap();
        assert_eq!(deploy.status, DeployStatus::Success);
    }

    stop_tx.send(()).unwrap();
    worker.await.unwrap();
}
