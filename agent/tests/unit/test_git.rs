//! Git synchronizer tests

use std::sync::Arc;

use siteagent::deploy::git::GitSync;

use crate::support::{FakeRunner, FULL_COMMIT, SHORT_COMMIT};

#[tokio::test]
async fn test_clone_replaces_target() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("sites/example-com");
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(target.join("stale.html"), "old").unwrap();

    let runner = Arc::new(FakeRunner::new());
    let git = GitSync::new(runner.clone(), "git");
    let outcome = git
        .clone("https://git.example.com/acme/site.git", &target, "main")
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.output, SHORT_COMMIT);
    assert!(!target.join("stale.html").exists());
    assert_eq!(
        runner.calls()[0],
        format!(
            "git clone --branch main --depth 1 --single-branch https://git.example.com/acme/site.git {}",
            target.display()
        )
    );
}

#[tokio::test]
async fn test_pull_reports_stderr_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    runner.fail("git", &["checkout"], "error: pathspec 'nope' did not match");
    let git = GitSync::new(runner.clone(), "git");

    let outcome = git.pull_latest(dir.path(), Some("nope")).await;

    assert!(!outcome.success);
    assert_eq!(outcome.output, "error: pathspec 'nope' did not match");
    // never pulls a branch it could not check out
    assert!(!runner.ran("git pull"));

    let outcome = git.pull_latest(dir.path(), None).await;
    assert!(outcome.success);
    assert_eq!(outcome.output, SHORT_COMMIT);
}

#[tokio::test]
async fn test_queries_return_none_on_error() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    let git = GitSync::new(runner.clone(), "git");

    assert_eq!(git.current_commit(dir.path()).await.as_deref(), Some(FULL_COMMIT));
    assert_eq!(git.current_branch(dir.path()).await.as_deref(), Some("main"));

    runner.fail("git", &["rev-parse"], "fatal: not a git repository");
    assert!(git.current_commit(dir.path()).await.is_none());
    assert!(git.current_branch(dir.path()).await.is_none());

    let specs = runner.specs();
    assert!(specs.iter().all(|spec| spec.cwd.as_deref() == Some(dir.path())));
}

#[tokio::test]
async fn test_reset_reports_success_flag() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    let git = GitSync::new(runner.clone(), "git");

    assert!(git.reset_to_previous(dir.path()).await);
    assert!(git.reset_to_commit(dir.path(), FULL_COMMIT).await);

    runner.fail("git", &["reset"], "fatal: ambiguous argument");
    assert!(!git.reset_to_previous(dir.path()).await);
    assert_eq!(
        runner.calls(),
        vec![
            "git reset --hard HEAD~1".to_string(),
            format!("git reset --hard {}", FULL_COMMIT),
            "git reset --hard HEAD~1".to_string(),
        ]
    );
}
