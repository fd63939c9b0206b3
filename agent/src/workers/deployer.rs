//! Deploy dispatcher
//!
//! Deploy requests are queued as [`DeployTask`]s and executed here, off the
//! request path, by a bounded pool of workers. One attempt per task, with a
//! wall-clock limit and no retry.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, warn};

use crate::deploy::locks::SiteLocks;
use crate::deploy::pipeline::DeployPipeline;
use crate::errors::AgentError;

/// A deploy waiting to be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTask {
    pub deploy_id: String,
    pub site_id: String,
}

/// Sending half of the deploy queue
#[derive(Debug, Clone)]
pub struct DeployQueue {
    sender: mpsc::Sender<DeployTask>,
}

impl DeployQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DeployTask>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueue without waiting
    pub fn submit(&self, task: DeployTask) -> Result<(), AgentError> {
        self.sender.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AgentError::Conflict("Deploy queue is full, try again later".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                AgentError::ShutdownError("Deploy queue is closed".to_string())
            }
        })
    }
}

/// Deployer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Deploys executing at the same time
    pub workers: usize,

    /// Wall-clock limit for one deploy
    pub timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            workers: 2,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Run the deployer worker until shutdown or until every queue sender is gone
///
/// Only one task per site is handed to a worker at a time; later tasks of a
/// busy site wait in that site's backlog, so they never hold a worker slot
/// while another site's deploy is ready to run.
pub async fn run(
    options: &Options,
    pipeline: Arc<DeployPipeline>,
    locks: Arc<SiteLocks>,
    mut tasks: mpsc::Receiver<DeployTask>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Deployer worker starting ({} workers)...", options.workers);

    let semaphore = Arc::new(Semaphore::new(options.workers.max(1)));
    let mut running = JoinSet::new();
    let mut sites_by_task: HashMap<Id, String> = HashMap::new();
    let mut backlog: HashMap<String, VecDeque<DeployTask>> = HashMap::new();

    let spawn = |running: &mut JoinSet<()>, task: DeployTask| {
        let semaphore = semaphore.clone();
        let pipeline = pipeline.clone();
        let locks = locks.clone();
        let timeout = options.timeout;
        running
            .spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                execute_task(task, &pipeline, &locks, timeout).await;
            })
            .id()
    };

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Deployer worker shutting down...");
                break;
            }
            Some(finished) = running.join_next_with_id(), if !running.is_empty() => {
                let id = match finished {
                    Ok((id, ())) => id,
                    Err(e) => {
                        error!("Deploy task panicked: {}", e);
                        e.id()
                    }
                };
                let Some(site_id) = sites_by_task.remove(&id) else {
                    continue;
                };
                // hand the site's next task to a worker, or mark the site idle
                let next = backlog.get_mut(&site_id).and_then(VecDeque::pop_front);
                if backlog.get(&site_id).is_some_and(VecDeque::is_empty) {
                    backlog.remove(&site_id);
                }
                if let Some(task) = next {
                    let id = spawn(&mut running, task);
                    sites_by_task.insert(id, site_id);
                }
            }
            task = tasks.recv() => match task {
                Some(task) => {
                    if sites_by_task.values().any(|site| *site == task.site_id) {
                        debug!(deploy_id = %task.deploy_id, "Site busy, deploy task waits its turn");
                        backlog.entry(task.site_id.clone()).or_default().push_back(task);
                    } else {
                        let site_id = task.site_id.clone();
                        let id = spawn(&mut running, task);
                        sites_by_task.insert(id, site_id);
                    }
                }
                None => {
                    info!("Deploy queue closed, deployer worker exiting...");
                    break;
                }
            },
        }
    }

    let waiting: usize = backlog.values().map(VecDeque::len).sum();
    if waiting > 0 {
        warn!("Dropping {} deploy task(s) still waiting for their site", waiting);
    }

    // Dropping the futures kills their child processes; the deploys stay
    // unfinished and are failed on the next startup.
    if !running.is_empty() {
        warn!("Aborting {} running deploy(s)", running.len());
        running.shutdown().await;
    }
}

/// Execute one task under its site's lock and the wall-clock limit
pub async fn execute_task(
    task: DeployTask,
    pipeline: &DeployPipeline,
    locks: &SiteLocks,
    timeout: Duration,
) {
    let _guard = locks.lock(&task.site_id).await;
    debug!(deploy_id = %task.deploy_id, "Executing deploy task");

    match tokio::time::timeout(timeout, pipeline.execute(&task.deploy_id)).await {
        Ok(Ok(deploy)) => {
            info!(deploy_id = %deploy.id, status = %deploy.status, "Deploy task finished");
        }
        Ok(Err(e)) => {
            error!(deploy_id = %task.deploy_id, "Deploy task could not run: {}", e);
        }
        Err(_) => {
            warn!(deploy_id = %task.deploy_id, "Deploy timed out after {}s", timeout.as_secs());
            if let Err(e) = pipeline.mark_timed_out(&task.deploy_id, timeout).await {
                error!(deploy_id = %task.deploy_id, "Failed to record deploy timeout: {}", e);
            }
        }
    }
}
