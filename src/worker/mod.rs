//! The MapReduce worker.
//!
//! A worker keeps no state between tasks: it leases a task, runs it, reports
//! and asks again until the coordinator says the job is done.

use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::time::sleep;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::{Code, Response, Status};
use tower::service_fn;
use tracing::{debug, info, warn};

use crate::engine;
use crate::rpc::coordinator_client;
use crate::rpc::lease_task_reply::Outcome;
use crate::rpc::{LeaseTaskRequest, ReportMapDoneRequest, ReportReduceDoneRequest};
use crate::task::{MapTask, ReduceTask};
use crate::*;

pub type CoordinatorClient = coordinator_client::CoordinatorClient<Channel>;

const RETRY_BACKOFF_START: Duration = Duration::from_millis(200);
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub socket_path: PathBuf,
    /// Shows up in the coordinator's logs.
    pub name: String,
    pub intermediate_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Sleep between polls while no task is available.
    pub poll_backoff: Duration,
    pub rpc_timeout: Duration,
    /// Consecutive failed calls tolerated before giving up on the coordinator.
    pub max_retries: u32,
    /// Stop after executing this many tasks.
    pub max_tasks: Option<usize>,
}

impl WorkerConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            name: format!("worker-{}", std::process::id()),
            intermediate_dir: PathBuf::from(DEFAULT_INTERMEDIATE_DIR),
            output_dir: PathBuf::from("."),
            poll_backoff: DEFAULT_POLL_BACKOFF,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            max_retries: DEFAULT_RPC_RETRIES,
            max_tasks: None,
        }
    }
}

/// A client for the coordinator listening on `socket_path`.
///
/// The connection is made lazily, on the first call.
pub fn connect(socket_path: &Path, timeout: Duration) -> Result<CoordinatorClient> {
    let path = socket_path.to_path_buf();
    // The URI is required by tonic but never resolved; the connector dials the socket.
    let channel = Endpoint::try_from("http://[::]:50051")?
        .timeout(timeout)
        .connect_timeout(timeout)
        .connect_with_connector_lazy(service_fn(move |_: Uri| UnixStream::connect(path.clone())));
    Ok(CoordinatorClient::new(channel))
}

fn is_transient(status: &Status) -> bool {
    matches!(
        status.code(),
        Code::Unavailable | Code::DeadlineExceeded | Code::Unknown | Code::Cancelled
    )
}

/// Call the coordinator, retrying transport failures with exponential
/// backoff up to `max_retries` times.
async fn call_with_retry<T, F, Fut>(max_retries: u32, rpc: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Response<T>, Status>>,
{
    let mut backoff = RETRY_BACKOFF_START;
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(response) => return Ok(response.into_inner()),
            Err(status) if attempt < max_retries && is_transient(&status) => {
                attempt += 1;
                warn!(rpc, attempt, error = %status.message(), "coordinator call failed, retrying");
                sleep(backoff).await;
                backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
            }
            Err(status) => {
                return Err(anyhow!(status)).with_context(|| format!("{rpc} failed"));
            }
        }
    }
}

/// Lease and execute tasks until the job is done.
///
/// Returns the number of tasks executed. A task that fails is logged and
/// not reported; its lease will run out and another worker retries it.
pub async fn run(config: WorkerConfig, workload: Workload) -> Result<usize> {
    fs::create_dir_all(&config.intermediate_dir)
        .with_context(|| format!("failed to create {}", config.intermediate_dir.display()))?;
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;

    let client = connect(&config.socket_path, config.rpc_timeout)?;
    info!(worker = %config.name, socket = %config.socket_path.display(), "worker started");

    let mut executed = 0;
    loop {
        if config.max_tasks.is_some_and(|max| executed >= max) {
            info!(executed, "task limit reached, worker exiting");
            return Ok(executed);
        }

        let reply = call_with_retry(config.max_retries, "LeaseTask", || {
            let mut client = client.clone();
            let request = LeaseTaskRequest {
                worker: config.name.clone(),
            };
            async move { client.lease_task(request).await }
        })
        .await?;

        match reply.outcome {
            Some(Outcome::Map(task)) => {
                let task = MapTask::try_from(task)?;
                execute_map(&client, &config, workload, task, reply.n_reduce).await?;
                executed += 1;
            }
            Some(Outcome::Reduce(task)) => {
                let task = ReduceTask::try_from(task)?;
                execute_reduce(&client, &config, workload, task).await?;
                executed += 1;
            }
            Some(Outcome::NoWorkYet(_)) => {
                debug!("no task available, waiting");
                sleep(config.poll_backoff).await;
            }
            Some(Outcome::JobDone(_)) => {
                info!(executed, "job done, worker exiting");
                return Ok(executed);
            }
            None => bail!("coordinator sent a lease reply without an outcome"),
        }
    }
}

async fn execute_map(
    client: &CoordinatorClient,
    config: &WorkerConfig,
    workload: Workload,
    task: MapTask,
    n_reduce: u32,
) -> Result<()> {
    info!(task = %task.id, input = %task.input_path, "running map task");
    let id = task.id;
    let dir = config.intermediate_dir.clone();
    let result =
        tokio::task::spawn_blocking(move || engine::perform_map(&task, &workload, n_reduce, &dir))
            .await;

    let partition_files = match result {
        Ok(Ok(files)) => files,
        Ok(Err(e)) => {
            warn!(task = %id, error = %format!("{e:#}"), "map task failed, leaving it to expire");
            return Ok(());
        }
        Err(e) => {
            warn!(task = %id, error = %e, "map task panicked, leaving it to expire");
            return Ok(());
        }
    };

    let ack = call_with_retry(config.max_retries, "ReportMapDone", || {
        let mut client = client.clone();
        let request = ReportMapDoneRequest {
            task_id: id.to_string(),
            partition_files: partition_files.clone(),
        };
        async move { client.report_map_done(request).await }
    })
    .await?;
    if !ack.accepted {
        debug!(task = %id, "coordinator had already reassigned the map task");
    }
    Ok(())
}

async fn execute_reduce(
    client: &CoordinatorClient,
    config: &WorkerConfig,
    workload: Workload,
    task: ReduceTask,
) -> Result<()> {
    info!(
        task = %task.id,
        partition = task.partition,
        inputs = task.input_paths.len(),
        "running reduce task"
    );
    let id = task.id;
    let dir = config.output_dir.clone();
    let result =
        tokio::task::spawn_blocking(move || engine::perform_reduce(&task, &workload, &dir)).await;

    match result {
        Ok(Ok(path)) => debug!(task = %id, output = %path.display(), "reduce output written"),
        Ok(Err(e)) => {
            warn!(task = %id, error = %format!("{e:#}"), "reduce task failed, leaving it to expire");
            return Ok(());
        }
        Err(e) => {
            warn!(task = %id, error = %e, "reduce task panicked, leaving it to expire");
            return Ok(());
        }
    }

    let ack = call_with_retry(config.max_retries, "ReportReduceDone", || {
        let mut client = client.clone();
        let request = ReportReduceDoneRequest {
            task_id: id.to_string(),
        };
        async move { client.report_reduce_done(request).await }
    })
    .await?;
    if !ack.accepted {
        debug!(task = %id, "coordinator had already reassigned the reduce task");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let value = call_with_retry(3, "Test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Status::unavailable("down"))
                } else {
                    Ok(Response::new(7))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = call_with_retry(2, "Test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Status::unavailable("down")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalid_argument_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = call_with_retry(5, "Test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Status::invalid_argument("bad partition")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_coordinator_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WorkerConfig::new(dir.path().join("missing.sock"));
        config.intermediate_dir = dir.path().join("intermediates");
        config.output_dir = dir.path().to_path_buf();
        config.max_retries = 1;

        let result = run(config, workload::named("wc").unwrap()).await;
        assert!(result.is_err());
    }
}
