//! The MapReduce coordinator.
//!
//! Owns one job's [`Scheduler`], exposes it over gRPC on a Unix-domain
//! socket and runs the lease monitor next to the RPC handlers.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::rpc::coordinator_server::{Coordinator, CoordinatorServer};
use crate::rpc::lease_task_reply::Outcome;
use crate::rpc::{
    Ack, Empty, JobDoneReply, JobStatusReply, LeaseTaskReply, LeaseTaskRequest,
    ReportMapDoneRequest, ReportReduceDoneRequest,
};
use crate::task::parse_task_id;
use crate::*;

pub mod monitor;
pub mod scheduler;

pub use scheduler::{JobStatus, Lease, Scheduler};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub socket_path: PathBuf,
    pub n_reduce: u32,
    /// How long a worker may hold a task before it is handed out again.
    pub lease: Duration,
    pub monitor_interval: Duration,
    pub done_poll_interval: Duration,
    pub shutdown_grace: Duration,
}

impl CoordinatorConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            n_reduce: DEFAULT_N_REDUCE,
            lease: Duration::from_secs(DEFAULT_LEASE_SECS),
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            done_poll_interval: DEFAULT_DONE_POLL_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }
}

/// gRPC front of a [`Scheduler`].
pub struct CoordinatorService {
    scheduler: Arc<Scheduler>,
}

impl CoordinatorService {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

fn invalid_argument(err: anyhow::Error) -> Status {
    Status::invalid_argument(format!("{err:#}"))
}

#[tonic::async_trait]
impl Coordinator for CoordinatorService {
    async fn lease_task(
        &self,
        request: Request<LeaseTaskRequest>,
    ) -> Result<Response<LeaseTaskReply>, Status> {
        let worker = request.into_inner().worker;
        let outcome = match self.scheduler.lease_task() {
            Lease::Assigned(task) => {
                info!(%worker, task = %task.id(), kind = %task.kind(), "leased task");
                Outcome::from(task)
            }
            Lease::NoWorkYet => {
                debug!(%worker, "no task available yet");
                Outcome::NoWorkYet(Empty {})
            }
            Lease::JobDone => Outcome::JobDone(Empty {}),
        };
        Ok(Response::new(LeaseTaskReply {
            outcome: Some(outcome),
            n_reduce: self.scheduler.n_reduce(),
        }))
    }

    async fn report_map_done(
        &self,
        request: Request<ReportMapDoneRequest>,
    ) -> Result<Response<Ack>, Status> {
        let ReportMapDoneRequest {
            task_id,
            partition_files,
        } = request.into_inner();
        let id = parse_task_id(&task_id).map_err(invalid_argument)?;
        let partitions = partition_files.len();
        let accepted = self
            .scheduler
            .report_map_done(id, partition_files)
            .map_err(invalid_argument)?;
        if accepted {
            info!(task = %id, partitions, "map task committed");
        } else {
            warn!(task = %id, "ignoring map report for a task that is not leased");
        }
        Ok(Response::new(Ack { accepted }))
    }

    async fn report_reduce_done(
        &self,
        request: Request<ReportReduceDoneRequest>,
    ) -> Result<Response<Ack>, Status> {
        let id = parse_task_id(&request.into_inner().task_id).map_err(invalid_argument)?;
        let accepted = self.scheduler.report_reduce_done(id);
        if accepted {
            info!(task = %id, "reduce task committed");
        } else {
            warn!(task = %id, "ignoring reduce report for a task that is not leased");
        }
        Ok(Response::new(Ack { accepted }))
    }

    async fn is_job_done(&self, _request: Request<Empty>) -> Result<Response<JobDoneReply>, Status> {
        Ok(Response::new(JobDoneReply {
            done: self.scheduler.is_job_done(),
        }))
    }

    async fn job_status(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<JobStatusReply>, Status> {
        let status = self.scheduler.status();
        let count = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        Ok(Response::new(JobStatusReply {
            pending_map: count(status.pending_map),
            pending_reduce: count(status.pending_reduce),
            running: count(status.running),
            done: status.done,
        }))
    }
}

/// Build a scheduler for `inputs` and serve it until the job is done.
pub async fn start(inputs: Vec<String>, config: CoordinatorConfig) -> Result<()> {
    info!(
        inputs = inputs.len(),
        n_reduce = config.n_reduce,
        "starting coordinator"
    );
    let scheduler = Arc::new(Scheduler::new(inputs, config.n_reduce)?);
    serve(scheduler, config).await
}

/// Serve `scheduler` on the configured socket and return once the job is
/// done and the shutdown grace period has passed.
pub async fn serve(scheduler: Arc<Scheduler>, config: CoordinatorConfig) -> Result<()> {
    let socket_path = config.socket_path.clone();
    // A socket left behind by an earlier run would make bind fail.
    let _ = fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("failed to bind {}", socket_path.display()))?;
    info!(socket = %socket_path.display(), "coordinator listening");

    tokio::spawn(monitor::monitor_leases(
        Arc::clone(&scheduler),
        config.monitor_interval,
        config.lease,
    ));

    let service = CoordinatorServer::new(CoordinatorService::new(Arc::clone(&scheduler)));
    let result = Server::builder()
        .add_service(service)
        .serve_with_incoming_shutdown(
            UnixListenerStream::new(listener),
            wait_until_done(scheduler, config.done_poll_interval, config.shutdown_grace),
        )
        .await;

    let _ = fs::remove_file(&socket_path);
    result.context("coordinator server failed")?;
    info!("job complete, coordinator exiting");
    Ok(())
}

async fn wait_until_done(scheduler: Arc<Scheduler>, poll: Duration, grace: Duration) {
    while !scheduler.is_job_done() {
        tokio::time::sleep(poll).await;
    }
    info!(grace = ?grace, "all tasks committed, shutting down");
    tokio::time::sleep(grace).await;
}
