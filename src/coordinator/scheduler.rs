//! Dispatch policy, completion reports and lease reclaim.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::queue::{PendingMapQueue, PendingReduceJobs, RunningTasks};
use crate::task::{Task, TaskId, TaskKind};

/// Answer to a worker asking for work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lease {
    Assigned(Task),
    /// Nothing can be handed out right now; ask again later.
    NoWorkYet,
    /// Every task has committed.
    JobDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStatus {
    pub pending_map: usize,
    pub pending_reduce: usize,
    pub running: usize,
    pub done: bool,
}

/// State of one job. Several schedulers can live in one process.
///
/// Every transition that touches more than one structure runs under
/// `transition`, which is always taken before any queue lock. Outside a
/// transition a task is therefore in exactly one of the pending queues or
/// the running registry, and a Reduce task is only handed out once no Map
/// task is pending or running.
#[derive(Debug)]
pub struct Scheduler {
    pending_map: PendingMapQueue,
    pending_reduce: PendingReduceJobs,
    running: RunningTasks,
    transition: Mutex<()>,
    done: AtomicBool,
}

impl Scheduler {
    /// A scheduler with one map task per input chunk and `n_reduce`
    /// partitions.
    pub fn new<I, S>(inputs: I, n_reduce: u32) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if n_reduce == 0 {
            bail!("n_reduce must be at least 1");
        }
        let pending_map = PendingMapQueue::new();
        for input in inputs {
            pending_map.add_map_task(input);
        }
        Ok(Self {
            pending_map,
            pending_reduce: PendingReduceJobs::new(n_reduce),
            running: RunningTasks::new(),
            transition: Mutex::new(()),
            done: AtomicBool::new(false),
        })
    }

    pub fn n_reduce(&self) -> u32 {
        self.pending_reduce.n_reduce()
    }

    fn transition(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lease_task(&self) -> Lease {
        self.lease_task_at(Instant::now())
    }

    /// Hand out the next task, recording `now` as its lease start.
    ///
    /// Map tasks go first. While any map task is still running nothing else
    /// is handed out, since a reduce task must see every file of its
    /// partition.
    pub fn lease_task_at(&self, now: Instant) -> Lease {
        let _guard = self.transition();

        if let Some(task) = self.pending_map.take_map_task() {
            let task = Task::Map(task);
            self.running.add(task.clone(), now);
            return Lease::Assigned(task);
        }
        if self.running.has_map_task() {
            return Lease::NoWorkYet;
        }
        if let Some(task) = self.pending_reduce.take_reduce_task() {
            let task = Task::Reduce(task);
            self.running.add(task.clone(), now);
            return Lease::Assigned(task);
        }
        if self.running.is_empty() {
            self.done.store(true, Ordering::Release);
            Lease::JobDone
        } else {
            Lease::NoWorkYet
        }
    }

    /// Commit a map task and make its partition files visible to reduce.
    ///
    /// Returns `Ok(false)` when the task is not currently leased (the report
    /// is late or a duplicate) and changes nothing. An out-of-range
    /// partition rejects the whole report and the task stays leased.
    pub fn report_map_done(&self, id: TaskId, files: HashMap<u32, String>) -> Result<bool> {
        let _guard = self.transition();

        if self.running.kind_of(&id) != Some(TaskKind::Map) {
            debug!(task = %id, "map report for a task that is not leased");
            return Ok(false);
        }
        self.pending_reduce.add_reduce_inputs(files)?;
        self.running.remove(&id);
        Ok(true)
    }

    /// Commit a reduce task. Returns `false` if it was not leased.
    pub fn report_reduce_done(&self, id: TaskId) -> bool {
        let _guard = self.transition();

        if self.running.kind_of(&id) != Some(TaskKind::Reduce) {
            debug!(task = %id, "reduce report for a task that is not leased");
            return false;
        }
        self.running.remove(&id).is_some()
    }

    /// True once nothing is pending or running. Never goes back to false.
    pub fn is_job_done(&self) -> bool {
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        let _guard = self.transition();
        let done = self.pending_map.is_empty()
            && self.pending_reduce.is_empty()
            && self.running.is_empty();
        if done {
            self.done.store(true, Ordering::Release);
        }
        done
    }

    pub fn reclaim_expired(&self, lease: Duration) -> Vec<TaskId> {
        self.reclaim_expired_at(Instant::now(), lease)
    }

    /// Move every task leased for longer than `lease` back to its pending
    /// structure, identity unchanged.
    pub fn reclaim_expired_at(&self, now: Instant, lease: Duration) -> Vec<TaskId> {
        let _guard = self.transition();

        let expired = self.running.take_expired(now, lease);
        let mut reclaimed = Vec::with_capacity(expired.len());
        for task in expired {
            let id = task.id();
            match task {
                Task::Map(task) => {
                    warn!(task = %id, input = %task.input_path, "map lease expired, requeueing");
                    self.pending_map.push(task);
                }
                Task::Reduce(task) => {
                    warn!(task = %id, partition = task.partition, "reduce lease expired, requeueing");
                    self.pending_reduce.restore(task);
                }
            }
            reclaimed.push(id);
        }
        reclaimed
    }

    pub fn status(&self) -> JobStatus {
        let _guard = self.transition();
        let pending_map = self.pending_map.len();
        let pending_reduce = self.pending_reduce.len();
        let running = self.running.len();
        JobStatus {
            pending_map,
            pending_reduce,
            running,
            done: self.done.load(Ordering::Acquire)
                || (pending_map == 0 && pending_reduce == 0 && running == 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{MapTask, ReduceTask};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    fn expect_map(lease: Lease) -> MapTask {
        match lease {
            Lease::Assigned(Task::Map(task)) => task,
            other => panic!("expected a map task, got {other:?}"),
        }
    }

    fn expect_reduce(lease: Lease) -> ReduceTask {
        match lease {
            Lease::Assigned(Task::Reduce(task)) => task,
            other => panic!("expected a reduce task, got {other:?}"),
        }
    }

    fn files(pairs: &[(u32, &str)]) -> HashMap<u32, String> {
        pairs.iter().map(|(p, f)| (*p, f.to_string())).collect()
    }

    #[test]
    fn zero_partitions_is_rejected() {
        assert!(Scheduler::new(["a"], 0).is_err());
    }

    #[test]
    fn reduce_waits_for_running_maps() {
        let scheduler = Scheduler::new(["a", "b"], 2).unwrap();
        let first = expect_map(scheduler.lease_task());
        let second = expect_map(scheduler.lease_task());

        // Both maps leased, none committed.
        assert_eq!(scheduler.lease_task(), Lease::NoWorkYet);

        assert!(scheduler
            .report_map_done(first.id, files(&[(0, "1-0")]))
            .unwrap());
        assert_eq!(scheduler.lease_task(), Lease::NoWorkYet);

        assert!(scheduler
            .report_map_done(second.id, files(&[(0, "2-0"), (1, "2-1")]))
            .unwrap());
        let reduce = expect_reduce(scheduler.lease_task());
        assert_eq!(reduce.partition, 0);
        assert_eq!(reduce.input_paths, vec!["1-0", "2-0"]);
    }

    #[test]
    fn job_done_once_everything_commits_and_stays_done() {
        let scheduler = Scheduler::new(["a"], 1).unwrap();
        assert!(!scheduler.is_job_done());

        let map = expect_map(scheduler.lease_task());
        assert!(!scheduler.is_job_done());
        scheduler
            .report_map_done(map.id, files(&[(0, "a-0")]))
            .unwrap();
        assert!(!scheduler.is_job_done());

        let reduce = expect_reduce(scheduler.lease_task());
        assert!(!scheduler.is_job_done());
        assert_eq!(scheduler.lease_task(), Lease::NoWorkYet);
        assert!(scheduler.report_reduce_done(reduce.id));

        assert!(scheduler.is_job_done());
        assert_eq!(scheduler.lease_task(), Lease::JobDone);

        // Late reports change nothing.
        assert!(!scheduler
            .report_map_done(map.id, files(&[(0, "a-0")]))
            .unwrap());
        assert!(!scheduler.report_reduce_done(reduce.id));
        assert!(scheduler.is_job_done());
    }

    #[test]
    fn map_without_output_still_finishes_the_job() {
        let scheduler = Scheduler::new(["empty"], 3).unwrap();
        let map = expect_map(scheduler.lease_task());
        assert!(scheduler.report_map_done(map.id, HashMap::new()).unwrap());
        assert_eq!(scheduler.lease_task(), Lease::JobDone);
        assert!(scheduler.is_job_done());
    }

    #[test]
    fn expired_map_lease_is_handed_out_again_with_same_identity() {
        let scheduler = Scheduler::new(["a"], 1).unwrap();
        let lease = Duration::from_secs(10);
        let start = Instant::now();

        let crashed = expect_map(scheduler.lease_task_at(start));
        assert!(scheduler
            .reclaim_expired_at(start + Duration::from_secs(5), lease)
            .is_empty());
        assert_eq!(scheduler.lease_task_at(start), Lease::NoWorkYet);

        let reclaimed = scheduler.reclaim_expired_at(start + Duration::from_secs(11), lease);
        assert_eq!(reclaimed, vec![crashed.id]);

        let retry = expect_map(scheduler.lease_task());
        assert_eq!(retry, crashed);
        assert!(scheduler
            .report_map_done(retry.id, files(&[(0, "a-0")]))
            .unwrap());
        // The original holder shows up late.
        assert!(!scheduler
            .report_map_done(crashed.id, files(&[(0, "a-0")]))
            .unwrap());

        let reduce = expect_reduce(scheduler.lease_task());
        assert_eq!(reduce.input_paths, vec!["a-0"]);
    }

    #[test]
    fn expired_reduce_lease_gets_its_files_back() {
        let scheduler = Scheduler::new(["a"], 1).unwrap();
        let map = expect_map(scheduler.lease_task());
        scheduler
            .report_map_done(map.id, files(&[(0, "a-0")]))
            .unwrap();

        let start = Instant::now();
        let reduce = expect_reduce(scheduler.lease_task_at(start));
        scheduler.reclaim_expired_at(start + Duration::from_secs(60), Duration::from_secs(10));
        assert!(!scheduler.is_job_done());

        let again = expect_reduce(scheduler.lease_task());
        assert_eq!(again, reduce);
        assert!(scheduler.report_reduce_done(again.id));
        assert!(scheduler.is_job_done());
    }

    #[test]
    fn bad_partition_rejects_report_and_keeps_lease() {
        let scheduler = Scheduler::new(["a"], 2).unwrap();
        let map = expect_map(scheduler.lease_task());
        assert!(scheduler
            .report_map_done(map.id, files(&[(0, "a-0"), (7, "a-7")]))
            .is_err());

        let status = scheduler.status();
        assert_eq!(status.running, 1);
        assert_eq!(status.pending_reduce, 0);
        assert!(!status.done);
    }

    #[test]
    fn reduce_report_for_map_task_is_ignored() {
        let scheduler = Scheduler::new(["a"], 1).unwrap();
        let map = expect_map(scheduler.lease_task());
        assert!(!scheduler.report_reduce_done(map.id));
        assert_eq!(scheduler.status().running, 1);
    }

    #[test]
    fn phase_barrier_holds_under_concurrent_workers() {
        const MAPS: usize = 40;
        const PARTITIONS: u32 = 5;

        let inputs: Vec<String> = (0..MAPS).map(|i| format!("chunk-{i}")).collect();
        let scheduler = Arc::new(Scheduler::new(inputs, PARTITIONS).unwrap());
        let committed_maps = Arc::new(AtomicUsize::new(0));
        let reduces_done = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let scheduler = Arc::clone(&scheduler);
                let committed_maps = Arc::clone(&committed_maps);
                let reduces_done = Arc::clone(&reduces_done);
                thread::spawn(move || loop {
                    match scheduler.lease_task() {
                        Lease::Assigned(Task::Map(task)) => {
                            let outputs = (0..PARTITIONS)
                                .map(|p| (p, format!("{}-{}", task.id, p)))
                                .collect();
                            committed_maps.fetch_add(1, Ordering::SeqCst);
                            assert!(scheduler.report_map_done(task.id, outputs).unwrap());
                        }
                        Lease::Assigned(Task::Reduce(task)) => {
                            assert_eq!(committed_maps.load(Ordering::SeqCst), MAPS);
                            assert_eq!(task.input_paths.len(), MAPS);
                            reduces_done.fetch_add(1, Ordering::SeqCst);
                            assert!(scheduler.report_reduce_done(task.id));
                        }
                        Lease::NoWorkYet => thread::yield_now(),
                        Lease::JobDone => break,
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(reduces_done.load(Ordering::SeqCst), PARTITIONS as usize);
        assert!(scheduler.is_job_done());
    }
}
