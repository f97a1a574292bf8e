//! Coordinator-side task bookkeeping.
//!
//! Each structure guards itself with its own lock, so every method here is
//! atomic on its own. Keeping the three structures consistent with each
//! other (the phase barrier, "pending or running, never both") is the
//! scheduler's job.

use anyhow::{bail, Result};
use fnv::FnvHashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::task::{MapTask, ReduceTask, Task, TaskId, TaskKind};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/////////////////////////////////////////////////////////////////////////////
// Pending map tasks
/////////////////////////////////////////////////////////////////////////////

/// Map tasks waiting for a worker. Pop order is last-in-first-out.
#[derive(Debug, Default)]
pub struct PendingMapQueue {
    tasks: Mutex<Vec<MapTask>>,
}

impl PendingMapQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a map task for `input_path` and queue it.
    pub fn add_map_task(&self, input_path: impl Into<String>) -> TaskId {
        let task = MapTask::new(input_path);
        let id = task.id;
        self.push(task);
        id
    }

    /// Queue an existing task, keeping its identity.
    pub fn push(&self, task: MapTask) {
        lock(&self.tasks).push(task);
    }

    pub fn take_map_task(&self) -> Option<MapTask> {
        lock(&self.tasks).pop()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.tasks).is_empty()
    }

    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }
}

/////////////////////////////////////////////////////////////////////////////
// Pending reduce partitions
/////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone)]
struct ReduceSlot {
    id: TaskId,
    input_paths: Vec<String>,
}

impl ReduceSlot {
    fn add_path(&mut self, path: String) {
        if !self.input_paths.contains(&path) {
            self.input_paths.push(path);
        }
    }
}

/// One slot per partition. A slot has work iff its file list is non-empty;
/// the list is the only source of truth for that.
#[derive(Debug)]
pub struct PendingReduceJobs {
    slots: Mutex<Vec<ReduceSlot>>,
    n_reduce: u32,
}

impl PendingReduceJobs {
    pub fn new(n_reduce: u32) -> Self {
        let slots = (0..n_reduce)
            .map(|_| ReduceSlot {
                id: Uuid::new_v4(),
                input_paths: Vec::new(),
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
            n_reduce,
        }
    }

    pub fn n_reduce(&self) -> u32 {
        self.n_reduce
    }

    /// Identity of the reduce task for `partition`.
    pub fn task_id(&self, partition: u32) -> Option<TaskId> {
        lock(&self.slots).get(partition as usize).map(|slot| slot.id)
    }

    pub fn add_reduce_input(&self, partition: u32, path: impl Into<String>) -> Result<()> {
        self.add_reduce_inputs([(partition, path.into())])
    }

    /// Record several intermediate files at once. Either every path is
    /// recorded or, if any partition is out of range, none is.
    pub fn add_reduce_inputs<I>(&self, files: I) -> Result<()>
    where
        I: IntoIterator<Item = (u32, String)>,
    {
        let mut files: Vec<(u32, String)> = files.into_iter().collect();
        if let Some((partition, _)) = files.iter().find(|(p, _)| *p >= self.n_reduce) {
            bail!(
                "partition {} out of range (n_reduce = {})",
                partition,
                self.n_reduce
            );
        }
        files.sort();

        let mut slots = lock(&self.slots);
        for (partition, path) in files {
            slots[partition as usize].add_path(path);
        }
        Ok(())
    }

    /// Take the lowest partition that has work, clearing its file list.
    pub fn take_reduce_task(&self) -> Option<ReduceTask> {
        let mut slots = lock(&self.slots);
        let (partition, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.input_paths.is_empty())?;
        Some(ReduceTask {
            id: slot.id,
            partition: partition as u32,
            input_paths: std::mem::take(&mut slot.input_paths),
        })
    }

    /// Put a leased reduce task back. Its files go in front of anything
    /// recorded for the partition since it was taken.
    pub fn restore(&self, task: ReduceTask) {
        let mut slots = lock(&self.slots);
        let Some(slot) = slots.get_mut(task.partition as usize) else {
            return;
        };
        let arrived = std::mem::replace(&mut slot.input_paths, task.input_paths);
        for path in arrived {
            slot.add_path(path);
        }
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.slots)
            .iter()
            .all(|slot| slot.input_paths.is_empty())
    }

    /// Number of partitions with work.
    pub fn len(&self) -> usize {
        lock(&self.slots)
            .iter()
            .filter(|slot| !slot.input_paths.is_empty())
            .count()
    }
}

/////////////////////////////////////////////////////////////////////////////
// Running tasks
/////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone)]
pub struct RunningTask {
    pub task: Task,
    pub started_at: Instant,
}

/// Leased tasks keyed by identity.
#[derive(Debug, Default)]
pub struct RunningTasks {
    tasks: Mutex<FnvHashMap<TaskId, RunningTask>>,
}

impl RunningTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, task: Task, started_at: Instant) {
        lock(&self.tasks).insert(task.id(), RunningTask { task, started_at });
    }

    /// Removing an identity that is not running is not an error.
    pub fn remove(&self, id: &TaskId) -> Option<RunningTask> {
        lock(&self.tasks).remove(id)
    }

    pub fn kind_of(&self, id: &TaskId) -> Option<TaskKind> {
        lock(&self.tasks).get(id).map(|running| running.task.kind())
    }

    pub fn has_map_task(&self) -> bool {
        lock(&self.tasks)
            .values()
            .any(|running| running.task.kind() == TaskKind::Map)
    }

    /// Remove and return every task leased longer than `lease` before `now`.
    pub fn take_expired(&self, now: Instant, lease: Duration) -> Vec<Task> {
        let mut expired = Vec::new();
        lock(&self.tasks).retain(|_, running| {
            if now.saturating_duration_since(running.started_at) > lease {
                expired.push(running.task.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.tasks).is_empty()
    }

    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }
}
