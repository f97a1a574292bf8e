//! Task descriptors handed from the coordinator to workers.
//!
//! The set of task kinds is closed, so a task is an enum rather than a
//! trait object; every consumer matches on it exhaustively.

use anyhow::{Context, Result};
use std::fmt;
use uuid::Uuid;

use crate::rpc;
use crate::rpc::lease_task_reply::Outcome;

/// Identity of a task. It never changes, including when an expired lease
/// puts the task back in a pending queue.
pub type TaskId = Uuid;

pub fn parse_task_id(id: &str) -> Result<TaskId> {
    Uuid::parse_str(id).with_context(|| format!("malformed task id `{id}`"))
}

/// Processes one input chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapTask {
    pub id: TaskId,
    pub input_path: String,
}

impl MapTask {
    /// A new map task with a fresh identity.
    pub fn new(input_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_path: input_path.into(),
        }
    }
}

/// Processes every intermediate file routed to one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceTask {
    pub id: TaskId,
    pub partition: u32,
    pub input_paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Map,
    Reduce,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Map => "map",
            TaskKind::Reduce => "reduce",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Map(MapTask),
    Reduce(ReduceTask),
}

impl Task {
    pub fn id(&self) -> TaskId {
        match self {
            Task::Map(task) => task.id,
            Task::Reduce(task) => task.id,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Task::Map(_) => TaskKind::Map,
            Task::Reduce(_) => TaskKind::Reduce,
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
// Wire conversions
/////////////////////////////////////////////////////////////////////////////

impl From<MapTask> for rpc::MapTask {
    fn from(task: MapTask) -> Self {
        Self {
            id: task.id.to_string(),
            input_path: task.input_path,
        }
    }
}

impl From<ReduceTask> for rpc::ReduceTask {
    fn from(task: ReduceTask) -> Self {
        Self {
            id: task.id.to_string(),
            partition: task.partition,
            input_paths: task.input_paths,
        }
    }
}

impl From<Task> for Outcome {
    fn from(task: Task) -> Self {
        match task {
            Task::Map(task) => Outcome::Map(task.into()),
            Task::Reduce(task) => Outcome::Reduce(task.into()),
        }
    }
}

impl TryFrom<rpc::MapTask> for MapTask {
    type Error = anyhow::Error;

    fn try_from(task: rpc::MapTask) -> Result<Self> {
        Ok(Self {
            id: parse_task_id(&task.id)?,
            input_path: task.input_path,
        })
    }
}

impl TryFrom<rpc::ReduceTask> for ReduceTask {
    type Error = anyhow::Error;

    fn try_from(task: rpc::ReduceTask) -> Result<Self> {
        Ok(Self {
            id: parse_task_id(&task.id)?,
            partition: task.partition,
            input_paths: task.input_paths,
        })
    }
}
