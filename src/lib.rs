//! A lease-based MapReduce (lite) system.
//!
//! A single coordinator splits a job into Map and Reduce tasks and hands
//! them out over gRPC on a Unix-domain socket. Workers are stateless: they
//! lease a task, run the application's map or reduce function against the
//! local filesystem and report back. A task whose lease runs out is handed
//! to another worker, so crashed or hung workers only cost time.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod cmd;
pub mod codec;
pub mod coordinator;
pub mod engine;
pub mod queue;
pub mod task;
pub mod utils;
pub mod worker;
pub mod workload;

/// Generated gRPC types for the coordinator service.
pub mod rpc {
    tonic::include_proto!("mapreduce");
}

/// Where the coordinator listens when no socket path is given.
pub const DEFAULT_SOCKET_PATH: &str = "/var/tmp/mrlease-coordinator.sock";
pub const DEFAULT_N_REDUCE: u32 = 10;
/// Seconds a worker may hold a task before it is handed out again.
pub const DEFAULT_LEASE_SECS: u64 = 10;
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_DONE_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// How long the coordinator keeps answering after the job is done, so that
/// polling workers are told to exit instead of finding a dead socket.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(3);
pub const DEFAULT_POLL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RPC_RETRIES: u32 = 5;
pub const DEFAULT_INTERMEDIATE_DIR: &str = "intermediates";
pub const DEFAULT_CHUNK_DIR: &str = "chunks";

/////////////////////////////////////////////////////////////////////////////
// MapReduce application types
/////////////////////////////////////////////////////////////////////////////

/// The output of an application map function.
///
/// There are 2 layers of [`anyhow::Result`]s here. The outer layer
/// accounts for errors that arise while creating the iterator.
/// The inner layer accounts for errors that occur during iteration.
pub type MapOutput = anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<KeyValue>>>>;

/// A map function takes a document name and the document's full contents.
///
/// It returns an iterator that yields intermediate key-value pairs.
pub type MapFn = fn(name: &str, contents: &str) -> MapOutput;

/// A reduce function takes in a key and an iterator over every value
/// emitted for that key, in the order they were read. It returns the
/// single output value for the key.
pub type ReduceFn =
    fn(key: &str, values: Box<dyn Iterator<Item = String> + '_>) -> anyhow::Result<String>;

/// A map reduce application.
#[derive(Copy, Clone)]
pub struct Workload {
    pub map_fn: MapFn,
    pub reduce_fn: ReduceFn,
}

/////////////////////////////////////////////////////////////////////////////
// Key-value pairs
/////////////////////////////////////////////////////////////////////////////

/// A single key-value pair.
///
/// This is also the intermediate record: it is written one JSON object per
/// line as `{"Key":...,"Value":...}`.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyValue {
    /// The key.
    pub key: String,
    /// The value.
    pub value: String,
}

impl KeyValue {
    /// Construct a new key-value pair from the given key and value.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Get the key of this key-value pair.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the value of this key-value pair.
    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Consumes the key-value pair and returns the value.
    #[inline]
    pub fn into_value(self) -> String {
        self.value
    }
}

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// Hashes an intermediate key with 32-bit FNV-1a, masked to 31 bits.
///
/// The result only depends on the key bytes, so it is stable across
/// processes and retries.
pub fn ihash(key: &[u8]) -> u32 {
    let hash = key.iter().fold(FNV32_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV32_PRIME)
    });
    hash & 0x7fff_ffff
}

/// Compute the reduce partition of a key: `ihash(key) % n_reduce`.
#[inline]
pub fn partition_for(key: &str, n_reduce: u32) -> u32 {
    ihash(key.as_bytes()) % n_reduce
}
