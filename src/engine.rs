use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use itertools::Itertools;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::codec;
use crate::task::{MapTask, ReduceTask};
use crate::*;

// types related to this engine
type BucketIndex = u32;
type Buckets = DashMap<BucketIndex, Vec<KeyValue>>;

/// Partition → intermediate file written by a map task.
pub type PartitionFiles = HashMap<u32, String>;

/// Run the map function over one input chunk and shuffle its output into
/// `n_reduce` partition files under `intermediate_dir`.
///
/// Only non-empty partitions get a file. File names depend on the task
/// identity and partition alone, so running the same task again replaces
/// its earlier output.
pub fn perform_map(
    task: &MapTask,
    engine: &Workload,
    n_reduce: u32,
    intermediate_dir: &Path,
) -> Result<PartitionFiles> {
    if n_reduce == 0 {
        bail!("n_reduce must be at least 1");
    }
    let contents = fs::read_to_string(&task.input_path)
        .with_context(|| format!("failed to read input {}", task.input_path))?;

    let buckets = Buckets::new();
    let map_func = engine.map_fn;
    for item in map_func(&task.input_path, &contents)? {
        let kv = item?;
        let bucket_no = partition_for(&kv.key, n_reduce);
        #[allow(clippy::unwrap_or_default)]
        buckets.entry(bucket_no).or_insert(Vec::new()).push(kv);
    }

    let mut files = PartitionFiles::new();
    for (bucket_no, key_values) in buckets.into_iter() {
        let path = codec::intermediate_path(intermediate_dir, task.id, bucket_no);
        codec::write_records(&path, &key_values)?;
        files.insert(bucket_no, path.to_string_lossy().into_owned());
    }
    Ok(files)
}

/// Merge every intermediate file of one partition, group the records by
/// key and write `mr-out-<partition>` with one `<key> <value>` line per key,
/// keys in byte-wise ascending order.
pub fn perform_reduce(task: &ReduceTask, engine: &Workload, output_dir: &Path) -> Result<PathBuf> {
    let mut records = Vec::new();
    for path in &task.input_paths {
        records.extend(codec::read_records(Path::new(path))?);
    }
    // Stable, so values keep the order they were read in.
    records.sort_by(|a, b| a.key.cmp(&b.key));

    let reduce_func = engine.reduce_fn;
    let out_path = codec::output_path(output_dir, task.partition);
    codec::write_atomically(&out_path, |out| {
        for (key, value_group) in &records.into_iter().chunk_by(|kv| kv.key.clone()) {
            let iter = value_group.map(KeyValue::into_value);
            let value = reduce_func(&key, Box::new(iter))
                .with_context(|| format!("reduce failed for key `{key}`"))?;
            writeln!(out, "{key} {value}")?;
        }
        Ok(())
    })?;
    Ok(out_path)
}
