//! Helpers shared by the binaries: input expansion, chunking and log setup.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::codec::write_atomically;

/// Expand glob patterns into the list of files they match.
///
/// Fails when a pattern is malformed or nothing matches at all.
pub fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let paths = glob::glob(pattern).with_context(|| format!("bad input pattern `{pattern}`"))?;
        for path in paths {
            let path = path?;
            if path.is_file() {
                files.push(path);
            }
        }
    }
    if files.is_empty() {
        bail!("no input files match {patterns:?}");
    }
    Ok(files)
}

/// Split `path` line-wise into at most `n` chunk files in `chunk_dir`,
/// named `<file name>-<i>`.
///
/// Every chunk but the last holds the same number of lines. A file with
/// fewer lines than `n` yields fewer chunks; an empty file yields one
/// empty chunk.
pub fn split_into_chunks(path: &Path, n: usize, chunk_dir: &Path) -> Result<Vec<PathBuf>> {
    if n == 0 {
        bail!("cannot split into 0 chunks");
    }
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let lines = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to read {}", path.display()))?;

    let name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?
        .to_string_lossy();
    let per_chunk = lines.len().div_ceil(n).max(1);

    let mut chunks = Vec::new();
    let mut pieces: Vec<&[String]> = lines.chunks(per_chunk).collect();
    if pieces.is_empty() {
        pieces.push(&[]);
    }
    for (i, piece) in pieces.into_iter().enumerate() {
        let chunk = chunk_dir.join(format!("{name}-{i}"));
        write_atomically(&chunk, |out| {
            for line in piece {
                writeln!(out, "{line}")?;
            }
            Ok(())
        })?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// Resolve the coordinator's input patterns into map task inputs,
/// optionally splitting each file into `chunks` pieces first.
pub fn prepare_inputs(
    patterns: &[String],
    chunks: Option<usize>,
    chunk_dir: &Path,
) -> Result<Vec<String>> {
    let files = expand_inputs(patterns)?;
    let inputs = match chunks {
        Some(n) => {
            let mut all = Vec::new();
            for file in &files {
                all.extend(split_into_chunks(file, n, chunk_dir)?);
            }
            all
        }
        None => files,
    };
    Ok(inputs
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect())
}

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default of `mrlease=info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mrlease=info"));
    // Already installed, e.g. by a test harness.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
