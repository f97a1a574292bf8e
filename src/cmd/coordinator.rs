use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::coordinator::CoordinatorConfig;
use crate::{DEFAULT_CHUNK_DIR, DEFAULT_LEASE_SECS, DEFAULT_N_REDUCE, DEFAULT_SOCKET_PATH};

/// Upper bound for `--n-reduce`; one reduce slot is allocated per partition.
pub const MAX_N_REDUCE: i64 = 65_536;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Input files or glob patterns; each file becomes one map task
    #[clap(required = true)]
    pub inputs: Vec<String>,
    /// Number of reduce partitions (default 10)
    #[clap(short = 'r', long, default_value = None, value_parser = clap::value_parser!(u32).range(1..=MAX_N_REDUCE))]
    pub n_reduce: Option<u32>,
    /// Unix socket to listen on
    #[clap(short, long, default_value = None)]
    pub socket: Option<PathBuf>,
    /// Seconds a worker may hold a task before it is reassigned (default 10s)
    #[clap(short = 't', long, default_value = None)]
    pub lease_secs: Option<u64>,
    /// Split every input into this many line-oriented chunks first
    #[clap(short, long, default_value = None)]
    pub chunks: Option<usize>,
    /// Where chunk files are written
    #[clap(long, default_value = None)]
    pub chunk_dir: Option<PathBuf>,
}

impl Args {
    pub fn config(&self) -> CoordinatorConfig {
        let mut config = CoordinatorConfig::new(
            self.socket
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH)),
        );
        config.n_reduce = self.n_reduce.unwrap_or(DEFAULT_N_REDUCE);
        config.lease = Duration::from_secs(self.lease_secs.unwrap_or(DEFAULT_LEASE_SECS));
        config
    }

    pub fn chunk_dir(&self) -> PathBuf {
        self.chunk_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CHUNK_DIR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_flags() {
        let args = Args::parse_from(["mrl-coordinator", "pg-*.txt"]);
        let config = args.config();
        assert_eq!(args.inputs, vec!["pg-*.txt".to_string()]);
        assert_eq!(config.n_reduce, DEFAULT_N_REDUCE);
        assert_eq!(config.lease, Duration::from_secs(DEFAULT_LEASE_SECS));
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(args.chunk_dir(), PathBuf::from(DEFAULT_CHUNK_DIR));
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "mrl-coordinator",
            "-r",
            "3",
            "-t",
            "2",
            "--socket",
            "/tmp/mr.sock",
            "--chunks",
            "5",
            "a.txt",
            "b.txt",
        ]);
        let config = args.config();
        assert_eq!(config.n_reduce, 3);
        assert_eq!(config.lease, Duration::from_secs(2));
        assert_eq!(config.socket_path, PathBuf::from("/tmp/mr.sock"));
        assert_eq!(args.chunks, Some(5));
        assert_eq!(args.inputs.len(), 2);
    }

    #[test]
    fn n_reduce_must_be_in_range() {
        assert!(Args::try_parse_from(["mrl-coordinator", "-r", "0", "a.txt"]).is_err());
        assert!(Args::try_parse_from(["mrl-coordinator", "-r", "65537", "a.txt"]).is_err());
        let args = Args::try_parse_from(["mrl-coordinator", "-r", "65536", "a.txt"]).unwrap();
        assert_eq!(args.n_reduce, Some(65_536));
    }
}
