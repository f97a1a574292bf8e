use clap::Parser;
use std::path::PathBuf;

use crate::worker::WorkerConfig;
use crate::DEFAULT_SOCKET_PATH;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Unix socket of the coordinator to join
    #[clap(short, long, default_value = None)]
    pub join: Option<PathBuf>,
    /// Name of the workload to run
    #[clap(short, long, default_value = "wc")]
    pub workload: String,
    /// Where map output is written (default `intermediates`)
    #[clap(short, long, default_value = None)]
    pub intermediate_dir: Option<PathBuf>,
    /// Where `mr-out-*` files are written (default `.`)
    #[clap(short, long, default_value = None)]
    pub output_dir: Option<PathBuf>,
    /// Name reported to the coordinator
    #[clap(short, long, default_value = None)]
    pub name: Option<String>,
    /// Exit after executing this many tasks
    #[clap(long, default_value = None)]
    pub max_tasks: Option<usize>,
}

impl Args {
    pub fn config(&self) -> WorkerConfig {
        let mut config = WorkerConfig::new(
            self.join
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH)),
        );
        if let Some(dir) = &self.intermediate_dir {
            config.intermediate_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        config.max_tasks = self.max_tasks;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_INTERMEDIATE_DIR;

    #[test]
    fn worker_defaults() {
        let args = Args::parse_from(["mrl-worker"]);
        let config = args.config();
        assert_eq!(args.workload, "wc");
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(config.intermediate_dir, PathBuf::from(DEFAULT_INTERMEDIATE_DIR));
        assert_eq!(config.max_tasks, None);
    }

    #[test]
    fn worker_flags() {
        let args = Args::parse_from([
            "mrl-worker",
            "--join",
            "/tmp/mr.sock",
            "-w",
            "indexer",
            "--name",
            "w1",
            "--max-tasks",
            "3",
        ]);
        let config = args.config();
        assert_eq!(args.workload, "indexer");
        assert_eq!(config.socket_path, PathBuf::from("/tmp/mr.sock"));
        assert_eq!(config.name, "w1");
        assert_eq!(config.max_tasks, Some(3));
    }
}
