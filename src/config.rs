//! Command-line arguments and the validated run configuration built from them.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::retry::RetryPolicy;
use crate::{Error, Result};

const DEFAULT_CLUSTER_NAME: &str = "etcd-restore";

/// Restore an etcd snapshot into a fresh kind cluster
#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    /// Path to the etcd snapshot file
    #[arg(value_name = "SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Name of the kind cluster to create
    #[arg(long, env = "ETCD_RESTORE_CLUSTER_NAME", default_value = DEFAULT_CLUSTER_NAME)]
    pub cluster_name: String,

    /// Number of worker nodes next to the control plane
    #[arg(long, env = "ETCD_RESTORE_WORKERS", default_value = "2")]
    pub workers: u32,

    /// kind node image (kind's default when unset)
    #[arg(long, env = "ETCD_RESTORE_NODE_IMAGE")]
    pub node_image: Option<String>,

    /// Attempts for the snapshot restore before giving up
    #[arg(long, env = "ETCD_RESTORE_RETRIES", default_value = "3")]
    pub retries: u32,

    /// Seconds to wait between restore attempts
    #[arg(long, env = "ETCD_RESTORE_RETRY_DELAY_SECS", default_value = "2")]
    pub retry_delay_secs: u64,

    /// etcdctl binary inside the control-plane container. It must exist in the
    /// node image: stock kindest/node images may not ship it, in which case pass
    /// a path to a copy you placed in the node (or use a custom --node-image)
    #[arg(long, env = "ETCD_RESTORE_ETCDCTL", default_value = "etcdctl")]
    pub etcdctl: String,

    /// Where to write the cluster kubeconfig (default: /tmp/<cluster>-kubeconfig)
    #[arg(long, env = "ETCD_RESTORE_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Seconds to wait for all nodes to report Ready
    #[arg(long, env = "ETCD_RESTORE_READY_TIMEOUT_SECS", default_value = "180")]
    pub ready_timeout_secs: u64,

    /// Timeout for the entire run in seconds
    #[arg(long, env = "ETCD_RESTORE_TIMEOUT_SECS", default_value = "900")]
    pub timeout_secs: u64,

    /// Skip cluster deletion on failure (for debugging)
    #[arg(long)]
    pub keep_cluster_on_failure: bool,

    /// Dry run - show what would be done without invoking any tool
    #[arg(long)]
    pub dry_run: bool,
}

/// Validated configuration for a restore run
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub snapshot: PathBuf,
    pub cluster_name: String,
    pub workers: u32,
    pub node_image: Option<String>,
    pub retry: RetryPolicy,
    pub etcdctl: String,
    pub kubeconfig: PathBuf,
    pub ready_timeout: Duration,
    pub timeout: Duration,
    pub keep_cluster_on_failure: bool,
    pub dry_run: bool,
}

impl RestoreConfig {
    /// Validate arguments; input problems are reported before any tool runs
    pub fn from_args(args: RestoreArgs) -> Result<Self> {
        let snapshot = args.snapshot.ok_or(Error::MissingSnapshot)?;

        let metadata = match std::fs::metadata(&snapshot) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SnapshotNotFound { path: snapshot })
            }
            Err(e) => return Err(Error::Io(e)),
        };
        if !metadata.is_file() {
            return Err(Error::validation(format!(
                "snapshot path is not a regular file: {}",
                snapshot.display()
            )));
        }
        if metadata.len() == 0 {
            return Err(Error::validation(format!(
                "snapshot file is empty: {}",
                snapshot.display()
            )));
        }

        if args.retries == 0 {
            return Err(Error::validation("--retries must be at least 1"));
        }
        if args.workers == 0 {
            return Err(Error::validation(
                "--workers must be at least 1 for a multi-node cluster",
            ));
        }
        if args.cluster_name.trim().is_empty() {
            return Err(Error::validation("--cluster-name must not be empty"));
        }

        let kubeconfig = args
            .kubeconfig
            .unwrap_or_else(|| PathBuf::from(format!("/tmp/{}-kubeconfig", args.cluster_name)));

        Ok(Self {
            snapshot,
            cluster_name: args.cluster_name,
            workers: args.workers,
            node_image: args.node_image,
            retry: RetryPolicy::fixed(args.retries, Duration::from_secs(args.retry_delay_secs)),
            etcdctl: args.etcdctl,
            kubeconfig,
            ready_timeout: Duration::from_secs(args.ready_timeout_secs),
            timeout: Duration::from_secs(args.timeout_secs),
            keep_cluster_on_failure: args.keep_cluster_on_failure,
            dry_run: args.dry_run,
        })
    }

    /// Snapshot path as a UTF-8 string for command lines
    pub fn snapshot_str(&self) -> Result<&str> {
        self.snapshot
            .to_str()
            .ok_or_else(|| Error::validation("snapshot path contains invalid UTF-8"))
    }

    pub fn kubeconfig_str(&self) -> Result<&str> {
        self.kubeconfig
            .to_str()
            .ok_or_else(|| Error::validation("kubeconfig path contains invalid UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RestoreArgs,
    }

    fn parse(argv: &[&str]) -> RestoreArgs {
        let mut full = vec!["etcd-restore"];
        full.extend_from_slice(argv);
        TestCli::parse_from(full).args
    }

    fn snapshot_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"etcd snapshot bytes").unwrap();
        f
    }

    #[test]
    fn missing_snapshot_is_invalid_input() {
        let err = RestoreConfig::from_args(parse(&[])).unwrap_err();
        assert!(matches!(err, Error::MissingSnapshot));
    }

    #[test]
    fn nonexistent_snapshot_is_reported_with_path() {
        let err = RestoreConfig::from_args(parse(&["/no/such/snapshot.db"])).unwrap_err();
        match err {
            Error::SnapshotNotFound { path } => {
                assert_eq!(path, PathBuf::from("/no/such/snapshot.db"))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            RestoreConfig::from_args(parse(&[dir.path().to_str().unwrap()])).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn empty_file_is_rejected() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let err = RestoreConfig::from_args(parse(&[f.path().to_str().unwrap()])).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn defaults_are_applied() {
        let f = snapshot_file();
        let config = RestoreConfig::from_args(parse(&[f.path().to_str().unwrap()])).unwrap();

        assert_eq!(config.cluster_name, "etcd-restore");
        assert_eq!(config.workers, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(2));
        assert_eq!(config.etcdctl, "etcdctl");
        assert_eq!(
            config.kubeconfig,
            PathBuf::from("/tmp/etcd-restore-kubeconfig")
        );
        assert!(!config.dry_run);
        assert!(!config.keep_cluster_on_failure);
    }

    #[test]
    fn zero_retries_or_workers_rejected() {
        let f = snapshot_file();
        let path = f.path().to_str().unwrap();

        let err = RestoreConfig::from_args(parse(&[path, "--retries", "0"])).unwrap_err();
        assert!(err.to_string().contains("--retries"));

        let err = RestoreConfig::from_args(parse(&[path, "--workers", "0"])).unwrap_err();
        assert!(err.to_string().contains("--workers"));
    }

    #[test]
    fn flags_override_defaults() {
        let f = snapshot_file();
        let config = RestoreConfig::from_args(parse(&[
            f.path().to_str().unwrap(),
            "--cluster-name",
            "drill",
            "--workers",
            "3",
            "--retries",
            "5",
            "--kubeconfig",
            "/tmp/custom",
            "--keep-cluster-on-failure",
        ]))
        .unwrap();

        assert_eq!(config.cluster_name, "drill");
        assert_eq!(config.workers, 3);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.kubeconfig, PathBuf::from("/tmp/custom"));
        assert!(config.keep_cluster_on_failure);
    }
}
