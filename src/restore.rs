//! Restore workflow - load an etcd snapshot into a throwaway kind cluster
//!
//! The run goes through these phases in order:
//! 1. Creating a multi-node kind cluster and waiting for its nodes
//! 2. Locating the control-plane node container
//! 3. Copying the snapshot into it
//! 4. Restoring the snapshot with etcdctl, with bounded retries
//! 5. Swapping the restored data in and killing etcd so it restarts
//! 6. Checking that the cluster comes back

use std::time::Instant;

use tracing::{info, warn};

use crate::config::RestoreConfig;
use crate::etcd::{self, EtcdMember};
use crate::kind::{self, KindClusterConfig};
use crate::kubectl;
use crate::runner::{tool_available, CommandRunner, TokioCommandRunner};
use crate::{Error, Result};

/// Tools that must be on PATH, with install hints
const REQUIRED_TOOLS: [(&str, &str); 3] = [
    (
        "docker",
        "Install Docker: https://docs.docker.com/get-docker/",
    ),
    (
        "kind",
        "Install kind: https://kind.sigs.k8s.io/docs/user/quick-start/#installation",
    ),
    (
        "kubectl",
        "Install kubectl: https://kubernetes.io/docs/tasks/tools/",
    ),
];

/// Drives one restore run
pub struct Restorer<R: CommandRunner = TokioCommandRunner> {
    config: RestoreConfig,
    runner: R,
}

impl Restorer<TokioCommandRunner> {
    pub fn new(config: RestoreConfig) -> Self {
        Self::with_runner(config, TokioCommandRunner)
    }
}

impl<R: CommandRunner> Restorer<R> {
    pub fn with_runner(config: RestoreConfig, runner: R) -> Self {
        Self { config, runner }
    }

    fn cluster_name(&self) -> &str {
        &self.config.cluster_name
    }

    fn topology(&self) -> KindClusterConfig {
        KindClusterConfig::multi_node(self.config.workers, self.config.node_image.as_deref())
    }

    /// Run the whole workflow, bounded by the configured timeout
    pub async fn run(&self) -> Result<()> {
        let start = Instant::now();

        if self.config.dry_run {
            return self.describe_plan();
        }

        self.run_inner().await?;

        info!("Restore complete in {:?}", start.elapsed());
        info!(
            "Cluster '{}' is running on the restored snapshot. kubeconfig: {}",
            self.cluster_name(),
            self.config.kubeconfig.display()
        );
        Ok(())
    }

    async fn run_inner(&self) -> Result<()> {
        self.check_prerequisites().await?;

        // The deadline only cancels the phases so the cleanup below still runs
        let result = match tokio::time::timeout(self.config.timeout, self.run_phases()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                secs: self.config.timeout.as_secs(),
            }),
        };

        if result.is_err() && !self.config.keep_cluster_on_failure {
            info!("Deleting cluster due to failure...");
            if let Err(e) = kind::delete_cluster(&self.runner, self.cluster_name()).await {
                warn!(error = %e, "Failed to delete cluster");
            }
        }

        result
    }

    async fn check_prerequisites(&self) -> Result<()> {
        info!("Checking prerequisites...");

        for (tool, hint) in REQUIRED_TOOLS {
            if !tool_available(&self.runner, tool).await? {
                return Err(Error::ToolMissing {
                    tool: tool.to_string(),
                    hint: hint.to_string(),
                });
            }
        }

        Ok(())
    }

    async fn run_phases(&self) -> Result<()> {
        let kubeconfig = self.config.kubeconfig_str()?;

        info!("[Phase 1] Creating kind cluster...");
        kind::create_cluster(&self.runner, self.cluster_name(), &self.topology()).await?;
        kind::export_kubeconfig(&self.runner, self.cluster_name(), &self.config.kubeconfig).await?;
        kubectl::wait_for_nodes_ready(&self.runner, kubeconfig, self.config.ready_timeout).await?;

        info!("[Phase 2] Locating control-plane container...");
        let container = kind::control_plane_container(&self.runner, self.cluster_name()).await?;
        info!(container = %container, "Found control plane");

        info!("[Phase 3] Copying snapshot...");
        kind::copy_into(
            &self.runner,
            &container,
            self.config.snapshot_str()?,
            etcd::SNAPSHOT_DEST,
        )
        .await?;

        info!("[Phase 4] Restoring snapshot...");
        let manifest = etcd::read_manifest(&self.runner, &container).await?;
        let member = EtcdMember::from_manifest(&manifest, &container)?;
        etcd::restore_with_retry(
            &self.runner,
            &container,
            &self.config.etcdctl,
            &member,
            &self.config.retry,
        )
        .await?;

        info!("[Phase 5] Restarting etcd on restored data...");
        etcd::stop_etcd(&self.runner, &container).await?;
        etcd::swap_data_dir(&self.runner, &container).await?;
        etcd::start_etcd(&self.runner, &container).await?;

        info!("[Phase 6] Verifying cluster liveness...");
        kubectl::wait_for_nodes_ready(&self.runner, kubeconfig, self.config.ready_timeout).await?;
        kubectl::check_liveness(&self.runner, kubeconfig).await?;

        Ok(())
    }

    fn describe_plan(&self) -> Result<()> {
        info!("Dry run - would perform the following:");
        info!(
            "1. Create kind cluster '{}' (1 control plane, {} workers)",
            self.cluster_name(),
            self.config.workers
        );
        for line in self.topology().to_yaml()?.lines() {
            info!("   {}", line);
        }
        info!(
            "2. Copy {} to {}",
            self.config.snapshot.display(),
            etcd::SNAPSHOT_DEST
        );
        info!(
            "3. Run '{} snapshot restore' up to {} times",
            self.config.etcdctl, self.config.retry.max_attempts
        );
        info!(
            "4. Stop etcd, swap {} into {}, start etcd again",
            etcd::STAGING_DIR,
            etcd::DATA_DIR
        );
        info!(
            "5. Wait for nodes Ready (kubeconfig: {})",
            self.config.kubeconfig.display()
        );
        Ok(())
    }
}
