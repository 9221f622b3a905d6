//! etcd member discovery, snapshot restore, and restart inside the control-plane node

use std::net::Ipv4Addr;
use std::time::Duration;

use regex::Regex;
use tracing::info;

use crate::error::CommandErrorExt;
use crate::kind;
use crate::poll::wait_with_timeout;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::runner::{args, run_checked, CommandRunner};
use crate::{Error, Result};

/// kubeadm's etcd static pod manifest inside the node
pub const MANIFEST_PATH: &str = "/etc/kubernetes/manifests/etcd.yaml";
/// Outside the kubelet's static pod directory, so etcd stays down while parked
pub const PARKED_MANIFEST_PATH: &str = "/etc/kubernetes/etcd.yaml.parked";
/// Live etcd data directory (hostPath-mounted into the etcd pod)
pub const DATA_DIR: &str = "/var/lib/etcd";
/// Scratch directory `etcdctl snapshot restore` writes into
pub const STAGING_DIR: &str = "/var/lib/etcd-restore";
/// Where the snapshot is copied inside the node
pub const SNAPSHOT_DEST: &str = "/tmp/etcd-snapshot.db";
pub const PEER_PORT: u16 = 2380;

const EXIT_TIMEOUT: Duration = Duration::from_secs(30);
const EXIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The single etcd member running on the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdMember {
    pub name: String,
    pub ip: Ipv4Addr,
}

impl EtcdMember {
    /// Scrape the member name and advertise address from an etcd manifest.
    ///
    /// The address comes from `--advertise-client-urls`, falling back to
    /// `--initial-advertise-peer-urls`. Without `--name` the member is named
    /// `fallback_name`.
    pub fn from_manifest(manifest: &str, fallback_name: &str) -> Result<Self> {
        let ip = ["advertise-client-urls", "initial-advertise-peer-urls"]
            .iter()
            .find_map(|flag| url_ip(manifest, flag))
            .ok_or_else(|| {
                Error::command_failed(format!(
                    "no advertise address found in {}",
                    MANIFEST_PATH
                ))
            })?;

        let name_re = Regex::new(r"--name=([^\s\x22']+)").cmd_err()?;
        let name = name_re
            .captures(manifest)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| fallback_name.to_string());

        Ok(Self { name, ip })
    }

    pub fn peer_url(&self) -> String {
        format!("https://{}:{}", self.ip, PEER_PORT)
    }

    /// `--initial-cluster` value for a single-member cluster
    pub fn initial_cluster(&self) -> String {
        format!("{}={}", self.name, self.peer_url())
    }
}

/// First IPv4 address in `--<flag>=http(s)://<ip>:...`
fn url_ip(manifest: &str, flag: &str) -> Option<Ipv4Addr> {
    let pattern = format!(
        r"--{}=https?://(\d{{1,3}}\.\d{{1,3}}\.\d{{1,3}}\.\d{{1,3}})",
        regex::escape(flag)
    );
    let re = Regex::new(&pattern).ok()?;
    let ip = re
        .captures_iter(manifest)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .next();
    ip
}

/// `docker exec <c> cat <manifest>`
pub async fn read_manifest<R: CommandRunner + ?Sized>(runner: &R, container: &str) -> Result<String> {
    kind::exec(runner, container, &args(["cat", MANIFEST_PATH])).await
}

/// Arguments for `docker` that run one restore into the staging dir
fn restore_command(container: &str, etcdctl: &str, member: &EtcdMember) -> Vec<String> {
    let peer_url = member.peer_url();
    args([
        "exec".to_string(),
        "-e".to_string(),
        "ETCDCTL_API=3".to_string(),
        container.to_string(),
        etcdctl.to_string(),
        "snapshot".to_string(),
        "restore".to_string(),
        SNAPSHOT_DEST.to_string(),
        "--data-dir".to_string(),
        STAGING_DIR.to_string(),
        "--name".to_string(),
        member.name.clone(),
        "--initial-cluster".to_string(),
        member.initial_cluster(),
        "--initial-advertise-peer-urls".to_string(),
        peer_url,
    ])
}

async fn restore_once<R: CommandRunner + ?Sized>(
    runner: &R,
    container: &str,
    etcdctl: &str,
    member: &EtcdMember,
) -> Result<()> {
    // A failed attempt can leave a partial data dir, and etcdctl refuses to
    // restore into an existing one
    kind::exec(runner, container, &args(["rm", "-rf", STAGING_DIR])).await?;

    run_checked(
        runner,
        "docker",
        &restore_command(container, etcdctl, member),
        None,
    )
    .await?;
    Ok(())
}

/// Restore the copied snapshot, retrying up to `policy.max_attempts` times
pub async fn restore_with_retry<R: CommandRunner + ?Sized>(
    runner: &R,
    container: &str,
    etcdctl: &str,
    member: &EtcdMember,
    policy: &RetryPolicy,
) -> Result<()> {
    info!(
        container,
        member = %member.name,
        peer_url = %member.peer_url(),
        "Restoring snapshot"
    );

    retry_with_backoff(policy, "etcd snapshot restore", move |attempt| async move {
        info!(attempt, max_attempts = policy.max_attempts, "Restore attempt");
        restore_once(runner, container, etcdctl, member).await
    })
    .await
    .map_err(|exhausted| Error::RestoreExhausted {
        attempts: exhausted.attempts,
        last_error: exhausted.last_error.to_string(),
    })
}

/// Take etcd down and keep it down.
///
/// The static pod manifest is parked first so the kubelet does not bring
/// etcd back while its data directory is replaced, then the process is
/// killed. A `pkill` that matches nothing is fatal.
pub async fn stop_etcd<R: CommandRunner + ?Sized>(runner: &R, container: &str) -> Result<()> {
    kind::exec(
        runner,
        container,
        &args(["mv", MANIFEST_PATH, PARKED_MANIFEST_PATH]),
    )
    .await?;

    info!(container, "Killing etcd");
    kind::exec(runner, container, &args(["pkill", "-9", "-x", "etcd"])).await?;

    let pgrep = args(["exec", container, "pgrep", "-x", "etcd"]);
    wait_with_timeout(EXIT_TIMEOUT, EXIT_POLL_INTERVAL, "etcd to exit", || {
        let pgrep = pgrep.clone();
        async move {
            let output = runner
                .run("docker", &pgrep, None)
                .await
                .map_err(|e| e.to_string())?;
            // pgrep exits non-zero once nothing matches
            Ok((!output.success).then_some(()))
        }
    })
    .await
}

/// Replace the live member directory with the restored one.
///
/// etcd must already be stopped.
pub async fn swap_data_dir<R: CommandRunner + ?Sized>(runner: &R, container: &str) -> Result<()> {
    let script = format!(
        "rm -rf {data}/member && mv {staging}/member {data}/member && rm -rf {staging}",
        data = DATA_DIR,
        staging = STAGING_DIR
    );
    kind::exec(runner, container, &args(["sh".to_string(), "-c".to_string(), script])).await?;
    Ok(())
}

/// Put the manifest back so the kubelet starts etcd on the restored data
pub async fn start_etcd<R: CommandRunner + ?Sized>(runner: &R, container: &str) -> Result<()> {
    info!(container, "Restarting etcd");
    kind::exec(
        runner,
        container,
        &args(["mv", PARKED_MANIFEST_PATH, MANIFEST_PATH]),
    )
    .await?;
    Ok(())
}
