//! kind cluster lifecycle and docker access to its nodes

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::runner::{args, run_checked, CommandRunner};
use crate::{Error, Result};

/// Label kind puts on every node container with the owning cluster's name
const CLUSTER_LABEL: &str = "io.x-k8s.kind.cluster";
/// Label kind puts on every node container with the node's role
const ROLE_LABEL: &str = "io.x-k8s.kind.role";

/// kind `Cluster` document, piped to `kind create cluster --config -`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KindClusterConfig {
    pub kind: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub nodes: Vec<KindNode>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KindNode {
    pub role: NodeRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

impl KindClusterConfig {
    /// One control-plane node plus `workers` worker nodes
    pub fn multi_node(workers: u32, image: Option<&str>) -> Self {
        let node = |role| KindNode {
            role,
            image: image.map(str::to_string),
        };

        let mut nodes = vec![node(NodeRole::ControlPlane)];
        nodes.extend((0..workers).map(|_| node(NodeRole::Worker)));

        Self {
            kind: "Cluster".to_string(),
            api_version: "kind.x-k8s.io/v1alpha4".to_string(),
            nodes,
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Create a kind cluster from `config`, replacing any stale one with the same name
pub async fn create_cluster<R: CommandRunner + ?Sized>(
    runner: &R,
    name: &str,
    config: &KindClusterConfig,
) -> Result<()> {
    info!(cluster = name, nodes = config.nodes.len(), "Creating kind cluster");

    // Leftovers from an earlier run would make create fail
    if let Ok(out) = runner
        .run("kind", &args(["delete", "cluster", "--name", name]), None)
        .await
    {
        if !out.success {
            warn!(cluster = name, "kind delete of stale cluster failed, continuing");
        }
    }

    let document = config.to_yaml()?;
    run_checked(
        runner,
        "kind",
        &args(["create", "cluster", "--name", name, "--config", "-"]),
        Some(&document),
    )
    .await?;

    Ok(())
}

/// Write the cluster's kubeconfig to `path`
pub async fn export_kubeconfig<R: CommandRunner + ?Sized>(
    runner: &R,
    name: &str,
    path: &Path,
) -> Result<()> {
    let path = path
        .to_str()
        .ok_or_else(|| Error::command_failed("kubeconfig path contains invalid UTF-8"))?;

    run_checked(
        runner,
        "kind",
        &args(["export", "kubeconfig", "--name", name, "--kubeconfig", path]),
        None,
    )
    .await?;
    Ok(())
}

pub async fn delete_cluster<R: CommandRunner + ?Sized>(runner: &R, name: &str) -> Result<()> {
    run_checked(
        runner,
        "kind",
        &args(["delete", "cluster", "--name", name]),
        None,
    )
    .await?;
    Ok(())
}

/// Find the control-plane node container of cluster `name`
pub async fn control_plane_container<R: CommandRunner + ?Sized>(
    runner: &R,
    name: &str,
) -> Result<String> {
    let output = run_checked(
        runner,
        "docker",
        &args([
            "ps".to_string(),
            "--filter".to_string(),
            format!("label={}={}", CLUSTER_LABEL, name),
            "--filter".to_string(),
            format!("label={}=control-plane", ROLE_LABEL),
            "--format".to_string(),
            "{{.Names}}".to_string(),
        ]),
        None,
    )
    .await?;

    // Single control plane; take the first name in case of stray output
    output
        .stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::command_failed(format!(
                "no control-plane container found for cluster {}",
                name
            ))
        })
}

/// `docker cp` a host file into a container
pub async fn copy_into<R: CommandRunner + ?Sized>(
    runner: &R,
    container: &str,
    src: &str,
    dest: &str,
) -> Result<()> {
    run_checked(
        runner,
        "docker",
        &args(["cp".to_string(), src.to_string(), format!("{}:{}", container, dest)]),
        None,
    )
    .await?;
    Ok(())
}

/// Run a command inside a container and return its stdout
pub async fn exec<R: CommandRunner + ?Sized>(
    runner: &R,
    container: &str,
    command: &[String],
) -> Result<String> {
    let mut full = args(["exec", container]);
    full.extend_from_slice(command);
    Ok(run_checked(runner, "docker", &full, None).await?.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::ScriptedRunner;
    use crate::runner::CommandOutput;

    #[test]
    fn multi_node_document_has_one_control_plane() {
        let yaml = KindClusterConfig::multi_node(2, None).to_yaml().unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed["kind"].as_str(), Some("Cluster"));
        assert_eq!(parsed["apiVersion"].as_str(), Some("kind.x-k8s.io/v1alpha4"));

        let roles: Vec<&str> = parsed["nodes"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|n| n["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["control-plane", "worker", "worker"]);
        assert!(parsed["nodes"][0].get("image").is_none());
    }

    #[test]
    fn node_image_applies_to_every_node() {
        let config = KindClusterConfig::multi_node(1, Some("kindest/node:v1.31.0"));
        assert!(config
            .nodes
            .iter()
            .all(|n| n.image.as_deref() == Some("kindest/node:v1.31.0")));
    }

    #[tokio::test]
    async fn create_pipes_document_on_stdin_after_cleanup() {
        let runner = ScriptedRunner::new();
        let config = KindClusterConfig::multi_node(2, None);

        create_cluster(&runner, "drill", &config).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, args(["delete", "cluster", "--name", "drill"]));
        assert_eq!(
            calls[1].1,
            args(["create", "cluster", "--name", "drill", "--config", "-"])
        );
        let stdin = calls[1].2.as_deref().unwrap();
        assert!(stdin.contains("control-plane"));
        assert_eq!(stdin.matches("worker").count(), 2);
    }

    #[tokio::test]
    async fn create_failure_is_fatal() {
        let runner = ScriptedRunner::new().on("kind", &["create"], |_| {
            CommandOutput::failed("ERROR: failed to create cluster")
        });

        let err = create_cluster(&runner, "drill", &KindClusterConfig::multi_node(1, None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to create cluster"));
    }

    #[tokio::test]
    async fn control_plane_lookup_filters_on_kind_labels() {
        let runner = ScriptedRunner::new()
            .on("docker", &["ps"], |_| CommandOutput::ok("drill-control-plane\n"));

        let name = control_plane_container(&runner, "drill").await.unwrap();
        assert_eq!(name, "drill-control-plane");

        let line = &runner.command_lines()[0];
        assert!(line.contains("label=io.x-k8s.kind.cluster=drill"));
        assert!(line.contains("label=io.x-k8s.kind.role=control-plane"));
    }

    #[tokio::test]
    async fn control_plane_lookup_errors_when_nothing_runs() {
        let runner = ScriptedRunner::new().on("docker", &["ps"], |_| CommandOutput::ok("\n"));
        assert!(control_plane_container(&runner, "drill").await.is_err());
    }

    #[tokio::test]
    async fn copy_targets_container_path() {
        let runner = ScriptedRunner::new();
        copy_into(&runner, "drill-control-plane", "/backups/s.db", "/tmp/etcd-snapshot.db")
            .await
            .unwrap();
        assert_eq!(
            runner.command_lines(),
            vec!["docker cp /backups/s.db drill-control-plane:/tmp/etcd-snapshot.db"]
        );
    }
}
