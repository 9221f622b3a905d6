//! Cluster liveness through kubectl

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::poll::wait_with_timeout;
use crate::runner::{args, run_checked, CommandRunner};
use crate::Result;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct Node {
    metadata: NodeMetadata,
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Debug, Deserialize)]
struct NodeMetadata {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    conditions: Vec<NodeCondition>,
}

#[derive(Debug, Deserialize)]
struct NodeCondition {
    #[serde(rename = "type")]
    type_: String,
    status: String,
}

impl Node {
    fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.type_ == "Ready" && c.status == "True")
    }
}

/// Node count and the names not Ready yet, or `None` when no node is registered
fn node_readiness(json: &str) -> serde_json::Result<Option<(usize, Vec<String>)>> {
    let list: NodeList = serde_json::from_str(json)?;
    if list.items.is_empty() {
        return Ok(None);
    }
    let pending = list
        .items
        .iter()
        .filter(|n| !n.is_ready())
        .map(|n| n.metadata.name.clone())
        .collect();
    Ok(Some((list.items.len(), pending)))
}

fn kubectl_args(kubeconfig: &str, rest: &[&str]) -> Vec<String> {
    let mut full = args(["--kubeconfig", kubeconfig]);
    full.extend(rest.iter().map(|s| s.to_string()));
    full
}

/// Wait until every node reports `Ready=True`.
///
/// API errors count as "not yet" since the server is expected to bounce
/// while etcd restarts. Returns the number of nodes.
pub async fn wait_for_nodes_ready<R: CommandRunner + ?Sized>(
    runner: &R,
    kubeconfig: &str,
    timeout: Duration,
) -> Result<usize> {
    let list_args = kubectl_args(kubeconfig, &["get", "nodes", "-o", "json"]);

    let count = wait_with_timeout(timeout, POLL_INTERVAL, "nodes to be ready", || {
        let list_args = list_args.clone();
        async move {
            let output = runner
                .run("kubectl", &list_args, None)
                .await
                .map_err(|e| e.to_string())?;
            if !output.success {
                debug!(stderr = %output.stderr.trim(), "kubectl get nodes failed");
                return Ok(None);
            }
            match node_readiness(&output.stdout) {
                Ok(Some((total, pending))) if pending.is_empty() => Ok(Some(total)),
                Ok(Some((_, pending))) => {
                    info!(pending = %pending.join(","), "Nodes not ready yet");
                    Ok(None)
                }
                Ok(None) => Ok(None),
                Err(e) => {
                    debug!(error = %e, "Unparsable node list");
                    Ok(None)
                }
            }
        }
    })
    .await?;

    info!(nodes = count, "All nodes Ready");
    Ok(count)
}

/// Final liveness check: list nodes and kube-system pods
pub async fn check_liveness<R: CommandRunner + ?Sized>(runner: &R, kubeconfig: &str) -> Result<()> {
    for rest in [
        &["get", "nodes", "-o", "wide"][..],
        &["get", "pods", "-n", "kube-system"][..],
    ] {
        let output = run_checked(runner, "kubectl", &kubectl_args(kubeconfig, rest), None).await?;
        for line in output.stdout.lines() {
            info!("{}", line);
        }
    }
    Ok(())
}
