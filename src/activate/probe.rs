use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{AcquireError, Result, Stage};
use crate::utils::logging::Logger;

/// Read-only cluster query used to confirm a context answers.
#[async_trait]
pub trait ClusterProbe: Send + Sync {
    /// Names of the nodes visible through `context`.
    async fn list_nodes(&self, kubeconfig: &Path, context: &str, timeout: Duration) -> Result<Vec<String>>;
}

pub struct KubectlProbe {
    binary: String,
}

impl KubectlProbe {
    /// `binary` is a program name looked up on `PATH`, or a path to one.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn args(kubeconfig: &Path, context: &str, timeout: Duration) -> Vec<String> {
        vec![
            "--kubeconfig".to_string(),
            kubeconfig.display().to_string(),
            "--context".to_string(),
            context.to_string(),
            format!("--request-timeout={}s", timeout.as_secs().max(1)),
            "get".to_string(),
            "nodes".to_string(),
            "-o".to_string(),
            "name".to_string(),
        ]
    }
}

#[async_trait]
impl ClusterProbe for KubectlProbe {
    async fn list_nodes(&self, kubeconfig: &Path, context: &str, timeout: Duration) -> Result<Vec<String>> {
        let child = Command::new(&self.binary)
            .args(Self::args(kubeconfig, context, timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AcquireError::connectivity(context, format!("cannot run {}: {}", self.binary, e))
            })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                AcquireError::connectivity(
                    context,
                    format!("no answer within {}s", timeout.as_secs()),
                )
            })?
            .map_err(|e| AcquireError::connectivity(context, e.to_string()))?;

        if !output.status.success() {
            return Err(AcquireError::connectivity(
                context,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(parse_node_names(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// `kubectl get nodes -o name` prints one `node/<name>` per line.
pub fn parse_node_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.strip_prefix("node/").unwrap_or(line).to_string())
        .collect()
}

/// Runs the probe and turns an empty node list into a `ConnectivityError`
/// carrying reachability guidance for `server`.
pub async fn probe_liveness(
    probe: &dyn ClusterProbe,
    kubeconfig: &Path,
    context: &str,
    server: &str,
    timeout: Duration,
    logger: &mut dyn Logger,
) -> Result<Vec<String>> {
    logger.stage_log(
        Stage::Probing,
        &format!("Listing nodes via context '{}' ({})", context, server),
    );

    let guidance = format!(
        "check that {} is reachable from this machine (firewall, port forwarding) and that the k3s service is running; \
         the kubeconfig was saved, so re-run `probe --context {}` once fixed",
        server, context
    );

    let nodes = match probe.list_nodes(kubeconfig, context, timeout).await {
        Ok(nodes) => nodes,
        Err(AcquireError::Connectivity { message, .. }) => {
            logger.stage_log(Stage::Probing, &format!("Probe failed: {}", message));
            return Err(AcquireError::connectivity(
                context,
                format!("{}; {}", message, guidance),
            ));
        }
        Err(other) => return Err(other),
    };

    if nodes.is_empty() {
        logger.stage_log(Stage::Probing, "Cluster answered with no nodes");
        return Err(AcquireError::connectivity(
            context,
            format!("node list is empty; {}", guidance),
        ));
    }

    logger.stage_log(
        Stage::Probing,
        &format!("Connected: {} node(s): {}", nodes.len(), nodes.join(", ")),
    );
    Ok(nodes)
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;

    pub enum FakeProbe {
        Nodes(Vec<&'static str>),
        Timeout,
    }

    #[async_trait]
    impl ClusterProbe for FakeProbe {
        async fn list_nodes(&self, kubeconfig: &Path, context: &str, timeout: Duration) -> Result<Vec<String>> {
            assert!(kubeconfig.exists(), "probe must run against the persisted store");
            match self {
                FakeProbe::Nodes(nodes) => Ok(nodes.iter().map(|n| n.to_string()).collect()),
                FakeProbe::Timeout => Err(AcquireError::connectivity(
                    context,
                    format!("no answer within {}s", timeout.as_secs()),
                )),
            }
        }
    }
}
