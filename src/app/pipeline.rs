// src/app/pipeline.rs

use serde::Serialize;
use std::path::PathBuf;

use crate::activate::{activate, probe_liveness, ClusterProbe, ContextDecision, FetchedIdentity};
use crate::config::AcquireConfig;
use crate::error::{AcquireError, Result, Stage};
use crate::kubeconfig::{merge, rewrite_document, MergeSummary, StoreFile};
use crate::remote::{fetch_document, RemoteTransport};
use crate::types::{FetchTarget, PipelineState};
use crate::utils::logging::Logger;

#[derive(Debug, Clone, Serialize)]
pub struct AcquireReport {
    pub state: PipelineState,
    pub store_path: PathBuf,
    pub context: String,
    pub rewritten_clusters: Vec<String>,
    pub merge: String,
    pub decision: ContextDecision,
    pub backup: Option<PathBuf>,
    pub nodes: Vec<String>,
    /// Rendered store when run with `dry_run`; nothing was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// Fetch -> rewrite -> merge -> activate, strictly forward. Only the activate
/// stage writes to disk, and only after every earlier stage succeeded.
pub struct AcquirePipeline<'a> {
    config: &'a AcquireConfig,
    transport: &'a dyn RemoteTransport,
    probe: &'a dyn ClusterProbe,
    logger: Box<dyn Logger>,
    state: PipelineState,
}

impl<'a> AcquirePipeline<'a> {
    pub fn new(
        config: &'a AcquireConfig,
        transport: &'a dyn RemoteTransport,
        probe: &'a dyn ClusterProbe,
        logger: Box<dyn Logger>,
    ) -> Self {
        Self {
            config,
            transport,
            probe,
            logger,
            state: PipelineState::Fetching,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn advance(&mut self) {
        if let Some(next) = self.state.next() {
            self.logger.debug_log(&format!("{:?} -> {:?}", self.state, next));
            self.state = next;
        }
    }

    pub async fn run(&mut self, dry_run: bool) -> Result<AcquireReport> {
        self.config.validate()?;
        let store_path = self.config.store_path()?;
        let endpoint = self.config.endpoint();
        let desired = self.config.context_name.clone();

        // Fetching
        let target = FetchTarget {
            host: self.config.master_host.clone(),
            user: self.config.ssh_user.clone(),
            port: self.config.ssh_port,
            remote_path: self.config.remote_kubeconfig_path.clone(),
        };
        let raw = fetch_document(
            self.transport,
            &target,
            self.config.fetch_timeout(),
            self.logger.as_mut(),
        )
        .await?;
        self.advance();

        // Rewriting
        let (fetched, rewritten_clusters) = rewrite_document(&raw, &endpoint)?;
        if rewritten_clusters.is_empty() {
            self.logger.stage_log(
                Stage::Rewriting,
                "No loopback server address found; addresses left as fetched",
            );
        } else {
            self.logger.stage_log(
                Stage::Rewriting,
                &format!(
                    "Pointed cluster(s) {} at {}",
                    rewritten_clusters.join(", "),
                    endpoint.server_url()
                ),
            );
        }
        self.advance();

        // Merging
        let identity = FetchedIdentity::from_document(&fetched, &self.config.source_context)?;
        let store_file = StoreFile::load(&store_path)?;
        if !store_file.exists() {
            self.logger.stage_log(
                Stage::Merging,
                &format!("No kubeconfig at {} yet; it will be created", store_file.path().display()),
            );
        }
        let outcome = merge(store_file.document(), &fetched)?;
        self.logger.stage_log(
            Stage::Merging,
            &format!(
                "Merged into {}: {}",
                store_file.path().display(),
                outcome.summary.describe()
            ),
        );
        log_summary(self.logger.as_mut(), &outcome.summary);
        self.advance();

        // Activating
        let (activated, decision) = activate(outcome.store, &identity, &desired, self.logger.as_mut())?;
        let server = activated
            .cluster(&identity.cluster)
            .map(|c| c.cluster.server.clone())
            .unwrap_or_else(|| endpoint.server_url());

        let mut report = AcquireReport {
            state: self.state,
            store_path: store_path.clone(),
            context: desired.clone(),
            rewritten_clusters,
            merge: outcome.summary.describe(),
            decision,
            backup: None,
            nodes: Vec::new(),
            preview: None,
        };

        if dry_run {
            self.logger
                .stage_log(Stage::Activating, "Dry run: store not written, probe skipped");
            report.preview = Some(activated.to_yaml()?);
            return Ok(report);
        }

        report.backup = store_file.commit(&activated, self.logger.as_mut())?;

        match probe_liveness(
            self.probe,
            &store_path,
            &desired,
            &server,
            self.config.probe_timeout(),
            self.logger.as_mut(),
        )
        .await
        {
            Ok(nodes) => {
                self.state = PipelineState::Connected;
                report.state = self.state;
                report.nodes = nodes;
                Ok(report)
            }
            Err(e) => {
                self.state = PipelineState::Unreachable;
                Err(e)
            }
        }
    }
}

fn log_summary(logger: &mut dyn Logger, summary: &MergeSummary) {
    for (label, entries) in [
        ("added", &summary.added),
        ("replaced", &summary.replaced),
        ("unchanged", &summary.unchanged),
        ("preserved", &summary.preserved),
    ] {
        if !entries.is_empty() {
            logger.debug_log(&format!("{}: {}", label, entries.join(", ")));
        }
    }
}

/// Re-runs only the liveness check against the persisted store.
pub async fn probe_only(
    config: &AcquireConfig,
    probe: &dyn ClusterProbe,
    logger: &mut dyn Logger,
) -> Result<Vec<String>> {
    let store_path = config.store_path()?;
    let store = StoreFile::load(&store_path)?;
    let doc = store.document().ok_or_else(|| {
        AcquireError::config(format!("no kubeconfig at {}", store_path.display()))
    })?;
    let context = doc.context(&config.context_name).ok_or_else(|| {
        AcquireError::config(format!(
            "context '{}' not found in {} (have: {})",
            config.context_name,
            store_path.display(),
            doc.context_names().join(", ")
        ))
    })?;
    let server = doc
        .cluster(&context.context.cluster)
        .map(|c| c.cluster.server.clone())
        .unwrap_or_else(|| context.context.cluster.clone());

    probe_liveness(
        probe,
        &store_path,
        &config.context_name,
        &server,
        config.probe_timeout(),
        logger,
    )
    .await
}
