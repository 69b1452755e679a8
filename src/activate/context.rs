use serde::Serialize;
use std::fmt;

use crate::error::{AcquireError, Result, Stage};
use crate::kubeconfig::CredentialDocument;
use crate::utils::logging::Logger;

/// The context the fetched document selected, and the cluster/user it binds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedIdentity {
    pub source: String,
    pub cluster: String,
    pub user: String,
}

impl FetchedIdentity {
    /// Picks the fetched context: `preferred` if present, else the document's
    /// current-context, else its only context.
    pub fn from_document(doc: &CredentialDocument, preferred: &str) -> Result<Self> {
        let chosen = doc
            .context(preferred)
            .or_else(|| doc.current_context.as_deref().and_then(|c| doc.context(c)))
            .or_else(|| match doc.contexts.as_slice() {
                [only] => Some(only),
                _ => None,
            })
            .ok_or_else(|| {
                AcquireError::merge(format!(
                    "cannot tell which context to activate: no '{}' context, no current-context, contexts: [{}]",
                    preferred,
                    doc.context_names().join(", ")
                ))
            })?;

        Ok(Self {
            source: chosen.name.clone(),
            cluster: chosen.context.cluster.clone(),
            user: chosen.context.user.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConflictReason {
    /// The desired name is taken by a context bound to another cluster/user.
    TakenByOther { cluster: String, user: String },
    /// Neither the fetched context nor a matching desired context exists.
    SourceMissing { source: String },
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TakenByOther { cluster, user } => write!(
                f,
                "already bound to cluster '{}' and user '{}'; rename or remove it first",
                cluster, user
            ),
            Self::SourceMissing { source } => {
                write!(f, "context '{}' to rename was not found", source)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ContextDecision {
    /// Rename the fetched context to the desired name. `replaces_identical`
    /// is set when the desired name already points at the same pair; the
    /// existing entry is then kept as is and the fetched one is dropped.
    RenameDefault { from: String, replaces_identical: bool },
    /// The desired context already exists and points at the fetched pair.
    NoOpAlreadyNamed,
    Conflict(ConflictReason),
}

impl fmt::Display for ContextDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RenameDefault {
                from,
                replaces_identical: false,
            } => write!(f, "rename '{}'", from),
            Self::RenameDefault {
                from,
                replaces_identical: true,
            } => write!(f, "drop '{}', identical context already present", from),
            Self::NoOpAlreadyNamed => f.write_str("already named"),
            Self::Conflict(reason) => write!(f, "conflict: {}", reason),
        }
    }
}

pub fn decide(store: &CredentialDocument, identity: &FetchedIdentity, desired: &str) -> ContextDecision {
    let matches_fetched =
        |name: &str| store.context(name).map(|c| c.context.points_at(&identity.cluster, &identity.user));
    let target = matches_fetched(desired);

    if identity.source == desired {
        return match target {
            Some(true) => ContextDecision::NoOpAlreadyNamed,
            Some(false) => ContextDecision::Conflict(taken_by_other(store, desired)),
            None => ContextDecision::Conflict(ConflictReason::SourceMissing {
                source: identity.source.clone(),
            }),
        };
    }

    let source_present = matches_fetched(&identity.source) == Some(true);
    match (source_present, target) {
        (_, Some(false)) => ContextDecision::Conflict(taken_by_other(store, desired)),
        (true, target) => ContextDecision::RenameDefault {
            from: identity.source.clone(),
            replaces_identical: target == Some(true),
        },
        (false, Some(true)) => ContextDecision::NoOpAlreadyNamed,
        (false, None) => ContextDecision::Conflict(ConflictReason::SourceMissing {
            source: identity.source.clone(),
        }),
    }
}

fn taken_by_other(store: &CredentialDocument, name: &str) -> ConflictReason {
    let (cluster, user) = store
        .context(name)
        .map(|c| (c.context.cluster.clone(), c.context.user.clone()))
        .unwrap_or_default();
    ConflictReason::TakenByOther { cluster, user }
}

/// Applies the naming decision and selects `desired` as current-context.
/// A conflict leaves `store` untouched and is returned as `NameConflict`.
pub fn activate(
    mut store: CredentialDocument,
    identity: &FetchedIdentity,
    desired: &str,
    logger: &mut dyn Logger,
) -> Result<(CredentialDocument, ContextDecision)> {
    let decision = decide(&store, identity, desired);
    logger.stage_log(
        Stage::Activating,
        &format!("Context '{}': {}", desired, decision),
    );

    match &decision {
        ContextDecision::Conflict(reason) => {
            return Err(AcquireError::name_conflict(desired, reason.to_string()));
        }
        ContextDecision::RenameDefault {
            from,
            replaces_identical,
        } => {
            let Some(index) = store.contexts.iter().position(|c| &c.name == from) else {
                return Err(AcquireError::name_conflict(
                    desired,
                    ConflictReason::SourceMissing { source: from.clone() }.to_string(),
                ));
            };
            if *replaces_identical {
                // namespace and extra keys set on the existing entry survive
                store.contexts.remove(index);
            } else {
                store.contexts[index].name = desired.to_string();
            }
        }
        ContextDecision::NoOpAlreadyNamed => {
            if store.context(&identity.source).is_some() && identity.source != desired {
                logger.debug_log(&format!(
                    "Leaving '{}' in place; it does not bind the fetched cluster",
                    identity.source
                ));
            }
        }
    }

    if store.current_context.as_deref() != Some(desired) {
        logger.stage_log(
            Stage::Activating,
            &format!(
                "Switching current-context from {} to '{}'",
                store
                    .current_context
                    .as_deref()
                    .map(|c| format!("'{}'", c))
                    .unwrap_or_else(|| "<none>".to_string()),
                desired
            ),
        );
    }
    store.current_context = Some(desired.to_string());
    Ok((store, decision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubeconfig::fixtures::{K3S_YAML, WORKSTATION_YAML};
    use crate::kubeconfig::{merge, rewrite_document};
    use crate::types::ClusterEndpoint;
    use crate::utils::logging::MemoryLogger;
    use pretty_assertions::assert_eq;

    const NAME: &str = "homelab-k3s";

    fn fetched() -> CredentialDocument {
        rewrite_document(K3S_YAML, &ClusterEndpoint::new("10.0.0.5", 6443))
            .unwrap()
            .0
    }

    fn identity() -> FetchedIdentity {
        FetchedIdentity::from_document(&fetched(), "default").unwrap()
    }

    fn merged_into(existing: Option<&str>) -> CredentialDocument {
        let existing = existing.map(|raw| CredentialDocument::parse(raw, Stage::Merging).unwrap());
        merge(existing.as_ref(), &fetched()).unwrap().store
    }

    #[test]
    fn identity_prefers_named_then_current_then_only() {
        assert_eq!(
            identity(),
            FetchedIdentity {
                source: "default".to_string(),
                cluster: "default".to_string(),
                user: "default".to_string(),
            }
        );

        let mut doc = fetched();
        doc.contexts[0].name = "k3s".to_string();
        doc.current_context = None;
        assert_eq!(FetchedIdentity::from_document(&doc, "default").unwrap().source, "k3s");

        doc.contexts.push(doc.contexts[0].clone());
        doc.contexts[1].name = "other".to_string();
        assert!(FetchedIdentity::from_document(&doc, "default").is_err());
    }

    #[test]
    fn empty_store_renames_default_and_selects_it() {
        let mut logger = MemoryLogger::default();
        let (store, decision) = activate(merged_into(None), &identity(), NAME, &mut logger).unwrap();

        assert_eq!(
            decision,
            ContextDecision::RenameDefault {
                from: "default".to_string(),
                replaces_identical: false
            }
        );
        assert_eq!(store.current_context.as_deref(), Some(NAME));
        assert_eq!(store.context_names(), vec![NAME]);
        assert!(store.context(NAME).unwrap().context.points_at("default", "default"));
        assert!(store.structural_problems().is_empty());
        assert!(logger.contains("Switching current-context from <none> to 'homelab-k3s'"));
    }

    #[test]
    fn unrelated_contexts_survive_activation() {
        let (store, _) = activate(
            merged_into(Some(WORKSTATION_YAML)),
            &identity(),
            NAME,
            &mut MemoryLogger::default(),
        )
        .unwrap();
        assert_eq!(store.context_names(), vec!["prod", NAME]);
    }

    #[test]
    fn rerun_collapses_fresh_default_onto_existing_name() {
        let first = activate(merged_into(None), &identity(), NAME, &mut MemoryLogger::default())
            .unwrap()
            .0;
        let remerged = merge(Some(&first), &fetched()).unwrap().store;
        assert_eq!(remerged.context_names(), vec![NAME, "default"]);

        let (second, decision) =
            activate(remerged, &identity(), NAME, &mut MemoryLogger::default()).unwrap();
        assert_eq!(
            decision,
            ContextDecision::RenameDefault {
                from: "default".to_string(),
                replaces_identical: true
            }
        );
        assert_eq!(second, first);
    }

    #[test]
    fn rerun_keeps_settings_on_existing_context() {
        let mut first = activate(merged_into(None), &identity(), NAME, &mut MemoryLogger::default())
            .unwrap()
            .0;
        let existing = first.contexts.iter_mut().find(|c| c.name == NAME).unwrap();
        existing.context.namespace = Some("apps".to_string());
        existing
            .context
            .extra
            .insert("extensions".to_string(), serde_yaml::Value::Sequence(Vec::new()));

        let remerged = merge(Some(&first), &fetched()).unwrap().store;
        let (second, _) = activate(remerged, &identity(), NAME, &mut MemoryLogger::default()).unwrap();

        assert_eq!(second.context_names(), vec![NAME]);
        let kept = second.context(NAME).unwrap();
        assert_eq!(kept.context.namespace.as_deref(), Some("apps"));
        assert!(kept.context.extra.contains_key("extensions"));
        assert_eq!(second, first);
    }

    #[test]
    fn unrelated_context_with_desired_name_is_a_conflict() {
        let taken = WORKSTATION_YAML.replace("- name: prod\n  context:", "- name: homelab-k3s\n  context:");
        let store = merged_into(Some(&taken));
        assert_eq!(
            decide(&store, &identity(), NAME),
            ContextDecision::Conflict(ConflictReason::TakenByOther {
                cluster: "prod".to_string(),
                user: "prod-admin".to_string(),
            })
        );

        let err = activate(store, &identity(), NAME, &mut MemoryLogger::default()).unwrap_err();
        assert!(matches!(err, AcquireError::NameConflict { ref name, .. } if name == NAME));
        assert!(err.to_string().contains("already bound to cluster 'prod'"));
    }

    #[test]
    fn missing_source_is_noop_only_when_name_already_matches() {
        let mut store = merged_into(None);
        store.contexts[0].name = NAME.to_string();
        assert_eq!(decide(&store, &identity(), NAME), ContextDecision::NoOpAlreadyNamed);

        let (activated, _) =
            activate(store, &identity(), NAME, &mut MemoryLogger::default()).unwrap();
        assert_eq!(activated.current_context.as_deref(), Some(NAME));

        let mut orphaned = merged_into(None);
        orphaned.contexts.clear();
        assert_eq!(
            decide(&orphaned, &identity(), NAME),
            ContextDecision::Conflict(ConflictReason::SourceMissing {
                source: "default".to_string()
            })
        );
    }

    #[test]
    fn desired_name_equal_to_source_is_noop() {
        let store = merged_into(None);
        let (activated, decision) =
            activate(store, &identity(), "default", &mut MemoryLogger::default()).unwrap();
        assert_eq!(decision, ContextDecision::NoOpAlreadyNamed);
        assert_eq!(activated.current_context.as_deref(), Some("default"));
    }
}
