use super::document::{CredentialDocument, Named};
use crate::error::{AcquireError, Result};

/// What a merge did, per entry kind, for the operator log.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MergeSummary {
    pub added: Vec<String>,
    pub replaced: Vec<String>,
    pub unchanged: Vec<String>,
    pub preserved: Vec<String>,
}

impl MergeSummary {
    pub fn describe(&self) -> String {
        format!(
            "{} added, {} replaced, {} unchanged, {} preserved",
            self.added.len(),
            self.replaced.len(),
            self.unchanged.len(),
            self.preserved.len()
        )
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub store: CredentialDocument,
    pub summary: MergeSummary,
}

/// Union of `existing` and `fetched` with the fetched entry winning on a name
/// collision. Existing entries keep their position, new ones are appended in
/// fetched order, and the existing current-context is carried over as is.
pub fn merge(existing: Option<&CredentialDocument>, fetched: &CredentialDocument) -> Result<MergeOutcome> {
    let problems = fetched.structural_problems();
    if !problems.is_empty() {
        return Err(AcquireError::merge(problems.join("; ")));
    }
    if fetched.contexts.is_empty() {
        return Err(AcquireError::merge("fetched document defines no contexts"));
    }

    let mut summary = MergeSummary::default();
    let base = match existing {
        Some(doc) => doc.clone(),
        None => CredentialDocument {
            extra: fetched.extra.clone(),
            ..CredentialDocument::default()
        },
    };

    let store = CredentialDocument {
        clusters: union_by_name("cluster", &base.clusters, &fetched.clusters, &mut summary),
        users: union_by_name("user", &base.users, &fetched.users, &mut summary),
        contexts: union_by_name("context", &base.contexts, &fetched.contexts, &mut summary),
        current_context: base.current_context.clone(),
        ..base
    };

    Ok(MergeOutcome { store, summary })
}

fn union_by_name<T: Named + Clone + PartialEq>(
    kind: &str,
    base: &[T],
    incoming: &[T],
    summary: &mut MergeSummary,
) -> Vec<T> {
    let mut merged: Vec<T> = Vec::with_capacity(base.len() + incoming.len());
    for entry in base {
        match incoming.iter().find(|i| i.name() == entry.name()) {
            Some(newer) if newer == entry => {
                summary.unchanged.push(format!("{}/{}", kind, entry.name()));
                merged.push(entry.clone());
            }
            Some(newer) => {
                summary.replaced.push(format!("{}/{}", kind, entry.name()));
                merged.push(newer.clone());
            }
            None => {
                summary.preserved.push(format!("{}/{}", kind, entry.name()));
                merged.push(entry.clone());
            }
        }
    }
    for entry in incoming {
        if !base.iter().any(|b| b.name() == entry.name()) {
            summary.added.push(format!("{}/{}", kind, entry.name()));
            merged.push(entry.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::kubeconfig::document::fixtures::{K3S_YAML, WORKSTATION_YAML};
    use crate::kubeconfig::rewrite::rewrite_document;
    use crate::types::ClusterEndpoint;
    use pretty_assertions::assert_eq;

    fn fetched() -> CredentialDocument {
        rewrite_document(K3S_YAML, &ClusterEndpoint::new("10.0.0.5", 6443))
            .unwrap()
            .0
    }

    fn workstation() -> CredentialDocument {
        CredentialDocument::parse(WORKSTATION_YAML, Stage::Merging).unwrap()
    }

    #[test]
    fn first_run_takes_fetched_entries_without_selecting() {
        let outcome = merge(None, &fetched()).unwrap();
        assert_eq!(outcome.store.context_names(), vec!["default"]);
        assert_eq!(outcome.store.current_context, None);
        assert_eq!(outcome.summary.added.len(), 3);
    }

    #[test]
    fn unrelated_entries_are_preserved_in_place() {
        let existing = workstation();
        let outcome = merge(Some(&existing), &fetched()).unwrap();

        assert_eq!(outcome.store.context_names(), vec!["prod", "default"]);
        assert_eq!(outcome.store.context("prod"), existing.context("prod"));
        assert_eq!(outcome.store.cluster("prod"), existing.cluster("prod"));
        assert_eq!(outcome.store.user("prod-admin"), existing.user("prod-admin"));
        assert_eq!(outcome.store.current_context.as_deref(), Some("prod"));
        assert!(outcome.store.extra.contains_key("preferences"));
        assert_eq!(outcome.summary.preserved.len(), 3);
    }

    #[test]
    fn fetched_entry_wins_on_collision() {
        let mut existing = workstation();
        let mut stale = fetched();
        stale.clusters[0].cluster.server = "https://192.168.1.9:6443".to_string();
        existing.clusters.push(stale.clusters[0].clone());

        let outcome = merge(Some(&existing), &fetched()).unwrap();
        assert_eq!(
            outcome.store.cluster("default").unwrap().cluster.server,
            "https://10.0.0.5:6443"
        );
        assert_eq!(outcome.summary.replaced, vec!["cluster/default".to_string()]);
        // position of the replaced entry is kept
        assert_eq!(outcome.store.clusters[1].name, "default");
    }

    #[test]
    fn merging_twice_equals_merging_once() {
        let existing = workstation();
        let once = merge(Some(&existing), &fetched()).unwrap().store;
        let twice = merge(Some(&once), &fetched()).unwrap();

        assert_eq!(once, twice.store);
        assert!(twice.summary.added.is_empty());
        assert!(twice.summary.replaced.is_empty());
    }

    #[test]
    fn structurally_invalid_fetch_is_a_merge_error() {
        let mut bad = fetched();
        bad.users.clear();
        let err = merge(Some(&workstation()), &bad).unwrap_err();
        assert!(matches!(err, AcquireError::Merge { .. }));
        assert!(err.to_string().contains("missing user 'default'"));

        let mut empty = fetched();
        empty.contexts.clear();
        empty.current_context = None;
        assert!(merge(None, &empty).is_err());
    }
}
