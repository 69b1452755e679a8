//! Typed view of a kubeconfig file.
//!
//! Only the fields the engine reasons about are typed; everything else
//! (preferences, extensions, auth plugins, CA data) rides along in the
//! `extra` maps so a parse/serialize cycle does not drop data other tools
//! wrote into the shared store.

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};

use crate::error::{AcquireError, Result, Stage};

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_kind() -> String {
    "Config".to_string()
}

/// kubectl writes `clusters: null` for empty lists.
fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// kubectl writes `current-context: ""` when nothing is selected.
fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.is_empty()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialDocument {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub clusters: Vec<NamedCluster>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<NamedUser>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub contexts: Vec<NamedContext>,
    #[serde(
        rename = "current-context",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_context: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub server: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: Mapping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub cluster: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ContextEntry {
    pub fn points_at(&self, cluster: &str, user: &str) -> bool {
        self.cluster == cluster && self.user == user
    }
}

/// Entries addressed by name inside a kubeconfig list.
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for NamedCluster {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for NamedUser {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for NamedContext {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Default for CredentialDocument {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            clusters: Vec::new(),
            users: Vec::new(),
            contexts: Vec::new(),
            current_context: None,
            extra: BTreeMap::new(),
        }
    }
}

impl CredentialDocument {
    /// Parses a kubeconfig. `stage` tags the `ParseError` with the caller's stage.
    pub fn parse(raw: &str, stage: Stage) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(AcquireError::parse(stage, "document is empty"));
        }
        let doc: CredentialDocument = serde_yaml::from_str(raw)
            .map_err(|e| AcquireError::parse(stage, e.to_string()))?;
        if doc.kind != "Config" {
            return Err(AcquireError::parse(
                stage,
                format!("expected kind 'Config', found '{}'", doc.kind),
            ));
        }
        Ok(doc)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| AcquireError::parse(Stage::Activating, e.to_string()))
    }

    pub fn cluster(&self, name: &str) -> Option<&NamedCluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn user(&self, name: &str) -> Option<&NamedUser> {
        self.users.iter().find(|u| u.name == name)
    }

    pub fn context(&self, name: &str) -> Option<&NamedContext> {
        self.contexts.iter().find(|c| c.name == name)
    }

    pub fn context_names(&self) -> Vec<&str> {
        self.contexts.iter().map(|c| c.name.as_str()).collect()
    }

    /// Referential-integrity problems: duplicate or empty names, contexts
    /// pointing at missing clusters/users, a dangling current-context.
    pub fn structural_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        duplicate_names("cluster", &self.clusters, &mut problems);
        duplicate_names("user", &self.users, &mut problems);
        duplicate_names("context", &self.contexts, &mut problems);

        for ctx in &self.contexts {
            if self.cluster(&ctx.context.cluster).is_none() {
                problems.push(format!(
                    "context '{}' references missing cluster '{}'",
                    ctx.name, ctx.context.cluster
                ));
            }
            if self.user(&ctx.context.user).is_none() {
                problems.push(format!(
                    "context '{}' references missing user '{}'",
                    ctx.name, ctx.context.user
                ));
            }
        }

        if let Some(current) = &self.current_context {
            if self.context(current).is_none() {
                problems.push(format!("current-context '{}' does not exist", current));
            }
        }
        problems
    }
}

fn duplicate_names<T: Named>(kind: &str, entries: &[T], problems: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for entry in entries {
        if entry.name().is_empty() {
            problems.push(format!("{} entry with empty name", kind));
        } else if !seen.insert(entry.name()) {
            problems.push(format!("duplicate {} name '{}'", kind, entry.name()));
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Shape of `/etc/rancher/k3s/k3s.yaml` as written by k3s.
    pub const K3S_YAML: &str = r#"apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0t
    server: https://127.0.0.1:6443
  name: default
contexts:
- context:
    cluster: default
    user: default
  name: default
current-context: default
kind: Config
preferences: {}
users:
- name: default
  user:
    client-certificate-data: Y2xpZW50LWNlcnQ=
    client-key-data: Y2xpZW50LWtleQ==
"#;

    /// A workstation kubeconfig that already tracks an unrelated cluster.
    pub const WORKSTATION_YAML: &str = r#"apiVersion: v1
kind: Config
clusters:
- name: prod
  cluster:
    server: https://prod.example.com:6443
    insecure-skip-tls-verify: false
users:
- name: prod-admin
  user:
    token: abc123
contexts:
- name: prod
  context:
    cluster: prod
    user: prod-admin
    namespace: platform
current-context: prod
preferences:
  colors: true
"#;
}
