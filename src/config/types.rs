// config/types.rs
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use crate::error::{AcquireError, Result};
use crate::types::ClusterEndpoint;

/// Inputs of one acquisition run. Loaded from JSON, then overridden by CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquireConfig {
    pub master_host: String,
    pub ssh_user: String,
    pub ssh_port: u16,
    pub api_port: u16,
    pub context_name: String,
    pub ssh_key_path: Option<String>,
    pub remote_kubeconfig_path: String,
    pub source_context: String,
    pub kubeconfig_path: Option<String>,
    pub fetch_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub log_file: Option<String>,
    pub ssh_binary: String,
    pub kubectl_binary: String,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            master_host: String::new(),
            ssh_user: "ubuntu".to_string(),
            ssh_port: 22,
            api_port: 6443,
            context_name: "homelab-k3s".to_string(),
            ssh_key_path: None,
            remote_kubeconfig_path: "/etc/rancher/k3s/k3s.yaml".to_string(),
            source_context: "default".to_string(),
            kubeconfig_path: None,
            fetch_timeout_secs: 20,
            probe_timeout_secs: 15,
            log_file: None,
            ssh_binary: "ssh".to_string(),
            kubectl_binary: "kubectl".to_string(),
        }
    }
}

impl AcquireConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let config_str = fs::read_to_string(path)?;
        serde_json::from_str(&config_str).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let config_str = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, config_str)
    }

    pub fn validate(&self) -> Result<()> {
        if self.master_host.trim().is_empty() {
            return Err(AcquireError::config("master host is not set"));
        }
        if self.ssh_user.trim().is_empty() {
            return Err(AcquireError::config("ssh user is not set"));
        }
        if self.ssh_port == 0 || self.api_port == 0 {
            return Err(AcquireError::config("ports must be non-zero"));
        }
        if self.context_name.trim().is_empty() {
            return Err(AcquireError::config("context name is not set"));
        }
        if self.context_name.chars().any(char::is_whitespace) {
            return Err(AcquireError::config(format!(
                "context name '{}' must not contain whitespace",
                self.context_name
            )));
        }
        if self.remote_kubeconfig_path.trim().is_empty() {
            return Err(AcquireError::config("remote kubeconfig path is not set"));
        }
        if self.ssh_binary.trim().is_empty() || self.kubectl_binary.trim().is_empty() {
            return Err(AcquireError::config("ssh and kubectl binaries must be named"));
        }
        if let Some(key) = self.ssh_key_path() {
            if !key.exists() {
                return Err(AcquireError::config(format!(
                    "SSH key not found at: {}",
                    key.display()
                )));
            }
        }
        if self.fetch_timeout_secs == 0 || self.probe_timeout_secs == 0 {
            return Err(AcquireError::config("timeouts must be at least one second"));
        }
        Ok(())
    }

    pub fn ssh_key_path(&self) -> Option<PathBuf> {
        self.ssh_key_path
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
    }

    /// Canonical store location: explicit path, else first `$KUBECONFIG` entry,
    /// else `~/.kube/config`.
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.kubeconfig_path {
            return Ok(PathBuf::from(shellexpand::tilde(path).to_string()));
        }
        if let Some(path) = std::env::var_os("KUBECONFIG")
            .and_then(|v| std::env::split_paths(&v).find(|p| !p.as_os_str().is_empty()))
        {
            return Ok(path);
        }
        dirs::home_dir()
            .map(|home| home.join(".kube").join("config"))
            .ok_or_else(|| AcquireError::config("cannot determine home directory"))
    }

    pub fn endpoint(&self) -> ClusterEndpoint {
        ClusterEndpoint::new(self.master_host.clone(), self.api_port)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Default config location under the user's config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("kubeconfig-acquire").join("config.json"))
}
