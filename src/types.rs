// types.rs
use serde::Serialize;
use std::fmt;

/// Externally reachable API address that replaces the loopback server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterEndpoint {
    pub host: String,
    pub port: u16,
}

impl ClusterEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn server_url(&self) -> String {
        // IPv6 literals need brackets inside a URL authority
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("https://[{}]:{}", self.host, self.port)
        } else {
            format!("https://{}:{}", self.host, self.port)
        }
    }
}

/// Where to fetch the remote kubeconfig from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub remote_path: String,
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Fetching,
    Rewriting,
    Merging,
    Activating,
    Connected,
    Unreachable,
}

impl PipelineState {
    /// Forward-only transitions; terminal states have no successor.
    pub fn next(self) -> Option<Self> {
        match self {
            PipelineState::Fetching => Some(PipelineState::Rewriting),
            PipelineState::Rewriting => Some(PipelineState::Merging),
            PipelineState::Merging => Some(PipelineState::Activating),
            PipelineState::Activating | PipelineState::Connected | PipelineState::Unreachable => {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_url_brackets_ipv6() {
        assert_eq!(
            ClusterEndpoint::new("10.0.0.5", 6443).server_url(),
            "https://10.0.0.5:6443"
        );
        assert_eq!(
            ClusterEndpoint::new("fd00::5", 6443).server_url(),
            "https://[fd00::5]:6443"
        );
    }

    #[test]
    fn states_only_move_forward() {
        let mut state = PipelineState::Fetching;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            seen.push(next);
            state = next;
        }
        assert_eq!(
            seen,
            vec![
                PipelineState::Fetching,
                PipelineState::Rewriting,
                PipelineState::Merging,
                PipelineState::Activating,
            ]
        );
        assert!(PipelineState::Connected.next().is_none());
        assert!(PipelineState::Unreachable.next().is_none());
    }
}
