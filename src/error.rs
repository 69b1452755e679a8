// src/error.rs
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Pipeline stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Fetching,
    Rewriting,
    Merging,
    Activating,
    Probing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Fetching => "fetch",
            Stage::Rewriting => "rewrite",
            Stage::Merging => "merge",
            Stage::Activating => "activate",
            Stage::Probing => "probe",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("[{stage}] configuration error: {message}")]
    Config { stage: Stage, message: String },

    #[error("[{stage}] transport error reaching {target}: {message}")]
    Transport {
        stage: Stage,
        target: String,
        message: String,
    },

    #[error("[{stage}] malformed credential document: {message}")]
    Parse { stage: Stage, message: String },

    #[error("[{stage}] cannot merge fetched document: {message}")]
    Merge { stage: Stage, message: String },

    #[error("[{stage}] context name conflict on '{name}': {message}")]
    NameConflict {
        stage: Stage,
        name: String,
        message: String,
    },

    #[error("[{stage}] cluster unreachable via context '{context}': {message}")]
    Connectivity {
        stage: Stage,
        context: String,
        message: String,
    },

    #[error("[{stage}] I/O error at {path:?}: {source}")]
    Io {
        stage: Stage,
        path: PathBuf,
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, AcquireError>;

impl AcquireError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            stage: Stage::Config,
            message: message.into(),
        }
    }

    pub fn transport(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            stage: Stage::Fetching,
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn parse(stage: Stage, message: impl Into<String>) -> Self {
        Self::Parse {
            stage,
            message: message.into(),
        }
    }

    pub fn merge(message: impl Into<String>) -> Self {
        Self::Merge {
            stage: Stage::Merging,
            message: message.into(),
        }
    }

    pub fn name_conflict(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NameConflict {
            stage: Stage::Activating,
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn connectivity(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connectivity {
            stage: Stage::Probing,
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn io(stage: Stage, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            stage,
            path: path.into(),
            source,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Config { stage, .. }
            | Self::Transport { stage, .. }
            | Self::Parse { stage, .. }
            | Self::Merge { stage, .. }
            | Self::NameConflict { stage, .. }
            | Self::Connectivity { stage, .. }
            | Self::Io { stage, .. } => *stage,
        }
    }

    /// Process exit code for this failure. Zero is reserved for `Connected`.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Io { .. } => 1,
            Self::Config { .. } => 2,
            Self::Transport { .. } => 10,
            Self::Parse { .. } => 11,
            Self::Merge { .. } => 12,
            Self::NameConflict { .. } => 13,
            Self::Connectivity { .. } => 14,
        }
    }

    /// Connectivity is the only failure that leaves the new store in place.
    pub fn store_committed(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}
