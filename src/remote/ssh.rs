// src/remote/ssh.rs

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{AcquireError, Result, Stage};
use crate::types::FetchTarget;
use crate::utils::logging::Logger;

/// ssh reserves this exit status for its own failures (auth, network).
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Secure remote-execution channel able to read one privileged file.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Streams the remote file at `target.remote_path` into `dest`.
    async fn fetch_into(&self, target: &FetchTarget, dest: &Path, timeout: Duration) -> Result<()>;
}

pub struct SshTransport {
    program: String,
    key_path: Option<PathBuf>,
    connect_timeout_secs: u64,
}

impl SshTransport {
    pub fn new(key_path: Option<PathBuf>, connect_timeout_secs: u64) -> Self {
        Self {
            program: "ssh".to_string(),
            key_path,
            connect_timeout_secs,
        }
    }

    /// Runs `program` instead of the `ssh` found on `PATH`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn ssh_args(&self, target: &FetchTarget) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs.max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-p".to_string(),
            target.port.to_string(),
        ];
        if let Some(key) = &self.key_path {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(format!("{}@{}", target.user, target.host));
        args.push(format!("sudo -n cat {}", shell_quote(&target.remote_path)));
        args
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn fetch_into(&self, target: &FetchTarget, dest: &Path, timeout: Duration) -> Result<()> {
        let sink = create_private(dest).map_err(|e| AcquireError::io(Stage::Fetching, dest, e))?;

        let child = Command::new(&self.program)
            .args(self.ssh_args(target))
            .stdin(Stdio::null())
            .stdout(Stdio::from(sink))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AcquireError::transport(target.to_string(), format!("cannot run {}: {}", self.program, e)))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| AcquireError::transport(target.to_string(), e.to_string()))?,
            Err(_) => {
                return Err(AcquireError::transport(
                    target.to_string(),
                    format!("no response within {}s", timeout.as_secs()),
                ))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = match output.status.code() {
                Some(SSH_CONNECTION_FAILURE) => format!("connection failed: {}", stderr),
                Some(code) => format!(
                    "reading {} exited with {}: {}",
                    target.remote_path, code, stderr
                ),
                None => format!("ssh terminated by signal: {}", stderr),
            };
            return Err(AcquireError::transport(target.to_string(), message));
        }
        Ok(())
    }
}

/// Fetches the remote document through a private scratch directory that is
/// removed whether or not the fetch succeeds.
pub async fn fetch_document(
    transport: &dyn RemoteTransport,
    target: &FetchTarget,
    timeout: Duration,
    logger: &mut dyn Logger,
) -> Result<String> {
    let scratch = tempfile::Builder::new()
        .prefix("kubeconfig-acquire-")
        .tempdir()
        .map_err(|e| AcquireError::io(Stage::Fetching, std::env::temp_dir(), e))?;
    let dest = scratch.path().join("remote.yaml");

    logger.stage_log(
        Stage::Fetching,
        &format!("Reading {} from {}", target.remote_path, target),
    );
    logger.debug_log(&format!("Scratch file: {}", dest.display()));

    transport.fetch_into(target, &dest, timeout).await?;
    let bytes = std::fs::read(&dest).map_err(|e| AcquireError::io(Stage::Fetching, &dest, e))?;
    let raw = String::from_utf8(bytes).map_err(|e| {
        AcquireError::parse(
            Stage::Fetching,
            format!("{} on {} is not valid UTF-8: {}", target.remote_path, target, e.utf8_error()),
        )
    })?;

    logger.stage_log(Stage::Fetching, &format!("Fetched {} bytes", raw.len()));
    Ok(raw)
}

fn create_private(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
