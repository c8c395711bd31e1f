//! Push mirroring: run the mirror script for a repository after a push.

use std::path::PathBuf;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::TaskFault;

/// Script run when no override is configured.
pub const DEFAULT_PUSH_SCRIPT: &str = include_str!("push_script.sh");

/// A registered push mirror, keyed by the source repository's `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMirror {
    pub name: String,
    /// Push URL of the mirror.
    pub target: String,
    /// Overrides the clone URL from the push event.
    #[serde(default)]
    pub source: String,
    /// Webhook secret; empty disables signature checks.
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub push_key: String,
    #[serde(default)]
    pub pull_key: String,
}

/// Repository coordinates taken from the push event.
#[derive(Debug, Clone)]
pub struct PushSource {
    pub owner: String,
    pub name: String,
    pub git_url: String,
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("failed to start {shell}: {source}")]
    Spawn {
        shell: String,
        source: std::io::Error,
    },

    #[error("failed to write push script to stdin: {0}")]
    Stdin(std::io::Error),

    #[error("failed waiting for push script: {0}")]
    Wait(std::io::Error),

    /// `None` when the script was killed by a signal.
    #[error("push script exited unsuccessfully (code {0:?})")]
    Exit(Option<i32>),

    #[error(transparent)]
    Fault(#[from] TaskFault),
}

pub struct PushRunner {
    shell: String,
    shell_args: Vec<String>,
    data_dir: PathBuf,
    script: String,
}

impl PushRunner {
    pub fn new(
        shell: impl Into<String>,
        shell_args: Vec<String>,
        data_dir: impl Into<PathBuf>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            shell: shell.into(),
            shell_args,
            data_dir: data_dir.into(),
            script: script.into(),
        }
    }

    /// Run the push script for `mirror`, streaming its output into the log.
    pub async fn run(&self, mirror: &PushMirror, source: &PushSource) -> Result<(), PushError> {
        let span = info_span!("push", repository = %mirror.name);
        self.run_script(mirror, source).instrument(span).await
    }

    async fn run_script(&self, mirror: &PushMirror, source: &PushSource) -> Result<(), PushError> {
        debug!("Running push script with {}", self.shell);

        let mut child = Command::new(&self.shell)
            .args(&self.shell_args)
            .current_dir(&self.data_dir)
            .env("MM_REPOSITORY_OWNER", &source.owner)
            .env("MM_REPOSITORY_NAME", &source.name)
            .env("MM_SOURCE_URL", &source.git_url)
            .env("MM_SOURCE_URL_OVERRIDE", &mirror.source)
            .env("MM_SOURCE_KEY_PATH", &mirror.pull_key)
            .env("MM_TARGET_URL", &mirror.target)
            .env("MM_TARGET_KEY_PATH", &mirror.push_key)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PushError::Spawn {
                shell: self.shell.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.script.as_bytes())
                .await
                .map_err(PushError::Stdin)?;
            // Dropping stdin closes it so the shell sees EOF.
        }

        let stdout = child.stdout.take().map(|out| forward_lines(out, false));
        let stderr = child.stderr.take().map(|err| forward_lines(err, true));
        tokio::join!(
            async {
                if let Some(task) = stdout {
                    task.await;
                }
            },
            async {
                if let Some(task) = stderr {
                    task.await;
                }
            }
        );

        let status = child.wait().await.map_err(PushError::Wait)?;
        if status.success() {
            info!("Push mirror complete");
            Ok(())
        } else {
            Err(PushError::Exit(status.code()))
        }
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, is_stderr: bool) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_stderr => warn!("{}", line),
            Ok(Some(line)) => info!("{}", line),
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read push script output: {}", e);
                break;
            }
        }
    }
}
