//! Encoding patch applied before tests that depend on the generated
//! immediate circuit.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Idempotent mutation of a known circuit file. Safe to apply repeatedly.
#[async_trait]
pub trait EncodingPatcher: Send + Sync {
    async fn apply(&self) -> anyhow::Result<()>;
}

/// Patcher for projects without a generated circuit.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPatcher;

#[async_trait]
impl EncodingPatcher for NoopPatcher {
    async fn apply(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Runs an external patch command in the project root.
#[derive(Debug, Clone)]
pub struct CommandPatcher {
    command: Vec<String>,
    working_dir: PathBuf,
}

impl CommandPatcher {
    pub fn new(command: Vec<String>, working_dir: PathBuf) -> Self {
        Self {
            command,
            working_dir,
        }
    }
}

#[async_trait]
impl EncodingPatcher for CommandPatcher {
    async fn apply(&self) -> anyhow::Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            anyhow::bail!("patch command is empty");
        };

        debug!(command = ?self.command, "Applying encoding patch");
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            anyhow::bail!(
                "patch command {} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
