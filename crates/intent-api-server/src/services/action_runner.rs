use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::ActionsConfig;

/// JSON an action executable prints on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutput {
    pub message: String,
    pub status: String,
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid action name: {0:?}")]
    InvalidName(String),

    #[error("action executable not found: {0}")]
    NotFound(String),

    #[error("failed to start action: {0}")]
    Spawn(String),

    #[error("action exited with {code:?}: stderr={stderr:?} stdout={stdout:?}")]
    NonZeroExit {
        code: Option<i32>,
        stderr: String,
        stdout: String,
    },

    #[error("action produced unparseable output ({reason}): {stdout}")]
    InvalidOutput { stdout: String, reason: String },

    #[error("action timed out after {0:?}")]
    Timeout(Duration),
}

/// Runs an allow-listed action by name.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run_action(&self, name: &str) -> Result<ActionOutput, ActionError>;
}

/// Resolves `name` to `<directory>/<name><extension>` and runs it.
#[derive(Debug, Clone)]
pub struct ProcessActionRunner {
    directory: PathBuf,
    extension: String,
    timeout: Duration,
}

impl ProcessActionRunner {
    pub fn new(config: &ActionsConfig) -> Self {
        Self {
            directory: PathBuf::from(&config.directory),
            extension: config.executable_extension.clone(),
            timeout: Duration::from_secs(config.timeout_seconds.max(1)),
        }
    }

    pub fn with_directory(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            extension: String::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn executable_path(&self, name: &str) -> Result<PathBuf, ActionError> {
        let suspicious = name.is_empty()
            || name == "."
            || name.contains("..")
            || name.contains('/')
            || name.contains('\\');
        if suspicious {
            return Err(ActionError::InvalidName(name.to_string()));
        }
        Ok(self.directory.join(format!("{}{}", name, self.extension)))
    }
}

#[async_trait]
impl ActionRunner for ProcessActionRunner {
    async fn run_action(&self, name: &str) -> Result<ActionOutput, ActionError> {
        let path = self.executable_path(name)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ActionError::NotFound(path.display().to_string()));
        }

        info!("Running action {} ({})", name, path.display());
        let child = Command::new(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ActionError::Spawn(e.to_string()))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                error!("Action {} timed out after {:?}", name, self.timeout);
                ActionError::Timeout(self.timeout)
            })?
            .map_err(|e| ActionError::Spawn(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            error!("Action {} failed: {:?} {}", name, output.status.code(), stderr);
            return Err(ActionError::NonZeroExit {
                code: output.status.code(),
                stderr,
                stdout,
            });
        }

        debug!("Action {} stdout: {}", name, stdout.trim());
        serde_json::from_str::<ActionOutput>(stdout.trim()).map_err(|e| ActionError::InvalidOutput {
            stdout,
            reason: e.to_string(),
        })
    }
}
