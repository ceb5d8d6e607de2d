//! Backend that shells out to an external generator (e.g. an LLM CLI).
//!
//! The rendered prompt is written to the child's stdin and stdout is taken as
//! the raw response. Failures are classified into [`BackendError`] kinds from
//! the exit status and stderr.

use std::path::PathBuf;
use std::process::Command;

use tracing::{info, instrument, warn};

use super::{BackendError, CompletionRequest, GenerationBackend, RawResponse};
use crate::io::process::run_with_timeout;

#[derive(Debug, Clone)]
pub struct CommandBackend {
    argv: Vec<String>,
    credential_env: Option<String>,
    capture_limit: usize,
    workdir: Option<PathBuf>,
}

impl CommandBackend {
    /// `argv[0]` is the program; the rest are passed through verbatim.
    pub fn new(argv: Vec<String>, credential_env: Option<String>, capture_limit: usize) -> Self {
        Self {
            argv,
            credential_env,
            capture_limit,
            workdir: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    fn check_credential(&self) -> Result<(), BackendError> {
        let Some(name) = &self.credential_env else {
            return Ok(());
        };
        match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => Ok(()),
            _ => Err(BackendError::Authentication(format!(
                "environment variable {name} is not set"
            ))),
        }
    }
}

impl GenerationBackend for CommandBackend {
    fn name(&self) -> &str {
        "command"
    }

    fn performs_external_calls(&self) -> bool {
        true
    }

    #[instrument(
        skip_all,
        fields(
            program = self.argv.first().map(String::as_str),
            timeout_secs = request.timeout.as_secs()
        )
    )]
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<RawResponse, BackendError> {
        self.check_credential()?;
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| BackendError::Transport("backend command is empty".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        info!("invoking backend command");
        let output = run_with_timeout(
            cmd,
            Some(request.prompt.as_bytes().to_vec()),
            request.timeout,
            self.capture_limit,
        )
        .map_err(|err| BackendError::Transport(format!("{err:#}")))?;

        if output.timed_out {
            return Err(BackendError::Transport(format!(
                "backend command timed out after {}s",
                request.timeout.as_secs()
            )));
        }
        if !output.status.success() {
            let stderr = output.stderr_lossy();
            warn!(exit_code = ?output.status.code(), "backend command failed");
            return Err(classify_failure(output.status.code(), stderr.trim()));
        }
        Ok(RawResponse::new(output.stdout_lossy()))
    }
}

/// Map a failed invocation to an error kind from its stderr.
pub fn classify_failure(exit_code: Option<i32>, stderr: &str) -> BackendError {
    let lowered = stderr.to_lowercase();
    let detail = if stderr.is_empty() {
        format!("exit status {exit_code:?}")
    } else {
        format!("exit status {exit_code:?}: {stderr}")
    };
    if ["401", "unauthorized", "invalid api key"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        BackendError::Authentication(detail)
    } else if ["429", "rate limit"].iter().any(|needle| lowered.contains(needle)) {
        BackendError::RateLimited(detail)
    } else {
        BackendError::Transport(detail)
    }
}
