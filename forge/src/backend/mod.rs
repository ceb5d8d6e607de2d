//! Generation backend abstraction.
//!
//! The [`GenerationBackend`] trait decouples orchestration from the thing that
//! actually writes content. Production code selects one variant of the closed
//! [`Backend`] set from configuration; tests implement the trait directly with
//! scripted responses.

pub mod command;
pub mod echo;
pub mod retry;
pub mod stub;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::plan::Goal;
use crate::core::prelude::Prelude;

pub use command::CommandBackend;
pub use echo::EchoBackend;
pub use stub::StubBackend;

/// Failures a backend may signal. All of them are routine outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("backend does not support this operation: {0}")]
    Unsupported(String),
}

impl BackendError {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Authentication(_) => "authentication",
            BackendError::RateLimited(_) => "rate_limited",
            BackendError::Transport(_) => "transport",
            BackendError::Unsupported(_) => "unsupported",
        }
    }

    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimited(_) | BackendError::Transport(_)
        )
    }
}

/// One backend invocation.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub prelude: &'a Prelude,
    pub goal: &'a Goal,
    /// Full rendered request (prelude plus output contract and goal).
    pub prompt: &'a str,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub text: String,
}

impl RawResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

pub trait GenerationBackend {
    /// Identifier recorded in plans, session state and audit records.
    fn name(&self) -> &str;

    /// Whether calls leave the machine (network, paid APIs).
    fn performs_external_calls(&self) -> bool;

    fn complete(&self, request: &CompletionRequest<'_>) -> Result<RawResponse, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Echo,
    Command,
    Openai,
    Anthropic,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Echo => "echo",
            BackendKind::Command => "command",
            BackendKind::Openai => "openai",
            BackendKind::Anthropic => "anthropic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "echo" => Some(BackendKind::Echo),
            "command" => Some(BackendKind::Command),
            "openai" => Some(BackendKind::Openai),
            "anthropic" => Some(BackendKind::Anthropic),
            _ => None,
        }
    }
}

/// Closed set of configured backends.
#[derive(Debug, Clone)]
pub enum Backend {
    Echo(EchoBackend),
    Command(CommandBackend),
    Stub(StubBackend),
}

impl GenerationBackend for Backend {
    fn name(&self) -> &str {
        match self {
            Backend::Echo(b) => b.name(),
            Backend::Command(b) => b.name(),
            Backend::Stub(b) => b.name(),
        }
    }

    fn performs_external_calls(&self) -> bool {
        match self {
            Backend::Echo(b) => b.performs_external_calls(),
            Backend::Command(b) => b.performs_external_calls(),
            Backend::Stub(b) => b.performs_external_calls(),
        }
    }

    fn complete(&self, request: &CompletionRequest<'_>) -> Result<RawResponse, BackendError> {
        match self {
            Backend::Echo(b) => b.complete(request),
            Backend::Command(b) => b.complete(request),
            Backend::Stub(b) => b.complete(request),
        }
    }
}
