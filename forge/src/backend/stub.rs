//! Placeholders for hosted APIs that are configured but not wired up.

use super::{BackendError, BackendKind, CompletionRequest, GenerationBackend, RawResponse};

#[derive(Debug, Clone)]
pub struct StubBackend {
    kind: BackendKind,
}

impl StubBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self { kind }
    }
}

impl GenerationBackend for StubBackend {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn performs_external_calls(&self) -> bool {
        true
    }

    fn complete(&self, _request: &CompletionRequest<'_>) -> Result<RawResponse, BackendError> {
        Err(BackendError::Unsupported(format!(
            "the {} backend is not implemented; use 'command' with a CLI client instead",
            self.kind.as_str()
        )))
    }
}
