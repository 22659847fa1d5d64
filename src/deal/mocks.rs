// Test doubles for the external artifact generator - no side effects.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::deal::errors::DealError;
use crate::deal::traits::ArtifactGenerator;
use crate::deal::types::{ArtifactRef, VersionPayload};

/// Deterministic generator that records how often it was invoked.
#[derive(Debug, Default)]
pub struct RecordingArtifactGenerator {
    calls: AtomicUsize,
}

impl RecordingArtifactGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactGenerator for RecordingArtifactGenerator {
    async fn generate(
        &self,
        _payload: &VersionPayload,
        content_hash: &str,
    ) -> Result<ArtifactRef, DealError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ArtifactRef {
            content_hash: content_hash.to_string(),
            uri: format!("artifact://deals/{content_hash}.pdf"),
        })
    }
}

/// Generator that always fails, for exercising the rollback path.
#[derive(Debug)]
pub struct FailingArtifactGenerator {
    pub message: String,
}

impl Default for FailingArtifactGenerator {
    fn default() -> Self {
        Self {
            message: "renderer unavailable".to_string(),
        }
    }
}

#[async_trait]
impl ArtifactGenerator for FailingArtifactGenerator {
    async fn generate(
        &self,
        _payload: &VersionPayload,
        _content_hash: &str,
    ) -> Result<ArtifactRef, DealError> {
        Err(DealError::ArtifactFailed(self.message.clone()))
    }
}

/// Generator that never completes within any sane deadline. Exercises the
/// coordinator's generation timeout.
#[derive(Debug, Default)]
pub struct StalledArtifactGenerator;

#[async_trait]
impl ArtifactGenerator for StalledArtifactGenerator {
    async fn generate(
        &self,
        _payload: &VersionPayload,
        content_hash: &str,
    ) -> Result<ArtifactRef, DealError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(ArtifactRef {
            content_hash: content_hash.to_string(),
            uri: format!("artifact://deals/{content_hash}.pdf"),
        })
    }
}

/// Fails the first `failures` calls, then behaves like the recording
/// generator. Models a transiently unavailable renderer.
#[derive(Debug)]
pub struct FlakyArtifactGenerator {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyArtifactGenerator {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactGenerator for FlakyArtifactGenerator {
    async fn generate(
        &self,
        _payload: &VersionPayload,
        content_hash: &str,
    ) -> Result<ArtifactRef, DealError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(DealError::ArtifactFailed(format!(
                "transient failure on attempt {}",
                attempt + 1
            )));
        }
        Ok(ArtifactRef {
            content_hash: content_hash.to_string(),
            uri: format!("artifact://deals/{content_hash}.pdf"),
        })
    }
}
