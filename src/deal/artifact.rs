// Content-addressed artifact generation.

use async_trait::async_trait;

use crate::deal::errors::DealError;
use crate::deal::traits::ArtifactGenerator;
use crate::deal::types::{ArtifactRef, VersionPayload};

/// Generator that addresses artifacts under a configured base URI.
///
/// The URI is derived purely from the payload's content hash, so repeated
/// generation for identical content lands on the same address.
pub struct UriArtifactGenerator {
    base_uri: String,
}

impl UriArtifactGenerator {
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
        }
    }
}

#[async_trait]
impl ArtifactGenerator for UriArtifactGenerator {
    async fn generate(
        &self,
        _payload: &VersionPayload,
        content_hash: &str,
    ) -> Result<ArtifactRef, DealError> {
        Ok(ArtifactRef {
            content_hash: content_hash.to_string(),
            uri: format!("{}/{content_hash}.pdf", self.base_uri),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uri_is_keyed_by_content_hash() {
        let generator = UriArtifactGenerator::new("artifact://deals");
        let artifact = generator
            .generate(&VersionPayload::default(), "deadbeef")
            .await
            .unwrap();
        assert_eq!(artifact.uri, "artifact://deals/deadbeef.pdf");
        assert_eq!(artifact.content_hash, "deadbeef");
    }
}
