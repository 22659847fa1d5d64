// Deterministic content hashing of version payloads.

use sha2::{Digest, Sha256};

use crate::deal::errors::DealError;
use crate::deal::types::VersionPayload;

/// Hash of the payload's canonical JSON encoding.
///
/// Field order is fixed by the struct definition, so identical payloads
/// always produce identical digests, the key for idempotent artifact
/// regeneration. An encoding failure is surfaced, never hashed.
pub fn content_hash(payload: &VersionPayload) -> Result<String, DealError> {
    let bytes = serde_json::to_vec(payload)
        .map_err(|e| DealError::Unexpected(format!("payload encoding failed: {e}")))?;
    let digest = Sha256::digest(&bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    Ok(out)
}
