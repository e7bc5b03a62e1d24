//! Document store: optimistic-concurrency versioned blobs (§4.8), distinct
//! from the conflict-free [`crate::merge`] path — a document write declares
//! the version it read, and a stale version is rejected with `Conflict`
//! rather than silently merged, since document content (unlike structured
//! shared-state fields) has no field-level granularity to merge on.

use chrono::Utc;
use uuid::Uuid;

use gw_core::error::{GatewayError, GatewayResult};
use gw_core::tenant::TenantId;
use gw_core::workspace::Document;

/// Frame payloads above this size are streamed as `context.chunk`
/// notifications instead of inlined in one response (mirrors the binary
/// frame codec's own compression threshold order-of-magnitude, scaled up
/// for already-compressed document text).
pub const CHUNK_THRESHOLD_BYTES: usize = 64 * 1024;
pub const CHUNK_SIZE_BYTES: usize = 16 * 1024;

pub fn new_document(tenant: TenantId, workspace: Uuid, content: String) -> Document {
    Document {
        id: Uuid::new_v4(),
        tenant,
        workspace,
        content,
        version: 1,
        updated_at: Utc::now(),
    }
}

/// `document.update(expected_version, content)`: rejects with `Conflict`
/// if `expected_version` doesn't match the document's current version,
/// otherwise applies the write and bumps the version.
pub fn update(doc: &mut Document, expected_version: u64, content: String) -> GatewayResult<()> {
    if doc.version != expected_version {
        return Err(GatewayError::conflict(format!(
            "document {} is at version {} but update expected {expected_version}",
            doc.id, doc.version
        )));
    }
    doc.content = content;
    doc.version += 1;
    doc.updated_at = Utc::now();
    Ok(())
}

/// Splits `content` into ordered chunks no larger than [`CHUNK_SIZE_BYTES`]
/// for `context.chunk` streaming, only when it exceeds
/// [`CHUNK_THRESHOLD_BYTES`] — small documents are returned whole.
pub fn chunk(content: &str) -> Vec<&str> {
    if content.len() <= CHUNK_THRESHOLD_BYTES {
        return vec![content];
    }
    let bytes = content.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        let mut end = (start + CHUNK_SIZE_BYTES).min(bytes.len());
        // Never split a multi-byte UTF-8 sequence across chunk boundaries.
        while end < bytes.len() && !content.is_char_boundary(end) {
            end -= 1;
        }
        chunks.push(&content[start..end]);
        start = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_with_current_version_succeeds_and_bumps_version() {
        let mut doc = new_document(TenantId::new(), Uuid::new_v4(), "v1".to_string());
        update(&mut doc, 1, "v2".to_string()).unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.content, "v2");
    }

    #[test]
    fn update_with_stale_version_is_conflict() {
        let mut doc = new_document(TenantId::new(), Uuid::new_v4(), "v1".to_string());
        let err = update(&mut doc, 0, "v2".to_string()).unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
        assert_eq!(doc.content, "v1");
    }

    #[test]
    fn small_document_is_not_chunked() {
        let content = "short content";
        assert_eq!(chunk(content), vec![content]);
    }

    #[test]
    fn large_document_splits_into_bounded_chunks() {
        let content = "x".repeat(CHUNK_THRESHOLD_BYTES + 1);
        let chunks = chunk(&content);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.len() <= CHUNK_SIZE_BYTES);
        }
        assert_eq!(chunks.concat(), content);
    }
}
