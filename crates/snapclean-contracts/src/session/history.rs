use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Raw image data plus the MIME type reported by whoever produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl ImageBytes {
    pub fn new(bytes: Vec<u8>, mime_type: Option<String>) -> Self {
        Self { bytes, mime_type }
    }

    pub fn mime_or_default(&self) -> &str {
        self.mime_type.as_deref().unwrap_or("image/png")
    }
}

/// Shared handle to an in-memory image buffer. The source image, history
/// entries, and the active item may all alias the same buffer; nothing is
/// freed until the session resets or the process exits.
pub type ImageRef = Arc<ImageBytes>;

/// One completed edit. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct EditedImage {
    pub id: String,
    pub prompt: String,
    pub created_at: String,
    pub digest: String,
    pub original: ImageRef,
    pub edited: ImageRef,
}

impl EditedImage {
    pub fn new(prompt: impl Into<String>, original: ImageRef, edited: ImageRef) -> Self {
        let digest = content_digest(&edited.bytes);
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            created_at: now_utc_iso(),
            digest,
            original,
            edited,
        }
    }

    /// Short identifier for listings (first 8 hex chars of the digest).
    pub fn short_digest(&self) -> &str {
        let end = self.digest.len().min(8);
        &self.digest[..end]
    }

    /// Event-payload summary: identifiers and sizes, never the raw bytes.
    pub fn summary_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("entry_id".to_string(), Value::String(self.id.clone()));
        payload.insert("prompt".to_string(), Value::String(self.prompt.clone()));
        payload.insert(
            "created_at".to_string(),
            Value::String(self.created_at.clone()),
        );
        payload.insert("digest".to_string(), Value::String(self.digest.clone()));
        payload.insert(
            "mime_type".to_string(),
            Value::String(self.edited.mime_or_default().to_string()),
        );
        payload.insert(
            "byte_len".to_string(),
            Value::Number((self.edited.bytes.len() as u64).into()),
        );
        payload
    }
}

/// In-memory record of completed edits, newest first. Append-only: entries
/// are never mutated or removed except by `clear`.
#[derive(Debug, Clone, Default)]
pub struct EditHistory {
    entries: Vec<EditedImage>,
}

impl EditHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepend(&mut self, entry: EditedImage) {
        self.entries.insert(0, entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, id: &str) -> Option<&EditedImage> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn entries(&self) -> &[EditedImage] {
        self.entries.as_slice()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;
    use serde_json::Value;

    use super::{EditHistory, EditedImage, ImageBytes, ImageRef};

    fn image(bytes: &[u8]) -> ImageRef {
        Arc::new(ImageBytes::new(
            bytes.to_vec(),
            Some("image/png".to_string()),
        ))
    }

    #[test]
    fn prepend_keeps_newest_first() {
        let source = image(b"source");
        let mut history = EditHistory::new();
        let first = EditedImage::new("Remove background", source.clone(), image(b"one"));
        let second = EditedImage::new("Fix lighting and shadows", source, image(b"two"));

        history.prepend(first.clone());
        history.prepend(second.clone());

        assert_eq!(history.len(), 2);
        assert_eq!(history.entries()[0].id, second.id);
        assert_eq!(history.entries()[1].id, first.id);
    }

    #[test]
    fn clear_empties_every_entry() {
        let source = image(b"source");
        let mut history = EditHistory::new();
        history.prepend(EditedImage::new("a", source.clone(), image(b"one")));
        history.prepend(EditedImage::new("b", source, image(b"two")));

        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.len(), 0);
    }

    #[test]
    fn lookup_by_id_finds_only_present_entries() {
        let source = image(b"source");
        let mut history = EditHistory::new();
        let entry = EditedImage::new("a", source, image(b"one"));
        let id = entry.id.clone();
        history.prepend(entry);

        assert!(history.contains(&id));
        assert_eq!(history.get(&id).map(|entry| entry.prompt.as_str()), Some("a"));
        assert!(history.get("missing").is_none());
    }

    #[test]
    fn entry_ids_are_unique_and_timestamps_parse() -> anyhow::Result<()> {
        let source = image(b"source");
        let one = EditedImage::new("a", source.clone(), image(b"one"));
        let two = EditedImage::new("a", source, image(b"one"));

        assert_ne!(one.id, two.id);
        DateTime::parse_from_rfc3339(&one.created_at)?;
        Ok(())
    }

    #[test]
    fn digest_is_stable_for_identical_bytes() {
        let source = image(b"source");
        let one = EditedImage::new("a", source.clone(), image(b"same"));
        let two = EditedImage::new("b", source, image(b"same"));

        assert_eq!(one.digest, two.digest);
        assert_eq!(one.short_digest().len(), 8);
    }

    #[test]
    fn summary_payload_carries_sizes_not_bytes() {
        let source = image(b"source");
        let entry = EditedImage::new("Remove background", source, image(b"edited"));
        let payload = entry.summary_payload();

        assert_eq!(payload["entry_id"], Value::String(entry.id.clone()));
        assert_eq!(
            payload["prompt"],
            Value::String("Remove background".to_string())
        );
        assert_eq!(payload["byte_len"], Value::Number(6u64.into()));
        assert!(payload.get("bytes").is_none());
    }
}
