//! Opaque payload documents.

/// An arbitrary nested document (object / array / scalar).
///
/// Payloads and vendor results are never interpreted by the domain beyond the
/// sanitizer, so the tagged JSON value is used directly.
pub type Document = serde_json::Value;

/// Approximate serialized size of a document in bytes.
pub fn encoded_len(document: &Document) -> usize {
    serde_json::to_vec(document).map(|bytes| bytes.len()).unwrap_or(0)
}
