//! Identity extraction from object names and record headers.
//!
//! An identity is the canonical unit-of-work key shared between the bucket,
//! the neighbor server, and the ledger. It is derived from a name by
//! stripping the required `<tag>|` prefix and anything from the first `.`
//! onwards. A name without the tag has no identity and is never submitted.

/// Derive the canonical identity from an object name or embedded record id.
///
/// Returns `None` when the name does not begin with `<tag>|`. Never errors:
/// a misnamed object is a classification, not a fault.
///
/// ```
/// use seqfeed::identity::extract_identity;
///
/// assert_eq!(extract_identity("SEQ", "SEQ|ABC123.fasta"), Some("ABC123".to_string()));
/// assert_eq!(extract_identity("SEQ", "other.fasta"), None);
/// ```
pub fn extract_identity(tag: &str, name: &str) -> Option<String> {
    let rest = name.strip_prefix(tag)?.strip_prefix('|')?;
    let identity = match rest.find('.') {
        Some(pos) => &rest[..pos],
        None => rest,
    };
    if identity.is_empty() {
        return None;
    }
    Some(identity.to_string())
}
