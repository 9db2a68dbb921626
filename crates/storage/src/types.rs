//! Common types used across storage operations.

use bytes::Bytes;

/// Key-value pair returned from prefix scans.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use fleetauth_storage::KeyValue;
///
/// let kv = KeyValue::new(Bytes::from("services/c3ZjLWE"), Bytes::from(r#"{"name":"svc-a"}"#));
/// assert_eq!(kv.key, Bytes::from("services/c3ZjLWE"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    #[must_use]
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}
