use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Mint a time-prefixed unique token: `<epoch-millis>-<uuid>`.
///
/// The millisecond prefix keeps tokens roughly sortable by creation time;
/// the uuid suffix guarantees uniqueness so ids are never reused within or
/// across peer instances.
pub fn mint_token() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{}-{}", millis, uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(String);

impl CallId {
    pub fn mint() -> Self {
        CallId(mint_token())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl HandleId {
    pub fn mint() -> Self {
        HandleId(mint_token())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        CallId(value)
    }
}

impl From<String> for HandleId {
    fn from(value: String) -> Self {
        HandleId(value)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        CallId(value.to_string())
    }
}

impl From<&str> for HandleId {
    fn from(value: &str) -> Self {
        HandleId(value.to_string())
    }
}

/// Index of a node within a [`SnapshotGraph`](crate::snapshot::SnapshotGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tokens_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(mint_token()), "duplicate token minted");
        }
    }

    #[test]
    fn test_token_has_time_prefix() {
        let token = mint_token();
        let prefix = token.split('-').next().unwrap();
        assert!(prefix.parse::<u128>().is_ok());
    }

    #[test]
    fn test_id_serialization_is_transparent() {
        let id = CallId::from("123-abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"123-abc\"");

        let back: CallId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_handle_id_display_is_raw() {
        let id = HandleId::from("1700000000000-deadbeef");
        assert_eq!(format!("{}", id), "1700000000000-deadbeef");
    }

    #[test]
    fn test_id_equality_and_hash() {
        let a = HandleId::from("x");
        let b = HandleId::from("x");
        let c = HandleId::from("y");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }
}
