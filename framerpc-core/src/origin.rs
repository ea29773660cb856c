use std::fmt;
use std::sync::Arc;

/// Receive-side origin filtering. Messages from origins the policy does
/// not allow are dropped without a reply.
#[derive(Clone, Default)]
pub enum OriginPolicy {
    /// Accept every origin.
    #[default]
    Any,
    /// Accept origins in the list.
    List(Vec<String>),
    /// Accept origins the predicate approves.
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl OriginPolicy {
    pub fn list<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OriginPolicy::List(origins.into_iter().map(Into::into).collect())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        OriginPolicy::Predicate(Arc::new(f))
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            OriginPolicy::Any => true,
            OriginPolicy::List(origins) => origins.iter().any(|o| o == origin),
            OriginPolicy::Predicate(f) => f(origin),
        }
    }
}

impl fmt::Debug for OriginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginPolicy::Any => f.write_str("OriginPolicy::Any"),
            OriginPolicy::List(origins) => f.debug_tuple("OriginPolicy::List").field(origins).finish(),
            OriginPolicy::Predicate(_) => f.write_str("OriginPolicy::Predicate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_allows_everything() {
        assert!(OriginPolicy::Any.allows("https://anywhere.example"));
    }

    #[test]
    fn test_list_membership() {
        let policy = OriginPolicy::list(["https://a.example", "https://b.example"]);
        assert!(policy.allows("https://a.example"));
        assert!(!policy.allows("https://c.example"));
    }

    #[test]
    fn test_predicate() {
        let policy = OriginPolicy::predicate(|origin| origin.ends_with(".trusted.example"));
        assert!(policy.allows("https://app.trusted.example"));
        assert!(!policy.allows("https://evil.example"));
    }
}
