//! Dotted-path utilities. Paths address members of the API tree and its
//! snapshot: segments split on `.`, numeric segments index into lists, the
//! empty path addresses the root.

/// Split a dotted path into segments. The empty path has no segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

/// Join a prefix and a key into a dotted path.
pub fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// Split a path into its parent path and final key. The root path splits
/// into an empty parent and empty key.
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('.') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Parse a segment as a list index.
pub fn as_index(segment: &str) -> Option<usize> {
    segment.parse::<usize>().ok()
}

/// True when `candidate` equals `prefix` or lies strictly underneath it.
pub fn is_at_or_under(candidate: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    candidate == prefix
        || (candidate.len() > prefix.len()
            && candidate.starts_with(prefix)
            && candidate.as_bytes()[prefix.len()] == b'.')
}

/// True when any path in `paths` equals `prefix` or descends from it.
pub fn any_at_or_under<'a, I>(paths: I, prefix: &str) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    paths.into_iter().any(|p| is_at_or_under(p, prefix))
}
