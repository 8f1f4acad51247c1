pub mod mapper;
pub mod resolver;

pub use mapper::{PathRule, Rewrite, RuleSet, PATH_TOKENS, SEPARATOR_SENTINEL};
pub use resolver::FsResolver;

/// Convert every separator to `/` so prefixes can be compared textually.
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// Strip `prefix` from `path` on a component boundary and return the remainder
/// without its leading separator. `F:/Movies` is not a prefix of `F:/Movies2/a`.
pub fn strip_component_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some(rest);
    }
    if prefix.ends_with('/') {
        return Some(rest);
    }
    rest.strip_prefix('/')
}

/// Append a relative remainder to a replacement prefix.
pub fn join_prefix(prefix: &str, rest: &str) -> String {
    if rest.is_empty() {
        prefix.to_string()
    } else if prefix.is_empty() {
        rest.to_string()
    } else if prefix.ends_with('/') {
        format!("{}{}", prefix, rest)
    } else {
        format!("{}/{}", prefix, rest)
    }
}

/// True for strings anchored at some root: `/x`, `C:/x`, `\\server\x` or a path token.
pub fn is_rooted(path: &str) -> bool {
    let normalized = normalize(path);
    if normalized.starts_with('/') {
        return true;
    }
    if PATH_TOKENS
        .iter()
        .any(|token| strip_component_prefix(&normalized, token).is_some())
    {
        return true;
    }
    let bytes = normalized.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_component_prefix_respects_boundaries() {
        assert_eq!(strip_component_prefix("F:/Movies/a.mkv", "F:/Movies"), Some("a.mkv"));
        assert_eq!(strip_component_prefix("F:/Movies", "F:/Movies"), Some(""));
        assert_eq!(strip_component_prefix("F:/Movies2/a.mkv", "F:/Movies"), None);
        assert_eq!(strip_component_prefix("/data/x", "/"), Some("data/x"));
        assert_eq!(strip_component_prefix("anything", ""), None);
    }

    #[test]
    fn test_join_prefix() {
        assert_eq!(join_prefix("/data/movies", "Alien"), "/data/movies/Alien");
        assert_eq!(join_prefix("/", "config"), "/config");
        assert_eq!(join_prefix("", "config"), "config");
        assert_eq!(join_prefix("/data", ""), "/data");
    }

    #[test]
    fn test_is_rooted() {
        assert!(is_rooted("/data/movies"));
        assert!(is_rooted("C:\\ProgramData\\Jellyfin"));
        assert!(is_rooted("%MetadataPath%\\library"));
        assert!(!is_rooted("config/system.xml"));
        assert!(!is_rooted("Movie"));
    }
}
