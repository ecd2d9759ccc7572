//! Branch path arithmetic.
//!
//! Paths are "/"-separated, rooted at `MAIN`. `MAIN/project/task` is a
//! descendant of `MAIN/project` and of `MAIN`.

/// The root branch path.
pub const MAIN: &str = "MAIN";

/// Everything before the last "/", or `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind('/').map(|index| &path[..index])
}

/// `path` is a descendant of `ancestor` iff it starts with `ancestor + "/"`
/// or equals it.
pub fn is_descendant_or_equal(path: &str, ancestor: &str) -> bool {
    path == ancestor || path.starts_with(&format!("{ancestor}/"))
}

/// All ancestors of `path` from its parent up to the root, nearest first.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut current = path;
    while let Some(parent) = parent_path(current) {
        result.push(parent);
        current = parent;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parent is everything before the last separator; the root has none.
    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("MAIN/project/task"), Some("MAIN/project"));
        assert_eq!(parent_path("MAIN/project"), Some(MAIN));
        assert_eq!(parent_path(MAIN), None);
    }

    /// Descendant check requires a full path segment, not a prefix match.
    #[test]
    fn test_is_descendant_or_equal() {
        assert!(is_descendant_or_equal("MAIN/project/task", "MAIN/project"));
        assert!(is_descendant_or_equal("MAIN/project", "MAIN/project"));
        assert!(is_descendant_or_equal("MAIN/project", MAIN));
        assert!(!is_descendant_or_equal("MAIN/projectile", "MAIN/project"));
        assert!(!is_descendant_or_equal(MAIN, "MAIN/project"));
    }

    /// Ancestors are listed nearest first up to the root.
    #[test]
    fn test_ancestors() {
        assert_eq!(
            ancestors("MAIN/SNOMEDCT-XX/project/task"),
            vec!["MAIN/SNOMEDCT-XX/project", "MAIN/SNOMEDCT-XX", MAIN]
        );
        assert!(ancestors(MAIN).is_empty());
    }
}
