//! Root-bounded path admission.
//!
//! Admission is a lexical test: the candidate is cleaned (`.`/`..` folded,
//! separators collapsed) and must start with one of the allowed roots as a
//! plain string prefix. Symbolic links are not followed.

use std::io;
use std::path::{Component, Path, PathBuf};

// =============================================================================
// AllowedRoots
// =============================================================================

/// The directories a resolver may read from.
///
/// One base directory followed by zero or more library paths, all absolute
/// and cleaned. Library order is significant: the resolver walks it in
/// reverse, so later entries override earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedRoots {
    base: PathBuf,
    library: Vec<PathBuf>,
}

impl AllowedRoots {
    /// Build roots from a base directory and library paths.
    ///
    /// Relative inputs are made absolute against the current directory.
    /// Fails only when the current directory is needed and unavailable.
    pub fn new<I, P>(base: impl AsRef<Path>, library: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let base = absolutize(base.as_ref())?;
        let library = library
            .into_iter()
            .map(|p| absolutize(p.as_ref()))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self { base, library })
    }

    /// The base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Library paths in declaration order.
    pub fn library(&self) -> &[PathBuf] {
        &self.library
    }

    /// All roots: base first, then library paths in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.base.as_path()).chain(self.library.iter().map(PathBuf::as_path))
    }
}

/// Make `path` absolute and clean it, without touching the filesystem.
pub fn absolutize(path: &Path) -> io::Result<PathBuf> {
    Ok(clean_path(&std::path::absolute(path)?))
}

// =============================================================================
// Admission
// =============================================================================

/// Whether `path` lies under one of `roots`.
///
/// The path is cleaned first, so `..` segments that climb above every root
/// are rejected. The comparison is a literal string prefix: a root `/a`
/// also admits `/ab/file`.
pub fn is_allowed(path: &Path, roots: &AllowedRoots) -> bool {
    let candidate = clean_path(path);
    let candidate = candidate.to_string_lossy();
    roots
        .iter()
        .any(|root| candidate.starts_with(root.to_string_lossy().as_ref()))
}

/// Lexically clean a path.
///
/// - `.` segments and repeated separators are dropped
/// - `name/..` pairs are folded
/// - `..` directly under the root is dropped (`/..` is `/`)
/// - leading `..` of a relative path is kept
/// - an empty result becomes `.`
pub fn clean_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roots(base: &str, library: &[&str]) -> AllowedRoots {
        AllowedRoots::new(base, library.iter().copied()).unwrap()
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("/a/./b//c")), PathBuf::from("/a/b/c"));
        assert_eq!(clean_path(Path::new("/a/b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean_path(Path::new("/a/../../..")), PathBuf::from("/"));
        assert_eq!(clean_path(Path::new("../x/../y")), PathBuf::from("../y"));
        assert_eq!(clean_path(Path::new("./")), PathBuf::from("."));
        assert_eq!(clean_path(Path::new("a/..")), PathBuf::from("."));
    }

    #[test]
    fn test_roots_are_cleaned() {
        let r = roots("/a/b/../c/", &["/lib/./x"]);
        assert_eq!(r.base(), Path::new("/a/c"));
        assert_eq!(r.library(), &[PathBuf::from("/lib/x")]);
        assert_eq!(r.iter().count(), 2);
    }

    #[test]
    fn test_relative_roots_become_absolute() {
        let r = roots("sub", &[] as &[&str]);
        assert!(r.base().is_absolute());
        assert!(r.base().ends_with("sub"));
    }

    #[test]
    fn test_allowed_inside_root() {
        let r = roots("/a", &["/lib"]);
        assert!(is_allowed(Path::new("/a/valid.libsonnet"), &r));
        assert!(is_allowed(Path::new("/lib/deep/x.libsonnet"), &r));
        assert!(is_allowed(Path::new("/a"), &r));
    }

    #[test]
    fn test_denied_outside_root() {
        let r = roots("/a", &["/lib"]);
        assert!(!is_allowed(Path::new("/outside.libsonnet"), &r));
        assert!(!is_allowed(Path::new("/a/../outside.libsonnet"), &r));
        assert!(!is_allowed(Path::new("/lib/x/../../etc/passwd"), &r));
    }

    #[test]
    fn test_relative_candidate_is_denied() {
        let r = roots("/a", &[] as &[&str]);
        assert!(!is_allowed(Path::new("a/file"), &r));
    }

    #[test]
    fn test_prefix_is_textual() {
        // Known limitation of string-prefix admission.
        let r = roots("/a", &[] as &[&str]);
        assert!(is_allowed(Path::new("/ab/file"), &r));
    }

    proptest! {
        #[test]
        fn prop_escape_above_root_is_denied(
            segments in prop::collection::vec("[a-z]{1,6}", 0..4),
            extra in 1usize..4,
        ) {
            let r = roots("/sandbox/root", &[] as &[&str]);
            // Descend `segments.len()` levels, then climb out past the root.
            let mut path = PathBuf::from("/sandbox/root");
            for s in &segments {
                path.push(s);
            }
            for _ in 0..(segments.len() + 2 + extra) {
                path.push("..");
            }
            path.push("zz-outside");
            prop_assert!(!is_allowed(&path, &r));
        }

        #[test]
        fn prop_descendants_are_allowed(segments in prop::collection::vec("[a-z]{1,6}", 1..5)) {
            let r = roots("/sandbox/root", &["/other"]);
            let mut path = PathBuf::from("/sandbox/root");
            for s in &segments {
                path.push(s);
            }
            prop_assert!(is_allowed(&path, &r));
        }

        #[test]
        fn prop_matches_prefix_of_cleaned(segments in prop::collection::vec("(\\.\\.|\\.|[a-z]{1,3})", 0..8)) {
            let r = roots("/sandbox", &[] as &[&str]);
            let mut path = PathBuf::from("/sandbox");
            for s in &segments {
                path.push(s);
            }
            let cleaned = clean_path(&path);
            let expected = cleaned.to_string_lossy().starts_with("/sandbox");
            prop_assert_eq!(is_allowed(&path, &r), expected);
        }
    }
}
