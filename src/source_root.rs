//! Source-root allow/deny prefix filtering.
//!
//! A context may restrict which parts of the tree contribute modules. Each
//! entry is a path prefix, optionally prefixed with `-` to deny instead of
//! allow. The longest matching entry decides a path's fate; among entries of
//! equal length the one added last wins. Paths no entry matches are allowed.

/// Ordered allow/deny prefix list.
#[derive(Debug, Clone, Default)]
pub struct SourceRootDirs {
    dirs: Vec<String>,
}

impl SourceRootDirs {
    /// Append entries. A leading `-` marks a deny entry.
    pub fn add<S: Into<String>>(&mut self, dirs: impl IntoIterator<Item = S>) {
        self.dirs.extend(dirs.into_iter().map(Into::into));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Decide whether `path` is allowed, returning the deciding prefix
    /// (stripped of any `-`). Paths with no matching entry are allowed with
    /// an empty deciding prefix.
    #[must_use]
    pub fn allowed(&self, path: &str) -> (bool, &str) {
        // Longest raw entry wins; the raw length counts a deny marker, so
        // `-a/b` outranks `a/b`. Iterating later entries first breaks ties in
        // favour of the last addition.
        let mut order: Vec<usize> = (0..self.dirs.len()).collect();
        order.sort_by_key(|&i| self.dirs[i].len());
        for &i in order.iter().rev() {
            let entry = self.dirs[i].as_str();
            let (prefix, deny) = match entry.strip_prefix('-') {
                Some(stripped) => (stripped, true),
                None => (entry, false),
            };
            let matched = prefix.is_empty()
                || path == prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'));
            if matched {
                return (!deny, prefix);
            }
        }
        (true, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn dirs(entries: &[&str]) -> SourceRootDirs {
        let mut dirs = SourceRootDirs::default();
        dirs.add(entries.iter().copied());
        dirs
    }

    #[rstest]
    #[case("a", true, "a")]
    #[case("a/b/c", true, "a")]
    #[case("b", true, "")]
    #[case("b/c/d/a", true, "b/c/d")]
    #[case("c", false, "c")]
    #[case("c/a/b", false, "c")]
    #[case("c/some_single_file", true, "c/some_single_file")]
    #[case("d/c/a/abc", false, "d/c/a")]
    fn longest_prefix_decides(
        #[case] path: &str,
        #[case] allowed: bool,
        #[case] deciding: &str,
    ) {
        let dirs = dirs(&["a", "b/c/d", "-c", "-d/c/a", "c/some_single_file"]);
        assert_eq!(dirs.allowed(path), (allowed, deciding));
    }

    #[rstest]
    #[case("a", false, "a")]
    #[case("a/some_disallowed_file", false, "a")]
    #[case("a/c/some_allowed_file", true, "a/c/some_allowed_file")]
    #[case("a/b/d/some_allowed_file", true, "a/b/d/some_allowed_file")]
    #[case("a/b/c", true, "a/b")]
    #[case("a/b/c/some_allowed_file", true, "a/b")]
    #[case("a/b/d", false, "a/b/d")]
    fn later_entry_wins_among_equal_lengths(
        #[case] path: &str,
        #[case] allowed: bool,
        #[case] deciding: &str,
    ) {
        let dirs = dirs(&[
            "-a",
            "a/c/some_allowed_file",
            "a/b/d/some_allowed_file",
            "a/b",
            "a/c",
            "-a/b/d",
        ]);
        assert_eq!(dirs.allowed(path), (allowed, deciding));
    }

    #[test]
    fn deny_everything_beats_empty_allow() {
        let dirs = dirs(&["-", ""]);
        assert_eq!(dirs.allowed("anything"), (false, ""));
    }

    #[test]
    fn empty_list_allows_everything() {
        let dirs = SourceRootDirs::default();
        assert_eq!(dirs.allowed("a/b"), (true, ""));
    }
}
