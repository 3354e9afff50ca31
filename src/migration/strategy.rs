//! Choosing how existing destination keys are overwritten.

use std::cmp::Ordering;

use super::store::{ServerInfo, WriteStrategy};

/// How Mirror mode overwrites a key, fixed once per destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStrategy {
    /// Atomic `RESTORE ... REPLACE`.
    ReplaceInPlace,
    /// `DEL` followed by `RESTORE`; the key is briefly absent.
    DeleteThenRestore,
}

impl RestoreStrategy {
    /// Pick the strategy for a destination.
    ///
    /// Clusters always get `ReplaceInPlace`; standalone servers get it from
    /// `min_version` on.
    pub fn select(info: &ServerInfo, min_version: &str) -> Self {
        if info.cluster_enabled || compare_versions(&info.version, min_version) != Ordering::Less
        {
            RestoreStrategy::ReplaceInPlace
        } else {
            RestoreStrategy::DeleteThenRestore
        }
    }

    /// Per-key write semantics for Mirror mode.
    pub fn write_strategy(self) -> WriteStrategy {
        match self {
            RestoreStrategy::ReplaceInPlace => WriteStrategy::Replace,
            RestoreStrategy::DeleteThenRestore => WriteStrategy::DeleteThenRestore,
        }
    }
}

/// Compare dotted version strings numerically.
///
/// Trailing `.0` components are ignored, so `"3"`, `"3.0"` and `"3.0.0"`
/// are equal. A component's leading digits are its value (`"0-rc1"` is 0);
/// components without digits count as 0.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    normalize(a).cmp(&normalize(b))
}

fn normalize(version: &str) -> Vec<u64> {
    let mut parts: Vec<u64> = version
        .trim()
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        })
        .collect();
    while parts.last() == Some(&0) {
        parts.pop();
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(version: &str, cluster: bool) -> ServerInfo {
        ServerInfo {
            version: version.to_string(),
            cluster_enabled: cluster,
        }
    }

    #[test]
    fn test_compare_strips_trailing_zeros() {
        assert_eq!(compare_versions("3.0.0", "3"), Ordering::Equal);
        assert_eq!(compare_versions("3.0", "3.0.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_compare_is_numeric_not_lexical() {
        assert_eq!(compare_versions("10.0", "9.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.10", "2.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.9.0", "3.0"), Ordering::Less);
        assert_eq!(compare_versions("3.0.1", "3.0"), Ordering::Greater);
    }

    #[test]
    fn test_compare_tolerates_suffixes() {
        assert_eq!(compare_versions("7.2.0-rc1", "7.2"), Ordering::Equal);
        assert_eq!(compare_versions("unknown", "3.0"), Ordering::Less);
    }

    #[test]
    fn test_select_by_version() {
        assert_eq!(
            RestoreStrategy::select(&info("2.9.0", false), "3.0"),
            RestoreStrategy::DeleteThenRestore
        );
        assert_eq!(
            RestoreStrategy::select(&info("3.0.1", false), "3.0"),
            RestoreStrategy::ReplaceInPlace
        );
        assert_eq!(
            RestoreStrategy::select(&info("3.0.0", false), "3.0"),
            RestoreStrategy::ReplaceInPlace
        );
    }

    #[test]
    fn test_select_cluster_always_replaces() {
        assert_eq!(
            RestoreStrategy::select(&info("2.9.0", true), "3.0"),
            RestoreStrategy::ReplaceInPlace
        );
    }

    #[test]
    fn test_write_strategy() {
        assert_eq!(
            RestoreStrategy::ReplaceInPlace.write_strategy(),
            WriteStrategy::Replace
        );
        assert_eq!(
            RestoreStrategy::DeleteThenRestore.write_strategy(),
            WriteStrategy::DeleteThenRestore
        );
    }
}
