//! Path matching between lock keys, zone prefixes and request targets.
//!
//! Two modes exist. `Segment` splits on `/` and `\` and compares whole path
//! segments, so `src/api` covers `src/api/routes.rs` but not `src/apiary.rs`.
//! `Substring` is the permissive legacy behavior: two paths match when either
//! contains the other as a raw substring.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How lock keys and zone prefixes are compared against request targets.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PathMatching {
    /// Separator-aware prefix comparison
    #[default]
    Segment,
    /// Raw substring containment in either direction
    Substring,
}

impl PathMatching {
    /// Whether a zone rooted at `zone_path` contains `target`.
    #[must_use]
    pub fn zone_contains(self, zone_path: &str, target: &str) -> bool {
        match self {
            Self::Segment => is_segment_prefix(zone_path, target),
            Self::Substring => substring_either_way(zone_path, target),
        }
    }

    /// Whether a lock keyed by `lock_path` is relevant to `target`.
    ///
    /// Matching runs in both directions: a lock on a directory covers the
    /// files beneath it, and a lock on a file is relevant to a request
    /// naming its directory.
    #[must_use]
    pub fn lock_covers(self, lock_path: &str, target: &str) -> bool {
        match self {
            Self::Segment => {
                is_segment_prefix(lock_path, target) || is_segment_prefix(target, lock_path)
            }
            Self::Substring => substring_either_way(lock_path, target),
        }
    }

    /// Whether a lock keyed by `lock_path` lets its holder mutate `target`.
    ///
    /// Unlike [`lock_covers`](Self::lock_covers) this is one-directional in
    /// segment mode: a lock on `src` authorizes `src/x.ts`, but a lock on
    /// `src/x.ts` does not authorize `src`.
    #[must_use]
    pub fn lock_authorizes(self, lock_path: &str, target: &str) -> bool {
        match self {
            Self::Segment => is_segment_prefix(lock_path, target),
            Self::Substring => substring_either_way(lock_path, target),
        }
    }
}

/// Normalized path segments: separators unified, empty and `.` segments dropped.
#[must_use]
pub fn segments(path: &str) -> Vec<&str> {
    path.trim()
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect()
}

/// Whether `prefix` names `path` itself or one of its ancestors.
///
/// An empty prefix matches nothing.
#[must_use]
pub fn is_segment_prefix(prefix: &str, path: &str) -> bool {
    let prefix = segments(prefix);
    let path = segments(path);
    !prefix.is_empty()
        && prefix.len() <= path.len()
        && prefix.iter().zip(path.iter()).all(|(a, b)| a == b)
}

fn substring_either_way(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_segment_prefix_respects_boundaries() {
        assert!(is_segment_prefix("src/api", "src/api/routes.rs"));
        assert!(is_segment_prefix("src/api/", "src/api"));
        assert!(is_segment_prefix("./src", "src/lib.rs"));
        assert!(!is_segment_prefix("src/api", "src/apiary.rs"));
        assert!(!is_segment_prefix("src/api/routes.rs", "src/api"));
        assert!(!is_segment_prefix("", "src/lib.rs"));
    }

    #[test]
    fn test_windows_separators_are_normalized() {
        assert!(is_segment_prefix("src\\api", "src/api/mod.rs"));
    }

    #[test]
    fn test_substring_mode_is_permissive() {
        let m = PathMatching::Substring;
        assert!(m.zone_contains("api", "src/apiary.rs"));
        assert!(m.lock_covers("src/x.ts", "x.ts"));
        assert!(!m.lock_covers("", "x.ts"));
    }

    #[test]
    fn test_lock_covers_both_directions_in_segment_mode() {
        let m = PathMatching::Segment;
        assert!(m.lock_covers("src", "src/x.ts"));
        assert!(m.lock_covers("src/x.ts", "src"));
        assert!(!m.lock_covers("src/x.ts", "src/y.ts"));
    }

    #[test]
    fn test_child_lock_does_not_authorize_parent() {
        let m = PathMatching::Segment;
        assert!(m.lock_authorizes("src", "src/x.ts"));
        assert!(m.lock_authorizes("src/x.ts", "src/x.ts"));
        assert!(!m.lock_authorizes("src/x.ts", "src"));
        assert!(!m.lock_authorizes("src/x.ts", "src/y.ts"));
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(PathMatching::from_str("segment").ok(), Some(PathMatching::Segment));
        assert_eq!(
            PathMatching::from_str("Substring").ok(),
            Some(PathMatching::Substring)
        );
        assert!(PathMatching::from_str("glob").is_err());
        assert_eq!(PathMatching::Segment.to_string(), "segment");
    }
}
