//! Version ordering for index entries.

use std::cmp::Ordering;

use semver::Version;

/// Parse a version leniently.
///
/// Accepts a leading `v` and pads `MAJOR` or `MAJOR.MINOR` with zeros, so
/// `v1.2` orders as `1.2.0`.
pub fn parse_version(version: &str) -> Option<Version> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if let Ok(parsed) = Version::parse(trimmed) {
        return Some(parsed);
    }

    let (core, rest) = match trimmed.find(['-', '+']) {
        Some(at) => trimmed.split_at(at),
        None => (trimmed, ""),
    };
    let numeric = core
        .split('.')
        .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    let parts = core.split('.').count();
    if !numeric || parts > 2 {
        return None;
    }
    let padded = if parts == 1 {
        format!("{}.0.0{}", core, rest)
    } else {
        format!("{}.0{}", core, rest)
    };
    Version::parse(&padded).ok()
}

/// Order two versions newest first.
///
/// Semver versions sort descending by precedence and come before anything
/// unparsable. Unparsable versions sort descending lexically. Versions with
/// equal precedence fall back to the raw string so the order is total.
pub fn newest_first(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => vb.cmp_precedence(&va).then_with(|| b.cmp(a)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.cmp(a),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sorted(mut versions: Vec<&str>) -> Vec<&str> {
        versions.sort_by(|a, b| newest_first(a, b));
        versions
    }

    #[test]
    fn test_semver_descending() {
        assert_eq!(
            sorted(vec!["1.0.0", "1.10.0", "1.2.0", "2.0.0-rc.1", "2.0.0"]),
            vec!["2.0.0", "2.0.0-rc.1", "1.10.0", "1.2.0", "1.0.0"]
        );
    }

    #[test]
    fn test_unparsable_versions_sort_last() {
        assert_eq!(
            sorted(vec!["latest-build", "0.1.0", "abc", "1.0.0"]),
            vec!["1.0.0", "0.1.0", "latest-build", "abc"]
        );
    }

    #[test]
    fn test_lenient_parse() {
        assert_eq!(parse_version("v1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(parse_version("1.2"), Some(Version::new(1, 2, 0)));
        assert_eq!(parse_version("3"), Some(Version::new(3, 0, 0)));
        assert!(parse_version("1.2-beta").is_some_and(|v| !v.pre.is_empty()));
        assert_eq!(parse_version("not-a-version"), None);
        assert_eq!(parse_version(""), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        /// Property: the ordering is antisymmetric, so sorting is stable across inputs.
        #[test]
        fn prop_ordering_is_antisymmetric(
            a in "(v?[0-9]{1,2}(\\.[0-9]{1,2}){0,2})|[a-z]{1,4}",
            b in "(v?[0-9]{1,2}(\\.[0-9]{1,2}){0,2})|[a-z]{1,4}",
        ) {
            prop_assert_eq!(newest_first(&a, &b), newest_first(&b, &a).reverse());
        }
    }
}
