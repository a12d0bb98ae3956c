//! Version parsing and comparison for add-ons, release versions and Kubernetes.

use std::cmp::Ordering;

use semver::Version;

use crate::error::{Result, UpdaterError};

/// Parse a version string leniently into a semantic version.
///
/// Accepts an optional `v` prefix and one to three numeric core components
/// (`1.29` becomes `1.29.0`). Anything after `-` or `+` is kept as
/// pre-release or build metadata, so `v1.16.1-eksbuild.2` and the AMI
/// release string `1.29.0-20240202` both parse.
pub fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let s = trimmed.strip_prefix('v').unwrap_or(trimmed);

    let split_at = s.find(['-', '+']).unwrap_or(s.len());
    let (core, suffix) = s.split_at(split_at);

    let parts: Vec<&str> = core.split('.').collect();
    let numeric = |p: &&str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    if parts.len() > 3 || !parts.iter().all(numeric) {
        return Err(UpdaterError::InvalidVersionFormat(raw.to_string()));
    }

    let mut normalized = parts.join(".");
    for _ in parts.len()..3 {
        normalized.push_str(".0");
    }
    normalized.push_str(suffix);

    Version::parse(&normalized).map_err(|_| UpdaterError::InvalidVersionFormat(raw.to_string()))
}

/// Compare two version strings. Fails if either one is not a valid version.
pub fn compare_versions(a: &str, b: &str) -> Result<Ordering> {
    Ok(parse_version(a)?.cmp(&parse_version(b)?))
}

/// Compare a target node group release version against the current one.
///
/// Release versions are opaque AMI strings. Identical strings are equal;
/// parseable ones are ordered semantically; otherwise a differing target is
/// treated as newer.
pub fn compare_release_versions(target: &str, current: &str) -> Ordering {
    if target == current {
        return Ordering::Equal;
    }
    match (parse_version(target), parse_version(current)) {
        (Ok(t), Ok(c)) => t.cmp(&c),
        _ => Ordering::Greater,
    }
}

/// Parse a Kubernetes version string into major and minor components.
pub fn parse_k8s_version(version: &str) -> Result<(u64, u64)> {
    let parsed = parse_version(version)?;
    Ok((parsed.major, parsed.minor))
}
