//! Version selection against a packument.
//!
//! This is the registry's own resolution rule: the mirror engine never
//! compares versions itself, it only asks the registry client which concrete
//! version a `(name, range)` pair denotes.

use super::error::PkgError;
use super::registry::{get_dist_tag, get_latest_version, get_versions};
use semver::{Version, VersionReq};

/// Resolve a range or tag against a packument.
///
/// # Rules
/// - Empty, `*` and `latest` return `dist-tags.latest`
/// - A dist-tag name (e.g. `next`) returns the tagged version
/// - An exact version returns it if published
/// - Otherwise the highest version satisfying the range, except that
///   `dist-tags.latest` wins whenever it satisfies the range
/// - `||` alternatives are supported
///
/// # Errors
/// Returns an error if the range is invalid or no version satisfies it.
pub fn resolve_version(packument: &serde_json::Value, range: &str) -> Result<String, PkgError> {
    let name = packument
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let range = range.trim();
    let latest = get_latest_version(packument);

    if matches!(range, "" | "*" | "latest") {
        if let Some(latest) = latest {
            return Ok(latest.to_string());
        }
    } else if let Some(tagged) = get_dist_tag(packument, range) {
        return Ok(tagged.to_string());
    }

    let published = get_versions(packument);
    if Version::parse(range).is_ok() {
        // A bare version is exact, not an implicit caret
        return if published.contains(&range) {
            Ok(range.to_string())
        } else {
            Err(PkgError::version_not_found(name, range))
        };
    }

    let reqs = parse_requirement(range)?;
    let satisfies = |v: &Version| reqs.iter().any(|req| req.matches(v));

    if let Some(latest) = latest.and_then(|l| Version::parse(l).ok()) {
        if satisfies(&latest) {
            return Ok(latest.to_string());
        }
    }

    let mut parsed: Vec<Version> = published
        .iter()
        .filter_map(|v| Version::parse(v).ok())
        .collect();
    parsed.sort_by(|a, b| b.cmp(a));

    parsed
        .into_iter()
        .find(|v| satisfies(v))
        .map(|v| v.to_string())
        .ok_or_else(|| PkgError::version_not_found(name, range))
}

/// Parse a full requirement, splitting `||` alternatives.
///
/// Invalid alternatives are skipped as long as one parses.
fn parse_requirement(range: &str) -> Result<Vec<VersionReq>, PkgError> {
    if matches!(range, "" | "*" | "latest") {
        return Ok(vec![VersionReq::STAR]);
    }

    if !range.contains("||") {
        return Ok(vec![parse_range(range)?]);
    }

    let reqs: Vec<VersionReq> = range
        .split("||")
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
        .filter_map(|alt| parse_range(alt).ok())
        .collect();

    if reqs.is_empty() {
        return Err(PkgError::spec_invalid(format!(
            "Invalid version range '{range}': no valid alternatives"
        )));
    }
    Ok(reqs)
}

/// Parse a single version range, handling npm-specific syntax.
///
/// Handles:
/// - Standard semver ranges: ^1.0.0, ~1.0.0, >=1.0.0, etc.
/// - Hyphen ranges: 1.0.0 - 2.0.0
/// - X-ranges: 1.x, 1.0.x, *
/// - Space-separated comparators: >= 2.1.2 < 3.0.0
fn parse_range(range: &str) -> Result<VersionReq, PkgError> {
    let range = range.trim();

    // Handle hyphen ranges: "1.0.0 - 2.0.0" -> ">=1.0.0, <=2.0.0"
    if let Some((start, end)) = parse_hyphen_range(range) {
        let converted = format!(">={start}, <={end}");
        return VersionReq::parse(&converted).map_err(|e| {
            PkgError::spec_invalid(format!("Invalid version range '{range}': {e}"))
        });
    }

    // Handle x-ranges: "1.x" -> ">=1.0.0, <2.0.0"
    if range.contains('x') || range.contains('X') || range == "*" {
        let converted = convert_x_range(range);
        return VersionReq::parse(&converted).map_err(|e| {
            PkgError::spec_invalid(format!("Invalid version range '{range}': {e}"))
        });
    }

    // Handle space-separated comparators: ">= 2.1.2 < 3.0.0" -> ">=2.1.2, <3.0.0"
    // npm allows spaces between comparators to mean AND
    let converted = convert_space_separated_comparators(range);

    // Standard semver range
    VersionReq::parse(&converted).map_err(|e| {
        PkgError::spec_invalid(format!("Invalid version range '{range}': {e}"))
    })
}

/// Parse a hyphen range like "1.0.0 - 2.0.0".
fn parse_hyphen_range(range: &str) -> Option<(String, String)> {
    // Look for " - " pattern (space-hyphen-space)
    let parts: Vec<&str> = range.split(" - ").collect();
    if parts.len() == 2 {
        let start = parts[0].trim();
        let end = parts[1].trim();
        // Validate both look like versions
        if !start.is_empty() && !end.is_empty() {
            return Some((start.to_string(), end.to_string()));
        }
    }
    None
}

/// Convert space-separated comparators to comma-separated.
///
/// npm allows: ">= 2.1.2 < 3.0.0" which means ">=2.1.2 AND <3.0.0"
/// Rust semver requires: ">=2.1.2, <3.0.0"
fn convert_space_separated_comparators(range: &str) -> String {
    let range = range.trim();

    // Regex-like parsing: split on spaces, but keep operators attached to versions
    // Comparator patterns: >=, <=, >, <, =, ~, ^, or bare version
    let mut result = String::new();
    let mut chars = range.chars().peekable();
    let mut current_token = String::new();
    let mut need_comma = false;

    while let Some(c) = chars.next() {
        match c {
            ' ' => {
                // End of current token
                if !current_token.is_empty() {
                    let trimmed = current_token.trim();
                    if !trimmed.is_empty() {
                        // Check if this looks like a complete comparator (has version number)
                        if token_has_version(trimmed) {
                            if need_comma {
                                result.push_str(", ");
                            }
                            result.push_str(trimmed);
                            need_comma = true;
                        } else {
                            // Operator without version, keep accumulating
                            if need_comma {
                                result.push_str(", ");
                                need_comma = false;
                            }
                            result.push_str(trimmed);
                        }
                    }
                    current_token.clear();
                }
            }
            _ => {
                current_token.push(c);
            }
        }
    }

    // Handle last token
    if !current_token.is_empty() {
        let trimmed = current_token.trim();
        if !trimmed.is_empty() {
            if token_has_version(trimmed) && need_comma {
                result.push_str(", ");
            }
            result.push_str(trimmed);
        }
    }

    // If nothing was parsed (no spaces), return original
    if result.is_empty() {
        return range.to_string();
    }

    result
}

/// Check if a token contains a version number (has digits).
fn token_has_version(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
}

/// Convert x-range to semver range.
fn convert_x_range(range: &str) -> String {
    let range = range.trim();

    if range == "*" || range == "x" || range == "X" {
        return ">=0.0.0".to_string();
    }

    // Replace x/X with 0 for parsing, then convert to appropriate range
    let parts: Vec<&str> = range.split('.').collect();

    match parts.as_slice() {
        [major, "x" | "X"] | [major, "*"] => {
            // "1.x" -> ">=1.0.0, <2.0.0"
            if let Ok(m) = major.parse::<u64>() {
                return format!(">={m}.0.0, <{}.0.0", m + 1);
            }
        }
        [major, minor, "x" | "X"] | [major, minor, "*"] => {
            // "1.2.x" -> ">=1.2.0, <1.3.0"
            if let (Ok(m), Ok(n)) = (major.parse::<u64>(), minor.parse::<u64>()) {
                return format!(">={m}.{n}.0, <{m}.{}.0", n + 1);
            }
        }
        _ => {}
    }

    // Fallback: just replace x with 0
    range.replace(['x', 'X'], "0")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packument(versions: &[&str], latest: &str) -> serde_json::Value {
        let versions_obj: serde_json::Map<String, serde_json::Value> = versions
            .iter()
            .map(|v| ((*v).to_string(), serde_json::json!({ "version": v })))
            .collect();

        serde_json::json!({
            "name": "test-pkg",
            "dist-tags": { "latest": latest, "next": "4.0.0-rc.1" },
            "versions": versions_obj
        })
    }

    #[test]
    fn test_empty_and_star_mean_latest() {
        let packument = make_packument(&["1.0.0", "2.0.0", "3.0.0"], "2.0.0");
        assert_eq!(resolve_version(&packument, "").unwrap(), "2.0.0");
        assert_eq!(resolve_version(&packument, "*").unwrap(), "2.0.0");
        assert_eq!(resolve_version(&packument, "latest").unwrap(), "2.0.0");
    }

    #[test]
    fn test_dist_tag_dereference() {
        let packument = make_packument(&["3.0.0", "4.0.0-rc.1"], "3.0.0");
        assert_eq!(resolve_version(&packument, "next").unwrap(), "4.0.0-rc.1");
    }

    #[test]
    fn test_resolve_exact_version() {
        let packument = make_packument(&["1.0.0", "2.0.0", "3.0.0"], "3.0.0");
        assert_eq!(resolve_version(&packument, "2.0.0").unwrap(), "2.0.0");
        assert!(resolve_version(&packument, "2.0.1").is_err());
    }

    #[test]
    fn test_resolve_caret_range() {
        let packument = make_packument(&["1.0.0", "1.5.0", "2.0.0", "2.5.0"], "2.5.0");
        assert_eq!(resolve_version(&packument, "^1.0.0").unwrap(), "1.5.0");
    }

    #[test]
    fn test_latest_preferred_when_it_satisfies() {
        // 1.9.0 is newer but latest (1.4.0) satisfies ^1.0.0
        let packument = make_packument(&["1.0.0", "1.4.0", "1.9.0"], "1.4.0");
        assert_eq!(resolve_version(&packument, "^1.0.0").unwrap(), "1.4.0");
    }

    #[test]
    fn test_resolve_tilde_range() {
        let packument = make_packument(&["1.0.0", "1.0.5", "1.1.0", "2.0.0"], "2.0.0");
        assert_eq!(resolve_version(&packument, "~1.0.0").unwrap(), "1.0.5");
    }

    #[test]
    fn test_resolve_version_not_found() {
        let packument = make_packument(&["1.0.0", "2.0.0"], "2.0.0");
        let err = resolve_version(&packument, "^3.0.0").unwrap_err();
        assert_eq!(err.code(), crate::pkg::error::codes::PKG_VERSION_NOT_FOUND);
    }

    #[test]
    fn test_caret_skips_prerelease() {
        let packument = make_packument(&["1.0.0", "2.0.0-alpha.1", "2.0.0"], "1.0.0");
        assert_eq!(resolve_version(&packument, "^2.0.0").unwrap(), "2.0.0");
    }

    #[test]
    fn test_invalid_range() {
        let packument = make_packument(&["1.0.0"], "1.0.0");
        assert!(resolve_version(&packument, "not-a-range!!!").is_err());
    }

    #[test]
    fn test_or_range_picks_highest() {
        let packument = make_packument(&["1.5.0", "2.5.0"], "1.5.0");
        // latest satisfies the first alternative
        assert_eq!(resolve_version(&packument, "^1.0.0 || ^2.0.0").unwrap(), "1.5.0");

        let packument = make_packument(&["1.5.0", "2.5.0", "3.0.0"], "3.0.0");
        assert_eq!(resolve_version(&packument, "^1.0.0||^2.0.0").unwrap(), "2.5.0");
    }

    #[test]
    fn test_or_range_no_match() {
        let packument = make_packument(&["1.0.0", "2.0.0"], "2.0.0");
        assert!(resolve_version(&packument, "^3.0.0 || ^4.0.0").is_err());
    }

    #[test]
    fn test_x_range() {
        let packument = make_packument(&["1.0.0", "1.5.0", "2.0.0"], "2.0.0");
        assert_eq!(resolve_version(&packument, "1.x").unwrap(), "1.5.0");
    }

    #[test]
    fn test_hyphen_range() {
        let packument = make_packument(&["1.0.0", "1.5.0", "2.0.0", "3.0.0"], "3.0.0");
        assert_eq!(resolve_version(&packument, "1.0.0 - 2.0.0").unwrap(), "2.0.0");
    }

    #[test]
    fn test_space_separated_comparators() {
        let packument = make_packument(&["2.0.0", "2.1.2", "2.5.0", "3.0.0"], "3.0.0");
        assert_eq!(resolve_version(&packument, ">= 2.1.2 < 3.0.0").unwrap(), "2.5.0");
        assert_eq!(resolve_version(&packument, ">=2.1.2 <3.0.0").unwrap(), "2.5.0");
    }
}
