//! Rule-path matching (spec §4.F): `{name}` binds exactly one segment,
//! a terminal `{name=**}` binds one-or-more trailing segments as their
//! joined tail. Neither form nests or combines with literal text within the
//! same segment — a segment is either a literal, a `{var}`, or a `{var=**}`.

use std::collections::BTreeMap;

/// Matches `path` against `pattern`, returning the bound path variables on
/// success. Both are `/`-separated; a leading/trailing slash is ignored.
pub fn match_path(pattern: &str, path: &str) -> Option<BTreeMap<String, String>> {
    let pattern_segments: Vec<&str> = split_segments(pattern);
    let path_segments: Vec<&str> = split_segments(path);

    let mut variables = BTreeMap::new();
    let mut path_index = 0;

    for (pattern_index, segment) in pattern_segments.iter().enumerate() {
        if let Some(name) = recursive_wildcard_name(segment) {
            if pattern_index != pattern_segments.len() - 1 {
                return None;
            }
            if path_index >= path_segments.len() {
                return None;
            }
            variables.insert(name.to_string(), path_segments[path_index..].join("/"));
            return Some(variables);
        }

        if path_index >= path_segments.len() {
            return None;
        }

        if let Some(name) = single_segment_name(segment) {
            variables.insert(name.to_string(), path_segments[path_index].to_string());
        } else if *segment != path_segments[path_index] {
            return None;
        }

        path_index += 1;
    }

    if path_index == path_segments.len() {
        Some(variables)
    } else {
        None
    }
}

fn split_segments(raw: &str) -> Vec<&str> {
    raw.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

fn single_segment_name(segment: &str) -> Option<&str> {
    segment.strip_prefix('{').and_then(|s| s.strip_suffix('}'))
}

fn recursive_wildcard_name(segment: &str) -> Option<&str> {
    segment.strip_prefix('{').and_then(|s| s.strip_suffix("=**}"))
}

/// Validates a rule's `match` pattern (spec §4.F): non-empty, starts with
/// `/`, no empty segments, no trailing `/` unless it closes a recursive
/// wildcard segment.
pub fn validate_match_pattern(pattern: &str) -> Result<(), String> {
    if pattern.is_empty() {
        return Err("match pattern must not be empty".to_string());
    }
    if !pattern.starts_with('/') {
        return Err("match pattern must start with '/'".to_string());
    }
    let trimmed = &pattern[1..];
    if trimmed.is_empty() {
        return Err("match pattern must not be empty".to_string());
    }
    let ends_with_slash = trimmed.ends_with('/');
    let body = trimmed.strip_suffix('/').unwrap_or(trimmed);
    let segments: Vec<&str> = body.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err("match pattern must not contain empty segments".to_string());
    }
    if ends_with_slash {
        let closes_recursive_wildcard = segments
            .last()
            .map(|s| recursive_wildcard_name(s).is_some())
            .unwrap_or(false);
        if !closes_recursive_wildcard {
            return Err(
                "match pattern must not end with '/' unless closing a recursive wildcard".to_string(),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_segment_variable_binds_one_path_segment() {
        let vars = match_path("/orders/{orderId}", "/orders/o1").unwrap();
        assert_eq!(vars.get("orderId"), Some(&"o1".to_string()));
    }

    #[test]
    fn recursive_wildcard_binds_joined_tail() {
        let vars = match_path("/orders/{orderId}/items/{path=**}", "/orders/o1/items/a/b").unwrap();
        assert_eq!(vars.get("orderId"), Some(&"o1".to_string()));
        assert_eq!(vars.get("path"), Some(&"a/b".to_string()));
    }

    #[test]
    fn mismatched_literal_segment_fails_to_match() {
        assert!(match_path("/orders/{orderId}", "/invoices/o1").is_none());
    }

    #[test]
    fn segment_count_mismatch_without_wildcard_fails_to_match() {
        assert!(match_path("/orders/{orderId}", "/orders/o1/items/a").is_none());
    }

    #[test]
    fn validate_rejects_pattern_missing_leading_slash() {
        assert!(validate_match_pattern("orders/{orderId}").is_err());
    }

    #[test]
    fn validate_rejects_empty_segment() {
        assert!(validate_match_pattern("/orders//{orderId}").is_err());
    }

    #[test]
    fn validate_accepts_trailing_slash_only_for_recursive_wildcard() {
        assert!(validate_match_pattern("/orders/{path=**}/").is_ok());
        assert!(validate_match_pattern("/orders/{orderId}/").is_err());
    }
}
