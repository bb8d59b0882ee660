//! Glob matching for operation, resource and URL patterns.
//!
//! Operation patterns are dot-segmented: `*` matches exactly one segment,
//! `**` matches any remainder. Resource patterns are id globs: `tab:*`
//! matches every tab, bare `*` matches everything, anything else is an
//! exact id. URL constraint patterns use `*` as an any-characters
//! wildcard.

/// Matches an operation against a dot-segmented pattern.
#[must_use]
pub fn op_matches(pattern: &str, op: &str) -> bool {
    fn segments_match(pat: &[&str], ops: &[&str]) -> bool {
        match pat.split_first() {
            None => ops.is_empty(),
            Some((&"**", _)) => true,
            Some((&"*", rest)) => ops
                .split_first()
                .is_some_and(|(_, ops_rest)| segments_match(rest, ops_rest)),
            Some((seg, rest)) => ops
                .split_first()
                .is_some_and(|(op_seg, ops_rest)| seg == op_seg && segments_match(rest, ops_rest)),
        }
    }
    let pat: Vec<&str> = pattern.split('.').collect();
    let ops: Vec<&str> = op.split('.').collect();
    segments_match(&pat, &ops)
}

/// Matches a resource id against a resource pattern.
#[must_use]
pub fn resource_matches(pattern: &str, resource: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(":*") {
        return resource
            .split_once(':')
            .is_some_and(|(tag, _)| tag == prefix);
    }
    pattern == resource
}

/// Matches a URL against a `*`-wildcard glob.
#[must_use]
pub fn url_matches(pattern: &str, url: &str) -> bool {
    wildcard(pattern.as_bytes(), url.as_bytes())
}

/// Iterative wildcard matcher (`*` = any run of characters).
fn wildcard(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let (mut star, mut mark) = (None::<usize>, 0usize);
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}
