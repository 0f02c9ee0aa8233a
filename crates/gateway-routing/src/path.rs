//! Request path normalization.
//!
//! URL parsers resolve `.` and `..` segments before a request leaves the gateway, including
//! percent-encoded dots and `\` used as a separator. ACL matching and the outbound URL both
//! work on the normalized form so they always agree on the path the backend sees.

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

#[derive(Debug, PartialEq, Eq)]
enum DotSegment {
    Current,
    Parent,
}

fn dot_segment(segment: &str) -> Option<DotSegment> {
    match segment.to_ascii_lowercase().replace("%2e", ".").as_str() {
        "." => Some(DotSegment::Current),
        ".." => Some(DotSegment::Parent),
        _ => None,
    }
}

/// Resolve dot segments of a request path
///
/// Tabs and line breaks are dropped and `\` is treated as `/`, as URL parsers do. Returns
/// `None` when a `..` segment would climb above the root.
#[must_use]
pub fn normalize_path(path: &str) -> Option<String> {
    let cleaned: String = path
        .chars()
        .filter(|c| !matches!(c, '\t' | '\n' | '\r'))
        .collect();
    let relative = cleaned.strip_prefix(is_separator).unwrap_or(&cleaned);
    if relative.is_empty() {
        return Some("/".to_string());
    }

    let mut segments: Vec<&str> = Vec::new();
    let mut trailing_slash = false;
    for segment in relative.split(is_separator) {
        match dot_segment(segment) {
            Some(DotSegment::Current) => trailing_slash = true,
            Some(DotSegment::Parent) => {
                segments.pop()?;
                trailing_slash = true;
            }
            None => {
                segments.push(segment);
                trailing_slash = false;
            }
        }
    }

    let mut normalized = format!("/{}", segments.join("/"));
    if trailing_slash && !segments.is_empty() {
        normalized.push('/');
    }
    Some(normalized)
}
