//! Namespace path helpers
//!
//! Paths are `/`-separated and absolute. `clean` collapses repeated
//! separators and `.`/`..` components, and never leaves a trailing slash.

/// Normalize a namespace path to its absolute, slash-collapsed form
pub fn clean(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            other => components.push(other),
        }
    }
    format!("/{}", components.join("/"))
}

/// Join path fragments and clean the result
pub fn join(parts: &[&str]) -> String {
    clean(&parts.join("/"))
}

/// Parent of a path; `/` is its own parent
///
/// A trailing slash marks a directory prefix, so the parent of `/a/locks/`
/// is `/a/locks`.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Last component of a path
pub fn base(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}
