//! Path normalisation and traversal guarding (§4.C, §8 "Path
//! normalisation is idempotent" / "Path traversal never escapes
//! namespace").

use crate::error::{NexusError, NexusResult};

/// Normalises a virtual path: enforces a leading `/`, collapses `//`,
/// strips a trailing `/` (except root), rejects embedded NUL bytes,
/// and resolves `.`/`..` segments without ever escaping the first
/// path segment (the originating namespace).
///
/// `normalize(normalize(p)) == normalize(p)` holds for every `p` this
/// function accepts.
pub fn normalize_path(path: &str) -> NexusResult<String> {
    if path.contains('\0') {
        return Err(NexusError::InvalidPath("embedded null byte".to_string()));
    }
    if path.is_empty() {
        return Err(NexusError::InvalidPath("empty path".to_string()));
    }

    let original_first_segment = path
        .trim_start_matches('/')
        .split('/')
        .find(|s| !s.is_empty());

    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if out.pop().is_none() {
                    return Err(NexusError::InvalidPath(format!(
                        "path {path} escapes its namespace via .."
                    )));
                }
            }
            s => out.push(s),
        }
    }

    if let Some(expected) = original_first_segment {
        if let Some(&actual) = out.first() {
            if actual != expected {
                return Err(NexusError::InvalidPath(format!(
                    "path {path} escapes its originating namespace"
                )));
            }
        } else {
            // every segment but the root was consumed by `..`
            return Err(NexusError::InvalidPath(format!(
                "path {path} escapes its namespace via .."
            )));
        }
    }

    if out.is_empty() {
        return Ok("/".to_string());
    }
    Ok(format!("/{}", out.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_double_slashes() {
        assert_eq!(normalize_path("/a//b///c").unwrap(), "/a/b/c");
    }

    #[test]
    fn strips_trailing_slash_except_root() {
        assert_eq!(normalize_path("/a/b/").unwrap(), "/a/b");
        assert_eq!(normalize_path("/").unwrap(), "/");
    }

    #[test]
    fn rejects_null_bytes() {
        assert!(normalize_path("/a\0b").is_err());
    }

    #[test]
    fn is_idempotent() {
        for p in ["/a//b/", "/a/./b/../c", "/", "/x"] {
            let once = normalize_path(p).unwrap();
            let twice = normalize_path(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn dot_dot_within_namespace_resolves() {
        assert_eq!(normalize_path("/a/b/../c").unwrap(), "/a/c");
    }

    #[test]
    fn dot_dot_escaping_namespace_is_rejected() {
        assert!(normalize_path("/a/../../etc/passwd").is_err());
        assert!(normalize_path("/a/..").is_err());
    }

    #[test]
    fn adds_leading_slash_enforcement() {
        assert!(normalize_path("/root").unwrap().starts_with('/'));
    }
}
