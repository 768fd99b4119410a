//! Remote path normalization.
//!
//! Remote paths are plain `/`-separated strings rooted at the provider's
//! root (`/` on WebDAV is the configured base URL, on Dropbox it is the app
//! folder or the user's home). They are never turned into [`std::path::Path`]s
//! since the local platform's separator rules don't apply to them.

use crate::error::{ErrorKind, Result};

/// Normalizes a remote path and makes sure it doesn't escape the root.
///
/// > **Note:** The root itself (`/`, or the empty string) is valid: it is
/// >           what listings start from.
///
/// # Examples
///
/// ```
/// use todosync_provider::normalize_path;
/// // Valid paths
/// assert_eq!(normalize_path("todo.txt").unwrap(), "/todo.txt");
/// assert_eq!(normalize_path("/Apps//todo/./todo.txt").unwrap(), "/Apps/todo/todo.txt");
/// assert_eq!(normalize_path("").unwrap(), "/");
/// // Invalid paths
/// assert!(normalize_path("../todo.txt").is_err());
/// assert!(normalize_path("a\0b").is_err());
/// ```
pub fn normalize(path: &str) -> Result<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                if segments.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.to_string()));
                }
            },
            // Null bytes truncate paths in every C-based server out there.
            s if s.contains('\0') => exn::bail!(ErrorKind::InvalidPath(path.to_string())),
            s => segments.push(s),
        }
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Last segment of a remote path (empty for the root).
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit_once('/').map_or(trimmed, |(_, name)| name)
}

/// Everything before the last segment, `/` for top-level entries.
pub fn parent(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

/// Join a file name onto a remote directory.
pub fn join(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("todo.txt", "/todo.txt")]
    #[case("/todo.txt", "/todo.txt")]
    #[case("/a/b/../c/todo.txt", "/a/c/todo.txt")]
    #[case("wrong/../still-wrong/.././correct//./todo.txt/", "/correct/todo.txt")]
    #[case("/", "/")]
    fn test_normalize_valid(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize(input).unwrap(), expected);
    }

    #[rstest]
    #[case("..")]
    #[case("/a/../../b")]
    #[case("/todo\0.txt")]
    fn test_normalize_invalid(#[case] input: &str) {
        let err = normalize(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[rstest]
    #[case("/todo.txt", "todo.txt", "/")]
    #[case("/Apps/todo/work.txt", "work.txt", "/Apps/todo")]
    #[case("/Apps/todo/", "todo", "/Apps")]
    fn test_file_name_and_parent(#[case] path: &str, #[case] name: &str, #[case] dir: &str) {
        assert_eq!(file_name(path), name);
        assert_eq!(parent(path), dir);
    }

    #[rstest]
    #[case("/", "done.txt", "/done.txt")]
    #[case("/Apps/todo", "done.txt", "/Apps/todo/done.txt")]
    #[case("/Apps/todo/", "/done.txt", "/Apps/todo/done.txt")]
    fn test_join(#[case] dir: &str, #[case] name: &str, #[case] expected: &str) {
        assert_eq!(join(dir, name), expected);
    }
}
