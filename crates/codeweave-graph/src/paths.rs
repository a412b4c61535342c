//! Path normalization helpers shared by the stores and the watch service.
//!
//! Graph file ids are workspace-relative with `/` separators. Folder
//! scoping always compares whole path segments so `src/parser` never
//! matches `src/parsers/...`.

use std::path::{Component, Path, PathBuf};

/// Convert a path to a `/`-separated string without a trailing separator.
pub fn normalize(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    trim_trailing_separator(&text).to_string()
}

fn trim_trailing_separator(text: &str) -> &str {
    let trimmed = text.trim_end_matches('/');
    if trimmed.is_empty() && text.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

/// Workspace-relative file id of `path`, or `None` if it lies outside `root`.
pub fn file_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Returns true if `path` equals `folder` or lies beneath it.
///
/// An empty folder (or `.`) scopes the whole workspace.
pub fn is_within(path: &str, folder: &str) -> bool {
    let folder = trim_trailing_separator(folder);
    if folder.is_empty() || folder == "." {
        return true;
    }
    if folder == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(folder) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Directory part of a `/`-separated file id (`""` for top-level files).
pub fn parent_dir(file_id: &str) -> &str {
    file_id.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Join a relative specifier onto a directory, folding `.` and `..`.
///
/// Returns `None` when the result would escape the workspace root.
pub fn join_relative(dir: &str, specifier: &str) -> Option<String> {
    let mut segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for part in specifier.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Absolute form of `path`, resolved against `root` when relative.
pub fn absolutize(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("src/parser/")), "src/parser");
        assert_eq!(normalize(Path::new("src\\win\\a.ts")), "src/win/a.ts");
        assert_eq!(normalize(Path::new("/")), "/");
    }

    #[test]
    fn test_file_id() {
        let root = Path::new("/ws");
        assert_eq!(
            file_id(root, Path::new("/ws/src/a.ts")).as_deref(),
            Some("src/a.ts")
        );
        assert_eq!(file_id(root, Path::new("/elsewhere/a.ts")), None);
        assert_eq!(file_id(root, Path::new("/ws")), None);
    }

    #[test]
    fn test_is_within_respects_separators() {
        assert!(is_within("src/parser", "src/parser"));
        assert!(is_within("src/parser/a.ts", "src/parser"));
        assert!(is_within("src/parser/a.ts", "src/parser/"));
        assert!(!is_within("src/parsers/custom.ts", "src/parser"));
        assert!(!is_within("src/parser.ts", "src/parser"));
        assert!(is_within("anything/at/all.ts", ""));
        assert!(is_within("/abs/path/x.py", "/abs"));
        assert!(!is_within("/absolute/x.py", "/abs"));
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("src/lib/a.ts"), "src/lib");
        assert_eq!(parent_dir("a.ts"), "");
    }

    #[test]
    fn test_join_relative() {
        assert_eq!(join_relative("src/lib", "./a").as_deref(), Some("src/lib/a"));
        assert_eq!(
            join_relative("src/lib", "../util/b").as_deref(),
            Some("src/util/b")
        );
        assert_eq!(join_relative("", "./a.ts").as_deref(), Some("a.ts"));
        assert_eq!(join_relative("src", "../../outside"), None);
    }
}
