//! Import target resolution.
//!
//! Maps an [`ImportSpec`] to the workspace file id it most likely refers to.
//! This is a static guess with no filesystem access: an extensionless
//! relative specifier takes the first entry of [`CANDIDATE_EXTENSIONS`],
//! whether or not that file exists. Import edges and call resolution both go
//! through [`resolve_import`] so the two graphs agree on targets.

use crate::artifact::ImportSpec;
use crate::paths;

/// Extensions tried, in order, for extensionless relative specifiers.
pub const CANDIDATE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "py"];

/// Extensions a specifier may already carry to be taken as-is.
const PARSABLE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs", "py", "pyi",
];

/// Resolve the file id an import points at.
///
/// `workspace_root` is the `/`-separated absolute root, used only to
/// relativize absolute `resolved_path` values. Non-relative specifiers
/// without a `resolved_path` are external packages and yield `None`.
pub fn resolve_import(
    importer_id: &str,
    import: &ImportSpec,
    workspace_root: Option<&str>,
) -> Option<String> {
    if let Some(resolved) = import.resolved_path.as_deref() {
        return normalize_resolved(importer_id, resolved, workspace_root);
    }
    if !import.is_relative() {
        return None;
    }
    resolve_relative(importer_id, &import.source)
}

/// Resolve a `./` or `../` specifier against the importing file.
pub fn resolve_relative(importer_id: &str, specifier: &str) -> Option<String> {
    let specifier = specifier
        .split(['?', '#'])
        .next()
        .unwrap_or(specifier)
        .trim();
    let dir = paths::parent_dir(importer_id);

    if specifier == "." || specifier == ".." || specifier.ends_with('/') {
        let index = format!(
            "{}/index.{}",
            specifier.trim_end_matches('/'),
            CANDIDATE_EXTENSIONS[0]
        );
        return paths::join_relative(dir, &index);
    }

    let joined = paths::join_relative(dir, specifier)?;
    if has_parsable_extension(&joined) {
        Some(joined)
    } else {
        Some(format!("{joined}.{}", CANDIDATE_EXTENSIONS[0]))
    }
}

fn normalize_resolved(
    importer_id: &str,
    resolved: &str,
    workspace_root: Option<&str>,
) -> Option<String> {
    let resolved = resolved.replace('\\', "/");
    if resolved.starts_with('.') {
        return paths::join_relative(paths::parent_dir(importer_id), &resolved);
    }
    if resolved.starts_with('/') {
        let root = workspace_root?;
        let rest = resolved.strip_prefix(root.trim_end_matches('/'))?;
        if !rest.starts_with('/') {
            return None;
        }
        return paths::join_relative("", rest);
    }
    paths::join_relative("", &resolved)
}

fn has_parsable_extension(path: &str) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    file_name
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && PARSABLE_EXTENSIONS.contains(&ext))
}

/// Absolute workspace root implied by an artifact's identity.
///
/// The absolute path ends with the workspace-relative id, so stripping the
/// id leaves the root.
pub fn workspace_root_of(absolute_path: &str, file_id: &str) -> Option<String> {
    let absolute_path = absolute_path.replace('\\', "/");
    absolute_path
        .strip_suffix(file_id)
        .map(|root| root.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_without_extension_takes_first_candidate() {
        let import = ImportSpec::new("./a");
        assert_eq!(
            resolve_import("src/b.ts", &import, None).as_deref(),
            Some("src/a.ts")
        );
        let parent = ImportSpec::new("../lib/util");
        assert_eq!(
            resolve_import("src/app/b.js", &parent, None).as_deref(),
            Some("src/lib/util.ts")
        );
    }

    #[test]
    fn test_relative_with_extension_is_kept() {
        let import = ImportSpec::new("./styles.js");
        assert_eq!(
            resolve_import("web/main.ts", &import, None).as_deref(),
            Some("web/styles.js")
        );
        let dotted = ImportSpec::new("./config.dev");
        assert_eq!(
            resolve_import("web/main.ts", &dotted, None).as_deref(),
            Some("web/config.dev.ts")
        );
    }

    #[test]
    fn test_directory_specifier_resolves_to_index() {
        assert_eq!(
            resolve_relative("src/app/main.ts", ".").as_deref(),
            Some("src/app/index.ts")
        );
        assert_eq!(
            resolve_relative("src/app/main.ts", "./components/").as_deref(),
            Some("src/app/components/index.ts")
        );
        assert_eq!(resolve_relative("main.ts", ".").as_deref(), Some("index.ts"));
    }

    #[test]
    fn test_external_packages_are_dropped() {
        assert_eq!(resolve_import("src/b.ts", &ImportSpec::new("react"), None), None);
        assert_eq!(
            resolve_import("src/b.ts", &ImportSpec::new("@scope/pkg/sub"), None),
            None
        );
    }

    #[test]
    fn test_escaping_root_is_unresolved() {
        assert_eq!(resolve_import("a.ts", &ImportSpec::new("../up"), None), None);
        assert_eq!(resolve_relative("a.ts", ".."), None);
        assert_eq!(resolve_relative("a.ts", "../"), None);
        assert_eq!(resolve_relative("src/a.ts", "../.."), None);
        assert_eq!(resolve_relative("src/a.ts", "..").as_deref(), Some("index.ts"));
    }

    #[test]
    fn test_resolved_path_takes_precedence() {
        let relative = ImportSpec::new("..helpers").with_resolved_path("../helpers.py");
        assert_eq!(
            resolve_import("pkg/sub/mod.py", &relative, None).as_deref(),
            Some("pkg/helpers.py")
        );

        let absolute = ImportSpec::new("pkg.mod").with_resolved_path("/ws/pkg/mod.py");
        assert_eq!(
            resolve_import("main.py", &absolute, Some("/ws")).as_deref(),
            Some("pkg/mod.py")
        );
        assert_eq!(resolve_import("main.py", &absolute, Some("/other")), None);

        let workspace_relative = ImportSpec::new("x").with_resolved_path("lib/x.ts");
        assert_eq!(
            resolve_import("main.ts", &workspace_relative, None).as_deref(),
            Some("lib/x.ts")
        );
    }

    #[test]
    fn test_query_suffix_is_ignored() {
        assert_eq!(
            resolve_relative("src/main.ts", "./worker?url").as_deref(),
            Some("src/worker.ts")
        );
    }

    #[test]
    fn test_workspace_root_of() {
        assert_eq!(
            workspace_root_of("/ws/src/a.ts", "src/a.ts").as_deref(),
            Some("/ws")
        );
        assert_eq!(workspace_root_of("/ws/src/a.ts", "other.ts"), None);
    }
}
