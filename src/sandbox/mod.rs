//! Filesystem confinement for every path a task touches.
//!
//! The guard is applied once, at the executor boundary: a handler only ever
//! receives [`ValidatedParams`], and the only way to build one is
//! [`SandboxGuard::validate_params`]. Handlers therefore never re-check paths.
//!
//! A path is accepted when:
//!
//! 1. after resolving `.` and `..`, the part below the root contains none
//!    of the forbidden tokens (case-insensitive). The root itself is chosen
//!    by the operator and is not checked, so `out.txt` and `<root>/out.txt`
//!    get the same verdict.
//! 2. that normalized path lies under the root, compared component-wise so
//!    `/data2` is not inside `/data`
//! 3. the deepest existing ancestor, with symlinks resolved, still lies
//!    under the canonical root

pub mod locks;

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, warn};

use crate::operations::TaskParams;

pub use locks::PathLocks;

/// Sandbox policy violation. Always a caller mistake, never a server fault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityError {
    #[error("Task denied: access outside the sandbox is not allowed ({path})")]
    OutsideSandbox { path: String },
    #[error("Task denied: '{token}' operations are not allowed ({path})")]
    ForbiddenOperation { path: String, token: String },
}

/// Root confinement plus destructive-action tokens.
///
/// Built once at startup from the `[sandbox]` config section and shared
/// read-only by every task.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    root: PathBuf,
    forbidden: Vec<String>,
}

impl SandboxPolicy {
    pub fn new(root: impl Into<PathBuf>, forbidden: impl IntoIterator<Item = String>) -> Self {
        Self {
            root: root.into(),
            forbidden: forbidden
                .into_iter()
                .map(|t| t.to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn forbidden(&self) -> impl Iterator<Item = &str> {
        self.forbidden.iter().map(String::as_str)
    }
}

/// Parameters whose paths have all passed [`SandboxGuard::validate`].
///
/// Paths are absolute and normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedParams {
    paths: BTreeMap<&'static str, PathBuf>,
    values: BTreeMap<&'static str, String>,
}

impl ValidatedParams {
    /// Returns the named path, or an error naming the missing parameter.
    pub fn path(&self, name: &str) -> anyhow::Result<&Path> {
        self.paths
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| anyhow!("Missing required path parameter: {name}"))
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.values().map(PathBuf::as_path)
    }
}

#[derive(Debug, Clone)]
pub struct SandboxGuard {
    policy: Arc<SandboxPolicy>,
    /// Absolute, lexically normalized root
    root: PathBuf,
    /// Root with symlinks resolved (falls back to `root` when missing)
    canonical_root: PathBuf,
}

impl SandboxGuard {
    pub fn new(policy: SandboxPolicy) -> Self {
        let absolute = std::path::absolute(policy.root()).unwrap_or_else(|_| policy.root().to_path_buf());
        let root = normalize(&absolute);
        let canonical_root = resolve_existing(&root).unwrap_or_else(|| root.clone());
        debug!(
            "Sandbox root {} (canonical {})",
            root.display(),
            canonical_root.display()
        );

        Self {
            policy: Arc::new(policy),
            root,
            canonical_root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validates a raw path (absolute, or relative to the sandbox root) and
    /// returns its normalized absolute form.
    ///
    /// Performs no writes. Must run before any handler touches the path.
    pub fn validate(&self, raw: &str) -> Result<PathBuf, SecurityError> {
        let outside = || SecurityError::OutsideSandbox {
            path: raw.to_string(),
        };

        if raw.trim().is_empty() {
            return Err(outside());
        }

        let candidate = Path::new(raw);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let normalized = normalize(&joined);

        let checked = normalized.strip_prefix(&self.root).unwrap_or(&normalized);
        let lowered = checked.to_string_lossy().to_lowercase();
        if let Some(token) = self.policy.forbidden().find(|t| lowered.contains(t)) {
            warn!("Rejected path {raw}: forbidden token '{token}'");
            return Err(SecurityError::ForbiddenOperation {
                path: raw.to_string(),
                token: token.to_string(),
            });
        }

        if !normalized.starts_with(&self.root) {
            warn!("Rejected path {raw}: outside {}", self.root.display());
            return Err(outside());
        }

        // A symlink inside the root may still point elsewhere
        if let Some(resolved) = resolve_existing(&normalized) {
            if !resolved.starts_with(&self.canonical_root) {
                warn!(
                    "Rejected path {raw}: resolves to {} outside the sandbox",
                    resolved.display()
                );
                return Err(outside());
            }
        }

        Ok(normalized)
    }

    /// Validates every path parameter, failing on the first violation.
    pub fn validate_params(&self, params: TaskParams) -> Result<ValidatedParams, SecurityError> {
        let (raw_paths, values) = params.into_parts();
        let mut paths = BTreeMap::new();
        for (name, raw) in raw_paths {
            paths.insert(name, self.validate(&raw)?);
        }
        Ok(ValidatedParams { paths, values })
    }
}

/// Resolves `.` and `..` without touching the filesystem.
/// `..` never climbs above the filesystem root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::ParentDir) | None => out.push(".."),
                _ => {}
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalizes the deepest existing ancestor of `path` and re-appends the
/// missing tail. Returns `None` when no ancestor can be resolved.
fn resolve_existing(path: &Path) -> Option<PathBuf> {
    let mut existing = path;
    let mut tail = Vec::new();
    loop {
        match std::fs::canonicalize(existing) {
            Ok(mut resolved) => {
                for segment in tail.iter().rev() {
                    resolved.push(segment);
                }
                return Some(resolved);
            }
            Err(_) => {
                tail.push(existing.file_name()?.to_os_string());
                existing = existing.parent()?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard_at(root: &Path) -> SandboxGuard {
        SandboxGuard::new(SandboxPolicy::new(root, vec!["delete".to_string()]))
    }

    fn data_guard() -> SandboxGuard {
        guard_at(Path::new("/data"))
    }

    // ── normalize tests ─────────────────────────────────

    #[test]
    fn test_normalize_resolves_parent_segments() {
        assert_eq!(normalize(Path::new("/data/a/../b")), PathBuf::from("/data/b"));
        assert_eq!(normalize(Path::new("/data/./a/./b")), PathBuf::from("/data/a/b"));
        assert_eq!(normalize(Path::new("/data/../etc/passwd")), PathBuf::from("/etc/passwd"));
    }

    #[test]
    fn test_normalize_never_climbs_above_root() {
        assert_eq!(normalize(Path::new("/../../etc")), PathBuf::from("/etc"));
    }

    // ── validate tests ──────────────────────────────────

    #[test]
    fn test_validate_accepts_path_under_root() {
        let guard = data_guard();
        assert_eq!(
            guard.validate("/data/dates.txt").unwrap(),
            PathBuf::from("/data/dates.txt")
        );
    }

    #[test]
    fn test_validate_resolves_relative_paths_against_root() {
        let guard = data_guard();
        assert_eq!(
            guard.validate("docs/index.json").unwrap(),
            PathBuf::from("/data/docs/index.json")
        );
    }

    #[test]
    fn test_validate_rejects_outside_root() {
        let guard = data_guard();
        for path in ["/etc/passwd", "/tmp/x", "/", "/dat", "/data2/file.txt"] {
            assert!(
                matches!(guard.validate(path), Err(SecurityError::OutsideSandbox { .. })),
                "{path} should be outside"
            );
        }
    }

    #[test]
    fn test_validate_rejects_parent_traversal() {
        let guard = data_guard();
        for path in ["/data/../etc/passwd", "/data/a/../../etc", "../etc/passwd", "docs/../../root"] {
            assert!(
                matches!(guard.validate(path), Err(SecurityError::OutsideSandbox { .. })),
                "{path} should be outside"
            );
        }
    }

    #[test]
    fn test_validate_allows_traversal_that_stays_inside() {
        let guard = data_guard();
        assert_eq!(
            guard.validate("/data/a/../b.txt").unwrap(),
            PathBuf::from("/data/b.txt")
        );
    }

    #[test]
    fn test_validate_rejects_forbidden_token_any_case() {
        let guard = data_guard();
        for path in ["/data/delete.txt", "/data/DELETE/me", "/data/to-DeLeTe.json"] {
            assert!(
                matches!(
                    guard.validate(path),
                    Err(SecurityError::ForbiddenOperation { .. })
                ),
                "{path} should be forbidden"
            );
        }
    }

    #[test]
    fn test_validate_ignores_token_in_root() {
        let guard = guard_at(Path::new("/srv/delete-zone"));
        assert_eq!(
            guard.validate("out.txt").unwrap(),
            PathBuf::from("/srv/delete-zone/out.txt")
        );
        assert_eq!(
            guard.validate("/srv/delete-zone/out.txt").unwrap(),
            PathBuf::from("/srv/delete-zone/out.txt")
        );
        assert!(matches!(
            guard.validate("/srv/delete-zone/delete.txt"),
            Err(SecurityError::ForbiddenOperation { .. })
        ));
    }

    #[test]
    fn test_validate_checks_tokens_after_normalizing() {
        let guard = data_guard();
        assert_eq!(
            guard.validate("/data/delete/../keep.txt").unwrap(),
            PathBuf::from("/data/keep.txt")
        );
        assert!(matches!(
            guard.validate("/data/a/../delete.txt"),
            Err(SecurityError::ForbiddenOperation { .. })
        ));
    }

    #[test]
    fn test_validate_forbidden_and_outside_fails_either_way() {
        let guard = data_guard();
        assert!(guard.validate("/etc/delete").is_err());
    }

    #[test]
    fn test_validate_rejects_empty_path() {
        let guard = data_guard();
        assert!(matches!(
            guard.validate("   "),
            Err(SecurityError::OutsideSandbox { .. })
        ));
    }

    #[test]
    fn test_validate_is_deterministic() {
        let guard = data_guard();
        assert_eq!(guard.validate("/data/x.txt"), guard.validate("/data/x.txt"));
        assert_eq!(guard.validate("/etc/x"), guard.validate("/etc/x"));
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("escape")).unwrap();

        let guard = guard_at(root.path());
        let result = guard.validate("escape/secret.txt");
        assert!(matches!(result, Err(SecurityError::OutsideSandbox { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_allows_symlink_inside_root() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("real")).unwrap();
        std::os::unix::fs::symlink(root.path().join("real"), root.path().join("alias")).unwrap();

        let guard = guard_at(root.path());
        assert!(guard.validate("alias/file.txt").is_ok());
    }

    // ── validate_params tests ───────────────────────────

    #[test]
    fn test_validate_params_normalizes_every_path() {
        let guard = data_guard();
        let params = TaskParams::new()
            .with_path("input", "/data/a/../in.txt")
            .with_path("output", "out.txt")
            .with_value("weekday", "wednesday");

        let validated = guard.validate_params(params).unwrap();
        assert_eq!(validated.path("input").unwrap(), Path::new("/data/in.txt"));
        assert_eq!(validated.path("output").unwrap(), Path::new("/data/out.txt"));
        assert_eq!(validated.value("weekday"), Some("wednesday"));
        assert_eq!(validated.paths().count(), 2);
    }

    #[test]
    fn test_validate_params_fails_on_any_bad_path() {
        let guard = data_guard();
        let params = TaskParams::new()
            .with_path("input", "/data/in.txt")
            .with_path("output", "/etc/out.txt");
        assert!(guard.validate_params(params).is_err());
    }

    #[test]
    fn test_missing_path_parameter_is_reported_by_name() {
        let guard = data_guard();
        let validated = guard.validate_params(TaskParams::new()).unwrap();
        let err = validated.path("input").unwrap_err();
        assert!(err.to_string().contains("input"));
    }
}
