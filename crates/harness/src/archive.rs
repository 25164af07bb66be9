//! Report archive
//!
//! Filesystem side of the harness: batch summaries, the report directory
//! served to the dashboard, and test file discovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use testdeck_common::{BatchSummary, Error, Result, SuiteDescriptor};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Extensions listed under the reports root
pub const REPORT_EXTENSIONS: &[&str] = &[
    "html", "json", "xml", "png", "jpg", "jpeg", "webm", "zip", "txt", "md",
];

const SUITE_SUFFIXES: &[&str] = &[
    ".spec.ts", ".spec.js", ".spec.mjs", ".test.ts", ".test.js", ".test.mjs",
];

// ============================================================================
// Batch summaries
// ============================================================================

pub fn write_summary(path: &Path, summary: &BatchSummary) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(summary)?)?;
    info!("Summary written to {}", path.display());
    Ok(())
}

pub fn read_summary(path: &Path) -> Result<BatchSummary> {
    if !path.exists() {
        return Err(Error::NotFound {
            kind: "summary".to_string(),
            id: path.display().to_string(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

// ============================================================================
// Report files
// ============================================================================

/// Metadata for one file under the reports root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportFile {
    pub name: String,
    /// Relative to the reports root, `/`-separated
    pub path: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| allowed.iter().any(|a| a.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Recursively list report files. A missing root yields an empty list.
pub fn list_reports(root: &Path) -> Vec<ReportFile> {
    if !root.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<ReportFile> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), REPORT_EXTENSIONS))
        .filter_map(|e| {
            let metadata = e.metadata().ok()?;
            Some(ReportFile {
                name: e.file_name().to_string_lossy().into_owned(),
                path: relative_slash_path(root, e.path())?,
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            })
        })
        .collect();

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

/// Resolve a client-supplied relative path inside `root`.
///
/// Absolute paths and `..` components are rejected before touching the
/// filesystem; the canonical result must still lie under the canonical root,
/// which also catches symlinks pointing outside.
pub fn resolve_report_path(root: &Path, rel: &str) -> Result<PathBuf> {
    let forbidden = || Error::Forbidden(format!("path escapes the reports directory: {}", rel));

    let requested = Path::new(rel);
    if requested.is_absolute() || rel.starts_with('/') || rel.starts_with('\\') {
        return Err(forbidden());
    }
    for component in requested.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(forbidden())
            }
        }
    }

    let not_found = || Error::NotFound {
        kind: "report".to_string(),
        id: rel.to_string(),
    };
    let canon_root = root.canonicalize().map_err(|_| not_found())?;
    let canon = root.join(requested).canonicalize().map_err(|_| not_found())?;
    if !canon.starts_with(&canon_root) {
        return Err(forbidden());
    }
    if !canon.is_file() {
        return Err(not_found());
    }
    Ok(canon)
}

/// Most recently modified `index.html` under `root`
pub fn latest_html_report(root: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == "index.html")
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((modified, e.into_path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

// ============================================================================
// Suite discovery
// ============================================================================

fn suite_stem(file_name: &str) -> Option<&str> {
    SUITE_SUFFIXES
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))
        .filter(|stem| !stem.is_empty())
}

/// Scan `tests_dir` for test files. Never fails: a missing or unreadable
/// directory yields an empty list.
pub fn discover_suites(tests_dir: &Path) -> Vec<SuiteDescriptor> {
    let mut suites: Vec<SuiteDescriptor> = WalkDir::new(tests_dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != "node_modules")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let file_name = e.file_name().to_str()?;
            let name = suite_stem(file_name)?.to_string();
            let file = relative_slash_path(tests_dir, e.path())?;
            Some(SuiteDescriptor {
                id: file.clone(),
                name,
                file,
                status: None,
            })
        })
        .collect();

    suites.sort_by(|a, b| a.file.cmp(&b.file));
    debug!("Discovered {} suite(s) under {}", suites.len(), tests_dir.display());
    suites
}

#[cfg(test)]
mod tests {
    use super::*;
    use testdeck_common::{RunSummary, SuiteResult, SuiteStatus};

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_summary_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/summary.json");
        let summary = BatchSummary::new(vec![SuiteResult::from_summary(
            "admin",
            "Admin",
            SuiteStatus::Passed,
            RunSummary::from_counts(3, 0, 1),
            1200,
        )]);

        write_summary(&path, &summary).unwrap();
        assert_eq!(read_summary(&path).unwrap(), summary);

        let err = read_summary(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_list_reports_filters_and_recurses() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("index.html"));
        touch(&dir.path().join("data/trace.zip"));
        touch(&dir.path().join("data/shot.PNG"));
        touch(&dir.path().join("data/ignored.bin"));

        let files = list_reports(dir.path());
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["data/shot.PNG", "data/trace.zip", "index.html"]);
        assert_eq!(files[2].name, "index.html");
        assert_eq!(files[2].size, 1);
    }

    #[test]
    fn test_list_reports_missing_root() {
        assert!(list_reports(Path::new("/nonexistent/testdeck-reports")).is_empty());
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("index.html"));

        for bad in ["../secret.txt", "data/../../etc/passwd", "/etc/passwd"] {
            let err = resolve_report_path(dir.path(), bad).unwrap_err();
            assert!(matches!(err, Error::Forbidden(_)), "{} was not rejected", bad);
        }
    }

    #[test]
    fn test_resolve_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("data/index.html"));

        let resolved = resolve_report_path(dir.path(), "data/index.html").unwrap();
        assert!(resolved.ends_with("data/index.html"));

        let err = resolve_report_path(dir.path(), "data/missing.html").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        touch(&outside.path().join("secret.txt"));
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt"))
            .unwrap();

        let err = resolve_report_path(dir.path(), "link.txt").unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[test]
    fn test_discover_suites() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("admin/users.spec.ts"));
        touch(&dir.path().join("checkout.test.mjs"));
        touch(&dir.path().join("helpers.ts"));
        touch(&dir.path().join("node_modules/pkg/lib.spec.js"));

        let suites = discover_suites(dir.path());
        let files: Vec<_> = suites.iter().map(|s| s.file.as_str()).collect();
        assert_eq!(files, ["admin/users.spec.ts", "checkout.test.mjs"]);
        assert_eq!(suites[0].name, "users");
        assert_eq!(suites[1].name, "checkout");
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        assert!(discover_suites(Path::new("/nonexistent/testdeck-tests")).is_empty());
    }

    #[test]
    fn test_latest_html_report() {
        let dir = tempfile::tempdir().unwrap();
        assert!(latest_html_report(dir.path()).is_none());
        touch(&dir.path().join("run-1/index.html"));
        assert!(latest_html_report(dir.path())
            .unwrap()
            .ends_with("run-1/index.html"));
    }
}
