use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("injection bundle of {size} bytes exceeds the error threshold of {threshold} bytes")]
    Oversize { size: u64, threshold: u64 },
}

/// Which optional categories to fold into the bundle, beyond the always-
/// eligible story files. The project-context file is controlled separately
/// since even the commit phase's story-only bundle may include it.
#[derive(Debug, Clone, Copy, Default)]
pub struct InjectionScope {
    pub project_context: bool,
    pub discovery: bool,
    pub tech_spec: bool,
}

pub struct InjectionResult {
    pub xml: String,
    pub size: u64,
    pub file_count: usize,
}

/// Assembles the `<file_injections>` XML envelope deterministically:
/// project-context file first, then story files, then discovery files, then
/// tech-spec files, then any explicit extras, each appearing at most once.
/// Unreadable files are skipped silently. Size is checked against the
/// warning/error thresholds (in bytes) after assembly.
pub fn build_injection_bundle(
    artifacts_dir: &Path,
    project_context_path: Option<&Path>,
    story_keys: &[String],
    scope: InjectionScope,
    extra_files: &[PathBuf],
    warning_threshold: u64,
    error_threshold: u64,
) -> Result<(InjectionResult, bool), InjectionError> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut body = String::new();
    let mut file_count = 0usize;

    if scope.project_context {
        if let Some(path) = project_context_path {
            append_file(&mut body, path, artifacts_dir, &mut seen, &mut file_count);
        }
    }

    let (story_files, discovery_files, tech_spec_files) = categorize(artifacts_dir, story_keys);

    for path in story_files {
        append_file(&mut body, &path, artifacts_dir, &mut seen, &mut file_count);
    }
    if scope.discovery {
        for path in discovery_files {
            append_file(&mut body, &path, artifacts_dir, &mut seen, &mut file_count);
        }
    }
    if scope.tech_spec {
        for path in tech_spec_files {
            append_file(&mut body, &path, artifacts_dir, &mut seen, &mut file_count);
        }
    }
    for path in extra_files {
        append_file(&mut body, path, artifacts_dir, &mut seen, &mut file_count);
    }

    let xml = format!(
        "<file_injections rule=\"DO NOT read these files - content already provided\">{body}</file_injections>"
    );
    let size = xml.len() as u64;
    if size > error_threshold {
        return Err(InjectionError::Oversize {
            size,
            threshold: error_threshold,
        });
    }
    let warned = size > warning_threshold;
    let empty = file_count == 0;

    Ok((
        InjectionResult {
            xml,
            size,
            file_count,
        },
        warned || empty,
    ))
}

/// Appends an escaped `<git_status>` block to an already-built bundle, for
/// the commit phase. Re-checks the combined size against the same
/// thresholds.
pub fn append_git_status(
    bundle: &str,
    git_status_text: &str,
    warning_threshold: u64,
    error_threshold: u64,
) -> Result<(String, bool), InjectionError> {
    let closing = "</file_injections>";
    let (head, _) = bundle
        .rsplit_once(closing)
        .unwrap_or((bundle, ""));
    let combined = format!(
        "{head}<git_status>{}</git_status>{closing}",
        xml_escape(git_status_text)
    );
    let size = combined.len() as u64;
    if size > error_threshold {
        return Err(InjectionError::Oversize {
            size,
            threshold: error_threshold,
        });
    }
    Ok((combined, size > warning_threshold))
}

/// Runs `git status` with a 10-second timeout, returning its stdout or a
/// descriptive error message; both are caller-escaped into the bundle.
pub async fn capture_git_status(cwd: &Path) -> String {
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        tokio::process::Command::new("git")
            .arg("status")
            .current_dir(cwd)
            .output(),
    )
    .await;

    match result {
        Ok(Ok(output)) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).to_string()
        }
        Ok(Ok(output)) => format!(
            "git status exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ),
        Ok(Err(err)) => format!("failed to spawn git status: {err}"),
        Err(_) => "git status timed out after 10s".to_string(),
    }
}

fn categorize(artifacts_dir: &Path, story_keys: &[String]) -> (Vec<PathBuf>, Vec<PathBuf>, Vec<PathBuf>) {
    let mut story = Vec::new();
    let mut discovery = Vec::new();
    let mut tech_spec = Vec::new();

    let Ok(entries) = std::fs::read_dir(artifacts_dir) else {
        return (story, discovery, tech_spec);
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort_by_key(|p| p.file_name().map(|n| n.to_string_lossy().to_lowercase()));

    for path in files {
        let name_lower = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let matches_story = story_keys
            .iter()
            .any(|key| name_lower.contains(&key.to_lowercase()));
        if !matches_story {
            continue;
        }
        if name_lower.contains("discovery") {
            discovery.push(path);
        } else if name_lower.contains("tech-spec") {
            tech_spec.push(path);
        } else {
            story.push(path);
        }
    }
    (story, discovery, tech_spec)
}

fn append_file(
    body: &mut String,
    path: &Path,
    base: &Path,
    seen: &mut HashSet<PathBuf>,
    file_count: &mut usize,
) {
    if !seen.insert(path.to_path_buf()) {
        return;
    }
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    let rel = path.strip_prefix(base).unwrap_or(path);
    let escaped_path = rel.display().to_string().replace('"', "&quot;");
    body.push_str(&format!("<file path=\"{escaped_path}\">{content}</file>"));
    *file_count += 1;
}

pub fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bundle_is_flagged_and_valid_xml() {
        let dir = tempfile::tempdir().unwrap();
        let (result, warned_or_empty) = build_injection_bundle(
            dir.path(),
            None,
            &["1-1".to_string()],
            InjectionScope::default(),
            &[],
            100 * 1024,
            150 * 1024,
        )
        .unwrap();
        assert_eq!(result.file_count, 0);
        assert!(warned_or_empty);
        assert!(result.xml.starts_with("<file_injections"));
    }

    #[test]
    fn oversize_bundle_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1-1-story.md");
        std::fs::write(&path, "x".repeat(200)).unwrap();
        let err = build_injection_bundle(
            dir.path(),
            None,
            &["1-1".to_string()],
            InjectionScope::default(),
            &[],
            1,
            100,
        )
        .unwrap_err();
        assert!(matches!(err, InjectionError::Oversize { .. }));
    }

    #[test]
    fn warning_threshold_flags_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1-1-story.md");
        std::fs::write(&path, "x".repeat(200)).unwrap();
        let (_result, warned) = build_injection_bundle(
            dir.path(),
            None,
            &["1-1".to_string()],
            InjectionScope::default(),
            &[],
            10,
            10_000,
        )
        .unwrap();
        assert!(warned);
    }

    #[test]
    fn path_quote_is_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1-1-\"quoted\".md");
        std::fs::write(&path, "content").unwrap();
        let (result, _) = build_injection_bundle(
            dir.path(),
            None,
            &["1-1".to_string()],
            InjectionScope::default(),
            &[],
            1_000_000,
            2_000_000,
        )
        .unwrap();
        assert!(result.xml.contains("&quot;quoted&quot;"));
    }

    #[test]
    fn discovery_and_tech_spec_only_included_when_scoped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1-1-discovery.md"), "d").unwrap();
        std::fs::write(dir.path().join("1-1-tech-spec.md"), "t").unwrap();
        std::fs::write(dir.path().join("1-1-story.md"), "s").unwrap();

        let (result, _) = build_injection_bundle(
            dir.path(),
            None,
            &["1-1".to_string()],
            InjectionScope {
                project_context: false,
                discovery: false,
                tech_spec: false,
            },
            &[],
            1_000_000,
            2_000_000,
        )
        .unwrap();
        assert_eq!(result.file_count, 1);

        let (result_full, _) = build_injection_bundle(
            dir.path(),
            None,
            &["1-1".to_string()],
            InjectionScope {
                project_context: false,
                discovery: true,
                tech_spec: true,
            },
            &[],
            1_000_000,
            2_000_000,
        )
        .unwrap();
        assert_eq!(result_full.file_count, 3);
    }
}
