use anyhow::{Context, Result};
use promptmin_core::{short_hash, EvalResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

pub const BASELINE_FILE: &str = "baseline.prompt";
pub const MINIMIZED_FILE: &str = "minimized.prompt";
pub const CANDIDATES_DIR: &str = "candidates";
pub const TRACE_FILE: &str = "trace.jsonl";
pub const REPORT_MD_FILE: &str = "report.md";
pub const REPORT_JSON_FILE: &str = "report.json";
pub const META_FILE: &str = "meta.json";
pub const DIFF_FILE: &str = "diff.patch";

const SNAPSHOT_HASH_CHARS: usize = 12;

/// Output directory of one minimize run.
#[derive(Debug, Clone)]
pub struct Artifacts {
    root: PathBuf,
}

impl Artifacts {
    /// Creates the output directory and an empty `candidates/` directory.
    /// Snapshots from an earlier run in the same directory are removed.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create output directory {}", root.display()))?;
        let candidates = root.join(CANDIDATES_DIR);
        if candidates.exists() {
            fs::remove_dir_all(&candidates).with_context(|| {
                format!("Failed to clear candidates directory {}", candidates.display())
            })?;
        }
        fs::create_dir_all(&candidates)
            .with_context(|| format!("Failed to create {}", candidates.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn write(&self, name: &str, payload: &str) -> Result<PathBuf> {
        let path = self.path(name);
        write_atomic(&path, payload)?;
        Ok(path)
    }

    /// Writes `diff.patch` from `git diff --no-index`. A missing or failing
    /// git is logged and yields `None`.
    pub fn write_diff(&self, before: &str, after: &str) -> Option<PathBuf> {
        let output = match Command::new("git")
            .args(["diff", "--no-index", "--no-color", "--", before, after])
            .current_dir(&self.root)
            .output()
        {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(event = "diff_skipped", reason = "git not found");
                return None;
            }
            Err(err) => {
                warn!(event = "diff_skipped", error = %err);
                return None;
            }
        };

        // git diff --no-index exits 1 when the files differ.
        match output.status.code() {
            Some(0) | Some(1) => {}
            code => {
                warn!(
                    event = "diff_failed",
                    code = ?code,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                );
                return None;
            }
        }

        let patch = String::from_utf8_lossy(&output.stdout);
        match self.write(DIFF_FILE, &patch) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(event = "diff_write_failed", error = %format!("{err:#}"));
                None
            }
        }
    }
}

/// Stages `payload` in a uniquely named sibling and renames it over `path`.
/// Concurrent writers of one artifact never share a staging file.
pub fn write_atomic(path: &Path, payload: &str) -> Result<()> {
    let name = path
        .file_name()
        .with_context(|| format!("Artifact path {} has no file name", path.display()))?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create artifact directory {}", dir.display()))?;
    }

    let staging = path.with_file_name(format!(
        "{}.{}.tmp",
        name.to_string_lossy(),
        Uuid::new_v4().simple()
    ));
    fs::write(&staging, payload)
        .with_context(|| format!("Failed to stage artifact {}", staging.display()))?;
    if let Err(err) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(err)
            .with_context(|| format!("Failed to move artifact into {}", path.display()));
    }
    Ok(())
}

/// Writes one numbered file per accepted candidate into `candidates/`.
#[derive(Debug)]
pub struct CandidateSnapshots {
    dir: PathBuf,
    written: u32,
}

impl CandidateSnapshots {
    pub fn new(artifacts: &Artifacts) -> Self {
        Self {
            dir: artifacts.path(CANDIDATES_DIR),
            written: 0,
        }
    }

    pub fn written(&self) -> u32 {
        self.written
    }

    /// Snapshot failures are logged; they never stop a reduction.
    pub fn record(&mut self, document: &str, verdict: &EvalResult) {
        let name = format!(
            "{:04}-{}.prompt",
            self.written + 1,
            short_hash(document, SNAPSHOT_HASH_CHARS)
        );
        let path = self.dir.join(&name);
        match write_atomic(&path, document) {
            Ok(()) => {
                self.written += 1;
                debug!(
                    event = "candidate_snapshot",
                    file = %name,
                    chars = document.len(),
                    runs = verdict.total_runs,
                );
            }
            Err(err) => {
                warn!(event = "candidate_snapshot_failed", file = %name, error = %format!("{err:#}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing() -> EvalResult {
        EvalResult {
            is_fail: true,
            failing_tests: Vec::new(),
            total_runs: 1,
            tests: Vec::new(),
        }
    }

    #[test]
    fn write_atomic_replaces_without_leftovers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("report.md");
        write_atomic(&path, "first").expect("write");
        write_atomic(&path, "second").expect("rewrite");

        assert_eq!(fs::read_to_string(&path).expect("read"), "second");
        let names = fs::read_dir(path.parent().expect("parent"))
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect::<Vec<_>>();
        assert_eq!(names, vec![std::ffi::OsString::from("report.md")]);
    }

    #[cfg(unix)]
    #[test]
    fn concurrent_writers_leave_one_whole_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.md");
        let payloads = (0..8)
            .map(|writer| format!("writer {writer}\n").repeat(512))
            .collect::<Vec<_>>();

        std::thread::scope(|scope| {
            for payload in &payloads {
                let path = &path;
                scope.spawn(move || {
                    for _ in 0..20 {
                        write_atomic(path, payload).expect("write");
                    }
                });
            }
        });

        let content = fs::read_to_string(&path).expect("read");
        assert!(payloads.contains(&content));
        let names = fs::read_dir(dir.path())
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect::<Vec<_>>();
        assert_eq!(names, vec![std::ffi::OsString::from("report.md")]);
    }

    #[test]
    fn create_clears_stale_candidates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stale = dir.path().join(CANDIDATES_DIR).join("0001-old.prompt");
        write_atomic(&stale, "old").expect("stale");

        let artifacts = Artifacts::create(dir.path()).expect("artifacts");
        assert!(!stale.exists());
        assert!(artifacts.path(CANDIDATES_DIR).is_dir());
    }

    #[test]
    fn snapshots_are_numbered_and_hashed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifacts = Artifacts::create(dir.path()).expect("artifacts");
        let mut snapshots = CandidateSnapshots::new(&artifacts);
        snapshots.record("abc", &failing());
        snapshots.record("ab", &failing());

        assert_eq!(snapshots.written(), 2);
        let mut names = fs::read_dir(artifacts.path(CANDIDATES_DIR))
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names[0], format!("0001-{}.prompt", short_hash("abc", 12)));
        assert!(names[1].starts_with("0002-"));
    }
}
