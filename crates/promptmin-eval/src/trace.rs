use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// One evaluated test of one candidate document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalTrace {
    pub at: String,
    pub prompt_hash: String,
    pub prompt_hint: String,
    pub test_id: String,
    pub ok: bool,
    pub failures: u32,
    pub trials: u32,
    pub cache_hit: bool,
    pub cache_hits: u32,
    pub reason: String,
}

/// One probe made by a reduction strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTrace {
    pub at: String,
    pub strategy: String,
    pub granularity: String,
    pub kept_chunks: usize,
    pub removed: usize,
    pub prompt_hash: String,
    pub is_fail: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    Eval(EvalTrace),
    Candidate(CandidateTrace),
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

impl CandidateTrace {
    pub fn new(
        strategy: &str,
        granularity: &str,
        kept_chunks: usize,
        removed: usize,
        prompt_hash: String,
        is_fail: bool,
    ) -> Self {
        Self {
            at: now_rfc3339(),
            strategy: strategy.to_string(),
            granularity: granularity.to_string(),
            kept_chunks,
            removed,
            prompt_hash,
            is_fail,
        }
    }
}

/// Append-only sink for trace events. Recording never fails the caller.
pub trait TraceSink: Send + Sync {
    fn record(&self, event: &TraceEvent);
}

/// JSONL trace file. Each append holds an exclusive advisory lock so lines
/// from concurrent writers never interleave.
#[derive(Debug, Clone)]
pub struct TraceLog {
    path: PathBuf,
}

impl TraceLog {
    /// Creates (or truncates) the trace file.
    pub fn create(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &TraceEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let written = file.write_all(line.as_bytes()).and_then(|()| file.flush());
        let _ = file.unlock();
        written
    }
}

impl TraceSink for TraceLog {
    fn record(&self, event: &TraceEvent) {
        if let Err(err) = self.append(event) {
            warn!(event = "trace_write_failed", path = %self.path.display(), error = %err);
        }
    }
}

/// In-memory sink, mostly for inspecting a session after the fact.
#[derive(Debug, Default)]
pub struct MemoryTrace {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemoryTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TraceSink for MemoryTrace {
    fn record(&self, event: &TraceEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
