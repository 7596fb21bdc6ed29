use crate::artifacts::{
    Artifacts, CandidateSnapshots, BASELINE_FILE, CANDIDATES_DIR, META_FILE, MINIMIZED_FILE,
    REPORT_JSON_FILE, REPORT_MD_FILE, TRACE_FILE,
};
use crate::report::{render_markdown, BudgetUsage, DocumentStats, SessionReport};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, ValueEnum};
use promptmin_chunking::Granularity;
use promptmin_core::{
    load_config, sha256_hex, EvalResult, StabilityMode, StabilityPolicy, TargetSelector,
};
use promptmin_eval::{BudgetTracker, DiskCache, Evaluator, TraceLog};
use promptmin_minimize::{ExitCode, ReductionSession, SessionOptions, Strategy};
use promptmin_runners::build_oracle;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    On,
    Off,
}

#[derive(Args, Debug)]
pub struct MinimizeArgs {
    /// Prompt file to minimize
    #[arg(long)]
    pub prompt: PathBuf,
    /// Oracle configuration (JSON)
    #[arg(long)]
    pub config: PathBuf,
    /// Output directory for artifacts
    #[arg(long, default_value = ".promptmin/out")]
    pub out: PathBuf,
    /// suite:any, suite:all or test:<id>
    #[arg(long, default_value = "suite:any")]
    pub target: TargetSelector,
    #[arg(long, default_value_t = 200)]
    pub budget_runs: u64,
    #[arg(long, default_value_t = 20.0)]
    pub max_minutes: f64,
    /// ddmin or greedy
    #[arg(long, default_value = "ddmin")]
    pub strategy: Strategy,
    /// sections, blocks, sentences or lines
    #[arg(long, default_value = "blocks")]
    pub granularity: Granularity,
    /// off, strict or kofn
    #[arg(long, default_value = "off")]
    pub stability_mode: StabilityMode,
    /// Trials per evaluation (default 3 when stability is on)
    #[arg(long)]
    pub stability_n: Option<u32>,
    /// Failing trials required by kofn (default: majority of n)
    #[arg(long)]
    pub stability_k: Option<u32>,
    /// Re-check the result under a strict policy of at least 5 trials
    #[arg(long, default_value_t = false)]
    pub confirm_final: bool,
    #[arg(long, value_enum, default_value = "on")]
    pub cache: CacheMode,
    #[arg(long, default_value = ".promptmin/cache")]
    pub cache_dir: PathBuf,
    /// Do not write trace.jsonl
    #[arg(long, default_value_t = false)]
    pub no_trace_output: bool,
    /// Also write report.json
    #[arg(long, default_value_t = false)]
    pub json: bool,
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Serialize)]
struct MetaPaths {
    prompt: String,
    config: String,
    out: String,
    baseline: String,
    minimized: String,
    candidates: String,
    trace: Option<String>,
    report_md: String,
    report_json: Option<String>,
    diff: Option<String>,
    cache_dir: Option<String>,
}

#[derive(Serialize)]
struct MetaOptions {
    target: String,
    strategy: Strategy,
    granularity: Granularity,
    stability: String,
    budget_runs: u64,
    max_minutes: f64,
    confirm_final: bool,
    cache: CacheMode,
}

#[derive(Serialize)]
struct MetaHashes {
    baseline_sha256: String,
    minimized_sha256: String,
    config_sha256: String,
}

#[derive(Serialize)]
struct MetaFile {
    version: &'static str,
    started_at: String,
    finished_at: String,
    exit_code: u8,
    runs_used: u64,
    candidates_written: u32,
    paths: MetaPaths,
    options: MetaOptions,
    hashes: MetaHashes,
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn max_millis(max_minutes: f64) -> Result<u64> {
    if !max_minutes.is_finite() || max_minutes <= 0.0 {
        bail!("--max-minutes must be a positive number (got {max_minutes})");
    }
    Ok((max_minutes * 60_000.0).round() as u64)
}

/// Runs one minimization and returns the process exit code. Errors are
/// configuration or I/O problems found before or around the session.
pub fn run(args: &MinimizeArgs, command: String) -> Result<u8> {
    let config = load_config(&args.config)?;
    args.target.validate_against(&config.tests)?;
    if args.budget_runs == 0 {
        bail!("--budget-runs must be at least 1");
    }
    let max_millis = max_millis(args.max_minutes)?;
    let stability =
        StabilityPolicy::from_parts(args.stability_mode, args.stability_n, args.stability_k)?;
    let config_raw = fs::read(&args.config)
        .with_context(|| format!("Failed to read config {}", args.config.display()))?;
    let document = fs::read_to_string(&args.prompt)
        .with_context(|| format!("Failed to read prompt {}", args.prompt.display()))?;

    let oracle = match build_oracle(&config.runner) {
        Ok(oracle) => oracle,
        Err(err) => {
            error!(event = "oracle_setup_failed", runner = config.runner.kind(), error = %err);
            eprintln!("promptmin: {err}");
            return Ok(ExitCode::OracleFailure.code());
        }
    };

    let artifacts = Artifacts::create(&args.out)?;
    artifacts.write(BASELINE_FILE, &document)?;
    let trace_log = if args.no_trace_output {
        None
    } else {
        let path = artifacts.path(TRACE_FILE);
        Some(
            TraceLog::create(&path)
                .with_context(|| format!("Failed to create trace {}", path.display()))?,
        )
    };
    let disk_cache = match args.cache {
        CacheMode::On => Some(DiskCache::new(&args.cache_dir)),
        CacheMode::Off => None,
    };

    let budget = BudgetTracker::new(args.budget_runs, max_millis);
    let mut evaluator = Evaluator::new(&*oracle, &config.tests, &args.target, &budget)
        .with_stability(stability);
    if let Some(cache) = &disk_cache {
        evaluator = evaluator.with_cache(cache);
    }
    if let Some(trace) = &trace_log {
        evaluator = evaluator.with_trace(trace);
    }

    let options = SessionOptions {
        strategy: args.strategy,
        granularity: args.granularity,
        preserve: config.prompt.preserve.clone(),
        confirm_final: args.confirm_final,
    };
    let session = ReductionSession::new(&evaluator, options)?;

    info!(
        event = "minimize_start",
        prompt = %args.prompt.display(),
        runner = config.runner.kind(),
        target = %args.target,
        strategy = %args.strategy,
        granularity = %args.granularity,
        stability = %stability,
        budget_runs = args.budget_runs,
        max_millis,
    );
    let started_at = Utc::now().to_rfc3339();
    let mut snapshots = CandidateSnapshots::new(&artifacts);
    let outcome = session.run_with_sink(&document, &mut |candidate: &str, verdict: &EvalResult| {
        snapshots.record(candidate, verdict)
    });
    let finished_at = Utc::now().to_rfc3339();

    artifacts.write(MINIMIZED_FILE, &outcome.minimized_document)?;
    let diff = artifacts.write_diff(BASELINE_FILE, MINIMIZED_FILE);

    let exit_code = outcome.exit_code.code();
    let report = SessionReport {
        command,
        prompt: display(&args.prompt),
        config: display(&args.config),
        runner: config.runner.kind(),
        target: args.target.to_string(),
        strategy: args.strategy,
        granularity: args.granularity,
        stability: stability.to_string(),
        confirmation: args
            .confirm_final
            .then(|| stability.confirmation().to_string()),
        started_at: started_at.clone(),
        finished_at: finished_at.clone(),
        budget: BudgetUsage {
            max_runs: budget.max_runs(),
            max_millis: budget.max_millis(),
            runs_used: budget.runs_used(),
            elapsed_millis: budget.elapsed_millis(),
        },
        baseline: DocumentStats::of(&document),
        minimized: DocumentStats::of(&outcome.minimized_document),
        exit_code,
        outcome: &outcome,
    };
    let report_md = artifacts.write(REPORT_MD_FILE, &render_markdown(&report))?;
    let report_json = if args.json {
        let payload =
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        Some(artifacts.write(REPORT_JSON_FILE, &payload)?)
    } else {
        None
    };

    let meta = MetaFile {
        version: env!("CARGO_PKG_VERSION"),
        started_at,
        finished_at,
        exit_code,
        runs_used: budget.runs_used(),
        candidates_written: snapshots.written(),
        paths: MetaPaths {
            prompt: display(&args.prompt),
            config: display(&args.config),
            out: display(artifacts.root()),
            baseline: display(&artifacts.path(BASELINE_FILE)),
            minimized: display(&artifacts.path(MINIMIZED_FILE)),
            candidates: display(&artifacts.path(CANDIDATES_DIR)),
            trace: trace_log.as_ref().map(|trace| display(trace.path())),
            report_md: display(&report_md),
            report_json: report_json.as_deref().map(display),
            diff: diff.as_deref().map(display),
            cache_dir: disk_cache.as_ref().map(|cache| display(cache.root())),
        },
        options: MetaOptions {
            target: args.target.to_string(),
            strategy: args.strategy,
            granularity: args.granularity,
            stability: stability.to_string(),
            budget_runs: args.budget_runs,
            max_minutes: args.max_minutes,
            confirm_final: args.confirm_final,
            cache: args.cache,
        },
        hashes: MetaHashes {
            baseline_sha256: report.baseline.sha256.clone(),
            minimized_sha256: report.minimized.sha256.clone(),
            config_sha256: sha256_hex(&config_raw),
        },
    };
    let meta_payload = serde_json::to_string_pretty(&meta).context("Failed to serialize meta")?;
    artifacts.write(META_FILE, &meta_payload)?;

    println!(
        "exit {exit_code}: {} -> {} chars, {} runs; report: {}",
        report.baseline.chars,
        report.minimized.chars,
        budget.runs_used(),
        report_md.display()
    );
    if let Some(reason) = &outcome.best_effort_reason {
        println!("best effort: {reason}");
    }
    if let Some(error) = &outcome.error {
        eprintln!("promptmin: {error}");
    }
    Ok(exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_minutes_must_be_positive() {
        assert_eq!(max_millis(20.0).expect("20 minutes"), 1_200_000);
        assert_eq!(max_millis(0.5).expect("half a minute"), 30_000);
        assert!(max_millis(0.0).is_err());
        assert!(max_millis(f64::NAN).is_err());
    }
}
