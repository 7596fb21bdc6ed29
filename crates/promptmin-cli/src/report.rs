use promptmin_chunking::Granularity;
use promptmin_core::{sha256_hex, EvalResult};
use promptmin_minimize::{ExitCode, SessionOutcome, Strategy};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentStats {
    pub chars: usize,
    pub lines: usize,
    pub sha256: String,
}

impl DocumentStats {
    pub fn of(text: &str) -> Self {
        Self {
            chars: text.chars().count(),
            lines: text.lines().count(),
            sha256: sha256_hex(text.as_bytes()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetUsage {
    pub max_runs: u64,
    pub max_millis: u64,
    pub runs_used: u64,
    pub elapsed_millis: u64,
}

/// Everything `report.md` and `report.json` describe about one run.
#[derive(Debug, Serialize)]
pub struct SessionReport<'a> {
    pub command: String,
    pub prompt: String,
    pub config: String,
    pub runner: &'static str,
    pub target: String,
    pub strategy: Strategy,
    pub granularity: Granularity,
    pub stability: String,
    /// Policy of the confirmation pass, when one was requested.
    pub confirmation: Option<String>,
    pub started_at: String,
    pub finished_at: String,
    pub budget: BudgetUsage,
    pub baseline: DocumentStats,
    pub minimized: DocumentStats,
    pub exit_code: u8,
    pub outcome: &'a SessionOutcome,
}

fn exit_summary(exit_code: ExitCode) -> &'static str {
    match exit_code {
        ExitCode::Reduced => "minimized document still fails",
        ExitCode::BaselinePassed => "baseline did not fail; nothing to minimize",
        ExitCode::BestEffort => "stopped early; result is best effort",
        ExitCode::OracleFailure => "oracle error",
    }
}

fn verdict_lines(verdict: Option<&EvalResult>) -> Vec<String> {
    let Some(verdict) = verdict else {
        return vec!["- verdict: not evaluated".to_string()];
    };
    let mut lines = vec![
        format!(
            "- verdict: {}",
            if verdict.is_fail { "FAIL" } else { "PASS" }
        ),
        format!("- oracle runs: {}", verdict.total_runs),
    ];
    for test in &verdict.tests {
        let mut line = format!(
            "- test `{}`: failures={}/{}, {}",
            test.id,
            test.failures,
            test.trials,
            if test.failing { "failing" } else { "passing" }
        );
        if test.cache_hits > 0 {
            line.push_str(&format!(", cache_hits={}", test.cache_hits));
        }
        line.push_str(&format!(": {}", test.reason));
        lines.push(line);
    }
    lines
}

fn reduction_percent(before: usize, after: usize) -> f64 {
    if before == 0 {
        return 0.0;
    }
    (before.saturating_sub(after) as f64 / before as f64) * 100.0
}

pub fn render_markdown(report: &SessionReport<'_>) -> String {
    let outcome = report.outcome;
    let mut lines = vec![
        "# promptmin report".to_string(),
        String::new(),
        "## Command".to_string(),
        String::new(),
        format!("`{}`", report.command),
        String::new(),
        format!("- prompt: `{}`", report.prompt),
        format!("- config: `{}`", report.config),
        format!("- runner: {}", report.runner),
        String::new(),
        "## Baseline".to_string(),
        String::new(),
    ];
    lines.extend(verdict_lines(outcome.baseline_verdict.as_ref()));

    lines.push(String::new());
    lines.push("## Final".to_string());
    lines.push(String::new());
    lines.extend(verdict_lines(outcome.final_verdict.as_ref()));
    if let Some(policy) = &report.confirmation {
        match &outcome.confirmation_verdict {
            Some(verdict) => {
                lines.push(format!(
                    "- confirmation ({policy}): {}",
                    if verdict.is_fail { "FAIL" } else { "PASS" }
                ));
                for test in &verdict.tests {
                    lines.push(format!(
                        "  - test `{}`: failures={}/{}",
                        test.id, test.failures, test.trials
                    ));
                }
            }
            None => lines.push(format!("- confirmation ({policy}): not run")),
        }
    }

    lines.push(String::new());
    lines.push("## Size".to_string());
    lines.push(String::new());
    lines.push(format!(
        "- baseline: {} chars, {} lines",
        report.baseline.chars, report.baseline.lines
    ));
    lines.push(format!(
        "- minimized: {} chars, {} lines",
        report.minimized.chars, report.minimized.lines
    ));
    lines.push(format!(
        "- reduction: {:.1}%",
        reduction_percent(report.baseline.chars, report.minimized.chars)
    ));

    lines.push(String::new());
    lines.push("## Meta".to_string());
    lines.push(String::new());
    lines.push(format!(
        "- exit code: {} ({})",
        report.exit_code,
        exit_summary(outcome.exit_code)
    ));
    lines.push(format!("- strategy: {}", report.strategy));
    lines.push(format!("- granularity: {}", report.granularity));
    lines.push(format!("- target: {}", report.target));
    lines.push(format!("- stability: {}", report.stability));
    lines.push(format!(
        "- runs used: {}/{}",
        report.budget.runs_used, report.budget.max_runs
    ));
    lines.push(format!(
        "- elapsed: {}ms (limit {}ms)",
        report.budget.elapsed_millis, report.budget.max_millis
    ));
    lines.push(format!(
        "- candidates: {} evaluated, {} accepted",
        outcome.candidate_evaluations, outcome.accepted_candidates
    ));
    for stage in &outcome.stages {
        lines.push(format!(
            "- stage `{}`: chunks={} (preserved={}), {} -> {} chars",
            stage.granularity, stage.chunks, stage.preserved, stage.input_chars, stage.output_chars
        ));
    }
    lines.push(format!("- started: {}", report.started_at));
    lines.push(format!("- finished: {}", report.finished_at));

    if outcome.exit_code == ExitCode::BestEffort {
        lines.push(String::new());
        lines.push("## Best-so-far".to_string());
        lines.push(String::new());
        lines.push(format!(
            "- reason: {}",
            outcome.best_effort_reason.as_deref().unwrap_or("unknown")
        ));
        lines.push(
            "- `minimized.prompt` holds the smallest failing document found before stopping."
                .to_string(),
        );
    }

    if let Some(error) = &outcome.error {
        lines.push(String::new());
        lines.push("## Error".to_string());
        lines.push(String::new());
        lines.push("```".to_string());
        lines.push(error.clone());
        lines.push("```".to_string());
    }

    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptmin_core::{FailingTest, TestOutcome};

    fn verdict(failures: u32, trials: u32, is_fail: bool) -> EvalResult {
        EvalResult {
            is_fail,
            failing_tests: if is_fail {
                vec![FailingTest {
                    id: "t1".to_string(),
                    reason: "output contains forbidden text: Yes".to_string(),
                }]
            } else {
                Vec::new()
            },
            total_runs: trials,
            tests: vec![TestOutcome {
                id: "t1".to_string(),
                failing: is_fail,
                failures,
                trials,
                cache_hits: 0,
                reason: "output contains forbidden text: Yes".to_string(),
            }],
        }
    }

    fn report<'a>(outcome: &'a SessionOutcome, stability: &str) -> SessionReport<'a> {
        SessionReport {
            command: "promptmin minimize --prompt p.md --config c.json".to_string(),
            prompt: "p.md".to_string(),
            config: "c.json".to_string(),
            runner: "local_command",
            target: "suite:any".to_string(),
            strategy: Strategy::Ddmin,
            granularity: Granularity::Blocks,
            stability: stability.to_string(),
            confirmation: None,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            finished_at: "2026-01-01T00:00:01Z".to_string(),
            budget: BudgetUsage {
                max_runs: 1,
                max_millis: 60_000,
                runs_used: 1,
                elapsed_millis: 12,
            },
            baseline: DocumentStats::of("A\n\nBAD_TOKEN\n"),
            minimized: DocumentStats::of("A\n\nBAD_TOKEN\n"),
            exit_code: outcome.exit_code.code(),
            outcome,
        }
    }

    fn outcome(exit_code: ExitCode) -> SessionOutcome {
        SessionOutcome {
            minimized_document: "A\n\nBAD_TOKEN\n".to_string(),
            baseline_verdict: Some(verdict(2, 3, true)),
            final_verdict: Some(verdict(2, 3, true)),
            confirmation_verdict: None,
            exit_code,
            best_effort_reason: None,
            error: None,
            reduced: false,
            candidate_evaluations: 0,
            accepted_candidates: 0,
            stages: Vec::new(),
        }
    }

    #[test]
    fn best_effort_report_explains_the_stop() {
        let mut outcome = outcome(ExitCode::BestEffort);
        outcome.best_effort_reason = Some("budget exceeded: maxRuns=1".to_string());
        let markdown = render_markdown(&report(&outcome, "kofn (k=2, n=3)"));

        for heading in ["## Command", "## Baseline", "## Final", "## Size", "## Meta"] {
            assert!(markdown.contains(heading), "missing {heading}");
        }
        assert!(markdown.contains("## Best-so-far"));
        assert!(markdown.contains("- reason: budget exceeded: maxRuns=1"));
        assert!(markdown.contains("test `t1`: failures=2/3"));
        assert!(markdown.contains("- stability: kofn (k=2, n=3)"));
        assert!(markdown.contains("- exit code: 3"));
    }

    #[test]
    fn reduced_report_has_no_best_effort_section() {
        let outcome = outcome(ExitCode::Reduced);
        let markdown = render_markdown(&report(&outcome, "off"));
        assert!(!markdown.contains("## Best-so-far"));
        assert!(!markdown.contains("## Error"));
        assert!(markdown.contains("- reduction: 0.0%"));
    }

    #[test]
    fn oracle_errors_are_quoted() {
        let mut outcome = outcome(ExitCode::OracleFailure);
        outcome.final_verdict = None;
        outcome.error = Some("oracle error: runner exit 1: boom".to_string());
        let markdown = render_markdown(&report(&outcome, "off"));
        assert!(markdown.contains("## Error"));
        assert!(markdown.contains("oracle error: runner exit 1: boom"));
        assert!(markdown.contains("- verdict: not evaluated"));
    }

    #[test]
    fn reduction_percent_handles_empty_baseline() {
        assert_eq!(reduction_percent(0, 0), 0.0);
        assert_eq!(reduction_percent(200, 50), 75.0);
    }
}
