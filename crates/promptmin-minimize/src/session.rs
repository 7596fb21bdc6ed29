use crate::strategy::{ddmin_stage, greedy_stage, CandidateSink, Probe, StageOutcome, Strategy};
use crate::ReduceError;
use promptmin_chunking::{Chunker, Granularity};
use promptmin_core::{EvalResult, PreserveSelector, StabilityPolicy};
use promptmin_eval::{EvalError, Evaluator};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Process exit status of a reduction session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCode {
    /// The final document still fails.
    Reduced,
    /// The baseline did not fail; nothing to reduce.
    BaselinePassed,
    /// Budget ran out or confirmation disagreed; the result is best effort.
    BestEffort,
    OracleFailure,
}

impl ExitCode {
    pub fn code(self) -> u8 {
        match self {
            ExitCode::Reduced => 0,
            ExitCode::BaselinePassed => 2,
            ExitCode::BestEffort => 3,
            ExitCode::OracleFailure => 4,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub strategy: Strategy,
    pub granularity: Granularity,
    pub preserve: Vec<PreserveSelector>,
    pub confirm_final: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::Ddmin,
            granularity: Granularity::Blocks,
            preserve: Vec::new(),
            confirm_final: false,
        }
    }
}

/// Chunk counts of one reduction stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub granularity: Granularity,
    pub chunks: usize,
    pub preserved: usize,
    pub input_chars: usize,
    pub output_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionOutcome {
    pub minimized_document: String,
    pub baseline_verdict: Option<EvalResult>,
    pub final_verdict: Option<EvalResult>,
    pub confirmation_verdict: Option<EvalResult>,
    pub exit_code: ExitCode,
    pub best_effort_reason: Option<String>,
    pub error: Option<String>,
    /// Whether the minimized document is strictly smaller than the baseline.
    pub reduced: bool,
    pub candidate_evaluations: u32,
    pub accepted_candidates: u32,
    pub stages: Vec<StageReport>,
}

impl SessionOutcome {
    fn unreduced(document: &str, exit_code: ExitCode) -> Self {
        Self {
            minimized_document: document.to_string(),
            baseline_verdict: None,
            final_verdict: None,
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
}

/// Baseline check, reduction, and optional confirmation of one document.
///
/// Budget exhaustion anywhere ends the session with the smallest failing
/// document found so far; an oracle error ends it with exit code 4.
pub struct ReductionSession<'s, 'a> {
    evaluator: &'s Evaluator<'a>,
    chunker: Chunker,
    options: SessionOptions,
}

impl<'s, 'a> ReductionSession<'s, 'a> {
    pub fn new(evaluator: &'s Evaluator<'a>, options: SessionOptions) -> Result<Self, ReduceError> {
        let chunker = Chunker::new(&options.preserve)?;
        Ok(Self {
            evaluator,
            chunker,
            options,
        })
    }

    pub fn run(&self, document: &str) -> SessionOutcome {
        self.run_with_sink(document, &mut |_: &str, _: &EvalResult| {})
    }

    pub fn run_with_sink(&self, document: &str, sink: &mut dyn CandidateSink) -> SessionOutcome {
        let baseline = match self.evaluator.evaluate(document, "baseline") {
            Ok(baseline) => baseline,
            Err(EvalError::Budget(exceeded)) => {
                warn!(event = "baseline_budget_exceeded", reason = %exceeded);
                let mut outcome = SessionOutcome::unreduced(document, ExitCode::BestEffort);
                outcome.best_effort_reason = Some(exceeded.to_string());
                return outcome;
            }
            Err(EvalError::Oracle(err)) => {
                warn!(event = "baseline_oracle_error", error = %err);
                let mut outcome = SessionOutcome::unreduced(document, ExitCode::OracleFailure);
                outcome.error = Some(err.to_string());
                return outcome;
            }
        };

        info!(
            event = "baseline_evaluated",
            is_fail = baseline.is_fail,
            runs = baseline.total_runs,
            failing = baseline.failing_tests.len(),
        );
        if !baseline.is_fail {
            let mut outcome = SessionOutcome::unreduced(document, ExitCode::BaselinePassed);
            outcome.final_verdict = Some(baseline.clone());
            outcome.baseline_verdict = Some(baseline);
            return outcome;
        }

        let mut probe = Probe::new(
            self.evaluator,
            sink,
            self.options.strategy,
            document,
            baseline.clone(),
        );
        let mut stages = Vec::new();
        let reduction = self.reduce(&mut probe, &mut stages);
        let candidate_evaluations = probe.evaluations();
        let accepted_candidates = probe.accepted();
        let (minimized, final_verdict) = probe.into_best();

        let mut outcome = SessionOutcome {
            reduced: minimized.len() < document.len(),
            minimized_document: minimized,
            baseline_verdict: Some(baseline),
            final_verdict: Some(final_verdict),
            confirmation_verdict: None,
            exit_code: ExitCode::Reduced,
            best_effort_reason: None,
            error: None,
            candidate_evaluations,
            accepted_candidates,
            stages,
        };

        match reduction {
            Err(err) => {
                warn!(event = "reduction_oracle_error", error = %err);
                outcome.exit_code = ExitCode::OracleFailure;
                outcome.error = Some(err.to_string());
                return outcome;
            }
            Ok(StageOutcome::BudgetExhausted(exceeded)) => {
                info!(event = "budget_exhausted", reason = %exceeded);
                outcome.exit_code = ExitCode::BestEffort;
                outcome.best_effort_reason = Some(exceeded.to_string());
                return outcome;
            }
            Ok(StageOutcome::Converged) => {}
        }

        if self.options.confirm_final {
            self.confirm(&mut outcome);
        }
        info!(
            event = "session_done",
            exit_code = outcome.exit_code.code(),
            baseline_chars = document.len(),
            minimized_chars = outcome.minimized_document.len(),
            candidates = outcome.candidate_evaluations,
        );
        outcome
    }

    fn reduce(
        &self,
        probe: &mut Probe<'_, '_>,
        stages: &mut Vec<StageReport>,
    ) -> Result<StageOutcome, ReduceError> {
        let levels = match self.options.strategy {
            Strategy::Ddmin => self.options.granularity.levels_up_to(),
            Strategy::Greedy => vec![self.options.granularity],
        };

        for level in levels {
            let input = probe.best_text().to_string();
            let chunks = self.chunker.chunk(&input, level);
            probe.set_granularity(level);
            let outcome = match self.options.strategy {
                Strategy::Ddmin => ddmin_stage(&chunks, probe)?,
                Strategy::Greedy => greedy_stage(&chunks, probe)?,
            };
            stages.push(StageReport {
                granularity: level,
                chunks: chunks.len(),
                preserved: chunks.iter().filter(|chunk| chunk.preserve).count(),
                input_chars: input.len(),
                output_chars: probe.best_text().len(),
            });
            info!(
                event = "stage_done",
                strategy = %self.options.strategy,
                granularity = %level,
                chunks = chunks.len(),
                input_chars = input.len(),
                output_chars = probe.best_text().len(),
            );
            if let StageOutcome::BudgetExhausted(_) = outcome {
                return Ok(outcome);
            }
        }
        Ok(StageOutcome::Converged)
    }

    /// Re-checks the minimized document under a strict policy of at least
    /// five trials and downgrades the outcome when it no longer fails.
    fn confirm(&self, outcome: &mut SessionOutcome) {
        let policy: StabilityPolicy = self.evaluator.stability().confirmation();
        // Confirmation trials always reach the oracle.
        let confirmer = self
            .evaluator
            .clone()
            .with_stability(policy)
            .without_cache();
        match confirmer.evaluate(&outcome.minimized_document, "confirm") {
            Ok(verdict) => {
                if !verdict.is_fail {
                    outcome.exit_code = ExitCode::BestEffort;
                    outcome.best_effort_reason = Some(format!(
                        "confirmation failed: minimized document did not fail under {policy}"
                    ));
                }
                outcome.confirmation_verdict = Some(verdict);
            }
            Err(EvalError::Budget(exceeded)) => {
                outcome.exit_code = ExitCode::BestEffort;
                outcome.best_effort_reason = Some(format!("confirmation failed: {exceeded}"));
            }
            Err(EvalError::Oracle(err)) => {
                outcome.exit_code = ExitCode::OracleFailure;
                outcome.error = Some(err.to_string());
            }
        }
    }
}
