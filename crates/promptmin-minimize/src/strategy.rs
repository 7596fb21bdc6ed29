use crate::ddmin::ddmin_reduce;
use crate::ReduceError;
use promptmin_chunking::Granularity;
use promptmin_core::{sha256_hex, BudgetExceeded, Chunk, ConfigError, EvalResult};
use promptmin_eval::{CandidateTrace, EvalError, Evaluator, TraceEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Ddmin,
    Greedy,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Ddmin => "ddmin",
            Strategy::Greedy => "greedy",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "ddmin" => Ok(Strategy::Ddmin),
            "greedy" => Ok(Strategy::Greedy),
            other => Err(ConfigError::Invalid(format!("invalid strategy: {other}"))),
        }
    }
}

/// Receives every candidate that was accepted as still failing.
pub trait CandidateSink {
    fn accepted(&mut self, document: &str, verdict: &EvalResult);
}

impl<F> CandidateSink for F
where
    F: FnMut(&str, &EvalResult),
{
    fn accepted(&mut self, document: &str, verdict: &EvalResult) {
        self(document, verdict)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StageOutcome {
    Converged,
    BudgetExhausted(BudgetExceeded),
}

/// Evaluates candidates on behalf of a strategy and remembers the smallest
/// failing document seen so far.
pub(crate) struct Probe<'s, 'a> {
    evaluator: &'s Evaluator<'a>,
    sink: &'s mut dyn CandidateSink,
    strategy: Strategy,
    granularity: Granularity,
    best_text: String,
    best_eval: EvalResult,
    evaluations: u32,
    accepted: u32,
}

impl<'s, 'a> Probe<'s, 'a> {
    pub(crate) fn new(
        evaluator: &'s Evaluator<'a>,
        sink: &'s mut dyn CandidateSink,
        strategy: Strategy,
        baseline_text: &str,
        baseline_eval: EvalResult,
    ) -> Self {
        Self {
            evaluator,
            sink,
            strategy,
            granularity: Granularity::default(),
            best_text: baseline_text.to_string(),
            best_eval: baseline_eval,
            evaluations: 0,
            accepted: 0,
        }
    }

    pub(crate) fn set_granularity(&mut self, granularity: Granularity) {
        self.granularity = granularity;
    }

    pub(crate) fn best_text(&self) -> &str {
        &self.best_text
    }

    pub(crate) fn evaluations(&self) -> u32 {
        self.evaluations
    }

    pub(crate) fn accepted(&self) -> u32 {
        self.accepted
    }

    pub(crate) fn into_best(self) -> (String, EvalResult) {
        (self.best_text, self.best_eval)
    }

    /// Whitespace-only candidates count as passing and are never sent to
    /// the oracle.
    fn check(
        &mut self,
        text: &str,
        kept_chunks: usize,
        total_chunks: usize,
        hint: &str,
    ) -> Result<bool, EvalError> {
        if text.trim().is_empty() {
            return Ok(false);
        }
        let eval = self.evaluator.evaluate(text, hint)?;
        self.evaluations += 1;

        if let Some(trace) = self.evaluator.trace() {
            trace.record(&TraceEvent::Candidate(CandidateTrace::new(
                self.strategy.as_str(),
                self.granularity.as_str(),
                kept_chunks,
                total_chunks - kept_chunks,
                sha256_hex(text.as_bytes()),
                eval.is_fail,
            )));
        }

        let is_fail = eval.is_fail;
        if is_fail && text.len() < self.best_text.len() {
            self.accepted += 1;
            self.sink.accepted(text, &eval);
            self.best_text = text.to_string();
            self.best_eval = eval;
        }
        Ok(is_fail)
    }
}

fn assemble(chunks: &[Chunk], keep: &[bool]) -> String {
    chunks
        .iter()
        .zip(keep)
        .filter(|(chunk, kept)| chunk.preserve || **kept)
        .map(|(chunk, _)| chunk.text.as_str())
        .collect()
}

fn settle(result: Result<(), EvalError>) -> Result<StageOutcome, ReduceError> {
    match result {
        Ok(()) => Ok(StageOutcome::Converged),
        Err(EvalError::Budget(exceeded)) => Ok(StageOutcome::BudgetExhausted(exceeded)),
        Err(EvalError::Oracle(err)) => Err(ReduceError::Oracle(err)),
    }
}

/// One ddmin pass over the removable chunks of a decomposition.
pub(crate) fn ddmin_stage(
    chunks: &[Chunk],
    probe: &mut Probe<'_, '_>,
) -> Result<StageOutcome, ReduceError> {
    let removable = chunks
        .iter()
        .enumerate()
        .filter(|(_, chunk)| !chunk.preserve)
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();
    let preserved = chunks.len() - removable.len();
    let min_size = if preserved > 0 { 0 } else { 1 };
    let granularity = probe.granularity;
    debug!(
        event = "ddmin_stage",
        granularity = %granularity,
        chunks = chunks.len(),
        removable = removable.len(),
    );

    let result = ddmin_reduce(removable, min_size, |kept: &[usize]| {
        let mut keep = vec![false; chunks.len()];
        for idx in kept {
            keep[*idx] = true;
        }
        let text = assemble(chunks, &keep);
        let hint = format!("ddmin:{granularity}:chunks={}", kept.len() + preserved);
        probe.check(&text, kept.len() + preserved, chunks.len(), &hint)
    });
    settle(result.map(|_| ()))
}

/// Greedy one-at-a-time elimination, sweeping until a full pass removes
/// nothing.
pub(crate) fn greedy_stage(
    chunks: &[Chunk],
    probe: &mut Probe<'_, '_>,
) -> Result<StageOutcome, ReduceError> {
    let mut keep = vec![true; chunks.len()];
    debug!(
        event = "greedy_stage",
        granularity = %probe.granularity,
        chunks = chunks.len(),
    );
    loop {
        match greedy_sweep(chunks, &mut keep, probe) {
            Ok(true) => continue,
            Ok(false) => return settle(Ok(())),
            Err(err) => return settle(Err(err)),
        }
    }
}

/// One pass in document order. Returns whether any chunk was dropped.
fn greedy_sweep(
    chunks: &[Chunk],
    keep: &mut [bool],
    probe: &mut Probe<'_, '_>,
) -> Result<bool, EvalError> {
    let mut changed = false;
    for idx in 0..chunks.len() {
        if !keep[idx] || chunks[idx].preserve {
            continue;
        }
        keep[idx] = false;
        let text = assemble(chunks, keep);
        let kept = keep.iter().filter(|kept| **kept).count();
        let hint = format!("drop:{}", chunks[idx].id);
        if probe.check(&text, kept, chunks.len(), &hint)? {
            changed = true;
            debug!(event = "greedy_drop", chunk = %chunks[idx].id);
        } else {
            keep[idx] = true;
        }
    }
    Ok(changed)
}
