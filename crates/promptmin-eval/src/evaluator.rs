use crate::budget::BudgetTracker;
use crate::cache::ResultCache;
use crate::trace::{now_rfc3339, EvalTrace, TraceEvent, TraceSink};
use promptmin_core::{
    assert_output, canonical_hash, sha256_hex, AssertionOutcome, BudgetExceeded, EvalResult,
    FailingTest, Oracle, OracleError, OracleRequest, StabilityPolicy, TargetSelector, TestOutcome,
    TestSpec,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

const PROMPT_HINT_CHARS: usize = 80;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Budget(#[from] BudgetExceeded),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Runs the test suite against candidate documents and folds per-trial
/// assertion results into one verdict.
///
/// The evaluator only borrows its collaborators. The budget is mutated
/// through `BudgetTracker::consume`, the cache through `get`/`put`, and
/// nothing else is shared between calls.
#[derive(Clone)]
pub struct Evaluator<'a> {
    oracle: &'a dyn Oracle,
    oracle_identity: Value,
    tests: &'a [TestSpec],
    target: &'a TargetSelector,
    stability: StabilityPolicy,
    budget: &'a BudgetTracker,
    cache: Option<&'a dyn ResultCache>,
    trace: Option<&'a dyn TraceSink>,
}

struct TrialTally {
    outcome: TestOutcome,
    runs: u32,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        oracle: &'a dyn Oracle,
        tests: &'a [TestSpec],
        target: &'a TargetSelector,
        budget: &'a BudgetTracker,
    ) -> Self {
        Self {
            oracle_identity: oracle.identity(),
            oracle,
            tests,
            target,
            stability: StabilityPolicy::Off,
            budget,
            cache: None,
            trace: None,
        }
    }

    pub fn with_stability(mut self, stability: StabilityPolicy) -> Self {
        self.stability = stability;
        self
    }

    pub fn with_cache(mut self, cache: &'a dyn ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Drops the cache so every trial reaches the oracle.
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn with_trace(mut self, trace: &'a dyn TraceSink) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn stability(&self) -> StabilityPolicy {
        self.stability
    }

    pub fn target(&self) -> &TargetSelector {
        self.target
    }

    pub fn budget(&self) -> &BudgetTracker {
        self.budget
    }

    pub fn trace(&self) -> Option<&'a dyn TraceSink> {
        self.trace
    }

    /// Evaluates `document` against every selected test. `hint` is a short
    /// label recorded in the trace next to the document hash.
    pub fn evaluate(&self, document: &str, hint: &str) -> Result<EvalResult, EvalError> {
        let prompt_hash = sha256_hex(document.as_bytes());
        let mut result = EvalResult::default();

        for test in self
            .tests
            .iter()
            .filter(|test| self.target.includes(&test.id))
        {
            let tally = self.evaluate_test(document, &prompt_hash, test)?;
            result.total_runs += tally.runs;
            let outcome = tally.outcome;
            self.record(&outcome, &prompt_hash, hint);

            let failing = outcome.failing;
            if failing {
                result.failing_tests.push(FailingTest {
                    id: outcome.id.clone(),
                    reason: outcome.reason.clone(),
                });
            }
            result.tests.push(outcome);

            match self.target {
                TargetSelector::AnyOfSuite if failing => break,
                TargetSelector::AllOfSuite if !failing => break,
                _ => {}
            }
        }

        result.is_fail = match self.target {
            TargetSelector::AllOfSuite => {
                !result.tests.is_empty() && result.tests.iter().all(|test| test.failing)
            }
            TargetSelector::AnyOfSuite | TargetSelector::SingleTest(_) => {
                !result.failing_tests.is_empty()
            }
        };

        debug!(
            event = "evaluated",
            prompt_hash = %short(&prompt_hash),
            hint = hint,
            is_fail = result.is_fail,
            runs = result.total_runs,
            failing = result.failing_tests.len(),
        );
        Ok(result)
    }

    fn evaluate_test(
        &self,
        document: &str,
        prompt_hash: &str,
        test: &TestSpec,
    ) -> Result<TrialTally, EvalError> {
        let trial_count = self.stability.trial_count();
        let mut failures = 0u32;
        let mut cache_hits = 0u32;
        let mut runs = 0u32;
        let mut first_reason: Option<String> = None;

        for trial_index in 0..trial_count {
            let key = self.cache.and_then(|_| self.fingerprint(prompt_hash, test, trial_index));
            let cached = match (self.cache, key.as_deref()) {
                (Some(cache), Some(key)) => cache.get(key),
                _ => None,
            };

            let output = match cached {
                Some(output) => {
                    cache_hits += 1;
                    output
                }
                None => {
                    self.budget.consume()?;
                    runs += 1;
                    let output = self.oracle.execute(&OracleRequest {
                        document,
                        test,
                        trial_index,
                        trial_count,
                    })?;
                    if let (Some(cache), Some(key)) = (self.cache, key.as_deref()) {
                        cache.put(key, &output);
                    }
                    output
                }
            };

            if let AssertionOutcome::Failed(reason) = assert_output(&output, &test.assertion) {
                failures += 1;
                first_reason.get_or_insert(reason);
            }
        }

        let failing = self.stability.classify(failures);
        let reason = match first_reason {
            Some(reason) if failing => reason,
            Some(reason) => format!(
                "{reason} (failures={failures}/{trial_count}, not classified failing)"
            ),
            None => "ok".to_string(),
        };

        Ok(TrialTally {
            outcome: TestOutcome {
                id: test.id.clone(),
                failing,
                failures,
                trials: trial_count,
                cache_hits,
                reason,
            },
            runs,
        })
    }

    /// Cache key of one trial. Includes everything that can change the raw
    /// oracle output or how it is judged.
    fn fingerprint(&self, prompt_hash: &str, test: &TestSpec, trial_index: u32) -> Option<String> {
        let material = json!({
            "oracle": self.oracle_identity,
            "prompt_hash": prompt_hash,
            "test_id": test.id,
            "input": test.input,
            "assert": test.assertion,
            "stability": self.stability.fingerprint(),
            "trial_index": trial_index,
        });
        match canonical_hash(&material) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(event = "fingerprint_failed", test_id = %test.id, error = %err);
                None
            }
        }
    }

    fn record(&self, outcome: &TestOutcome, prompt_hash: &str, hint: &str) {
        let Some(trace) = self.trace else {
            return;
        };
        trace.record(&TraceEvent::Eval(EvalTrace {
            at: now_rfc3339(),
            prompt_hash: prompt_hash.to_string(),
            prompt_hint: hint.chars().take(PROMPT_HINT_CHARS).collect(),
            test_id: outcome.id.clone(),
            ok: !outcome.failing,
            failures: outcome.failures,
            trials: outcome.trials,
            cache_hit: outcome.trials > 0 && outcome.cache_hits == outcome.trials,
            cache_hits: outcome.cache_hits,
            reason: outcome.reason.clone(),
        }));
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
