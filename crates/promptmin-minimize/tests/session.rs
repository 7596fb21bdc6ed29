use promptmin_chunking::Granularity;
use promptmin_core::{
    Assertion, EvalResult, Oracle, OracleError, OracleRequest, PreserveSelector, StabilityPolicy,
    TargetSelector, TestSpec,
};
use promptmin_eval::{BudgetTracker, Evaluator, MemoryCache, MemoryTrace, TraceEvent};
use promptmin_minimize::{ExitCode, ReductionSession, SessionOptions, Strategy};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU32, Ordering};

/// In-process oracle driven by a closure over the request.
struct ScriptOracle<F> {
    script: F,
    calls: AtomicU32,
}

impl<F> ScriptOracle<F>
where
    F: Fn(&OracleRequest<'_>) -> Result<String, OracleError> + Send + Sync,
{
    fn new(script: F) -> Self {
        Self {
            script,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<F> Oracle for ScriptOracle<F>
where
    F: Fn(&OracleRequest<'_>) -> Result<String, OracleError> + Send + Sync,
{
    fn identity(&self) -> Value {
        json!({"type": "script"})
    }

    fn execute(&self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(request)
    }
}

fn keyword_oracle(
    keyword: &'static str,
) -> ScriptOracle<impl Fn(&OracleRequest<'_>) -> Result<String, OracleError> + Send + Sync> {
    ScriptOracle::new(move |request: &OracleRequest<'_>| {
        Ok(if request.document.contains(keyword) {
            "BAD".to_string()
        } else {
            "OK".to_string()
        })
    })
}

fn parity_oracle(
) -> ScriptOracle<impl Fn(&OracleRequest<'_>) -> Result<String, OracleError> + Send + Sync> {
    ScriptOracle::new(|request: &OracleRequest<'_>| {
        let markers = request.document.matches("ODD_TOKEN_").count();
        Ok(if markers % 2 == 1 { "FAIL" } else { "OK" }.to_string())
    })
}

fn suite(forbidden: &str) -> Vec<TestSpec> {
    vec![TestSpec {
        id: "t1".to_string(),
        input: Map::new(),
        assertion: Assertion::NotContains {
            value: forbidden.to_string(),
        },
    }]
}

fn options(strategy: Strategy, granularity: Granularity) -> SessionOptions {
    SessionOptions {
        strategy,
        granularity,
        ..SessionOptions::default()
    }
}

#[test]
fn ddmin_reduces_lines_to_the_failing_one() {
    let oracle = keyword_oracle("BAD");
    let tests = suite("BAD");
    let target = TargetSelector::AnyOfSuite;
    let budget = BudgetTracker::new(200, 60_000);
    let evaluator = Evaluator::new(&oracle, &tests, &target, &budget);
    let session = ReductionSession::new(&evaluator, options(Strategy::Ddmin, Granularity::Lines))
        .expect("session");

    let outcome = session.run("a\nb\nBAD\nc\n");

    assert_eq!(outcome.exit_code, ExitCode::Reduced);
    assert_eq!(outcome.exit_code.code(), 0);
    assert_eq!(outcome.minimized_document, "BAD\n");
    assert!(outcome.reduced);
    assert!(outcome.final_verdict.as_ref().expect("final").is_fail);
    let levels = outcome
        .stages
        .iter()
        .map(|stage| stage.granularity)
        .collect::<Vec<_>>();
    assert_eq!(levels, Granularity::Lines.levels_up_to());
}

#[test]
fn ddmin_beats_greedy_on_parity_interactions() {
    let document = "ODD_TOKEN_A\n\nODD_TOKEN_B\n\nODD_TOKEN_C\n";
    let tests = suite("FAIL");
    let target = TargetSelector::AnyOfSuite;

    let run = |strategy: Strategy| {
        let oracle = parity_oracle();
        let budget = BudgetTracker::new(200, 60_000);
        let evaluator = Evaluator::new(&oracle, &tests, &target, &budget);
        ReductionSession::new(&evaluator, options(strategy, Granularity::Blocks))
            .expect("session")
            .run(document)
    };

    let greedy = run(Strategy::Greedy);
    let ddmin = run(Strategy::Ddmin);

    assert_eq!(greedy.exit_code, ExitCode::Reduced);
    assert_eq!(ddmin.exit_code, ExitCode::Reduced);
    assert_eq!(greedy.minimized_document.matches("ODD_TOKEN_").count(), 3);
    assert!(!greedy.reduced);
    assert_eq!(ddmin.minimized_document.matches("ODD_TOKEN_").count(), 1);
    assert!(ddmin.reduced);
}

#[test]
fn one_run_budget_returns_failing_best_effort() {
    let oracle = keyword_oracle("BAD_TOKEN");
    let tests = suite("BAD");
    let target = TargetSelector::SingleTest("t1".to_string());
    let budget = BudgetTracker::new(1, 60_000);
    let evaluator = Evaluator::new(&oracle, &tests, &target, &budget);
    let document = "A\n\nBAD_TOKEN\n";

    let outcome = ReductionSession::new(&evaluator, options(Strategy::Ddmin, Granularity::Blocks))
        .expect("session")
        .run(document);

    assert_eq!(outcome.exit_code.code(), 3);
    assert_eq!(
        outcome.best_effort_reason.as_deref(),
        Some("budget exceeded: maxRuns=1")
    );
    assert!(!outcome.minimized_document.trim().is_empty());
    assert!(outcome.minimized_document.contains("BAD_TOKEN"));
    assert!(outcome.final_verdict.expect("final").is_fail);
    assert_eq!(oracle.calls(), 1);
}

#[test]
fn passing_baseline_short_circuits() {
    let oracle = keyword_oracle("BAD");
    let tests = suite("BAD");
    let target = TargetSelector::AnyOfSuite;
    let budget = BudgetTracker::new(200, 60_000);
    let evaluator = Evaluator::new(&oracle, &tests, &target, &budget);

    let outcome = ReductionSession::new(&evaluator, SessionOptions::default())
        .expect("session")
        .run("hello\n\nworld\n");

    assert_eq!(outcome.exit_code, ExitCode::BaselinePassed);
    assert_eq!(outcome.exit_code.code(), 2);
    assert_eq!(outcome.candidate_evaluations, 0);
    assert_eq!(oracle.calls(), 1);
    assert_eq!(outcome.minimized_document, "hello\n\nworld\n");
    assert!(outcome.stages.is_empty());
}

#[test]
fn oracle_errors_end_the_session_with_exit_4() {
    let oracle = ScriptOracle::new(|_: &OracleRequest<'_>| {
        Err(OracleError::new("runner exit 1: Traceback"))
    });
    let tests = suite("BAD");
    let target = TargetSelector::AnyOfSuite;
    let budget = BudgetTracker::new(200, 60_000);
    let evaluator = Evaluator::new(&oracle, &tests, &target, &budget);

    let outcome = ReductionSession::new(&evaluator, SessionOptions::default())
        .expect("session")
        .run("x\n");

    assert_eq!(outcome.exit_code.code(), 4);
    assert!(outcome.baseline_verdict.is_none());
    assert_eq!(
        outcome.error.as_deref(),
        Some("oracle error: runner exit 1: Traceback")
    );
}

#[test]
fn oracle_error_mid_reduction_keeps_best_so_far() {
    let oracle = ScriptOracle::new(|request: &OracleRequest<'_>| {
        if !request.document.contains("keep-going") {
            return Err(OracleError::new("runner exit 2: lost context"));
        }
        Ok("BAD".to_string())
    });
    let tests = suite("BAD");
    let target = TargetSelector::AnyOfSuite;
    let budget = BudgetTracker::new(200, 60_000);
    let evaluator = Evaluator::new(&oracle, &tests, &target, &budget);

    let outcome = ReductionSession::new(&evaluator, options(Strategy::Greedy, Granularity::Blocks))
        .expect("session")
        .run("keep-going\n\nfiller\n");

    assert_eq!(outcome.exit_code, ExitCode::OracleFailure);
    assert!(outcome.baseline_verdict.expect("baseline").is_fail);
    assert!(outcome.minimized_document.contains("keep-going"));
}

#[test]
fn stability_kofn_tolerates_one_passing_trial() {
    let oracle = ScriptOracle::new(|request: &OracleRequest<'_>| {
        let failing = request.document.contains("BAD") && request.trial_index < 2;
        Ok(if failing { "BAD" } else { "OK" }.to_string())
    });
    let tests = suite("BAD");
    let target = TargetSelector::AnyOfSuite;
    let budget = BudgetTracker::new(200, 60_000);
    let evaluator = Evaluator::new(&oracle, &tests, &target, &budget)
        .with_stability(StabilityPolicy::k_of_n(3, 2).expect("kofn"));

    let outcome = ReductionSession::new(&evaluator, options(Strategy::Ddmin, Granularity::Blocks))
        .expect("session")
        .run("intro\n\nBAD\n");

    assert_eq!(outcome.exit_code.code(), 0);
    assert_eq!(outcome.minimized_document, "BAD\n");
    let verdict = outcome.final_verdict.expect("final");
    assert_eq!(verdict.tests[0].failures, 2);
    assert_eq!(verdict.tests[0].trials, 3);
}

#[test]
fn confirmation_downgrades_flaky_results() {
    let oracle = ScriptOracle::new(|request: &OracleRequest<'_>| {
        let failing = request.document.contains("BAD") && request.trial_index == 0;
        Ok(if failing { "BAD" } else { "OK" }.to_string())
    });
    let tests = suite("BAD");
    let target = TargetSelector::AnyOfSuite;
    let budget = BudgetTracker::new(200, 60_000);
    let evaluator = Evaluator::new(&oracle, &tests, &target, &budget);
    let mut opts = options(Strategy::Ddmin, Granularity::Blocks);
    opts.confirm_final = true;

    let outcome = ReductionSession::new(&evaluator, opts)
        .expect("session")
        .run("intro\n\nBAD\n");

    assert_eq!(outcome.exit_code, ExitCode::BestEffort);
    let reason = outcome.best_effort_reason.expect("reason");
    assert!(reason.starts_with("confirmation failed"), "{reason}");
    assert!(reason.contains("strict (n=5)"), "{reason}");
    let confirmation = outcome.confirmation_verdict.expect("confirmation");
    assert_eq!(confirmation.tests[0].trials, 5);
    assert_eq!(confirmation.tests[0].failures, 1);
}

#[test]
fn confirmation_reruns_the_oracle_despite_a_warm_cache() {
    let oracle = ScriptOracle::new({
        let served = AtomicU32::new(0);
        move |_request: &OracleRequest<'_>| {
            let call = served.fetch_add(1, Ordering::SeqCst);
            Ok(if call < 5 { "BAD" } else { "OK" }.to_string())
        }
    });
    let tests = suite("BAD");
    let target = TargetSelector::AnyOfSuite;
    let budget = BudgetTracker::new(200, 60_000);
    let cache = MemoryCache::new();
    let evaluator = Evaluator::new(&oracle, &tests, &target, &budget)
        .with_stability(StabilityPolicy::strict(5).expect("strict"))
        .with_cache(&cache);
    let mut opts = options(Strategy::Ddmin, Granularity::Blocks);
    opts.confirm_final = true;

    let outcome = ReductionSession::new(&evaluator, opts)
        .expect("session")
        .run("BAD\n");

    assert_eq!(outcome.exit_code, ExitCode::BestEffort);
    let reason = outcome.best_effort_reason.expect("reason");
    assert!(reason.starts_with("confirmation failed"), "{reason}");
    assert_eq!(oracle.calls(), 10);
    let confirmation = outcome.confirmation_verdict.expect("confirmation");
    assert_eq!(confirmation.tests[0].cache_hits, 0);
    assert_eq!(confirmation.tests[0].failures, 0);
}

#[test]
fn confirmation_agreeing_keeps_exit_0() {
    let oracle = keyword_oracle("BAD");
    let tests = suite("BAD");
    let target = TargetSelector::AnyOfSuite;
    let budget = BudgetTracker::new(200, 60_000);
    let evaluator = Evaluator::new(&oracle, &tests, &target, &budget);
    let mut opts = options(Strategy::Ddmin, Granularity::Blocks);
    opts.confirm_final = true;

    let outcome = ReductionSession::new(&evaluator, opts)
        .expect("session")
        .run("intro\n\nBAD\n");

    assert_eq!(outcome.exit_code, ExitCode::Reduced);
    assert!(outcome.confirmation_verdict.expect("confirmation").is_fail);
}

#[test]
fn preserved_chunks_survive_reduction() {
    let oracle = keyword_oracle("BAD");
    let tests = suite("BAD");
    let target = TargetSelector::AnyOfSuite;
    let budget = BudgetTracker::new(200, 60_000);
    let evaluator = Evaluator::new(&oracle, &tests, &target, &budget);
    let mut opts = options(Strategy::Ddmin, Granularity::Lines);
    opts.preserve = vec![PreserveSelector::Heading {
        value: "Rules".to_string(),
    }];

    let outcome = ReductionSession::new(&evaluator, opts)
        .expect("session")
        .run("# Rules\nIntro line\nKeep me <!-- keep -->\nfiller\nBAD\n");

    assert_eq!(outcome.exit_code, ExitCode::Reduced);
    assert_eq!(
        outcome.minimized_document,
        "# Rules\nKeep me <!-- keep -->\nBAD\n"
    );
}

#[test]
fn accepted_candidates_shrink_and_are_traced() {
    let oracle = keyword_oracle("BAD");
    let tests = suite("BAD");
    let target = TargetSelector::AnyOfSuite;
    let budget = BudgetTracker::new(200, 60_000);
    let trace = MemoryTrace::new();
    let evaluator = Evaluator::new(&oracle, &tests, &target, &budget).with_trace(&trace);
    let session = ReductionSession::new(&evaluator, options(Strategy::Greedy, Granularity::Lines))
        .expect("session");

    let mut snapshots = Vec::new();
    let outcome = session.run_with_sink(
        "one\ntwo\nBAD\nthree\n",
        &mut |document: &str, verdict: &EvalResult| {
            assert!(verdict.is_fail);
            snapshots.push(document.to_string());
        },
    );

    assert_eq!(outcome.minimized_document, "BAD\n");
    assert_eq!(outcome.accepted_candidates as usize, snapshots.len());
    assert!(snapshots.windows(2).all(|pair| pair[1].len() < pair[0].len()));
    assert_eq!(snapshots.last().map(String::as_str), Some("BAD\n"));

    let candidates = trace
        .events()
        .into_iter()
        .filter_map(|event| match event {
            TraceEvent::Candidate(candidate) => Some(candidate),
            TraceEvent::Eval(_) => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(candidates.len() as u32, outcome.candidate_evaluations);
    assert!(candidates
        .iter()
        .all(|candidate| candidate.strategy == "greedy" && candidate.granularity == "lines"));
}

#[test]
fn invalid_preserve_selectors_are_config_errors() {
    let oracle = keyword_oracle("BAD");
    let tests = suite("BAD");
    let target = TargetSelector::AnyOfSuite;
    let budget = BudgetTracker::new(200, 60_000);
    let evaluator = Evaluator::new(&oracle, &tests, &target, &budget);
    let mut opts = SessionOptions::default();
    opts.preserve = vec![PreserveSelector::Regex {
        pattern: "(".to_string(),
    }];

    assert!(ReductionSession::new(&evaluator, opts).is_err());
    assert_eq!(oracle.calls(), 0);
}
