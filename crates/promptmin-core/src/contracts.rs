use crate::config::ConfigError;
use crate::redact::redact_secrets;
use crate::schema::SchemaLite;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MAX_STABILITY_TRIALS: u32 = 1_000;
pub const DEFAULT_STABILITY_TRIALS: u32 = 3;
pub const CONFIRMATION_MIN_TRIALS: u32 = 5;

/// A contiguous span of a document. Concatenating every chunk of one
/// decomposition in order reproduces the source byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub preserve: bool,
}

impl Chunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            preserve: false,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

pub fn join_chunks<'a, I>(chunks: I) -> String
where
    I: IntoIterator<Item = &'a Chunk>,
{
    let mut out = String::new();
    for chunk in chunks {
        out.push_str(&chunk.text);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Assertion {
    Contains { value: String },
    NotContains { value: String },
    RegexMatch { pattern: String },
    RegexNotMatch { pattern: String },
    JsonSchema { schema: SchemaLite },
}

impl Assertion {
    pub fn kind(&self) -> &'static str {
        match self {
            Assertion::Contains { .. } => "contains",
            Assertion::NotContains { .. } => "not_contains",
            Assertion::RegexMatch { .. } => "regex_match",
            Assertion::RegexNotMatch { .. } => "regex_not_match",
            Assertion::JsonSchema { .. } => "json_schema",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSpec {
    pub id: String,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(rename = "assert")]
    pub assertion: Assertion,
}

impl TestSpec {
    /// The user turn sent alongside the prompt: `input.user` when it is a
    /// string, otherwise the whole input rendered as JSON.
    pub fn user_input(&self) -> String {
        match self.input.get("user") {
            Some(Value::String(user)) => user.clone(),
            _ => Value::Object(self.input.clone()).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TargetSelector {
    #[default]
    AnyOfSuite,
    AllOfSuite,
    SingleTest(String),
}

impl TargetSelector {
    pub fn includes(&self, test_id: &str) -> bool {
        match self {
            TargetSelector::SingleTest(id) => id == test_id,
            TargetSelector::AnyOfSuite | TargetSelector::AllOfSuite => true,
        }
    }

    pub fn validate_against(&self, tests: &[TestSpec]) -> Result<(), ConfigError> {
        if let TargetSelector::SingleTest(id) = self {
            if !tests.iter().any(|test| &test.id == id) {
                return Err(ConfigError::Invalid(format!(
                    "target test `{id}` not found in config.tests"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSelector::AnyOfSuite => f.write_str("suite:any"),
            TargetSelector::AllOfSuite => f.write_str("suite:all"),
            TargetSelector::SingleTest(id) => write!(f, "test:{id}"),
        }
    }
}

impl FromStr for TargetSelector {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        match trimmed {
            "" | "suite:any" => Ok(TargetSelector::AnyOfSuite),
            "suite:all" => Ok(TargetSelector::AllOfSuite),
            other => match other.strip_prefix("test:") {
                Some(id) if !id.trim().is_empty() => {
                    Ok(TargetSelector::SingleTest(id.trim().to_string()))
                }
                _ => Err(ConfigError::Invalid(format!("invalid target: {input}"))),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityMode {
    Off,
    Strict,
    KOfN,
}

impl FromStr for StabilityMode {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "off" => Ok(StabilityMode::Off),
            "strict" => Ok(StabilityMode::Strict),
            "kofn" | "k-of-n" | "k_of_n" => Ok(StabilityMode::KOfN),
            other => Err(ConfigError::Invalid(format!(
                "invalid stability mode: {other}"
            ))),
        }
    }
}

/// Rule turning per-trial failure counts into a single verdict.
///
/// `Strict` requires every trial to fail, so a single flaky failure never
/// pulls the reduction toward a candidate that only fails sometimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StabilityPolicy {
    #[default]
    Off,
    Strict {
        trials: u32,
    },
    KOfN {
        trials: u32,
        required: u32,
    },
}

impl StabilityPolicy {
    pub fn strict(trials: u32) -> Result<Self, ConfigError> {
        check_trials(trials)?;
        Ok(StabilityPolicy::Strict { trials })
    }

    pub fn k_of_n(trials: u32, required: u32) -> Result<Self, ConfigError> {
        check_trials(trials)?;
        if required < 1 || required > trials {
            return Err(ConfigError::Invalid(format!(
                "stability k must satisfy 1 <= k <= n (k={required}, n={trials})"
            )));
        }
        Ok(StabilityPolicy::KOfN { trials, required })
    }

    /// Builds a policy from loosely specified parts. Missing `n` defaults to
    /// three trials; a missing `k` defaults to a strict majority of `n`.
    pub fn from_parts(
        mode: StabilityMode,
        trials: Option<u32>,
        required: Option<u32>,
    ) -> Result<Self, ConfigError> {
        match mode {
            StabilityMode::Off => Ok(StabilityPolicy::Off),
            StabilityMode::Strict => Self::strict(trials.unwrap_or(DEFAULT_STABILITY_TRIALS)),
            StabilityMode::KOfN => {
                let trials = trials.unwrap_or(DEFAULT_STABILITY_TRIALS);
                Self::k_of_n(trials, required.unwrap_or(trials / 2 + 1))
            }
        }
    }

    pub fn trial_count(&self) -> u32 {
        match self {
            StabilityPolicy::Off => 1,
            StabilityPolicy::Strict { trials } => *trials,
            StabilityPolicy::KOfN { trials, .. } => *trials,
        }
    }

    pub fn classify(&self, failures: u32) -> bool {
        match self {
            StabilityPolicy::Off => failures >= 1,
            StabilityPolicy::Strict { trials } => failures == *trials,
            StabilityPolicy::KOfN { required, .. } => failures >= *required,
        }
    }

    /// Stricter policy used to double-check a reduced document.
    pub fn confirmation(&self) -> Self {
        StabilityPolicy::Strict {
            trials: self.trial_count().max(CONFIRMATION_MIN_TRIALS),
        }
    }

    pub fn fingerprint(&self) -> Value {
        match self {
            StabilityPolicy::Off => json!({"mode": "off", "n": 1}),
            StabilityPolicy::Strict { trials } => json!({"mode": "strict", "n": trials}),
            StabilityPolicy::KOfN { trials, required } => {
                json!({"mode": "kofn", "n": trials, "k": required})
            }
        }
    }
}

fn check_trials(trials: u32) -> Result<(), ConfigError> {
    if trials < 1 || trials > MAX_STABILITY_TRIALS {
        return Err(ConfigError::Invalid(format!(
            "stability n must be within 1..={MAX_STABILITY_TRIALS} (got {trials})"
        )));
    }
    Ok(())
}

impl fmt::Display for StabilityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StabilityPolicy::Off => f.write_str("off"),
            StabilityPolicy::Strict { trials } => write!(f, "strict (n={trials})"),
            StabilityPolicy::KOfN { trials, required } => {
                write!(f, "kofn (k={required}, n={trials})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailingTest {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub id: String,
    pub failing: bool,
    pub failures: u32,
    pub trials: u32,
    pub cache_hits: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalResult {
    pub is_fail: bool,
    pub failing_tests: Vec<FailingTest>,
    /// Oracle invocations consumed from the budget; cache hits are excluded.
    pub total_runs: u32,
    #[serde(default)]
    pub tests: Vec<TestOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BudgetExceeded {
    #[error("budget exceeded: maxRuns={max_runs}")]
    Runs { max_runs: u64 },
    #[error("budget exceeded: maxMillis={max_millis}")]
    Time { max_millis: u64 },
}

impl BudgetExceeded {
    pub fn kind(&self) -> &'static str {
        match self {
            BudgetExceeded::Runs { .. } => "runs",
            BudgetExceeded::Time { .. } => "time",
        }
    }
}

/// Failure raised by an oracle back-end. The message is redacted of
/// credential-shaped substrings on construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("oracle error: {message}")]
pub struct OracleError {
    pub message: String,
}

impl OracleError {
    pub fn new(message: impl AsRef<str>) -> Self {
        Self {
            message: redact_secrets(message.as_ref()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OracleRequest<'a> {
    pub document: &'a str,
    pub test: &'a TestSpec,
    pub trial_index: u32,
    pub trial_count: u32,
}

/// Pass/fail judge invoked on candidate documents.
pub trait Oracle: Send + Sync {
    /// Stable description of the oracle configuration, folded into cache
    /// fingerprints. Must not contain secrets.
    fn identity(&self) -> Value;

    fn execute(&self, request: &OracleRequest<'_>) -> Result<String, OracleError>;
}

impl<T: Oracle + ?Sized> Oracle for &T {
    fn identity(&self) -> Value {
        (**self).identity()
    }

    fn execute(&self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
        (**self).execute(request)
    }
}

impl<T: Oracle + ?Sized> Oracle for Box<T> {
    fn identity(&self) -> Value {
        (**self).identity()
    }

    fn execute(&self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
        (**self).execute(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stability_classification_follows_policy() {
        let strict = StabilityPolicy::strict(3).expect("strict");
        let kofn = StabilityPolicy::k_of_n(3, 2).expect("kofn");

        assert!(kofn.classify(2));
        assert!(!strict.classify(2));
        assert!(strict.classify(3));
        assert!(!kofn.classify(1));
        assert!(StabilityPolicy::Off.classify(1));
        assert!(!StabilityPolicy::Off.classify(0));
    }

    #[test]
    fn stability_bounds_are_enforced() {
        assert!(StabilityPolicy::k_of_n(3, 4).is_err());
        assert!(StabilityPolicy::k_of_n(3, 0).is_err());
        assert!(StabilityPolicy::strict(0).is_err());
        assert!(StabilityPolicy::strict(MAX_STABILITY_TRIALS + 1).is_err());
        assert!(StabilityPolicy::strict(MAX_STABILITY_TRIALS).is_ok());
    }

    #[test]
    fn stability_parts_fill_defaults() {
        let kofn = StabilityPolicy::from_parts(StabilityMode::KOfN, Some(5), None).expect("kofn");
        assert_eq!(
            kofn,
            StabilityPolicy::KOfN {
                trials: 5,
                required: 3
            }
        );
        assert_eq!(kofn.to_string(), "kofn (k=3, n=5)");

        let strict = StabilityPolicy::from_parts(StabilityMode::Strict, None, Some(1)).expect("s");
        assert_eq!(strict, StabilityPolicy::Strict { trials: 3 });
        assert_eq!(strict.confirmation(), StabilityPolicy::Strict { trials: 5 });
    }

    #[test]
    fn target_selector_parses_and_renders() {
        assert_eq!(
            "suite:any".parse::<TargetSelector>().expect("any"),
            TargetSelector::AnyOfSuite
        );
        assert_eq!(
            "suite:all".parse::<TargetSelector>().expect("all"),
            TargetSelector::AllOfSuite
        );
        let single = "test:refund".parse::<TargetSelector>().expect("single");
        assert_eq!(single, TargetSelector::SingleTest("refund".to_string()));
        assert_eq!(single.to_string(), "test:refund");
        assert!("test:".parse::<TargetSelector>().is_err());
        assert!("suite:some".parse::<TargetSelector>().is_err());
    }

    #[test]
    fn oracle_errors_are_redacted() {
        let err = OracleError::new("401 for key sk-abcdefghijklmnopqrstuvwxyz123456");
        assert!(!err.message.contains("abcdefghijklmnop"));
        assert!(err.to_string().contains("sk-REDACTED"));
    }

    #[test]
    fn user_input_prefers_user_string() {
        let mut input = Map::new();
        input.insert("user".to_string(), Value::String("can I get a refund?".into()));
        let test = TestSpec {
            id: "t1".to_string(),
            input,
            assertion: Assertion::Contains {
                value: "no".to_string(),
            },
        };
        assert_eq!(test.user_input(), "can I get a refund?");

        let mut other = test.clone();
        other.input = Map::new();
        other.input.insert("n".to_string(), json!(1));
        assert_eq!(other.user_input(), "{\"n\":1}");
    }
}
