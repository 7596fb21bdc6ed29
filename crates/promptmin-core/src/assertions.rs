use crate::contracts::Assertion;
use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssertionOutcome {
    Passed,
    Failed(String),
}

impl AssertionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, AssertionOutcome::Failed(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            AssertionOutcome::Passed => "ok",
            AssertionOutcome::Failed(reason) => reason,
        }
    }
}

/// Applies one assertion to raw oracle output. Regex patterns run in
/// multi-line mode so `^`/`$` anchor on line boundaries.
pub fn assert_output(output: &str, assertion: &Assertion) -> AssertionOutcome {
    match assertion {
        Assertion::Contains { value } => {
            if output.contains(value.as_str()) {
                AssertionOutcome::Passed
            } else {
                AssertionOutcome::Failed(format!("expected contains: {value}"))
            }
        }
        Assertion::NotContains { value } => {
            if output.contains(value.as_str()) {
                AssertionOutcome::Failed(format!("expected not_contains: {value}"))
            } else {
                AssertionOutcome::Passed
            }
        }
        Assertion::RegexMatch { pattern } => match multiline_regex(pattern) {
            Ok(regex) if regex.is_match(output) => AssertionOutcome::Passed,
            Ok(_) => AssertionOutcome::Failed(format!("expected regex_match: {pattern}")),
            Err(reason) => AssertionOutcome::Failed(reason),
        },
        Assertion::RegexNotMatch { pattern } => match multiline_regex(pattern) {
            Ok(regex) if regex.is_match(output) => {
                AssertionOutcome::Failed(format!("expected regex_not_match: {pattern}"))
            }
            Ok(_) => AssertionOutcome::Passed,
            Err(reason) => AssertionOutcome::Failed(reason),
        },
        Assertion::JsonSchema { schema } => {
            let Ok(value) = serde_json::from_str::<Value>(output.trim()) else {
                return AssertionOutcome::Failed("output not valid JSON".to_string());
            };
            match schema.validate(&value) {
                Ok(()) => AssertionOutcome::Passed,
                Err(reason) => AssertionOutcome::Failed(format!("json_schema: {reason}")),
            }
        }
    }
}

pub(crate) fn multiline_regex(pattern: &str) -> Result<Regex, String> {
    Regex::new(&format!("(?m){pattern}")).map_err(|err| format!("invalid regex {pattern}: {err}"))
}
