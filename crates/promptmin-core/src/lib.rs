pub mod assertions;
pub mod config;
pub mod contracts;
pub mod digest;
pub mod redact;
pub mod roles;
pub mod schema;

pub use assertions::{assert_output, AssertionOutcome};
pub use config::{load_config, ConfigError, PreserveSelector, PromptConfig, PromptminConfig, RunnerConfig};
pub use contracts::{
    join_chunks, Assertion, BudgetExceeded, Chunk, EvalResult, FailingTest, Oracle, OracleError,
    OracleRequest, StabilityMode, StabilityPolicy, TargetSelector, TestOutcome, TestSpec,
};
pub use digest::{canonical_hash, canonical_json, sha256_hex, short_hash};
pub use redact::redact_secrets;
pub use roles::{extract_prompt_messages, PromptMessage, PromptMessages, PromptRole};
pub use schema::SchemaLite;
