mod local;
mod openai;
mod retry;

pub use local::LocalCommandOracle;
pub use openai::{extract_output_text, OpenAiResponsesOracle, OpenAiSettings};
pub use retry::{parse_retry_after, run_with_retry, AttemptError, RetryPolicy};

use promptmin_core::{Oracle, OracleError, RunnerConfig};
use std::time::Duration;

/// Builds the oracle adapter described by a validated runner config.
pub fn build_oracle(runner: &RunnerConfig) -> Result<Box<dyn Oracle>, OracleError> {
    match runner {
        RunnerConfig::LocalCommand { command } => {
            Ok(Box::new(LocalCommandOracle::new(command.clone())?))
        }
        RunnerConfig::OpenaiResponses {
            model,
            temperature,
            max_output_tokens,
            timeout_ms,
            base_url,
            api_key_env,
            max_retries,
        } => {
            let settings = OpenAiSettings {
                model: model.clone(),
                temperature: *temperature,
                max_output_tokens: *max_output_tokens,
                timeout: Duration::from_millis(*timeout_ms),
                base_url: base_url.clone(),
                api_key_env: api_key_env.clone(),
                retry: RetryPolicy::default().with_max_retries(*max_retries),
            };
            Ok(Box::new(OpenAiResponsesOracle::new(settings)?))
        }
    }
}
