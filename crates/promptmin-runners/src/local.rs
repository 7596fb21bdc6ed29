use promptmin_core::{Oracle, OracleError, OracleRequest};
use serde_json::{json, Value};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

/// Runs a configured command once per trial. The candidate document is
/// handed over in a temp file (`PROMPT_FILE`) and inline (`PROMPT_TEXT`);
/// exit status 0 means stdout is the oracle output.
#[derive(Debug, Clone)]
pub struct LocalCommandOracle {
    program: String,
    args: Vec<String>,
}

impl LocalCommandOracle {
    pub fn new(command: Vec<String>) -> Result<Self, OracleError> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .filter(|program| !program.trim().is_empty())
            .ok_or_else(|| OracleError::new("runner.command empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl Oracle for LocalCommandOracle {
    fn identity(&self) -> Value {
        let mut command = vec![self.program.clone()];
        command.extend(self.args.iter().cloned());
        json!({"type": "local_command", "command": command})
    }

    fn execute(&self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
        let mut prompt_file = tempfile::Builder::new()
            .prefix("promptmin-")
            .suffix(".prompt")
            .tempfile()
            .map_err(|err| OracleError::new(format!("failed to create prompt file: {err}")))?;
        prompt_file
            .write_all(request.document.as_bytes())
            .and_then(|()| prompt_file.flush())
            .map_err(|err| OracleError::new(format!("failed to write prompt file: {err}")))?;
        let test_json = serde_json::to_string(request.test)
            .map_err(|err| OracleError::new(format!("failed to serialize test: {err}")))?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .env("PROMPT_FILE", prompt_file.path())
            .env("PROMPT_TEXT", request.document)
            .env("TEST_JSON", test_json)
            .env("TEST_ID", &request.test.id)
            .env("PROMPTMIN_TRIAL_INDEX", request.trial_index.to_string())
            .env("PROMPTMIN_TRIAL_COUNT", request.trial_count.to_string())
            .output()
            .map_err(|err| {
                OracleError::new(format!("failed to spawn runner {}: {err}", self.program))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(
            event = "runner_exit",
            test_id = %request.test.id,
            trial = request.trial_index,
            status = %output.status,
        );
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.is_empty() {
            stdout.as_str()
        } else {
            &*stderr
        };
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        Err(OracleError::new(format!("runner exit {code}: {detail}")))
    }
}
