mod ddmin;
mod session;
mod strategy;

pub use ddmin::ddmin_reduce;
pub use session::{ExitCode, ReductionSession, SessionOptions, SessionOutcome, StageReport};
pub use strategy::{CandidateSink, Strategy};

use promptmin_core::{ConfigError, OracleError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}
