pub mod budget;
pub mod cache;
pub mod evaluator;
pub mod trace;

pub use budget::BudgetTracker;
pub use cache::{CacheError, DiskCache, MemoryCache, ResultCache};
pub use evaluator::{EvalError, Evaluator};
pub use trace::{CandidateTrace, EvalTrace, MemoryTrace, TraceEvent, TraceLog, TraceSink};
