use promptmin_core::BudgetExceeded;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Run and wall-clock quota shared by every oracle call of one session.
///
/// `consume` is the only mutation; the clock check and the counter update
/// happen under one lock so concurrent callers can never overshoot.
#[derive(Debug)]
pub struct BudgetTracker {
    max_runs: u64,
    max_millis: u64,
    started_at: Instant,
    runs_used: Mutex<u64>,
}

impl BudgetTracker {
    pub fn new(max_runs: u64, max_millis: u64) -> Self {
        Self::starting_at(max_runs, max_millis, Instant::now())
    }

    pub fn starting_at(max_runs: u64, max_millis: u64, started_at: Instant) -> Self {
        Self {
            max_runs,
            max_millis,
            started_at,
            runs_used: Mutex::new(0),
        }
    }

    /// Reserves one oracle run. Must be called before the run starts.
    pub fn consume(&self) -> Result<(), BudgetExceeded> {
        let mut used = self.runs_used.lock().unwrap_or_else(PoisonError::into_inner);
        if self.started_at.elapsed() > Duration::from_millis(self.max_millis) {
            return Err(BudgetExceeded::Time {
                max_millis: self.max_millis,
            });
        }
        if used.saturating_add(1) > self.max_runs {
            return Err(BudgetExceeded::Runs {
                max_runs: self.max_runs,
            });
        }
        *used += 1;
        Ok(())
    }

    pub fn runs_used(&self) -> u64 {
        *self.runs_used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_runs(&self) -> u64 {
        self.max_runs
    }

    pub fn max_millis(&self) -> u64 {
        self.max_millis
    }

    pub fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
