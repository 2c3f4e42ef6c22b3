use std::future::Future;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};

use crate::error::{Error, Result};
use crate::options::RequestOptions;

/// The timer that ended a Transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    Resolve,
    Read,
    Total,
}

/// Outcome of a phase bounded by its own budget and the total budget
#[derive(Debug)]
pub enum Bounded<T> {
    Done(T),
    /// The phase budget ran out while the total budget still had time left
    PhaseElapsed,
}

/// Timers of one Transaction
///
/// The total deadline is fixed when the Transaction starts. Phase timers
/// (resolve, read, connect) start when the phase does and are clamped to the
/// total deadline; when both would fire at the same instant the total timer
/// wins.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    started: Instant,
    total: Instant,
    total_budget: Duration,
    resolve_budget: Duration,
    read_budget: Duration,
}

impl Deadlines {
    /// Start the total timer now
    pub fn start(options: &RequestOptions) -> Self {
        let started = Instant::now();
        Self {
            started,
            total: started + options.total_timeout,
            total_budget: options.total_timeout,
            resolve_budget: options.resolve_timeout,
            read_budget: options.read_timeout,
        }
    }

    /// Time since the Transaction started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Instant at which the total budget is spent
    pub fn total_deadline(&self) -> Instant {
        self.total
    }

    /// Budget configured for `kind`
    pub fn budget(&self, kind: TimeoutKind) -> Duration {
        match kind {
            TimeoutKind::Resolve => self.resolve_budget,
            TimeoutKind::Read => self.read_budget,
            TimeoutKind::Total => self.total_budget,
        }
    }

    /// Deadline for a phase starting now, and the timer that owns it
    pub fn deadline_for(&self, kind: TimeoutKind) -> (Instant, TimeoutKind) {
        match kind {
            TimeoutKind::Total => (self.total, TimeoutKind::Total),
            phase => match self.clamp(self.budget(phase)) {
                Some(deadline) => (deadline, phase),
                None => (self.total, TimeoutKind::Total),
            },
        }
    }

    /// Run `fut` under the timer for `kind`
    pub async fn run<F, T>(&self, kind: TimeoutKind, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let (deadline, owner) = self.deadline_for(kind);
        match timeout_at(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(owner, self.budget(owner))),
        }
    }

    /// Run `fut` under an ad-hoc phase budget and the total budget
    pub async fn bounded<F, T>(&self, budget: Duration, fut: F) -> Result<Bounded<T>>
    where
        F: Future<Output = T>,
    {
        match self.clamp(budget) {
            Some(deadline) => match timeout_at(deadline, fut).await {
                Ok(value) => Ok(Bounded::Done(value)),
                Err(_) => Ok(Bounded::PhaseElapsed),
            },
            None => match timeout_at(self.total, fut).await {
                Ok(value) => Ok(Bounded::Done(value)),
                Err(_) => Err(Error::timeout(TimeoutKind::Total, self.total_budget)),
            },
        }
    }

    /// Phase deadline, or `None` when the total deadline comes first or at the same time
    fn clamp(&self, budget: Duration) -> Option<Instant> {
        let phase = Instant::now() + budget;
        if phase >= self.total {
            None
        } else {
            Some(phase)
        }
    }
}
