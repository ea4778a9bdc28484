//! Round timers.
//!
//! Timers are plain bookkeeping; nothing fires on its own. The consensus
//! loop polls [`Timers::expired`] on every tick.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// Kinds of round timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeoutType {
    /// Waits for the first committed block after startup.
    Bootstrap,
    /// Waits for the next committed block in steady state.
    Consensus,
    /// Waits for a view change to complete.
    ViewChange,
}

impl std::fmt::Display for TimeoutType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutType::Bootstrap => write!(f, "bootstrap"),
            TimeoutType::Consensus => write!(f, "consensus"),
            TimeoutType::ViewChange => write!(f, "view_change"),
        }
    }
}

/// A restartable deadline.
#[derive(Debug, Clone)]
pub struct Timeout {
    duration: Duration,
    started_at: Option<Instant>,
}

impl Timeout {
    /// Creates a stopped timer.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            started_at: None,
        }
    }

    /// Starts or restarts the timer from now.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Stops the timer. Stopping a stopped timer is a no-op.
    pub fn stop(&mut self) {
        self.started_at = None;
    }

    /// Returns true if the timer is running.
    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    /// Returns true if the timer ran past its deadline at `now`. An expired
    /// timer stops itself so it reports once.
    pub fn check_expire(&mut self, now: Instant) -> bool {
        match self.started_at {
            Some(start) if now.saturating_duration_since(start) >= self.duration => {
                self.started_at = None;
                true
            }
            _ => false,
        }
    }

    /// Returns the configured duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Changes the duration without restarting.
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }
}

/// The set of round timers.
#[derive(Debug, Clone)]
pub struct Timers {
    timers: BTreeMap<TimeoutType, Timeout>,
}

impl Timers {
    /// Creates stopped timers with the given durations.
    pub fn new(bootstrap: Duration, consensus: Duration, view_change: Duration) -> Self {
        let mut timers = BTreeMap::new();
        timers.insert(TimeoutType::Bootstrap, Timeout::new(bootstrap));
        timers.insert(TimeoutType::Consensus, Timeout::new(consensus));
        timers.insert(TimeoutType::ViewChange, Timeout::new(view_change));
        Self { timers }
    }

    /// Returns the timer of kind `kind`.
    pub fn get(&self, kind: TimeoutType) -> &Timeout {
        &self.timers[&kind]
    }

    /// Returns the timer of kind `kind` mutably.
    pub fn get_mut(&mut self, kind: TimeoutType) -> &mut Timeout {
        self.timers
            .entry(kind)
            .or_insert_with(|| Timeout::new(Duration::ZERO))
    }

    /// Starts the timer of kind `kind`.
    pub fn start(&mut self, kind: TimeoutType) {
        self.get_mut(kind).start();
    }

    /// Stops the timer of kind `kind`.
    pub fn stop(&mut self, kind: TimeoutType) {
        self.get_mut(kind).stop();
    }

    /// Returns true if the timer of kind `kind` is running.
    pub fn is_active(&self, kind: TimeoutType) -> bool {
        self.get(kind).is_active()
    }

    /// Stops every timer.
    pub fn stop_all(&mut self) {
        for timer in self.timers.values_mut() {
            timer.stop();
        }
    }

    /// Returns the kinds that expired at `now`, stopping them.
    pub fn expired(&mut self, now: Instant) -> Vec<TimeoutType> {
        self.timers
            .iter_mut()
            .filter_map(|(kind, timer)| timer.check_expire(now).then_some(*kind))
            .collect()
    }

    /// Returns the kinds currently running.
    pub fn active(&self) -> Vec<TimeoutType> {
        self.timers
            .iter()
            .filter(|(_, timer)| timer.is_active())
            .map(|(kind, _)| *kind)
            .collect()
    }
}
