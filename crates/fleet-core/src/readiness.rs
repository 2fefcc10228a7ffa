//! Bounded readiness polling.
//!
//! The poller owns the whole retry budget: a [`Probe`] makes exactly one
//! connection attempt per call, and the poller makes at most
//! `policy.max_attempts` calls. Sleeping goes through a [`Sleeper`] so tests
//! can count waits without real time passing.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ReadinessConfig;

// ---------------------------------------------------------------------------
// BackoffPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Upper bound of uniform random delay added to each interval.
    pub jitter: Option<Duration>,
}

impl BackoffPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            jitter: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = (!jitter.is_zero()).then_some(jitter);
        self
    }

    /// Delay to wait before the next probe.
    pub fn delay(&self) -> Duration {
        match self.jitter {
            Some(j) => {
                let extra = rand::thread_rng().gen_range(0..=j.as_millis() as u64);
                self.interval + Duration::from_millis(extra)
            }
            None => self.interval,
        }
    }
}

impl From<&ReadinessConfig> for BackoffPolicy {
    fn from(cfg: &ReadinessConfig) -> Self {
        BackoffPolicy::fixed(cfg.max_attempts, Duration::from_secs(cfg.interval_secs))
            .with_jitter(Duration::from_millis(cfg.jitter_ms))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::from(&ReadinessConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Probe / Sleeper
// ---------------------------------------------------------------------------

/// A single, non-retrying connectivity check against a machine.
pub trait Probe {
    fn probe(&self, target: &str) -> std::result::Result<(), String>;
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ---------------------------------------------------------------------------
// ReadinessPoller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PollOutcome {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
}

impl PollOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Ready { attempts } | PollOutcome::TimedOut { attempts } => *attempts,
        }
    }
}

struct PollAttempt<'a> {
    index: u32,
    outcome: &'a std::result::Result<(), String>,
}

pub struct ReadinessPoller<'a> {
    probe: &'a dyn Probe,
    sleeper: &'a dyn Sleeper,
}

impl<'a> ReadinessPoller<'a> {
    pub fn new(probe: &'a dyn Probe, sleeper: &'a dyn Sleeper) -> Self {
        Self { probe, sleeper }
    }

    pub fn wait_ready(&self, target: &str, policy: &BackoffPolicy) -> PollOutcome {
        for index in 1..=policy.max_attempts {
            let outcome = self.probe.probe(target);
            log_attempt(target, policy, &PollAttempt { index, outcome: &outcome });
            if outcome.is_ok() {
                return PollOutcome::Ready { attempts: index };
            }
            if index < policy.max_attempts {
                self.sleeper.sleep(policy.delay());
            }
        }
        tracing::warn!(
            machine = %target,
            attempts = policy.max_attempts,
            "machine did not become reachable"
        );
        PollOutcome::TimedOut {
            attempts: policy.max_attempts,
        }
    }
}

fn log_attempt(target: &str, policy: &BackoffPolicy, attempt: &PollAttempt<'_>) {
    match attempt.outcome {
        Ok(()) => tracing::info!(
            machine = %target,
            attempt = attempt.index,
            "machine is reachable"
        ),
        Err(reason) => tracing::debug!(
            machine = %target,
            attempt = attempt.index,
            max_attempts = policy.max_attempts,
            reason = %reason,
            "probe failed"
        ),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    struct ScriptedProbe {
        succeed_on: Option<u32>,
        calls: Cell<u32>,
    }

    impl ScriptedProbe {
        fn never() -> Self {
            Self {
                succeed_on: None,
                calls: Cell::new(0),
            }
        }

        fn on(attempt: u32) -> Self {
            Self {
                succeed_on: Some(attempt),
                calls: Cell::new(0),
            }
        }
    }

    impl Probe for ScriptedProbe {
        fn probe(&self, _target: &str) -> std::result::Result<(), String> {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            match self.succeed_on {
                Some(k) if n >= k => Ok(()),
                _ => Err("connection refused".into()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        sleeps: RefCell<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.sleeps.borrow_mut().push(duration);
        }
    }

    fn policy(max: u32) -> BackoffPolicy {
        BackoffPolicy::fixed(max, Duration::from_secs(10))
    }

    #[test]
    fn times_out_after_exactly_max_attempts() {
        let probe = ScriptedProbe::never();
        let sleeper = RecordingSleeper::default();
        let outcome = ReadinessPoller::new(&probe, &sleeper).wait_ready("node-1", &policy(3));
        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 3 });
        assert_eq!(probe.calls.get(), 3);
        // No sleep after the final failed probe.
        assert_eq!(sleeper.sleeps.borrow().len(), 2);
    }

    #[test]
    fn stops_at_first_success() {
        let probe = ScriptedProbe::on(2);
        let sleeper = RecordingSleeper::default();
        let outcome = ReadinessPoller::new(&probe, &sleeper).wait_ready("node-1", &policy(3));
        assert_eq!(outcome, PollOutcome::Ready { attempts: 2 });
        assert_eq!(probe.calls.get(), 2);
        assert_eq!(*sleeper.sleeps.borrow(), vec![Duration::from_secs(10)]);
    }

    #[test]
    fn immediate_success_never_sleeps() {
        let probe = ScriptedProbe::on(1);
        let sleeper = RecordingSleeper::default();
        let outcome = ReadinessPoller::new(&probe, &sleeper).wait_ready("node-1", &policy(5));
        assert_eq!(outcome.attempts(), 1);
        assert!(sleeper.sleeps.borrow().is_empty());
    }

    #[test]
    fn zero_budget_never_probes() {
        let probe = ScriptedProbe::on(1);
        let sleeper = RecordingSleeper::default();
        let outcome = ReadinessPoller::new(&probe, &sleeper).wait_ready("node-1", &policy(0));
        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 0 });
        assert_eq!(probe.calls.get(), 0);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = BackoffPolicy::fixed(3, Duration::from_secs(1))
            .with_jitter(Duration::from_millis(250));
        for _ in 0..50 {
            let d = p.delay();
            assert!(d >= Duration::from_secs(1));
            assert!(d <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn policy_from_config() {
        let cfg = ReadinessConfig {
            max_attempts: 4,
            interval_secs: 2,
            jitter_ms: 0,
        };
        let p = BackoffPolicy::from(&cfg);
        assert_eq!(p, BackoffPolicy::fixed(4, Duration::from_secs(2)));
    }
}
