// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loop timer and idle engine.
//!
//! The controller brackets every iteration with [`LoopTimer::begin`] and
//! [`LoopTimer::finish`]. `finish` measures the duration, budgets the
//! remaining idle time, detects overruns, and occasionally samples the
//! iteration into the shared statistics ring.

use drover_core::{Clock, LoopStats, SystemClock, TickSample};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Idle is declared only when at least this much of the interval remains.
const IDLE_MARGIN: Duration = Duration::from_millis(10);

/// Sleep applied after an overrun so a hot loop still yields the CPU.
const OVERRUN_SLEEP: Duration = Duration::from_micros(100);

/// Fraction of iterations sampled into the stats ring.
const STATS_PROBABILITY: f64 = 0.001;

/// What one finished iteration means for the caller.
#[derive(Debug, Clone, Copy)]
pub struct TickOutcome {
    pub duration: Duration,
    /// Remaining budget; zero on overrun.
    pub idle: Duration,
    pub overrun: bool,
    /// Whether ON_IDLE should fire for this iteration.
    pub fire_idle: bool,
    /// Moment the idle budget runs out; carried on the Idle event.
    pub deadline: Instant,
    /// How long the controller should sleep before the next iteration.
    pub sleep_for: Duration,
}

/// Measures iterations against `loop_interval`.
pub struct LoopTimer<C: Clock = SystemClock> {
    clock: C,
    interval: Duration,
    idle_probability: f64,
    stats_probability: f64,
    start: Option<Instant>,
    stats: Arc<Mutex<LoopStats>>,
    overruns: u64,
    priority_applied: bool,
}

impl LoopTimer<SystemClock> {
    pub fn new(interval: Duration, idle_probability: f64) -> Self {
        Self::with_clock(SystemClock, interval, idle_probability)
    }
}

impl<C: Clock> LoopTimer<C> {
    pub fn with_clock(clock: C, interval: Duration, idle_probability: f64) -> Self {
        Self {
            clock,
            interval,
            idle_probability: idle_probability.clamp(0.0, 1.0),
            stats_probability: STATS_PROBABILITY,
            start: None,
            stats: Arc::new(Mutex::new(LoopStats::new())),
            overruns: 0,
            priority_applied: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Shared handle to the sample ring (also held by the stats-trim idle
    /// callback).
    pub fn stats(&self) -> Arc<Mutex<LoopStats>> {
        Arc::clone(&self.stats)
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Override the stats sampling probability. Tests pin this to 1.0.
    pub fn set_stats_probability(&mut self, probability: f64) {
        self.stats_probability = probability.clamp(0.0, 1.0);
    }

    /// Mark the start of an iteration.
    pub fn begin(&mut self) -> Instant {
        let now = self.clock.now();
        self.start = Some(now);
        now
    }

    /// True while the current iteration still has idle budget.
    ///
    /// With a zero interval the loop free-runs and idleness is a coin flip
    /// weighted by `idle_probability`.
    pub fn is_idle(&self) -> bool {
        let Some(start) = self.start else {
            return false;
        };
        if self.interval.is_zero() {
            return rand::thread_rng().gen_bool(self.idle_probability);
        }
        let deadline = start + self.interval;
        self.clock.now() + IDLE_MARGIN < deadline
    }

    /// Close the iteration opened by [`begin`](Self::begin).
    pub fn finish(&mut self) -> Option<TickOutcome> {
        let start = self.start.take()?;
        let now = self.clock.now();
        let duration = now.saturating_duration_since(start);

        let outcome = if self.interval.is_zero() {
            // Free-running mode: no budget, probabilistic idle.
            TickOutcome {
                duration,
                idle: Duration::ZERO,
                overrun: false,
                fire_idle: rand::thread_rng().gen_bool(self.idle_probability),
                deadline: now,
                sleep_for: Duration::ZERO,
            }
        } else {
            let deadline = start + self.interval;
            let idle = self.interval.saturating_sub(duration);
            let overrun = duration >= self.interval;
            if overrun {
                self.overruns += 1;
                error!(
                    duration_ms = duration.as_millis() as u64,
                    interval_ms = self.interval.as_millis() as u64,
                    "loop duration exceeded interval"
                );
            }
            TickOutcome {
                duration,
                idle,
                overrun,
                fire_idle: now + IDLE_MARGIN < deadline,
                deadline,
                sleep_for: if overrun { OVERRUN_SLEEP } else { idle },
            }
        };

        if rand::thread_rng().gen_bool(self.stats_probability) {
            self.stats.lock().record(TickSample {
                duration: outcome.duration,
                idle: outcome.idle,
            });
        }
        Some(outcome)
    }

    /// Nudge process priority once, based on the loop interval.
    ///
    /// Shells out to `renice`; lack of privilege is logged and ignored.
    pub fn apply_priority(&mut self) {
        if self.priority_applied || self.interval.is_zero() {
            return;
        }
        self.priority_applied = true;
        let nice = nice_for_interval(self.interval);
        if nice == 0 {
            return;
        }
        let pid = std::process::id().to_string();
        match std::process::Command::new("renice")
            .args(["-n", &nice.to_string(), "-p", &pid])
            .output()
        {
            Ok(out) if out.status.success() => debug!(nice, "process priority adjusted"),
            Ok(out) => warn!(
                nice,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "renice refused; keeping default priority"
            ),
            Err(e) => warn!(nice, error = %e, "renice unavailable; keeping default priority"),
        }
    }
}

/// Priority table: tighter loops get a stronger nice boost.
pub fn nice_for_interval(interval: Duration) -> i32 {
    let secs = interval.as_secs_f64();
    if secs >= 5.0 || secs <= 0.0 {
        0
    } else if secs > 2.0 {
        -1
    } else if secs > 1.0 {
        -2
    } else if secs > 0.5 {
        -3
    } else if secs > 0.1 {
        -4
    } else {
        -5
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
