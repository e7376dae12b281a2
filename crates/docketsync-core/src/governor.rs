//! Rate governor shared by every remote call of a run.
//!
//! The governor owns one piece of state, the quota phase:
//!
//! - `Ready`: requests may go out (subject to local pacing).
//! - `Waiting { until }`: the service said the quota is spent; every caller
//!   sleeps until the cool-down elapses.
//! - `Exhausted`: over-limit persisted past the configured number of waits.
//!   Sticky for the rest of the run.
//!
//! [`RateGovernor::call`] wraps a single source call with quota accounting
//! and the retry budget for transient failures.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ::governor::clock::DefaultClock;
use ::governor::state::direct::NotKeyed;
use ::governor::state::InMemoryState;
use ::governor::{Quota, RateLimiter};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::retry::RetryConfig;
use crate::source::{Reply, SourceError};
use crate::FetchError;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Local request pacing, independent of what the service reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub limit: u32,
    pub window: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            limit: 1_000,
            window: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GovernorConfig {
    /// Wait applied after an over-limit response or a zero remaining quota.
    pub cool_down: Duration,
    /// Consecutive over-limit responses tolerated before the quota is
    /// declared exhausted.
    pub max_over_limit_waits: u32,
    pub retry: RetryConfig,
    pub pacing: Option<Pacing>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            cool_down: Duration::from_secs(20 * 60),
            max_over_limit_waits: 3,
            retry: RetryConfig::default(),
            pacing: Some(Pacing::default()),
        }
    }
}

/// Current quota phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorPhase {
    Ready,
    Waiting { until: Instant },
    Exhausted,
}

/// What a response told us about the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaSignal {
    /// A successful response, with the remaining-quota header when present.
    Remaining(Option<u32>),
    OverLimit,
}

/// Point-in-time view of the governor for progress reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub remaining: Option<u32>,
    pub exhausted: bool,
    pub waiting_ms: Option<u64>,
    pub wait_cycles: u32,
    pub requests_issued: u64,
}

#[derive(Debug)]
struct QuotaState {
    phase: GovernorPhase,
    remaining: Option<u32>,
    consecutive_over_limit: u32,
    wait_cycles: u32,
    requests_issued: u64,
}

pub struct RateGovernor {
    config: GovernorConfig,
    state: Mutex<QuotaState>,
    pacer: Option<DirectRateLimiter>,
    cancel: CancellationToken,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig, cancel: CancellationToken) -> Self {
        let pacer = config
            .pacing
            .map(|pacing| RateLimiter::direct(quota_from_window(pacing.window, pacing.limit)));
        Self {
            config,
            state: Mutex::new(QuotaState {
                phase: GovernorPhase::Ready,
                remaining: None,
                consecutive_over_limit: 0,
                wait_cycles: 0,
                requests_issued: 0,
            }),
            pacer,
            cancel,
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn lock_state(&self) -> MutexGuard<'_, QuotaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> GovernorPhase {
        self.lock_state().phase
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        let state = self.lock_state();
        let waiting_ms = match state.phase {
            GovernorPhase::Waiting { until } => Some(
                u64::try_from(until.saturating_duration_since(Instant::now()).as_millis())
                    .unwrap_or(u64::MAX),
            ),
            _ => None,
        };
        QuotaSnapshot {
            remaining: state.remaining,
            exhausted: state.phase == GovernorPhase::Exhausted,
            waiting_ms,
            wait_cycles: state.wait_cycles,
            requests_issued: state.requests_issued,
        }
    }

    /// Block until a request may be issued.
    ///
    /// # Errors
    /// [`FetchError::QuotaExhausted`] once the phase is `Exhausted`, and
    /// [`FetchError::Cancelled`] when the run is being shut down.
    pub async fn acquire(&self) -> Result<(), FetchError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let wait = {
                let mut state = self.lock_state();
                match state.phase {
                    GovernorPhase::Ready => None,
                    GovernorPhase::Exhausted => {
                        return Err(FetchError::QuotaExhausted {
                            waits: self.config.max_over_limit_waits,
                        })
                    }
                    GovernorPhase::Waiting { until } => {
                        let now = Instant::now();
                        if now >= until {
                            state.phase = GovernorPhase::Ready;
                            None
                        } else {
                            Some(until - now)
                        }
                    }
                }
            };
            match wait {
                None => break,
                Some(delay) => self.sleep(delay).await?,
            }
        }

        if let Some(pacer) = &self.pacer {
            tokio::select! {
                () = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                () = pacer.until_ready() => {}
            }
        }

        self.lock_state().requests_issued += 1;
        Ok(())
    }

    /// Fold a response's quota information into the phase and return the new phase.
    pub fn record(&self, signal: QuotaSignal) -> GovernorPhase {
        let mut state = self.lock_state();
        if state.phase == GovernorPhase::Exhausted {
            return GovernorPhase::Exhausted;
        }

        match signal {
            QuotaSignal::Remaining(remaining) => {
                state.consecutive_over_limit = 0;
                if let Some(remaining) = remaining {
                    state.remaining = Some(remaining);
                    if should_log_remaining(remaining) {
                        info!(remaining, "requests remaining in quota window");
                    }
                }
                if remaining == Some(0) {
                    state.wait_cycles += 1;
                    state.phase = GovernorPhase::Waiting {
                        until: Instant::now() + self.config.cool_down,
                    };
                    info!(
                        cool_down_secs = self.config.cool_down.as_secs(),
                        "quota spent; pausing before the next request"
                    );
                } else {
                    state.phase = GovernorPhase::Ready;
                }
            }
            QuotaSignal::OverLimit => {
                state.remaining = Some(0);
                // Concurrent callers rejected during one episode share its wait.
                if let GovernorPhase::Waiting { until } = state.phase {
                    if until > Instant::now() {
                        return state.phase;
                    }
                }
                state.consecutive_over_limit += 1;
                if state.consecutive_over_limit > self.config.max_over_limit_waits {
                    state.phase = GovernorPhase::Exhausted;
                    error!(
                        waits = self.config.max_over_limit_waits,
                        "rate limit persisted through every cool-down; quota exhausted"
                    );
                } else {
                    state.wait_cycles += 1;
                    state.phase = GovernorPhase::Waiting {
                        until: Instant::now() + self.config.cool_down,
                    };
                    warn!(
                        attempt = state.consecutive_over_limit,
                        max_waits = self.config.max_over_limit_waits,
                        cool_down_secs = self.config.cool_down.as_secs(),
                        "rate limit hit; waiting before retrying"
                    );
                }
            }
        }
        state.phase
    }

    /// Issue one governed call: wait for the quota, run `op`, account for the
    /// reply, and retry transient failures within the retry budget.
    ///
    /// Over-limit replies are retried after the cool-down and do not consume
    /// the transient retry budget.
    pub async fn call<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Reply<T>, SourceError>>,
    {
        let mut transient_failures = 0_u32;
        loop {
            self.acquire().await?;
            match op().await {
                Ok(Reply::Data {
                    body,
                    quota_remaining,
                }) => {
                    self.record(QuotaSignal::Remaining(quota_remaining));
                    return Ok(body);
                }
                Ok(Reply::OverLimit) => {
                    if self.record(QuotaSignal::OverLimit) == GovernorPhase::Exhausted {
                        return Err(FetchError::QuotaExhausted {
                            waits: self.config.max_over_limit_waits,
                        });
                    }
                }
                Err(source_error) if source_error.retryable() => {
                    if transient_failures >= self.config.retry.max_retries {
                        return Err(FetchError::TransientExhausted {
                            attempts: transient_failures + 1,
                            message: source_error.to_string(),
                        });
                    }
                    let delay = self.config.retry.delay_for_attempt(transient_failures);
                    transient_failures += 1;
                    warn!(
                        label,
                        attempt = transient_failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %source_error,
                        "transient failure; retrying"
                    );
                    self.sleep(delay).await?;
                }
                Err(source_error) => return Err(FetchError::Source(source_error)),
            }
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<(), FetchError> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(FetchError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Log every value below 10, every tenth up to 100 and every hundredth below 1000.
fn should_log_remaining(remaining: u32) -> bool {
    remaining < 10
        || (remaining <= 100 && remaining % 10 == 0)
        || (remaining < 1_000 && remaining % 100 == 0)
}

fn quota_from_window(window: Duration, limit: u32) -> Quota {
    let burst = NonZeroU32::new(limit.max(1)).unwrap_or(NonZeroU32::MIN);
    let seconds_per_cell = (window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
