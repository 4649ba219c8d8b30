// =============================================================================
// Drawdown Guard: admission gate driven by realised trade outcomes
// =============================================================================
//
//   NORMAL ──(trigger)──▶ PAUSED ──(paused_until elapsed)──▶ NORMAL
//
// Triggers, evaluated whenever an outcome is recorded:
//   1. Consecutive losses. The last N outcomes were all losses.
//   2. Hourly loss. Realised P&L over the rolling window is worse than
//      -max_hourly_loss of starting equity.
//   3. Daily loss. Realised P&L since UTC midnight is at or below
//      -max_daily_loss of starting equity. Halts until the next UTC midnight.
//
// Pauses 1 and 2 last `pause` from the triggering outcome. A win resets the
// consecutive-loss counter. Time is always passed in explicitly.
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::runtime_config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseReason {
    ConsecutiveLosses,
    HourlyLoss,
    DailyLoss,
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConsecutiveLosses => write!(f, "CONSECUTIVE_LOSSES"),
            Self::HourlyLoss => write!(f, "HOURLY_LOSS"),
            Self::DailyLoss => write!(f, "DAILY_LOSS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Admission {
    Allowed,
    Paused {
        until: DateTime<Utc>,
        reason: PauseReason,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DrawdownLimits {
    pub max_consecutive_losses: u32,
    /// Fraction of starting equity (0.01 = 1 %).
    pub max_hourly_loss: f64,
    pub max_daily_loss: f64,
    pub pause: Duration,
    pub rolling_window: Duration,
}

impl DrawdownLimits {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            max_consecutive_losses: cfg.max_consecutive_losses,
            max_hourly_loss: cfg.max_hourly_loss,
            max_daily_loss: cfg.max_daily_loss,
            pause: Duration::minutes(cfg.pause_minutes),
            rolling_window: Duration::minutes(cfg.rolling_window_minutes),
        }
    }
}

impl Default for DrawdownLimits {
    fn default() -> Self {
        Self {
            max_consecutive_losses: 5,
            max_hourly_loss: 0.01,
            max_daily_loss: 0.03,
            pause: Duration::hours(1),
            rolling_window: Duration::hours(1),
        }
    }
}

/// Process-wide drawdown state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownState {
    pub consecutive_losses: u32,
    /// (close time, pnl) within the rolling window.
    pub rolling_pnl_window: VecDeque<(DateTime<Utc>, f64)>,
    pub paused_until: Option<DateTime<Utc>>,
    pub pause_reason: Option<PauseReason>,
    pub daily_pnl: f64,
    pub day: Option<NaiveDate>,
    pub starting_equity: f64,
}

#[derive(Debug, Clone)]
pub struct DrawdownGuard {
    limits: DrawdownLimits,
    state: DrawdownState,
}

fn next_midnight(t: DateTime<Utc>) -> DateTime<Utc> {
    let next = t.date_naive() + Duration::days(1);
    next.and_hms_opt(0, 0, 0)
        .map(|n| n.and_utc())
        .unwrap_or(t + Duration::days(1))
}

impl DrawdownGuard {
    pub fn new(limits: DrawdownLimits, starting_equity: f64) -> Self {
        info!(
            starting_equity,
            max_consecutive_losses = limits.max_consecutive_losses,
            max_hourly_loss = limits.max_hourly_loss,
            max_daily_loss = limits.max_daily_loss,
            "DrawdownGuard initialised"
        );
        Self {
            limits,
            state: DrawdownState {
                consecutive_losses: 0,
                rolling_pnl_window: VecDeque::new(),
                paused_until: None,
                pause_reason: None,
                daily_pnl: 0.0,
                day: None,
                starting_equity,
            },
        }
    }

    pub fn state(&self) -> &DrawdownState {
        &self.state
    }

    /// Start a new daily book when the UTC date changes. `equity` becomes the
    /// reference for the percentage limits, and also replaces a starting
    /// equity that was never known, whatever the date.
    pub fn roll_day(&mut self, now: DateTime<Utc>, equity: f64) {
        let today = now.date_naive();
        let new_day = self.state.day != Some(today);
        if new_day {
            if self.state.day.is_some() {
                info!(
                    previous_daily_pnl = self.state.daily_pnl,
                    equity, "new trading day, daily P&L reset"
                );
            }
            self.state.day = Some(today);
            self.state.daily_pnl = 0.0;
        }
        let unknown = self.state.starting_equity <= 0.0;
        if equity > 0.0 && (new_day || unknown) {
            self.state.starting_equity = equity;
            if unknown {
                warn!(equity, "starting equity was unset, loss limits rebased");
                self.recheck_loss_limits(now);
            }
        }
    }

    /// Record a closed trade's net P&L at `at`.
    pub fn record_outcome(&mut self, pnl: f64, at: DateTime<Utc>) {
        let today = at.date_naive();
        if self.state.day != Some(today) {
            self.state.day = Some(today);
            self.state.daily_pnl = 0.0;
        }
        self.state.daily_pnl += pnl;

        if pnl < 0.0 {
            self.state.consecutive_losses += 1;
        } else {
            self.state.consecutive_losses = 0;
        }

        self.state.rolling_pnl_window.push_back((at, pnl));
        let horizon = at - self.limits.rolling_window;
        while let Some((t, _)) = self.state.rolling_pnl_window.front() {
            if *t <= horizon {
                self.state.rolling_pnl_window.pop_front();
            } else {
                break;
            }
        }

        debug!(
            pnl,
            daily_pnl = self.state.daily_pnl,
            rolling_pnl = self.rolling_pnl(at),
            consecutive_losses = self.state.consecutive_losses,
            "trade outcome recorded"
        );

        if self.state.consecutive_losses >= self.limits.max_consecutive_losses {
            self.pause_until(at + self.limits.pause, PauseReason::ConsecutiveLosses);
        }
        self.recheck_loss_limits(at);
    }

    fn rolling_pnl(&self, now: DateTime<Utc>) -> f64 {
        let horizon = now - self.limits.rolling_window;
        self.state
            .rolling_pnl_window
            .iter()
            .filter(|(t, _)| *t > horizon)
            .map(|(_, p)| p)
            .sum()
    }

    /// Daily and hourly triggers against the current starting equity. Both
    /// are disarmed while the starting equity is unknown. The hourly pause
    /// runs from the latest outcome in the window.
    fn recheck_loss_limits(&mut self, now: DateTime<Utc>) {
        let start = self.state.starting_equity;
        if start <= 0.0 {
            return;
        }
        if self.state.daily_pnl <= -self.limits.max_daily_loss * start {
            self.pause_until(next_midnight(now), PauseReason::DailyLoss);
        }
        if self.rolling_pnl(now) < -self.limits.max_hourly_loss * start {
            let last = self
                .state
                .rolling_pnl_window
                .back()
                .map_or(now, |(t, _)| *t);
            self.pause_until(last + self.limits.pause, PauseReason::HourlyLoss);
        }
    }

    fn pause_until(&mut self, until: DateTime<Utc>, reason: PauseReason) {
        if self.state.paused_until.map_or(true, |u| until > u) {
            warn!(
                %reason,
                until = %until.to_rfc3339(),
                consecutive_losses = self.state.consecutive_losses,
                daily_pnl = self.state.daily_pnl,
                "DrawdownGuard paused new trades"
            );
            self.state.paused_until = Some(until);
            self.state.pause_reason = Some(reason);
        }
    }

    /// Admission check; clears an elapsed pause.
    pub fn admission(&mut self, now: DateTime<Utc>) -> Admission {
        match self.state.paused_until {
            Some(until) if now < until => Admission::Paused {
                until,
                reason: self
                    .state
                    .pause_reason
                    .unwrap_or(PauseReason::ConsecutiveLosses),
            },
            Some(_) => {
                info!("DrawdownGuard pause elapsed, admission resumed");
                self.state.paused_until = None;
                self.state.pause_reason = None;
                Admission::Allowed
            }
            None => Admission::Allowed,
        }
    }

    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.state.paused_until.is_some_and(|u| now < u)
    }
}

// =============================================================================
// Tests
// =============================================================================
