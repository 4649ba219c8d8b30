// =============================================================================
// Trailing Stop Engine: per-position stop ratchet
// =============================================================================
//
// Owns the trailing fields of every open position in a map keyed by ticket.
// Nothing else mutates them.
//
// Per position:
//
//   INACTIVE ──(registered with use_trailing_stop)──▶ ACTIVE
//
//   ACTIVE, once per scan:
//     buy:  candidate = price - distance; applied only if > current SL
//     sell: candidate = price + distance; applied only if < current SL
//     A candidate that would loosen the stop is a logged no-op.
//
// Independently of trailing, the break-even lock moves SL to entry plus a
// small buffer once profit reaches the trigger distance (tighten only).
//
// Crossing SL or TP is reported as an observed exit. The close itself is an
// external event; the entry is dropped on `on_position_closed`.
// =============================================================================

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{
    round_to, Direction, ExitTrigger, ModificationReason, ObservedExit, PositionView,
    StopModification, Ticket, TradeIntent, TrailingState,
};

/// Fraction of a pip treated as price equality.
const PRICE_EPS_PIPS: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakevenPolicy {
    pub trigger_pips: f64,
    pub buffer_pips: f64,
}

/// Trailing-owned view of one open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailedPosition {
    pub ticket: Ticket,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub pip_size: f64,
    pub current_sl: f64,
    pub current_tp: Option<f64>,
    pub trailing_state: TrailingState,
    pub trailing_distance_pips: f64,
    /// Best price seen since registration (highest for buys, lowest for sells).
    pub highest_favorable_price: f64,
    pub breakeven_locked: bool,
}

impl TrailedPosition {
    fn eps(&self) -> f64 {
        self.pip_size * PRICE_EPS_PIPS
    }

    fn profit_pips(&self, price: f64) -> f64 {
        self.direction.favorable_move(self.entry_price, price) / self.pip_size
    }

    /// True when `candidate` is a strictly tighter stop than the current one.
    fn is_tighter(&self, candidate: f64) -> bool {
        match self.direction {
            Direction::Buy => candidate > self.current_sl + self.eps(),
            Direction::Sell => candidate < self.current_sl - self.eps(),
        }
    }

    fn crossed(&self, price: f64) -> Option<ExitTrigger> {
        let eps = self.eps();
        let sl_hit = match self.direction {
            Direction::Buy => price <= self.current_sl + eps,
            Direction::Sell => price >= self.current_sl - eps,
        };
        if sl_hit {
            return Some(ExitTrigger::StopLoss);
        }
        let tp_hit = self.current_tp.is_some_and(|tp| match self.direction {
            Direction::Buy => price >= tp - eps,
            Direction::Sell => price <= tp + eps,
        });
        tp_hit.then_some(ExitTrigger::TakeProfit)
    }
}

/// Result of one update.
#[derive(Debug, Clone, PartialEq)]
pub enum TrailOutcome {
    /// Stop moved; forward the command to execution.
    Tightened(StopModification),
    /// Nothing to do this cycle.
    Held,
    /// Price is through a boundary; the broker should be closing it.
    Crossed(ObservedExit),
    /// Ticket is not tracked.
    Unknown,
}

#[derive(Debug, Default)]
pub struct TrailingStopEngine {
    positions: HashMap<Ticket, TrailedPosition>,
    breakeven: Option<BreakevenPolicy>,
}

impl TrailingStopEngine {
    pub fn new(breakeven: Option<BreakevenPolicy>) -> Self {
        Self {
            positions: HashMap::new(),
            breakeven,
        }
    }

    /// Start tracking a freshly opened position.
    ///
    /// Returns a modification when activation clears the fixed target.
    pub fn register(
        &mut self,
        ticket: Ticket,
        intent: &TradeIntent,
        keep_target: bool,
    ) -> Option<StopModification> {
        let state = if intent.use_trailing_stop {
            TrailingState::Active
        } else {
            TrailingState::Inactive
        };

        let had_target = intent.tp_price.is_some();
        let current_tp = if state == TrailingState::Active && !keep_target {
            None
        } else {
            intent.tp_price
        };

        let pos = TrailedPosition {
            ticket,
            symbol: intent.symbol.clone(),
            direction: intent.direction,
            entry_price: intent.entry_price,
            pip_size: intent.pip_size,
            current_sl: intent.sl_price,
            current_tp,
            trailing_state: state,
            trailing_distance_pips: intent.trailing_distance_pips,
            highest_favorable_price: intent.entry_price,
            breakeven_locked: false,
        };

        info!(
            ticket,
            symbol = %pos.symbol,
            direction = %pos.direction,
            state = %state,
            sl = format!("{:.5}", pos.current_sl),
            trail_pips = pos.trailing_distance_pips,
            "position registered for exit management"
        );

        let clear = (had_target && current_tp.is_none()).then(|| StopModification {
            ticket,
            new_sl: pos.current_sl,
            take_profit: None,
            reason: ModificationReason::TargetCleared,
        });

        self.positions.insert(ticket, pos);
        clear
    }

    /// Track a broker position the engine did not open (e.g. after restart).
    /// It never trails but still gets the break-even lock.
    pub fn adopt(&mut self, view: &PositionView, pip_size: f64) {
        if self.positions.contains_key(&view.ticket) {
            return;
        }
        warn!(ticket = view.ticket, symbol = %view.symbol, "adopting untracked position");
        let best = if view.direction.favorable_move(view.entry_price, view.current_price) > 0.0 {
            view.current_price
        } else {
            view.entry_price
        };
        self.positions.insert(
            view.ticket,
            TrailedPosition {
                ticket: view.ticket,
                symbol: view.symbol.clone(),
                direction: view.direction,
                entry_price: view.entry_price,
                pip_size,
                current_sl: view.current_sl,
                current_tp: view.current_tp,
                trailing_state: TrailingState::Inactive,
                trailing_distance_pips: 0.0,
                highest_favorable_price: best,
                breakeven_locked: false,
            },
        );
    }

    /// Evaluate one position against the latest price.
    pub fn update(&mut self, ticket: Ticket, current_price: f64) -> TrailOutcome {
        let breakeven = self.breakeven;
        let Some(pos) = self.positions.get_mut(&ticket) else {
            return TrailOutcome::Unknown;
        };

        // ── Boundary crossing ────────────────────────────────────────
        if let Some(trigger) = pos.crossed(current_price) {
            let exit_price = match trigger {
                ExitTrigger::StopLoss => pos.current_sl,
                ExitTrigger::TakeProfit => pos.current_tp.unwrap_or(current_price),
            };
            let pips = round_to(pos.profit_pips(exit_price), 1);
            info!(
                ticket,
                symbol = %pos.symbol,
                trigger = %trigger,
                exit_price = format!("{:.5}", exit_price),
                pips,
                "boundary crossed"
            );
            return TrailOutcome::Crossed(ObservedExit {
                ticket,
                symbol: pos.symbol.clone(),
                trigger,
                exit_price,
                pips,
            });
        }

        // ── Best price ───────────────────────────────────────────────
        if pos.direction.favorable_move(pos.highest_favorable_price, current_price) > 0.0 {
            pos.highest_favorable_price = current_price;
        }

        let s = pos.direction.sign();
        let mut best: Option<(f64, ModificationReason)> = None;

        // ── Trailing candidate ───────────────────────────────────────
        if pos.trailing_state == TrailingState::Active && pos.trailing_distance_pips > 0.0 {
            let candidate = current_price - s * pos.trailing_distance_pips * pos.pip_size;
            if pos.is_tighter(candidate) {
                best = Some((candidate, ModificationReason::Trailing));
            } else {
                debug!(
                    ticket,
                    candidate = format!("{:.5}", candidate),
                    current_sl = format!("{:.5}", pos.current_sl),
                    "trail would loosen stop, ignored"
                );
            }
        }

        // ── Break-even lock ──────────────────────────────────────────
        if let Some(be) = breakeven {
            if !pos.breakeven_locked && pos.profit_pips(current_price) >= be.trigger_pips {
                pos.breakeven_locked = true;
                let candidate = pos.entry_price + s * be.buffer_pips * pos.pip_size;
                let tighter_than_best = match best {
                    None => true,
                    Some((b, _)) => pos.direction.favorable_move(b, candidate) > 0.0,
                };
                if pos.is_tighter(candidate) && tighter_than_best {
                    best = Some((candidate, ModificationReason::Breakeven));
                }
            }
        }

        match best {
            Some((new_sl, reason)) => {
                let old = pos.current_sl;
                pos.current_sl = new_sl;
                info!(
                    ticket,
                    symbol = %pos.symbol,
                    ?reason,
                    old_sl = format!("{:.5}", old),
                    new_sl = format!("{:.5}", new_sl),
                    price = format!("{:.5}", current_price),
                    "stop tightened"
                );
                TrailOutcome::Tightened(StopModification {
                    ticket,
                    new_sl,
                    take_profit: pos.current_tp,
                    reason,
                })
            }
            None => TrailOutcome::Held,
        }
    }

    /// External close event.
    pub fn on_position_closed(&mut self, ticket: Ticket) -> Option<TrailedPosition> {
        let removed = self.positions.remove(&ticket);
        if removed.is_some() {
            debug!(ticket, "trailing state released");
        }
        removed
    }

    /// Drop every ticket not in `open`. Returns the dropped tickets.
    pub fn retain_open(&mut self, open: &HashSet<Ticket>) -> Vec<Ticket> {
        let stale: Vec<Ticket> = self
            .positions
            .keys()
            .filter(|t| !open.contains(t))
            .copied()
            .collect();
        for t in &stale {
            warn!(ticket = t, "tracked position no longer open, releasing");
            self.positions.remove(t);
        }
        stale
    }

    pub fn get(&self, ticket: Ticket) -> Option<&TrailedPosition> {
        self.positions.get(&ticket)
    }

    pub fn contains(&self, ticket: Ticket) -> bool {
        self.positions.contains_key(&ticket)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
