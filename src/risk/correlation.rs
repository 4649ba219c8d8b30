// =============================================================================
// Correlation Ledger: directional exposure per correlated group
// =============================================================================
//
// Exposure is keyed by the accepted intent until the broker confirms the
// fill, then re-keyed by ticket. Rejected orders and closed positions release
// their exposure.
//
// correlation_factor(symbol, direction) for one group:
//
//     max(0, net * sign) / gross
//
// where net is the signed lot sum and gross the absolute lot sum of the
// group's exposure. A symbol in several groups takes the largest factor.
// =============================================================================

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::runtime_config::CorrelationGroupConfig;
use crate::types::{Direction, Ticket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExposureKey {
    Intent(Uuid),
    Ticket(Ticket),
}

#[derive(Debug, Clone, PartialEq)]
struct Exposure {
    symbol: String,
    direction: Direction,
    lots: f64,
}

/// Snapshot of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationGroup {
    pub group_id: String,
    pub member_symbols: Vec<String>,
    /// Signed lots: positive is net long the group.
    pub net_directional_exposure: f64,
}

#[derive(Debug, Clone)]
pub struct CorrelationLedger {
    groups: Vec<CorrelationGroupConfig>,
    exposures: HashMap<ExposureKey, Exposure>,
}

/// Upper-case and keep the leading six-letter pair code so broker suffixes
/// (`EURUSDzero`, `GBPUSD.pro`) match the configured members.
fn normalise(symbol: &str) -> String {
    let upper = symbol.to_uppercase();
    match upper.get(0..6) {
        Some(code) if code.chars().all(|c| c.is_ascii_alphabetic()) => code.to_string(),
        _ => upper,
    }
}

impl CorrelationLedger {
    pub fn new(groups: &[CorrelationGroupConfig]) -> Self {
        let groups = groups
            .iter()
            .map(|g| CorrelationGroupConfig {
                id: g.id.clone(),
                members: g.members.iter().map(|m| normalise(m)).collect(),
            })
            .collect();
        Self {
            groups,
            exposures: HashMap::new(),
        }
    }

    fn group_indices(&self, symbol: &str) -> Vec<usize> {
        let s = normalise(symbol);
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.members.iter().any(|m| *m == s))
            .map(|(i, _)| i)
            .collect()
    }

    fn group_totals(&self, idx: usize) -> (f64, f64) {
        let members = &self.groups[idx].members;
        self.exposures
            .values()
            .filter(|e| members.contains(&normalise(&e.symbol)))
            .fold((0.0, 0.0), |(net, gross), e| {
                (net + e.direction.sign() * e.lots, gross + e.lots)
            })
    }

    /// Share of the group's exposure already pointing the same way, in [0, 1].
    pub fn correlation_factor(&self, symbol: &str, direction: Direction) -> f64 {
        self.group_indices(symbol)
            .into_iter()
            .map(|idx| {
                let (net, gross) = self.group_totals(idx);
                if gross > 0.0 {
                    ((net * direction.sign()).max(0.0) / gross).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .fold(0.0, f64::max)
    }

    /// Record exposure for an accepted intent.
    pub fn reserve(&mut self, intent_id: Uuid, symbol: &str, direction: Direction, lots: f64) {
        self.exposures.insert(
            ExposureKey::Intent(intent_id),
            Exposure {
                symbol: symbol.to_string(),
                direction,
                lots,
            },
        );
        debug!(%intent_id, symbol, %direction, lots, "exposure reserved");
    }

    /// Re-key an intent's exposure to the broker ticket.
    pub fn bind_ticket(&mut self, intent_id: Uuid, ticket: Ticket) -> bool {
        match self.exposures.remove(&ExposureKey::Intent(intent_id)) {
            Some(e) => {
                self.exposures.insert(ExposureKey::Ticket(ticket), e);
                true
            }
            None => {
                warn!(%intent_id, ticket, "no reserved exposure for opened intent");
                false
            }
        }
    }

    /// Track a position the ledger has not seen before.
    pub fn adopt(&mut self, ticket: Ticket, symbol: &str, direction: Direction, lots: f64) {
        self.exposures
            .entry(ExposureKey::Ticket(ticket))
            .or_insert_with(|| Exposure {
                symbol: symbol.to_string(),
                direction,
                lots,
            });
    }

    pub fn release(&mut self, key: ExposureKey) -> bool {
        self.exposures.remove(&key).is_some()
    }

    /// Drop ticket exposure for positions no longer open. Pending intents are
    /// left alone.
    pub fn retain_open(&mut self, open: &HashSet<Ticket>) -> Vec<Ticket> {
        let stale: Vec<Ticket> = self
            .exposures
            .keys()
            .filter_map(|k| match k {
                ExposureKey::Ticket(t) if !open.contains(t) => Some(*t),
                _ => None,
            })
            .collect();
        for t in &stale {
            self.exposures.remove(&ExposureKey::Ticket(*t));
        }
        stale
    }

    pub fn contains_ticket(&self, ticket: Ticket) -> bool {
        self.exposures.contains_key(&ExposureKey::Ticket(ticket))
    }

    /// Number of tracked exposures (open tickets plus pending intents).
    pub fn len(&self) -> usize {
        self.exposures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exposures.is_empty()
    }

    pub fn snapshot(&self) -> Vec<CorrelationGroup> {
        (0..self.groups.len())
            .map(|idx| CorrelationGroup {
                group_id: self.groups[idx].id.clone(),
                member_symbols: self.groups[idx].members.clone(),
                net_directional_exposure: self.group_totals(idx).0,
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
