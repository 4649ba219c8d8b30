// =============================================================================
// Admission Decision: auditable verdict for every candidate signal
// =============================================================================
//
// Each candidate that reaches the scan cycle gets exactly one decision:
// ALLOW (an intent was emitted), BLOCK (a gate refused it) or SKIP (dropped
// without being an error, e.g. below confidence or uneconomical).
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::types::{CandidateSignal, Direction, StrategyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Allow,
    Block,
    Skip,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "ALLOW"),
            Self::Block => write!(f, "BLOCK"),
            Self::Skip => write!(f, "SKIP"),
        }
    }
}

/// Gate that produced a non-ALLOW verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecisionLayer {
    Confidence,
    MarketData,
    Drawdown,
    Capacity,
    ScanLimit,
    Stops,
    Expectancy,
}

impl std::fmt::Display for DecisionLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Confidence => write!(f, "CONFIDENCE"),
            Self::MarketData => write!(f, "MARKET_DATA"),
            Self::Drawdown => write!(f, "DRAWDOWN"),
            Self::Capacity => write!(f, "CAPACITY"),
            Self::ScanLimit => write!(f, "SCAN_LIMIT"),
            Self::Stops => write!(f, "STOPS"),
            Self::Expectancy => write!(f, "EXPECTANCY"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdmissionDecision {
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub strategy_id: StrategyId,
    pub confidence: f64,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<DecisionLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Intent emitted for an ALLOW.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl AdmissionDecision {
    fn base(signal: &CandidateSignal, verdict: Verdict, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            strategy_id: signal.strategy_id,
            confidence: signal.confidence,
            verdict,
            layer: None,
            reason: None,
            intent_id: None,
            created_at: at,
        }
    }

    pub fn allow(signal: &CandidateSignal, intent_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            intent_id: Some(intent_id),
            ..Self::base(signal, Verdict::Allow, at)
        }
    }

    pub fn blocked(
        signal: &CandidateSignal,
        layer: DecisionLayer,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            layer: Some(layer),
            reason: Some(reason.into()),
            ..Self::base(signal, Verdict::Block, at)
        }
    }

    pub fn skipped(
        signal: &CandidateSignal,
        layer: DecisionLayer,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            layer: Some(layer),
            reason: Some(reason.into()),
            ..Self::base(signal, Verdict::Skip, at)
        }
    }

    /// Turn an ALLOW into a BLOCK after the fact. The intent id stays for
    /// the audit trail.
    pub fn withdraw(&mut self, layer: DecisionLayer, reason: impl Into<String>) {
        self.verdict = Verdict::Block;
        self.layer = Some(layer);
        self.reason = Some(reason.into());
    }

    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}
