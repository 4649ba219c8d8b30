// =============================================================================
// Session Context: trading session and its volatility multiplier
// =============================================================================
//
// The session table is static configuration. At construction it is expanded
// into a per-minute lookup over the UTC day; a table that leaves any minute
// uncovered is rejected, so `resolve` never fails afterwards.
//
// Precedence: an Overlap window beats single-session windows. Among single
// sessions the first matching table entry wins.
// =============================================================================

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

const MINUTES_PER_DAY: usize = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionName {
    Asian,
    London,
    Overlap,
    NewYork,
}

impl std::fmt::Display for SessionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asian => write!(f, "ASIAN"),
            Self::London => write!(f, "LONDON"),
            Self::Overlap => write!(f, "OVERLAP"),
            Self::NewYork => write!(f, "NEWYORK"),
        }
    }
}

/// One row of the session table. `utc_end` is exclusive; a window whose end
/// precedes its start wraps past midnight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub name: SessionName,
    pub utc_start: NaiveTime,
    pub utc_end: NaiveTime,
    pub volatility_multiplier: f64,
}

impl SessionWindow {
    pub fn new(name: SessionName, start_hour: u32, end_hour: u32, multiplier: f64) -> Self {
        Self {
            name,
            utc_start: hm(start_hour, 0),
            utc_end: hm(end_hour, 0),
            volatility_multiplier: multiplier,
        }
    }

    fn contains_minute(&self, minute: u32) -> bool {
        let start = minute_of(self.utc_start);
        let end = minute_of(self.utc_end);
        if start < end {
            minute >= start && minute < end
        } else {
            minute >= start || minute < end
        }
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour % 24, minute % 60, 0).unwrap_or(NaiveTime::MIN)
}

fn minute_of(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

/// Default table (UTC): Asian 21-08, London 08-16, New York 13-21,
/// London/New York overlap 13-16.
pub fn default_sessions() -> Vec<SessionWindow> {
    vec![
        SessionWindow::new(SessionName::Asian, 21, 8, 0.7),
        SessionWindow::new(SessionName::London, 8, 16, 1.2),
        SessionWindow::new(SessionName::NewYork, 13, 21, 1.1),
        SessionWindow::new(SessionName::Overlap, 13, 16, 1.5),
    ]
}

/// Resolved session table.
#[derive(Debug, Clone)]
pub struct SessionContext {
    windows: Vec<SessionWindow>,
    by_minute: Vec<usize>,
}

impl SessionContext {
    pub fn new(windows: Vec<SessionWindow>) -> Result<Self, ConfigError> {
        let mut problems = Vec::new();

        for w in &windows {
            if w.utc_start == w.utc_end {
                problems.push(format!("session {} has zero length", w.name));
            }
            if !(w.volatility_multiplier > 0.0 && w.volatility_multiplier <= 3.0) {
                problems.push(format!(
                    "session {} multiplier {} outside (0, 3]",
                    w.name, w.volatility_multiplier
                ));
            }
        }

        let mut by_minute = Vec::with_capacity(MINUTES_PER_DAY);
        let mut first_gap: Option<u32> = None;
        for minute in 0..MINUTES_PER_DAY as u32 {
            let mut chosen: Option<usize> = None;
            for (idx, w) in windows.iter().enumerate() {
                if w.utc_start == w.utc_end || !w.contains_minute(minute) {
                    continue;
                }
                match chosen {
                    None => chosen = Some(idx),
                    Some(prev)
                        if w.name == SessionName::Overlap
                            && windows[prev].name != SessionName::Overlap =>
                    {
                        chosen = Some(idx)
                    }
                    Some(_) => {}
                }
            }
            match chosen {
                Some(idx) => by_minute.push(idx),
                None => {
                    first_gap.get_or_insert(minute);
                    by_minute.push(0);
                }
            }
        }

        if let Some(m) = first_gap {
            problems.push(format!(
                "session table leaves {:02}:{:02} UTC uncovered",
                m / 60,
                m % 60
            ));
        }

        if !problems.is_empty() {
            return Err(ConfigError(problems));
        }

        debug!(windows = windows.len(), "session table resolved");
        Ok(Self { windows, by_minute })
    }

    /// Session in force at `ts`.
    pub fn resolve(&self, ts: DateTime<Utc>) -> &SessionWindow {
        let minute = (ts.hour() * 60 + ts.minute()) as usize;
        &self.windows[self.by_minute[minute % MINUTES_PER_DAY]]
    }

    pub fn windows(&self) -> &[SessionWindow] {
        &self.windows
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, 0).unwrap()
    }

    #[test]
    fn default_table_resolves_every_session() {
        let ctx = SessionContext::new(default_sessions()).unwrap();
        assert_eq!(ctx.resolve(at(2, 0)).name, SessionName::Asian);
        assert_eq!(ctx.resolve(at(22, 30)).name, SessionName::Asian);
        assert_eq!(ctx.resolve(at(9, 0)).name, SessionName::London);
        assert_eq!(ctx.resolve(at(18, 0)).name, SessionName::NewYork);
    }

    #[test]
    fn overlap_takes_precedence() {
        let ctx = SessionContext::new(default_sessions()).unwrap();
        let s = ctx.resolve(at(14, 15));
        assert_eq!(s.name, SessionName::Overlap);
        assert!((s.volatility_multiplier - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn window_end_is_exclusive() {
        let ctx = SessionContext::new(default_sessions()).unwrap();
        assert_eq!(ctx.resolve(at(8, 0)).name, SessionName::London);
        assert_eq!(ctx.resolve(at(7, 59)).name, SessionName::Asian);
        assert_eq!(ctx.resolve(at(16, 0)).name, SessionName::NewYork);
        assert_eq!(ctx.resolve(at(21, 0)).name, SessionName::Asian);
    }

    #[test]
    fn gap_in_table_is_rejected() {
        let windows = vec![
            SessionWindow::new(SessionName::London, 8, 16, 1.2),
            SessionWindow::new(SessionName::NewYork, 13, 21, 1.1),
        ];
        let err = SessionContext::new(windows).unwrap_err();
        assert!(err.to_string().contains("21:00"), "got {}", err);
    }

    #[test]
    fn bad_multiplier_is_rejected() {
        let mut windows = default_sessions();
        windows[0].volatility_multiplier = 0.0;
        assert!(SessionContext::new(windows).is_err());
    }
}
