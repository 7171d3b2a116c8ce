//! Session presence state and its deadline.
//!
//! Every roster code starts absent and can only move to present. The tracker
//! is consumed by [`SessionTracker::finalize`], so a session is finalized
//! exactly once and nothing can be observed afterwards.

use crate::types::AttendanceStatus;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("session duration must be positive")]
    ZeroDuration,
    #[error("session duration {0:?} is out of range")]
    DurationOutOfRange(Duration),
}

/// Monotonic time source for the session deadline.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Outcome of one deadline check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Deadline,
}

/// Effect of one `observe` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    NewlyPresent,
    AlreadyPresent,
    /// Code is not on this session's roster; ignored.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Deadline,
    Cancelled,
}

/// Loop counters reported with the finalized session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub cycles: u64,
    pub frames_processed: u64,
    pub frames_missed: u64,
    pub frames_failed: u64,
    pub faces_seen: u64,
    pub matches: u64,
}

#[derive(Debug, Clone)]
struct SessionState {
    present: BTreeSet<String>,
    absent: BTreeSet<String>,
    started: Instant,
    deadline: Instant,
    started_at: NaiveDateTime,
}

/// Owns the present/absent split for one session.
#[derive(Debug)]
pub struct SessionTracker {
    id: Uuid,
    state: SessionState,
}

impl SessionTracker {
    /// Start a session now: every roster code absent, deadline `duration` away.
    pub fn start<I, S>(roster: I, duration: Duration, clock: &dyn Clock) -> Result<Self, SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let started_at = chrono::Local::now().naive_local();
        Self::start_at(roster, duration, clock.now(), started_at)
    }

    /// Start a session at an explicit instant and calendar timestamp.
    pub fn start_at<I, S>(
        roster: I,
        duration: Duration,
        started: Instant,
        started_at: NaiveDateTime,
    ) -> Result<Self, SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if duration.is_zero() {
            return Err(SessionError::ZeroDuration);
        }
        let deadline = started
            .checked_add(duration)
            .ok_or(SessionError::DurationOutOfRange(duration))?;
        let id = Uuid::new_v4();
        let absent: BTreeSet<String> = roster.into_iter().map(Into::into).collect();
        tracing::info!(session = %id, roster = absent.len(), ?duration, "session started");

        Ok(Self {
            id,
            state: SessionState {
                present: BTreeSet::new(),
                absent,
                started,
                deadline,
                started_at,
            },
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> NaiveDateTime {
        self.state.started_at
    }

    /// Mark `code` present. Repeat calls are no-ops.
    pub fn observe(&mut self, code: &str) -> Observation {
        if self.state.present.contains(code) {
            return Observation::AlreadyPresent;
        }
        if !self.state.absent.remove(code) {
            tracing::debug!(code, "observation for code outside roster ignored");
            return Observation::Unknown;
        }
        self.state.present.insert(code.to_string());
        tracing::info!(session = %self.id, code, "member marked present");
        Observation::NewlyPresent
    }

    /// Check the deadline. There is no other termination condition.
    pub fn tick(&self, now: Instant) -> Tick {
        if now >= self.state.deadline {
            Tick::Deadline
        } else {
            Tick::Continue
        }
    }

    pub fn is_present(&self, code: &str) -> bool {
        self.state.present.contains(code)
    }

    pub fn present(&self) -> &BTreeSet<String> {
        &self.state.present
    }

    pub fn absent(&self) -> &BTreeSet<String> {
        &self.state.absent
    }

    /// Freeze the split. Consumes the tracker.
    pub fn finalize(self, now: Instant, end: EndReason, stats: SessionStats) -> FinalizedSession {
        let elapsed = now.saturating_duration_since(self.state.started);
        tracing::info!(
            session = %self.id,
            present = self.state.present.len(),
            absent = self.state.absent.len(),
            ?elapsed,
            ?end,
            "session finalized"
        );
        FinalizedSession {
            id: self.id,
            present: self.state.present,
            absent: self.state.absent,
            started_at: self.state.started_at,
            elapsed,
            end,
            stats,
        }
    }
}

/// Frozen outcome of a session, ready for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizedSession {
    pub id: Uuid,
    pub present: BTreeSet<String>,
    pub absent: BTreeSet<String>,
    pub started_at: NaiveDateTime,
    pub elapsed: Duration,
    pub end: EndReason,
    pub stats: SessionStats,
}

impl FinalizedSession {
    /// Status of a code that was on the session roster; `None` otherwise.
    pub fn status(&self, code: &str) -> Option<AttendanceStatus> {
        if self.present.contains(code) {
            Some(AttendanceStatus::Present)
        } else if self.absent.contains(code) {
            Some(AttendanceStatus::Absent)
        } else {
            None
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.end == EndReason::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2025, 3, 14)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .unwrap()
    }

    fn tracker(codes: &[&str], secs: u64) -> (SessionTracker, Instant) {
        let start = Instant::now();
        let t = SessionTracker::start_at(codes.iter().copied(), Duration::from_secs(secs), start, t0())
            .unwrap();
        (t, start)
    }

    #[test]
    fn test_all_absent_initially() {
        let (t, _) = tracker(&["A", "B", "C"], 10);
        assert!(t.present().is_empty());
        assert_eq!(t.absent().len(), 3);
    }

    #[test]
    fn test_observe_is_idempotent() {
        let (mut t, _) = tracker(&["A", "B"], 10);
        assert_eq!(t.observe("A"), Observation::NewlyPresent);
        assert_eq!(t.observe("A"), Observation::AlreadyPresent);
        assert_eq!(t.present().iter().collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(t.absent().iter().collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn test_unknown_code_ignored() {
        let (mut t, _) = tracker(&["A"], 10);
        assert_eq!(t.observe("Z"), Observation::Unknown);
        assert!(t.present().is_empty());
        assert_eq!(t.absent().len(), 1);
    }

    #[test]
    fn test_sets_stay_disjoint_and_complete() {
        let roster = ["A", "B", "C", "D"];
        let (mut t, _) = tracker(&roster, 10);
        for code in ["C", "A", "C", "Z", "A"] {
            t.observe(code);
            assert!(t.present().is_disjoint(t.absent()));
            let union: BTreeSet<&str> =
                t.present().iter().chain(t.absent()).map(String::as_str).collect();
            assert_eq!(union, roster.into_iter().collect::<BTreeSet<&str>>());
        }
        assert!(t.is_present("A") && t.is_present("C"));
    }

    #[test]
    fn test_tick_deadline() {
        let (t, start) = tracker(&["A"], 10);
        assert_eq!(t.tick(start), Tick::Continue);
        assert_eq!(t.tick(start + Duration::from_millis(9_999)), Tick::Continue);
        assert_eq!(t.tick(start + Duration::from_secs(10)), Tick::Deadline);
        assert_eq!(t.tick(start + Duration::from_secs(60)), Tick::Deadline);
    }

    #[test]
    fn test_zero_duration_rejected() {
        let err = SessionTracker::start_at(["A"], Duration::ZERO, Instant::now(), t0()).unwrap_err();
        assert_eq!(err, SessionError::ZeroDuration);
    }

    #[test]
    fn test_finalize_freezes_split() {
        let (mut t, start) = tracker(&["A", "B"], 10);
        t.observe("B");
        let done = t.finalize(start + Duration::from_secs(11), EndReason::Deadline, SessionStats::default());
        assert_eq!(done.status("A"), Some(AttendanceStatus::Absent));
        assert_eq!(done.status("B"), Some(AttendanceStatus::Present));
        assert_eq!(done.status("Z"), None);
        assert_eq!(done.elapsed, Duration::from_secs(11));
        assert_eq!(done.started_at, t0());
        assert!(!done.was_cancelled());
    }
}
