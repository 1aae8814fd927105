//! Per-session outcome reporting
//!
//! Every bulk operation returns a [`BulkReport`] with exactly one
//! [`SessionOutcome`] per session it attempted. Failures of single sessions
//! are recorded here rather than returned as errors.

use std::fmt;
use std::time::Duration;

/// Result of one bulk operation for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session: String,
    pub success: bool,
    /// Human-readable status
    pub detail: String,
}

impl SessionOutcome {
    pub fn ok(session: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(session: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            success: false,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.success { "ok" } else { "error" };
        write!(f, "[{}] {}: {}", mark, self.session, self.detail)
    }
}

/// Outcomes of one bulk operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkReport {
    pub operation: &'static str,
    pub outcomes: Vec<SessionOutcome>,
}

impl BulkReport {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            outcomes: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: SessionOutcome) {
        self.outcomes.push(outcome);
    }

    /// Number of sessions that succeeded
    pub fn successful(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    /// Number of sessions that failed
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.successful()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Outcome recorded for `session`
    pub fn outcome(&self, session: &str) -> Option<&SessionOutcome> {
        self.outcomes.iter().find(|o| o.session == session)
    }
}

impl fmt::Display for BulkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} succeeded",
            self.operation,
            self.successful(),
            self.outcomes.len()
        )?;
        for outcome in &self.outcomes {
            write!(f, "\n  {}", outcome)?;
        }
        Ok(())
    }
}

/// Read-only view of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub name: String,
    pub display_name: String,
    pub phone_number: String,
    pub connected: bool,
    pub call_control_connected: bool,
    /// Title of the channel the session is in a call with, and for how long
    pub in_call: Option<(String, Duration)>,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let online = |up: bool| if up { "online" } else { "offline" };
        write!(
            f,
            "{} ({}) connection={} calls={}",
            self.name,
            self.display_name,
            online(self.connected),
            online(self.call_control_connected)
        )?;
        if let Some((title, duration)) = &self.in_call {
            write!(f, " in-call={} for {}s", title, duration.as_secs())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let mut report = BulkReport::new("start_all");
        report.push(SessionOutcome::ok("a", "online"));
        report.push(SessionOutcome::failed("b", "connection refused"));
        report.push(SessionOutcome::ok("c", "online"));

        assert_eq!(report.successful(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.len(), 3);
        assert!(!report.outcome("b").unwrap().success);
    }

    #[test]
    fn test_display() {
        let mut report = BulkReport::new("leave_all");
        report.push(SessionOutcome::failed("acc1", "not in a call"));

        let printed = report.to_string();
        assert!(printed.starts_with("leave_all: 0/1 succeeded"));
        assert!(printed.contains("[error] acc1: not in a call"));
    }
}
