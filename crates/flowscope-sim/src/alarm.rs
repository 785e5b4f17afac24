//! Alarm Correlator
//!
//! Turns anomalies into operator-facing alarms and enforces the alarm
//! lifecycle:
//!
//! ```text
//!   open ──► acknowledged ──► investigating ──► resolved
//!     │            │                                ▲
//!     │            └────────────────────────────────┤
//!     ├──► investigating                            │
//!     └─────────────────────────────────────────────┘
//! ```
//!
//! `resolved` is terminal. Every accepted operation appends exactly one
//! entry to the alarm's action trail; a rejected one leaves the alarm
//! untouched.

use crate::core::{Alarm, AlarmAction, AlarmActionKind, AlarmStatus, Anomaly, Severity, random_id};
use crate::error::SimError;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const ESCALATED_TAG: &str = "escalated";

/// Operator command against an alarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "value")]
pub enum AlarmCommand {
    Acknowledge,
    Investigate,
    Resolve { note: Option<String> },
    Escalate,
    Comment(String),
    Assign(String),
}

impl AlarmCommand {
    pub fn kind(&self) -> AlarmActionKind {
        match self {
            AlarmCommand::Acknowledge => AlarmActionKind::Acknowledge,
            AlarmCommand::Investigate => AlarmActionKind::Investigate,
            AlarmCommand::Resolve { .. } => AlarmActionKind::Resolve,
            AlarmCommand::Escalate => AlarmActionKind::Escalate,
            AlarmCommand::Comment(_) => AlarmActionKind::Comment,
            AlarmCommand::Assign(_) => AlarmActionKind::Assign,
        }
    }
}

/// Status an operation moves the alarm to, or `None` when it is not allowed
/// from `from`. Non-status operations map to the current status.
pub fn next_status(from: AlarmStatus, action: AlarmActionKind) -> Option<AlarmStatus> {
    use AlarmActionKind as A;
    use AlarmStatus as S;

    match (from, action) {
        (S::Resolved, _) => None,
        (S::Open, A::Acknowledge) => Some(S::Acknowledged),
        (S::Open | S::Acknowledged, A::Investigate) => Some(S::Investigating),
        (_, A::Resolve) => Some(S::Resolved),
        (status, A::Escalate | A::Comment | A::Assign) => Some(status),
        _ => None,
    }
}

fn severity_tag(severity: Severity) -> String {
    format!("severity:{severity}")
}

/// Build an open alarm for `anomaly`
pub fn correlate<R: Rng + ?Sized>(rng: &mut R, anomaly: &Anomaly) -> Alarm {
    let tags = BTreeSet::from([
        anomaly.anomaly_type.as_str().to_string(),
        severity_tag(anomaly.severity),
    ]);

    Alarm {
        id: random_id(rng),
        anomaly_id: anomaly.id,
        anomaly_type: anomaly.anomaly_type,
        status: AlarmStatus::Open,
        severity: anomaly.severity,
        title: format!("{} {} anomaly", anomaly.severity.title(), anomaly.anomaly_type),
        description: anomaly.description.clone(),
        created_at: anomaly.timestamp,
        updated_at: anomaly.timestamp,
        assigned_to: None,
        tags,
        actions: Vec::new(),
    }
}

impl Alarm {
    /// Apply `command` on behalf of `user`
    pub fn apply(&mut self, command: AlarmCommand, user: &str, at: DateTime<Utc>) -> Result<(), SimError> {
        let kind = command.kind();
        let next = next_status(self.status, kind).ok_or(SimError::InvalidTransition {
            from: self.status,
            action: kind,
        })?;

        let note = match command {
            AlarmCommand::Acknowledge | AlarmCommand::Escalate => None,
            AlarmCommand::Investigate => {
                if self.assigned_to.is_none() {
                    self.assigned_to = Some(user.to_string());
                }
                None
            }
            AlarmCommand::Resolve { note } => note,
            AlarmCommand::Comment(text) => Some(text),
            AlarmCommand::Assign(assignee) => {
                self.assigned_to = Some(assignee.clone());
                Some(format!("assigned to {assignee}"))
            }
        };

        if kind == AlarmActionKind::Escalate {
            self.tags.remove(&severity_tag(self.severity));
            self.severity = self.severity.escalated();
            self.tags.insert(severity_tag(self.severity));
            self.tags.insert(ESCALATED_TAG.to_string());
        }

        tracing::debug!(alarm = %self.id, from = %self.status, to = %next, action = %kind, user, "Alarm transition");

        self.status = next;
        self.updated_at = at;
        self.actions.push(AlarmAction {
            user: user.to_string(),
            kind,
            timestamp: at,
            note,
        });
        Ok(())
    }

    pub fn acknowledge(&mut self, user: &str, at: DateTime<Utc>) -> Result<(), SimError> {
        self.apply(AlarmCommand::Acknowledge, user, at)
    }

    pub fn investigate(&mut self, user: &str, at: DateTime<Utc>) -> Result<(), SimError> {
        self.apply(AlarmCommand::Investigate, user, at)
    }

    pub fn resolve(&mut self, user: &str, at: DateTime<Utc>, note: Option<String>) -> Result<(), SimError> {
        self.apply(AlarmCommand::Resolve { note }, user, at)
    }

    pub fn escalate(&mut self, user: &str, at: DateTime<Utc>) -> Result<(), SimError> {
        self.apply(AlarmCommand::Escalate, user, at)
    }

    pub fn comment(&mut self, user: &str, at: DateTime<Utc>, text: impl Into<String>) -> Result<(), SimError> {
        self.apply(AlarmCommand::Comment(text.into()), user, at)
    }

    pub fn assign(&mut self, user: &str, at: DateTime<Utc>, assignee: impl Into<String>) -> Result<(), SimError> {
        self.apply(AlarmCommand::Assign(assignee.into()), user, at)
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}
