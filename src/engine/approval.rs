//! Human-in-the-loop approval gate.
//!
//! A single-slot mailbox: the engine arms the gate when a stage needs
//! review, a developer signals one decision, and the waiting run consumes
//! it. Signals that arrive while the gate is disarmed are dropped, so a
//! decision meant for one stage can never satisfy a later one.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

/// A developer's answer to a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Decision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approve" | "approved" => Ok(Decision::Approve),
            "reject" | "rejected" => Ok(Decision::Reject),
            _ => anyhow::bail!("Invalid decision '{}'. Valid values: approve, reject", s),
        }
    }
}

/// Contents of the mailbox slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl From<Decision> for ApprovalDecision {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approve => ApprovalDecision::Approved,
            Decision::Reject => ApprovalDecision::Rejected,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no decision within {}s", .0.as_secs())]
pub struct GateTimeout(pub Duration);

#[derive(Debug, Default)]
struct Slot {
    armed: bool,
    decision: ApprovalDecision,
}

#[derive(Debug, Default)]
pub struct ApprovalGate {
    slot: Mutex<Slot>,
    notify: Notify,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open the gate for a fresh decision.
    pub fn arm(&self) {
        let mut slot = self.slot();
        slot.armed = true;
        slot.decision = ApprovalDecision::Pending;
    }

    /// True while the gate is armed and nobody has decided yet.
    pub fn is_pending(&self) -> bool {
        let slot = self.slot();
        slot.armed && slot.decision == ApprovalDecision::Pending
    }

    /// Deliver a decision. Returns false when the gate is disarmed or
    /// already decided; the first accepted signal wins.
    pub fn signal(&self, decision: Decision) -> bool {
        let mut slot = self.slot();
        if !slot.armed || slot.decision != ApprovalDecision::Pending {
            debug!(%decision, armed = slot.armed, "Dropping approval signal");
            return false;
        }
        slot.decision = decision.into();
        drop(slot);
        self.notify.notify_one();
        true
    }

    fn take(&self) -> Option<Decision> {
        let mut slot = self.slot();
        let decision = match slot.decision {
            ApprovalDecision::Pending => return None,
            ApprovalDecision::Approved => Decision::Approve,
            ApprovalDecision::Rejected => Decision::Reject,
        };
        slot.decision = ApprovalDecision::Pending;
        slot.armed = false;
        Some(decision)
    }

    /// Wait for a decision, consuming it. Arms the gate if needed; always
    /// leaves it disarmed and pending.
    pub async fn wait(&self, timeout: Duration) -> Result<Decision, GateTimeout> {
        {
            let mut slot = self.slot();
            slot.armed = true;
        }

        let waited = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if let Some(decision) = self.take() {
                    return decision;
                }
                notified.await;
            }
        })
        .await;

        match waited {
            Ok(decision) => Ok(decision),
            Err(_) => {
                let mut slot = self.slot();
                slot.armed = false;
                slot.decision = ApprovalDecision::Pending;
                Err(GateTimeout(timeout))
            }
        }
    }
}
