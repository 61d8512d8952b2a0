//! System-wide freeze switch
//!
//! Consistency failures do not return to the caller: they halt intake.
//! New acceptances are refused while frozen; in-flight settlements are
//! allowed to drain to a terminal state.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Freeze state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreezeStatus {
    /// Active
    pub frozen: bool,
    /// Reason
    pub reason: Option<String>,
    /// Frozen at
    pub frozen_at: Option<DateTime<Utc>>,
    /// Frozen by (invariant id, operator, etc.)
    pub frozen_by: Option<String>,
}

/// Process-wide freeze switch
pub struct FreezeSwitch {
    status: RwLock<FreezeStatus>,
}

impl FreezeSwitch {
    /// Create in the thawed state
    pub fn new() -> Self {
        Self {
            status: RwLock::new(FreezeStatus {
                frozen: false,
                reason: None,
                frozen_at: None,
                frozen_by: None,
            }),
        }
    }

    /// Is the system frozen
    pub fn is_frozen(&self) -> bool {
        self.status.read().frozen
    }

    /// Halt the system
    pub fn freeze(&self, reason: impl Into<String>, by: impl Into<String>) {
        let reason = reason.into();
        let by = by.into();

        tracing::error!(%reason, %by, "SYSTEM FREEZE activated");

        *self.status.write() = FreezeStatus {
            frozen: true,
            reason: Some(reason),
            frozen_at: Some(Utc::now()),
            frozen_by: Some(by),
        };
    }

    /// Resume after operator intervention
    pub fn thaw(&self, by: impl Into<String>) {
        let by: String = by.into();
        tracing::warn!(%by, "System freeze lifted");

        *self.status.write() = FreezeStatus {
            frozen: false,
            reason: None,
            frozen_at: None,
            frozen_by: None,
        };
    }

    /// Refuse new work while frozen
    pub fn check_admission(&self) -> Result<()> {
        let status = self.status.read();
        if status.frozen {
            return Err(Error::Frozen(
                status
                    .reason
                    .clone()
                    .unwrap_or_else(|| "No reason recorded".to_string()),
            ));
        }
        Ok(())
    }

    /// Current state
    pub fn status(&self) -> FreezeStatus {
        self.status.read().clone()
    }
}

impl Default for FreezeSwitch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freeze_refuses_admission() {
        let switch = FreezeSwitch::new();

        assert!(!switch.is_frozen());
        assert!(switch.check_admission().is_ok());

        switch.freeze("reconciliation imbalance", "ledger-balanced");

        assert!(switch.is_frozen());
        assert!(switch.check_admission().is_err());

        switch.thaw("ops");
        assert!(switch.check_admission().is_ok());
    }
}
