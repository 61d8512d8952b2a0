//! Authoritative status transition table
//!
//! `failed` is compensation-terminal for the ledger but permits a single
//! administrative transition to `rejected` for bookkeeping.

use crate::types::InvoiceStatus;

/// True if the transition is permitted
pub fn can_transition(from: InvoiceStatus, to: InvoiceStatus) -> bool {
    use InvoiceStatus::*;

    match from {
        Pending => matches!(to, Accepted | Rejected | Expired | FraudReview),
        FraudReview => matches!(to, Accepted | Rejected),
        Accepted => matches!(to, Settled | Failed),
        Failed => matches!(to, Rejected),
        Settled | Rejected | Expired => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InvoiceStatus::*;

    #[test]
    fn test_pending_transitions() {
        assert!(can_transition(Pending, Accepted));
        assert!(can_transition(Pending, Rejected));
        assert!(can_transition(Pending, Expired));
        assert!(can_transition(Pending, FraudReview));
        assert!(!can_transition(Pending, Settled));
        assert!(!can_transition(Pending, Failed));
    }

    #[test]
    fn test_fraud_review_transitions() {
        assert!(can_transition(FraudReview, Accepted));
        assert!(can_transition(FraudReview, Rejected));
        assert!(!can_transition(FraudReview, Settled));
        assert!(!can_transition(FraudReview, Expired));
    }

    #[test]
    fn test_accepted_transitions() {
        assert!(can_transition(Accepted, Settled));
        assert!(can_transition(Accepted, Failed));
        assert!(!can_transition(Accepted, Rejected));
        assert!(!can_transition(Accepted, Pending));
    }

    #[test]
    fn test_failed_admin_exit() {
        assert!(can_transition(Failed, Rejected));
        assert!(!can_transition(Failed, Accepted));
        assert!(!can_transition(Failed, Settled));
    }

    #[test]
    fn test_terminal_states_absorb() {
        for terminal in [Settled, Rejected, Expired] {
            for target in [
                Pending, FraudReview, Accepted, Settled, Failed, Rejected, Expired,
            ] {
                assert!(!can_transition(terminal, target));
            }
        }
    }
}
