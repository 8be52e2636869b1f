use crate::receipts::ReceiptStatus;

/// Fixed transition table for the receipt lifecycle
const TRANSITIONS: &[(ReceiptStatus, ReceiptStatus)] = &[
    (ReceiptStatus::Pending, ReceiptStatus::Approved),
    (ReceiptStatus::Pending, ReceiptStatus::Rejected),
    (ReceiptStatus::Pending, ReceiptStatus::Flagged),
    (ReceiptStatus::Flagged, ReceiptStatus::Approved),
    (ReceiptStatus::Flagged, ReceiptStatus::Rejected),
];

/// Service for validating receipt status transitions
pub struct ReceiptStateMachine;

impl ReceiptStateMachine {
    /// Check if a status transition is valid
    ///
    /// # Valid Transitions
    /// - Pending → Approved, Rejected, Flagged
    /// - Flagged → Approved, Rejected (reviewer decision)
    /// - Approved, Rejected → nothing
    ///
    /// Self-transitions are not in the table; re-settling a receipt is
    /// reported as an invalid transition rather than silently accepted.
    pub fn is_valid_transition(from: ReceiptStatus, to: ReceiptStatus) -> bool {
        TRANSITIONS.contains(&(from, to))
    }

    /// Attempt to transition from one status to another
    pub fn transition(from: ReceiptStatus, to: ReceiptStatus) -> Result<ReceiptStatus, String> {
        if Self::is_valid_transition(from, to) {
            Ok(to)
        } else {
            Err(format!(
                "Invalid receipt status transition from {} to {}",
                from, to
            ))
        }
    }

    /// Statuses from which `to` can be reached
    pub fn sources_for(to: ReceiptStatus) -> Vec<ReceiptStatus> {
        TRANSITIONS
            .iter()
            .filter(|(_, target)| *target == to)
            .map(|(source, _)| *source)
            .collect()
    }

    /// Approved and rejected receipts never change again
    pub fn is_terminal(status: ReceiptStatus) -> bool {
        !TRANSITIONS.iter().any(|(source, _)| *source == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_to_approved() {
        assert!(ReceiptStateMachine::is_valid_transition(
            ReceiptStatus::Pending,
            ReceiptStatus::Approved
        ));
    }

    #[test]
    fn test_pending_to_rejected() {
        assert!(ReceiptStateMachine::is_valid_transition(
            ReceiptStatus::Pending,
            ReceiptStatus::Rejected
        ));
    }

    #[test]
    fn test_pending_to_flagged() {
        assert!(ReceiptStateMachine::is_valid_transition(
            ReceiptStatus::Pending,
            ReceiptStatus::Flagged
        ));
    }

    #[test]
    fn test_flagged_reviewer_decisions() {
        assert!(ReceiptStateMachine::is_valid_transition(
            ReceiptStatus::Flagged,
            ReceiptStatus::Approved
        ));
        assert!(ReceiptStateMachine::is_valid_transition(
            ReceiptStatus::Flagged,
            ReceiptStatus::Rejected
        ));
    }

    #[test]
    fn test_flagged_cannot_return_to_pending() {
        assert!(!ReceiptStateMachine::is_valid_transition(
            ReceiptStatus::Flagged,
            ReceiptStatus::Pending
        ));
    }

    #[test]
    fn test_approved_is_terminal() {
        for to in [
            ReceiptStatus::Pending,
            ReceiptStatus::Approved,
            ReceiptStatus::Rejected,
            ReceiptStatus::Flagged,
        ] {
            assert!(!ReceiptStateMachine::is_valid_transition(ReceiptStatus::Approved, to));
        }
        assert!(ReceiptStateMachine::is_terminal(ReceiptStatus::Approved));
    }

    #[test]
    fn test_rejected_is_terminal() {
        for to in [
            ReceiptStatus::Pending,
            ReceiptStatus::Approved,
            ReceiptStatus::Rejected,
            ReceiptStatus::Flagged,
        ] {
            assert!(!ReceiptStateMachine::is_valid_transition(ReceiptStatus::Rejected, to));
        }
        assert!(ReceiptStateMachine::is_terminal(ReceiptStatus::Rejected));
    }

    #[test]
    fn test_pending_and_flagged_are_not_terminal() {
        assert!(!ReceiptStateMachine::is_terminal(ReceiptStatus::Pending));
        assert!(!ReceiptStateMachine::is_terminal(ReceiptStatus::Flagged));
    }

    #[test]
    fn test_sources_for() {
        assert_eq!(
            ReceiptStateMachine::sources_for(ReceiptStatus::Approved),
            vec![ReceiptStatus::Pending, ReceiptStatus::Flagged]
        );
        assert_eq!(
            ReceiptStateMachine::sources_for(ReceiptStatus::Flagged),
            vec![ReceiptStatus::Pending]
        );
        assert!(ReceiptStateMachine::sources_for(ReceiptStatus::Pending).is_empty());
    }

    #[test]
    fn test_transition_error_message() {
        let err = ReceiptStateMachine::transition(ReceiptStatus::Approved, ReceiptStatus::Rejected)
            .unwrap_err();
        assert_eq!(err, "Invalid receipt status transition from approved to rejected");
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn receipt_status_strategy() -> impl Strategy<Value = ReceiptStatus> {
        prop_oneof![
            Just(ReceiptStatus::Pending),
            Just(ReceiptStatus::Approved),
            Just(ReceiptStatus::Rejected),
            Just(ReceiptStatus::Flagged),
        ]
    }

    /// Nothing leaves a terminal status
    #[test]
    fn prop_terminal_statuses_have_no_exits() {
        proptest!(|(from in receipt_status_strategy(), to in receipt_status_strategy())| {
            if ReceiptStateMachine::is_terminal(from) {
                prop_assert!(ReceiptStateMachine::transition(from, to).is_err());
            }
        });
    }

    /// `transition` agrees with `is_valid_transition`
    #[test]
    fn prop_transition_matches_table() {
        proptest!(|(from in receipt_status_strategy(), to in receipt_status_strategy())| {
            let valid = ReceiptStateMachine::is_valid_transition(from, to);
            match ReceiptStateMachine::transition(from, to) {
                Ok(next) => {
                    prop_assert!(valid);
                    prop_assert_eq!(next, to);
                }
                Err(_) => prop_assert!(!valid),
            }
        });
    }

    /// No status transitions to itself
    #[test]
    fn prop_no_self_transitions() {
        proptest!(|(status in receipt_status_strategy())| {
            prop_assert!(!ReceiptStateMachine::is_valid_transition(status, status));
        });
    }
}
