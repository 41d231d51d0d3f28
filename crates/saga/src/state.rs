//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of an order saga.
///
/// State transitions:
/// ```text
/// Started ──► ReservationRequested ──┬──► Completed
///                                    └──► Compensating ──┬──► Compensated
///                                                        └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// OrderPlaced observed, nothing requested yet.
    #[default]
    Started,

    /// Waiting for the inventory context to answer every reservation.
    ReservationRequested,

    /// Every SKU was reserved (terminal state).
    Completed,

    /// A reservation failed or the deadline passed; undoing the order.
    Compensating,

    /// The order was cancelled and all reserved stock released (terminal state).
    Compensated,

    /// Compensation could not be finished. Needs an operator (terminal state).
    Failed,
}

impl SagaState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Compensated | SagaState::Failed
        )
    }

    /// Terminal states that are cleaned up automatically. Failed sagas stay
    /// visible until an operator deals with them.
    pub fn is_archivable(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Compensated)
    }

    /// Returns true if compensation may start from this state.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaState::Started | SagaState::ReservationRequested)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Started => "Started",
            SagaState::ReservationRequested => "ReservationRequested",
            SagaState::Completed => "Completed",
            SagaState::Compensating => "Compensating",
            SagaState::Compensated => "Compensated",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress of the reservation for one SKU of the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LineStatus {
    /// ReserveStock issued, no outcome yet.
    #[default]
    Requested,
    Reserved,
    Rejected,
    /// Reserved, then given back during compensation.
    Released,
}

impl LineStatus {
    /// Nothing is left to undo for this line.
    pub fn is_settled(&self) -> bool {
        matches!(self, LineStatus::Rejected | LineStatus::Released)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Requested => "Requested",
            LineStatus::Reserved => "Reserved",
            LineStatus::Rejected => "Rejected",
            LineStatus::Released => "Released",
        }
    }
}

impl std::fmt::Display for LineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_started() {
        assert_eq!(SagaState::default(), SagaState::Started);
    }

    #[test]
    fn test_can_compensate() {
        assert!(SagaState::Started.can_compensate());
        assert!(SagaState::ReservationRequested.can_compensate());
        assert!(!SagaState::Compensating.can_compensate());
        assert!(!SagaState::Completed.can_compensate());
        assert!(!SagaState::Compensated.can_compensate());
        assert!(!SagaState::Failed.can_compensate());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SagaState::Started.is_terminal());
        assert!(!SagaState::ReservationRequested.is_terminal());
        assert!(!SagaState::Compensating.is_terminal());
        assert!(SagaState::Completed.is_terminal());
        assert!(SagaState::Compensated.is_terminal());
        assert!(SagaState::Failed.is_terminal());
    }

    #[test]
    fn test_failed_is_not_archivable() {
        assert!(SagaState::Completed.is_archivable());
        assert!(SagaState::Compensated.is_archivable());
        assert!(!SagaState::Failed.is_archivable());
    }

    #[test]
    fn test_settled_lines() {
        assert!(!LineStatus::Requested.is_settled());
        assert!(!LineStatus::Reserved.is_settled());
        assert!(LineStatus::Rejected.is_settled());
        assert!(LineStatus::Released.is_settled());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            SagaState::ReservationRequested.to_string(),
            "ReservationRequested"
        );
        assert_eq!(SagaState::Compensated.to_string(), "Compensated");
        assert_eq!(LineStatus::Released.to_string(), "Released");
    }

    #[test]
    fn test_serialization() {
        let state = SagaState::Compensating;
        let json = serde_json::to_string(&state).unwrap();
        let deserialized: SagaState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
