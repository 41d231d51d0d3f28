//! Saga timing and retry settings.

use std::time::Duration;

use chrono::TimeDelta;

use crate::retry::RetryPolicy;

/// Settings for [`crate::OrderSagaManager`].
#[derive(Debug, Clone, PartialEq)]
pub struct SagaConfig {
    /// How long to wait for one reservation outcome before re-issuing the
    /// same ReserveStock.
    pub reservation_timeout: Duration,

    /// How long a saga may wait for reservations in total before it gives
    /// up and compensates.
    pub pending_deadline: Duration,

    /// Bound on ReserveStock deliveries for a line whose outcome is still
    /// unknown while compensating. Past it the saga fails.
    pub max_reservation_attempts: u32,

    /// Policy for CancelOrder and ReleaseStock.
    pub compensation_retry: RetryPolicy,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            reservation_timeout: Duration::from_secs(5),
            pending_deadline: Duration::from_secs(15),
            max_reservation_attempts: 5,
            compensation_retry: RetryPolicy::default(),
        }
    }
}

impl SagaConfig {
    pub(crate) fn reservation_timeout_delta(&self) -> TimeDelta {
        to_delta(self.reservation_timeout)
    }

    pub(crate) fn pending_deadline_delta(&self) -> TimeDelta {
        to_delta(self.pending_deadline)
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
