//! Order saga coordinating the sales and inventory contexts.
//!
//! One saga instance runs per placed order. It asks the inventory context
//! to reserve every line, and it completes once all lines are reserved. If
//! any reservation fails, the order is cancelled externally or the
//! reservation deadline passes, it compensates: the order is cancelled and
//! every reservation already made is released. Compensating commands go
//! through a [`RetryPolicy`], and a saga that cannot finish its
//! compensation ends in [`SagaState::Failed`] for an operator to resolve.
//!
//! Saga state is event-sourced in its own stream, separate from the order
//! and stock-ledger streams, so a restarted process resumes from the log.

pub mod aggregate;
pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod retry;
pub mod state;

pub use aggregate::{LineTrack, SagaInstance};
pub use bus::{CommandBus, DispatchError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SagaConfig;
pub use error::SagaError;
pub use events::{CompensationReason, SagaEvent};
pub use manager::{OrderSagaManager, RecoveryReport};
pub use retry::{AttemptRecord, RetryOutcome, RetryPolicy, RetryReport};
pub use state::{LineStatus, SagaState};
