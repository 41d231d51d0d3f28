//! The seam through which the saga issues commands.

use async_trait::async_trait;
use contracts::Command;
use thiserror::Error;

/// Why a command could not be delivered or was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Delivery is uncertain or the receiver was temporarily unavailable.
    /// Sending the same command again is safe and may succeed.
    #[error("transient dispatch failure: {0}")]
    Transient(String),

    /// The receiving aggregate refused the command. Retrying cannot help.
    #[error("command rejected: {0}")]
    Rejected(String),
}

/// Delivers commands to the sales and inventory contexts.
///
/// `Ok` means the receiving aggregate accepted the command, including the
/// case where it recognised a replayed request ID and returned its earlier
/// outcome. Outcome events travel back separately.
#[async_trait]
pub trait CommandBus: Send + Sync {
    async fn dispatch(&self, command: Command) -> Result<(), DispatchError>;
}

#[async_trait]
impl<T: CommandBus + ?Sized> CommandBus for std::sync::Arc<T> {
    async fn dispatch(&self, command: Command) -> Result<(), DispatchError> {
        (**self).dispatch(command).await
    }
}
