//! Domain layer: the aggregate kernel and the two contexts' aggregates.
//!
//! - [`Aggregate`] / [`DomainEvent`]: state as a fold over a stream
//! - [`CommandHandler`]: load, decide, append with an expected version
//! - [`KeyedLocks`]: one writer per stream, distinct streams in parallel
//! - [`order`]: the sales context's `Order` aggregate
//! - [`inventory`]: the inventory context's per-SKU `StockLedger`

pub mod aggregate;
pub mod command;
pub mod error;
pub mod inventory;
pub mod lock;
pub mod order;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandResult};
pub use error::DomainError;
pub use inventory::{InventoryError, InventoryEvent, InventoryService, StockLedger};
pub use lock::KeyedLocks;
pub use order::{Order, OrderError, OrderEvent, OrderService, OrderStatus};
