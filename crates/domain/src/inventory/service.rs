//! Inventory service providing the inventory context's API.

use contracts::{ReleaseStock, ReservationOutcome, ReserveStock, SkuId, StockReleased};
use event_store::EventStore;

use crate::command::CommandHandler;
use crate::error::DomainError;

use super::{InventoryError, StockLedger};

/// Service for managing stock ledgers.
pub struct InventoryService<S: EventStore> {
    handler: CommandHandler<S, StockLedger>,
}

impl<S: EventStore> InventoryService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, StockLedger> {
        &self.handler
    }

    /// Adds a SKU to the catalog with its initial stock.
    #[tracing::instrument(skip(self))]
    pub async fn open_ledger(
        &self,
        sku_id: SkuId,
        initial_quantity: u32,
    ) -> Result<StockLedger, DomainError> {
        let result = self
            .handler
            .execute(sku_id.stream_id(), |ledger| {
                ledger.open(&sku_id, initial_quantity)
            })
            .await?;
        tracing::info!("ledger opened");
        Ok(result.aggregate)
    }

    /// Decides a reservation and returns its outcome.
    ///
    /// A replayed request returns the outcome recorded the first time.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, sku_id = %cmd.sku_id, request_id = %cmd.request_id))]
    pub async fn reserve_stock(
        &self,
        cmd: &ReserveStock,
    ) -> Result<ReservationOutcome, DomainError> {
        let result = self.handler.handle(cmd, |ledger| ledger.reserve(cmd)).await?;

        let outcome = result
            .aggregate
            .reservation_outcome(cmd.request_id)
            .ok_or(InventoryError::UnknownRequest(cmd.request_id))?;

        let label = match (&outcome, result.events.is_empty()) {
            (_, true) => "replay",
            (ReservationOutcome::Reserved(_), false) => "reserved",
            (ReservationOutcome::Failed(failed), false) => failed.reason.as_str(),
        };
        metrics::counter!("inventory_reservations_total", "outcome" => label).increment(1);

        match &outcome {
            ReservationOutcome::Reserved(_) => tracing::info!(
                quantity = cmd.quantity,
                available = result.aggregate.available(),
                "stock reserved"
            ),
            ReservationOutcome::Failed(failed) => tracing::info!(
                quantity = cmd.quantity,
                reason = %failed.reason,
                "stock reservation failed"
            ),
        }

        Ok(outcome)
    }

    /// Returns reserved stock to the available pool.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, sku_id = %cmd.sku_id, request_id = %cmd.request_id))]
    pub async fn release_stock(&self, cmd: &ReleaseStock) -> Result<StockReleased, DomainError> {
        let result = self.handler.handle(cmd, |ledger| ledger.release(cmd)).await?;

        let released = result
            .aggregate
            .release_outcome(cmd.request_id)
            .ok_or(InventoryError::UnknownRequest(cmd.request_id))?;

        if !result.events.is_empty() {
            tracing::info!(quantity = released.quantity, "stock released");
        }
        Ok(released)
    }

    /// Loads a ledger. Returns None for SKUs that were never opened.
    pub async fn get_ledger(&self, sku_id: &SkuId) -> Result<Option<StockLedger>, DomainError> {
        self.handler.load_existing(sku_id.stream_id()).await
    }
}
