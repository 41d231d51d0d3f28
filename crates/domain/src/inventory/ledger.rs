//! Per-SKU stock ledger aggregate.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use contracts::{
    AggregateId, OrderId, ReleaseStock, RequestId, ReservationFailureReason, ReservationOutcome,
    ReserveStock, SkuId, StockReleased, StockReservationFailed, StockReserved, ValidationError,
};
use event_store::Version;

use crate::aggregate::Aggregate;

use super::{
    InventoryError, InventoryEvent,
    events::{
        LedgerOpenedData, StockReleasedData, StockReservationFailedData, StockReservedData,
    },
};

/// A reservation decision as it was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RecordedReservation {
    order_id: OrderId,
    sku_id: SkuId,
    quantity: u32,
    failure: Option<ReservationFailureReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RecordedRelease {
    order_id: OrderId,
    sku_id: SkuId,
    quantity: u32,
}

/// Stock state for one SKU.
///
/// Reservations move quantity from `available` to `reserved` and releases
/// move it back, so their sum only changes when the ledger is opened. Every
/// request ID is remembered with its outcome: replaying a request records
/// nothing and returns what was decided the first time.
#[derive(Debug, Clone, Default)]
pub struct StockLedger {
    id: Option<AggregateId>,
    version: Version,
    sku_id: Option<SkuId>,
    available: u32,
    reserved: u32,
    reservations: HashMap<RequestId, RecordedReservation>,
    releases: HashMap<RequestId, RecordedRelease>,
    released_reservations: HashSet<RequestId>,
}

impl Aggregate for StockLedger {
    type Event = InventoryEvent;
    type Error = InventoryError;

    fn aggregate_type() -> &'static str {
        "StockLedger"
    }

    /// Set once the ledger is opened. Failed reservations against a SKU that
    /// was never opened are still recorded in its stream.
    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            InventoryEvent::LedgerOpened(data) => {
                self.id = Some(data.sku_id.stream_id());
                self.sku_id = Some(data.sku_id);
                self.available = data.initial_quantity;
            }
            InventoryEvent::StockReserved(data) => {
                self.available = self.available.saturating_sub(data.quantity);
                self.reserved += data.quantity;
                self.reservations.insert(
                    data.request_id,
                    RecordedReservation {
                        order_id: data.order_id,
                        sku_id: data.sku_id,
                        quantity: data.quantity,
                        failure: None,
                    },
                );
            }
            InventoryEvent::StockReservationFailed(data) => {
                self.reservations.insert(
                    data.request_id,
                    RecordedReservation {
                        order_id: data.order_id,
                        sku_id: data.sku_id,
                        quantity: data.quantity,
                        failure: Some(data.reason),
                    },
                );
            }
            InventoryEvent::StockReleased(data) => {
                self.reserved = self.reserved.saturating_sub(data.quantity);
                self.available += data.quantity;
                self.released_reservations.insert(data.reservation_request_id);
                self.releases.insert(
                    data.request_id,
                    RecordedRelease {
                        order_id: data.order_id,
                        sku_id: data.sku_id,
                        quantity: data.quantity,
                    },
                );
            }
        }
    }
}

// Query methods
impl StockLedger {
    pub fn sku_id(&self) -> Option<&SkuId> {
        self.sku_id.as_ref()
    }

    pub fn available(&self) -> u32 {
        self.available
    }

    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    pub fn is_open(&self) -> bool {
        self.id.is_some()
    }

    /// The outcome recorded for a reservation request, if any.
    pub fn reservation_outcome(&self, request_id: RequestId) -> Option<ReservationOutcome> {
        let recorded = self.reservations.get(&request_id)?;
        Some(match recorded.failure {
            None => ReservationOutcome::Reserved(StockReserved {
                order_id: recorded.order_id,
                sku_id: recorded.sku_id.clone(),
                request_id,
                quantity: recorded.quantity,
            }),
            Some(reason) => ReservationOutcome::Failed(StockReservationFailed {
                order_id: recorded.order_id,
                sku_id: recorded.sku_id.clone(),
                request_id,
                quantity: recorded.quantity,
                reason,
            }),
        })
    }

    /// The release recorded for a release request, if any.
    pub fn release_outcome(&self, request_id: RequestId) -> Option<StockReleased> {
        self.releases.get(&request_id).map(|recorded| StockReleased {
            order_id: recorded.order_id,
            sku_id: recorded.sku_id.clone(),
            request_id,
            quantity: recorded.quantity,
        })
    }
}

// Command methods (return events)
impl StockLedger {
    /// Opens the ledger with its initial stock.
    pub fn open(
        &self,
        sku_id: &SkuId,
        initial_quantity: u32,
    ) -> Result<Vec<InventoryEvent>, InventoryError> {
        if sku_id.is_blank() {
            return Err(ValidationError::BlankSku.into());
        }
        if self.is_open() {
            return Err(InventoryError::LedgerAlreadyOpen(sku_id.clone()));
        }

        Ok(vec![InventoryEvent::LedgerOpened(LedgerOpenedData {
            sku_id: sku_id.clone(),
            initial_quantity,
            opened_at: Utc::now(),
        })])
    }

    /// Decides a reservation. Never reserves part of the requested quantity.
    pub fn reserve(&self, cmd: &ReserveStock) -> Result<Vec<InventoryEvent>, InventoryError> {
        cmd.validate()?;

        if self.reservations.contains_key(&cmd.request_id) {
            return Ok(vec![]);
        }

        let failure = if !self.is_open() {
            Some(ReservationFailureReason::UnknownSku)
        } else if self.available < cmd.quantity {
            Some(ReservationFailureReason::InsufficientStock)
        } else {
            None
        };

        let event = match failure {
            None => InventoryEvent::StockReserved(StockReservedData {
                sku_id: cmd.sku_id.clone(),
                order_id: cmd.order_id,
                request_id: cmd.request_id,
                quantity: cmd.quantity,
                reserved_at: Utc::now(),
            }),
            Some(reason) => InventoryEvent::StockReservationFailed(StockReservationFailedData {
                sku_id: cmd.sku_id.clone(),
                order_id: cmd.order_id,
                request_id: cmd.request_id,
                quantity: cmd.quantity,
                reason,
                failed_at: Utc::now(),
            }),
        };

        Ok(vec![event])
    }

    /// Returns the stock of a successful reservation to the available pool.
    ///
    /// The released quantity is the one that was reserved.
    pub fn release(&self, cmd: &ReleaseStock) -> Result<Vec<InventoryEvent>, InventoryError> {
        cmd.validate()?;

        if self.releases.contains_key(&cmd.request_id) {
            return Ok(vec![]);
        }

        let reservation = self
            .reservations
            .get(&cmd.reservation_request_id)
            .filter(|r| r.failure.is_none())
            .filter(|_| !self.released_reservations.contains(&cmd.reservation_request_id))
            .ok_or(InventoryError::NothingToRelease {
                request_id: cmd.reservation_request_id,
            })?;

        Ok(vec![InventoryEvent::StockReleased(StockReleasedData {
            sku_id: cmd.sku_id.clone(),
            order_id: cmd.order_id,
            request_id: cmd.request_id,
            reservation_request_id: cmd.reservation_request_id,
            quantity: reservation.quantity,
            released_at: Utc::now(),
        })])
    }
}
