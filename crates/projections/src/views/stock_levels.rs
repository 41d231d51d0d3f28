//! Stock levels read model: available and reserved units per SKU.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contracts::SkuId;
use domain::{Aggregate, InventoryEvent, StockLedger};
use event_store::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    pub sku_id: SkuId,
    pub available: u32,
    pub reserved: u32,
    pub updated_at: DateTime<Utc>,
}

struct StockLevelsState {
    levels: HashMap<SkuId, StockLevel>,
    position: ProjectionPosition,
}

/// Read model view of per-SKU stock.
#[derive(Clone)]
pub struct StockLevelsView {
    state: Arc<RwLock<StockLevelsState>>,
}

impl StockLevelsView {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StockLevelsState {
                levels: HashMap::new(),
                position: ProjectionPosition::zero(),
            })),
        }
    }

    pub async fn get(&self, sku_id: &SkuId) -> Option<StockLevel> {
        self.state.read().await.levels.get(sku_id).cloned()
    }

    /// Every SKU, sorted by ID.
    pub async fn all(&self) -> Vec<StockLevel> {
        let state = self.state.read().await;
        let mut levels: Vec<_> = state.levels.values().cloned().collect();
        levels.sort_by(|a, b| a.sku_id.cmp(&b.sku_id));
        levels
    }
}

impl Default for StockLevelsView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for StockLevelsView {
    fn name(&self) -> &'static str {
        "StockLevelsView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;
        state.position = state.position.advance_to(event.position);

        if event.aggregate_type != StockLedger::aggregate_type() {
            return Ok(());
        }

        match event.decode::<InventoryEvent>()? {
            InventoryEvent::LedgerOpened(data) => {
                state.levels.insert(
                    data.sku_id.clone(),
                    StockLevel {
                        sku_id: data.sku_id,
                        available: data.initial_quantity,
                        reserved: 0,
                        updated_at: data.opened_at,
                    },
                );
            }
            InventoryEvent::StockReserved(data) => {
                if let Some(level) = state.levels.get_mut(&data.sku_id) {
                    level.available = level.available.saturating_sub(data.quantity);
                    level.reserved += data.quantity;
                    level.updated_at = data.reserved_at;
                }
            }
            InventoryEvent::StockReleased(data) => {
                if let Some(level) = state.levels.get_mut(&data.sku_id) {
                    level.available += data.quantity;
                    level.reserved = level.reserved.saturating_sub(data.quantity);
                    level.updated_at = data.released_at;
                }
            }
            InventoryEvent::StockReservationFailed(_) => {}
        }

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.levels.clear();
        state.position = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for StockLevelsView {
    fn name(&self) -> &'static str {
        "StockLevelsView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|s| s.levels.len()).unwrap_or(0)
    }
}
