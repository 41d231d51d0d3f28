//! Idempotency keys for cross-context commands.
//!
//! A `RequestId` is derived from the order, the saga step and an optional
//! scope (the SKU for stock steps). Re-driving a saga from its history
//! therefore produces the same keys, and the receiving aggregate can
//! recognise a redelivery instead of applying it twice.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{OrderId, SkuId};

const REQUEST_NAMESPACE: Uuid = Uuid::from_u128(0xa7e4_0c93_51d2_4b8e_b6f1_9c3d_0e5a_7248);

/// The saga step a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    ReserveStock,
    ReleaseStock,
    CancelOrder,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::ReserveStock => "reserve-stock",
            Step::ReleaseStock => "release-stock",
            Step::CancelOrder => "cancel-order",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic idempotency key attached to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Derives the key for `(order, step, scope)`.
    pub fn derive(order_id: OrderId, step: Step, scope: &str) -> Self {
        let name = format!("{}/{}/{}", order_id, step.as_str(), scope);
        Self(Uuid::new_v5(&REQUEST_NAMESPACE, name.as_bytes()))
    }

    pub fn for_reservation(order_id: OrderId, sku_id: &SkuId) -> Self {
        Self::derive(order_id, Step::ReserveStock, sku_id.as_str())
    }

    pub fn for_release(order_id: OrderId, sku_id: &SkuId) -> Self {
        Self::derive(order_id, Step::ReleaseStock, sku_id.as_str())
    }

    pub fn for_cancellation(order_id: OrderId) -> Self {
        Self::derive(order_id, Step::CancelOrder, "")
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
