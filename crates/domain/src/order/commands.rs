//! Routing of sales-context commands to order streams.

use contracts::{AggregateId, CancelOrder, PlaceOrder};

use crate::command::Command;

use super::Order;

impl Command for PlaceOrder {
    type Aggregate = Order;

    fn stream_id(&self) -> AggregateId {
        self.order_id.stream_id()
    }
}

impl Command for CancelOrder {
    type Aggregate = Order;

    fn stream_id(&self) -> AggregateId {
        self.order_id.stream_id()
    }
}
