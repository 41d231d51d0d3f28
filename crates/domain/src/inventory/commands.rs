//! Routing of inventory commands to SKU ledger streams.

use contracts::{AggregateId, ReleaseStock, ReserveStock};

use crate::command::Command;

use super::StockLedger;

impl Command for ReserveStock {
    type Aggregate = StockLedger;

    fn stream_id(&self) -> AggregateId {
        self.sku_id.stream_id()
    }
}

impl Command for ReleaseStock {
    type Aggregate = StockLedger;

    fn stream_id(&self) -> AggregateId {
        self.sku_id.stream_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{OrderId, SkuId};

    #[test]
    fn test_stock_commands_target_the_sku_stream() {
        let sku = SkuId::new("IPHONE17");
        let reserve = ReserveStock::for_order(OrderId::new(), sku.clone(), 1);
        let release = ReleaseStock::for_order(OrderId::new(), sku.clone(), 1);

        assert_eq!(reserve.stream_id(), sku.stream_id());
        assert_eq!(release.stream_id(), sku.stream_id());
    }
}
