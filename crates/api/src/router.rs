//! Per-key event router.
//!
//! Integration events and timeout ticks are sharded by order ID. Each shard
//! is drained by one worker, so messages for one order are handled in the
//! order they were published while different orders proceed in parallel.
//! Compensation runs in its own task, so a retry backoff never holds up a
//! shard.

use std::sync::Arc;

use contracts::{IntegrationEvent, OrderId, SagaId};
use domain::OrderService;
use event_store::EventStore;
use projections::ProjectionProcessor;
use saga::SagaState;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use crate::SagaManager;
use crate::error::ServiceError;

/// A unit of work for the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterMessage {
    Event(IntegrationEvent),
    Timeout(SagaId),
}

impl RouterMessage {
    /// Sharding key.
    pub fn order_id(&self) -> OrderId {
        match self {
            RouterMessage::Event(event) => event.order_id(),
            RouterMessage::Timeout(saga_id) => saga_id.order_id(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RouterMessage::Event(event) => event.event_type(),
            RouterMessage::Timeout(_) => "Timeout",
        }
    }
}

/// Sending half of the router queues.
#[derive(Clone)]
pub struct EventPublisher {
    shards: Arc<Vec<mpsc::UnboundedSender<RouterMessage>>>,
}

impl EventPublisher {
    /// Queues a message on its order's shard. Returns false once the router
    /// has shut down.
    pub fn publish(&self, message: RouterMessage) -> bool {
        let shard = shard_for(message.order_id(), self.shards.len());
        self.shards[shard].send(message).is_ok()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

/// Receiving half of the router queues.
pub struct RouterQueues {
    shards: Vec<mpsc::UnboundedReceiver<RouterMessage>>,
}

impl RouterQueues {
    /// Pops a queued message from the first non-empty shard.
    pub fn try_next(&mut self) -> Option<RouterMessage> {
        self.shards.iter_mut().find_map(|rx| rx.try_recv().ok())
    }
}

/// Creates the router queues. `shards` is clamped to at least one.
pub fn channel(shards: usize) -> (EventPublisher, RouterQueues) {
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..shards.max(1))
        .map(|_| mpsc::unbounded_channel::<RouterMessage>())
        .unzip();
    (
        EventPublisher {
            shards: Arc::new(senders),
        },
        RouterQueues { shards: receivers },
    )
}

fn shard_for(order_id: OrderId, shards: usize) -> usize {
    (order_id.as_uuid().as_u128() % shards as u128) as usize
}

/// Feeds routed messages to the sales aggregate, the saga and the read
/// models, in that order.
pub struct EventRouter<S: EventStore> {
    shards: Vec<Mutex<mpsc::UnboundedReceiver<RouterMessage>>>,
    orders: Arc<OrderService<S>>,
    sagas: Arc<SagaManager<S>>,
    processor: Arc<ProjectionProcessor<S>>,
    compensations: Mutex<JoinSet<()>>,
}

impl<S: EventStore + 'static> EventRouter<S> {
    pub fn new(
        queues: RouterQueues,
        orders: Arc<OrderService<S>>,
        sagas: Arc<SagaManager<S>>,
        processor: Arc<ProjectionProcessor<S>>,
    ) -> Self {
        Self {
            shards: queues.shards.into_iter().map(Mutex::new).collect(),
            orders,
            sagas,
            processor,
            compensations: Mutex::new(JoinSet::new()),
        }
    }

    /// Spawns one worker per shard.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.shards.len())
            .map(|shard| {
                let router = Arc::clone(self);
                tokio::spawn(async move { router.run_shard(shard).await })
            })
            .collect()
    }

    async fn run_shard(&self, shard: usize) {
        let mut queue = self.shards[shard].lock().await;
        tracing::debug!(shard, "router worker started");
        while let Some(message) = queue.recv().await {
            self.handle(message).await;
        }
        tracing::debug!(shard, "router worker stopped");
    }

    /// Handles queued messages inline until every shard is empty and no
    /// compensation is running, including the messages produced along the
    /// way. Returns how many messages were handled.
    ///
    /// Shards owned by a running worker are skipped.
    pub async fn drain(&self) -> usize {
        let mut handled = 0;
        loop {
            let mut progressed = false;
            for shard in &self.shards {
                let Ok(mut queue) = shard.try_lock() else {
                    continue;
                };
                while let Ok(message) = queue.try_recv() {
                    self.handle(message).await;
                    handled += 1;
                    progressed = true;
                }
            }

            let mut running = std::mem::take(&mut *self.compensations.lock().await);
            while let Some(joined) = running.join_next().await {
                progressed = true;
                if let Err(error) = joined {
                    tracing::error!(%error, "compensation task aborted");
                }
            }

            if !progressed {
                return handled;
            }
        }
    }

    async fn handle(&self, message: RouterMessage) {
        let kind = message.kind();
        metrics::counter!("router_messages_total", "kind" => kind).increment(1);

        if let Err(error) = self.route(&message).await {
            metrics::counter!("router_errors_total").increment(1);
            tracing::error!(kind, order_id = %message.order_id(), %error, "failed to route message");
        }
    }

    async fn route(&self, message: &RouterMessage) -> Result<(), ServiceError> {
        let (state, recorded) = match message {
            RouterMessage::Event(event) => {
                // The saga still sees the event if the order could not record it.
                let recorded = self.orders.record_stock_outcome(event).await;
                (self.sagas.handle_event(event).await?, recorded)
            }
            RouterMessage::Timeout(saga_id) => (self.sagas.on_timeout(*saga_id).await?, Ok(None)),
        };
        if state == Some(SagaState::Compensating) {
            self.spawn_compensation(SagaId::from(message.order_id())).await;
        }
        recorded?;
        self.processor.run_catch_up().await?;
        Ok(())
    }

    async fn spawn_compensation(&self, saga_id: SagaId) {
        let sagas = Arc::clone(&self.sagas);
        let processor = Arc::clone(&self.processor);

        let mut running = self.compensations.lock().await;
        while let Some(finished) = running.try_join_next() {
            if let Err(error) = finished {
                tracing::error!(%error, "compensation task aborted");
            }
        }
        running.spawn(async move {
            if let Err(error) = sagas.compensate(saga_id).await {
                metrics::counter!("router_errors_total").increment(1);
                tracing::error!(%saga_id, %error, "compensation failed");
                return;
            }
            if let Err(error) = processor.run_catch_up().await {
                tracing::error!(%error, "projection catch-up failed");
            }
        });
    }

    /// Aborts running compensations. Their sagas resume on the next start.
    pub async fn shutdown(&self) {
        self.compensations.lock().await.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use contracts::{OrderCancelled, RequestId};

    use super::*;

    fn cancelled(order_id: OrderId) -> RouterMessage {
        RouterMessage::Event(IntegrationEvent::OrderCancelled(OrderCancelled {
            order_id,
            request_id: RequestId::for_cancellation(order_id),
            reason: "test".to_string(),
            timed_out: false,
        }))
    }

    #[test]
    fn test_messages_for_one_order_share_a_shard() {
        let order_id = OrderId::new();
        let shard = shard_for(order_id, 8);
        assert_eq!(shard, shard_for(SagaId::from(order_id).order_id(), 8));
        assert!(shard < 8);
    }

    #[test]
    fn test_published_messages_keep_their_order() {
        let (publisher, mut queues) = channel(4);
        let order_id = OrderId::new();

        assert!(publisher.publish(cancelled(order_id)));
        assert!(publisher.publish(RouterMessage::Timeout(SagaId::from(order_id))));

        assert_eq!(queues.try_next().map(|m| m.kind()), Some("OrderCancelled"));
        assert_eq!(queues.try_next().map(|m| m.kind()), Some("Timeout"));
        assert!(queues.try_next().is_none());
    }

    #[test]
    fn test_publish_fails_after_shutdown() {
        let (publisher, queues) = channel(0);
        assert_eq!(publisher.shard_count(), 1);
        drop(queues);
        assert!(!publisher.publish(cancelled(OrderId::new())));
    }
}
