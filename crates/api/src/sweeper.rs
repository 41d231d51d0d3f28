//! Periodic saga timer sweep.

use std::sync::Arc;
use std::time::Duration;

use event_store::EventStore;
use tokio::task::JoinHandle;

use crate::AppState;
use crate::router::RouterMessage;

/// Queues a timeout tick for every saga whose timer is due. Returns how
/// many were queued.
pub async fn sweep_once<S>(state: &AppState<S>) -> usize
where
    S: EventStore + Clone + 'static,
{
    let due = state.sagas.due_sagas(state.clock.now()).await;
    let mut queued = 0;
    for saga_id in due {
        if state.publisher.publish(RouterMessage::Timeout(saga_id)) {
            queued += 1;
        }
    }
    if queued > 0 {
        tracing::debug!(queued, "saga timeouts queued");
    }
    queued
}

/// Runs [`sweep_once`] every `interval` until the task is aborted.
pub fn spawn<S>(state: Arc<AppState<S>>, interval: Duration) -> JoinHandle<()>
where
    S: EventStore + Clone + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep_once(&state).await;
        }
    })
}
