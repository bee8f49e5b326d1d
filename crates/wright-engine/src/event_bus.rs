use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error};
use wright_core::events::{DomainEvent, EventType};

/// Error type handlers may return. Anything convertible works with `?`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

type SyncHandler = Arc<dyn Fn(&DomainEvent) -> HandlerResult + Send + Sync>;
type AsyncHandler = Arc<dyn Fn(DomainEvent) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// In-process pub/sub keyed by [`EventType`]. Handler failures and panics are
/// logged and never reach the publisher or sibling handlers.
pub struct EventBus {
    subscribers: DashMap<EventType, Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(&DomainEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(event_type, Handler::Sync(Arc::new(handler)))
    }

    pub fn subscribe_async<F, Fut>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: AsyncHandler = Arc::new(move |event| handler(event).boxed());
        self.insert(event_type, Handler::Async(handler))
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for mut entry in self.subscribers.iter_mut() {
            let before = entry.len();
            entry.retain(|(sid, _)| *sid != id);
            removed |= entry.len() != before;
        }
        removed
    }

    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.subscribers.get(&event_type).map_or(0, |s| s.len())
    }

    /// Run the synchronous handlers for the event. Async handlers are skipped.
    pub fn publish(&self, event: DomainEvent) {
        let event_type = event.event_type();
        debug!(?event_type, "publishing event");
        for (_, handler) in self.snapshot(event_type) {
            if let Handler::Sync(handler) = handler {
                run_sync(&handler, &event, event_type);
            }
        }
    }

    /// Run the synchronous handlers, then await the async ones one after
    /// another in subscription order.
    pub async fn publish_async(&self, event: DomainEvent) {
        let event_type = event.event_type();
        debug!(?event_type, "publishing async event");
        let handlers = self.snapshot(event_type);
        for (_, handler) in &handlers {
            if let Handler::Sync(handler) = handler {
                run_sync(handler, &event, event_type);
            }
        }
        for (_, handler) in handlers {
            let Handler::Async(handler) = handler else {
                continue;
            };
            match AssertUnwindSafe(handler(event.clone())).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(?event_type, error = %e, "async event handler failed"),
                Err(panic) => error!(
                    ?event_type,
                    panic = %panic_message(&panic),
                    "async event handler panicked"
                ),
            }
        }
    }

    fn insert(&self, event_type: EventType, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .entry(event_type)
            .or_default()
            .push((id, handler));
        debug!(?event_type, subscription = id.0, "subscriber added");
        id
    }

    /// Clone the handler list so no map lock is held while handlers run;
    /// handlers may subscribe or publish themselves.
    fn snapshot(&self, event_type: EventType) -> Vec<(SubscriptionId, Handler)> {
        self.subscribers
            .get(&event_type)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn run_sync(handler: &SyncHandler, event: &DomainEvent, event_type: EventType) {
    match std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(?event_type, error = %e, "event handler failed"),
        Err(panic) => error!(
            ?event_type,
            panic = %panic_message(&panic),
            "event handler panicked"
        ),
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
