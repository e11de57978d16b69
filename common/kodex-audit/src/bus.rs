use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::event::DomainEvent;

/// Which events a subscriber wants to see: either every event ("all
/// events" per the contract), or an explicit set of event-type strings.
#[derive(Debug, Clone)]
pub enum Interest {
    All,
    EventTypes(HashSet<&'static str>),
}

impl Interest {
    fn matches(&self, event_type: &str) -> bool {
        match self {
            Interest::All => true,
            Interest::EventTypes(types) => types.contains(event_type),
        }
    }
}

#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Stable name used by the registry to authorize this subscriber.
    fn name(&self) -> &str;

    fn interests(&self) -> Interest;

    /// Ordering within one event's fan-out only; higher runs first. No
    /// ordering is implied across subscribers handling different events.
    fn priority(&self) -> i32 {
        0
    }

    async fn handle(&self, event: &DomainEvent);
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("subscriber '{0}' is not registered by an extension provider")]
    UnregisteredSubscriber(String),
    #[error("event queue is closed")]
    Closed,
}

/// The sole source of legitimate subscribers: `subscribe` refuses anyone
/// whose name was not registered here first. A host wires this up once at
/// startup from whatever extension providers it loads.
#[derive(Debug, Default, Clone)]
pub struct SubscriberRegistry {
    allowed_names: HashSet<String>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>) {
        self.allowed_names.insert(name.into());
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed_names.contains(name)
    }
}

struct Routes {
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

/// Typed publish/subscribe with per-subscriber isolation and asynchronous
/// dispatch. A single unbounded queue feeds one dispatcher task; for every
/// dequeued event the dispatcher resolves all matching subscribers and
/// runs each in its own task, so one subscriber's panic or error never
/// reaches another subscriber or the publisher.
pub struct EventBus {
    sender: mpsc::UnboundedSender<DomainEvent>,
    routes: Arc<RwLock<Routes>>,
    registry: Arc<RwLock<SubscriberRegistry>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl EventBus {
    pub fn new(registry: SubscriberRegistry) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let routes = Arc::new(RwLock::new(Routes {
            subscribers: Vec::new(),
        }));
        let dispatcher = tokio::spawn(Self::dispatch_loop(receiver, routes.clone()));
        Self {
            sender,
            routes,
            registry: Arc::new(RwLock::new(registry)),
            dispatcher: Some(dispatcher),
        }
    }

    /// Enqueues `event` and returns immediately; the dispatcher task fans
    /// it out to subscribers asynchronously.
    pub fn publish(&self, event: DomainEvent) -> Result<(), BusError> {
        self.sender.send(event).map_err(|_| BusError::Closed)
    }

    pub async fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) -> Result<(), BusError> {
        let name = subscriber.name().to_string();
        if !self.registry.read().await.is_allowed(&name) {
            return Err(BusError::UnregisteredSubscriber(name));
        }
        let mut routes = self.routes.write().await;
        routes.subscribers.push(subscriber);
        routes
            .subscribers
            .sort_by(|a, b| b.priority().cmp(&a.priority()));
        Ok(())
    }

    pub async fn unsubscribe(&self, name: &str) {
        let mut routes = self.routes.write().await;
        routes.subscribers.retain(|s| s.name() != name);
    }

    pub async fn allow_subscriber(&self, name: impl Into<String>) {
        self.registry.write().await.register(name);
    }

    /// Cancels the dispatcher task and closes the queue. Events already
    /// enqueued before shutdown are not guaranteed to be delivered.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.dispatcher.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    async fn dispatch_loop(
        mut receiver: mpsc::UnboundedReceiver<DomainEvent>,
        routes: Arc<RwLock<Routes>>,
    ) {
        while let Some(event) = receiver.recv().await {
            let event = Arc::new(event);
            let matching: Vec<Arc<dyn EventSubscriber>> = {
                let routes = routes.read().await;
                routes
                    .subscribers
                    .iter()
                    .filter(|s| s.interests().matches(event.event_type()))
                    .cloned()
                    .collect()
            };
            for subscriber in matching {
                let event = event.clone();
                let name = subscriber.name().to_string();
                let join = tokio::spawn(async move {
                    subscriber.handle(&event).await;
                });
                tokio::spawn(async move {
                    if let Err(panic) = join.await {
                        error!(subscriber = %name, error = %panic, "event subscriber panicked");
                    }
                });
            }
        }
        warn!("event bus dispatcher loop ended: queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventHeader, Severity};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Duration};
    use uuid::Uuid;

    struct CountingSubscriber {
        name: String,
        interests: Interest,
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventSubscriber for CountingSubscriber {
        fn name(&self) -> &str {
            &self.name
        }

        fn interests(&self) -> Interest {
            self.interests.clone()
        }

        async fn handle(&self, _event: &DomainEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_login_event() -> DomainEvent {
        DomainEvent::LoginSuccess {
            header: EventHeader::new("acme", Severity::Info),
            user_id: Uuid::new_v4(),
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn subscribe_rejects_unregistered_subscriber() {
        let bus = EventBus::new(SubscriberRegistry::new());
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = Arc::new(CountingSubscriber {
            name: "rogue".to_string(),
            interests: Interest::All,
            count,
        });
        let result = bus.subscribe(subscriber).await;
        assert!(matches!(result, Err(BusError::UnregisteredSubscriber(_))));
    }

    #[tokio::test]
    async fn publish_fans_out_to_matching_subscribers_only() {
        let mut registry = SubscriberRegistry::new();
        registry.register("all-events");
        registry.register("login-only");
        registry.register("token-only");
        let bus = EventBus::new(registry);

        let all_count = Arc::new(AtomicUsize::new(0));
        let login_count = Arc::new(AtomicUsize::new(0));
        let token_count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Arc::new(CountingSubscriber {
            name: "all-events".to_string(),
            interests: Interest::All,
            count: all_count.clone(),
        }))
        .await
        .unwrap();
        bus.subscribe(Arc::new(CountingSubscriber {
            name: "login-only".to_string(),
            interests: Interest::EventTypes(["LOGIN_SUCCESS"].into_iter().collect()),
            count: login_count.clone(),
        }))
        .await
        .unwrap();
        bus.subscribe(Arc::new(CountingSubscriber {
            name: "token-only".to_string(),
            interests: Interest::EventTypes(["TOKEN_ISSUED"].into_iter().collect()),
            count: token_count.clone(),
        }))
        .await
        .unwrap();

        bus.publish(sample_login_event()).unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(all_count.load(Ordering::SeqCst), 1);
        assert_eq!(login_count.load(Ordering::SeqCst), 1);
        assert_eq!(token_count.load(Ordering::SeqCst), 0);
    }
}
