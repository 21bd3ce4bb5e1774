//! The event executor: per-provider listener tasks, API/client-scoped
//! subscription registries, and budgeted concurrent dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use crate::config::ExecutorConfig;
use crate::logging::LoggerHandle;
use crate::provider::{Event, EventType, FeatureProvider, ProviderStatus};
use crate::registry::ProviderRegistry;

/// Opaque handle returned by `add_*_handler`, passed back to deregister.
///
/// Rust closures have no stable identity suitable for a public add/remove
/// contract, so registration hands back this token instead (see
/// `SPEC_FULL.md` §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken(u64);

/// A callback invoked once per matching dispatched event.
pub type EventHandler = Arc<dyn Fn(EventDetails) + Send + Sync>;

/// The payload handed to a subscriber: the event plus the client name whose
/// subscription matched it (`None` for an API-scope handler).
#[derive(Debug, Clone)]
pub struct EventDetails {
    pub event: Event,
    pub client_name: Option<String>,
}

/// Message a provider readiness sentinel carries so late-subscribe replay is
/// distinguishable from a live `ready` event in tests/logs.
pub const READY_REPLAY_SENTINEL: &str = "provider is ready";

struct Registration {
    token: HandlerToken,
    handler: EventHandler,
}

#[derive(Default)]
struct SubscriptionRegistry {
    api: HashMap<EventType, Vec<Registration>>,
    scoped: HashMap<String, HashMap<EventType, Vec<Registration>>>,
}

impl SubscriptionRegistry {
    fn remove(&mut self, token: HandlerToken) {
        for regs in self.api.values_mut() {
            regs.retain(|r| r.token != token);
        }
        for by_type in self.scoped.values_mut() {
            for regs in by_type.values_mut() {
                regs.retain(|r| r.token != token);
            }
        }
    }
}

struct ListenerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

fn provider_key(p: &Arc<dyn FeatureProvider>) -> usize {
    Arc::as_ptr(p) as *const () as usize
}

pub struct EventExecutor {
    registry: Arc<ProviderRegistry>,
    subscriptions: RwLock<SubscriptionRegistry>,
    listeners: Mutex<HashMap<usize, ListenerHandle>>,
    dispatch_tx: mpsc::Sender<(Event, Arc<dyn FeatureProvider>)>,
    dispatcher_shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    dispatcher_handle: Mutex<Option<JoinHandle<()>>>,
    next_token: AtomicU64,
    config: ExecutorConfig,
    logger: LoggerHandle,
}

impl EventExecutor {
    pub fn new(registry: Arc<ProviderRegistry>, config: ExecutorConfig, logger: LoggerHandle) -> Arc<Self> {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.event_queue_capacity);
        let (dispatcher_shutdown_tx, dispatcher_shutdown_rx) = oneshot::channel();

        let executor = Arc::new(Self {
            registry,
            subscriptions: RwLock::new(SubscriptionRegistry::default()),
            listeners: Mutex::new(HashMap::new()),
            dispatch_tx,
            dispatcher_shutdown_tx: Mutex::new(Some(dispatcher_shutdown_tx)),
            dispatcher_handle: Mutex::new(None),
            next_token: AtomicU64::new(1),
            config,
            logger,
        });

        let dispatcher_handle = tokio::spawn(Self::run_dispatcher(
            executor.clone(),
            dispatch_rx,
            dispatcher_shutdown_rx,
        ));
        *executor.dispatcher_handle.lock().unwrap() = Some(dispatcher_handle);
        executor
    }

    fn next_token(&self) -> HandlerToken {
        HandlerToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Starts a listener for `provider` if this is the first slot it has
    /// just been bound to and it exposes an event stream. A no-op otherwise.
    pub async fn watch(self: &Arc<Self>, provider: Arc<dyn FeatureProvider>, newly_registered: bool) {
        if !newly_registered {
            return;
        }
        let Some(mut stream) = provider.event_stream() else {
            return;
        };

        let key = provider_key(&provider);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let dispatch_tx = self.dispatch_tx.clone();
        let listener_provider = provider.clone();

        let join_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = stream.recv() => {
                        match event {
                            Some(event) => {
                                if dispatch_tx.send((event, listener_provider.clone())).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        self.listeners
            .lock()
            .unwrap()
            .insert(key, ListenerHandle { shutdown_tx, join_handle });
    }

    /// Stops the listener for `provider` if it was the last slot releasing
    /// it. Detached: does not block the caller (typically a registration
    /// call) on the listener actually exiting.
    pub fn unwatch(self: &Arc<Self>, provider: &Arc<dyn FeatureProvider>, released: bool) {
        if !released {
            return;
        }
        let handle = self.listeners.lock().unwrap().remove(&provider_key(provider));
        let Some(handle) = handle else { return };
        let budget = self.config.listener_shutdown_budget;
        let logger = self.logger.clone();
        tokio::spawn(async move {
            let _ = handle.shutdown_tx.send(());
            if tokio::time::timeout(budget, handle.join_handle).await.is_err() {
                logger.get().log_warn("provider listener did not exit within its shutdown budget");
            }
        });
    }

    pub async fn add_api_handler(self: &Arc<Self>, event_type: EventType, handler: EventHandler) -> HandlerToken {
        let token = self.next_token();
        {
            let mut subs = self.subscriptions.write().await;
            subs.api.entry(event_type).or_default().push(Registration { token, handler: handler.clone() });
        }
        if event_type == EventType::Ready {
            self.replay_ready_for_api(handler).await;
        }
        token
    }

    pub async fn add_client_handler(
        self: &Arc<Self>,
        client_name: &str,
        event_type: EventType,
        handler: EventHandler,
    ) -> HandlerToken {
        let token = self.next_token();
        {
            let mut subs = self.subscriptions.write().await;
            subs.scoped
                .entry(client_name.to_string())
                .or_default()
                .entry(event_type)
                .or_default()
                .push(Registration { token, handler: handler.clone() });
        }
        if event_type == EventType::Ready {
            self.replay_ready_for_client(client_name, handler).await;
        }
        token
    }

    pub async fn remove_handler(&self, token: HandlerToken) {
        self.subscriptions.write().await.remove(token);
    }

    async fn replay_ready_for_client(&self, client_name: &str, handler: EventHandler) {
        let snapshot = self.registry.snapshot_for(client_name).await;
        if snapshot.provider.status() == ProviderStatus::Ready {
            let provider_name = snapshot.provider.metadata().name.clone();
            spawn_replay(handler, Some(client_name.to_string()), provider_name);
        }
    }

    async fn replay_ready_for_api(&self, handler: EventHandler) {
        for provider in self.registry.all_bound_providers().await {
            if provider.status() == ProviderStatus::Ready {
                let provider_name = provider.metadata().name.clone();
                spawn_replay(handler.clone(), None, provider_name);
            }
        }
    }

    async fn run_dispatcher(
        executor: Arc<Self>,
        mut dispatch_rx: mpsc::Receiver<(Event, Arc<dyn FeatureProvider>)>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                item = dispatch_rx.recv() => {
                    match item {
                        Some((event, provider)) => executor.clone().spawn_dispatch(event, provider),
                        None => break,
                    }
                }
                _ = &mut shutdown_rx => {
                    while let Ok((event, provider)) = dispatch_rx.try_recv() {
                        executor.clone().spawn_dispatch(event, provider);
                    }
                    break;
                }
            }
        }
    }

    /// Computes the handler set for one payload and fans it out, detached
    /// from the dispatcher loop so a slow/hanging handler set never delays
    /// the next queued event from starting its own dispatch.
    fn spawn_dispatch(self: Arc<Self>, event: Event, provider: Arc<dyn FeatureProvider>) {
        tokio::spawn(async move {
            let handlers = self.handlers_for(&event, &provider).await;
            if handlers.is_empty() {
                return;
            }
            run_budgeted_dispatch(handlers, event, self.config.dispatch_timeout, self.logger.clone()).await;
        });
    }

    async fn handlers_for(
        &self,
        event: &Event,
        provider: &Arc<dyn FeatureProvider>,
    ) -> Vec<(Option<String>, EventHandler)> {
        let subs = self.subscriptions.read().await;
        let mut out = Vec::new();

        if let Some(regs) = subs.api.get(&event.event_type) {
            out.extend(regs.iter().map(|r| (None, r.handler.clone())));
        }

        let mut matching_clients = self.registry.client_names_bound_to(provider).await;
        if self.registry.is_default_provider(provider).await {
            matching_clients.extend(self.registry.client_names_with_no_binding().await);
        }

        for client_name in matching_clients {
            if let Some(by_type) = subs.scoped.get(&client_name) {
                if let Some(regs) = by_type.get(&event.event_type) {
                    out.extend(regs.iter().map(|r| (Some(client_name.clone()), r.handler.clone())));
                }
            }
        }

        out
    }

    pub async fn shutdown(&self) {
        let handles: Vec<_> = {
            let mut map = self.listeners.lock().unwrap();
            map.drain().collect()
        };
        for (_, handle) in handles {
            let _ = handle.shutdown_tx.send(());
            let _ = tokio::time::timeout(self.config.listener_shutdown_budget, handle.join_handle).await;
        }
        if let Some(tx) = self.dispatcher_shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        let handle = self.dispatcher_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(self.config.dispatcher_drain_budget, handle).await;
        }
    }
}

fn spawn_replay(handler: EventHandler, client_name: Option<String>, provider_name: String) {
    tokio::spawn(async move {
        let details = EventDetails {
            event: Event::new(EventType::Ready, provider_name).with_message(READY_REPLAY_SENTINEL),
            client_name,
        };
        run_single_handler(handler, details).await;
    });
}

async fn run_single_handler(handler: EventHandler, details: EventDetails) {
    let task = tokio::spawn(async move { handler(details) });
    let _ = task.await;
}

/// Invokes every handler concurrently, one task each, and waits up to
/// `budget` for all of them. Handlers still running past the budget are not
/// aborted — their tasks are simply no longer awaited.
async fn run_budgeted_dispatch(
    handlers: Vec<(Option<String>, EventHandler)>,
    event: Event,
    budget: std::time::Duration,
    logger: LoggerHandle,
) {
    let handles: Vec<JoinHandle<()>> = handlers
        .into_iter()
        .map(|(client_name, handler)| {
            let details = EventDetails { event: event.clone(), client_name };
            tokio::spawn(async move { handler(details) })
        })
        .collect();

    let join_all = async {
        for handle in handles {
            if handle.await.is_err() {
                logger.get().log_error("event handler panicked during dispatch");
            }
        }
    };

    if tokio::time::timeout(budget, join_all).await.is_err() {
        logger.get().log_warn("event dispatch exceeded the handler execution time budget; abandoning remaining handlers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FeatureProvider, NoopProvider, ProviderMetadata};
    use crate::context::EvaluationContext;
    use crate::error::EvaluationResult;
    use crate::evaluation::ResolutionDetails;
    use crate::value::StructValue;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::mpsc::Sender;

    struct EventingProvider {
        metadata: ProviderMetadata,
        status: AtomicBool, // true = Ready
        stream: Mutex<Option<mpsc::Receiver<Event>>>,
        sender: Sender<Event>,
    }

    impl EventingProvider {
        fn new(ready: bool) -> Arc<Self> {
            let (tx, rx) = mpsc::channel(16);
            Arc::new(Self {
                metadata: ProviderMetadata::new("eventing-test"),
                status: AtomicBool::new(ready),
                stream: Mutex::new(Some(rx)),
                sender: tx,
            })
        }

        fn set_ready(&self, ready: bool) {
            self.status.store(ready, Ordering::SeqCst);
        }

        async fn emit(&self, event: Event) {
            self.sender.send(event).await.unwrap();
        }
    }

    #[async_trait]
    impl FeatureProvider for EventingProvider {
        fn metadata(&self) -> &ProviderMetadata {
            &self.metadata
        }
        async fn resolve_bool_value(&self, _: &str, d: bool, _: &EvaluationContext) -> EvaluationResult<ResolutionDetails<bool>> {
            Ok(ResolutionDetails::builder().value(d).build())
        }
        async fn resolve_string_value(&self, _: &str, d: &str, _: &EvaluationContext) -> EvaluationResult<ResolutionDetails<String>> {
            Ok(ResolutionDetails::builder().value(d.to_string()).build())
        }
        async fn resolve_int_value(&self, _: &str, d: i64, _: &EvaluationContext) -> EvaluationResult<ResolutionDetails<i64>> {
            Ok(ResolutionDetails::builder().value(d).build())
        }
        async fn resolve_float_value(&self, _: &str, d: f64, _: &EvaluationContext) -> EvaluationResult<ResolutionDetails<f64>> {
            Ok(ResolutionDetails::builder().value(d).build())
        }
        async fn resolve_object_value(&self, _: &str, d: StructValue, _: &EvaluationContext) -> EvaluationResult<ResolutionDetails<StructValue>> {
            Ok(ResolutionDetails::builder().value(d).build())
        }
        fn status(&self) -> ProviderStatus {
            if self.status.load(Ordering::SeqCst) { ProviderStatus::Ready } else { ProviderStatus::NotReady }
        }
        fn event_stream(&self) -> Option<crate::provider::EventReceiver> {
            self.stream.lock().unwrap().take()
        }
    }

    fn new_executor() -> (Arc<ProviderRegistry>, Arc<EventExecutor>) {
        let registry = Arc::new(ProviderRegistry::new(Arc::new(NoopProvider::new()), LoggerHandle::default()));
        let executor = EventExecutor::new(registry.clone(), ExecutorConfig::default(), LoggerHandle::default());
        (registry, executor)
    }

    #[tokio::test]
    async fn late_subscribe_replay_fires_for_ready_provider() {
        let (registry, executor) = new_executor();
        let provider = EventingProvider::new(true);
        let outcome = registry.set_default_provider(provider.clone()).await;
        executor.watch(outcome.provider.clone(), outcome.newly_registered).await;
        registry.register_client_name("client-a").await;

        let (tx, mut rx) = mpsc::channel(1);
        let handler: EventHandler = Arc::new(move |details: EventDetails| {
            let _ = tx.try_send(details);
        });
        executor.add_client_handler("client-a", EventType::Ready, handler).await;

        let details = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv())
            .await
            .expect("handler should fire within the replay bound")
            .unwrap();
        assert!(details.event.message.as_deref().unwrap().contains("ready"));
    }

    #[tokio::test]
    async fn client_scoped_handler_only_receives_its_own_providers_events() {
        let (registry, executor) = new_executor();
        let provider_a = EventingProvider::new(false);
        let provider_b = EventingProvider::new(false);

        let outcome_a = registry.set_named_provider("a", provider_a.clone()).await;
        executor.watch(outcome_a.provider.clone(), outcome_a.newly_registered).await;
        let outcome_b = registry.set_named_provider("b", provider_b.clone()).await;
        executor.watch(outcome_b.provider.clone(), outcome_b.newly_registered).await;

        let (tx, mut rx) = mpsc::channel(4);
        let handler: EventHandler = Arc::new(move |details: EventDetails| {
            let _ = tx.try_send(details);
        });
        executor.add_client_handler("a", EventType::ConfigChange, handler).await;

        provider_b.emit(Event::new(EventType::ConfigChange, "eventing-test")).await;
        provider_a.emit(Event::new(EventType::ConfigChange, "eventing-test")).await;

        let details = tokio::time::timeout(std::time::Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(details.client_name.as_deref(), Some("a"));

        let second = tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv()).await;
        assert!(second.is_err(), "should not have received provider b's event");
    }

    #[tokio::test]
    async fn unbound_clients_observe_default_providers_events() {
        let (registry, executor) = new_executor();
        let default_provider = EventingProvider::new(false);
        let outcome = registry.set_default_provider(default_provider.clone()).await;
        executor.watch(outcome.provider.clone(), outcome.newly_registered).await;
        registry.register_client_name("unbound").await;

        let (tx, mut rx) = mpsc::channel(1);
        let handler: EventHandler = Arc::new(move |details: EventDetails| {
            let _ = tx.try_send(details);
        });
        executor.add_client_handler("unbound", EventType::Stale, handler).await;

        default_provider.emit(Event::new(EventType::Stale, "eventing-test")).await;
        let details = tokio::time::timeout(std::time::Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(details.client_name.as_deref(), Some("unbound"));
    }

    #[tokio::test]
    async fn handler_panic_does_not_block_other_handlers() {
        let (registry, executor) = new_executor();
        let provider = EventingProvider::new(false);
        let outcome = registry.set_default_provider(provider.clone()).await;
        executor.watch(outcome.provider.clone(), outcome.newly_registered).await;

        let panicking: EventHandler = Arc::new(|_details: EventDetails| {
            panic!("handler blew up");
        });
        let (tx, mut rx) = mpsc::channel(1);
        let survives: EventHandler = Arc::new(move |details: EventDetails| {
            let _ = tx.try_send(details);
        });
        executor.add_api_handler(EventType::Error, panicking).await;
        executor.add_api_handler(EventType::Error, survives).await;

        provider.emit(Event::new(EventType::Error, "eventing-test")).await;
        let details = tokio::time::timeout(std::time::Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(details.event.event_type, EventType::Error);
    }

    #[tokio::test]
    async fn remove_handler_stops_future_dispatch() {
        let (registry, executor) = new_executor();
        let provider = EventingProvider::new(false);
        let outcome = registry.set_default_provider(provider.clone()).await;
        executor.watch(outcome.provider.clone(), outcome.newly_registered).await;

        let (tx, mut rx) = mpsc::channel(2);
        let handler: EventHandler = Arc::new(move |details: EventDetails| {
            let _ = tx.try_send(details);
        });
        let token = executor.add_api_handler(EventType::ConfigChange, handler).await;
        executor.remove_handler(token).await;

        provider.emit(Event::new(EventType::ConfigChange, "eventing-test")).await;
        let result = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await;
        assert!(result.is_err(), "removed handler must not fire");
    }
}
