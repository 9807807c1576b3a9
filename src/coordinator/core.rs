//! Main coordinator implementation

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::{Result, eyre};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{PushChannelClient, Subscription};
use crate::domain::Envelope;
use crate::events::{EventBus, SyncEvent};
use crate::fetch::{Fetcher, fetch_fn};
use crate::scheduler::{TaskConfig, TaskScheduler};

use super::config::{CoordinatorConfig, FULL_UPDATE_SUBTYPE, METRIC_UPDATE_SUBTYPE};
use super::snapshot::SyncSnapshot;

/// Outcome of one full refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub updated: usize,
    pub failed: usize,
}

/// State shared with scheduler tasks, channel handlers, and the auto-refresh
/// timer; `alive` gates every snapshot write so work resolving after teardown
/// is discarded
struct CoordinatorShared {
    snapshot: RwLock<SyncSnapshot>,
    fetchers: RwLock<HashMap<String, Arc<dyn Fetcher>>>,
    alive: AtomicBool,
    events: EventBus,
}

impl CoordinatorShared {
    /// Re-invoke one fetcher and update only that slot of the snapshot
    async fn refresh_metric(&self, key: &str) -> Result<Value> {
        debug!(metric = %key, "CoordinatorShared::refresh_metric: called");
        let fetcher = self
            .fetchers
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| eyre!("Unknown metric: {}", key))?;

        let result = fetcher.fetch().await;

        if !self.alive.load(Ordering::SeqCst) {
            debug!(metric = %key, "refresh_metric: coordinator torn down, discarding outcome");
            return result;
        }
        match &result {
            Ok(value) => {
                self.snapshot.write().await.record_success(key, value.clone());
                self.events.emit(SyncEvent::MetricRefreshed { metric: key.to_string() });
            }
            Err(err) => {
                self.snapshot.write().await.record_failure(key, err.to_string());
            }
        }
        result
    }

    /// Fan out every registered fetcher concurrently and wait for all to
    /// settle; failed metrics keep their prior values
    async fn full_refresh(&self) -> RefreshSummary {
        debug!("CoordinatorShared::full_refresh: called");
        let fetchers: Vec<(String, Arc<dyn Fetcher>)> = self
            .fetchers
            .read()
            .await
            .iter()
            .map(|(key, fetcher)| (key.clone(), Arc::clone(fetcher)))
            .collect();

        self.snapshot.write().await.loading = true;

        let settled = futures::future::join_all(fetchers.into_iter().map(|(key, fetcher)| async move {
            let result = fetcher.fetch().await;
            (key, result)
        }))
        .await;

        if !self.alive.load(Ordering::SeqCst) {
            debug!("full_refresh: coordinator torn down, discarding outcomes");
            return RefreshSummary { updated: 0, failed: 0 };
        }

        let total = settled.len();
        let mut failed = 0usize;
        {
            let mut snapshot = self.snapshot.write().await;
            for (key, result) in settled {
                match result {
                    Ok(value) => snapshot.record_success(&key, value),
                    Err(err) => {
                        failed += 1;
                        snapshot.record_failure(&key, err.to_string());
                    }
                }
            }
            snapshot.loading = false;
            snapshot.failed_count = failed;
            snapshot.error_summary = if failed > 0 {
                Some(format!("{} of {} metrics failed to refresh", failed, total))
            } else {
                None
            };
        }

        let summary = RefreshSummary {
            updated: total - failed,
            failed,
        };
        if failed > 0 {
            warn!(failed, total, "Full refresh settled with failures");
        }
        self.events.emit(SyncEvent::RefreshCompleted {
            updated: summary.updated,
            failed: summary.failed,
        });
        summary
    }
}

/// The SyncCoordinator maintains the metric snapshot and bridges scheduler
/// task outcomes and push-channel events into snapshot updates.
///
/// Arbitration between the two update channels is a caller-level discipline:
/// when the push channel is the primary path, construct with
/// `auto_refresh_interval_ms: None` and register metrics without poll
/// configs - nothing here prevents a misconfiguration that refreshes twice.
/// Deployments multiplexing one channel client across several coordinators
/// should manage the connection at the application root instead of calling
/// start()/shutdown() per coordinator.
pub struct SyncCoordinator {
    config: CoordinatorConfig,
    scheduler: Arc<TaskScheduler>,
    channel: Arc<PushChannelClient>,
    shared: Arc<CoordinatorShared>,
    subscriptions: Mutex<Vec<Subscription>>,
    task_ids: Mutex<Vec<String>>,
    auto_refresh: Mutex<Option<JoinHandle<()>>>,
}

impl SyncCoordinator {
    /// Create a coordinator over an injected scheduler and channel client
    pub fn new(
        config: CoordinatorConfig,
        scheduler: Arc<TaskScheduler>,
        channel: Arc<PushChannelClient>,
        events: EventBus,
    ) -> Self {
        debug!(?config, "SyncCoordinator::new: called");
        Self {
            config,
            scheduler,
            channel,
            shared: Arc::new(CoordinatorShared {
                snapshot: RwLock::new(SyncSnapshot::default()),
                fetchers: RwLock::new(HashMap::new()),
                alive: AtomicBool::new(true),
                events,
            }),
            subscriptions: Mutex::new(Vec::new()),
            task_ids: Mutex::new(Vec::new()),
            auto_refresh: Mutex::new(None),
        }
    }

    /// Register one metric's fetcher and initialize its snapshot slot
    ///
    /// With a poll config, a scheduler task is registered whose operation is
    /// the targeted refresh itself, so poll-driven and push-driven updates
    /// share one code path.
    pub async fn register_metric(&self, key: &str, fetcher: Arc<dyn Fetcher>, poll: Option<TaskConfig>) -> Result<()> {
        debug!(metric = %key, polled = poll.is_some(), "SyncCoordinator::register_metric: called");
        {
            let mut fetchers = self.shared.fetchers.write().await;
            if fetchers.contains_key(key) {
                return Err(eyre!("Metric already registered: {}", key));
            }
            fetchers.insert(key.to_string(), fetcher);
        }
        self.shared
            .snapshot
            .write()
            .await
            .metrics
            .entry(key.to_string())
            .or_default();

        if let Some(config) = poll {
            let shared = Arc::clone(&self.shared);
            let metric = key.to_string();
            let operation = fetch_fn(move || {
                let shared = Arc::clone(&shared);
                let metric = metric.clone();
                async move { shared.refresh_metric(&metric).await }
            });

            let task_id = format!("poll:{}", key);
            self.scheduler.add_task(&task_id, key, operation, config).await?;
            self.task_ids.lock().await.push(task_id);
        }
        Ok(())
    }

    /// Wire the push channel and start the optional coarse auto-refresh timer
    ///
    /// A failed initial connect is logged, not raised: the channel's own
    /// reconnection machinery keeps trying.
    pub async fn start(&self) {
        debug!("SyncCoordinator::start: called");

        let shared = Arc::clone(&self.shared);
        let subscription = self
            .channel
            .subscribe(&self.config.update_event_type, move |envelope| {
                handle_update_event(&shared, envelope);
                Ok(())
            })
            .await;
        self.subscriptions.lock().await.push(subscription);

        if let Err(err) = self.channel.connect().await {
            warn!(error = %err, "Push channel connect failed; reconnection continues in the background");
        }

        if let Some(interval) = self.config.auto_refresh_interval() {
            let shared = Arc::clone(&self.shared);
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                // interval's first tick completes immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if !shared.alive.load(Ordering::SeqCst) {
                        break;
                    }
                    shared.full_refresh().await;
                }
            });
            *self.auto_refresh.lock().await = Some(handle);
        }

        info!("SyncCoordinator started");
    }

    /// Issue every registered fetcher concurrently and settle all outcomes
    pub async fn full_refresh(&self) -> RefreshSummary {
        self.shared.full_refresh().await
    }

    /// Re-invoke exactly one fetcher and update only that snapshot slot
    pub async fn refresh_metric(&self, key: &str) -> Result<Value> {
        self.shared.refresh_metric(key).await
    }

    /// Clone the current read model
    pub async fn snapshot(&self) -> SyncSnapshot {
        self.shared.snapshot.read().await.clone()
    }

    /// Tear down: stop the auto-refresh timer, remove registered scheduler
    /// tasks, unsubscribe channel handlers, and disconnect the channel
    ///
    /// In-flight fetches that resolve afterwards are discarded rather than
    /// written to the snapshot.
    pub async fn shutdown(&self) {
        debug!("SyncCoordinator::shutdown: called");
        self.shared.alive.store(false, Ordering::SeqCst);

        if let Some(handle) = self.auto_refresh.lock().await.take() {
            handle.abort();
        }
        for task_id in self.task_ids.lock().await.drain(..) {
            if let Err(err) = self.scheduler.remove_task(&task_id).await {
                debug!(%task_id, error = %err, "shutdown: task already gone");
            }
        }
        for subscription in self.subscriptions.lock().await.drain(..) {
            self.channel.unsubscribe(subscription).await;
        }
        self.channel.disconnect().await;

        info!("SyncCoordinator shut down");
    }
}

/// Map an inbound update envelope to a refresh operation
///
/// Unrecognized subtypes are logged and ignored; they are not errors.
fn handle_update_event(shared: &Arc<CoordinatorShared>, envelope: &Envelope) {
    let subtype = envelope.data.get("subtype").and_then(Value::as_str).unwrap_or_default();
    match subtype {
        FULL_UPDATE_SUBTYPE => {
            debug!("handle_update_event: full refresh requested");
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                shared.full_refresh().await;
            });
        }
        METRIC_UPDATE_SUBTYPE => match envelope.data.get("metric").and_then(Value::as_str) {
            Some(metric) => {
                debug!(%metric, "handle_update_event: targeted refresh requested");
                let shared = Arc::clone(shared);
                let metric = metric.to_string();
                tokio::spawn(async move {
                    if let Err(err) = shared.refresh_metric(&metric).await {
                        debug!(%metric, error = %err, "Push-driven refresh failed");
                    }
                });
            }
            None => debug!("handle_update_event: metric update without a metric key, ignoring"),
        },
        other => debug!(subtype = %other, "handle_update_event: unrecognized subtype, ignoring"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, ChannelState, MemoryTransport};
    use serde_json::json;
    use std::sync::atomic::AtomicBool as StdAtomicBool;
    use std::time::Duration;

    fn engine(
        config: CoordinatorConfig,
    ) -> (
        Arc<SyncCoordinator>,
        Arc<TaskScheduler>,
        Arc<PushChannelClient>,
        crate::channel::MemoryPeer,
    ) {
        let bus = EventBus::default();
        let scheduler = Arc::new(TaskScheduler::new(bus.clone()));
        let (transport, peer) = MemoryTransport::new();
        let channel = Arc::new(PushChannelClient::new(
            ChannelConfig {
                heartbeat_interval_ms: 0,
                ..Default::default()
            },
            transport,
            bus.clone(),
        ));
        let coordinator = Arc::new(SyncCoordinator::new(
            config,
            Arc::clone(&scheduler),
            Arc::clone(&channel),
            bus,
        ));
        (coordinator, scheduler, channel, peer)
    }

    fn static_fetcher(value: Value) -> Arc<dyn Fetcher> {
        fetch_fn(move || {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    /// Succeeds until the flag flips, then fails
    fn flippable_fetcher(value: Value, broken: Arc<StdAtomicBool>) -> Arc<dyn Fetcher> {
        fetch_fn(move || {
            let value = value.clone();
            let broken = Arc::clone(&broken);
            async move {
                if broken.load(Ordering::SeqCst) {
                    Err(eyre!("backend unavailable"))
                } else {
                    Ok(value)
                }
            }
        })
    }

    #[tokio::test]
    async fn test_targeted_refresh_updates_one_slot() {
        let (coordinator, _, _, _) = engine(CoordinatorConfig::default());
        coordinator
            .register_metric("cpu", static_fetcher(json!(0.5)), None)
            .await
            .unwrap();
        coordinator
            .register_metric("mem", static_fetcher(json!(0.8)), None)
            .await
            .unwrap();

        let value = coordinator.refresh_metric("cpu").await.unwrap();
        assert_eq!(value, json!(0.5));

        let snapshot = coordinator.snapshot().await;
        assert_eq!(snapshot.metric("cpu").unwrap().value, Some(json!(0.5)));
        assert!(snapshot.metric("mem").unwrap().value.is_none(), "other slots untouched");
    }

    #[tokio::test]
    async fn test_refresh_unknown_metric_errors() {
        let (coordinator, _, _, _) = engine(CoordinatorConfig::default());
        let err = coordinator.refresh_metric("ghost").await.unwrap_err();
        assert!(err.to_string().contains("Unknown metric"));
    }

    #[tokio::test]
    async fn test_duplicate_metric_rejected() {
        let (coordinator, _, _, _) = engine(CoordinatorConfig::default());
        coordinator
            .register_metric("cpu", static_fetcher(json!(1)), None)
            .await
            .unwrap();
        assert!(
            coordinator
                .register_metric("cpu", static_fetcher(json!(2)), None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_full_refresh_settles_partial_failures() {
        let (coordinator, _, _, _) = engine(CoordinatorConfig::default());
        let broken = Arc::new(StdAtomicBool::new(false));

        for key in ["a", "b", "c", "d"] {
            coordinator
                .register_metric(key, static_fetcher(json!(key)), None)
                .await
                .unwrap();
        }
        for key in ["e", "f"] {
            coordinator
                .register_metric(key, flippable_fetcher(json!(key), Arc::clone(&broken)), None)
                .await
                .unwrap();
        }

        // First pass: everything succeeds and seeds prior values
        let summary = coordinator.full_refresh().await;
        assert_eq!(summary, RefreshSummary { updated: 6, failed: 0 });
        assert!(coordinator.snapshot().await.error_summary.is_none());

        // Second pass: two fetchers fail; their slots keep prior values
        broken.store(true, Ordering::SeqCst);
        let summary = coordinator.full_refresh().await;
        assert_eq!(summary, RefreshSummary { updated: 4, failed: 2 });

        let snapshot = coordinator.snapshot().await;
        assert!(!snapshot.loading);
        assert_eq!(snapshot.failed_count, 2);
        assert_eq!(snapshot.error_summary.as_deref(), Some("2 of 6 metrics failed to refresh"));
        for key in ["e", "f"] {
            let entry = snapshot.metric(key).unwrap();
            assert_eq!(entry.value, Some(json!(key)), "prior value retained");
            assert!(entry.last_error.is_some());
        }
        for key in ["a", "b", "c", "d"] {
            assert!(snapshot.metric(key).unwrap().last_error.is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_event_drives_targeted_refresh() {
        let (coordinator, _, _, peer) = engine(CoordinatorConfig::default());
        coordinator
            .register_metric("cpu", static_fetcher(json!(0.7)), None)
            .await
            .unwrap();
        coordinator.start().await;

        peer.push(&Envelope::new(
            "metrics",
            json!({ "subtype": "metric_update", "metric": "cpu" }),
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = coordinator.snapshot().await;
        assert_eq!(snapshot.metric("cpu").unwrap().value, Some(json!(0.7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_event_drives_full_refresh() {
        let (coordinator, _, _, peer) = engine(CoordinatorConfig::default());
        coordinator
            .register_metric("cpu", static_fetcher(json!(1)), None)
            .await
            .unwrap();
        coordinator
            .register_metric("mem", static_fetcher(json!(2)), None)
            .await
            .unwrap();
        coordinator.start().await;

        peer.push(&Envelope::new("metrics", json!({ "subtype": "full_update" })));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = coordinator.snapshot().await;
        assert_eq!(snapshot.metric("cpu").unwrap().value, Some(json!(1)));
        assert_eq!(snapshot.metric("mem").unwrap().value, Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_subtype_ignored() {
        let (coordinator, _, _, peer) = engine(CoordinatorConfig::default());
        coordinator
            .register_metric("cpu", static_fetcher(json!(1)), None)
            .await
            .unwrap();
        coordinator.start().await;

        peer.push(&Envelope::new("metrics", json!({ "subtype": "confetti" })));
        peer.push(&Envelope::new("metrics", json!({ "subtype": "metric_update" })));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = coordinator.snapshot().await;
        assert!(snapshot.metric("cpu").unwrap().value.is_none(), "nothing refreshed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_timer() {
        let (coordinator, _, _, _) = engine(CoordinatorConfig {
            auto_refresh_interval_ms: Some(100),
            ..Default::default()
        });
        coordinator
            .register_metric("cpu", static_fetcher(json!(9)), None)
            .await
            .unwrap();
        coordinator.start().await;

        tokio::time::sleep(Duration::from_millis(250)).await;
        let snapshot = coordinator.snapshot().await;
        assert_eq!(snapshot.metric("cpu").unwrap().value, Some(json!(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_task_feeds_snapshot() {
        let (coordinator, scheduler, _, _) = engine(CoordinatorConfig::default());
        scheduler.start().await;

        coordinator
            .register_metric(
                "cpu",
                static_fetcher(json!(0.3)),
                Some(TaskConfig {
                    interval_ms: 100,
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let snapshot = coordinator.snapshot().await;
        assert_eq!(snapshot.metric("cpu").unwrap().value, Some(json!(0.3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_inflight_outcome() {
        let (coordinator, scheduler, channel, _) = engine(CoordinatorConfig::default());
        let slow = fetch_fn(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!("late"))
        });
        coordinator.register_metric("slow", slow, None).await.unwrap();
        coordinator.start().await;

        let inflight = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh_metric("slow").await })
        };
        tokio::task::yield_now().await;

        coordinator.shutdown().await;

        // The fetch itself resolves, but the snapshot write is a no-op
        assert!(inflight.await.unwrap().is_ok());
        let snapshot = coordinator.snapshot().await;
        assert!(snapshot.metric("slow").unwrap().value.is_none(), "post-teardown write discarded");

        assert_eq!(channel.state().await, ChannelState::Disconnected);
        assert!(scheduler.all_tasks().await.is_empty(), "coordinator tasks removed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_unsubscribes_channel_handlers() {
        let (coordinator, _, channel, peer) = engine(CoordinatorConfig::default());
        coordinator
            .register_metric("cpu", static_fetcher(json!(1)), None)
            .await
            .unwrap();
        coordinator.start().await;
        coordinator.shutdown().await;

        // Reconnect manually and push an update; no handler reacts
        channel.connect().await.unwrap();
        peer.push(&Envelope::new(
            "metrics",
            json!({ "subtype": "metric_update", "metric": "cpu" }),
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = coordinator.snapshot().await;
        assert!(snapshot.metric("cpu").unwrap().value.is_none());
    }
}
