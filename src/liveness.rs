//! Liveness-signal adapter
//!
//! The host owns a boolean signal ("page is visible / process is active") and
//! publishes it through a tokio watch channel; this adapter translates edges
//! of that signal into scheduler-wide pause and resume calls. The engine
//! itself stays host-agnostic.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::scheduler::TaskScheduler;

/// Bridge a liveness signal into pause_all/resume_all
///
/// Pauses immediately if the signal is already false at spawn time. The task
/// ends when the host drops the sender.
pub fn spawn_liveness_adapter(scheduler: Arc<TaskScheduler>, mut signal: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("liveness adapter started");
        if !*signal.borrow() {
            info!("Liveness lost, pausing all tasks");
            scheduler.pause_all().await;
        }
        while signal.changed().await.is_ok() {
            let alive = *signal.borrow();
            if alive {
                info!("Liveness restored, resuming all tasks");
                scheduler.resume_all().await;
            } else {
                info!("Liveness lost, pausing all tasks");
                scheduler.pause_all().await;
            }
        }
        debug!("liveness adapter stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::fetch::fetch_fn;
    use crate::scheduler::TaskConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_signal_pauses_and_resumes() {
        let scheduler = Arc::new(TaskScheduler::new(EventBus::default()));
        let counter = Arc::new(AtomicU32::new(0));
        let fetcher = {
            let counter = Arc::clone(&counter);
            fetch_fn(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("ok"))
                }
            })
        };

        scheduler.start().await;
        scheduler
            .add_task(
                "cpu",
                "CPU",
                fetcher,
                TaskConfig {
                    interval_ms: 100,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let (tx, rx) = watch::channel(true);
        let adapter = spawn_liveness_adapter(Arc::clone(&scheduler), rx);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(counter.load(Ordering::SeqCst) > 0);

        // Hidden: nothing executes
        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let hidden_at = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), hidden_at);

        // Visible again: rescheduled from now
        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(counter.load(Ordering::SeqCst) > hidden_at);

        drop(tx);
        adapter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_initially_hidden_pauses_at_spawn() {
        let scheduler = Arc::new(TaskScheduler::new(EventBus::default()));
        let counter = Arc::new(AtomicU32::new(0));
        let fetcher = {
            let counter = Arc::clone(&counter);
            fetch_fn(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("ok"))
                }
            })
        };

        scheduler.start().await;
        scheduler
            .add_task(
                "cpu",
                "CPU",
                fetcher,
                TaskConfig {
                    interval_ms: 100,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let _adapter = spawn_liveness_adapter(Arc::clone(&scheduler), rx);
        tokio::task::yield_now().await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        drop(tx);
    }
}
