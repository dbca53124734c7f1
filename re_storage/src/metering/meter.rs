use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::sink::DynMeteringSink;
use crate::config::MeteringConfig;
use crate::storage::RequestContext;

/// One customer's usage over one aggregation window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub customer_id: String,
    pub byte_count: u64,
    pub request_count: u64,
    pub env_dimension: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
struct UsageAccumulator {
    byte_count: u64,
    request_count: u64,
}

/// Counters for the window currently being aggregated.
struct MeterWindow {
    start: DateTime<Utc>,
    customers: HashMap<String, UsageAccumulator>,
}

impl MeterWindow {
    fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            customers: HashMap::new(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushSummary {
    pub emitted: usize,
    /// Failed this window, will be re-sent on the next one.
    pub deferred: usize,
    /// Failed on their retry and were given up on.
    pub dropped: usize,
}

pub struct UsageMeter {
    customer_id_prefix: String,
    env_dimension: String,
    window_duration: Duration,
    sink: DynMeteringSink,
    window: Mutex<MeterWindow>,
    /// Events whose first emission failed. Also serializes flushes.
    retry_queue: tokio::sync::Mutex<Vec<UsageEvent>>,
    shutdown_signal: Mutex<Option<oneshot::Sender<()>>>,
    flush_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl UsageMeter {
    pub fn new(config: &MeteringConfig, sink: DynMeteringSink) -> Arc<Self> {
        Arc::new(Self {
            customer_id_prefix: config.customer_id_prefix.clone(),
            env_dimension: config.env_dimension.clone(),
            window_duration: Duration::from_secs(config.aggregation_window_duration_secs),
            sink,
            window: Mutex::new(MeterWindow::new(Utc::now())),
            retry_queue: tokio::sync::Mutex::new(Vec::new()),
            shutdown_signal: Mutex::new(None),
            flush_handle: tokio::sync::Mutex::new(None),
        })
    }

    fn lock_window(&self) -> std::sync::MutexGuard<'_, MeterWindow> {
        self.window.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Adds one request of `bytes` to the caller's customer in the current window.
    pub fn record(&self, ctx: &RequestContext, bytes: u64) {
        let mut window = self.lock_window();
        let usage = window
            .customers
            .entry(ctx.customer_id().to_string())
            .or_default();
        usage.byte_count = usage.byte_count.saturating_add(bytes);
        usage.request_count = usage.request_count.saturating_add(1);
    }

    /// Closes the current window, emits its events plus the events that
    /// failed last window, and starts a fresh window.
    pub async fn flush_window(&self) -> FlushSummary {
        let mut retry_queue = self.retry_queue.lock().await;

        let window_end = Utc::now();
        let closed = std::mem::replace(&mut *self.lock_window(), MeterWindow::new(window_end));

        let retries = std::mem::take(&mut *retry_queue);
        let fresh: Vec<UsageEvent> = closed
            .customers
            .into_iter()
            .filter(|(_, usage)| usage.byte_count > 0 || usage.request_count > 0)
            .map(|(customer, usage)| UsageEvent {
                customer_id: format!("{}{}", self.customer_id_prefix, customer),
                byte_count: usage.byte_count,
                request_count: usage.request_count,
                env_dimension: self.env_dimension.clone(),
                window_start: closed.start,
                window_end,
            })
            .collect();

        let mut summary = FlushSummary::default();
        for event in retries {
            match self.sink.emit(&event).await {
                Ok(()) => summary.emitted += 1,
                Err(e) => {
                    tracing::error!(
                        customer_id = %event.customer_id,
                        "dropping usage event after retry failed: {e:#}"
                    );
                    summary.dropped += 1;
                }
            }
        }
        for event in fresh {
            match self.sink.emit(&event).await {
                Ok(()) => summary.emitted += 1,
                Err(e) => {
                    tracing::warn!(
                        customer_id = %event.customer_id,
                        "usage event emission failed, retrying next window: {e:#}"
                    );
                    retry_queue.push(event);
                    summary.deferred += 1;
                }
            }
        }

        tracing::debug!(
            emitted = summary.emitted,
            deferred = summary.deferred,
            dropped = summary.dropped,
            "metering window flushed"
        );
        summary
    }

    /// Starts flushing every aggregation window on a background task.
    pub async fn start(self: &Arc<Self>) {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        *self.shutdown_signal.lock().unwrap_or_else(|p| p.into_inner()) = Some(shutdown_tx);

        let meter = self.clone();
        let period = self.window_duration;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        meter.flush_window().await;
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("Metering flush loop shutting down");
                        break;
                    }
                }
            }
        });

        *self.flush_handle.lock().await = Some(handle);
    }

    /// Stops the flush loop and emits whatever the open window holds.
    pub async fn shutdown(&self) -> FlushSummary {
        let signal = self
            .shutdown_signal
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(tx) = signal {
            let _ = tx.send(());
        }
        if let Some(handle) = self.flush_handle.lock().await.take() {
            let _ = handle.await;
        }
        self.flush_window().await
    }
}
