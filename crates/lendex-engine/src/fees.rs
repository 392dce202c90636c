//! Fee notification
//!
//! Settlement hands the platform's share of interest to a [`FeeNotifier`],
//! which queues it and returns immediately. A background worker delivers each
//! [`FeeNotice`] to the [`FeeSink`] with bounded retries:
//! - `Ok(true)`: accepted
//! - `Ok(false)`: rejected by the sink, not retried
//! - `Err(_)`: retried with exponential backoff until `max_attempts`
//!
//! Delivery outcomes are logged and counted, never reported to the settlement.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Fee sink errors; all are treated as transient
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeeSinkError {
    #[error("Fee sink unavailable: {0}")]
    Unavailable(String),

    #[error("Fee sink timed out after {0}ms")]
    Timeout(u64),
}

/// Downstream revenue accounting
#[async_trait]
pub trait FeeSink: Send + Sync {
    /// Returns whether the sink accepted the fee
    async fn collect(
        &self,
        stream_id: u32,
        amount_usd: Decimal,
        description: &str,
    ) -> Result<bool, FeeSinkError>;
}

/// Platform fee owed to a revenue stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeNotice {
    pub notice_id: Uuid,
    pub position_id: Uuid,
    pub stream_id: u32,
    pub amount_usd: Decimal,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl FeeNotice {
    pub fn new(
        position_id: Uuid,
        stream_id: u32,
        amount_usd: Decimal,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            notice_id: Uuid::now_v7(),
            position_id,
            stream_id,
            amount_usd,
            description: description.into(),
            created_at,
        }
    }
}

/// Configuration for the fee notifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeNotifierConfig {
    /// Queue capacity; notices beyond it are dropped
    pub channel_buffer: usize,
    /// Delivery attempts per notice
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for FeeNotifierConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

/// Notifier counters
#[derive(Debug, Default)]
pub struct NotifierStats {
    pub enqueued: AtomicU64,
    pub delivered: AtomicU64,
    pub rejected: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
    pub retries: AtomicU64,
}

/// Point-in-time copy of [`NotifierStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotifierSnapshot {
    pub enqueued: u64,
    pub delivered: u64,
    pub rejected: u64,
    pub failed: u64,
    pub dropped: u64,
    pub retries: u64,
}

impl NotifierStats {
    pub fn snapshot(&self) -> NotifierSnapshot {
        NotifierSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// At-least-once, non-blocking fee notifier
#[derive(Clone)]
pub struct FeeNotifier {
    notice_tx: mpsc::Sender<FeeNotice>,
    stats: Arc<NotifierStats>,
}

impl FeeNotifier {
    /// Create a notifier and spawn its delivery worker on the current runtime
    pub fn spawn(config: FeeNotifierConfig, sink: Arc<dyn FeeSink>) -> Self {
        let (notice_tx, notice_rx) = mpsc::channel(config.channel_buffer.max(1));
        let stats = Arc::new(NotifierStats::default());

        tokio::spawn(Self::delivery_worker(config, notice_rx, sink, stats.clone()));

        Self { notice_tx, stats }
    }

    /// Queue a notice; never waits. Returns whether it was queued.
    #[instrument(skip(self, notice), fields(position_id = %notice.position_id))]
    pub fn notify(&self, notice: FeeNotice) -> bool {
        if notice.amount_usd <= Decimal::ZERO {
            debug!(amount_usd = %notice.amount_usd, "Skipping zero fee notice");
            return false;
        }

        match self.notice_tx.try_send(notice) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(notice)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(notice_id = %notice.notice_id, amount_usd = %notice.amount_usd, "Fee queue full, notice dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(notice)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(notice_id = %notice.notice_id, "Fee notifier stopped, notice dropped");
                false
            }
        }
    }

    pub fn stats(&self) -> NotifierSnapshot {
        self.stats.snapshot()
    }

    async fn delivery_worker(
        config: FeeNotifierConfig,
        mut notice_rx: mpsc::Receiver<FeeNotice>,
        sink: Arc<dyn FeeSink>,
        stats: Arc<NotifierStats>,
    ) {
        while let Some(notice) = notice_rx.recv().await {
            Self::deliver(&config, sink.as_ref(), &stats, notice).await;
        }
        info!("Fee notice channel closed, delivery worker exiting");
    }

    async fn deliver(
        config: &FeeNotifierConfig,
        sink: &dyn FeeSink,
        stats: &NotifierStats,
        notice: FeeNotice,
    ) {
        let max_attempts = config.max_attempts.max(1);
        let max_backoff = Duration::from_millis(config.max_backoff_ms);
        let mut backoff = Duration::from_millis(config.initial_backoff_ms).min(max_backoff);

        for attempt in 1..=max_attempts {
            match sink
                .collect(notice.stream_id, notice.amount_usd, &notice.description)
                .await
            {
                Ok(true) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(notice_id = %notice.notice_id, attempt, "Fee notice delivered");
                    return;
                }
                Ok(false) => {
                    stats.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(notice_id = %notice.notice_id, amount_usd = %notice.amount_usd, "Fee notice rejected by sink");
                    return;
                }
                Err(e) if attempt < max_attempts => {
                    stats.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(notice_id = %notice.notice_id, attempt, error = %e, "Fee notice delivery failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        notice_id = %notice.notice_id,
                        position_id = %notice.position_id,
                        amount_usd = %notice.amount_usd,
                        attempts = attempt,
                        error = %e,
                        "Fee notice delivery exhausted retries"
                    );
                    return;
                }
            }
        }
    }
}

/// Sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFeeSink;

#[async_trait]
impl FeeSink for LoggingFeeSink {
    async fn collect(
        &self,
        stream_id: u32,
        amount_usd: Decimal,
        description: &str,
    ) -> Result<bool, FeeSinkError> {
        info!(stream_id, amount_usd = %amount_usd, description, "Platform fee collected");
        Ok(true)
    }
}

/// Fee accepted by an [`InMemoryFeeSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedFee {
    pub stream_id: u32,
    pub amount_usd: Decimal,
    pub description: String,
}

/// Sink recording accepted fees in memory
#[derive(Debug, Default)]
pub struct InMemoryFeeSink {
    collected: Mutex<Vec<CollectedFee>>,
    /// Transient failures to return before accepting
    fail_next: AtomicU32,
    reject: AtomicBool,
    changed: Notify,
}

impl InMemoryFeeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls with `Unavailable`
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Answer `Ok(false)` to every call
    pub fn reject_all(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn collected(&self) -> Vec<CollectedFee> {
        self.collected.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.collected.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` fees were accepted
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let changed = self.changed.notified();
            if self.len() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return self.len() >= count;
            }
        }
    }
}

#[async_trait]
impl FeeSink for InMemoryFeeSink {
    async fn collect(
        &self,
        stream_id: u32,
        amount_usd: Decimal,
        description: &str,
    ) -> Result<bool, FeeSinkError> {
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FeeSinkError::Unavailable("injected failure".into()));
        }
        if self.reject.load(Ordering::SeqCst) {
            return Ok(false);
        }

        self.collected.lock().push(CollectedFee {
            stream_id,
            amount_usd,
            description: description.to_string(),
        });
        self.changed.notify_waiters();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fast_config() -> FeeNotifierConfig {
        FeeNotifierConfig {
            channel_buffer: 8,
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    fn notice(amount: Decimal) -> FeeNotice {
        FeeNotice::new(Uuid::now_v7(), 1, amount, "Lending fee", Utc::now())
    }

    #[tokio::test]
    async fn test_notice_delivered() {
        let sink = Arc::new(InMemoryFeeSink::new());
        let notifier = FeeNotifier::spawn(fast_config(), sink.clone());

        assert!(notifier.notify(notice(dec!(1.04794521))));
        assert!(sink.wait_for(1, Duration::from_secs(1)).await);

        let collected = sink.collected();
        assert_eq!(collected[0].stream_id, 1);
        assert_eq!(collected[0].amount_usd, dec!(1.04794521));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let sink = Arc::new(InMemoryFeeSink::new());
        sink.fail_next(2);
        let notifier = FeeNotifier::spawn(fast_config(), sink.clone());

        notifier.notify(notice(dec!(5)));
        assert!(sink.wait_for(1, Duration::from_secs(1)).await);
        assert_eq!(notifier.stats().retries, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_counted() {
        let sink = Arc::new(InMemoryFeeSink::new());
        sink.fail_next(10);
        let notifier = FeeNotifier::spawn(fast_config(), sink.clone());

        notifier.notify(notice(dec!(5)));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while notifier.stats().failed == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(notifier.stats().failed, 1);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_zero_fee_skipped() {
        let sink = Arc::new(InMemoryFeeSink::new());
        let notifier = FeeNotifier::spawn(fast_config(), sink);

        assert!(!notifier.notify(notice(Decimal::ZERO)));
        assert_eq!(notifier.stats().enqueued, 0);
    }
}
