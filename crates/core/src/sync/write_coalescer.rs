//! Debounced, last-write-wins persistence of staged state.
//!
//! Each `stage` supersedes the previously staged value and re-arms the
//! flush timer. Superseded timers wake up, see a newer generation and do
//! nothing, so only the state staged last before a quiet period is written.
//! A timer write that fails re-arms itself with a growing delay until it
//! succeeds or newer state is staged.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};

use crate::errors::Result;

/// Upper bound of the retry delay after failed timer writes.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Destination of coalesced batches.
#[async_trait]
pub trait BatchSink<T>: Send + Sync {
    async fn write_batch(&self, batch: T) -> Result<()>;
}

struct Pending<T> {
    value: Option<T>,
    generation: u64,
}

struct Inner<T> {
    sink: Arc<dyn BatchSink<T>>,
    delay: Duration,
    pending: Mutex<Pending<T>>,
    /// Serializes writes so a flush never overlaps another.
    write_lock: tokio::sync::Mutex<()>,
}

impl<T> Inner<T> {
    fn pending(&self) -> MutexGuard<'_, Pending<T>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone + Send + Sync + 'static> Inner<T> {
    fn arm(self: &Arc<Self>, generation: u64, delay: Duration) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Err(err) = inner.flush_if_current(generation).await else {
                return;
            };
            let still_current = {
                let pending = inner.pending();
                pending.generation == generation && pending.value.is_some()
            };
            if still_current {
                let retry_in = delay.saturating_mul(2).min(MAX_RETRY_DELAY);
                error!(
                    "[Coalescer] Deferred flush failed: {}. Retrying in {:?}",
                    err, retry_in
                );
                inner.arm(generation, retry_in);
            } else {
                error!("[Coalescer] Deferred flush failed: {}", err);
            }
        });
    }

    /// Timer path: writes only if nothing was staged after `generation`.
    async fn flush_if_current(&self, generation: u64) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let batch = {
            let mut pending = self.pending();
            if pending.generation != generation {
                return Ok(());
            }
            pending.value.take()
        };
        match batch {
            Some(batch) => self.write(batch).await,
            None => Ok(()),
        }
    }

    async fn flush_now(&self) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let batch = self.pending().value.take();
        match batch {
            Some(batch) => self.write(batch).await,
            None => Ok(()),
        }
    }

    async fn write(&self, batch: T) -> Result<()> {
        match self.sink.write_batch(batch.clone()).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // Keep the batch for the next flush unless something newer was staged.
                let mut pending = self.pending();
                if pending.value.is_none() {
                    pending.value = Some(batch);
                }
                Err(err)
            }
        }
    }
}

pub struct WriteCoalescer<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + Sync + 'static> WriteCoalescer<T> {
    pub fn new(sink: Arc<dyn BatchSink<T>>, delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                delay,
                pending: Mutex::new(Pending {
                    value: None,
                    generation: 0,
                }),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Records `batch` as the latest desired state and re-arms the timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn stage(&self, batch: T) {
        let generation = {
            let mut pending = self.inner.pending();
            pending.value = Some(batch);
            pending.generation += 1;
            pending.generation
        };

        self.inner.arm(generation, self.inner.delay);
        debug!("[Coalescer] Staged generation {}", generation);
    }

    /// Writes any staged state before returning.
    pub async fn flush(&self) -> Result<()> {
        self.inner.flush_now().await
    }

    /// The staged value not yet written, if any.
    pub fn pending(&self) -> Option<T> {
        self.inner.pending().value.clone()
    }

    pub fn has_pending(&self) -> bool {
        self.inner.pending().value.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{DatabaseError, Error};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<u32>>,
        fail: AtomicBool,
    }

    impl RecordingSink {
        fn writes(&self) -> Vec<u32> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchSink<u32> for RecordingSink {
        async fn write_batch(&self, batch: u32) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Database(DatabaseError::QueryFailed(
                    "disk full".to_string(),
                )));
            }
            self.writes.lock().unwrap().push(batch);
            Ok(())
        }
    }

    fn coalescer(sink: &Arc<RecordingSink>) -> WriteCoalescer<u32> {
        WriteCoalescer::new(sink.clone(), Duration::from_millis(1_000))
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_stages_produce_one_write_of_last_state() {
        let sink = Arc::new(RecordingSink::default());
        let coalescer = coalescer(&sink);

        for value in 1..=5 {
            coalescer.stage(value);
            tokio::time::advance(Duration::from_millis(200)).await;
        }
        assert!(sink.writes().is_empty());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(sink.writes(), vec![5]);
        assert!(!coalescer.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_immediately_and_timer_becomes_noop() {
        let sink = Arc::new(RecordingSink::default());
        let coalescer = coalescer(&sink);

        coalescer.stage(1);
        coalescer.stage(2);
        coalescer.flush().await.expect("flush");
        assert_eq!(sink.writes(), vec![2]);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(sink.writes(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn stage_after_flush_schedules_new_write() {
        let sink = Arc::new(RecordingSink::default());
        let coalescer = coalescer(&sink);

        coalescer.stage(1);
        coalescer.flush().await.expect("flush");
        coalescer.stage(2);
        assert_eq!(coalescer.pending(), Some(2));

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(sink.writes(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_keeps_batch_for_retry() {
        let sink = Arc::new(RecordingSink::default());
        let coalescer = coalescer(&sink);

        sink.fail.store(true, Ordering::SeqCst);
        coalescer.stage(7);
        assert!(coalescer.flush().await.is_err());
        assert_eq!(coalescer.pending(), Some(7));

        sink.fail.store(false, Ordering::SeqCst);
        coalescer.flush().await.expect("retry flush");
        assert_eq!(sink.writes(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_timer_write_is_retried_on_its_own() {
        let sink = Arc::new(RecordingSink::default());
        let coalescer = coalescer(&sink);

        sink.fail.store(true, Ordering::SeqCst);
        coalescer.stage(3);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(sink.writes().is_empty());
        assert_eq!(coalescer.pending(), Some(3));

        sink.fail.store(false, Ordering::SeqCst);
        // first retry is due 2s after the failed attempt
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(sink.writes(), vec![3]);
        assert!(!coalescer.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_stage_replaces_the_pending_retry() {
        let sink = Arc::new(RecordingSink::default());
        let coalescer = coalescer(&sink);

        sink.fail.store(true, Ordering::SeqCst);
        coalescer.stage(3);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        sink.fail.store(false, Ordering::SeqCst);
        coalescer.stage(4);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.writes(), vec![4]);
    }

    #[tokio::test]
    async fn flush_without_pending_is_noop() {
        let sink = Arc::new(RecordingSink::default());
        let coalescer = coalescer(&sink);
        coalescer.flush().await.expect("flush");
        assert!(sink.writes().is_empty());
    }
}
