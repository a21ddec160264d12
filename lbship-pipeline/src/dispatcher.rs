use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use lbship_observability::{Metric, PipelineMetrics};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Minimum gap between two "queue full" warnings.
const FULL_WARN_INTERVAL_MS: u64 = 1_000;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("work queue is full")]
    QueueFull,

    #[error("work queue is closed")]
    Closed,
}

/// Bounded queue of raw lines shared by every worker.
///
/// `submit` never blocks. Cloning is cheap and every clone feeds the same
/// queue.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    sender: RwLock<Option<Sender<String>>>,
    receiver: Receiver<String>,
    capacity: usize,
    metrics: Arc<PipelineMetrics>,
    started: Instant,
    next_full_warn_ms: AtomicU64,
    dropped_since_warn: AtomicU64,
}

impl Dispatcher {
    pub fn new(capacity: usize, metrics: Arc<PipelineMetrics>) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            inner: Arc::new(Inner {
                sender: RwLock::new(Some(tx)),
                receiver: rx,
                capacity,
                metrics,
                started: Instant::now(),
                next_full_warn_ms: AtomicU64::new(0),
                dropped_since_warn: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue a line, or drop it if the queue is full or closed.
    pub fn submit(&self, line: String) -> Result<(), SubmitError> {
        let guard = self.inner.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(ref tx) = *guard else {
            self.inner.metrics.inc(Metric::LinesDropped);
            return Err(SubmitError::Closed);
        };
        match tx.try_send(line) {
            Ok(()) => {
                self.inner.metrics.inc(Metric::LinesSubmitted);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.inner.metrics.inc(Metric::LinesDropped);
                self.note_full();
                Err(SubmitError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.inner.metrics.inc(Metric::LinesDropped);
                Err(SubmitError::Closed)
            }
        }
    }

    /// Rate-limited: at most one warning per interval, carrying the number of
    /// lines dropped since the previous one.
    fn note_full(&self) {
        let inner = &self.inner;
        inner.dropped_since_warn.fetch_add(1, Ordering::Relaxed);

        let now = inner.started.elapsed().as_millis() as u64;
        let next = inner.next_full_warn_ms.load(Ordering::Relaxed);
        if now < next {
            return;
        }
        if inner
            .next_full_warn_ms
            .compare_exchange(next, now + FULL_WARN_INTERVAL_MS, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let dropped = inner.dropped_since_warn.swap(0, Ordering::Relaxed);
        warn!(
            dropped,
            capacity = inner.capacity,
            "Work queue full, dropping lines"
        );
    }

    /// Stop accepting lines. Workers keep draining what is already queued and
    /// then observe the queue as disconnected. Idempotent.
    pub fn close(&self) {
        let prev = self
            .inner
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if prev.is_some() {
            debug!(queued = self.len(), "Work queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Consumer end for a worker.
    pub fn receiver(&self) -> Receiver<String> {
        self.inner.receiver.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::TryRecvError;

    fn dispatcher(capacity: usize) -> Dispatcher {
        Dispatcher::new(capacity, Arc::new(PipelineMetrics::new(true).unwrap()))
    }

    #[test]
    fn submit_enqueues_until_full() {
        let d = dispatcher(2);
        assert_eq!(d.submit("a".into()), Ok(()));
        assert_eq!(d.submit("b".into()), Ok(()));
        assert_eq!(d.submit("c".into()), Err(SubmitError::QueueFull));
        assert_eq!(d.len(), 2);
        assert_eq!(d.inner.metrics.get(Metric::LinesSubmitted), 2);
        assert_eq!(d.inner.metrics.get(Metric::LinesDropped), 1);
    }

    #[test]
    fn full_queue_keeps_oldest_lines() {
        let d = dispatcher(1);
        d.submit("first".into()).unwrap();
        let _ = d.submit("second".into());
        let rx = d.receiver();
        assert_eq!(rx.try_recv().unwrap(), "first");
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn closed_queue_rejects_and_drains() {
        let d = dispatcher(4);
        d.submit("queued".into()).unwrap();
        d.close();
        assert!(d.is_closed());
        assert_eq!(d.submit("late".into()), Err(SubmitError::Closed));

        let rx = d.receiver();
        assert_eq!(rx.recv().unwrap(), "queued");
        assert!(rx.recv().is_err());
    }

    #[test]
    fn close_twice_is_harmless() {
        let d = dispatcher(1);
        d.close();
        d.close();
        assert!(d.is_closed());
    }

    #[test]
    fn clones_share_one_queue() {
        let d = dispatcher(4);
        let d2 = d.clone();
        d.submit("x".into()).unwrap();
        d2.submit("y".into()).unwrap();
        assert_eq!(d.len(), 2);
        d2.close();
        assert!(d.is_closed());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(dispatcher(0).capacity(), 1);
    }

    #[test]
    fn sustained_overload_warns_once_per_interval() {
        let d = dispatcher(1);
        d.submit("fill".into()).unwrap();
        for _ in 0..1_000 {
            let _ = d.submit("x".into());
        }
        // First drop logged immediately; the rest are waiting for the next window.
        assert_eq!(d.inner.dropped_since_warn.load(Ordering::Relaxed), 999);
        assert!(d.inner.next_full_warn_ms.load(Ordering::Relaxed) >= FULL_WARN_INTERVAL_MS);
    }
}
