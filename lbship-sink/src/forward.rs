use crossbeam_channel::{Sender, TrySendError, bounded};
use lbship_core::AccessRecord;
use lbship_core::error::ConfigError;
use lbship_observability::{Metric, PipelineMetrics};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, info};

/// Best-effort copy of every enriched record to a UDP destination.
///
/// No channel or thread exists when forwarding is disabled. Each worker takes
/// its own [`ForwardHandle`], so forwarding never contends on a lock. Records
/// that do not fit in the queue are dropped.
pub struct Forwarder {
    sender: Mutex<Option<Sender<String>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    target: Option<SocketAddr>,
    metrics: Arc<PipelineMetrics>,
}

/// A worker's sending end. Holds its own channel sender.
#[derive(Clone)]
pub struct ForwardHandle {
    sender: Option<Sender<String>>,
    metrics: Arc<PipelineMetrics>,
}

impl ForwardHandle {
    /// A handle that forwards nothing.
    pub fn disabled() -> Self {
        Self {
            sender: None,
            metrics: Arc::new(PipelineMetrics::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Offer a record without blocking.
    pub fn forward(&self, record: &AccessRecord) {
        let Some(ref tx) = self.sender else {
            return;
        };
        match tx.try_send(record.to_json_line()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.metrics.inc(Metric::ForwardDrops);
            }
        }
    }
}

impl Forwarder {
    pub fn disabled() -> Self {
        Self {
            sender: Mutex::new(None),
            thread: Mutex::new(None),
            target: None,
            metrics: Arc::new(PipelineMetrics::disabled()),
        }
    }

    /// Bind an ephemeral UDP socket and start the sender thread.
    pub fn spawn(
        target: &str,
        capacity: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, ConfigError> {
        let addr = target
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConfigError::Invalid(format!("invalid forward target {target:?}")))?;
        let bind: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)
            .map_err(|e| ConfigError::Invalid(format!("forward socket: {e}")))?;

        let (tx, rx) = bounded::<String>(capacity.max(1));
        let thread_metrics = Arc::clone(&metrics);
        let thread = std::thread::Builder::new()
            .name("lbship-forward".into())
            .spawn(move || {
                for doc in rx {
                    match socket.send_to(doc.as_bytes(), addr) {
                        Ok(_) => thread_metrics.inc(Metric::RecordsForwarded),
                        Err(e) => {
                            thread_metrics.inc(Metric::ForwardDrops);
                            debug!(target = %addr, error = %e, "Forward send failed");
                        }
                    }
                }
            })
            .map_err(|e| ConfigError::Invalid(format!("forward thread: {e}")))?;

        info!(target = %addr, capacity, "Record forwarding enabled");
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
            target: Some(addr),
            metrics,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    pub fn target(&self) -> Option<SocketAddr> {
        self.target
    }

    /// A new sending end. Disabled once the forwarder is closed.
    pub fn handle(&self) -> ForwardHandle {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        ForwardHandle {
            sender,
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Stop handing out senders, let the thread send what is queued, and
    /// join it. The thread ends once every [`ForwardHandle`] is dropped, so
    /// call this after the workers have exited. Safe to call more than once.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
            debug!("Forwarder stopped");
        }
    }
}

impl Drop for Forwarder {
    /// Detaches the thread rather than joining it, since handles may still
    /// be alive; it exits when the last one is dropped.
    fn drop(&mut self) {
        self.sender
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
