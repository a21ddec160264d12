use crate::dispatcher::Dispatcher;
use crate::worker::{Worker, WorkerSettings, WorkerState};
use lbship_core::config::ShipperConfig;
use lbship_enrich::Enricher;
use lbship_observability::PipelineMetrics;
use lbship_sink::{BatchSink, Forwarder, IndexName, Storage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{error, info};

/// Everything a pipeline needs, built once at startup.
pub struct PipelineDeps {
    pub enricher: Arc<Enricher>,
    pub storage: Arc<dyn Storage>,
    pub forwarder: Arc<Forwarder>,
    pub metrics: Arc<PipelineMetrics>,
    /// Runtime the workers use to drive storage writes.
    pub runtime: Handle,
}

/// Running worker pool plus its queue.
///
/// [`shutdown`](Pipeline::shutdown) stops intake, closes the queue, waits for
/// every worker to drain, then releases the forwarder. Only the first call
/// does anything.
pub struct Pipeline {
    dispatcher: Dispatcher,
    workers: Mutex<Vec<JoinHandle<WorkerState>>>,
    forwarder: Arc<Forwarder>,
    stop_tx: watch::Sender<bool>,
    shutting_down: AtomicBool,
}

impl Pipeline {
    pub fn start(config: &ShipperConfig, deps: PipelineDeps) -> std::io::Result<Self> {
        let num_workers = config.effective_workers();
        let settings = WorkerSettings::from_config(&config.pipeline);
        let index = IndexName::from_config(&config.elasticsearch);
        let dispatcher = Dispatcher::new(config.pipeline.queue_capacity, Arc::clone(&deps.metrics));

        let mut handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let sink = BatchSink::new(
                Arc::clone(&deps.storage),
                index.clone(),
                Arc::clone(&deps.metrics),
            );
            let worker = Worker::new(
                worker_id,
                settings,
                dispatcher.receiver(),
                Arc::clone(&deps.enricher),
                sink,
                deps.forwarder.handle(),
                Arc::clone(&deps.metrics),
                deps.runtime.clone(),
            );
            let spawned = std::thread::Builder::new()
                .name(format!("lbship-worker-{}", worker_id))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Let the workers that did start exit cleanly.
                    dispatcher.close();
                    for h in handles {
                        let _ = h.join();
                    }
                    return Err(e);
                }
            }
        }

        info!(
            workers = num_workers,
            batch_size = settings.batch_size,
            flush_interval_secs = settings.flush_interval.as_secs(),
            queue_capacity = dispatcher.capacity(),
            "Workers spawned"
        );

        let (stop_tx, _) = watch::channel(false);
        Ok(Self {
            dispatcher,
            workers: Mutex::new(handles),
            forwarder: deps.forwarder,
            stop_tx,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Handle for intake loops to submit lines.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Flips to `true` when shutdown begins; intake loops should stop reading.
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Run the shutdown protocol. Blocks until every worker has flushed and
    /// exited. Returns `false` if shutdown had already been started.
    pub fn shutdown(&self) -> bool {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!(queued = self.dispatcher.len(), "Shutting down pipeline");

        self.stop_tx.send_replace(true);
        self.dispatcher.close();

        let handles = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let total = handles.len();
        let mut stopped = 0;
        for handle in handles {
            match handle.join() {
                Ok(WorkerState::Stopped) => stopped += 1,
                Ok(state) => error!(?state, "Worker exited without stopping"),
                Err(_) => error!("Worker thread panicked"),
            }
        }

        self.forwarder.close();
        info!(workers = total, stopped, "Pipeline stopped");
        true
    }
}
