use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Every counter the pipeline maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    LinesSubmitted,
    LinesDropped,
    RecordsParsed,
    RecordsMalformed,
    RecordsRejected,
    GeoLookupErrors,
    GeoNotFound,
    GeoCacheHits,
    GeoCacheMisses,
    HashCacheHits,
    HashCacheMisses,
    DocumentsFlushed,
    FlushFailures,
    RecordsForwarded,
    ForwardDrops,
}

impl Metric {
    pub const ALL: [Metric; 15] = [
        Metric::LinesSubmitted,
        Metric::LinesDropped,
        Metric::RecordsParsed,
        Metric::RecordsMalformed,
        Metric::RecordsRejected,
        Metric::GeoLookupErrors,
        Metric::GeoNotFound,
        Metric::GeoCacheHits,
        Metric::GeoCacheMisses,
        Metric::HashCacheHits,
        Metric::HashCacheMisses,
        Metric::DocumentsFlushed,
        Metric::FlushFailures,
        Metric::RecordsForwarded,
        Metric::ForwardDrops,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::LinesSubmitted => "lines_submitted_total",
            Metric::LinesDropped => "lines_dropped_total",
            Metric::RecordsParsed => "records_parsed_total",
            Metric::RecordsMalformed => "records_malformed_total",
            Metric::RecordsRejected => "records_rejected_total",
            Metric::GeoLookupErrors => "geo_lookup_errors_total",
            Metric::GeoNotFound => "geo_not_found_total",
            Metric::GeoCacheHits => "geo_cache_hits_total",
            Metric::GeoCacheMisses => "geo_cache_misses_total",
            Metric::HashCacheHits => "hash_cache_hits_total",
            Metric::HashCacheMisses => "hash_cache_misses_total",
            Metric::DocumentsFlushed => "documents_flushed_total",
            Metric::FlushFailures => "flush_failures_total",
            Metric::RecordsForwarded => "records_forwarded_total",
            Metric::ForwardDrops => "forward_drops_total",
        }
    }

    fn help(self) -> &'static str {
        match self {
            Metric::LinesSubmitted => "Lines accepted into the work queue",
            Metric::LinesDropped => "Lines dropped because the work queue was full or closed",
            Metric::RecordsParsed => "Lines parsed into records",
            Metric::RecordsMalformed => "Lines with the wrong field count",
            Metric::RecordsRejected => "Records dropped for an out-of-range status",
            Metric::GeoLookupErrors => "GeoIP lookups that failed with an error",
            Metric::GeoNotFound => "Client addresses absent from the GeoIP database",
            Metric::GeoCacheHits => "GeoIP cache hits",
            Metric::GeoCacheMisses => "GeoIP cache misses",
            Metric::HashCacheHits => "Client hash cache hits",
            Metric::HashCacheMisses => "Client hash cache misses",
            Metric::DocumentsFlushed => "Documents accepted by the storage backend",
            Metric::FlushFailures => "Batch flushes that failed",
            Metric::RecordsForwarded => "Records sent to the forward target",
            Metric::ForwardDrops => "Records dropped by the forwarder",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Pipeline counters, a no-op when disabled.
///
/// When `enabled = false` no registry is created and every `inc` is a
/// branch on `None`, so the worker hot path pays nothing.
pub struct PipelineMetrics {
    registry: Option<Registry>,
    counters: Vec<IntCounter>,
    workers_running: Option<IntGauge>,
}

impl PipelineMetrics {
    /// Create a new collector. When `enabled = false`, everything is empty.
    pub fn new(enabled: bool) -> anyhow::Result<Self> {
        if !enabled {
            return Ok(Self::disabled());
        }

        let registry = Registry::new_custom(Some("lbship".to_string()), None)?;
        let mut counters = Vec::with_capacity(Metric::ALL.len());
        for metric in Metric::ALL {
            let counter = IntCounter::with_opts(Opts::new(metric.name(), metric.help()))?;
            registry.register(Box::new(counter.clone()))?;
            counters.push(counter);
        }

        let workers_running = IntGauge::new("workers_running", "Workers not yet stopped")?;
        registry.register(Box::new(workers_running.clone()))?;

        Ok(Self {
            registry: Some(registry),
            counters,
            workers_running: Some(workers_running),
        })
    }

    pub fn disabled() -> Self {
        Self {
            registry: None,
            counters: Vec::new(),
            workers_running: None,
        }
    }

    #[inline]
    pub fn inc(&self, metric: Metric) {
        self.inc_by(metric, 1);
    }

    #[inline]
    pub fn inc_by(&self, metric: Metric, n: u64) {
        if let Some(counter) = self.counters.get(metric.index()) {
            counter.inc_by(n);
        }
    }

    /// Current value; always 0 when disabled.
    pub fn get(&self, metric: Metric) -> u64 {
        self.counters
            .get(metric.index())
            .map(|c| c.get())
            .unwrap_or(0)
    }

    pub fn worker_started(&self) {
        if let Some(ref gauge) = self.workers_running {
            gauge.inc();
        }
    }

    pub fn worker_stopped(&self) {
        if let Some(ref gauge) = self.workers_running {
            gauge.dec();
        }
    }

    pub fn workers_running(&self) -> i64 {
        self.workers_running.as_ref().map(|g| g.get()).unwrap_or(0)
    }

    /// Render prometheus text exposition format.
    pub fn render(&self) -> String {
        match self.registry {
            Some(ref registry) => crate::prometheus_exporter::render_metrics(registry),
            None => String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.registry.is_some()
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::disabled()
    }
}
