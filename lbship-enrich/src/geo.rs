//! GeoIP enrichment backed by a MaxMind GeoLite2-City database.
//!
//! Lookups go through a shared LRU cache keyed by the raw client address.
//! Failed lookups are cached as well so a flood of unparsable or unknown
//! addresses costs one database probe each, not one per line. With
//! `negative_ttl_secs = 0` those entries live until evicted.

use crate::cache::SharedLru;
use lbship_core::AccessRecord;
use lbship_core::config::EnrichConfig;
use lbship_core::error::ConfigError;
use lbship_core::record::format_location;
use lbship_observability::{Metric, PipelineMetrics};
use maxminddb::{MaxMindDBError, Reader, geoip2};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Language used for city and country names.
const NAME_LANGUAGE: &str = "en";

/// Result of a successful lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoLocation {
    pub city: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoLocation {
    /// `(0, 0)` is what the database reports when it knows nothing useful.
    pub fn has_coordinates(&self) -> bool {
        !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("invalid client address {0:?}")]
    InvalidAddress(String),

    #[error("address not found: {0}")]
    NotFound(IpAddr),

    #[error("GeoIP database error: {0}")]
    Database(String),
}

/// Address → location service.
pub trait GeoLookup: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, LookupError>;
}

// ─────────────────────────────────────────────────────────────
// MaxMind reader
// ─────────────────────────────────────────────────────────────

pub struct MaxMindLookup {
    reader: Reader<Vec<u8>>,
}

impl MaxMindLookup {
    /// Open a `.mmdb` file. Failure here is fatal at startup.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path).map_err(|e| ConfigError::GeoDatabase {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        info!(
            path = %path.display(),
            database_type = %reader.metadata.database_type,
            build_epoch = reader.metadata.build_epoch,
            "GeoIP database opened"
        );
        Ok(Self { reader })
    }
}

impl GeoLookup for MaxMindLookup {
    fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, LookupError> {
        let city: geoip2::City = self.reader.lookup(ip).map_err(|e| match e {
            MaxMindDBError::AddressNotFoundError(_) => LookupError::NotFound(ip),
            other => LookupError::Database(other.to_string()),
        })?;

        let mut location = GeoLocation::default();
        if let Some(names) = city.city.and_then(|c| c.names) {
            location.city = names.get(NAME_LANGUAGE).map(|s| s.to_string()).unwrap_or_default();
        }
        if let Some(names) = city.country.and_then(|c| c.names) {
            location.country = names.get(NAME_LANGUAGE).map(|s| s.to_string()).unwrap_or_default();
        }
        if let Some(loc) = city.location {
            location.latitude = loc.latitude.unwrap_or(0.0);
            location.longitude = loc.longitude.unwrap_or(0.0);
        }
        Ok(location)
    }
}

// ─────────────────────────────────────────────────────────────
// Cached enricher
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CachedLookup {
    /// `None` for a failed lookup.
    location: Option<GeoLocation>,
    cached_at: Instant,
}

pub struct GeoEnricher {
    service: Arc<dyn GeoLookup>,
    cache: SharedLru<CachedLookup>,
    negative_ttl: Option<Duration>,
    metrics: Arc<PipelineMetrics>,
}

impl GeoEnricher {
    pub fn new(
        service: Arc<dyn GeoLookup>,
        cache_size: usize,
        negative_ttl: Option<Duration>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            service,
            cache: SharedLru::new(cache_size),
            negative_ttl,
            metrics,
        }
    }

    pub fn from_config(
        config: &EnrichConfig,
        service: Arc<dyn GeoLookup>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let negative_ttl =
            (config.negative_ttl_secs > 0).then(|| Duration::from_secs(config.negative_ttl_secs));
        Self::new(service, config.geo_cache_size, negative_ttl, metrics)
    }

    /// Fill `city`, `country` and `location`. Leaves them empty when the
    /// lookup failed or resolved to the zero coordinate.
    pub fn enrich(&self, record: &mut AccessRecord) {
        let Some(location) = self.resolve(&record.client) else {
            return;
        };
        if !location.has_coordinates() {
            return;
        }
        record.location = format_location(location.latitude, location.longitude);
        record.city = location.city;
        record.country = location.country;
    }

    /// Cached lookup; `None` for a (possibly cached) failure.
    pub fn resolve(&self, address: &str) -> Option<GeoLocation> {
        if let Some(entry) = self.cache.get(address) {
            if !self.is_expired(&entry) {
                self.metrics.inc(Metric::GeoCacheHits);
                return entry.location;
            }
        }
        self.metrics.inc(Metric::GeoCacheMisses);

        let result = address
            .parse::<IpAddr>()
            .map_err(|_| LookupError::InvalidAddress(address.to_string()))
            .and_then(|ip| self.service.lookup(ip));

        let location = match result {
            Ok(location) => Some(location),
            Err(e @ LookupError::NotFound(_)) => {
                self.metrics.inc(Metric::GeoNotFound);
                debug!(client = address, error = %e, "GeoIP lookup miss");
                None
            }
            Err(e) => {
                self.metrics.inc(Metric::GeoLookupErrors);
                warn!(client = address, error = %e, "Error looking up client ip");
                None
            }
        };

        self.cache.insert(
            address.to_string(),
            CachedLookup {
                location: location.clone(),
                cached_at: Instant::now(),
            },
        );
        location
    }

    fn is_expired(&self, entry: &CachedLookup) -> bool {
        match (self.negative_ttl, &entry.location) {
            (Some(ttl), None) => entry.cached_at.elapsed() >= ttl,
            _ => false,
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
