//! Enrichment stage: GeoIP lookup followed by optional client hashing.
//!
//! Both stages keep a bounded LRU cache keyed by the raw client address.
//! The caches are the only state shared between workers.

pub mod cache;
pub mod geo;
pub mod identity;

use chrono::Utc;
use lbship_core::AccessRecord;
use lbship_core::config::EnrichConfig;
use lbship_core::error::ConfigError;
use lbship_observability::PipelineMetrics;
use std::sync::Arc;

pub use cache::SharedLru;
pub use geo::{GeoEnricher, GeoLocation, GeoLookup, LookupError, MaxMindLookup};
pub use identity::IdentityHasher;

/// Geo enricher plus optional identity hasher, shared by all workers.
pub struct Enricher {
    geo: GeoEnricher,
    identity: Option<IdentityHasher>,
}

impl Enricher {
    pub fn new(geo: GeoEnricher, identity: Option<IdentityHasher>) -> Self {
        Self { geo, identity }
    }

    /// Build both stages from config around an already-opened lookup service.
    pub fn from_config(
        config: &EnrichConfig,
        lookup: Arc<dyn GeoLookup>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, ConfigError> {
        let geo = GeoEnricher::from_config(config, lookup, Arc::clone(&metrics));
        let identity = IdentityHasher::from_config(config, metrics)?;
        Ok(Self::new(geo, identity))
    }

    /// Geo fields first (keyed by the real address), then the timestamp,
    /// then the address is replaced by its hash when hashing is on.
    pub fn enrich(&self, record: &mut AccessRecord) {
        self.geo.enrich(record);
        record.stamp(Utc::now());
        if let Some(ref identity) = self.identity {
            identity.apply(record);
        }
    }

    pub fn geo(&self) -> &GeoEnricher {
        &self.geo
    }

    pub fn identity(&self) -> Option<&IdentityHasher> {
        self.identity.as_ref()
    }
}
