//! Client address pseudonymisation.
//!
//! When a salt is configured the `client` field is replaced by the first
//! [`HASH_HEX_LEN`] hex characters of `SHA-256(address ++ salt)`. The mapping
//! is stable for a given salt, so per-client aggregations keep working, and
//! cannot be reversed without the salt.
//!
//! Addresses inside a `cidr_ignore` range (internal networks, monitoring
//! probes) are left as they are.
//!
//! ```
//! use lbship_enrich::identity::salted_hash;
//!
//! let h = salted_hash("192.0.2.10", "pepper");
//! assert_eq!(h.len(), 16);
//! assert_eq!(h, salted_hash("192.0.2.10", "pepper"));
//! assert_ne!(h, salted_hash("192.0.2.10", "salt"));
//! ```

use crate::cache::SharedLru;
use ipnet::IpNet;
use lbship_core::AccessRecord;
use lbship_core::config::EnrichConfig;
use lbship_core::error::ConfigError;
use lbship_observability::{Metric, PipelineMetrics};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::info;

/// Length of the emitted hash, in hex characters.
pub const HASH_HEX_LEN: usize = 16;

/// Truncated hex SHA-256 of `address` followed by `salt`.
pub fn salted_hash(address: &str, salt: &str) -> String {
    let digest = Sha256::new()
        .chain_update(address.as_bytes())
        .chain_update(salt.as_bytes())
        .finalize();
    let mut hex = format!("{digest:x}");
    hex.truncate(HASH_HEX_LEN);
    hex
}

pub struct IdentityHasher {
    salt: String,
    allow: Vec<IpNet>,
    cache: SharedLru<String>,
    metrics: Arc<PipelineMetrics>,
}

impl IdentityHasher {
    pub fn new(
        salt: impl Into<String>,
        allow: Vec<IpNet>,
        cache_size: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            salt: salt.into(),
            allow,
            cache: SharedLru::new(cache_size),
            metrics,
        }
    }

    /// `None` when no salt is configured.
    pub fn from_config(
        config: &EnrichConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Option<Self>, ConfigError> {
        let Some(salt) = config.active_salt() else {
            return Ok(None);
        };
        let allow = config.parsed_cidrs()?;
        info!(exempt_ranges = allow.len(), "Client address hashing enabled");
        Ok(Some(Self::new(salt, allow, config.hash_cache_size, metrics)))
    }

    /// `true` when the address lies in an exempt range. Unparsable
    /// addresses are never exempt.
    pub fn is_exempt(&self, address: &str) -> bool {
        match address.parse::<IpAddr>() {
            Ok(ip) => self.allow.iter().any(|net| net.contains(&ip)),
            Err(_) => false,
        }
    }

    /// Hash for `address`, or `None` if it is exempt.
    pub fn pseudonymize(&self, address: &str) -> Option<String> {
        if self.is_exempt(address) {
            return None;
        }
        if let Some(hash) = self.cache.get(address) {
            self.metrics.inc(Metric::HashCacheHits);
            return Some(hash);
        }
        self.metrics.inc(Metric::HashCacheMisses);
        let hash = salted_hash(address, &self.salt);
        self.cache.insert(address.to_string(), hash.clone());
        Some(hash)
    }

    /// Replace `record.client` with its hash unless exempt.
    pub fn apply(&self, record: &mut AccessRecord) {
        if let Some(hash) = self.pseudonymize(&record.client) {
            record.client = hash;
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
