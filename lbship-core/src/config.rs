use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Toml, Yaml},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Top-level shipper configuration. Loaded once, read-only afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipperConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub enrich: EnrichConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Syslog intake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_address")]
    pub address: String,
    #[serde(default = "default_listen_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub udp: bool,
    #[serde(default = "default_true")]
    pub tcp: bool,
}

/// Bulk indexing target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    #[serde(default = "default_nodes")]
    pub nodes: Vec<String>,
    #[serde(default = "default_index")]
    pub index: String,
    /// Append `-YYYY-MM-DD` (UTC) to the index name.
    #[serde(default = "default_true")]
    pub index_date_suffix: bool,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Worker pool and batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of workers. 0 = number of CPU cores.
    #[serde(default)]
    pub workers: usize,
    /// Flush once this many documents are pending.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Capacity of the shared work queue; lines beyond it are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

/// GeoIP and identity-hashing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    #[serde(default = "default_geoip_path")]
    pub geoip_path: String,
    #[serde(default = "default_cache_size")]
    pub geo_cache_size: usize,
    #[serde(default = "default_cache_size")]
    pub hash_cache_size: usize,
    /// Lifetime of cached failed lookups. 0 = never expire.
    #[serde(default)]
    pub negative_ttl_secs: u64,
    /// Enables client address hashing when set and non-empty.
    pub salt: Option<String>,
    /// Ranges exempt from hashing. Only consulted when `salt` is set.
    #[serde(default)]
    pub cidr_ignore: Vec<String>,
}

/// Secondary best-effort output of enriched records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// `host:port` UDP destination. Disabled when absent.
    pub target: Option<String>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Health and metrics endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_admin_addr")]
    pub addr: String,
}

// ── Defaults ──────────────────────────────────────────────────

fn default_listen_address() -> String { "0.0.0.0".into() }
fn default_listen_port() -> u16 { 5514 }
fn default_true() -> bool { true }
fn default_nodes() -> Vec<String> { vec!["http://127.0.0.1:9200".into()] }
fn default_index() -> String { "lbship".into() }
fn default_request_timeout() -> u64 { 30 }
fn default_batch_size() -> usize { 1000 }
fn default_queue_capacity() -> usize { 10_000 }
fn default_flush_interval() -> u64 { 5 }
fn default_geoip_path() -> String { "/usr/share/GeoIP/GeoLite2-City.mmdb".into() }
fn default_cache_size() -> usize { 100_000 }
fn default_admin_addr() -> String { "127.0.0.1:9181".into() }

// ── Impls ─────────────────────────────────────────────────────

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            port: default_listen_port(),
            udp: true,
            tcp: true,
        }
    }
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            index: default_index(),
            index_date_suffix: true,
            timeout_secs: default_request_timeout(),
            username: None,
            password: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            batch_size: default_batch_size(),
            queue_capacity: default_queue_capacity(),
            flush_interval_secs: default_flush_interval(),
        }
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            geoip_path: default_geoip_path(),
            geo_cache_size: default_cache_size(),
            hash_cache_size: default_cache_size(),
            negative_ttl_secs: 0,
            salt: None,
            cidr_ignore: Vec::new(),
        }
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            target: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_admin_addr(),
        }
    }
}

impl ListenConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl EnrichConfig {
    /// The salt, if hashing is enabled.
    pub fn active_salt(&self) -> Option<&str> {
        self.salt.as_deref().filter(|s| !s.is_empty())
    }

    /// Parse `cidr_ignore` into networks. Bare addresses count as host routes.
    pub fn parsed_cidrs(&self) -> Result<Vec<ipnet::IpNet>, ConfigError> {
        self.cidr_ignore
            .iter()
            .map(|s| parse_ip_or_cidr(s).ok_or_else(|| ConfigError::InvalidCidr(s.clone())))
            .collect()
    }
}

fn parse_ip_or_cidr(s: &str) -> Option<ipnet::IpNet> {
    let s = s.trim();
    s.parse::<ipnet::IpNet>()
        .ok()
        .or_else(|| s.parse::<std::net::IpAddr>().ok().map(ipnet::IpNet::from))
}

impl ShipperConfig {
    /// Load configuration from a TOML (or YAML, by extension) file plus
    /// `LBSHIP_` env overrides, e.g. `LBSHIP_PIPELINE__WORKERS=8`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // figment merges nothing for a missing file; a mistyped path must not
        // start the shipper on defaults.
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let figment = if is_yaml {
            Figment::new().merge(Yaml::file(path))
        } else {
            Figment::new().merge(Toml::file(path))
        };
        let config: ShipperConfig = figment
            .merge(Env::prefixed("LBSHIP_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.batch_size == 0 {
            return Err(ConfigError::Invalid("pipeline.batch_size must be > 0".into()));
        }
        if p.queue_capacity == 0 {
            return Err(ConfigError::Invalid("pipeline.queue_capacity must be > 0".into()));
        }
        if p.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.flush_interval_secs must be > 0".into(),
            ));
        }
        if self.elasticsearch.nodes.is_empty() {
            return Err(ConfigError::Invalid("elasticsearch.nodes is empty".into()));
        }
        if self.enrich.geo_cache_size == 0 || self.enrich.hash_cache_size == 0 {
            return Err(ConfigError::Invalid("enrich cache sizes must be > 0".into()));
        }
        self.enrich.parsed_cidrs()?;
        if let Some(ref target) = self.forward.target {
            if target.parse::<SocketAddr>().is_err() && !target.contains(':') {
                return Err(ConfigError::Invalid(format!(
                    "forward.target {target:?} is not host:port"
                )));
            }
            if self.forward.queue_capacity == 0 {
                return Err(ConfigError::Invalid("forward.queue_capacity must be > 0".into()));
            }
        }
        Ok(())
    }

    /// Effective worker count (0 → available CPUs).
    pub fn effective_workers(&self) -> usize {
        if self.pipeline.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.pipeline.workers
        }
    }
}
