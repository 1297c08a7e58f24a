//! Construction of [`Client`] instances.

use crate::client::{Client, ClientConfig};
use backoff::BackoffConfig;
use data_types::{Endpoint, Tenant};
use router::RouteMode;
use rpc::{RpcClient, RpcConfig};
use std::sync::Arc;
use std::time::Duration;
use tessera_time::{SystemProvider, TimeProvider};
use thiserror::Error;

/// The default database requests operate on.
pub const DEFAULT_DATABASE: &str = "public";
/// The default bound on automatic write retries.
pub const DEFAULT_WRITE_MAX_RETRIES: usize = 1;
/// The default bound on automatic read retries.
pub const DEFAULT_READ_MAX_RETRIES: usize = 1;
/// The default soft bound of the route cache.
pub const DEFAULT_MAX_CACHED_SIZE: usize = 10_000;
/// The default period of the route-cache cleaner.
pub const DEFAULT_GC_PERIOD: Duration = Duration::from_secs(60);

/// Errors returned by [`ClientBuilder::build`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// No transport was injected.
    #[error("an RPC transport implementation must be provided")]
    MissingRpcClient,

    /// The route cache bound must be positive.
    #[error("max_cached_size must be greater than zero")]
    InvalidMaxCachedSize,

    /// A zero GC period would spin; disable GC instead.
    #[error("gc_period must be greater than zero")]
    InvalidGcPeriod,
}

/// A builder that produces a ready-to-use [`Client`].
///
/// ```no_run
/// use std::sync::Arc;
/// use tesseradb_client::data_types::Endpoint;
/// use tesseradb_client::ClientBuilder;
/// # fn transport() -> Arc<dyn tesseradb_client::rpc::RpcClient> { unimplemented!() }
///
/// # #[tokio::main] async fn main() {
/// let client = ClientBuilder::new(Endpoint::new("127.0.0.1", 8831))
///     .database("public")
///     .write_max_retries(1)
///     .rpc_client(transport())
///     .build()
///     .expect("valid client configuration");
/// # }
/// ```
#[derive(Debug)]
pub struct ClientBuilder {
    cluster_address: Endpoint,
    mode: RouteMode,
    database: String,
    tenant: Option<Tenant>,
    write_max_retries: usize,
    read_max_retries: usize,
    max_cached_size: usize,
    gc_period: Option<Duration>,
    rpc_config: RpcConfig,
    backoff_config: BackoffConfig,
    collect_wrote_detail: bool,
    rpc_client: Option<Arc<dyn RpcClient>>,
    metric_registry: Option<Arc<metric::Registry>>,
    time_provider: Arc<dyn TimeProvider>,
}

impl ClientBuilder {
    /// Start building a client against `cluster_address`.
    pub fn new(cluster_address: Endpoint) -> Self {
        Self {
            cluster_address,
            mode: RouteMode::Direct,
            database: DEFAULT_DATABASE.to_string(),
            tenant: None,
            write_max_retries: DEFAULT_WRITE_MAX_RETRIES,
            read_max_retries: DEFAULT_READ_MAX_RETRIES,
            max_cached_size: DEFAULT_MAX_CACHED_SIZE,
            gc_period: Some(DEFAULT_GC_PERIOD),
            rpc_config: RpcConfig::default(),
            backoff_config: BackoffConfig::default(),
            collect_wrote_detail: false,
            rpc_client: None,
            metric_registry: None,
            time_provider: Arc::new(SystemProvider::new()),
        }
    }

    /// Select [`RouteMode::Direct`] (per-table routing) or
    /// [`RouteMode::Proxy`] (everything to the cluster address).
    pub fn route_mode(mut self, mode: RouteMode) -> Self {
        self.mode = mode;
        self
    }

    /// The database every request operates on.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// The tenant triple forwarded as RPC metadata.
    pub fn tenant(mut self, tenant: Tenant) -> Self {
        self.tenant = Some(tenant);
        self
    }

    /// Bound on automatic retries of retriable write failures.
    pub fn write_max_retries(mut self, retries: usize) -> Self {
        self.write_max_retries = retries;
        self
    }

    /// Bound on automatic retries of retriable query failures.
    pub fn read_max_retries(mut self, retries: usize) -> Self {
        self.read_max_retries = retries;
        self
    }

    /// Soft bound of the route cache; eviction starts at 0.75× this.
    pub fn max_cached_size(mut self, size: usize) -> Self {
        self.max_cached_size = size;
        self
    }

    /// Period of the scheduled route-cache cleaner.
    pub fn gc_period(mut self, period: Duration) -> Self {
        self.gc_period = Some(period);
        self
    }

    /// Turn the scheduled route-cache cleaner off.
    pub fn disable_gc(mut self) -> Self {
        self.gc_period = None;
        self
    }

    /// Transport configuration (timeouts, adaptive limiter).
    pub fn rpc_config(mut self, config: RpcConfig) -> Self {
        self.rpc_config = config;
        self
    }

    /// Backoff applied between flow-control retries.
    pub fn backoff_config(mut self, config: BackoffConfig) -> Self {
        self.backoff_config = config;
        self
    }

    /// Populate `WriteOk::tables` with the tables each write touched.
    pub fn collect_wrote_detail(mut self, collect: bool) -> Self {
        self.collect_wrote_detail = collect;
        self
    }

    /// The transport implementation to dispatch through. Required.
    pub fn rpc_client(mut self, rpc_client: Arc<dyn RpcClient>) -> Self {
        self.rpc_client = Some(rpc_client);
        self
    }

    /// Record metrics into an existing registry instead of a fresh one.
    pub fn metric_registry(mut self, registry: Arc<metric::Registry>) -> Self {
        self.metric_registry = Some(registry);
        self
    }

    /// Clock source for route recency stamps. Swapped in tests.
    pub fn time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    /// Build the [`Client`].
    ///
    /// Must run inside a Tokio runtime when a GC period is configured (the
    /// default), as the scheduled cleaner is spawned here.
    pub fn build(self) -> Result<Client, BuildError> {
        let rpc = self.rpc_client.ok_or(BuildError::MissingRpcClient)?;
        if self.max_cached_size == 0 {
            return Err(BuildError::InvalidMaxCachedSize);
        }
        if self.gc_period == Some(Duration::ZERO) {
            return Err(BuildError::InvalidGcPeriod);
        }

        Ok(Client::new(ClientConfig {
            rpc,
            cluster_address: self.cluster_address,
            mode: self.mode,
            database: self.database,
            tenant: self.tenant,
            write_max_retries: self.write_max_retries,
            read_max_retries: self.read_max_retries,
            max_cached_size: self.max_cached_size,
            gc_period: self.gc_period,
            rpc_config: self.rpc_config,
            backoff_config: self.backoff_config,
            collect_wrote_detail: self.collect_wrote_detail,
            metric_registry: self
                .metric_registry
                .unwrap_or_else(|| Arc::new(metric::Registry::new())),
            time_provider: self.time_provider,
        }))
    }
}
