//! The client facade tying routing, dispatch and lifecycle together.

use crate::query::{QueryDispatcher, RowStream};
use crate::registry::{self, InstanceInfo};
use crate::stream_write::StreamWriter;
use crate::write::WriteDispatcher;
use backoff::BackoffConfig;
use data_types::{
    Code, Endpoint, QueryError, SqlQueryOk, SqlQueryRequest, Tenant, WriteError, WriteOk,
    WriteRequest,
};
use router::{RouteMode, Router, RouterConfig};
use rpc::{RpcClient, RpcConfig, RpcContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_time::TimeProvider;
use thiserror::Error;
use tracing::info;

/// Tenant metadata header names attached to every RPC.
const TENANT_HEADER: &str = "x-tessera-tenant";
const SUB_TENANT_HEADER: &str = "x-tessera-sub-tenant";
const ACCESS_TOKEN_HEADER: &str = "x-tessera-access-token";

/// The resolved configuration a [`Client`] is built from.
#[derive(Debug)]
pub(crate) struct ClientConfig {
    pub(crate) rpc: Arc<dyn RpcClient>,
    pub(crate) cluster_address: Endpoint,
    pub(crate) mode: RouteMode,
    pub(crate) database: String,
    pub(crate) tenant: Option<Tenant>,
    pub(crate) write_max_retries: usize,
    pub(crate) read_max_retries: usize,
    pub(crate) max_cached_size: usize,
    pub(crate) gc_period: Option<Duration>,
    pub(crate) rpc_config: RpcConfig,
    pub(crate) backoff_config: BackoffConfig,
    pub(crate) collect_wrote_detail: bool,
    pub(crate) metric_registry: Arc<metric::Registry>,
    pub(crate) time_provider: Arc<dyn TimeProvider>,
}

/// The error returned for requests on a shut-down client.
#[derive(Debug, Error)]
#[error("client has been shut down")]
struct ShutDown;

/// A TesseraDB client.
///
/// Cheap to clone; clones share the underlying routing cache, transport and
/// metric registry. Built by [`crate::ClientBuilder`]; a built client is
/// ready to use, and [`shutdown_gracefully`](Self::shutdown_gracefully)
/// (idempotent) releases its background work.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    id: u64,
    rpc: Arc<dyn RpcClient>,
    router: Arc<Router>,
    ctx: RpcContext,
    write: WriteDispatcher,
    query: QueryDispatcher,
    metrics: Arc<metric::Registry>,
    block_on_limit: bool,
    shutdown: AtomicBool,
}

impl Client {
    pub(crate) fn new(config: ClientConfig) -> Self {
        let mut ctx = RpcContext::new(&config.database);
        if let Some(tenant) = &config.tenant {
            ctx = ctx
                .with_metadata(TENANT_HEADER, tenant.tenant.as_str())
                .with_metadata(SUB_TENANT_HEADER, tenant.sub_tenant.as_str())
                .with_metadata(ACCESS_TOKEN_HEADER, tenant.token.as_str());
        }

        let router = Arc::new(Router::new(
            Arc::clone(&config.rpc),
            RouterConfig {
                cluster_address: config.cluster_address.clone(),
                mode: config.mode,
                max_cached_size: config.max_cached_size,
                gc_period: config.gc_period,
            },
            config.time_provider,
            &config.metric_registry,
        ));
        router.start_gc_task();

        let write = WriteDispatcher::new(
            Arc::clone(&config.rpc),
            Arc::clone(&router),
            ctx.clone(),
            config.write_max_retries,
            config.collect_wrote_detail,
            config.backoff_config.clone(),
            &config.metric_registry,
        );
        let query = QueryDispatcher::new(
            Arc::clone(&config.rpc),
            Arc::clone(&router),
            ctx.clone(),
            config.read_max_retries,
            config.backoff_config,
            &config.metric_registry,
        );

        let id = registry::register(config.cluster_address.clone(), config.database);
        info!(cluster = %config.cluster_address, id, "tesseradb client started");

        Self {
            inner: Arc::new(ClientInner {
                id,
                rpc: config.rpc,
                router,
                ctx,
                write,
                query,
                metrics: config.metric_registry,
                block_on_limit: config.rpc_config.block_on_limit,
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Write a batch of points, each to the server owning its table.
    ///
    /// Sub-batches failing with a retriable code are retried alone, up to
    /// the configured bound; the returned error keeps both the failed point
    /// subset and the accounting of what did land.
    pub async fn write(&self, req: WriteRequest) -> Result<WriteOk, WriteError> {
        self.ensure_running()
            .map_err(|e| WriteError::new(Code::ClientState, e.to_string()))?;
        self.inner.write.write(req).await
    }

    /// Execute a SQL query against the endpoint owning its tables.
    pub async fn sql_query(&self, req: SqlQueryRequest) -> Result<SqlQueryOk, QueryError> {
        self.ensure_running()
            .map_err(|e| QueryError::new(Code::ClientState, e.to_string()))?;
        self.inner.query.sql_query(&req).await
    }

    /// Execute a server-streaming SQL query; each row arrives within
    /// `row_timeout` or the stream yields an error item.
    pub async fn sql_query_stream(
        &self,
        req: SqlQueryRequest,
        row_timeout: Duration,
    ) -> Result<RowStream, QueryError> {
        self.ensure_running()
            .map_err(|e| QueryError::new(Code::ClientState, e.to_string()))?;
        self.inner.query.sql_query_stream(&req, row_timeout).await
    }

    /// Open a stream-write session bound to `table`, routed once at open.
    pub async fn stream_write(&self, table: impl Into<String>) -> Result<StreamWriter, WriteError> {
        self.ensure_running()
            .map_err(|e| WriteError::new(Code::ClientState, e.to_string()))?;

        let table = table.into();
        let routes = self
            .inner
            .router
            .route_for(&self.inner.ctx, std::slice::from_ref(&table))
            .await
            .map_err(|e| {
                let message = e.message.clone();
                WriteError::new(Code::RouteTable, message).with_source(e)
            })?;
        let endpoint = routes[table.as_str()].endpoint().clone();

        let stream = self
            .inner
            .rpc
            .write_stream(&endpoint, &self.inner.ctx)
            .await
            .map_err(|e| {
                WriteError::new(e.code(), e.to_string())
                    .with_endpoint(endpoint.clone())
                    .with_source(e)
            })?;

        Ok(StreamWriter::new(
            table,
            self.inner.ctx.database.clone(),
            stream,
            self.inner.block_on_limit,
        ))
    }

    /// Stop background work, drop the route cache and deregister the
    /// instance. Idempotent; subsequent requests fail with
    /// [`Code::ClientState`].
    pub fn shutdown_gracefully(&self) {
        self.inner.shutdown_gracefully();
    }

    /// All live client instances in this process.
    pub fn instances() -> Vec<InstanceInfo> {
        registry::instances()
    }

    /// The metric registry this client records into.
    pub fn metric_registry(&self) -> Arc<metric::Registry> {
        Arc::clone(&self.inner.metrics)
    }

    /// The current route cache size, for diagnostics.
    pub fn route_cache_size(&self) -> usize {
        self.inner.router.cache_size()
    }

    fn ensure_running(&self) -> Result<(), ShutDown> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(ShutDown);
        }
        Ok(())
    }
}

impl ClientInner {
    fn shutdown_gracefully(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.router.shutdown();
        registry::deregister(self.id);
        info!(id = self.id, "tesseradb client shut down");
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        // A dropped-but-never-shut-down client must still release its GC
        // task and registry slot.
        self.shutdown_gracefully();
    }
}
