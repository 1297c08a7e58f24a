use crate::metrics::RouterMetrics;
use crate::{Route, RouteCache};
use data_types::{Endpoint, RequestContext, RouteError};
use hashbrown::HashMap;
use parking_lot::Mutex;
use rpc::{message, RpcClient, RpcContext};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_time::TimeProvider;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Start evicting once the cache reaches this share of its bound.
const CLEAN_CACHE_THRESHOLD: f64 = 0.75;
/// Share of entries evicted per GC round.
const CLEAN_RATIO: f64 = 0.10;
/// Bound on consecutive rounds within one GC invocation, so a pathological
/// insert flood cannot starve the cleaner.
const MAX_CONTINUOUS_GC_TIMES: usize = 3;

/// How requests find their server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteMode {
    /// Per-table routes resolved against the cluster address.
    #[default]
    Direct,
    /// Everything goes to the configured endpoint; no per-table routing.
    Proxy,
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Target of route-refresh RPCs, and the fixed target in proxy mode.
    pub cluster_address: Endpoint,
    pub mode: RouteMode,
    /// Soft bound on the route cache; GC starts at 0.75× this.
    pub max_cached_size: usize,
    /// Period of the scheduled GC task; `None` disables it.
    pub gc_period: Option<Duration>,
}

/// Resolves tables to server endpoints through a bounded local cache.
///
/// Cache misses are refreshed from the cluster address in one batched RPC.
/// When the cluster address itself is unreachable the refresh is retried
/// round-robin over the distinct endpoints currently cached. Dispatchers
/// invalidate entries when a server reports the route is stale.
#[derive(Debug)]
pub struct Router {
    rpc: Arc<dyn RpcClient>,
    cache: RouteCache,
    config: RouterConfig,
    metrics: RouterMetrics,
    time: Arc<dyn TimeProvider>,
    gc_task: Mutex<Option<JoinHandle<()>>>,
}

impl Router {
    pub fn new(
        rpc: Arc<dyn RpcClient>,
        config: RouterConfig,
        time: Arc<dyn TimeProvider>,
        registry: &metric::Registry,
    ) -> Self {
        let metrics = RouterMetrics::new(registry, &config.cluster_address);
        Self {
            rpc,
            cache: RouteCache::new(),
            config,
            metrics,
            time,
            gc_task: Mutex::new(None),
        }
    }

    /// Spawn the scheduled cache cleaner, when configured.
    pub fn start_gc_task(self: &Arc<Self>) {
        let Some(period) = self.config.gc_period else {
            return;
        };
        if matches!(self.config.mode, RouteMode::Proxy) {
            return;
        }

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                let Some(router) = weak.upgrade() else {
                    break;
                };
                router.gc();
            }
        });

        let previous = self.gc_task.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!("route cache cleaner started");
    }

    /// Resolve routes for `tables`, refreshing misses in one batched RPC.
    ///
    /// Tables a successful refresh still leaves unresolved are synthesized
    /// onto the cluster address; the next server response will correct them.
    /// Fails only when the refresh RPC itself fails beyond what the reserve
    /// endpoints can mask.
    pub async fn route_for(
        &self,
        ctx: &RpcContext,
        tables: &[String],
    ) -> Result<HashMap<String, Arc<Route>>, RouteError> {
        if tables.is_empty() {
            return Ok(HashMap::new());
        }

        let now = self.time.now().timestamp_millis();

        if matches!(self.config.mode, RouteMode::Proxy) {
            return Ok(self.synthesize(tables.iter(), now));
        }

        let mut hits = HashMap::with_capacity(tables.len());
        let mut misses = Vec::new();
        for table in tables {
            match self.cache.get(table) {
                Some(route) => {
                    hits.insert(table.clone(), route);
                }
                None => misses.push(table.clone()),
            }
        }

        if !misses.is_empty() {
            let remote = self.route_refresh_for(ctx, &misses).await?;
            hits.extend(remote);

            // Tables the cluster did not answer for fall back to the cluster
            // address itself, uncached.
            for miss in misses {
                hits.entry(miss).or_insert_with_key(|table| {
                    Arc::new(Route::new(table, self.config.cluster_address.clone(), now))
                });
            }
        }

        for route in hits.values() {
            route.touch(now);
        }
        Ok(hits)
    }

    /// Unconditionally refresh routes for `tables`, overwriting cached
    /// entries. No cluster-address synthesis happens here.
    pub async fn route_refresh_for(
        &self,
        ctx: &RpcContext,
        tables: &[String],
    ) -> Result<HashMap<String, Arc<Route>>, RouteError> {
        if tables.is_empty() {
            return Ok(HashMap::new());
        }

        let now = self.time.now().timestamp_millis();

        if matches!(self.config.mode, RouteMode::Proxy) {
            return Ok(self.synthesize(tables.iter(), now));
        }

        let req = message::RouteRequest {
            context: RequestContext::new(&ctx.database),
            tables: tables.to_vec(),
        };

        let resp = match self.invoke_route_rpc(req, ctx).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(?tables, error = %e, "route refresh failed");
                return Err(e);
            }
        };
        if !resp.header.is_success() {
            warn!(?tables, code = resp.header.code, "route refresh rejected");
            return Err(RouteError::new(format!(
                "failed to refresh route table: code={}, {}",
                resp.header.code, resp.header.error
            )));
        }

        let remote: HashMap<String, Arc<Route>> = resp
            .routes
            .into_iter()
            .map(|route| {
                (
                    route.table.clone(),
                    Arc::new(Route::new(route.table, route.endpoint, now)),
                )
            })
            .collect();

        self.cache.insert_all(remote.values().map(Arc::clone));
        self.metrics.refreshed_size.record(remote.len() as u64);
        self.metrics.cached_size.record(self.cache.len() as u64);
        info!(
            ?tables,
            cached_size = self.cache.len(),
            "route table refreshed"
        );

        Ok(remote)
    }

    /// Targeted invalidation, used by dispatchers on `INVALID_ROUTE`.
    pub fn clear_route_cache_by<T: AsRef<str>>(&self, tables: impl IntoIterator<Item = T>) {
        self.cache.remove_tables(tables);
    }

    /// Full drop, returning the number of entries removed.
    pub fn clear_route_cache(&self) -> usize {
        self.cache.clear()
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn cluster_address(&self) -> &Endpoint {
        &self.config.cluster_address
    }

    /// One GC invocation: evict the oldest 10% while the cache sits at or
    /// above 75% of its bound, at most [`MAX_CONTINUOUS_GC_TIMES`]
    /// continuation rounds.
    pub fn gc(&self) {
        let started = Instant::now();
        let threshold = self.config.max_cached_size as f64 * CLEAN_CACHE_THRESHOLD;
        let mut times = 0;

        loop {
            let size = self.cache.len();
            if (size as f64) < threshold {
                debug!(size, "route cache within bounds");
                break;
            }

            warn!(
                size,
                max = self.config.max_cached_size,
                "route cache is about to exceed its limit, evicting"
            );

            let k = (size as f64 * CLEAN_RATIO) as usize;
            if k == 0 {
                break;
            }

            let evicted = self.cache.evict_oldest(k);
            self.metrics.gc_items.record(evicted as u64);
            warn!(evicted, remaining = self.cache.len(), "route cache cleaned");

            if (self.cache.len() as f64) >= threshold && times < MAX_CONTINUOUS_GC_TIMES {
                times += 1;
                continue;
            }
            break;
        }

        self.metrics.gc_times.record(times as u64);
        self.metrics.gc_timer.record(started.elapsed());
    }

    /// Abort the scheduled cleaner and drop the cache.
    pub fn shutdown(&self) {
        if let Some(handle) = self.gc_task.lock().take() {
            handle.abort();
        }
        let dropped = self.clear_route_cache();
        debug!(dropped, "router shut down");
    }

    fn synthesize<'a>(
        &self,
        tables: impl Iterator<Item = &'a String>,
        now: i64,
    ) -> HashMap<String, Arc<Route>> {
        let endpoint = &self.config.cluster_address;
        tables
            .map(|table| {
                (
                    table.clone(),
                    Arc::new(Route::new(table, endpoint.clone(), now)),
                )
            })
            .collect()
    }

    /// Post the refresh to the cluster address, falling back round-robin
    /// over the endpoints currently cached when the cluster is unreachable.
    async fn invoke_route_rpc(
        &self,
        req: message::RouteRequest,
        ctx: &RpcContext,
    ) -> Result<message::RouteResponse, RouteError> {
        let cluster = &self.config.cluster_address;
        if self.rpc.check_connection(cluster, true).await {
            return self
                .rpc
                .route(cluster, req, ctx, None)
                .await
                .map_err(|e| RouteError::new("route RPC failed").with_source(e));
        }

        warn!(%cluster, "failed to connect to the cluster address");

        for (i, endpoint) in self.cache.endpoints().iter().enumerate() {
            if self.rpc.check_connection(endpoint, false).await {
                warn!(attempt = i + 1, %endpoint, "routing via reserve endpoint");
                return self
                    .rpc
                    .route(endpoint, req, ctx, None)
                    .await
                    .map_err(|e| RouteError::new("route RPC failed").with_source(e));
            }
        }

        Err(RouteError::new(format!("failed to connect to {cluster}")))
    }
}
