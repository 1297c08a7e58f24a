//! The SQL path: resolve a single endpoint, dispatch, decode rows.

use crate::{decode, sql};
use backoff::{Backoff, BackoffConfig};
use data_types::{Code, Endpoint, QueryError, RequestContext, Row, SqlQueryOk, SqlQueryRequest};
use futures::StreamExt;
use metric::{DurationHistogram, Metric, U64Counter};
use router::Router;
use rpc::{message, RpcClient, RpcContext};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::warn;

/// Rows buffered between the RPC stream pump and a [`RowStream`] consumer.
const STREAM_ROW_BUFFER: usize = 1024;

#[derive(Debug)]
pub(crate) struct QueryMetrics {
    duration: Metric<DurationHistogram>,
    retries: Metric<U64Counter>,
}

impl QueryMetrics {
    pub(crate) fn new(registry: &metric::Registry) -> Self {
        let duration: Metric<DurationHistogram> = registry.register_metric(
            "sql_query_request_duration",
            "SQL query RPC round-trip time per endpoint",
        );
        let retries: Metric<U64Counter> =
            registry.register_metric("sql_query_retries", "SQL query retries per error code");
        Self { duration, retries }
    }

    fn duration_for(&self, endpoint: &Endpoint) -> DurationHistogram {
        self.duration
            .recorder([("endpoint", endpoint.to_string())])
    }

    fn retried(&self, code: Code) {
        self.retries
            .recorder([("code", format!("{code:?}"))])
            .inc(1);
    }
}

/// Dispatches SQL requests to the single endpoint owning every referenced
/// table.
#[derive(Debug)]
pub(crate) struct QueryDispatcher {
    rpc: Arc<dyn RpcClient>,
    router: Arc<Router>,
    ctx: RpcContext,
    max_retries: usize,
    backoff_config: BackoffConfig,
    metrics: QueryMetrics,
}

impl QueryDispatcher {
    pub(crate) fn new(
        rpc: Arc<dyn RpcClient>,
        router: Arc<Router>,
        ctx: RpcContext,
        max_retries: usize,
        backoff_config: BackoffConfig,
        registry: &metric::Registry,
    ) -> Self {
        Self {
            rpc,
            router,
            ctx,
            max_retries,
            backoff_config,
            metrics: QueryMetrics::new(registry),
        }
    }

    pub(crate) async fn sql_query(&self, req: &SqlQueryRequest) -> Result<SqlQueryOk, QueryError> {
        let tables = self.tables_of(req);
        let mut backoff = Backoff::new(&self.backoff_config);

        for attempt in 0..=self.max_retries {
            let endpoint = self.resolve_endpoint(&tables).await?;
            let wire = message::SqlQueryRequest {
                context: RequestContext::new(&self.ctx.database),
                tables: tables.clone(),
                sql: req.sql.clone(),
            };

            let started = Instant::now();
            let result = self.rpc.sql_query(&endpoint, wire, &self.ctx, None).await;
            self.metrics.duration_for(&endpoint).record(started.elapsed());

            let code = match result {
                Ok(resp) if resp.header.is_success() => {
                    return decode::decode_response(resp.affected_rows, &resp.batches).map_err(
                        |e| {
                            QueryError::new(Code::Internal, "failed to decode query response")
                                .with_endpoint(endpoint)
                                .with_source(e)
                        },
                    );
                }
                Ok(resp) => {
                    let code = resp.header.status();
                    warn!(%endpoint, code = ?code, error = %resp.header.error, "query rejected");
                    if code == Code::InvalidRoute {
                        self.router.clear_route_cache_by(&tables);
                    }
                    if !code.is_retriable() || attempt == self.max_retries {
                        return Err(
                            QueryError::new(code, resp.header.error).with_endpoint(endpoint)
                        );
                    }
                    code
                }
                Err(e) => {
                    let code = e.code();
                    warn!(%endpoint, error = %e, "query transport failure");
                    if !code.is_retriable() || attempt == self.max_retries {
                        return Err(QueryError::new(code, e.to_string())
                            .with_endpoint(endpoint)
                            .with_source(e));
                    }
                    code
                }
            };

            self.metrics.retried(code);
            if matches!(code, Code::FlowControl | Code::ShouldRetry) {
                backoff.wait().await;
            }
        }

        unreachable!("loop returns on success, exhaustion or fatal error");
    }

    /// Open a server-streaming query; rows arrive through the returned
    /// [`RowStream`], each waiting at most `row_timeout`.
    pub(crate) async fn sql_query_stream(
        &self,
        req: &SqlQueryRequest,
        row_timeout: Duration,
    ) -> Result<RowStream, QueryError> {
        let tables = self.tables_of(req);
        let endpoint = self.resolve_endpoint(&tables).await?;
        let wire = message::SqlQueryRequest {
            context: RequestContext::new(&self.ctx.database),
            tables,
            sql: req.sql.clone(),
        };

        let mut stream = self
            .rpc
            .sql_query_stream(&endpoint, wire, &self.ctx)
            .await
            .map_err(|e| {
                QueryError::new(e.code(), e.to_string())
                    .with_endpoint(endpoint.clone())
                    .with_source(e)
            })?;

        // Pump partial responses into a bounded queue; errors travel in-band
        // and terminate the stream.
        let (tx, rx) = mpsc::channel(STREAM_ROW_BUFFER);
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let resp = match item {
                    Ok(resp) if resp.header.is_success() => resp,
                    Ok(resp) => {
                        let _ = tx
                            .send(Err(QueryError::new(
                                resp.header.status(),
                                resp.header.error,
                            )
                            .with_endpoint(endpoint.clone())))
                            .await;
                        return;
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(QueryError::new(e.code(), e.to_string())
                                .with_endpoint(endpoint.clone())
                                .with_source(e)))
                            .await;
                        return;
                    }
                };

                let mut rows = Vec::new();
                let decoded = resp
                    .batches
                    .iter()
                    .try_for_each(|chunk| decode::decode_chunk(chunk, &mut rows));
                if let Err(e) = decoded {
                    let _ = tx
                        .send(Err(QueryError::new(
                            Code::Internal,
                            "failed to decode query response",
                        )
                        .with_endpoint(endpoint.clone())
                        .with_source(e)))
                        .await;
                    return;
                }

                for row in rows {
                    // Consumer went away; stop pumping.
                    if tx.send(Ok(row)).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(RowStream { rx, row_timeout })
    }

    fn tables_of(&self, req: &SqlQueryRequest) -> Vec<String> {
        if req.tables.is_empty() {
            sql::extract_table_names(&req.sql)
        } else {
            req.tables.clone()
        }
    }

    /// All referenced tables must live on one endpoint; queries with no
    /// known table go to the cluster address.
    async fn resolve_endpoint(&self, tables: &[String]) -> Result<Endpoint, QueryError> {
        if tables.is_empty() {
            return Ok(self.router.cluster_address().clone());
        }

        let routes = self
            .router
            .route_for(&self.ctx, tables)
            .await
            .map_err(|e| {
                let message = e.message.clone();
                QueryError::new(Code::RouteTable, message).with_source(e)
            })?;

        let mut endpoints: Vec<Endpoint> = routes
            .values()
            .map(|route| route.endpoint().clone())
            .collect();
        endpoints.sort_unstable();
        endpoints.dedup();

        match endpoints.len() {
            1 => Ok(endpoints.pop().expect("non-empty")),
            _ => Err(QueryError::new(
                Code::Query,
                "tables of sql query do not belong to the same server",
            )),
        }
    }
}

/// A pull-based view over a server-streaming query.
///
/// Rows are buffered by a background pump; [`RowStream::next`] waits up to
/// the configured per-row timeout. Stream errors arrive in-band as the next
/// item.
#[derive(Debug)]
pub struct RowStream {
    rx: mpsc::Receiver<Result<Row, QueryError>>,
    row_timeout: Duration,
}

impl RowStream {
    /// The next row, `None` at a clean end of stream.
    ///
    /// Waits up to the per-row timeout; expiry yields an error item, and the
    /// stream may be polled again afterwards.
    pub async fn next(&mut self) -> Option<Result<Row, QueryError>> {
        match tokio::time::timeout(self.row_timeout, self.rx.recv()).await {
            Ok(item) => item,
            Err(_) => Some(Err(QueryError::new(
                Code::Unavailable,
                format!("no row arrived within {:?}", self.row_timeout),
            ))),
        }
    }

    /// Drain the remaining rows, failing on the first error item.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>, QueryError> {
        let mut rows = Vec::new();
        while let Some(item) = self.next().await {
            rows.push(item?);
        }
        Ok(rows)
    }
}
