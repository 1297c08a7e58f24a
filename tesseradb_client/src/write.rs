//! The write path: route, partition, fan out, combine, retry.

use backoff::{Backoff, BackoffConfig};
use data_types::{Code, Endpoint, Point, RequestContext, WriteError, WriteOk, WriteRequest};
use futures::future::join_all;
use hashbrown::{HashMap, HashSet};
use metric::{Attributes, DurationHistogram, Metric, U64Counter, U64Histogram};
use router::Router;
use rpc::{message, RpcClient, RpcContext};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug)]
pub(crate) struct WriteMetrics {
    duration: Metric<DurationHistogram>,
    batch_size: U64Histogram,
    retries: Metric<U64Counter>,
}

impl WriteMetrics {
    pub(crate) fn new(registry: &metric::Registry) -> Self {
        let duration: Metric<DurationHistogram> = registry.register_metric(
            "write_request_duration",
            "write RPC round-trip time per endpoint",
        );
        let batch_size: Metric<U64Histogram> =
            registry.register_metric("write_points_per_batch", "points per write request");
        let retries: Metric<U64Counter> =
            registry.register_metric("write_retries", "write retries per error code");

        Self {
            duration,
            batch_size: batch_size.recorder(Attributes::default()),
            retries,
        }
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

/// Delivers every point of a batch to the server owning its table.
///
/// Points are partitioned by resolved route and the per-endpoint
/// sub-batches are submitted in parallel. Per-server results combine
/// additively; sub-batches failing with a retriable code are retried, alone,
/// up to the configured bound, with the route cache invalidated first when
/// the server reported the route stale.
#[derive(Debug)]
pub(crate) struct WriteDispatcher {
    rpc: Arc<dyn RpcClient>,
    router: Arc<Router>,
    ctx: RpcContext,
    max_retries: usize,
    collect_wrote_detail: bool,
    backoff_config: BackoffConfig,
    metrics: WriteMetrics,
}

impl WriteDispatcher {
    pub(crate) fn new(
        rpc: Arc<dyn RpcClient>,
        router: Arc<Router>,
        ctx: RpcContext,
        max_retries: usize,
        collect_wrote_detail: bool,
        backoff_config: BackoffConfig,
        registry: &metric::Registry,
    ) -> Self {
        Self {
            rpc,
            router,
            ctx,
            max_retries,
            collect_wrote_detail,
            backoff_config,
            metrics: WriteMetrics::new(registry),
        }
    }

    pub(crate) async fn write(&self, req: WriteRequest) -> Result<WriteOk, WriteError> {
        if req.is_empty() {
            return Ok(WriteOk::empty());
        }

        self.metrics.batch_size.record(req.points.len() as u64);

        let mut acc = WriteOk::empty();
        let mut points = req.points;
        let mut backoff = Backoff::new(&self.backoff_config);

        for attempt in 0..=self.max_retries {
            let outcome = match self.write_once(points).await {
                Ok(outcome) => outcome,
                Err(err) => return Err(err.with_ok(acc)),
            };

            acc = acc.combine(outcome.ok);
            let Some(failure) = outcome.failure else {
                return Ok(acc);
            };

            if !failure.invalid_tables.is_empty() {
                // Stale routes must go before the retry resolves again.
                self.router.clear_route_cache_by(&failure.invalid_tables);
            }

            let retriable = failure.code.is_retriable();
            if !retriable || attempt == self.max_retries {
                if retriable {
                    warn!(
                        attempts = attempt + 1,
                        code = ?failure.code,
                        "write retries exhausted"
                    );
                }
                let mut err = WriteError::new(failure.code, failure.message)
                    .with_failed(failure.points)
                    .with_ok(acc);
                if let Some(endpoint) = failure.endpoint {
                    err = err.with_endpoint(endpoint);
                }
                if let Some(source) = failure.source {
                    err = err.with_source(source);
                }
                return Err(err);
            }

            self.metrics.retried(failure.code);
            debug!(
                attempt = attempt + 1,
                code = ?failure.code,
                failed = failure.points.len(),
                "retrying failed write subset"
            );
            if matches!(failure.code, Code::FlowControl | Code::ShouldRetry) {
                backoff.wait().await;
            }
            points = failure.points;
        }

        unreachable!("loop returns on success, exhaustion or fatal error");
    }

    /// One fan-out attempt over `points`.
    async fn write_once(&self, points: Vec<Point>) -> Result<AttemptOutcome, WriteError> {
        let tables: Vec<String> = {
            let mut seen = HashSet::new();
            points
                .iter()
                .filter(|p| seen.insert(p.table()))
                .map(|p| p.table().to_owned())
                .collect()
        };

        let routes = match self.router.route_for(&self.ctx, &tables).await {
            Ok(routes) => routes,
            Err(e) => {
                let message = e.message.clone();
                return Err(WriteError::new(Code::RouteTable, message)
                    .with_failed(points)
                    .with_source(e));
            }
        };

        // Partition by endpoint, input order preserved within each
        // sub-batch.
        let mut by_endpoint: HashMap<Endpoint, Vec<Point>> = HashMap::new();
        for point in points {
            let endpoint = routes[point.table()].endpoint().clone();
            by_endpoint.entry(endpoint).or_default().push(point);
        }

        let requests = by_endpoint.into_iter().map(|(endpoint, batch)| async move {
            let req = message::WriteRequest {
                context: RequestContext::new(&self.ctx.database),
                points: batch.clone(),
            };
            let started = Instant::now();
            let result = self.rpc.write(&endpoint, req, &self.ctx, None).await;
            self.metrics.duration_for(&endpoint).record(started.elapsed());
            (endpoint, batch, result)
        });

        let mut outcome = AttemptOutcome::default();
        for (endpoint, batch, result) in join_all(requests).await {
            match result {
                Ok(resp) if resp.header.is_success() => {
                    let detail = self.collect_wrote_detail.then(|| {
                        batch.iter().map(|p| p.table().to_owned()).collect()
                    });
                    outcome.ok = std::mem::take(&mut outcome.ok).combine(WriteOk::new(
                        resp.success,
                        resp.failed,
                        detail,
                    ));
                }
                Ok(resp) => {
                    let code = resp.header.status();
                    warn!(%endpoint, code = ?code, error = %resp.header.error, "write rejected");
                    if code == Code::InvalidRoute {
                        outcome
                            .failure_mut()
                            .invalid_tables
                            .extend(batch.iter().map(|p| p.table().to_owned()));
                    }
                    outcome.record_failure(code, resp.header.error, endpoint, None, batch);
                }
                Err(e) => {
                    let code = e.code();
                    warn!(%endpoint, error = %e, "write transport failure");
                    outcome.record_failure(
                        code,
                        e.to_string(),
                        endpoint,
                        Some(Box::new(e)),
                        batch,
                    );
                }
            }
        }
        Ok(outcome)
    }
}

/// The merged result of one fan-out attempt.
#[derive(Debug, Default)]
struct AttemptOutcome {
    ok: WriteOk,
    failure: Option<AttemptFailure>,
}

#[derive(Debug)]
struct AttemptFailure {
    /// The most severe code observed: any non-retriable code wins over a
    /// retriable one.
    code: Code,
    message: String,
    endpoint: Option<Endpoint>,
    source: Option<data_types::BoxError>,
    /// Points of every failed sub-batch, candidates for the retry.
    points: Vec<Point>,
    /// Tables to invalidate before the next attempt.
    invalid_tables: HashSet<String>,
}

impl AttemptOutcome {
    fn failure_mut(&mut self) -> &mut AttemptFailure {
        self.failure.get_or_insert_with(|| AttemptFailure {
            code: Code::Unknown,
            message: String::new(),
            endpoint: None,
            source: None,
            points: vec![],
            invalid_tables: HashSet::new(),
        })
    }

    fn record_failure(
        &mut self,
        code: Code,
        message: String,
        endpoint: Endpoint,
        source: Option<data_types::BoxError>,
        batch: Vec<Point>,
    ) {
        let failure = self.failure_mut();
        if failure.points.is_empty() || (failure.code.is_retriable() && !code.is_retriable()) {
            failure.code = code;
            failure.message = message;
            failure.endpoint = Some(endpoint);
            failure.source = source;
        }
        failure.points.extend(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use router::{RouteMode, RouterConfig};
    use rpc::mock::MockRpcClient;
    use rpc::RpcError;
    use std::time::Duration;
    use tessera_time::{MockProvider, Time};

    fn cluster() -> Endpoint {
        Endpoint::new("127.0.0.1", 8831)
    }

    fn server(n: u16) -> Endpoint {
        Endpoint::new("10.0.0.1", 9000 + n)
    }

    fn point(table: &str, ts: i64) -> Point {
        Point::builder(table)
            .timestamp(ts)
            .tag("city", "Singapore")
            .field("cpu", 0.23)
            .build()
            .unwrap()
    }

    fn dispatcher(mock: MockRpcClient, max_retries: usize) -> (Arc<MockRpcClient>, WriteDispatcher) {
        dispatcher_with_detail(mock, max_retries, false)
    }

    fn dispatcher_with_detail(
        mock: MockRpcClient,
        max_retries: usize,
        collect_wrote_detail: bool,
    ) -> (Arc<MockRpcClient>, WriteDispatcher) {
        let mock = Arc::new(mock);
        let registry = metric::Registry::new();
        let router = Arc::new(Router::new(
            Arc::clone(&mock) as _,
            RouterConfig {
                cluster_address: cluster(),
                mode: RouteMode::Direct,
                max_cached_size: 100,
                gc_period: None,
            },
            Arc::new(MockProvider::new(Time::from_timestamp_millis(0))),
            &registry,
        ));
        let dispatcher = WriteDispatcher::new(
            Arc::clone(&mock) as _,
            router,
            RpcContext::new("public"),
            max_retries,
            collect_wrote_detail,
            BackoffConfig {
                init_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
                base: 1.0,
            },
            &registry,
        );
        (mock, dispatcher)
    }

    #[tokio::test]
    async fn empty_write_short_circuits() {
        let (mock, dispatcher) = dispatcher(MockRpcClient::new(), 1);
        let ok = dispatcher.write(WriteRequest::default()).await.unwrap();
        assert_eq!(ok, WriteOk::empty());
        assert!(mock.write_calls().is_empty());
        assert!(mock.route_calls().is_empty());
    }

    #[tokio::test]
    async fn happy_path_single_endpoint() {
        let (mock, dispatcher) = dispatcher(
            MockRpcClient::new()
                .with_route("machine_table", server(1)),
            1,
        );

        let points = vec![
            point("machine_table", 1),
            point("machine_table", 2),
            point("machine_table", 3),
        ];
        let ok = dispatcher.write(WriteRequest::new(points)).await.unwrap();

        assert_eq!(ok.success, 3);
        assert_eq!(ok.failed, 0);
        assert_eq!(mock.write_calls().len(), 1);
    }

    #[tokio::test]
    async fn partitions_by_endpoint_preserving_order() {
        let (mock, dispatcher) = dispatcher(
            MockRpcClient::new()
                .with_route("t1", server(1))
                .with_route("t2", server(2)),
            1,
        );

        let points = vec![
            point("t1", 10),
            point("t2", 20),
            point("t1", 30),
            point("t2", 40),
        ];
        let ok = dispatcher.write(WriteRequest::new(points)).await.unwrap();
        assert_eq!(ok.success, 4);

        let calls = mock.write_calls();
        assert_eq!(calls.len(), 2);
        for (endpoint, req) in calls {
            let timestamps: Vec<i64> = req.points.iter().map(Point::timestamp).collect();
            if endpoint == server(1) {
                assert_eq!(timestamps, [10, 30]);
            } else {
                assert_eq!(endpoint, server(2));
                assert_eq!(timestamps, [20, 40]);
            }
        }
    }

    #[tokio::test]
    async fn invalid_route_invalidates_and_retries_failed_subset_only() {
        let (mock, dispatcher) = dispatcher(
            MockRpcClient::new()
                .with_route("t1", server(1))
                .with_route("t2", server(2))
                .with_write_ret(
                    server(1),
                    [Ok(message::WriteResponse {
                        header: message::ResponseHeader::error(
                            message::code::INVALID_ROUTE,
                            "moved",
                        ),
                        success: 0,
                        failed: 0,
                    })],
                ),
            1,
        );

        let points = vec![point("t1", 1), point("t1", 2), point("t2", 3)];
        let ok = dispatcher.write(WriteRequest::new(points)).await.unwrap();

        assert_eq!(ok.success, 3);
        assert_eq!(ok.failed, 0);

        // The t2 sub-batch is not resent.
        let to_s2: Vec<_> = mock
            .write_calls()
            .into_iter()
            .filter(|(e, _)| *e == server(2))
            .collect();
        assert_eq!(to_s2.len(), 1);

        // t1 was re-routed: one batched refresh up front, one after the
        // invalidation.
        let refreshes = mock.route_calls();
        assert_eq!(refreshes.len(), 2);
        assert_eq!(refreshes[1].1.tables, ["t1"]);
    }

    #[tokio::test]
    async fn retries_exhaust_into_error_with_partial_ok() {
        let (mock, dispatcher) = dispatcher(
            MockRpcClient::new()
                .with_route("t1", server(1))
                .with_route("t2", server(2))
                .with_write_ret(
                    server(1),
                    [
                        Ok(message::WriteResponse {
                            header: message::ResponseHeader::error(
                                message::code::INVALID_ROUTE,
                                "moved",
                            ),
                            success: 0,
                            failed: 0,
                        }),
                        Ok(message::WriteResponse {
                            header: message::ResponseHeader::error(
                                message::code::INVALID_ROUTE,
                                "moved again",
                            ),
                            success: 0,
                            failed: 0,
                        }),
                    ],
                ),
            1,
        );

        let points = vec![point("t1", 1), point("t2", 2)];
        let err = dispatcher.write(WriteRequest::new(points)).await.unwrap_err();

        assert_eq!(err.code, Code::InvalidRoute);
        assert_eq!(err.endpoint, Some(server(1)));
        assert_eq!(err.failed.len(), 1);
        assert_eq!(err.failed[0].table(), "t1");
        // The t2 point succeeded on the first attempt and stays counted.
        assert_eq!(err.ok.success, 1);

        // writeMaxRetries=1: exactly two attempts reached the endpoint.
        let to_s1 = mock
            .write_calls()
            .into_iter()
            .filter(|(e, _)| *e == server(1))
            .count();
        assert_eq!(to_s1, 2);
    }

    #[tokio::test]
    async fn non_retriable_code_fails_fast() {
        let (mock, dispatcher) = dispatcher(
            MockRpcClient::new()
                .with_route("t1", server(1))
                .with_write_ret(
                    server(1),
                    [Ok(message::WriteResponse {
                        header: message::ResponseHeader::error(message::code::INTERNAL, "boom"),
                        success: 0,
                        failed: 0,
                    })],
                ),
            3,
        );

        let err = dispatcher
            .write(WriteRequest::new(vec![point("t1", 1)]))
            .await
            .unwrap_err();

        assert_eq!(err.code, Code::Internal);
        assert_eq!(err.failed.len(), 1);
        assert_eq!(mock.write_calls().len(), 1);
    }

    #[tokio::test]
    async fn transport_flow_control_is_retried_with_backoff() {
        let (mock, dispatcher) = dispatcher(
            MockRpcClient::new()
                .with_route("t1", server(1))
                .with_write_ret(
                    server(1),
                    [Err(RpcError::FlowControl {
                        endpoint: server(1),
                    })],
                ),
            1,
        );

        let ok = dispatcher
            .write(WriteRequest::new(vec![point("t1", 1)]))
            .await
            .unwrap();
        assert_eq!(ok.success, 1);
        assert_eq!(mock.write_calls().len(), 2);
    }

    #[tokio::test]
    async fn transport_unavailable_is_not_retried() {
        let (mock, dispatcher) = dispatcher(
            MockRpcClient::new()
                .with_route("t1", server(1))
                .with_write_ret(
                    server(1),
                    [Err(RpcError::Unavailable {
                        endpoint: server(1),
                    })],
                ),
            3,
        );

        let err = dispatcher
            .write(WriteRequest::new(vec![point("t1", 1)]))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Unavailable);
        assert!(err.source.is_some());
        assert_eq!(mock.write_calls().len(), 1);
    }

    #[tokio::test]
    async fn wrote_detail_collects_tables() {
        let (_, dispatcher) = dispatcher_with_detail(
            MockRpcClient::new()
                .with_route("t1", server(1))
                .with_route("t2", server(2)),
            0,
            true,
        );

        let ok = dispatcher
            .write(WriteRequest::new(vec![point("t1", 1), point("t2", 2)]))
            .await
            .unwrap();

        let tables = ok.tables.expect("detail collection enabled");
        assert!(tables.contains("t1") && tables.contains("t2"));
    }
}
