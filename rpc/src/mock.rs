//! A scripted [`RpcClient`] implementation for tests.

use crate::message::{
    Route, RouteRequest, RouteResponse, SqlQueryRequest, SqlQueryResponse, WriteRequest,
    WriteResponse,
};
use crate::{message, ResponseStream, RpcClient, RpcContext, RpcError, WriteStream};
use async_trait::async_trait;
use data_types::Endpoint;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Default)]
struct State {
    /// The mock cluster's routing table; `route` answers from it unless a
    /// scripted response is queued.
    route_table: HashMap<String, Endpoint>,
    route_ret: VecDeque<Result<RouteResponse, RpcError>>,
    route_calls: Vec<(Endpoint, RouteRequest)>,

    write_ret: HashMap<Endpoint, VecDeque<Result<WriteResponse, RpcError>>>,
    write_calls: Vec<(Endpoint, WriteRequest)>,

    sql_ret: VecDeque<Result<SqlQueryResponse, RpcError>>,
    sql_stream_ret: VecDeque<Vec<Result<SqlQueryResponse, RpcError>>>,
    sql_calls: Vec<(Endpoint, SqlQueryRequest)>,

    unreachable: HashSet<Endpoint>,
    connection_checks: Vec<(Endpoint, bool)>,

    stream_capacity: usize,
    /// Scripted terminal errors, one per opened session.
    stream_errors: VecDeque<RpcError>,
    stream_requests: usize,
    stream_points: usize,
}

/// A mock transport: scripted responses, recorded calls.
#[derive(Debug)]
pub struct MockRpcClient {
    state: Arc<Mutex<State>>,
}

impl Default for MockRpcClient {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                stream_capacity: 8,
                ..Default::default()
            })),
        }
    }
}

impl MockRpcClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `table` to `endpoint` in the mock cluster's routing table.
    pub fn with_route(self, table: impl Into<String>, endpoint: Endpoint) -> Self {
        self.state.lock().route_table.insert(table.into(), endpoint);
        self
    }

    /// Queue scripted route responses, consumed before the routing table is
    /// consulted.
    pub fn with_route_ret(
        self,
        ret: impl Into<VecDeque<Result<RouteResponse, RpcError>>>,
    ) -> Self {
        self.state.lock().route_ret = ret.into();
        self
    }

    /// Queue scripted write responses for `endpoint`; once drained, writes
    /// to it succeed with `success == points.len()`.
    pub fn with_write_ret(
        self,
        endpoint: Endpoint,
        ret: impl Into<VecDeque<Result<WriteResponse, RpcError>>>,
    ) -> Self {
        self.state.lock().write_ret.insert(endpoint, ret.into());
        self
    }

    pub fn with_sql_ret(
        self,
        ret: impl Into<VecDeque<Result<SqlQueryResponse, RpcError>>>,
    ) -> Self {
        self.state.lock().sql_ret = ret.into();
        self
    }

    /// Queue one server-streaming query's chunk sequence.
    pub fn with_sql_stream(self, chunks: Vec<Result<SqlQueryResponse, RpcError>>) -> Self {
        self.state.lock().sql_stream_ret.push_back(chunks);
        self
    }

    /// Make `check_connection` report `endpoint` as down.
    pub fn with_unreachable(self, endpoint: Endpoint) -> Self {
        self.set_unreachable(endpoint);
        self
    }

    /// [`Self::with_unreachable`] for an already-shared mock.
    pub fn set_unreachable(&self, endpoint: Endpoint) {
        self.state.lock().unreachable.insert(endpoint);
    }

    /// Bring a downed endpoint back up.
    pub fn set_reachable(&self, endpoint: &Endpoint) {
        self.state.lock().unreachable.remove(endpoint);
    }

    pub fn with_stream_capacity(self, capacity: usize) -> Self {
        self.state.lock().stream_capacity = capacity;
        self
    }

    /// Abort the next opened write-stream session with `error` after
    /// consuming its requests.
    pub fn with_stream_error(self, error: RpcError) -> Self {
        self.state.lock().stream_errors.push_back(error);
        self
    }

    pub fn route_calls(&self) -> Vec<(Endpoint, RouteRequest)> {
        self.state.lock().route_calls.clone()
    }

    pub fn write_calls(&self) -> Vec<(Endpoint, WriteRequest)> {
        self.state.lock().write_calls.clone()
    }

    pub fn sql_calls(&self) -> Vec<(Endpoint, SqlQueryRequest)> {
        self.state.lock().sql_calls.clone()
    }

    pub fn connection_checks(&self) -> Vec<(Endpoint, bool)> {
        self.state.lock().connection_checks.clone()
    }

    /// Total requests received across write-stream sessions.
    pub fn stream_requests(&self) -> usize {
        self.state.lock().stream_requests
    }

    /// Total points received across write-stream sessions.
    pub fn stream_points(&self) -> usize {
        self.state.lock().stream_points
    }
}

#[async_trait]
impl RpcClient for MockRpcClient {
    async fn route(
        &self,
        endpoint: &Endpoint,
        req: RouteRequest,
        _ctx: &RpcContext,
        _timeout: Option<Duration>,
    ) -> Result<RouteResponse, RpcError> {
        let mut state = self.state.lock();
        state.route_calls.push((endpoint.clone(), req.clone()));

        if let Some(ret) = state.route_ret.pop_front() {
            return ret;
        }

        let routes = req
            .tables
            .iter()
            .filter_map(|table| {
                state.route_table.get(table).map(|endpoint| Route {
                    table: table.clone(),
                    endpoint: endpoint.clone(),
                })
            })
            .collect();
        Ok(RouteResponse {
            header: message::ResponseHeader::ok(),
            routes,
        })
    }

    async fn write(
        &self,
        endpoint: &Endpoint,
        req: WriteRequest,
        _ctx: &RpcContext,
        _timeout: Option<Duration>,
    ) -> Result<WriteResponse, RpcError> {
        let mut state = self.state.lock();
        let point_count = req.points.len() as u32;
        state.write_calls.push((endpoint.clone(), req));

        if let Some(ret) = state
            .write_ret
            .get_mut(endpoint)
            .and_then(|rets| rets.pop_front())
        {
            return ret;
        }

        Ok(WriteResponse {
            header: message::ResponseHeader::ok(),
            success: point_count,
            failed: 0,
        })
    }

    async fn sql_query(
        &self,
        endpoint: &Endpoint,
        req: SqlQueryRequest,
        _ctx: &RpcContext,
        _timeout: Option<Duration>,
    ) -> Result<SqlQueryResponse, RpcError> {
        let mut state = self.state.lock();
        state.sql_calls.push((endpoint.clone(), req));

        state.sql_ret.pop_front().unwrap_or_else(|| {
            Ok(SqlQueryResponse {
                header: message::ResponseHeader::ok(),
                affected_rows: 0,
                batches: vec![],
            })
        })
    }

    async fn sql_query_stream(
        &self,
        endpoint: &Endpoint,
        req: SqlQueryRequest,
        _ctx: &RpcContext,
    ) -> Result<ResponseStream<SqlQueryResponse>, RpcError> {
        let mut state = self.state.lock();
        state.sql_calls.push((endpoint.clone(), req));

        let chunks = state.sql_stream_ret.pop_front().unwrap_or_default();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn write_stream(
        &self,
        endpoint: &Endpoint,
        _ctx: &RpcContext,
    ) -> Result<WriteStream, RpcError> {
        let (capacity, error) = {
            let mut state = self.state.lock();
            (state.stream_capacity, state.stream_errors.pop_front())
        };

        let (tx, mut rx) = mpsc::channel::<message::WriteRequest>(capacity);
        let (done_tx, done_rx) = oneshot::channel();
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let mut success = 0_u32;
            while let Some(req) = rx.recv().await {
                let mut state = state.lock();
                state.stream_requests += 1;
                state.stream_points += req.points.len();
                success += req.points.len() as u32;
            }
            let result = match error {
                Some(err) => Err(err),
                None => Ok(WriteResponse {
                    header: message::ResponseHeader::ok(),
                    success,
                    failed: 0,
                }),
            };
            let _ = done_tx.send(result);
        });

        Ok(WriteStream::new(endpoint.clone(), tx, done_rx))
    }

    async fn check_connection(&self, endpoint: &Endpoint, create_if_absent: bool) -> bool {
        let mut state = self.state.lock();
        state
            .connection_checks
            .push((endpoint.clone(), create_if_absent));
        !state.unreachable.contains(endpoint)
    }
}
