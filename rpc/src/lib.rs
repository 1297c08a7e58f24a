//! The RPC contract consumed by the TesseraDB client.
//!
//! The concrete transport (connection management, framing, serialization,
//! adaptive concurrency limiting) is an external collaborator implementing
//! [`RpcClient`]. The client core depends only on this trait, the wire
//! shapes in [`message`], and the [`WriteStream`] client-streaming handle;
//! tests drive everything through [`mock::MockRpcClient`].

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod message;
pub mod mock;

use async_trait::async_trait;
use data_types::{Code, Endpoint};
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// The default request timeout applied when a call passes no override.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);
/// The default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
/// The default initial per-endpoint concurrency limit.
pub const DEFAULT_INITIAL_LIMIT: usize = 64;

/// The adaptive concurrency-limit strategy applied per endpoint by the
/// transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitKind {
    /// Round-trip-time based limit adjustment.
    Vegas,
    /// Compares a short-window RTT against a long-window RTT.
    #[default]
    Gradient,
}

/// Transport configuration plumbed through to the [`RpcClient`]
/// implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    /// Applied when a call passes no per-call timeout.
    pub default_rpc_timeout: Duration,
    pub connect_timeout: Duration,
    /// When the limiter denies an acquisition: block the caller (`true`) or
    /// fail fast with a flow-control error (`false`).
    pub block_on_limit: bool,
    /// Initial per-endpoint concurrency limit; also the buffered capacity of
    /// client-streaming sessions.
    pub initial_limit: usize,
    pub limit_kind: LimitKind,
    /// Log every limit adjustment the limiter makes.
    pub log_on_limit_change: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_rpc_timeout: DEFAULT_RPC_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            block_on_limit: true,
            initial_limit: DEFAULT_INITIAL_LIMIT,
            limit_kind: LimitKind::default(),
            log_on_limit_change: false,
        }
    }
}

/// The per-request context attached as RPC metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcContext {
    pub database: String,
    /// Additional metadata headers, e.g. the tenant triple.
    pub metadata: Vec<(String, String)>,
}

impl RpcContext {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            metadata: vec![],
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Errors produced by the transport collaborator.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("endpoint {endpoint} is unreachable")]
    Unavailable { endpoint: Endpoint },

    #[error("request to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: Endpoint, timeout: Duration },

    #[error("concurrency limit rejected the request to {endpoint}")]
    FlowControl { endpoint: Endpoint },

    #[error("streaming session to {endpoint} is closed")]
    StreamClosed { endpoint: Endpoint },

    #[error("transport error: {source}")]
    Transport {
        #[source]
        source: data_types::BoxError,
    },
}

impl RpcError {
    /// Map onto the shared error taxonomy.
    pub fn code(&self) -> Code {
        match self {
            Self::Unavailable { .. } | Self::Timeout { .. } | Self::Transport { .. } => {
                Code::Unavailable
            }
            Self::FlowControl { .. } => Code::FlowControl,
            Self::StreamClosed { .. } => Code::ClientState,
        }
    }
}

/// A server-streaming response: a stream of partial responses terminated by
/// stream end or an in-band error.
pub type ResponseStream<T> = BoxStream<'static, Result<T, RpcError>>;

/// The transport contract.
///
/// All methods take the target endpoint explicitly; the transport owns the
/// connection pool keyed by endpoint. `timeout: None` applies
/// [`RpcConfig::default_rpc_timeout`].
#[async_trait]
pub trait RpcClient: std::fmt::Debug + Send + Sync {
    /// Unary route lookup against the cluster (or a fallback) endpoint.
    async fn route(
        &self,
        endpoint: &Endpoint,
        req: message::RouteRequest,
        ctx: &RpcContext,
        timeout: Option<Duration>,
    ) -> Result<message::RouteResponse, RpcError>;

    /// Unary write of a point batch.
    async fn write(
        &self,
        endpoint: &Endpoint,
        req: message::WriteRequest,
        ctx: &RpcContext,
        timeout: Option<Duration>,
    ) -> Result<message::WriteResponse, RpcError>;

    /// Unary SQL query.
    async fn sql_query(
        &self,
        endpoint: &Endpoint,
        req: message::SqlQueryRequest,
        ctx: &RpcContext,
        timeout: Option<Duration>,
    ) -> Result<message::SqlQueryResponse, RpcError>;

    /// Server-streaming SQL query; partial responses arrive on the returned
    /// stream.
    async fn sql_query_stream(
        &self,
        endpoint: &Endpoint,
        req: message::SqlQueryRequest,
        ctx: &RpcContext,
    ) -> Result<ResponseStream<message::SqlQueryResponse>, RpcError>;

    /// Open a client-streaming write session.
    async fn write_stream(
        &self,
        endpoint: &Endpoint,
        ctx: &RpcContext,
    ) -> Result<WriteStream, RpcError>;

    /// Whether a connection to `endpoint` is established. With
    /// `create_if_absent` the transport attempts to connect first.
    async fn check_connection(&self, endpoint: &Endpoint, create_if_absent: bool) -> bool;
}

/// A client-streaming write session handle.
///
/// Requests flow through a bounded channel whose capacity is the
/// transport's configured limit; a full channel is the backpressure
/// signal. Dropping the sender half-closes the stream and the transport
/// responds with the final aggregated [`message::WriteResponse`].
#[derive(Debug)]
pub struct WriteStream {
    endpoint: Endpoint,
    tx: mpsc::Sender<message::WriteRequest>,
    done: oneshot::Receiver<Result<message::WriteResponse, RpcError>>,
}

impl WriteStream {
    /// Assemble a session from its transport-owned parts.
    pub fn new(
        endpoint: Endpoint,
        tx: mpsc::Sender<message::WriteRequest>,
        done: oneshot::Receiver<Result<message::WriteResponse, RpcError>>,
    ) -> Self {
        Self { endpoint, tx, done }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether the session can accept a request without waiting.
    pub fn is_ready(&self) -> bool {
        self.tx.capacity() > 0
    }

    /// Push a request, waiting for capacity if the session is backed up.
    pub async fn send(&self, req: message::WriteRequest) -> Result<(), RpcError> {
        self.tx.send(req).await.map_err(|_| RpcError::StreamClosed {
            endpoint: self.endpoint.clone(),
        })
    }

    /// Push a request, failing fast with a flow-control error when the
    /// session is backed up.
    pub fn try_send(&self, req: message::WriteRequest) -> Result<(), RpcError> {
        use mpsc::error::TrySendError;
        self.tx.try_send(req).map_err(|e| match e {
            TrySendError::Full(_) => RpcError::FlowControl {
                endpoint: self.endpoint.clone(),
            },
            TrySendError::Closed(_) => RpcError::StreamClosed {
                endpoint: self.endpoint.clone(),
            },
        })
    }

    /// Half-close the session and wait for the server's final response.
    pub async fn finish(self) -> Result<message::WriteResponse, RpcError> {
        let Self { endpoint, tx, done } = self;
        drop(tx);
        done.await
            .map_err(|_| RpcError::StreamClosed { endpoint })?
    }
}
