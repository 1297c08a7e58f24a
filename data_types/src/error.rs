use crate::{Endpoint, Point, WriteOk};
use thiserror::Error;

/// A boxed opaque error source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error taxonomy shared by write, query and routing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    /// The server reports the client's cached route is stale.
    InvalidRoute,
    /// Local or remote concurrency-limiter rejection.
    FlowControl,
    /// The server asked for a retry without further classification.
    ShouldRetry,
    /// Transport-level failure to reach the endpoint.
    Unavailable,
    /// Server-side failure; surfaced, never retried.
    Internal,
    /// The request was malformed.
    BadRequest,
    /// A streaming request exceeded the server's size bound.
    StreamTooLarge,
    /// Client misuse: request after shutdown, reused stream session.
    ClientState,
    /// The resolver could not produce any route.
    RouteTable,
    /// Pre-flight query violation, e.g. tables spanning endpoints.
    Query,
    /// A server code this client does not know.
    Unknown,
}

impl Code {
    /// Whether a failure with this code may be retried automatically.
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::InvalidRoute | Self::FlowControl | Self::ShouldRetry)
    }
}

/// A failed write.
///
/// Carries the failed point subset and the accounting for sub-batches that
/// did succeed in earlier attempts, so callers never lose track of
/// partially-applied batches.
#[derive(Debug, Error)]
#[error("write failed with {code:?} ({} points) to {}: {message}", .failed.len(), display_endpoint(.endpoint))]
pub struct WriteError {
    pub code: Code,
    pub message: String,
    /// The endpoint the failing sub-batch was sent to, when one was reached.
    pub endpoint: Option<Endpoint>,
    /// Points that never received a successful response.
    pub failed: Vec<Point>,
    /// Successful sub-batch accounting accumulated before the failure.
    pub ok: WriteOk,
    #[source]
    pub source: Option<BoxError>,
}

impl WriteError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            endpoint: None,
            failed: vec![],
            ok: WriteOk::empty(),
            source: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_failed(mut self, failed: Vec<Point>) -> Self {
        self.failed = failed;
        self
    }

    pub fn with_ok(mut self, ok: WriteOk) -> Self {
        self.ok = ok;
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A failed SQL query.
#[derive(Debug, Error)]
#[error("query failed with {code:?} to {}: {message}", display_endpoint(.endpoint))]
pub struct QueryError {
    pub code: Code,
    pub message: String,
    pub endpoint: Option<Endpoint>,
    #[source]
    pub source: Option<BoxError>,
}

impl QueryError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            endpoint: None,
            source: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// The resolver could not produce any route.
#[derive(Debug, Error)]
#[error("route table error: {message}")]
pub struct RouteError {
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl RouteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

fn display_endpoint(endpoint: &Option<Endpoint>) -> String {
    match endpoint {
        Some(e) => e.to_string(),
        None => "<unrouted>".to_string(),
    }
}
