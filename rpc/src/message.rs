//! Wire message shapes.
//!
//! The IDL is owned by the server project; these are the semantic fields the
//! client depends on. The transport maps them onto its framed encoding.

use bytes::Bytes;
use data_types::{Code, Endpoint, Point, RequestContext};

/// Server status codes carried in [`ResponseHeader::code`].
pub mod code {
    pub const OK: u32 = 200;
    pub const INVALID_ROUTE: u32 = 302;
    pub const SHOULD_RETRY: u32 = 310;
    pub const BAD_REQUEST: u32 = 400;
    pub const STREAM_TOO_LARGE: u32 = 413;
    pub const INTERNAL: u32 = 500;
    pub const FLOW_CONTROL: u32 = 503;
}

/// The header every response carries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseHeader {
    pub code: u32,
    pub error: String,
}

impl ResponseHeader {
    pub fn ok() -> Self {
        Self {
            code: code::OK,
            error: String::new(),
        }
    }

    pub fn error(code: u32, error: impl Into<String>) -> Self {
        Self {
            code,
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == code::OK
    }

    /// Map the server code onto the shared taxonomy.
    pub fn status(&self) -> Code {
        match self.code {
            code::INVALID_ROUTE => Code::InvalidRoute,
            code::SHOULD_RETRY => Code::ShouldRetry,
            code::BAD_REQUEST => Code::BadRequest,
            code::STREAM_TOO_LARGE => Code::StreamTooLarge,
            code::INTERNAL => Code::Internal,
            code::FLOW_CONTROL => Code::FlowControl,
            _ => Code::Unknown,
        }
    }
}

/// One table→endpoint mapping in a [`RouteResponse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub table: String,
    pub endpoint: Endpoint,
}

/// Batched route lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteRequest {
    pub context: RequestContext,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteResponse {
    pub header: ResponseHeader,
    pub routes: Vec<Route>,
}

/// A point batch for one endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteRequest {
    pub context: RequestContext,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteResponse {
    pub header: ResponseHeader,
    pub success: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SqlQueryRequest {
    pub context: RequestContext,
    pub tables: Vec<String>,
    pub sql: String,
}

/// A SQL response, or one chunk of a server-streaming response.
///
/// `batches` holds Arrow IPC stream-encoded record batches; the client
/// decodes them into rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlQueryResponse {
    pub header: ResponseHeader,
    pub affected_rows: u32,
    pub batches: Vec<Bytes>,
}
