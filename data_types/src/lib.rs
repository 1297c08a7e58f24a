//! Shared data types used by the TesseraDB client crates.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod error;
mod point;
mod query;
mod row;
mod value;
mod write;

pub use error::*;
pub use point::*;
pub use query::*;
pub use row::*;
pub use value::*;
pub use write::*;

use std::fmt::Display;
use std::str::FromStr;

/// A `(host, port)` pair identifying a database server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The error returned when an endpoint string cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid endpoint \"{0}\", expected \"host:port\"")]
pub struct InvalidEndpoint(String);

impl FromStr for Endpoint {
    type Err = InvalidEndpoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| InvalidEndpoint(s.into()))?;
        if host.is_empty() {
            return Err(InvalidEndpoint(s.into()));
        }
        let port = port.parse().map_err(|_| InvalidEndpoint(s.into()))?;
        Ok(Self::new(host, port))
    }
}

/// The per-request context attached to every outgoing RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// The database requests operate on.
    pub database: String,
}

impl RequestContext {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
        }
    }
}

/// The tenant triple forwarded as RPC metadata.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Tenant {
    pub tenant: String,
    pub sub_tenant: String,
    pub token: String,
}

// Hand-written to keep the access token out of log output.
impl std::fmt::Debug for Tenant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tenant")
            .field("tenant", &self.tenant)
            .field("sub_tenant", &self.sub_tenant)
            .field("token", &"<redacted>")
            .finish()
    }
}
