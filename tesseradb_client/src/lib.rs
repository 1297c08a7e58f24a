//! A TesseraDB API client.
//!
//! Points are written with [`Client::write`] or streamed through
//! [`Client::stream_write`]; SQL runs through [`Client::sql_query`] and
//! [`Client::sql_query_stream`]. Table→server routing, stale-route retry
//! and partial-failure accounting happen inside the client; the RPC
//! transport is injected through [`ClientBuilder::rpc_client`].

#![deny(rust_2018_idioms, missing_debug_implementations, unreachable_pub)]
#![warn(missing_docs, clippy::todo, clippy::dbg_macro)]
#![allow(clippy::missing_docs_in_private_items)]

mod builder;
pub use builder::*;

mod client;
pub use client::*;

mod registry;
pub use registry::InstanceInfo;

mod stream_write;
pub use stream_write::*;

mod query;
pub use query::RowStream;

mod decode;
mod sql;
mod write;

// Vocabulary and collaborator crates, re-exported so callers need no direct
// dependency on them.
pub use backoff::BackoffConfig;
pub use data_types;
pub use metric;
pub use router::RouteMode;
pub use rpc;
pub use tessera_time;
