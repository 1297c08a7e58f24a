//! Table→endpoint routing for the TesseraDB client.
//!
//! Routing table information is cached locally and refreshed from the
//! cluster address on miss; the cache is invalidated when a server reports
//! `INVALID_ROUTE` and bounded in size by a periodic least-recently-hit
//! eviction pass.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod cache;
mod metrics;
mod route;
#[allow(clippy::module_inception)]
mod router;

pub use cache::*;
pub use route::*;
pub use router::*;
