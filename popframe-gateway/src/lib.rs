//! PopFrame Gateway - Upstream Data Access
//!
//! Two layers:
//! - [`ApiHandler`]: per-service HTTP client that parses JSON responses,
//!   transparently retries the upstream's transient connection resets and
//!   turns every other failure into a diagnostic [`popframe_core::GatewayError`].
//! - [`RemoteDataGateway`]: fetches the region catalog, boundaries,
//!   settlements, batched population and accessibility matrices, and
//!   normalizes them into core types.

pub mod client;
pub mod gateway;
pub mod source;
pub mod wire;

pub use client::{ApiHandler, RequestOptions, FAILURE_MESSAGE, TRANSIENT_MARKER};
pub use gateway::RemoteDataGateway;
pub use source::RegionDataSource;
pub use wire::IndicatorValue;
