//! # fabric-gateway
//!
//! The front controller and transport fronts of the Fabric agent gateway:
//!
//! - [`pipeline`] — parse → authenticate → trace → route → execute → shape
//! - [`http`] — axum front: `POST /mcp/call`, `GET /health`, REST
//!   conveniences, SSE streaming
//! - [`stdio`] — line-delimited JSON front for local callers
//! - [`middleware`] — per-client rate limiting
//! - [`metrics`] — process-local counters for `/mcp/metrics`
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fabric_gateway::pipeline::{FabricPipeline, PipelineConfig};
//! use fabric_gateway::http::{serve, HttpFrontConfig};
//! use fabric_kernel::auth::AuthVerifier;
//! use fabric_kernel::bus::FabricMessageBus;
//! use fabric_plugins::{builtin_tool_host, BuiltinToolsConfig};
//! use fabric_runtime::adapter::HttpAdapterProvider;
//! use fabric_runtime::registry::MemoryRegistry;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pipeline = Arc::new(FabricPipeline::new(
//!         Arc::new(MemoryRegistry::new()),
//!         Arc::new(HttpAdapterProvider::new()),
//!         Arc::new(builtin_tool_host(BuiltinToolsConfig::default())),
//!         FabricMessageBus::in_memory(),
//!         AuthVerifier::new("change-me"),
//!         PipelineConfig::default(),
//!     ));
//!     serve(pipeline, HttpFrontConfig::default()).await.unwrap();
//! }
//! ```

pub mod http;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod stdio;

pub use http::{build_router, serve, AppState, HttpFrontConfig};
pub use metrics::GatewayMetrics;
pub use middleware::RateLimiter;
pub use pipeline::{Credential, FabricPipeline, PipelineConfig};
