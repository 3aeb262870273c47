//! # fabric-runtime
//!
//! Runtime services layered on the kernel contract:
//!
//! - [`registry`] — agent registration and discovery, in-memory and durable
//! - [`health`] — background health probing and status demotion
//! - [`adapter`] — protocol adapters translating the canonical envelope to
//!   each agent's native wire shape

pub mod adapter;
pub mod health;
pub mod registry;

pub use adapter::{AdapterProvider, HttpAdapterProvider, RuntimeAdapter};
pub use health::{HealthConfig, HealthMonitor};
pub use registry::{
    AgentFilter, CapabilityHit, DurableRegistry, MemoryRegistry, RegistryStore, StatusCounts,
};
