//! # fabric-kernel
//!
//! Protocol-level building blocks for the Fabric agent gateway:
//!
//! - [`trace`] — distributed trace context stamped on every call
//! - [`auth`] — caller authentication (PSK today, passport/mTLS reserved)
//! - [`error`] — canonical error codes and the [`FabricError`] type
//! - [`manifest`] — agent manifests and capability descriptors
//! - [`envelope`] — the canonical in-process call envelope and streamed events
//! - [`wire`] — the JSON envelopes that cross the transport boundary
//! - [`message`] — agent-to-agent messages
//! - [`bus`] — the async message bus on top of an ordered-stream store
//! - [`config`] — declarative manifest-document loading
//!
//! This crate carries no HTTP or storage dependencies; runtime concerns
//! (registries, adapters, transports) live in the crates layered on top.

pub mod auth;
pub mod bus;
pub mod config;
pub mod envelope;
pub mod error;
pub mod manifest;
pub mod message;
pub mod trace;
pub mod wire;

pub use auth::{AuthContext, AuthMode, AuthVerifier};
pub use envelope::{
    BoxEventStream, CallInput, CallTarget, CanonicalEnvelope, ResponseFormat, ResponseSpec,
    StreamEvent, StreamEventKind, TargetKind,
};
pub use error::{ErrorCode, FabricError, FabricResult};
pub use manifest::{
    AgentEndpoint, AgentManifest, AgentStatus, CapabilityDescriptor, RuntimeKind, TransportKind,
    TrustTier,
};
pub use message::{BusMessage, MessagePriority};
pub use trace::TraceContext;
pub use wire::{WireError, WireResponse};
