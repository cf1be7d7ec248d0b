//! # webflo-messaging
//!
//! Request/response message passing between logical peers.
//!
//! - [`transport`]: the [`MessageTransport`] seam and its in-process
//!   implementations (event bus, two-ended pipe)
//! - [`channels`]: named broadcast channels, scoped per tenant or process-wide
//! - [`port`]: [`MessagePort`], correlation-ID request/response over one
//!   transport with optional handshake and auto-close
//! - [`star`]: [`StarPort`], a hub fanning out over many ports
//! - [`registry`]: [`PortRegistry`], port creation, lookup and idle eviction
//! - [`tenancy`]: [`Tenant`] and [`TenantRegistry`]
//!
//! Every component spawns tokio tasks and must be created inside a runtime.

#![deny(unsafe_code)]

pub mod channels;
pub mod envelope;
pub mod errors;
pub mod event;
pub mod port;
pub mod registry;
pub mod star;
pub mod tenancy;
pub mod transport;

pub use channels::{BroadcastChannel, BroadcastEndpoint, ChannelFactory, ChannelRegistry, ChannelScope};
pub use envelope::{Envelope, EnvelopeKind};
pub use errors::{MessagingError, Result};
pub use event::{Disposition, DispatchOutcome, ListenerId, MessageEvent, ReplyPort};
pub use port::{MessagePort, PortOptions, PortStatus};
pub use registry::PortRegistry;
pub use star::StarPort;
pub use tenancy::{TenancyConfig, Tenant, TenantRegistry};
pub use transport::{EventBus, EventBusEndpoint, MessagePipe, MessageTransport, PipeEnd};
