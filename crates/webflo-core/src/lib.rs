//! # webflo-core
//!
//! Foundation types shared by every Webflo crate:
//!
//! - **Branded IDs**: `PortId`, `TenantId`, `CorrelationId` as newtypes
//! - **Errors**: `CoreError` and `StoreError` via `thiserror`
//! - **Platform capabilities**: `IdGenerator` and the async `KvStore`
//!   collaborator, with in-process implementations
//! - **Logging**: `tracing` subscriber setup and in-memory log capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod platform;

pub use errors::{CoreError, StoreError};
pub use ids::{CorrelationId, PortId, TenantId};
pub use platform::{IdGenerator, KvStore, MemoryStore, SequentialIds, UuidGenerator};
