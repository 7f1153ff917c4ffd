//! sisu-core - Core seam types for the SISU fault-tolerance runtime
//!
//! This crate provides the types shared between the SISU runtime and
//! external adapters (brokers, transports, handlers):
//!
//! - [`FaultError`] - the failure taxonomy driving retry and circuit decisions
//! - [`StreamBroker`] trait - durable log-based broker contract
//! - [`HttpTransport`] trait - generic HTTP transport contract
//! - [`MessageHandler`] trait - async message processing callback
//! - [`AlertHook`] trait - dead-letter monitoring hook
//! - [`DlqMessage`] - the persisted dead-letter envelope
//!
//! # Why this crate exists
//!
//! Broker and transport adapters (a JetStream adapter, a service-mesh
//! transport) need to implement these traits without pulling in the whole
//! runtime. Without `sisu-core` they would depend on `sisu-runtime`, and
//! the runtime might optionally depend on an adapter, creating a cycle.
//! Extracting the seam types breaks it:
//!
//! ```text
//! sisu-core ◄── sisu-runtime
//!     ▲
//!     └───────── adapters (broker/transport impls)
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod error;
mod handler;
/// Durable stream broker contract
pub mod broker;
/// The persisted dead-letter envelope
pub mod message;
/// Generic HTTP transport contract
pub mod transport;

pub use broker::{PulledMessage, StreamBroker, StreamInfo};
pub use error::FaultError;
pub use handler::{AlertHook, MessageHandler};
pub use message::DlqMessage;
pub use transport::{HttpTransport, Method, TransportRequest, TransportResponse};
