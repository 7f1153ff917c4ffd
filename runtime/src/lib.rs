//! sisu-runtime - fault-tolerance machinery for outbound calls and
//! message processing
//!
//! Two coordinated facilities:
//!
//! - [`ResilientClient`] wraps outbound HTTP with per-attempt timeouts,
//!   classified retry with exponential backoff, a per-target circuit
//!   breaker, and a per-target bulkhead.
//! - [`DlqManager`] drives message handlers through a retry state machine
//!   and persists exhausted messages into a durable dead-letter stream for
//!   operator inspection and reprocessing.
//!
//! Both share the same error taxonomy ([`FaultError`]) and classifier
//! ([`ErrorClass`]), so a timeout means the same thing whether it came
//! from an HTTP call or a message handler.
//!
//! # Quick start
//!
//! ```no_run
//! use sisu_runtime::{ClientConfig, RequestOptions, ResilientClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sisu_runtime::FaultError> {
//!     let client = ResilientClient::with_reqwest(ClientConfig::default())?;
//!     let response = client
//!         .get("https://api.example.com/health", RequestOptions::default())
//!         .await?;
//!     println!("status {}", response.status);
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod backoff;
pub mod broker;
pub mod bulkhead;
pub mod circuit;
pub mod classify;
pub mod client;
pub mod config;
pub mod dlq;
pub mod transport;

pub use backoff::RetryPolicy;
pub use broker::MemoryBroker;
pub use bulkhead::{Bulkhead, BulkheadPermit, BulkheadStats};
pub use circuit::{CircuitBreaker, CircuitConfig, CircuitPermit, CircuitState, CircuitStats};
pub use classify::ErrorClass;
pub use client::{RequestOptions, ResilientClient};
pub use config::{ClientConfig, DlqConfig};
pub use dlq::{DlqManager, DlqStats};
pub use transport::ReqwestTransport;

pub use sisu_core::{
    AlertHook, DlqMessage, FaultError, HttpTransport, Method, MessageHandler, PulledMessage,
    StreamBroker, StreamInfo, TransportRequest, TransportResponse,
};
