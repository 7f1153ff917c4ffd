//! Handler and alerting seams for async message processing

use crate::error::FaultError;
use crate::message::DlqMessage;
use async_trait::async_trait;
use bytes::Bytes;

/// Async message handler invoked by the dead letter manager
///
/// Handlers report failure through `Err`; the manager classifies the error
/// and decides whether to schedule a retry or dead-letter the message.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use bytes::Bytes;
/// use sisu_core::{FaultError, MessageHandler};
///
/// struct OrderHandler;
///
/// #[async_trait]
/// impl MessageHandler for OrderHandler {
///     async fn handle(&self, subject: &str, payload: &Bytes) -> Result<(), FaultError> {
///         if payload.is_empty() {
///             return Err(FaultError::Handler(format!("empty payload on {subject}")));
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message
    async fn handle(&self, subject: &str, payload: &Bytes) -> Result<(), FaultError>;
}

/// Hook fired on every dead-letter write
///
/// SISU ships no alert transport; wire this to whatever monitoring the
/// deployment uses. The hook runs inline on the processing path, so
/// implementations should hand off heavy work rather than block.
pub trait AlertHook: Send + Sync {
    /// Called after a message is durably written to the dead-letter stream
    fn on_dead_letter(&self, message: &DlqMessage);
}
