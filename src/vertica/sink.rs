//! Diagnostic hooks for protocol traffic.

use super::protocol::{BackendMessage, FrontendMessage};

/// Receives every message a connection sends or receives.
///
/// Called after a message was encoded and written, or read and decoded.
/// Implementations cannot fail and must not block for long: they run inside
/// the connection's critical section.
pub trait MessageSink: Send + Sync {
    fn outgoing(&self, msg: &FrontendMessage);

    fn incoming(&self, msg: &BackendMessage);
}

/// Forwards traffic to `tracing` at TRACE level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn outgoing(&self, msg: &FrontendMessage) {
        tracing::trace!(message = ?msg, "=>");
    }

    fn incoming(&self, msg: &BackendMessage) {
        tracing::trace!(message = ?msg, "<=");
    }
}
