//! Full-state snapshot publication.
//!
//! Every publish is a complete `{drivers, session}` serialization — no
//! delta encoding; downstream consumers rebuild their view wholesale. The
//! periodic snapshot and the immediate notable-event push share the same
//! payload shape; the event variant adds a tagged `{type, number?}`
//! descriptor.
//!
//! Delivery is best-effort and non-blocking: the publisher hands the
//! serialized payload to a [`SnapshotSink`] and never waits on transport.

use pitwall_telemetry_state::{DriverState, ReconcileContext, SessionState};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// Discrete occurrence pushed immediately instead of waiting for the next
/// periodic snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotableEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u8>,
}

impl NotableEvent {
    pub fn tagged(kind: &'static str) -> Self {
        Self { kind, number: None }
    }

    pub fn with_number(kind: &'static str, number: u8) -> Self {
        Self {
            kind,
            number: Some(number),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize snapshot payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Transport collaborator seam. Implementations must not block.
pub trait SnapshotSink: Send + Sync {
    fn deliver(&self, payload: String);
}

pub type SnapshotReceiver = mpsc::Receiver<String>;

/// Bounded-channel sink: the engine side of a fan-out transport.
///
/// A full channel drops the payload with a warning — a lagging transport
/// loses snapshots, it never delays packet ingestion.
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, SnapshotReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl SnapshotSink for ChannelSink {
    fn deliver(&self, payload: String) {
        match self.tx.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("snapshot sink full; dropping payload");
            }
            Err(TrySendError::Closed(_)) => {
                warn!("snapshot sink closed; dropping payload");
            }
        }
    }
}

#[derive(Serialize)]
struct SnapshotMessage<'a> {
    drivers: &'a [Option<DriverState>],
    session: &'a SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<&'a NotableEvent>,
}

/// Serializes the working set and hands it to the transport collaborator.
pub struct SnapshotPublisher {
    sink: Box<dyn SnapshotSink>,
}

impl SnapshotPublisher {
    pub fn new(sink: Box<dyn SnapshotSink>) -> Self {
        Self { sink }
    }

    /// Periodic full-state snapshot.
    ///
    /// # Errors
    /// Returns [`PublishError::Serialize`] when the working set cannot be
    /// serialized; delivery itself is fire-and-forget.
    pub fn publish_snapshot(&self, ctx: &ReconcileContext) -> Result<(), PublishError> {
        self.publish(ctx, None)
    }

    /// Immediate push of a notable event alongside the full state.
    ///
    /// # Errors
    /// Returns [`PublishError::Serialize`] when the working set cannot be
    /// serialized; delivery itself is fire-and-forget.
    pub fn publish_event(
        &self,
        ctx: &ReconcileContext,
        event: &NotableEvent,
    ) -> Result<(), PublishError> {
        self.publish(ctx, Some(event))
    }

    fn publish(
        &self,
        ctx: &ReconcileContext,
        event: Option<&NotableEvent>,
    ) -> Result<(), PublishError> {
        let message = SnapshotMessage {
            drivers: ctx.drivers(),
            session: ctx.session(),
            event,
        };
        let payload = serde_json::to_string(&message)?;
        self.sink.deliver(payload);
        Ok(())
    }
}
