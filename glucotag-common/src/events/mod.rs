//! Event types for the GlucoTag event system
//!
//! Provides the shared `ScanEvent` enum and the `EventBus` that replaces
//! process-wide notifications between the acquisition pipeline, the scan log
//! and calibration reviewers.

mod scan_types;

pub use scan_types::{ScanTrigger, VerificationOutcome};

use crate::reading::Trend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// GlucoTag event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScanEvent {
    /// A scan task was started
    ScanStarted {
        trigger: ScanTrigger,
        timestamp: DateTime<Utc>,
    },

    /// Verification finished and the reading was published
    ///
    /// Triggers:
    /// - SSE: Update the reading banner
    /// - Calibration reviewers: refresh candidate points
    ScanCompleted {
        outcome: VerificationOutcome,
        /// Verified glucose; always `None` unless `outcome` is `Succeeded`
        glucose: Option<f64>,
        trend: Trend,
        attempts: u32,
        /// Banner text shown to the user
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Scan aborted before verification could produce a reading
    ScanFailed {
        /// Error category (e.g. "HardwareUnavailable")
        kind: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A scan log entry was written
    ScanLogAppended {
        entry_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Calibration was recomputed or reset
    CalibrationUpdated {
        slope: f64,
        intercept: f64,
        is_calibrated: bool,
        timestamp: DateTime<Utc>,
    },

    /// Auto-scan on proximity was toggled
    AutoScanChanged {
        enabled: bool,
        timestamp: DateTime<Utc>,
    },

    /// A transient error message expired
    ErrorCleared {
        timestamp: DateTime<Utc>,
    },
}

impl ScanEvent {
    /// Event name used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            ScanEvent::ScanStarted { .. } => "ScanStarted",
            ScanEvent::ScanCompleted { .. } => "ScanCompleted",
            ScanEvent::ScanFailed { .. } => "ScanFailed",
            ScanEvent::ScanLogAppended { .. } => "ScanLogAppended",
            ScanEvent::CalibrationUpdated { .. } => "CalibrationUpdated",
            ScanEvent::AutoScanChanged { .. } => "AutoScanChanged",
            ScanEvent::ErrorCleared { .. } => "ErrorCleared",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Pub/sub channel between the scan pipeline and its observers
///
/// Publishing never waits on a subscriber. A subscriber that falls more
/// than `capacity` events behind sees `RecvError::Lagged` and resumes with
/// the newest events.
///
/// # Examples
///
/// ```
/// use glucotag_common::events::{EventBus, ScanEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(ScanEvent::AutoScanChanged {
///     enabled: true,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScanEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }

    /// Publish to every current subscriber; `Err` when nobody listens
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: ScanEvent) -> Result<usize, broadcast::error::SendError<ScanEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ScanEvent) {
        let _ = self.tx.send(event);
    }

    /// Live receivers, SSE clients included
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
