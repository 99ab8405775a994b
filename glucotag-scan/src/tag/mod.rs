//! Tag hardware abstraction
//!
//! The radio is an external collaborator. These traits let the acquisition
//! pipeline run against real hardware, the in-process simulator, or a test
//! double without knowing which one it has.
//!
//! Lifecycle: `TagHardware::begin` opens a session, `TagSession::next_tag`
//! waits for a detection, `TagSession::connect` yields a `TagHandle` that
//! reads single blocks. Invalidating the session (by us, the user or the
//! platform) makes every later block read fail.

pub mod block_reader;
pub mod session;
pub mod simulated;

pub use block_reader::{read_blocks, read_blocks_into, BlockReadPass};
pub use session::{open_connected, ConnectedTag, COMPLETE_ALERT, INCONSISTENT_ALERT, SCAN_PROMPT};
pub use simulated::{MemoryImage, SessionRecord, SimulatedHardware, SimulatedHardwareBuilder};

use crate::error::Result;
use std::future::Future;

/// Radio polling mode requested when a session begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingMode {
    Iso15693,
}

/// Family reported for a detected tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFamily {
    Iso15693,
    Iso14443,
    FeliCa,
}

impl std::fmt::Display for TagFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagFamily::Iso15693 => write!(f, "ISO 15693"),
            TagFamily::Iso14443 => write!(f, "ISO 14443"),
            TagFamily::FeliCa => write!(f, "FeliCa"),
        }
    }
}

/// A tag the radio has seen but not yet connected to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedTag {
    pub family: TagFamily,
    pub uid: Vec<u8>,
}

/// Port for the wireless reader radio
pub trait TagHardware: Send + Sync + 'static {
    type Session: TagSession;

    /// Whether this device can read tags at all
    fn is_available(&self) -> bool;

    /// Start a reading session, showing `prompt` while it is open
    fn begin(
        &self,
        polling: PollingMode,
        prompt: &str,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// An open reading session
pub trait TagSession: Send + 'static {
    type Tag: TagHandle;

    /// Wait for the next detected tag
    fn next_tag(&mut self) -> impl Future<Output = Result<DetectedTag>> + Send;

    /// Connect to a detected tag
    fn connect(&mut self, tag: &DetectedTag) -> impl Future<Output = Result<Self::Tag>> + Send;

    /// Replace the text shown while the session is open
    fn set_alert(&mut self, message: &str);

    /// Close the session; `error_message` is shown when present
    fn invalidate(&mut self, error_message: Option<&str>);
}

/// A connected tag
pub trait TagHandle: Send + 'static {
    /// Read one block by index
    fn read_block(&mut self, index: u8) -> impl Future<Output = Result<Vec<u8>>> + Send;
}
