//! In-process tag hardware
//!
//! Serves a memory image over the `TagHardware` traits. Used by the binary
//! when no radio is attached and by the test suites. Supports scripted
//! per-pass images (to model a tag whose reads disagree), deterministic and
//! random read faults, per-block latency and external session invalidation.

use super::{DetectedTag, PollingMode, TagFamily, TagHandle, TagHardware, TagSession};
use crate::decoder::{RawBlockSet, BLOCK_SIZE, MIN_BLOCKS, TREND_BUFFER_SLOTS, TREND_BUFFER_START};
use crate::error::{Error, Result};
use crate::scan_log::ScanLogRecord;
use rand::Rng;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// A complete tag memory dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryImage {
    blocks: RawBlockSet,
}

impl MemoryImage {
    pub fn new(blocks: RawBlockSet) -> Self {
        Self { blocks }
    }

    /// 43-block image holding one trend sample
    ///
    /// The age counter is written little-endian at bytes 2..4 of block 0 and
    /// the sensor state byte is `0x03`.
    pub fn synthetic(raw16: u16, arrow: u8, slot: u8, age_minutes: u16) -> Self {
        let mut blocks = vec![vec![0u8; BLOCK_SIZE]; MIN_BLOCKS];
        let [age_lo, age_hi] = age_minutes.to_le_bytes();
        blocks[0] = vec![0x00, 0x00, age_lo, age_hi, 0x03, 0x00, 0x00, 0x00];
        blocks[3][3] = slot;
        let index = TREND_BUFFER_START + (slot as usize % TREND_BUFFER_SLOTS);
        let [lo, hi] = raw16.to_le_bytes();
        blocks[index] = vec![lo, hi, 0x00, arrow, 0x00, 0x00, 0x00, 0x00];
        Self::new(RawBlockSet::from(blocks))
    }

    /// One block per line; blank lines and `#` comments are skipped
    pub fn from_hex_dump(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect();
        let blocks = RawBlockSet::from_hex(&lines)
            .map_err(|e| Error::InvalidInput(format!("bad hex dump: {}", e)))?;
        Ok(Self::new(blocks))
    }

    /// Blocks from a scan log entry
    pub fn from_scan_log_json(text: &str) -> Result<Self> {
        let record: ScanLogRecord = serde_json::from_str(text)?;
        let blocks = record
            .raw_blocks()
            .map_err(|e| Error::InvalidInput(format!("bad block hex in scan log: {}", e)))?;
        Ok(Self::new(blocks))
    }

    /// Load a `.json` scan log entry or a plain hex dump
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let image = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_scan_log_json(&text)?
        } else {
            Self::from_hex_dump(&text)?
        };
        info!(
            "Loaded memory image {} ({} blocks)",
            path.display(),
            image.blocks.len()
        );
        Ok(image)
    }

    pub fn blocks(&self) -> &RawBlockSet {
        &self.blocks
    }
}

/// Observable session activity, for tests and the debug log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRecord {
    Began(String),
    Alert(String),
    Invalidated(Option<String>),
    ExternallyInvalidated(String),
}

/// Invalidation state of one session, `Some(reason)` once closed
type SessionFlag = Arc<Mutex<Option<String>>>;

struct Shared {
    available: AtomicBool,
    family: TagFamily,
    uid: Vec<u8>,
    detects_tag: bool,
    connect_error: Option<String>,
    base: MemoryImage,
    script: Vec<MemoryImage>,
    failure_rate: f64,
    failing_reads: Vec<(usize, u8)>,
    read_delay: Duration,
    passes: AtomicUsize,
    log: Mutex<Vec<SessionRecord>>,
    active: Mutex<Option<SessionFlag>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn record(&self, entry: SessionRecord) {
        lock(&self.log).push(entry);
    }

    fn image_for_pass(&self, pass: usize) -> &MemoryImage {
        self.script.get(pass).unwrap_or(&self.base)
    }
}

/// Builder for `SimulatedHardware`
pub struct SimulatedHardwareBuilder {
    shared: Shared,
}

impl SimulatedHardwareBuilder {
    /// Report the radio as missing
    pub fn unavailable(mut self) -> Self {
        self.shared.available = AtomicBool::new(false);
        self
    }

    pub fn tag_family(mut self, family: TagFamily) -> Self {
        self.shared.family = family;
        self
    }

    pub fn uid(mut self, uid: Vec<u8>) -> Self {
        self.shared.uid = uid;
        self
    }

    /// Never detect a tag
    pub fn no_tag(mut self) -> Self {
        self.shared.detects_tag = false;
        self
    }

    pub fn fail_connect(mut self, reason: &str) -> Self {
        self.shared.connect_error = Some(reason.to_string());
        self
    }

    /// Serve these images on passes 0, 1, 2, ... then fall back to the base image
    pub fn script(mut self, passes: Vec<MemoryImage>) -> Self {
        self.shared.script = passes;
        self
    }

    /// Fail each block read with this probability
    pub fn read_failure_rate(mut self, rate: f64) -> Self {
        self.shared.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Fail reading `block` during pass `pass` (zero-based)
    pub fn fail_read(mut self, pass: usize, block: u8) -> Self {
        self.shared.failing_reads.push((pass, block));
        self
    }

    /// Latency added to every block read
    pub fn read_delay(mut self, delay: Duration) -> Self {
        self.shared.read_delay = delay;
        self
    }

    pub fn build(self) -> SimulatedHardware {
        SimulatedHardware {
            shared: Arc::new(self.shared),
        }
    }
}

/// Simulated radio with one tag permanently in range
#[derive(Clone)]
pub struct SimulatedHardware {
    shared: Arc<Shared>,
}

impl SimulatedHardware {
    pub fn builder(base: MemoryImage) -> SimulatedHardwareBuilder {
        SimulatedHardwareBuilder {
            shared: Shared {
                available: AtomicBool::new(true),
                family: TagFamily::Iso15693,
                uid: vec![0xE0, 0x07, 0xA0, 0x00, 0x12, 0x34, 0x56, 0x78],
                detects_tag: true,
                connect_error: None,
                base,
                script: Vec::new(),
                failure_rate: 0.0,
                failing_reads: Vec::new(),
                read_delay: Duration::ZERO,
                passes: AtomicUsize::new(0),
                log: Mutex::new(Vec::new()),
                active: Mutex::new(None),
            },
        }
    }

    /// Simulate the user or platform closing the open session
    ///
    /// Returns `false` when no session is open.
    pub fn invalidate_active(&self, reason: &str) -> bool {
        let active = lock(&self.shared.active).take();
        match active {
            Some(flag) => {
                *lock(&flag) = Some(reason.to_string());
                self.shared
                    .record(SessionRecord::ExternallyInvalidated(reason.to_string()));
                debug!("Simulated session invalidated externally: {}", reason);
                true
            }
            None => false,
        }
    }

    /// Switch the radio off or back on between scans
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Number of read passes started so far (reads of block 0)
    pub fn passes_started(&self) -> usize {
        self.shared.passes.load(Ordering::SeqCst)
    }

    pub fn session_log(&self) -> Vec<SessionRecord> {
        lock(&self.shared.log).clone()
    }
}

impl TagHardware for SimulatedHardware {
    type Session = SimulatedSession;

    fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::SeqCst)
    }

    fn begin(
        &self,
        _polling: PollingMode,
        prompt: &str,
    ) -> impl Future<Output = Result<Self::Session>> + Send {
        let result = if self.is_available() {
            let flag: SessionFlag = Arc::new(Mutex::new(None));
            *lock(&self.shared.active) = Some(Arc::clone(&flag));
            self.shared.record(SessionRecord::Began(prompt.to_string()));
            Ok(SimulatedSession {
                shared: Arc::clone(&self.shared),
                flag,
            })
        } else {
            Err(Error::HardwareUnavailable("simulated radio disabled".to_string()))
        };
        async move { result }
    }
}

pub struct SimulatedSession {
    shared: Arc<Shared>,
    flag: SessionFlag,
}

impl SimulatedSession {
    fn closed_reason(&self) -> Option<String> {
        lock(&self.flag).clone()
    }
}

impl TagSession for SimulatedSession {
    type Tag = SimulatedTag;

    fn next_tag(&mut self) -> impl Future<Output = Result<DetectedTag>> + Send {
        let detects = self.shared.detects_tag;
        let detected = DetectedTag {
            family: self.shared.family,
            uid: self.shared.uid.clone(),
        };
        async move {
            if !detects {
                std::future::pending::<()>().await;
            }
            Ok(detected)
        }
    }

    fn connect(&mut self, _tag: &DetectedTag) -> impl Future<Output = Result<Self::Tag>> + Send {
        let result = match (self.closed_reason(), &self.shared.connect_error) {
            (Some(reason), _) => Err(Error::SessionInvalidated(reason)),
            (None, Some(reason)) => Err(Error::ConnectionFailed(reason.clone())),
            (None, None) => Ok(SimulatedTag {
                shared: Arc::clone(&self.shared),
                flag: Arc::clone(&self.flag),
                pass: 0,
            }),
        };
        async move { result }
    }

    fn set_alert(&mut self, message: &str) {
        self.shared.record(SessionRecord::Alert(message.to_string()));
    }

    fn invalidate(&mut self, error_message: Option<&str>) {
        let mut flag = lock(&self.flag);
        if flag.is_none() {
            *flag = Some(error_message.unwrap_or("Session closed").to_string());
        }
        drop(flag);

        let mut active = lock(&self.shared.active);
        if active.as_ref().is_some_and(|f| Arc::ptr_eq(f, &self.flag)) {
            *active = None;
        }
        drop(active);

        self.shared
            .record(SessionRecord::Invalidated(error_message.map(str::to_string)));
    }
}

pub struct SimulatedTag {
    shared: Arc<Shared>,
    flag: SessionFlag,
    pass: usize,
}

impl SimulatedTag {
    fn read_now(&mut self, index: u8) -> Result<Vec<u8>> {
        if let Some(reason) = lock(&self.flag).clone() {
            return Err(Error::SessionInvalidated(reason));
        }

        if index == 0 {
            self.pass = self.shared.passes.fetch_add(1, Ordering::SeqCst);
        }

        if self.shared.failing_reads.contains(&(self.pass, index)) {
            return Err(Error::BlockReadFailure {
                index,
                reason: "injected read fault".to_string(),
            });
        }
        if self.shared.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.shared.failure_rate) {
            return Err(Error::BlockReadFailure {
                index,
                reason: "random read fault".to_string(),
            });
        }

        self.shared
            .image_for_pass(self.pass)
            .blocks()
            .get(index as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::BlockReadFailure {
                index,
                reason: "block out of range".to_string(),
            })
    }
}

impl TagHandle for SimulatedTag {
    fn read_block(&mut self, index: u8) -> impl Future<Output = Result<Vec<u8>>> + Send {
        let delay = self.shared.read_delay;
        let result = self.read_now(index);
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }
    }
}
