//! Session lifecycle: begin, detect, connect, verify family, close

use super::{DetectedTag, PollingMode, TagFamily, TagHardware, TagSession};
use crate::error::{Error, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shown while the session waits for a tag
pub const SCAN_PROMPT: &str = "Hold the top of the device near the sensor";
/// Shown when verification reached quorum
pub const COMPLETE_ALERT: &str = "Sensor read complete";
/// Shown when verification failed
pub const INCONSISTENT_ALERT: &str = "Reading not consistent. Try again.";

/// An open session plus its connected ISO 15693 tag
///
/// Must be closed with `finish` or `abort`; both invalidate the session.
pub struct ConnectedTag<S: TagSession> {
    pub session: S,
    pub tag: S::Tag,
    pub detected: DetectedTag,
}

impl<S: TagSession> ConnectedTag<S> {
    /// Set the completion text and invalidate normally
    pub fn finish(mut self, succeeded: bool) {
        let alert = if succeeded { COMPLETE_ALERT } else { INCONSISTENT_ALERT };
        self.session.set_alert(alert);
        self.session.invalidate(None);
        debug!("Session closed: {}", alert);
    }

    /// Invalidate with an error message
    pub fn abort(mut self, message: &str) {
        self.session.invalidate(Some(message));
        debug!("Session aborted: {}", message);
    }
}

/// Open a session and connect to the first detected sensor tag
///
/// Every failure after `begin` invalidates the session with a readable
/// message before the error is returned.
pub async fn open_connected<H: TagHardware>(
    hardware: &H,
    detect_timeout: Duration,
) -> Result<ConnectedTag<H::Session>> {
    if !hardware.is_available() {
        return Err(Error::HardwareUnavailable(
            "tag reading is not supported on this device".to_string(),
        ));
    }

    debug!("Starting scan session (ISO 15693)");
    let mut session = hardware
        .begin(PollingMode::Iso15693, SCAN_PROMPT)
        .await
        .map_err(|e| match e {
            Error::HardwareUnavailable(_) => e,
            other => Error::HardwareUnavailable(other.to_string()),
        })?;

    let detected = match tokio::time::timeout(detect_timeout, session.next_tag()).await {
        Ok(Ok(detected)) => detected,
        Ok(Err(e)) => {
            warn!("Tag detection failed: {}", e);
            session.invalidate(Some(&e.user_message()));
            return Err(e);
        }
        Err(_) => {
            let message = format!("No tag detected within {:.1}s", detect_timeout.as_secs_f64());
            warn!("{}", message);
            session.invalidate(Some(&message));
            return Err(Error::HardwareUnavailable(message));
        }
    };
    debug!(
        "Detected {} tag uid={}; connecting",
        detected.family,
        hex::encode_upper(&detected.uid)
    );

    let tag = match session.connect(&detected).await {
        Ok(tag) => tag,
        Err(e) => {
            let reason = match e {
                Error::ConnectionFailed(reason) => reason,
                other => other.to_string(),
            };
            warn!("Connect error: {}", reason);
            session.invalidate(Some(&reason));
            return Err(Error::ConnectionFailed(reason));
        }
    };

    if detected.family != TagFamily::Iso15693 {
        warn!("Unsupported tag type detected: {}", detected.family);
        session.invalidate(Some("Unsupported tag type"));
        return Err(Error::UnsupportedTagType(detected.family.to_string()));
    }

    info!("Connected to tag {}", hex::encode_upper(&detected.uid));
    Ok(ConnectedTag {
        session,
        tag,
        detected,
    })
}
