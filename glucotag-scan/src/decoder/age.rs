//! Sensor age heuristic
//!
//! The minute counter's position and byte order in block 0 are not known.
//! Four interpretations are tried and the largest plausible one is kept,
//! assuming counters only ever increase.

/// Upper bound for a plausible age: 14 days in minutes
pub const MAX_SENSOR_AGE_MINUTES: u32 = 14 * 24 * 60;

/// Sensor is warming up below this age
pub const WARMUP_MINUTES: u32 = 60;

/// Derived sensor age
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorAge {
    pub minutes: Option<u32>,
    /// Which interpretation was chosen (`le01`, `be01`, `le23`, `be23`)
    pub source: Option<&'static str>,
    /// Why no age could be derived
    pub reason: Option<&'static str>,
}

impl SensorAge {
    pub fn is_warmup(&self) -> bool {
        self.minutes.is_some_and(|age| age < WARMUP_MINUTES)
    }

    pub fn warmup_remaining(&self) -> Option<u32> {
        self.minutes
            .filter(|age| *age < WARMUP_MINUTES)
            .map(|age| WARMUP_MINUTES - age)
    }
}

/// Byte-pair interpretations of block 0, in a fixed order
fn candidates(block0: &[u8]) -> [(&'static str, u32); 4] {
    let le01 = u16::from_le_bytes([block0[0], block0[1]]);
    let be01 = u16::from_be_bytes([block0[0], block0[1]]);
    let le23 = u16::from_le_bytes([block0[2], block0[3]]);
    let be23 = u16::from_be_bytes([block0[2], block0[3]]);
    [
        ("le01", u32::from(le01)),
        ("be01", u32::from(be01)),
        ("le23", u32::from(le23)),
        ("be23", u32::from(be23)),
    ]
}

pub fn derive_sensor_age(block0: &[u8]) -> SensorAge {
    if block0.len() < 6 {
        return SensorAge {
            reason: Some("block0TooShort"),
            ..SensorAge::default()
        };
    }

    // Ties keep the earliest label
    let chosen = candidates(block0)
        .into_iter()
        .filter(|(_, minutes)| *minutes <= MAX_SENSOR_AGE_MINUTES)
        .fold(None::<(&'static str, u32)>, |best, candidate| match best {
            Some(b) if b.1 >= candidate.1 => Some(b),
            _ => Some(candidate),
        });

    match chosen {
        Some((source, minutes)) => SensorAge {
            minutes: Some(minutes),
            source: Some(source),
            reason: None,
        },
        None => SensorAge {
            reason: Some("noPlausibleAgeCandidate"),
            ..SensorAge::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_largest_plausible_candidate_wins() {
        // le01 = 0x0100 = 256, be01 = 0x0001 = 1, le23 = 0x1000 = 4096, be23 = 0x0010 = 16
        let block0 = [0x00, 0x01, 0x00, 0x10, 0x03, 0x00];
        let age = derive_sensor_age(&block0);
        assert_eq!(age.minutes, Some(4096));
        assert_eq!(age.source, Some("le23"));
        assert!(!age.is_warmup());
        assert_eq!(age.warmup_remaining(), None);
    }

    #[test]
    fn test_implausible_candidates_skipped() {
        // le01 = 0xFFFF, be01 = 0xFFFF out of range; le23 = 30, be23 = 0x1E00 = 7680
        let block0 = [0xFF, 0xFF, 0x1E, 0x00, 0x03, 0x00];
        let age = derive_sensor_age(&block0);
        assert_eq!(age.minutes, Some(7680));
        assert_eq!(age.source, Some("be23"));
    }

    #[test]
    fn test_warmup_detection() {
        // le01 = 20 but be01 = 0x1400 = 5120; the larger reading wins
        let block0 = [0x14, 0x00, 0x00, 0x00, 0x01, 0x00];
        let age = derive_sensor_age(&block0);
        assert_eq!(age.minutes, Some(5120));
        assert_eq!(age.source, Some("be01"));
        assert!(!age.is_warmup());

        let block0 = [0x00, 0x00, 0x00, 0x00, 0x01, 0x00];
        let age = derive_sensor_age(&block0);
        assert_eq!(age.minutes, Some(0));
        assert!(age.is_warmup());
        assert_eq!(age.warmup_remaining(), Some(60));
    }

    #[test]
    fn test_no_plausible_candidate() {
        let block0 = [0xFF, 0xFF, 0xFF, 0xFF, 0x03, 0x00];
        let age = derive_sensor_age(&block0);
        assert_eq!(age.minutes, None);
        assert_eq!(age.reason, Some("noPlausibleAgeCandidate"));
        assert!(!age.is_warmup());
    }

    #[test]
    fn test_short_block_skips_heuristic() {
        let age = derive_sensor_age(&[0x00, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(age.minutes, None);
        assert_eq!(age.reason, Some("block0TooShort"));
    }
}
