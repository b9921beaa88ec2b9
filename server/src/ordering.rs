//! Timestamp-based staleness detection for packets on an unreliable transport.

/// How far behind the newest accepted timestamp a packet may be.
pub const STALENESS_TOLERANCE_MS: u32 = 500;

/// Tracks the newest sender timestamp accepted from one peer.
///
/// Timestamps are 32-bit millisecond clocks that wrap, so ordering is judged
/// by the signed wrapping difference rather than by numeric comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampGate {
    last: Option<u32>,
}

impl TimestampGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<u32> {
        self.last
    }

    /// True when `timestamp` lags the newest accepted one by more than the tolerance.
    pub fn is_obsolete(&self, timestamp: u32) -> bool {
        match self.last {
            None => false,
            Some(last) => (timestamp.wrapping_sub(last) as i32) < -(STALENESS_TOLERANCE_MS as i32),
        }
    }

    /// Checks `timestamp` and, when it is fresh, advances the gate.
    ///
    /// Returns false for obsolete packets.
    pub fn admit(&mut self, timestamp: u32) -> bool {
        if self.is_obsolete(timestamp) {
            return false;
        }
        let advance = match self.last {
            None => true,
            Some(last) => (timestamp.wrapping_sub(last) as i32) > 0,
        };
        if advance {
            self.last = Some(timestamp);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_packet_always_fresh() {
        let mut gate = TimestampGate::new();
        assert!(gate.admit(0));
        assert_eq!(gate.last(), Some(0));
    }

    #[test]
    fn test_far_behind_is_obsolete() {
        let mut gate = TimestampGate::new();
        gate.admit(10_000);
        assert!(gate.is_obsolete(9_000));
        assert!(!gate.admit(9_000));
        assert_eq!(gate.last(), Some(10_000));
    }

    #[test]
    fn test_jitter_within_tolerance_is_fresh() {
        let mut gate = TimestampGate::new();
        gate.admit(10_000);
        assert!(gate.admit(9_500));
        assert!(gate.admit(9_700));
        // Late packets never move the gate backwards.
        assert_eq!(gate.last(), Some(10_000));
    }

    #[test]
    fn test_wraparound_is_fresh() {
        let mut gate = TimestampGate::new();
        gate.admit(u32::MAX - 100);
        assert!(!gate.is_obsolete(50));
        assert!(gate.admit(50));
        assert_eq!(gate.last(), Some(50));
        assert!(gate.is_obsolete(u32::MAX - 1_000));
    }
}
