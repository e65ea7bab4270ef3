//! Latency threshold range compilation.
//!
//! The queue latency table matches the 32-bit hop latency as two 16-bit
//! halves, each against an independent inclusive interval. A single
//! `latency >= threshold` (or `<`) comparison is therefore split into at
//! most two [`RangePair`]s whose union is exactly the comparison.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::orch::{IntOrchError, Result};

/// Largest value of one 16-bit half.
pub const HALF_MAX: u16 = 0xFFFF;

/// Inclusive interval over a 16-bit half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeInterval {
    lo: u16,
    hi: u16,
}

impl RangeInterval {
    /// The whole 16-bit domain.
    pub const FULL: Self = Self { lo: 0, hi: HALF_MAX };

    /// Creates an interval, or `None` when it would be empty.
    pub fn new(lo: u16, hi: u16) -> Option<Self> {
        (lo <= hi).then_some(Self { lo, hi })
    }

    pub const fn single(value: u16) -> Self {
        Self { lo: value, hi: value }
    }

    pub const fn lo(&self) -> u16 {
        self.lo
    }

    pub const fn hi(&self) -> u16 {
        self.hi
    }

    pub fn contains(&self, value: u16) -> bool {
        self.lo <= value && value <= self.hi
    }

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }
}

impl fmt::Display for RangeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:04x}, 0x{:04x}]", self.lo, self.hi)
    }
}

/// A predicate over a 32-bit value: upper half in `upper` AND lower half in `lower`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangePair {
    pub upper: RangeInterval,
    pub lower: RangeInterval,
}

impl RangePair {
    pub const fn new(upper: RangeInterval, lower: RangeInterval) -> Self {
        Self { upper, lower }
    }

    pub fn matches(&self, value: u32) -> bool {
        self.upper.contains((value >> 16) as u16) && self.lower.contains((value & 0xFFFF) as u16)
    }
}

impl fmt::Display for RangePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upper={} lower={}", self.upper, self.lower)
    }
}

/// OR of range pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRangeSet(Vec<RangePair>);

impl MatchRangeSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds a pair when both intervals are non-empty.
    fn push(&mut self, upper: Option<RangeInterval>, lower: Option<RangeInterval>) {
        if let (Some(upper), Some(lower)) = (upper, lower) {
            self.0.push(RangePair::new(upper, lower));
        }
    }

    /// Returns true if any pair matches `value`.
    pub fn matches(&self, value: u32) -> bool {
        self.0.iter().any(|pair| pair.matches(value))
    }

    pub fn pairs(&self) -> &[RangePair] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RangePair> {
        self.0.iter()
    }
}

impl IntoIterator for MatchRangeSet {
    type Item = RangePair;
    type IntoIter = std::vec::IntoIter<RangePair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a MatchRangeSet {
    type Item = &'a RangePair;
    type IntoIter = std::slice::Iter<'a, RangePair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Validates a raw threshold into the unsigned 32-bit domain.
pub fn checked_threshold(threshold: i64) -> Result<u32> {
    u32::try_from(threshold).map_err(|_| {
        IntOrchError::InvalidArgument(format!(
            "latency threshold {} is outside [0, 0x{:x}]",
            threshold,
            u32::MAX
        ))
    })
}

/// Ranges matching latencies `>= threshold`.
///
/// Fails with `InvalidArgument` outside the unsigned 32-bit domain.
pub fn compile_trigger(threshold: i64) -> Result<MatchRangeSet> {
    checked_threshold(threshold).map(trigger_ranges)
}

/// Ranges matching latencies `< threshold`.
///
/// Fails with `InvalidArgument` outside the unsigned 32-bit domain.
pub fn compile_reset(threshold: i64) -> Result<MatchRangeSet> {
    checked_threshold(threshold).map(reset_ranges)
}

/// Ranges matching latencies `>= threshold`.
///
/// `u32::MAX` means "never trigger" and compiles to an empty set.
pub fn trigger_ranges(threshold: u32) -> MatchRangeSet {
    let upper = (threshold >> 16) as u16;
    let lower = (threshold & 0xFFFF) as u16;
    let mut set = MatchRangeSet::new();

    if upper == 0 {
        // Any non-zero upper half already exceeds a 16-bit threshold.
        set.push(Some(RangeInterval::single(0)), RangeInterval::new(lower, HALF_MAX));
        set.push(RangeInterval::new(1, HALF_MAX), Some(RangeInterval::FULL));
        return set;
    }

    if upper == HALF_MAX && lower == HALF_MAX {
        return set;
    }

    set.push(Some(RangeInterval::single(upper)), RangeInterval::new(lower, HALF_MAX));
    if upper < HALF_MAX {
        set.push(RangeInterval::new(upper + 1, HALF_MAX), Some(RangeInterval::FULL));
    }
    set
}

/// Ranges matching latencies `< threshold`.
///
/// Zero means "never reset" and compiles to an empty set.
pub fn reset_ranges(threshold: u32) -> MatchRangeSet {
    let upper = (threshold >> 16) as u16;
    let lower = (threshold & 0xFFFF) as u16;
    let mut set = MatchRangeSet::new();

    if upper > 0 {
        set.push(RangeInterval::new(0, upper - 1), Some(RangeInterval::FULL));
    }
    if lower > 0 {
        set.push(Some(RangeInterval::single(upper)), RangeInterval::new(0, lower - 1));
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const PROBES: [u32; 12] = [
        0,
        1,
        99,
        100,
        0xFFFE,
        0xFFFF,
        0x1_0000,
        0x1_FFFF,
        0x0100_FEFF,
        0x0100_FF00,
        0xFFFF_FFFE,
        0xFFFF_FFFF,
    ];

    fn boundary_samples(threshold: u32) -> Vec<u32> {
        let mut samples: Vec<u32> = PROBES.to_vec();
        samples.push(threshold);
        samples.push(threshold.wrapping_sub(1));
        samples.push(threshold.wrapping_add(1));
        samples.push(threshold & 0xFFFF_0000);
        samples.push(threshold | 0xFFFF);
        samples
    }

    fn assert_exact(threshold: u32) {
        let trigger = trigger_ranges(threshold);
        let reset = reset_ranges(threshold);
        assert!(trigger.len() <= 2 && reset.len() <= 2);

        for v in boundary_samples(threshold) {
            if threshold != u32::MAX {
                assert_eq!(trigger.matches(v), v >= threshold, "trigger {:#x} v={:#x}", threshold, v);
            }
            assert_eq!(reset.matches(v), v < threshold, "reset {:#x} v={:#x}", threshold, v);
        }
    }

    #[test]
    fn test_trigger_below_16_bits() {
        let ranges = trigger_ranges(100);
        assert!(!ranges.matches(0));
        assert!(!ranges.matches(99));
        assert!(ranges.matches(100));
        assert!(ranges.matches(200));
        assert!(ranges.matches(0x0000_FFFF));
        assert!(ranges.matches(0x0001_FFFF));
        assert!(ranges.matches(u32::MAX));
    }

    #[test]
    fn test_reset_below_16_bits() {
        let ranges = reset_ranges(100);
        assert_eq!(ranges.len(), 1);
        assert!(ranges.matches(0));
        assert!(ranges.matches(99));
        assert!(!ranges.matches(100));
        assert!(!ranges.matches(0x0000_FFFF));
        assert!(!ranges.matches(0x0001_FFFF));
        assert!(!ranges.matches(u32::MAX));
    }

    #[test]
    fn test_split_threshold() {
        let trigger = trigger_ranges(0x0100_FF00);
        assert_eq!(
            trigger.pairs(),
            &[
                RangePair::new(RangeInterval::single(0x0100), RangeInterval::new(0xFF00, 0xFFFF).unwrap()),
                RangePair::new(RangeInterval::new(0x0101, 0xFFFF).unwrap(), RangeInterval::FULL),
            ]
        );
        assert!(!trigger.matches(0x0100_FEFF));
        assert!(trigger.matches(0x0100_FF00));
        assert!(trigger.matches(0x0FF0_0000));

        let reset = reset_ranges(0x0100_FF00);
        assert_eq!(
            reset.pairs(),
            &[
                RangePair::new(RangeInterval::new(0, 0x00FF).unwrap(), RangeInterval::FULL),
                RangePair::new(RangeInterval::single(0x0100), RangeInterval::new(0, 0xFEFF).unwrap()),
            ]
        );
        assert!(reset.matches(0x0001_FFFF));
        assert!(reset.matches(0x0100_FEFF));
        assert!(!reset.matches(0x0100_FF00));
    }

    #[test]
    fn test_zero_threshold() {
        let trigger = trigger_ranges(0);
        assert_eq!(trigger.len(), 2);
        for v in [0, 0xFFFF, 0x1_0000, u32::MAX] {
            assert!(trigger.matches(v));
        }
        assert!(reset_ranges(0).is_empty());
    }

    #[test]
    fn test_max_threshold() {
        assert!(trigger_ranges(u32::MAX).is_empty());

        let reset = reset_ranges(u32::MAX);
        for v in [0, 0x0001_FFFF, 0x0100_FEFF, 0x0FF0_0000, 0xFFFF_FFFE] {
            assert!(reset.matches(v));
        }
        assert!(!reset.matches(u32::MAX));
    }

    #[test]
    fn test_upper_half_saturated() {
        // No room above an all-ones upper half.
        let trigger = trigger_ranges(0xFFFF_0010);
        assert_eq!(trigger.len(), 1);
        assert!(trigger.matches(0xFFFF_0010));
        assert!(trigger.matches(u32::MAX));
        assert!(!trigger.matches(0xFFFF_000F));
        assert!(!trigger.matches(0xFFFE_FFFF));
    }

    #[test]
    fn test_empty_reset_pairs_are_dropped() {
        // lower == 0 drops the second pair.
        let reset = reset_ranges(0x0002_0000);
        assert_eq!(reset.len(), 1);
        assert!(reset.matches(0x0001_FFFF));
        assert!(!reset.matches(0x0002_0000));
    }

    #[test]
    fn test_boundary_thresholds_are_exact() {
        for t in [
            0,
            1,
            0xFFFE,
            0xFFFF,
            0x1_0000,
            0x1_0001,
            0xFFFF_0000,
            0xFFFF_0001,
            0xFFFE_FFFF,
            0xFFFF_FFFE,
            u32::MAX,
        ] {
            assert_exact(t);
        }
    }

    #[test]
    fn test_random_thresholds_are_exact() {
        let mut rng = StdRng::seed_from_u64(0x1d7e_1e3e);
        for _ in 0..2000 {
            let threshold: u32 = rng.gen();
            assert_exact(threshold);
            for _ in 0..8 {
                let v: u32 = rng.gen();
                if threshold != u32::MAX {
                    assert_eq!(trigger_ranges(threshold).matches(v), v >= threshold);
                }
                assert_eq!(reset_ranges(threshold).matches(v), v < threshold);
            }
        }
    }

    #[test]
    fn test_trigger_and_reset_are_complementary() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let threshold: u32 = rng.gen_range(0..u32::MAX);
            let trigger = trigger_ranges(threshold);
            let reset = reset_ranges(threshold);
            for v in boundary_samples(threshold) {
                assert_ne!(trigger.matches(v), reset.matches(v), "t={:#x} v={:#x}", threshold, v);
            }
        }
    }

    #[test]
    fn test_out_of_domain_input_is_rejected() {
        assert!(matches!(compile_trigger(-1), Err(IntOrchError::InvalidArgument(_))));
        assert!(matches!(compile_reset(-1), Err(IntOrchError::InvalidArgument(_))));
        assert!(matches!(
            compile_trigger(u32::MAX as i64 + 1),
            Err(IntOrchError::InvalidArgument(_))
        ));
        assert_eq!(compile_trigger(100).unwrap(), trigger_ranges(100));
        assert_eq!(compile_reset(u32::MAX as i64).unwrap(), reset_ranges(u32::MAX));
    }
}
