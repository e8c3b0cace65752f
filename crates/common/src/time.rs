//! Rational media time for sample timestamps and export ranges.
//!
//! Sample timestamps are kept as `value / timescale` so that frame-accurate
//! positions survive arithmetic without drifting through floating point.
//! Two sentinels exist besides numeric times: [`MediaTime::INVALID`] and
//! [`MediaTime::POSITIVE_INFINITY`], the latter used for unbounded ranges.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// Timescale used when two operands cannot share an exact common scale.
const FALLBACK_TIMESCALE: i32 = 1_000_000_000;

/// Whether a [`MediaTime`] holds a numeric value or a sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeKind {
    #[default]
    Numeric,
    Invalid,
    PositiveInfinity,
}

/// A rational timestamp: `value / timescale` seconds.
///
/// Equality, hashing and ordering compare the represented time, so `1/2` and
/// `2/4` are equal. Sentinels equal only sentinels of the same kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
    #[serde(default)]
    pub kind: TimeKind,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: 1,
        kind: TimeKind::Numeric,
    };

    pub const INVALID: MediaTime = MediaTime {
        value: 0,
        timescale: 0,
        kind: TimeKind::Invalid,
    };

    pub const POSITIVE_INFINITY: MediaTime = MediaTime {
        value: 0,
        timescale: 0,
        kind: TimeKind::PositiveInfinity,
    };

    /// Create a numeric time. A non-positive timescale yields [`MediaTime::INVALID`].
    pub fn new(value: i64, timescale: i32) -> Self {
        if timescale <= 0 {
            return Self::INVALID;
        }
        Self {
            value,
            timescale,
            kind: TimeKind::Numeric,
        }
    }

    /// Approximate a floating point number of seconds at the given timescale.
    pub fn from_seconds(seconds: f64, timescale: i32) -> Self {
        if seconds.is_nan() || timescale <= 0 {
            return Self::INVALID;
        }
        if seconds.is_infinite() && seconds > 0.0 {
            return Self::POSITIVE_INFINITY;
        }
        Self::new((seconds * timescale as f64).round() as i64, timescale)
    }

    pub fn is_numeric(&self) -> bool {
        self.kind == TimeKind::Numeric
    }

    pub fn is_valid(&self) -> bool {
        self.kind != TimeKind::Invalid
    }

    pub fn is_positive_infinity(&self) -> bool {
        self.kind == TimeKind::PositiveInfinity
    }

    /// Seconds as `f64`. Infinity maps to `f64::INFINITY`, invalid to `NaN`.
    pub fn seconds(&self) -> f64 {
        match self.kind {
            TimeKind::Numeric => self.value as f64 / self.timescale as f64,
            TimeKind::PositiveInfinity => f64::INFINITY,
            TimeKind::Invalid => f64::NAN,
        }
    }

    /// Re-express this time at another timescale, rounding to the nearest tick.
    pub fn convert_scale(&self, timescale: i32) -> Self {
        if !self.is_numeric() || timescale <= 0 || timescale == self.timescale {
            return *self;
        }
        let scaled = self.value as i128 * timescale as i128;
        let divisor = self.timescale as i128;
        let rounded = (scaled + scaled.signum() * divisor / 2) / divisor;
        Self::new(rounded as i64, timescale)
    }

    /// The larger of two times; sentinels compare as in [`PartialOrd`].
    pub fn max(self, other: Self) -> Self {
        match self.partial_cmp(&other) {
            Some(Ordering::Less) => other,
            _ => self,
        }
    }

    fn common_timescale(a: i32, b: i32) -> i32 {
        let lcm = a as i64 / gcd(a as i64, b as i64) * b as i64;
        i32::try_from(lcm).unwrap_or(FALLBACK_TIMESCALE)
    }

    fn combine(self, rhs: Self, op: impl Fn(i64, i64) -> Option<i64>) -> Self {
        let scale = Self::common_timescale(self.timescale, rhs.timescale);
        let a = self.convert_scale(scale);
        let b = rhs.convert_scale(scale);
        match op(a.value, b.value) {
            Some(value) => Self::new(value, scale),
            None => Self::INVALID,
        }
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        match (self.kind, other.kind) {
            (TimeKind::Numeric, TimeKind::Numeric) => {
                self.value as i128 * other.timescale as i128
                    == other.value as i128 * self.timescale as i128
            }
            (lhs, rhs) => lhs == rhs,
        }
    }
}

impl Eq for MediaTime {}

impl Hash for MediaTime {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        if self.is_numeric() {
            let divisor = gcd(self.value, self.timescale as i64);
            (self.value / divisor).hash(state);
            (self.timescale as i64 / divisor).hash(state);
        }
    }
}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.kind, other.kind) {
            (TimeKind::Invalid, TimeKind::Invalid) => Some(Ordering::Equal),
            (TimeKind::Invalid, _) | (_, TimeKind::Invalid) => None,
            (TimeKind::PositiveInfinity, TimeKind::PositiveInfinity) => Some(Ordering::Equal),
            (TimeKind::PositiveInfinity, _) => Some(Ordering::Greater),
            (_, TimeKind::PositiveInfinity) => Some(Ordering::Less),
            (TimeKind::Numeric, TimeKind::Numeric) => {
                let lhs = self.value as i128 * other.timescale as i128;
                let rhs = other.value as i128 * self.timescale as i128;
                Some(lhs.cmp(&rhs))
            }
        }
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: Self) -> Self::Output {
        match (self.kind, rhs.kind) {
            (TimeKind::Invalid, _) | (_, TimeKind::Invalid) => Self::INVALID,
            (TimeKind::PositiveInfinity, _) | (_, TimeKind::PositiveInfinity) => {
                Self::POSITIVE_INFINITY
            }
            _ => self.combine(rhs, i64::checked_add),
        }
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: Self) -> Self::Output {
        match (self.kind, rhs.kind) {
            (TimeKind::Numeric, TimeKind::Numeric) => self.combine(rhs, i64::checked_sub),
            (TimeKind::PositiveInfinity, TimeKind::Numeric) => Self::POSITIVE_INFINITY,
            _ => Self::INVALID,
        }
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TimeKind::Numeric => {
                write!(f, "{}/{} ({:.3}s)", self.value, self.timescale, self.seconds())
            }
            TimeKind::Invalid => write!(f, "invalid"),
            TimeKind::PositiveInfinity => write!(f, "+inf"),
        }
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs().max(1)
}

/// A span on a media timeline.
///
/// A positive-infinity duration means the range is unbounded and extends to
/// the end of whatever asset it is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: MediaTime,
    pub duration: MediaTime,
}

impl TimeRange {
    /// The whole timeline.
    pub const ALL: TimeRange = TimeRange {
        start: MediaTime::ZERO,
        duration: MediaTime::POSITIVE_INFINITY,
    };

    pub fn new(start: MediaTime, duration: MediaTime) -> Self {
        Self { start, duration }
    }

    pub fn is_unbounded(&self) -> bool {
        self.duration.is_positive_infinity()
    }

    /// Exclusive end of the range.
    pub fn end(&self) -> MediaTime {
        self.start + self.duration
    }

    /// Whether `time` lies in `[start, end)`.
    pub fn contains(&self, time: MediaTime) -> bool {
        matches!(
            time.partial_cmp(&self.start),
            Some(Ordering::Greater | Ordering::Equal)
        ) && matches!(time.partial_cmp(&self.end()), Some(Ordering::Less))
    }

    /// Clip this range to `[0, limit)`; unbounded ranges end at `limit`.
    pub fn clamped_to(&self, limit: MediaTime) -> TimeRange {
        let end = match self.end().partial_cmp(&limit) {
            Some(Ordering::Less) => self.end(),
            _ => limit,
        };
        let duration = end - self.start;
        match duration.partial_cmp(&MediaTime::ZERO) {
            Some(Ordering::Less) | None => TimeRange::new(self.start, MediaTime::ZERO),
            _ => TimeRange::new(self.start, duration),
        }
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_conversion() {
        assert!((MediaTime::new(1001, 30000).seconds() - 0.033366).abs() < 1e-6);
        assert!(MediaTime::POSITIVE_INFINITY.seconds().is_infinite());
        assert!(MediaTime::INVALID.seconds().is_nan());
        assert_eq!(MediaTime::from_seconds(1.5, 600), MediaTime::new(900, 600));
    }

    #[test]
    fn test_subtraction_across_timescales() {
        let pts = MediaTime::new(90, 30);
        let start = MediaTime::new(48000, 48000);
        let elapsed = pts - start;
        assert!((elapsed.seconds() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_ordering_with_sentinels() {
        assert!(MediaTime::new(5, 1) < MediaTime::POSITIVE_INFINITY);
        assert!(MediaTime::new(1, 2) > MediaTime::new(1, 3));
        assert_eq!(MediaTime::INVALID.partial_cmp(&MediaTime::ZERO), None);
        assert_eq!(
            MediaTime::new(3, 1).max(MediaTime::new(2, 1)),
            MediaTime::new(3, 1)
        );
    }

    #[test]
    fn test_equality_ignores_timescale() {
        use std::collections::HashSet;

        assert_eq!(MediaTime::new(1, 2), MediaTime::new(2, 4));
        assert_eq!(
            MediaTime::new(1, 2).partial_cmp(&MediaTime::new(2, 4)),
            Some(Ordering::Equal)
        );
        assert_eq!(MediaTime::new(0, 30), MediaTime::ZERO);
        assert_eq!(MediaTime::new(-3, 6), MediaTime::new(-1, 2));
        assert_ne!(MediaTime::new(1, 2), MediaTime::new(1, 3));
        assert_ne!(MediaTime::POSITIVE_INFINITY, MediaTime::INVALID);
        assert_eq!(MediaTime::INVALID, MediaTime::INVALID);

        let set: HashSet<MediaTime> = [
            MediaTime::new(1, 2),
            MediaTime::new(2, 4),
            MediaTime::new(30, 60),
            MediaTime::new(-3, 6),
            MediaTime::new(-1, 2),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_unbounded_range_clamps_to_limit() {
        let range = TimeRange::new(MediaTime::new(2, 1), MediaTime::POSITIVE_INFINITY);
        assert!(range.is_unbounded());
        let clamped = range.clamped_to(MediaTime::new(10, 1));
        assert_eq!(clamped.start, MediaTime::new(2, 1));
        assert!((clamped.duration.seconds() - 8.0).abs() < 1e-9);
        assert!(clamped.contains(MediaTime::new(9, 1)));
        assert!(!clamped.contains(MediaTime::new(10, 1)));
    }

    #[test]
    fn test_range_past_limit_is_empty() {
        let range = TimeRange::new(MediaTime::new(12, 1), MediaTime::new(3, 1));
        let clamped = range.clamped_to(MediaTime::new(10, 1));
        assert_eq!(clamped.duration, MediaTime::ZERO);
    }

    proptest::proptest! {
        #[test]
        fn prop_add_then_sub_is_identity(a in -1_000_000i64..1_000_000, b in 0i64..1_000_000, sa in 1i32..48_000, sb in 1i32..48_000) {
            let x = MediaTime::new(a, sa);
            let y = MediaTime::new(b, sb);
            let back = (x + y) - y;
            proptest::prop_assert!((back.seconds() - x.seconds()).abs() < 1e-6);
        }
    }
}
