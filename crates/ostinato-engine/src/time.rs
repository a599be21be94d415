//! Musical time - exact rational timepoints for the transport
//!
//! Transport positions are kept as exact fractions of a whole note so that
//! looping and tempo math never accumulate floating point drift. All values
//! are stored reduced with a positive denominator; comparisons go through
//! i128 cross multiplication and cannot overflow for any reduced pair.

use serde::{Deserialize, Serialize};

/// Exact rational timepoint in musical units
///
/// The value `num/denom` counts beats from the start of the project.
/// Negative values are only used for the "not playing" sentinel in
/// [`SampleTime`]; clock arithmetic uses [`MusicalTime::saturating_sub`]
/// which clamps at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MusicalTime {
    num: i64,
    denom: i64,
}

// Hand-written so wire input cannot smuggle in a zero denominator or an
// unreduced fraction that would break derived equality.
impl<'de> Deserialize<'de> for MusicalTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            num: i64,
            denom: i64,
        }
        let raw = Raw::deserialize(deserializer)?;
        if raw.denom == 0 {
            return Err(serde::de::Error::custom("musical time with zero denominator"));
        }
        Ok(MusicalTime::new(raw.num, raw.denom))
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a.abs()
}

impl MusicalTime {
    /// Create a reduced rational timepoint.
    ///
    /// # Panics
    /// Panics if `denom` is zero.
    pub fn new(num: i64, denom: i64) -> Self {
        assert!(denom != 0, "musical time denominator must be non-zero");
        let sign = if denom < 0 { -1 } else { 1 };
        let g = gcd(num, denom).max(1);
        Self {
            num: sign * num / g,
            denom: sign * denom / g,
        }
    }

    /// Zero timepoint (project start)
    pub const fn zero() -> Self {
        Self { num: 0, denom: 1 }
    }

    /// Numerator of the reduced fraction
    pub fn num(&self) -> i64 {
        self.num
    }

    /// Denominator of the reduced fraction (always positive)
    pub fn denom(&self) -> i64 {
        self.denom
    }

    /// Approximate value as f64, for display and logging only
    pub fn to_float(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    fn from_i128(num: i128, denom: i128) -> Self {
        debug_assert!(denom > 0);
        let g = {
            let mut a = num.abs();
            let mut b = denom;
            while b != 0 {
                let t = b;
                b = a % b;
                a = t;
            }
            a.max(1)
        };
        let num = num / g;
        let denom = denom / g;
        // A reduced sum or product of in-range rationals fits back into i64
        // for every value the transport can produce.
        Self {
            num: i64::try_from(num).expect("musical time overflow"),
            denom: i64::try_from(denom).expect("musical time overflow"),
        }
    }

    /// Exact sum
    pub fn add(&self, other: &MusicalTime) -> Self {
        Self::from_i128(
            self.num as i128 * other.denom as i128 + other.num as i128 * self.denom as i128,
            self.denom as i128 * other.denom as i128,
        )
    }

    /// Exact difference, clamped at zero
    ///
    /// Transport clocks never run backwards past the project start.
    pub fn saturating_sub(&self, other: &MusicalTime) -> Self {
        let num =
            self.num as i128 * other.denom as i128 - other.num as i128 * self.denom as i128;
        if num <= 0 {
            Self::zero()
        } else {
            Self::from_i128(num, self.denom as i128 * other.denom as i128)
        }
    }

    /// Exact product with an integer count (e.g. frames times one frame's
    /// musical duration)
    pub fn mul_int(&self, factor: i64) -> Self {
        Self::from_i128(self.num as i128 * factor as i128, self.denom as i128)
    }
}

impl PartialOrd for MusicalTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MusicalTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // denominators are positive, so the comparison does not flip
        let lhs = self.num as i128 * other.denom as i128;
        let rhs = other.num as i128 * self.denom as i128;
        lhs.cmp(&rhs)
    }
}

impl std::fmt::Display for MusicalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.denom)
    }
}

/// Musical-time interval covered by one audio frame
///
/// `start_time` is the position at the frame's first sample, `end_time` the
/// position one frame later. Frames outside playback carry the sentinel
/// value returned by [`SampleTime::not_playing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTime {
    pub start_time: MusicalTime,
    pub end_time: MusicalTime,
}

impl SampleTime {
    /// Sentinel marking a frame that is not part of playback
    pub fn not_playing() -> Self {
        Self {
            start_time: MusicalTime::new(-1, 1),
            end_time: MusicalTime::zero(),
        }
    }

    /// Whether this frame carries a real playback interval
    pub fn is_playing(&self) -> bool {
        self.start_time >= MusicalTime::zero()
    }
}

impl Default for SampleTime {
    fn default() -> Self {
        Self::not_playing()
    }
}
