//! Tempo map oracle - musical time to sample-indexed iterator positions
//!
//! The player walks playback forward one frame at a time through a
//! [`TimeMapperIterator`]. Iterators carry the identity of the mapper that
//! produced them so a player holding a stale iterator across a tempo map
//! replacement re-seeds instead of reading positions from the wrong map.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::time::MusicalTime;

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

/// Constant-tempo map over a fixed project duration
///
/// Positions are counted in beats. One audio frame advances musical time by
/// exactly `bpm / (60 * sample_rate)` beats, kept as an exact rational so
/// repeated advancement never drifts.
#[derive(Debug, Clone)]
pub struct TimeMapper {
    sample_rate: u32,
    bpm: u32,
    duration: MusicalTime,
    epoch: u64,
}

impl TimeMapper {
    /// Create a tempo map.
    ///
    /// # Panics
    /// Panics if `sample_rate` or `bpm` is zero.
    pub fn new(sample_rate: u32, bpm: u32, duration: MusicalTime) -> Self {
        assert!(sample_rate > 0, "sample rate must be positive");
        assert!(bpm > 0, "bpm must be positive");
        Self {
            sample_rate,
            bpm,
            duration,
            epoch: NEXT_EPOCH.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Musical duration of a single audio frame
    pub fn frame_duration(&self) -> MusicalTime {
        MusicalTime::new(self.bpm as i64, 60 * self.sample_rate as i64)
    }

    /// End of the project
    pub fn end_time(&self) -> MusicalTime {
        self.duration
    }

    /// Sample rate this map was built against
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Position an iterator at musical time `t`.
    ///
    /// The iterator lands on the last frame boundary at or before `t`, so
    /// one advance always yields a time strictly greater than `t`.
    pub fn find(&self, t: MusicalTime) -> TimeMapperIterator {
        let fd = self.frame_duration();
        // floor(t / frame_duration), exact in i128
        let num = t.num().max(0) as i128 * fd.denom() as i128;
        let den = t.denom() as i128 * fd.num() as i128;
        let frame = (num / den) as u64;
        TimeMapperIterator {
            epoch: self.epoch,
            frame,
            frame_duration: fd,
        }
    }
}

/// Cursor over the tempo map, one audio frame per step
#[derive(Debug, Clone)]
pub struct TimeMapperIterator {
    epoch: u64,
    frame: u64,
    frame_duration: MusicalTime,
}

impl TimeMapperIterator {
    /// Whether this iterator was produced by `mapper`
    pub fn is_owned_by(&self, mapper: &TimeMapper) -> bool {
        self.epoch == mapper.epoch
    }

    /// Advance by exactly one frame
    pub fn advance(&mut self) {
        self.frame += 1;
    }

    /// Musical time at the current frame
    pub fn current(&self) -> MusicalTime {
        self.frame_duration.mul_int(self.frame as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration_exact() {
        let tm = TimeMapper::new(44100, 120, MusicalTime::new(4, 1));
        // 120 bpm at 44.1kHz: one frame is 1/22050 beat
        assert_eq!(tm.frame_duration(), MusicalTime::new(1, 22050));
    }

    #[test]
    fn test_find_on_grid() {
        let tm = TimeMapper::new(44100, 120, MusicalTime::new(4, 1));
        let mut it = tm.find(MusicalTime::new(1, 2));
        assert_eq!(it.current(), MusicalTime::new(1, 2));
        it.advance();
        assert!(it.current() > MusicalTime::new(1, 2));
    }

    #[test]
    fn test_find_off_grid_advances_past() {
        let tm = TimeMapper::new(44100, 120, MusicalTime::new(4, 1));
        // Not representable on the 1/22050 grid
        let t = MusicalTime::new(1, 3);
        let mut it = tm.find(t);
        assert!(it.current() <= t);
        it.advance();
        assert!(it.current() > t);
    }

    #[test]
    fn test_strictly_monotonic() {
        let tm = TimeMapper::new(44100, 140, MusicalTime::new(16, 1));
        let mut it = tm.find(MusicalTime::zero());
        let mut prev = it.current();
        for _ in 0..1000 {
            it.advance();
            let cur = it.current();
            assert!(cur > prev);
            prev = cur;
        }
    }

    #[test]
    fn test_owner_identity() {
        let tm1 = TimeMapper::new(44100, 120, MusicalTime::new(4, 1));
        let tm2 = TimeMapper::new(44100, 120, MusicalTime::new(4, 1));
        let it = tm1.find(MusicalTime::zero());
        assert!(it.is_owned_by(&tm1));
        assert!(!it.is_owned_by(&tm2));
    }
}
