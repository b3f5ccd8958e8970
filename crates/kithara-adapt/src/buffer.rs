#![forbid(unsafe_code)]

//! Buffered-range queries over the media element state.

use std::{ops::Range, sync::Arc};

use parking_lot::Mutex;

/// Contiguous buffered run around a playback position (seconds).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferedRange {
    pub start: f64,
    pub end: f64,
    /// Start of the next buffered run after a hole, if any.
    pub next_start: Option<f64>,
}

impl BufferedRange {
    /// Empty range anchored at `position`.
    #[must_use]
    pub fn empty_at(position: f64) -> Self {
        Self {
            start: position,
            end: position,
            next_start: None,
        }
    }

    /// Buffered seconds ahead of `position`.
    #[must_use]
    pub fn ahead_of(&self, position: f64) -> f64 {
        (self.end - position).max(0.0)
    }
}

/// Find the buffered run containing `position`.
///
/// Ranges separated by less than `max_hole` seconds are merged first. A run
/// starting less than `max_hole` after `position` counts as containing it.
#[must_use]
pub fn buffered_range(ranges: &[Range<f64>], position: f64, max_hole: f64) -> BufferedRange {
    let mut sorted: Vec<Range<f64>> = ranges.iter().filter(|r| r.end > r.start).cloned().collect();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<Range<f64>> = Vec::with_capacity(sorted.len());
    for range in sorted {
        if let Some(last) = merged.last_mut() {
            if range.start - last.end < max_hole {
                if range.end > last.end {
                    last.end = range.end;
                }
                continue;
            }
        }
        merged.push(range);
    }

    let mut found = BufferedRange::empty_at(position);
    for range in merged {
        if position + max_hole >= range.start && position < range.end {
            found.start = range.start;
            found.end = range.end;
        } else if position + max_hole < range.start {
            found.next_start = Some(range.start);
            break;
        }
    }
    found
}

/// Playback state the engine pulls on demand.
///
/// Implementations backed by a lock are queried while the engine itself is
/// locked, e.g. behind `AbrHandle`. Lock order is engine, then
/// media: never call into the engine or its handle while holding the media
/// lock.
pub trait MediaState {
    /// Current playback position in seconds.
    fn current_time(&self) -> f64;

    /// Signed playback rate; zero when stalled by the host.
    fn playback_rate(&self) -> f64;

    fn is_paused(&self) -> bool;

    /// Whether any media has been buffered yet.
    fn has_data(&self) -> bool;

    /// Buffered run around `position` with the given hole tolerance.
    fn buffered_range(&self, position: f64, max_hole: f64) -> BufferedRange;
}

/// Plain snapshot of a media element.
#[derive(Clone, Debug)]
pub struct MediaSnapshot {
    pub position: f64,
    pub rate: f64,
    pub paused: bool,
    pub buffered: Vec<Range<f64>>,
}

impl Default for MediaSnapshot {
    fn default() -> Self {
        Self {
            position: 0.0,
            rate: 1.0,
            paused: false,
            buffered: Vec::new(),
        }
    }
}

impl MediaSnapshot {
    /// Playing at normal speed with `ahead` seconds buffered past `position`.
    #[must_use]
    pub fn playing(position: f64, ahead: f64) -> Self {
        Self {
            position,
            buffered: vec![0.0..position + ahead],
            ..Self::default()
        }
    }
}

impl MediaState for MediaSnapshot {
    fn current_time(&self) -> f64 {
        self.position
    }

    fn playback_rate(&self) -> f64 {
        self.rate
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn has_data(&self) -> bool {
        !self.buffered.is_empty()
    }

    fn buffered_range(&self, position: f64, max_hole: f64) -> BufferedRange {
        buffered_range(&self.buffered, position, max_hole)
    }
}

impl<T: MediaState> MediaState for Mutex<T> {
    fn current_time(&self) -> f64 {
        self.lock().current_time()
    }

    fn playback_rate(&self) -> f64 {
        self.lock().playback_rate()
    }

    fn is_paused(&self) -> bool {
        self.lock().is_paused()
    }

    fn has_data(&self) -> bool {
        self.lock().has_data()
    }

    fn buffered_range(&self, position: f64, max_hole: f64) -> BufferedRange {
        self.lock().buffered_range(position, max_hole)
    }
}

impl<T: MediaState + ?Sized> MediaState for Arc<T> {
    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn playback_rate(&self) -> f64 {
        (**self).playback_rate()
    }

    fn is_paused(&self) -> bool {
        (**self).is_paused()
    }

    fn has_data(&self) -> bool {
        (**self).has_data()
    }

    fn buffered_range(&self, position: f64, max_hole: f64) -> BufferedRange {
        (**self).buffered_range(position, max_hole)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("inside_single_range", vec![0.0..10.0], 4.0, 0.0, 10.0)]
    #[case("hole_smaller_than_tolerance_merges", vec![0.0..5.0, 5.3..12.0], 4.0, 0.0, 12.0)]
    #[case("hole_larger_than_tolerance_splits", vec![0.0..5.0, 6.0..12.0], 4.0, 0.0, 5.0)]
    #[case("unsorted_input", vec![5.2..9.0, 0.0..5.0], 1.0, 0.0, 9.0)]
    #[case("position_just_before_next_run", vec![10.0..20.0], 9.7, 10.0, 20.0)]
    fn finds_contiguous_run(
        #[case] _name: &str,
        #[case] ranges: Vec<Range<f64>>,
        #[case] position: f64,
        #[case] expected_start: f64,
        #[case] expected_end: f64,
    ) {
        let r = buffered_range(&ranges, position, 0.5);
        assert!((r.start - expected_start).abs() < 1e-9);
        assert!((r.end - expected_end).abs() < 1e-9);
    }

    #[test]
    fn outside_buffer_is_empty_with_next_start() {
        let r = buffered_range(&[0.0..2.0, 8.0..10.0], 4.0, 0.5);
        assert_eq!(r.start, 4.0);
        assert_eq!(r.end, 4.0);
        assert_eq!(r.next_start, Some(8.0));
        assert_eq!(r.ahead_of(4.0), 0.0);
    }

    #[test]
    fn empty_ranges_yield_empty_run() {
        let r = buffered_range(&[], 3.0, 0.5);
        assert_eq!(r, BufferedRange::empty_at(3.0));
    }

    #[test]
    fn shared_snapshot_reflects_updates() {
        let media = Arc::new(Mutex::new(MediaSnapshot::playing(10.0, 5.0)));
        assert!(media.has_data());
        assert!((media.buffered_range(10.0, 0.5).ahead_of(10.0) - 5.0).abs() < 1e-9);

        media.lock().position = 12.0;
        assert!((media.current_time() - 12.0).abs() < f64::EPSILON);
        assert!((media.buffered_range(12.0, 0.5).ahead_of(12.0) - 3.0).abs() < 1e-9);
    }
}
