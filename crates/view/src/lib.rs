//! Immutable camera snapshots.
//!
//! A `ViewState` is captured once per view change and handed by shared
//! reference to every watcher of that tick. It is never mutated; the next
//! change produces a new snapshot that supersedes it.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewStateError {
    InvalidHeight,
    NonFiniteValue,
}

/// One camera snapshot in map units: where the eye sits over the paging
/// plane, how high, and which way it faces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    center_x: f64,
    center_y: f64,
    height: f64,
    heading_radians: f64,
    captured_at: Instant,
}

impl ViewState {
    pub fn new(
        center_x: f64,
        center_y: f64,
        height: f64,
        heading_radians: f64,
    ) -> Result<Self, ViewStateError> {
        if !center_x.is_finite() || !center_y.is_finite() || !heading_radians.is_finite() {
            return Err(ViewStateError::NonFiniteValue);
        }
        if !height.is_finite() || height <= 0.0 {
            return Err(ViewStateError::InvalidHeight);
        }
        Ok(ViewState {
            center_x,
            center_y,
            height,
            heading_radians,
            captured_at: Instant::now(),
        })
    }

    pub fn center_x(&self) -> f64 {
        self.center_x
    }

    pub fn center_y(&self) -> f64 {
        self.center_y
    }

    /// Eye height over the paging plane, in map units. Smaller means
    /// closer, which means finer tiles are worth loading.
    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn heading_radians(&self) -> f64 {
        self.heading_radians
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// True when the two snapshots are close enough that re-running tile
    /// evaluation would change nothing.
    pub fn roughly_equals(&self, other: &ViewState, tolerance: f64) -> bool {
        (self.center_x - other.center_x).abs() <= tolerance
            && (self.center_y - other.center_y).abs() <= tolerance
            && (self.height - other.height).abs() <= tolerance
            && (self.heading_radians - other.heading_radians).abs() <= tolerance
    }
}

/// How often a watcher is willing to hear about view changes.
///
/// `min_period` is the shortest gap between two notifications; an update
/// landing inside the gap is held as a single trailing notification.
/// `max_lag` bounds how stale that trailing notification may get when
/// updates keep streaming in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherCadence {
    pub min_period: Duration,
    pub max_lag: Duration,
}

impl Default for WatcherCadence {
    fn default() -> Self {
        WatcherCadence {
            min_period: Duration::from_millis(100),
            max_lag: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ViewState, ViewStateError, WatcherCadence};

    #[test]
    fn rejects_non_positive_height() {
        assert_eq!(
            ViewState::new(0.0, 0.0, 0.0, 0.0),
            Err(ViewStateError::InvalidHeight)
        );
        assert_eq!(
            ViewState::new(0.0, 0.0, -2.0, 0.0),
            Err(ViewStateError::InvalidHeight)
        );
    }

    #[test]
    fn rejects_non_finite_values() {
        assert_eq!(
            ViewState::new(f64::NAN, 0.0, 1.0, 0.0),
            Err(ViewStateError::NonFiniteValue)
        );
        assert_eq!(
            ViewState::new(0.0, 0.0, 1.0, f64::INFINITY),
            Err(ViewStateError::NonFiniteValue)
        );
    }

    #[test]
    fn roughly_equals_uses_tolerance_per_field() {
        let a = ViewState::new(10.0, 20.0, 5.0, 0.0).expect("valid view");
        let b = ViewState::new(10.004, 20.0, 5.0, 0.0).expect("valid view");
        assert!(a.roughly_equals(&b, 0.01));
        assert!(!a.roughly_equals(&b, 0.001));
    }

    #[test]
    fn default_cadence_debounces_at_100ms() {
        let cadence = WatcherCadence::default();
        assert!(cadence.min_period < cadence.max_lag);
        assert_eq!(cadence.min_period.as_millis(), 100);
    }
}
