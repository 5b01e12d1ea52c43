use std::time::{Duration, Instant};

use super::geo::Viewport;
use super::property::FilterState;

/// Default settle time for viewport-driven data refresh.
pub const DATA_REFRESH_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Debug)]
enum TrackerState {
    Idle,
    Pending {
        viewport: Viewport,
        filters: FilterState,
        since: Instant,
    },
}

/// Turns the continuous stream of camera changes into discrete settled
/// viewports. Every raw event restarts the debounce timer; the pending
/// viewport is emitted once the timer elapses with no newer event, and an
/// emission identical to the previous one (same rounded bounds, zoom and
/// filters) is swallowed.
///
/// Time is injected by the caller, so the frame loop drives this with
/// `Instant::now()` and tests drive it with fabricated instants. No I/O
/// happens here.
#[derive(Debug)]
pub struct ViewportTracker {
    debounce: Duration,
    state: TrackerState,
    last_emitted_key: Option<String>,
}

impl ViewportTracker {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            state: TrackerState::Idle,
            last_emitted_key: None,
        }
    }

    /// Record a raw camera or filter change. Restarts the debounce window.
    pub fn note(&mut self, viewport: Viewport, filters: FilterState, now: Instant) {
        self.state = TrackerState::Pending {
            viewport,
            filters,
            since: now,
        };
    }

    /// True while a debounce window is open; the caller should keep polling.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, TrackerState::Pending { .. })
    }

    /// Time left until the pending viewport settles, if any.
    pub fn time_until_settled(&self, now: Instant) -> Option<Duration> {
        match &self.state {
            TrackerState::Pending { since, .. } => {
                Some(self.debounce.saturating_sub(now.duration_since(*since)))
            }
            TrackerState::Idle => None,
        }
    }

    /// Emit the settled viewport once the debounce window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<(Viewport, FilterState)> {
        let (viewport, filters) = match &self.state {
            TrackerState::Pending {
                viewport,
                filters,
                since,
            } if now.duration_since(*since) >= self.debounce => (*viewport, *filters),
            _ => return None,
        };

        self.state = TrackerState::Idle;

        let key = viewport.fetch_key(&filters);
        if self.last_emitted_key.as_deref() == Some(key.as_str()) {
            return None;
        }
        self.last_emitted_key = Some(key);
        Some((viewport, filters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::geo::GeoBounds;

    fn viewport(north: f64, zoom: f64) -> Viewport {
        Viewport {
            bounds: GeoBounds::new(north, north - 0.1, -1.5, -1.6),
            zoom,
        }
    }

    #[test]
    fn rapid_events_emit_exactly_once_with_last_viewport() {
        let mut tracker = ViewportTracker::new(Duration::from_millis(250));
        let t0 = Instant::now();

        for i in 0..20 {
            tracker.note(
                viewport(55.0 + i as f64 * 0.01, 12.0),
                FilterState::default(),
                t0 + Duration::from_millis(i * 10),
            );
        }

        // Still inside the window of the last event.
        assert!(tracker.poll(t0 + Duration::from_millis(300)).is_none());

        let settled = tracker
            .poll(t0 + Duration::from_millis(190 + 250))
            .expect("one settled viewport");
        assert_eq!(settled.0, viewport(55.0 + 19.0 * 0.01, 12.0));

        // Nothing further without a new event.
        assert!(tracker.poll(t0 + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn identical_viewport_is_not_emitted_twice() {
        let mut tracker = ViewportTracker::new(Duration::from_millis(250));
        let t0 = Instant::now();
        let filters = FilterState::default();

        tracker.note(viewport(55.0, 12.0), filters, t0);
        assert!(tracker.poll(t0 + Duration::from_millis(250)).is_some());

        tracker.note(viewport(55.0, 12.0), filters, t0 + Duration::from_secs(1));
        assert!(tracker
            .poll(t0 + Duration::from_secs(1) + Duration::from_millis(250))
            .is_none());
    }

    #[test]
    fn filter_change_makes_same_bounds_emit_again() {
        let mut tracker = ViewportTracker::new(Duration::from_millis(250));
        let t0 = Instant::now();

        tracker.note(viewport(55.0, 12.0), FilterState::default(), t0);
        assert!(tracker.poll(t0 + Duration::from_millis(250)).is_some());

        let filters = FilterState {
            for_sale: true,
            ..Default::default()
        };
        tracker.note(viewport(55.0, 12.0), filters, t0 + Duration::from_secs(1));
        let settled = tracker.poll(t0 + Duration::from_secs(1) + Duration::from_millis(250));
        assert_eq!(settled.map(|(_, f)| f), Some(filters));
    }

    #[test]
    fn time_until_settled_counts_down() {
        let mut tracker = ViewportTracker::new(Duration::from_millis(250));
        let t0 = Instant::now();
        assert_eq!(tracker.time_until_settled(t0), None);

        tracker.note(viewport(55.0, 12.0), FilterState::default(), t0);
        assert_eq!(
            tracker.time_until_settled(t0 + Duration::from_millis(100)),
            Some(Duration::from_millis(150))
        );
    }
}
