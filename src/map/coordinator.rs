use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::geo::Viewport;
use super::property::{FilterState, PropertyPoint};
use crate::nest_api::properties::{FetchError, PropertyBackend, PropertyBatch, PropertyQuery};

struct FetchOutcome {
    generation: u64,
    result: Result<PropertyBatch, FetchError>,
}

/// Owns the canonical point set and keeps it consistent with the backend for
/// the current viewport and filters.
///
/// Requests run on the tokio runtime and report back over an unbounded
/// channel that the UI thread drains each frame via [`pump`]. A generation
/// counter makes staleness explicit: only the most recently issued request
/// may touch the point set, and anything older is discarded on arrival.
/// Fetch failures are absorbed here and never reach the clusterer or
/// presenter; the existing point set survives them.
///
/// [`pump`]: FetchCoordinator::pump
pub struct FetchCoordinator {
    backend: Arc<dyn PropertyBackend>,
    runtime: tokio::runtime::Handle,
    repaint: Option<egui::Context>,

    tx: mpsc::UnboundedSender<FetchOutcome>,
    rx: mpsc::UnboundedReceiver<FetchOutcome>,

    points: Arc<Vec<PropertyPoint>>,
    /// Bumped whenever the point set actually changes; the clusterer keys
    /// its memoization on this.
    version: u64,
    generation: u64,
    last_issued_key: Option<String>,
    in_flight: Option<JoinHandle<()>>,

    truncated: bool,
    loading_since: Option<Instant>,
    last_error: Option<String>,
}

impl FetchCoordinator {
    pub fn new(
        backend: Arc<dyn PropertyBackend>,
        runtime: tokio::runtime::Handle,
        repaint: Option<egui::Context>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            backend,
            runtime,
            repaint,
            tx,
            rx,
            points: Arc::new(Vec::new()),
            version: 0,
            generation: 0,
            last_issued_key: None,
            in_flight: None,
            truncated: false,
            loading_since: None,
            last_error: None,
        }
    }

    pub fn points(&self) -> &Arc<Vec<PropertyPoint>> {
        &self.points
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// How long the current fetch has been running, if one is in flight.
    pub fn loading_for(&self, now: Instant) -> Option<std::time::Duration> {
        self.loading_since.map(|since| now.duration_since(since))
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Issue a bounded query for a settled viewport. Skipped entirely when
    /// the viewport+filters match the last issued request; map libraries
    /// love reporting the same resting position several times.
    pub fn request_refresh(&mut self, viewport: Viewport, filters: FilterState, now: Instant) {
        let key = viewport.fetch_key(&filters);
        if self.last_issued_key.as_deref() == Some(key.as_str()) {
            log::debug!("suppressing refetch of unchanged viewport");
            return;
        }
        self.issue(key, viewport, filters, now);
    }

    /// Force a fresh request even for an unchanged viewport. Used after a
    /// local mutation so the canonical state catches up.
    pub fn refresh_now(&mut self, viewport: Viewport, filters: FilterState, now: Instant) {
        let key = viewport.fetch_key(&filters);
        self.issue(key, viewport, filters, now);
    }

    fn issue(&mut self, key: String, viewport: Viewport, filters: FilterState, now: Instant) {
        // A newer request supersedes anything still in flight; the old task
        // must not get a chance to write.
        if let Some(old) = self.in_flight.take() {
            old.abort();
        }

        self.generation += 1;
        self.last_issued_key = Some(key);
        self.loading_since = Some(now);

        let generation = self.generation;
        let future = self.backend.fetch_properties(PropertyQuery {
            bounds: viewport.bounds,
            filters,
        });
        let tx = self.tx.clone();
        let repaint = self.repaint.clone();

        self.in_flight = Some(self.runtime.spawn(async move {
            let result = future.await;
            let _ = tx.send(FetchOutcome { generation, result });
            if let Some(ctx) = repaint {
                ctx.request_repaint();
            }
        }));
    }

    /// Drain completed fetches. Returns true when the point set changed and
    /// downstream consumers should recompute.
    pub fn pump(&mut self) -> bool {
        let mut changed = false;
        while let Ok(outcome) = self.rx.try_recv() {
            if outcome.generation != self.generation {
                // Superseded while in flight; its result no longer matters.
                log::debug!("discarding stale fetch (generation {})", outcome.generation);
                continue;
            }

            self.loading_since = None;
            self.in_flight = None;

            match outcome.result {
                Ok(batch) => {
                    self.truncated = batch.truncated;
                    self.last_error = None;
                    if point_set_changed(&self.points, &batch.points) {
                        self.points = Arc::new(batch.points);
                        self.version += 1;
                        changed = true;
                    }
                }
                Err(FetchError::Cancelled) => {}
                Err(err) => {
                    // Keep whatever we have; a transient failure must not
                    // blank the map.
                    log::warn!("property fetch failed: {err}");
                    self.last_error = Some(err.to_string());
                }
            }
        }
        changed
    }
}

impl Drop for FetchCoordinator {
    fn drop(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
    }
}

/// Order-insensitive comparison by id and render-relevant state. Panning
/// back over an unchanged area must not remount markers.
fn point_set_changed(old: &[PropertyPoint], new: &[PropertyPoint]) -> bool {
    if old.len() != new.len() {
        return true;
    }
    let old_by_id: HashMap<&str, &PropertyPoint> =
        old.iter().map(|p| (p.id.as_str(), p)).collect();
    new.iter().any(|p| match old_by_id.get(p.id.as_str()) {
        Some(prev) => {
            prev.is_claimed != p.is_claimed
                || prev.is_open_to_talking != p.is_open_to_talking
                || prev.is_for_sale != p.is_for_sale
                || prev.is_for_rent != p.is_for_rent
                || prev.has_recent_activity != p.has_recent_activity
                || prev.claimed_by_user_id != p.claimed_by_user_id
        }
        None => true,
    })
}
