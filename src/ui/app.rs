use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eframe::egui;
use lru::LruCache;
use tokio::sync::mpsc;

use crate::map::cluster::{ClusterEngine, RenderNode};
use crate::map::coordinator::FetchCoordinator;
use crate::map::geo::{Coordinate, Viewport};
use crate::map::marker::{self, MarkerSource};
use crate::map::property::{ClaimedFilter, FilterState, IntentOverride, OverrideStore};
use crate::map::tracker::{ViewportTracker, DATA_REFRESH_DEBOUNCE};
use crate::map::widget::{CameraState, PropertyMap, FLY_DURATION_SECS};
use crate::nest_api::properties::NestClient;
use crate::nest_api::tiles::{BasemapTile, TileError, TileRetriever};

const MAP_ID: &str = "nest_property_map";
const TILE_CACHE_SIZE: usize = 512;

/// After a marker click the camera flies to the property; viewport signals
/// settling inside this margin past the end of the fly are the click's own
/// side effect, not the user asking for new data.
const POST_SELECT_FETCH_SUPPRESSION: Duration = Duration::from_millis(600);

/// The fly-to keeps re-noting the tracker every animation frame, so the
/// earliest settle is fly end plus the debounce. The window has to reach
/// past that or it would never suppress anything.
fn selection_suppression_deadline(now: Instant) -> Instant {
    now + Duration::from_secs_f64(FLY_DURATION_SECS) + POST_SELECT_FETCH_SUPPRESSION
}

/// A fetch has to outlive this before the loading badge appears, so quick
/// pans do not flicker it.
const LOADING_BADGE_DELAY: Duration = Duration::from_millis(180);

const SELECTED_ZOOM: f64 = 18.0;

type TileResult = (u32, u32, u32, Result<BasemapTile, TileError>);

pub struct NestApp {
    runtime: tokio::runtime::Runtime,

    // Basemap plumbing.
    tile_retriever: TileRetriever,
    tile_cache: LruCache<(u32, u32, u32), BasemapTile>,
    pending_tiles: HashSet<(u32, u32, u32)>,
    tile_tx: mpsc::UnboundedSender<TileResult>,
    tile_rx: mpsc::UnboundedReceiver<TileResult>,

    // Viewport data pipeline.
    coordinator: FetchCoordinator,
    tracker: ViewportTracker,
    cluster_engine: ClusterEngine,
    overrides: OverrideStore,

    filters: FilterState,
    current_user: Option<String>,
    last_viewport: Option<Viewport>,
    suppress_fetch_until: Option<Instant>,
    selected: Option<String>,
}

impl NestApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        properties: NestClient,
        tile_retriever: TileRetriever,
        current_user: Option<String>,
    ) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .thread_name("nest-fetcher")
            .enable_all()
            .build()
            .expect("unable to create runtime");
        let (tile_tx, tile_rx) = mpsc::unbounded_channel();
        let coordinator = FetchCoordinator::new(
            Arc::new(properties),
            runtime.handle().clone(),
            Some(cc.egui_ctx.clone()),
        );

        Self {
            runtime,
            tile_retriever,
            tile_cache: LruCache::new(
                NonZeroUsize::new(TILE_CACHE_SIZE).expect("nonzero cache size"),
            ),
            pending_tiles: HashSet::new(),
            tile_tx,
            tile_rx,
            coordinator,
            tracker: ViewportTracker::new(DATA_REFRESH_DEBOUNCE),
            cluster_engine: ClusterEngine::new(),
            overrides: OverrideStore::default(),
            filters: FilterState::default(),
            current_user,
            last_viewport: None,
            suppress_fetch_until: None,
            selected: None,
        }
    }

    fn fly_to(&self, ctx: &egui::Context, target: Coordinate, zoom: f64) {
        let id = egui::Id::new(MAP_ID);
        let mut camera = CameraState::load(ctx, id);
        camera.fly_to(target, zoom, ctx.input(|i| i.time));
        camera.store(ctx, id);
        ctx.request_repaint();
    }

    fn filter_bar(&mut self, ctx: &egui::Context, now: Instant) {
        let before = self.filters;

        egui::TopBottomPanel::top("nest_filter_bar").show(ctx, |ui| {
            ui.horizontal_wrapped(|ui| {
                ui.label(egui::RichText::new("Who's looking?").strong());
                ui.toggle_value(&mut self.filters.open_to_talking, "Open to conversations");
                ui.toggle_value(&mut self.filters.for_sale, "For sale");
                ui.toggle_value(&mut self.filters.for_rent, "For rent");

                ui.separator();
                ui.label("Claimed:");
                egui::ComboBox::from_id_salt("nest_claimed_filter")
                    .selected_text(match self.filters.claimed {
                        ClaimedFilter::All => "All",
                        ClaimedFilter::Claimed => "Claimed",
                        ClaimedFilter::Unclaimed => "Unclaimed",
                    })
                    .show_ui(ui, |ui| {
                        ui.selectable_value(&mut self.filters.claimed, ClaimedFilter::All, "All");
                        ui.selectable_value(
                            &mut self.filters.claimed,
                            ClaimedFilter::Claimed,
                            "Claimed",
                        );
                        ui.selectable_value(
                            &mut self.filters.claimed,
                            ClaimedFilter::Unclaimed,
                            "Unclaimed",
                        );
                    });
            });

            ui.horizontal_wrapped(|ui| {
                let count = self.coordinator.points().len();
                if count > 0 {
                    ui.label(format!("{count} homes people are curious about here"));
                }
                if self.coordinator.truncated() {
                    ui.colored_label(
                        egui::Color32::from_rgb(0xb4, 0x59, 0x09),
                        "showing a capped set — zoom in or narrow filters to see more",
                    );
                }
                if self
                    .coordinator
                    .loading_for(now)
                    .is_some_and(|d| d >= LOADING_BADGE_DELAY)
                {
                    ui.spinner();
                    ui.label("Updating map…");
                }
                if let Some(error) = self.coordinator.last_error() {
                    ui.colored_label(
                        egui::Color32::from_rgb(0xb9, 0x1c, 0x1c),
                        format!("couldn't refresh: {error}"),
                    );
                }
                if count == 0 && self.coordinator.loading_for(now).is_none() {
                    ui.weak("Quiet street — for now. Pan the map or relax filters.");
                }
            });
        });

        // A filter change is a camera-equivalent event for the tracker.
        if self.filters != before {
            if let Some(viewport) = self.last_viewport {
                self.tracker.note(viewport, self.filters, now);
            }
        }
    }

    fn detail_panel(&mut self, ctx: &egui::Context, now: Instant) {
        let Some(selected_id) = self.selected.clone() else {
            return;
        };
        let Some(point) = self
            .coordinator
            .points()
            .iter()
            .find(|p| p.id == selected_id)
            .cloned()
        else {
            return;
        };
        let resolved = self.overrides.resolve(&point);

        let mut close = false;
        egui::SidePanel::right("nest_detail_panel")
            .default_width(260.0)
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.heading(resolved.display_label());
                    if ui.button("✕").clicked() {
                        close = true;
                    }
                });
                if let Some(postcode) = &resolved.postcode {
                    ui.weak(postcode);
                }
                ui.separator();

                let mut patch = IntentOverride::default();
                if ui
                    .selectable_label(resolved.is_open_to_talking, "Open to conversations")
                    .clicked()
                {
                    patch.is_open_to_talking = Some(!resolved.is_open_to_talking);
                }
                if ui.selectable_label(resolved.is_for_sale, "For sale").clicked() {
                    patch.is_for_sale = Some(!resolved.is_for_sale);
                }
                if ui.selectable_label(resolved.is_for_rent, "For rent").clicked() {
                    patch.is_for_rent = Some(!resolved.is_for_rent);
                }

                if patch != IntentOverride::default() {
                    self.overrides.merge(&selected_id, patch);
                    if let Some(viewport) = self.last_viewport {
                        self.coordinator.refresh_now(viewport, self.filters, now);
                    }
                }

                if resolved.is_claimed {
                    let owned = match (&self.current_user, &resolved.claimed_by_user_id) {
                        (Some(me), Some(claimant)) => me == claimant,
                        _ => false,
                    };
                    ui.weak(if owned { "Claimed by you" } else { "Claimed" });
                } else {
                    ui.weak("Unclaimed");
                }
            });

        if close {
            // Navigating away drops any unconfirmed patch for this property.
            self.overrides.clear(&selected_id);
            self.selected = None;
        }
    }

    fn drain_tiles(&mut self) {
        while let Ok((z, x, y, result)) = self.tile_rx.try_recv() {
            self.pending_tiles.remove(&(z, x, y));
            match result {
                Ok(tile) => {
                    self.tile_cache.put((z, x, y), tile);
                }
                Err(err) => {
                    log::warn!("basemap tile ({z}, {x}, {y}) failed: {err}");
                }
            }
        }
    }

    fn spawn_tile_fetches(&mut self, ctx: &egui::Context, missing: Vec<(u32, u32, u32)>) {
        for (z, x, y) in missing {
            if self.pending_tiles.contains(&(z, x, y)) || self.tile_cache.peek(&(z, x, y)).is_some()
            {
                continue;
            }
            let retriever = self.tile_retriever.clone();
            let tx = self.tile_tx.clone();
            let requester = ctx.clone();

            self.runtime.spawn(async move {
                let result = retriever.fetch_tile(z, x, y).await;
                let _ = tx.send((z, x, y, result));
                requester.request_repaint();
            });
            self.pending_tiles.insert((z, x, y));
        }
    }
}

impl eframe::App for NestApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();

        self.drain_tiles();
        if self.coordinator.pump() {
            self.overrides.reconcile(self.coordinator.points());
        }

        self.filter_bar(ctx, now);
        self.detail_panel(ctx, now);

        let points = self.coordinator.points().clone();
        let zoom = CameraState::load(ctx, egui::Id::new(MAP_ID)).zoom();
        let nodes = self
            .cluster_engine
            .nodes(&points, self.coordinator.version(), zoom);
        let markers = marker::present(
            &points,
            &nodes,
            &self.overrides,
            self.current_user.as_deref(),
        );

        let mut missing_tiles = Vec::new();
        let output = egui::CentralPanel::default()
            .show(ctx, |ui| {
                PropertyMap::new(MAP_ID, &markers, &mut self.tile_cache, &mut missing_tiles)
                    .viewport_size(ui.available_size())
                    .show(ui)
            })
            .inner;

        // The first frame counts as a camera change so the initial viewport
        // gets fetched without waiting for user input.
        if output.camera_changed || self.last_viewport.is_none() {
            self.tracker.note(output.viewport, self.filters, now);
        }
        self.last_viewport = Some(output.viewport);

        match output.clicked {
            Some(MarkerSource::Point(index)) => {
                if let Some(point) = points.get(index) {
                    let resolved = self.overrides.resolve(point);
                    log::info!("selected property {}", resolved.id);
                    self.selected = Some(resolved.id.clone());
                    self.suppress_fetch_until = Some(selection_suppression_deadline(now));
                    self.fly_to(
                        ctx,
                        Coordinate::new(resolved.lat, resolved.lon),
                        SELECTED_ZOOM,
                    );
                }
            }
            Some(MarkerSource::Cluster(node_index)) => {
                if let Some(RenderNode::Cluster(cluster)) = nodes.get(node_index) {
                    let target_zoom =
                        self.cluster_engine
                            .expansion_zoom(&points, &cluster.members, zoom);
                    log::debug!(
                        "expanding cluster {} ({} homes) to zoom {target_zoom}",
                        cluster.id,
                        cluster.count
                    );
                    self.fly_to(ctx, Coordinate::new(cluster.lat, cluster.lon), target_zoom);
                }
            }
            None => {}
        }

        if let Some((viewport, filters)) = self.tracker.poll(now) {
            let suppressed = self
                .suppress_fetch_until
                .is_some_and(|until| now < until);
            if suppressed {
                log::debug!("viewport settled inside post-selection window, not fetching");
            } else {
                self.coordinator.request_refresh(viewport, filters, now);
            }
        }

        // Keep polling while a debounce window or the loading badge timer is
        // open; egui only repaints on input otherwise.
        if let Some(remaining) = self.tracker.time_until_settled(now) {
            ctx.request_repaint_after(remaining);
        } else if self.coordinator.loading_for(now).is_some() {
            ctx.request_repaint_after(LOADING_BADGE_DELAY);
        }

        self.spawn_tile_fetches(ctx, missing_tiles);
    }
}
