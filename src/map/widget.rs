use egui::epaint::{Color32, Pos2, Rect, Stroke};
use egui::{pos2, vec2, Align2, FontId, Response, Sense, Ui, Vec2};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use super::cluster::ClusterActivity;
use super::geo::{self, Coordinate, GeoBounds, Viewport};
use super::marker::{Marker, MarkerKind, MarkerSource};
use super::property::PropertyStatus;
use crate::nest_api::tiles::BasemapTile;

const MIN_ZOOM: f64 = 3.0;
const MAX_ZOOM: f64 = 19.0;
pub const FLY_DURATION_SECS: f64 = 0.8;

const POINT_RADIUS: f32 = 13.0;
const CLUSTER_RADIUS: f32 = 18.0;

// Pin palette from the web client.
const COLOR_OWNED: Color32 = Color32::from_rgb(0x00, 0x4f, 0x4f);
const COLOR_CLAIMED: Color32 = Color32::from_rgb(0x00, 0x7c, 0x7c);
const COLOR_OPEN: Color32 = Color32::from_rgb(0x00, 0x9b, 0x9b);
const COLOR_FOR_SALE: Color32 = Color32::from_rgb(0xe6, 0x5f, 0x52);
const COLOR_FOR_RENT: Color32 = Color32::from_rgb(0x63, 0x66, 0xf1);
const COLOR_UNCLAIMED: Color32 = Color32::from_rgb(0x94, 0xa3, 0xb8);
const COLOR_ACTIVITY_RING: Color32 = Color32::from_rgb(0xd9, 0x77, 0x06);

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CameraAnimation {
    from: [f64; 2], // world-pixel coords at zoom 0
    from_zoom: f64,
    to: [f64; 2],
    to_zoom: f64,
    started: f64, // egui time
}

/// Camera state of the map, persisted across sessions via egui storage.
#[derive(Clone, Serialize, Deserialize)]
pub struct CameraState {
    center: Coordinate,
    zoom: f64,
    dragging: bool,
    drag_start: Option<Pos2>,
    #[serde(skip)]
    animation: Option<CameraAnimation>,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            // Newcastle, the web client's starting view.
            center: Coordinate::new(54.9749, -1.6103),
            zoom: 14.0,
            dragging: false,
            drag_start: None,
            animation: None,
        }
    }
}

impl CameraState {
    pub fn load(ctx: &egui::Context, id: egui::Id) -> Self {
        ctx.data_mut(|d| d.get_persisted::<Self>(id).unwrap_or_default())
    }

    pub fn store(self, ctx: &egui::Context, id: egui::Id) {
        ctx.data_mut(|d| d.insert_persisted(id, self));
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Start an animated transition to a new center and zoom.
    pub fn fly_to(&mut self, target: Coordinate, zoom: f64, now: f64) {
        self.animation = Some(CameraAnimation {
            from: geo::project(self.center.latitude(), self.center.longitude()),
            from_zoom: self.zoom,
            to: geo::project(target.latitude(), target.longitude()),
            to_zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM),
            started: now,
        });
    }

    /// Advance any running fly-to. Returns true while the camera moved.
    fn animate(&mut self, now: f64) -> bool {
        let anim = match self.animation {
            Some(anim) => anim,
            None => return false,
        };
        let t = ((now - anim.started) / FLY_DURATION_SECS).clamp(0.0, 1.0);
        let eased = ease_out_cubic(t);

        let x = anim.from[0] + (anim.to[0] - anim.from[0]) * eased;
        let y = anim.from[1] + (anim.to[1] - anim.from[1]) * eased;
        let (lat, lon) = geo::unproject(x, y);
        self.center = Coordinate::new(lat, lon);
        self.zoom = anim.from_zoom + (anim.to_zoom - anim.from_zoom) * eased;

        if t >= 1.0 {
            self.animation = None;
        }
        true
    }
}

fn ease_out_cubic(t: f64) -> f64 {
    1.0 - (1.0 - t).powi(3)
}

/// What one frame of the map produced: the settled camera view, whether the
/// camera moved this frame, and any marker the user clicked.
pub struct MapOutput {
    pub response: Response,
    pub viewport: Viewport,
    pub camera_changed: bool,
    pub clicked: Option<MarkerSource>,
}

/// The interactive property map: basemap tiles underneath, presented markers
/// on top. Pure presentation; fetching and clustering happen upstream and
/// tiles this frame could not find are reported through `missing_tiles`.
pub struct PropertyMap<'a> {
    id: egui::Id,
    markers: &'a [Marker],
    tile_cache: &'a mut LruCache<(u32, u32, u32), BasemapTile>,
    missing_tiles: &'a mut Vec<(u32, u32, u32)>,
    viewport_size: Vec2,
}

impl<'a> PropertyMap<'a> {
    pub fn new(
        id_source: impl std::hash::Hash,
        markers: &'a [Marker],
        tile_cache: &'a mut LruCache<(u32, u32, u32), BasemapTile>,
        missing_tiles: &'a mut Vec<(u32, u32, u32)>,
    ) -> Self {
        Self {
            id: egui::Id::new(id_source),
            markers,
            tile_cache,
            missing_tiles,
            viewport_size: vec2(1024.0, 768.0),
        }
    }

    pub fn viewport_size(mut self, size: Vec2) -> Self {
        self.viewport_size = size;
        self
    }

    pub fn show(mut self, ui: &mut Ui) -> MapOutput {
        let mut state = CameraState::load(ui.ctx(), self.id);
        let mut camera_changed = false;

        let (rect, response) = ui.allocate_exact_size(self.viewport_size, Sense::click_and_drag());
        let painter = ui.painter().with_clip_rect(rect);
        painter.rect(
            rect,
            0.0,
            Color32::from_rgb(0xe8, 0xea, 0xed),
            Stroke::new(1.0, Color32::from_gray(180)),
        );

        let now = ui.input(|i| i.time);
        if state.animate(now) {
            camera_changed = true;
            ui.ctx().request_repaint();
        }

        // Dragging pans the camera and cancels any fly-to.
        if response.dragged() {
            if !state.dragging {
                state.drag_start = response.hover_pos();
                state.dragging = true;
                state.animation = None;
            }
            if let (Some(current), Some(start)) = (response.hover_pos(), state.drag_start) {
                let delta = current - start;
                if delta != Vec2::ZERO {
                    let scale = geo::zoom_scale(state.zoom);
                    let [cx, cy] = geo::project(state.center.latitude(), state.center.longitude());
                    let (lat, lon) = geo::unproject(
                        cx - delta.x as f64 / scale,
                        cy - delta.y as f64 / scale,
                    );
                    state.center = Coordinate::new(lat, lon);
                    camera_changed = true;
                }
                state.drag_start = Some(current);
            }
        } else if state.dragging {
            state.dragging = false;
            state.drag_start = None;
        }

        if response.hovered() {
            let mut zoomed = false;
            let pinch = ui.input(|i| i.zoom_delta()) as f64 - 1.0;
            if pinch.abs() > f64::EPSILON {
                state.zoom = (state.zoom + pinch).clamp(MIN_ZOOM, MAX_ZOOM);
                zoomed = true;
            }
            let scroll = ui.input(|i| i.smooth_scroll_delta).y as f64;
            if scroll.abs() > f64::EPSILON && !zoomed {
                state.zoom = (state.zoom + (scroll / 10.0).tanh()).clamp(MIN_ZOOM, MAX_ZOOM);
                zoomed = true;
            }
            if zoomed {
                state.animation = None;
                camera_changed = true;
            }
        }

        let viewport = Viewport {
            bounds: GeoBounds::from_center_zoom(
                state.center,
                state.zoom,
                (rect.width(), rect.height()),
            ),
            zoom: state.zoom,
        };

        self.paint_tiles(&painter, rect, &state, &viewport);
        self.paint_markers(&painter, rect, &state);

        let clicked = if response.clicked() {
            response
                .interact_pointer_pos()
                .and_then(|pos| self.hit_test(pos, rect, &state))
        } else {
            None
        };

        state.store(ui.ctx(), self.id);

        MapOutput {
            response,
            viewport,
            camera_changed,
            clicked,
        }
    }

    fn to_screen(&self, lat: f64, lon: f64, rect: Rect, state: &CameraState) -> Pos2 {
        let scale = geo::zoom_scale(state.zoom);
        let [cx, cy] = geo::project(state.center.latitude(), state.center.longitude());
        let [x, y] = geo::project(lat, lon);
        pos2(
            rect.center().x + ((x - cx) * scale) as f32,
            rect.center().y + ((y - cy) * scale) as f32,
        )
    }

    fn paint_tiles(
        &mut self,
        painter: &egui::Painter,
        rect: Rect,
        state: &CameraState,
        viewport: &Viewport,
    ) {
        let z = state.zoom.floor().clamp(0.0, MAX_ZOOM) as u32;
        let world_tile = geo::WORLD_PX / geo::zoom_scale(z as f64);
        let scale = geo::zoom_scale(state.zoom);
        let [cx, cy] = geo::project(state.center.latitude(), state.center.longitude());

        for (x, y) in viewport.bounds.tiles_at(z) {
            let min = pos2(
                rect.center().x + ((x as f64 * world_tile - cx) * scale) as f32,
                rect.center().y + ((y as f64 * world_tile - cy) * scale) as f32,
            );
            let size = (world_tile * scale) as f32;
            let tile_rect = Rect::from_min_size(min, vec2(size, size));

            if let Some(tile) = self.tile_cache.get_mut(&(z, x, y)) {
                painter.image(
                    tile.texture(painter.ctx()).id(),
                    tile_rect,
                    Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0)),
                    Color32::WHITE,
                );
            } else {
                self.missing_tiles.push((z, x, y));
                painter.rect_filled(tile_rect, 0.0, Color32::from_gray(225));
            }
        }
    }

    fn paint_markers(&self, painter: &egui::Painter, rect: Rect, state: &CameraState) {
        let margin = CLUSTER_RADIUS + 4.0;
        for marker in self.markers {
            let pos = self.to_screen(marker.lat, marker.lon, rect, state);
            if !rect.expand(margin).contains(pos) {
                continue;
            }
            match &marker.kind {
                MarkerKind::Cluster { count, activity } => {
                    let color = match activity {
                        ClusterActivity::SaleOrRent => COLOR_FOR_SALE,
                        ClusterActivity::Open => COLOR_OPEN,
                        ClusterActivity::Quiet => COLOR_CLAIMED,
                    };
                    painter.circle_filled(pos, CLUSTER_RADIUS, color);
                    painter.circle_stroke(pos, CLUSTER_RADIUS, Stroke::new(2.0, Color32::WHITE));
                    painter.text(
                        pos,
                        Align2::CENTER_CENTER,
                        count.to_string(),
                        FontId::proportional(13.0),
                        Color32::WHITE,
                    );
                }
                MarkerKind::Point {
                    status,
                    has_recent_activity,
                } => {
                    let (color, letter, hollow) = point_style(*status);
                    if hollow {
                        painter.circle_filled(pos, POINT_RADIUS, Color32::from_white_alpha(220));
                        painter.circle_stroke(pos, POINT_RADIUS, Stroke::new(2.0, color));
                    } else {
                        painter.circle_filled(pos, POINT_RADIUS, color);
                        painter.circle_stroke(pos, POINT_RADIUS, Stroke::new(2.0, Color32::WHITE));
                    }
                    if *has_recent_activity {
                        painter.circle_stroke(
                            pos,
                            POINT_RADIUS + 3.0,
                            Stroke::new(1.5, COLOR_ACTIVITY_RING),
                        );
                    }
                    painter.text(
                        pos,
                        Align2::CENTER_CENTER,
                        letter,
                        FontId::proportional(12.0),
                        if hollow { color } else { Color32::WHITE },
                    );
                }
            }
        }
    }

    /// Topmost marker under the pointer; markers arrive in paint order so
    /// hit testing walks them back to front.
    fn hit_test(&self, pointer: Pos2, rect: Rect, state: &CameraState) -> Option<MarkerSource> {
        for marker in self.markers.iter().rev() {
            let pos = self.to_screen(marker.lat, marker.lon, rect, state);
            let radius = match marker.kind {
                MarkerKind::Cluster { .. } => CLUSTER_RADIUS,
                MarkerKind::Point { .. } => POINT_RADIUS,
            };
            if pos.distance(pointer) <= radius {
                return Some(marker.source);
            }
        }
        None
    }
}

fn point_style(status: PropertyStatus) -> (Color32, &'static str, bool) {
    match status {
        PropertyStatus::Owned => (COLOR_OWNED, "H", false),
        PropertyStatus::ForSale => (COLOR_FOR_SALE, "S", false),
        PropertyStatus::ForRent => (COLOR_FOR_RENT, "R", false),
        PropertyStatus::OpenToTalking => (COLOR_OPEN, "O", false),
        PropertyStatus::Claimed => (COLOR_CLAIMED, "C", false),
        PropertyStatus::Unclaimed => (COLOR_UNCLAIMED, "U", true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fly_to_reaches_target_and_clears() {
        let mut state = CameraState::default();
        state.fly_to(Coordinate::new(55.1, -1.2), 18.0, 10.0);

        assert!(state.animate(10.4));
        assert!(state.animation.is_some());

        assert!(state.animate(10.0 + FLY_DURATION_SECS));
        assert!(state.animation.is_none());
        assert_relative_eq!(state.center.latitude(), 55.1, epsilon = 1e-9);
        assert_relative_eq!(state.center.longitude(), -1.2, epsilon = 1e-9);
        assert_relative_eq!(state.zoom, 18.0);

        assert!(!state.animate(11.0));
    }

    #[test]
    fn fly_to_clamps_zoom() {
        let mut state = CameraState::default();
        state.fly_to(Coordinate::new(55.0, -1.0), 25.0, 0.0);
        state.animate(FLY_DURATION_SECS);
        assert_relative_eq!(state.zoom, MAX_ZOOM);
    }

    #[test]
    fn show_reports_missing_tiles_for_the_visible_viewport() {
        let ctx = egui::Context::default();
        let markers: Vec<Marker> = Vec::new();
        let mut cache = LruCache::new(std::num::NonZeroUsize::new(8).unwrap());
        let mut missing = Vec::new();
        let mut viewport = None;

        let _ = ctx.run(egui::RawInput::default(), |ctx| {
            egui::CentralPanel::default().show(ctx, |ui| {
                let output = PropertyMap::new("camera_test", &markers, &mut cache, &mut missing)
                    .viewport_size(vec2(256.0, 256.0))
                    .show(ui);
                viewport = Some(output.viewport);
            });
        });

        // An empty cache means every visible tile comes back as missing.
        assert!(!missing.is_empty());

        let viewport = viewport.expect("map was shown");
        let home = CameraState::default().center;
        assert!(viewport
            .bounds
            .contains_point(home.latitude(), home.longitude()));
    }
}
