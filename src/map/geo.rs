use std::ops::Add;

use serde::{Deserialize, Serialize};

use super::property::FilterState;

/// Size in pixels of the zoom-0 world square. Matches the 512px tiles the
/// basemap serves, so one tile covers the world at zoom 0.
pub const WORLD_PX: f64 = 512.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Default for Coordinate {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
        }
    }
}

impl Add<Coordinate> for Coordinate {
    type Output = Coordinate;

    fn add(self, other: Coordinate) -> Coordinate {
        Coordinate {
            latitude: self.latitude + other.latitude,
            longitude: self.longitude + other.longitude,
        }
    }
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    south: f64, // minimum latitude
    west: f64,  // minimum longitude
    north: f64, // maximum latitude
    east: f64,  // maximum longitude
}

impl GeoBounds {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    pub fn south(&self) -> f64 {
        self.south
    }

    pub fn west(&self) -> f64 {
        self.west
    }

    pub fn north(&self) -> f64 {
        self.north
    }

    pub fn east(&self) -> f64 {
        self.east
    }

    pub fn center(&self) -> Coordinate {
        Coordinate {
            latitude: (self.south + self.north) / 2.0,
            longitude: (self.west + self.east) / 2.0,
        }
    }

    pub fn contains_point(&self, lat: f64, lon: f64) -> bool {
        lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
    }

    pub fn intersects(&self, other: &GeoBounds) -> bool {
        self.south <= other.north
            && self.north >= other.south
            && self.west <= other.east
            && self.east >= other.west
    }

    /// Geographic bounds of the region a viewport of `size_px` logical pixels
    /// shows around `center` at fractional `zoom`.
    pub fn from_center_zoom(center: Coordinate, zoom: f64, size_px: (f32, f32)) -> Self {
        let [cx, cy] = project(center.latitude, center.longitude);
        let scale = zoom_scale(zoom);
        let half_w = size_px.0 as f64 / 2.0 / scale;
        let half_h = size_px.1 as f64 / 2.0 / scale;

        let (north, west) = unproject(cx - half_w, cy - half_h);
        let (south, east) = unproject(cx + half_w, cy + half_h);

        GeoBounds {
            south,
            west,
            north,
            east,
        }
    }

    /// All basemap tile coordinates touching these bounds at integer zoom `z`.
    /// Bounds with `west > east` cross the antimeridian and wrap through the
    /// last tile column.
    pub fn tiles_at(&self, z: u32) -> Vec<(u32, u32)> {
        let (min_x, min_y) = tile_for(self.north, self.west, z);
        let (max_x, max_y) = tile_for(self.south, self.east, z);

        let n = zoom_scale(z as f64) as u32;
        let columns: Vec<u32> = if min_x <= max_x {
            (min_x..=max_x).collect()
        } else {
            (min_x..n).chain(0..=max_x).collect()
        };

        let mut tiles = Vec::new();
        for x in columns {
            for y in min_y..=max_y {
                tiles.push((x, y));
            }
        }
        tiles
    }
}

/// A settled view of the map: the visible geographic rectangle plus zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub bounds: GeoBounds,
    pub zoom: f64,
}

impl Viewport {
    /// Equivalence key for fetch suppression: bounds rounded to 6 decimal
    /// places, zoom, and the active filters. Two viewports with equal keys
    /// are the same request.
    pub fn fetch_key(&self, filters: &FilterState) -> String {
        format!(
            "{:.6}|{:.6}|{:.6}|{:.6}|{:.2}|{}",
            self.bounds.north,
            self.bounds.south,
            self.bounds.east,
            self.bounds.west,
            self.zoom,
            filters.key_fragment()
        )
    }
}

pub fn zoom_scale(zoom: f64) -> f64 {
    2.0_f64.powf(zoom)
}

/// Web-mercator projection into zoom-0 pixel coordinates (x right, y down,
/// both in `0..WORLD_PX`).
pub fn project(lat: f64, lon: f64) -> [f64; 2] {
    let lat = lat.clamp(-85.051_128, 85.051_128);
    let lat_rad = lat.to_radians();
    let x = (lon + 180.0) / 360.0 * WORLD_PX;
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0
        * WORLD_PX;
    [x, y]
}

/// Inverse of [`project`].
pub fn unproject(x: f64, y: f64) -> (f64, f64) {
    let lon = x / WORLD_PX * 360.0 - 180.0;
    let lat = ((std::f64::consts::PI * (1.0 - 2.0 * y / WORLD_PX)).sinh())
        .atan()
        .to_degrees();
    (lat, lon)
}

/// Tile x, y containing a coordinate at integer zoom `z`.
pub fn tile_for(lat: f64, lon: f64, z: u32) -> (u32, u32) {
    let n = zoom_scale(z as f64);
    let [x, y] = project(lat, lon);
    let max = n as u32 - 1;
    let tx = ((x / WORLD_PX * n).floor() as i64).clamp(0, max as i64) as u32;
    let ty = ((y / WORLD_PX * n).floor() as i64).clamp(0, max as i64) as u32;
    (tx, ty)
}

/// Geographic bounds of tile (x, y) at integer zoom `z`.
pub fn tile_bounds(x: u32, y: u32, z: u32) -> GeoBounds {
    let n = zoom_scale(z as f64);
    let (north, west) = unproject(x as f64 / n * WORLD_PX, y as f64 / n * WORLD_PX);
    let (south, east) = unproject(
        (x as f64 + 1.0) / n * WORLD_PX,
        (y as f64 + 1.0) / n * WORLD_PX,
    );
    GeoBounds::new(north, south, east, west)
}
