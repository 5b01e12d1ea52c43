use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use rstar::primitives::GeomWithData;
use rstar::RTree;

use super::geo::{project, zoom_scale};
use super::property::PropertyPoint;

/// At or above this zoom every property renders individually; below it
/// nearby points collapse into clusters. Matches the address-level zoom the
/// web client uses.
pub const INDIVIDUAL_MARKER_ZOOM: f64 = 17.0;

/// Cluster gathering radius in screen pixels at the current zoom.
pub const CLUSTER_RADIUS_PX: f64 = 40.0;

/// How any member signals color a cluster. Fixed precedence, not a count:
/// sale/rent beats open-to-talking beats quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterActivity {
    SaleOrRent,
    Open,
    Quiet,
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: u64,
    pub lat: f64,
    pub lon: f64,
    pub count: usize,
    pub activity: ClusterActivity,
    /// Indices into the point set this cluster was built from.
    pub members: Vec<usize>,
}

/// One renderable unit for the presenter: either a single property (by index
/// into the current point set) or a cluster.
#[derive(Debug, Clone)]
pub enum RenderNode {
    Point(usize),
    Cluster(Cluster),
}

#[derive(Debug, Clone, Copy)]
struct PointMeta {
    index: usize,
    open: bool,
    sale_or_rent: bool,
}

type IndexedPoint = GeomWithData<[f64; 2], PointMeta>;

/// Spatial index plus clusterer. The R-tree is the expensive part and is
/// rebuilt only when the point-set version changes; computed render lists
/// are memoized per (version, quantized zoom) so the per-frame cost of an
/// idle map is a cache hit.
pub struct ClusterEngine {
    radius_px: f64,
    individual_zoom: f64,
    index: Option<(u64, RTree<IndexedPoint>)>,
    coords0: Vec<[f64; 2]>,
    cache: LruCache<(u64, i32), Arc<Vec<RenderNode>>>,
}

impl ClusterEngine {
    pub fn new() -> Self {
        Self::with_tuning(CLUSTER_RADIUS_PX, INDIVIDUAL_MARKER_ZOOM)
    }

    pub fn with_tuning(radius_px: f64, individual_zoom: f64) -> Self {
        Self {
            radius_px,
            individual_zoom,
            index: None,
            coords0: Vec::new(),
            cache: LruCache::new(NonZeroUsize::new(16).expect("nonzero cache size")),
        }
    }

    pub fn individual_zoom(&self) -> f64 {
        self.individual_zoom
    }

    /// Renderable nodes for the given point set at the given zoom. `version`
    /// must change whenever `points` does.
    pub fn nodes(
        &mut self,
        points: &[PropertyPoint],
        version: u64,
        zoom: f64,
    ) -> Arc<Vec<RenderNode>> {
        // The individual-marker branch gets its own sentinel bucket and
        // cluster buckets stay strictly below the threshold, so a cached
        // list never leaks across the boundary when half-zoom rounding
        // would merge e.g. 16.8 and 17.0 into one bucket.
        let bucket = if zoom >= self.individual_zoom {
            i32::MAX
        } else {
            quantize_zoom(zoom).min(quantize_zoom(self.individual_zoom) - 1)
        };
        if let Some(nodes) = self.cache.get(&(version, bucket)) {
            return nodes.clone();
        }

        let nodes = if bucket == i32::MAX {
            Arc::new((0..points.len()).map(RenderNode::Point).collect())
        } else {
            self.ensure_index(points, version);
            Arc::new(self.cluster_at(points, bucket as f64 / 2.0))
        };

        self.cache.put((version, bucket), nodes.clone());
        nodes
    }

    /// Minimum zoom at which a cluster breaks apart, for the click-to-expand
    /// camera transition. Never past the individual-marker threshold.
    pub fn expansion_zoom(
        &self,
        points: &[PropertyPoint],
        members: &[usize],
        current_zoom: f64,
    ) -> f64 {
        let coords: Vec<[f64; 2]> = members
            .iter()
            .map(|&i| project(points[i].lat, points[i].lon))
            .collect();

        let mut zoom = quantize_zoom(current_zoom) as f64 / 2.0 + 0.5;
        while zoom < self.individual_zoom {
            let radius0 = self.radius_px / zoom_scale(zoom);
            if splits_apart(&coords, radius0) {
                return zoom;
            }
            zoom += 0.5;
        }
        self.individual_zoom
    }

    fn ensure_index(&mut self, points: &[PropertyPoint], version: u64) {
        if matches!(&self.index, Some((v, _)) if *v == version) {
            return;
        }
        log::debug!("rebuilding spatial index over {} points", points.len());
        self.coords0 = points
            .iter()
            .map(|p| project(p.lat, p.lon))
            .collect();
        let entries: Vec<IndexedPoint> = points
            .iter()
            .enumerate()
            .map(|(index, p)| {
                GeomWithData::new(
                    self.coords0[index],
                    PointMeta {
                        index,
                        open: p.is_open_to_talking,
                        sale_or_rent: p.is_for_sale || p.is_for_rent,
                    },
                )
            })
            .collect();
        self.index = Some((version, RTree::bulk_load(entries)));
    }

    /// Greedy radius clustering in point order: each unvisited point gathers
    /// its unvisited neighbours within the pixel radius; a lone point stays
    /// an individual marker.
    fn cluster_at(&self, points: &[PropertyPoint], zoom: f64) -> Vec<RenderNode> {
        let tree = match &self.index {
            Some((_, tree)) => tree,
            None => return Vec::new(),
        };
        let radius0 = self.radius_px / zoom_scale(zoom);

        let mut visited = vec![false; points.len()];
        let mut nodes = Vec::new();

        for seed in 0..points.len() {
            if visited[seed] {
                continue;
            }
            let members: Vec<PointMeta> = tree
                .locate_within_distance(self.coords0[seed], radius0 * radius0)
                .map(|entry| entry.data)
                .filter(|meta| !visited[meta.index])
                .collect();

            if members.len() < 2 {
                visited[seed] = true;
                nodes.push(RenderNode::Point(seed));
                continue;
            }

            let mut lat = 0.0;
            let mut lon = 0.0;
            let mut any_open = false;
            let mut any_sale_or_rent = false;
            let mut member_indices = Vec::with_capacity(members.len());
            for meta in &members {
                visited[meta.index] = true;
                lat += points[meta.index].lat;
                lon += points[meta.index].lon;
                any_open |= meta.open;
                any_sale_or_rent |= meta.sale_or_rent;
                member_indices.push(meta.index);
            }

            let count = members.len();
            nodes.push(RenderNode::Cluster(Cluster {
                id: seed as u64,
                lat: lat / count as f64,
                lon: lon / count as f64,
                count,
                activity: if any_sale_or_rent {
                    ClusterActivity::SaleOrRent
                } else if any_open {
                    ClusterActivity::Open
                } else {
                    ClusterActivity::Quiet
                },
                members: member_indices,
            }));
        }

        nodes
    }
}

impl Default for ClusterEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Half-zoom granularity for memoization keys; fractional zoom during a
/// pinch does not thrash the cache.
fn quantize_zoom(zoom: f64) -> i32 {
    (zoom * 2.0).round() as i32
}

/// Whether a member set no longer fits a single gathering radius.
fn splits_apart(coords: &[[f64; 2]], radius0: f64) -> bool {
    let r2 = radius0 * radius0;
    coords.iter().skip(1).any(|c| {
        let dx = c[0] - coords[0][0];
        let dy = c[1] - coords[0][1];
        dx * dx + dy * dy > r2
    })
}
