use std::collections::HashMap;

use super::cluster::{ClusterActivity, RenderNode};
use super::property::{OverrideStore, PropertyPoint, PropertyStatus};

/// Radius of the spiderfy ring around a shared centroid, in meters.
const SPIDERFY_RADIUS_M: f64 = 12.0;

/// Meters per degree of latitude; close enough everywhere for a 12 m ring.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Where a marker came from, so clicks can be routed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerSource {
    /// Index into the current point set.
    Point(usize),
    /// Index into the current render-node list.
    Cluster(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkerKind {
    Point {
        status: PropertyStatus,
        has_recent_activity: bool,
    },
    Cluster {
        count: usize,
        activity: ClusterActivity,
    },
}

/// One renderable marker with its final position (post-spiderfy), resolved
/// visual state and click routing.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub lat: f64,
    pub lon: f64,
    pub kind: MarkerKind,
    pub source: MarkerSource,
}

/// Resolve render nodes into markers: merge pending intent overrides (they
/// win over canonical state), fan out coincident individual markers, and
/// sort into paint order so high-precedence pins draw on top.
pub fn present(
    points: &[PropertyPoint],
    nodes: &[RenderNode],
    overrides: &OverrideStore,
    current_user: Option<&str>,
) -> Vec<Marker> {
    let mut markers = Vec::with_capacity(nodes.len());

    for (node_index, node) in nodes.iter().enumerate() {
        match node {
            RenderNode::Cluster(cluster) => markers.push(Marker {
                lat: cluster.lat,
                lon: cluster.lon,
                kind: MarkerKind::Cluster {
                    count: cluster.count,
                    activity: cluster.activity,
                },
                source: MarkerSource::Cluster(node_index),
            }),
            RenderNode::Point(point_index) => {
                let resolved = overrides.resolve(&points[*point_index]);
                markers.push(Marker {
                    lat: resolved.lat,
                    lon: resolved.lon,
                    kind: MarkerKind::Point {
                        status: PropertyStatus::resolve(&resolved, current_user),
                        has_recent_activity: resolved.has_recent_activity,
                    },
                    source: MarkerSource::Point(*point_index),
                });
            }
        }
    }

    spiderfy(&mut markers);

    // Paint order: clusters underneath, then points by status precedence so
    // owned pins end up on top.
    markers.sort_by_key(|marker| match &marker.kind {
        MarkerKind::Cluster { .. } => 0,
        MarkerKind::Point { status, .. } => 1 + *status as i64,
    });
    markers
}

/// Fan out individual markers that share (near-)identical coordinates onto a
/// small ring at equal angular spacing, so every one stays visible and
/// clickable. A point alone at its coordinate is left untouched.
fn spiderfy(markers: &mut [Marker]) {
    let mut groups: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (i, marker) in markers.iter().enumerate() {
        if matches!(marker.kind, MarkerKind::Point { .. }) {
            // ~1 m quantization catches "numerically at the same centroid"
            // without touching genuinely distinct neighbours.
            let key = (
                (marker.lat * 1e5).round() as i64,
                (marker.lon * 1e5).round() as i64,
            );
            groups.entry(key).or_default().push(i);
        }
    }

    for group in groups.values() {
        if group.len() < 2 {
            continue;
        }
        let step = std::f64::consts::TAU / group.len() as f64;
        for (slot, &marker_index) in group.iter().enumerate() {
            let angle = step * slot as f64;
            let marker = &mut markers[marker_index];
            let dlat = SPIDERFY_RADIUS_M * angle.sin() / METERS_PER_DEGREE;
            let dlon = SPIDERFY_RADIUS_M * angle.cos()
                / (METERS_PER_DEGREE * marker.lat.to_radians().cos().max(0.01));
            marker.lat += dlat;
            marker.lon += dlon;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::cluster::Cluster;
    use crate::map::property::IntentOverride;
    use approx::assert_relative_eq;

    fn point(id: &str, lat: f64, lon: f64) -> PropertyPoint {
        PropertyPoint {
            id: id.to_string(),
            lat,
            lon,
            claimed_by_user_id: None,
            is_claimed: false,
            is_open_to_talking: false,
            is_for_sale: false,
            is_for_rent: false,
            has_recent_activity: false,
            postcode: None,
            street: None,
            house_number: None,
        }
    }

    fn meters_between(a: (f64, f64), b: (f64, f64)) -> f64 {
        let dlat = (a.0 - b.0) * METERS_PER_DEGREE;
        let dlon = (a.1 - b.1) * METERS_PER_DEGREE * a.0.to_radians().cos();
        (dlat * dlat + dlon * dlon).sqrt()
    }

    #[test]
    fn coincident_points_fan_out_within_fifteen_meters() {
        let points = vec![
            point("a", 54.97, -1.61),
            point("b", 54.97, -1.61),
            point("c", 54.97, -1.61),
        ];
        let nodes: Vec<RenderNode> = (0..3).map(RenderNode::Point).collect();
        let markers = present(&points, &nodes, &OverrideStore::default(), None);

        assert_eq!(markers.len(), 3);
        let positions: Vec<(f64, f64)> = markers.iter().map(|m| (m.lat, m.lon)).collect();

        // All distinct, all on the ring.
        for (i, a) in positions.iter().enumerate() {
            assert!(meters_between(*a, (54.97, -1.61)) < 15.0);
            for b in positions.iter().skip(i + 1) {
                assert!(meters_between(*a, *b) > 1.0);
            }
        }

        // ~120 degrees of separation puts neighbours ~sqrt(3) * r apart.
        let expected = 12.0 * 3.0_f64.sqrt();
        assert_relative_eq!(
            meters_between(positions[0], positions[1]),
            expected,
            max_relative = 0.1
        );
    }

    #[test]
    fn lone_point_is_not_displaced() {
        let points = vec![point("a", 54.97, -1.61)];
        let markers = present(
            &points,
            &[RenderNode::Point(0)],
            &OverrideStore::default(),
            None,
        );
        assert_eq!(markers[0].lat, 54.97);
        assert_eq!(markers[0].lon, -1.61);
    }

    #[test]
    fn override_changes_rendered_status() {
        let mut claimed = point("a", 54.97, -1.61);
        claimed.is_claimed = true;

        let mut overrides = OverrideStore::default();
        overrides.merge(
            "a",
            IntentOverride {
                is_open_to_talking: Some(true),
                ..Default::default()
            },
        );

        let markers = present(&[claimed], &[RenderNode::Point(0)], &overrides, None);
        assert_eq!(
            markers[0].kind,
            MarkerKind::Point {
                status: PropertyStatus::OpenToTalking,
                has_recent_activity: false,
            }
        );
    }

    #[test]
    fn paint_order_puts_owned_on_top_and_clusters_underneath() {
        let mut owned = point("mine", 54.0, -1.0);
        owned.claimed_by_user_id = Some("me".into());
        owned.is_claimed = true;
        let unclaimed = point("other", 55.0, -1.2);
        let points = vec![owned, unclaimed];

        let nodes = vec![
            RenderNode::Point(0),
            RenderNode::Point(1),
            RenderNode::Cluster(Cluster {
                id: 0,
                lat: 54.5,
                lon: -1.1,
                count: 4,
                activity: ClusterActivity::Quiet,
                members: vec![],
            }),
        ];
        let markers = present(&points, &nodes, &OverrideStore::default(), Some("me"));

        assert!(matches!(markers[0].kind, MarkerKind::Cluster { .. }));
        assert_eq!(markers[1].source, MarkerSource::Point(1));
        assert_eq!(markers[2].source, MarkerSource::Point(0));
    }
}
