use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One residential property record, as the map pipeline sees it. Identity is
/// the backend `id`; everything else may change between fetches.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyPoint {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub claimed_by_user_id: Option<String>,
    pub is_claimed: bool,
    pub is_open_to_talking: bool,
    pub is_for_sale: bool,
    pub is_for_rent: bool,
    pub has_recent_activity: bool,
    pub postcode: Option<String>,
    pub street: Option<String>,
    pub house_number: Option<String>,
}

/// Permissive wire shape for a backend row. Validation happens in
/// [`PropertyPoint::from_row`]; the backend is not trusted to be consistent.
#[derive(Debug, Deserialize)]
struct RawPropertyRow {
    id: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    claimed_by_user_id: Option<String>,
    #[serde(default)]
    is_claimed: bool,
    #[serde(default)]
    is_open_to_talking: bool,
    #[serde(default)]
    is_for_sale: bool,
    #[serde(default)]
    is_for_rent: bool,
    #[serde(default)]
    has_recent_activity: bool,
    #[serde(default)]
    postcode: Option<String>,
    #[serde(default)]
    street: Option<String>,
    #[serde(default)]
    house_number: Option<String>,
}

impl PropertyPoint {
    /// Validate one backend row. Returns `None` (and logs) for rows missing
    /// an id or usable coordinates, rather than trusting the payload shape.
    pub fn from_row(row: &serde_json::Value) -> Option<PropertyPoint> {
        let raw: RawPropertyRow = match serde_json::from_value(row.clone()) {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("dropping malformed property row: {err}");
                return None;
            }
        };

        let id = match raw.id {
            Some(id) if !id.is_empty() => id,
            _ => {
                log::warn!("dropping property row without id");
                return None;
            }
        };
        let (lat, lon) = match (raw.lat, raw.lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => (lat, lon),
            _ => {
                log::warn!("dropping property row {id} without coordinates");
                return None;
            }
        };

        // The backend sometimes disagrees with itself here; a claimant always
        // implies claimed.
        let is_claimed = raw.is_claimed || raw.claimed_by_user_id.is_some();

        Some(PropertyPoint {
            id,
            lat,
            lon,
            claimed_by_user_id: raw.claimed_by_user_id,
            is_claimed,
            is_open_to_talking: raw.is_open_to_talking,
            is_for_sale: raw.is_for_sale,
            is_for_rent: raw.is_for_rent,
            has_recent_activity: raw.has_recent_activity,
            postcode: raw.postcode,
            street: raw.street,
            house_number: raw.house_number,
        })
    }

    /// "12 High St, NE1 4AB" with progressively weaker fallbacks.
    pub fn display_label(&self) -> String {
        let suffix = |s: &str| match &self.postcode {
            Some(pc) => format!("{s}, {pc}"),
            None => s.to_string(),
        };
        match (&self.house_number, &self.street) {
            (Some(number), Some(street)) => suffix(&format!("{number} {street}")),
            (None, Some(street)) => suffix(street),
            _ => self.postcode.clone().unwrap_or_else(|| "Home".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClaimedFilter {
    #[default]
    All,
    Claimed,
    Unclaimed,
}

impl ClaimedFilter {
    pub fn as_query_value(&self) -> &'static str {
        match self {
            ClaimedFilter::All => "all",
            ClaimedFilter::Claimed => "claimed",
            ClaimedFilter::Unclaimed => "unclaimed",
        }
    }
}

/// Active map filters. The intent flags are OR'd together by the backend;
/// the claimed filter is AND'd against them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterState {
    pub open_to_talking: bool,
    pub for_sale: bool,
    pub for_rent: bool,
    pub claimed: ClaimedFilter,
}

impl FilterState {
    pub fn key_fragment(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.open_to_talking,
            self.for_sale,
            self.for_rent,
            self.claimed.as_query_value()
        )
    }
}

/// A client-local patch applied after a local mutation, before the backend
/// has confirmed it. Merged on top of canonical points at render time only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentOverride {
    pub is_for_sale: Option<bool>,
    pub is_for_rent: Option<bool>,
    pub is_open_to_talking: Option<bool>,
    pub is_claimed: Option<bool>,
    pub claimed_by_user_id: Option<Option<String>>,
}

impl IntentOverride {
    pub fn apply(&self, point: &PropertyPoint) -> PropertyPoint {
        let mut merged = point.clone();
        if let Some(v) = self.is_for_sale {
            merged.is_for_sale = v;
        }
        if let Some(v) = self.is_for_rent {
            merged.is_for_rent = v;
        }
        if let Some(v) = self.is_open_to_talking {
            merged.is_open_to_talking = v;
        }
        if let Some(v) = self.is_claimed {
            merged.is_claimed = v;
        }
        if let Some(v) = &self.claimed_by_user_id {
            merged.claimed_by_user_id = v.clone();
        }
        merged
    }

    /// True when the canonical point already carries every overridden value,
    /// i.e. the backend caught up and the patch is no longer needed.
    fn confirmed_by(&self, point: &PropertyPoint) -> bool {
        self.is_for_sale.map_or(true, |v| point.is_for_sale == v)
            && self.is_for_rent.map_or(true, |v| point.is_for_rent == v)
            && self
                .is_open_to_talking
                .map_or(true, |v| point.is_open_to_talking == v)
            && self.is_claimed.map_or(true, |v| point.is_claimed == v)
            && self
                .claimed_by_user_id
                .as_ref()
                .map_or(true, |v| &point.claimed_by_user_id == v)
    }
}

/// All pending overrides, keyed by property id. Owned by the app shell;
/// never merged into the canonical point set.
#[derive(Debug, Default)]
pub struct OverrideStore {
    overrides: HashMap<String, IntentOverride>,
}

impl OverrideStore {
    pub fn get(&self, id: &str) -> Option<&IntentOverride> {
        self.overrides.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    pub fn merge(&mut self, id: &str, patch: IntentOverride) {
        let entry = self.overrides.entry(id.to_string()).or_default();
        if patch.is_for_sale.is_some() {
            entry.is_for_sale = patch.is_for_sale;
        }
        if patch.is_for_rent.is_some() {
            entry.is_for_rent = patch.is_for_rent;
        }
        if patch.is_open_to_talking.is_some() {
            entry.is_open_to_talking = patch.is_open_to_talking;
        }
        if patch.is_claimed.is_some() {
            entry.is_claimed = patch.is_claimed;
        }
        if patch.claimed_by_user_id.is_some() {
            entry.claimed_by_user_id = patch.claimed_by_user_id;
        }
    }

    pub fn resolve(&self, point: &PropertyPoint) -> PropertyPoint {
        match self.overrides.get(&point.id) {
            Some(patch) => patch.apply(point),
            None => point.clone(),
        }
    }

    pub fn clear(&mut self, id: &str) {
        self.overrides.remove(id);
    }

    /// Drop overrides that a fresh fetch has confirmed. Called after each
    /// successful point-set replacement.
    pub fn reconcile(&mut self, points: &[PropertyPoint]) {
        if self.overrides.is_empty() {
            return;
        }
        for point in points {
            if let Some(patch) = self.overrides.get(&point.id) {
                if patch.confirmed_by(point) {
                    self.overrides.remove(&point.id);
                }
            }
        }
    }
}

/// Resolved visual state of a marker, in ascending paint order. Later
/// variants draw on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PropertyStatus {
    Unclaimed,
    Claimed,
    OpenToTalking,
    ForRent,
    ForSale,
    Owned,
}

impl PropertyStatus {
    /// Highest-precedence state wins: viewer-owned, then for-sale, for-rent,
    /// open-to-talking, claimed-by-other, unclaimed.
    pub fn resolve(point: &PropertyPoint, current_user: Option<&str>) -> PropertyStatus {
        let owned = match (current_user, &point.claimed_by_user_id) {
            (Some(me), Some(claimant)) => me == claimant,
            _ => false,
        };
        if owned {
            PropertyStatus::Owned
        } else if point.is_for_sale {
            PropertyStatus::ForSale
        } else if point.is_for_rent {
            PropertyStatus::ForRent
        } else if point.is_open_to_talking {
            PropertyStatus::OpenToTalking
        } else if point.is_claimed {
            PropertyStatus::Claimed
        } else {
            PropertyStatus::Unclaimed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(id: &str) -> PropertyPoint {
        PropertyPoint {
            id: id.to_string(),
            lat: 54.97,
            lon: -1.61,
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

    #[test]
    fn from_row_accepts_minimal_row() {
        let row = json!({"id": "p1", "lat": 54.9, "lon": -1.6});
        let point = PropertyPoint::from_row(&row).unwrap();
        assert_eq!(point.id, "p1");
        assert!(!point.is_claimed);
    }

    #[test]
    fn from_row_rejects_missing_coordinates() {
        assert!(PropertyPoint::from_row(&json!({"id": "p1", "lat": 54.9})).is_none());
        assert!(PropertyPoint::from_row(&json!({"lat": 54.9, "lon": -1.6})).is_none());
        assert!(PropertyPoint::from_row(&json!("not an object")).is_none());
    }

    #[test]
    fn from_row_normalises_claimed_against_claimant() {
        let row = json!({"id": "p1", "lat": 54.9, "lon": -1.6,
            "claimed_by_user_id": "u1", "is_claimed": false});
        let point = PropertyPoint::from_row(&row).unwrap();
        assert!(point.is_claimed);
    }

    #[test]
    fn display_label_fallback_chain() {
        let mut p = point("p1");
        p.house_number = Some("12".into());
        p.street = Some("High St".into());
        p.postcode = Some("NE1 4AB".into());
        assert_eq!(p.display_label(), "12 High St, NE1 4AB");

        p.house_number = None;
        assert_eq!(p.display_label(), "High St, NE1 4AB");

        p.street = None;
        assert_eq!(p.display_label(), "NE1 4AB");

        p.postcode = None;
        assert_eq!(p.display_label(), "Home");
    }

    #[test]
    fn override_wins_over_canonical_state() {
        let mut p = point("p1");
        p.is_claimed = true;

        let mut store = OverrideStore::default();
        store.merge(
            "p1",
            IntentOverride {
                is_open_to_talking: Some(true),
                ..Default::default()
            },
        );

        let merged = store.resolve(&p);
        assert_eq!(
            PropertyStatus::resolve(&merged, None),
            PropertyStatus::OpenToTalking
        );
    }

    #[test]
    fn reconcile_clears_confirmed_overrides_only() {
        let mut store = OverrideStore::default();
        store.merge(
            "p1",
            IntentOverride {
                is_for_sale: Some(true),
                ..Default::default()
            },
        );
        store.merge(
            "p2",
            IntentOverride {
                is_for_rent: Some(true),
                ..Default::default()
            },
        );

        let mut confirmed = point("p1");
        confirmed.is_for_sale = true;
        let unconfirmed = point("p2");

        store.reconcile(&[confirmed, unconfirmed]);
        assert!(store.get("p1").is_none());
        assert!(store.get("p2").is_some());
    }

    #[test]
    fn status_precedence_owned_beats_sale() {
        let mut p = point("p1");
        p.claimed_by_user_id = Some("me".into());
        p.is_claimed = true;
        p.is_for_sale = true;
        assert_eq!(
            PropertyStatus::resolve(&p, Some("me")),
            PropertyStatus::Owned
        );
        assert_eq!(
            PropertyStatus::resolve(&p, Some("someone-else")),
            PropertyStatus::ForSale
        );
    }
}
