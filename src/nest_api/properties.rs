use futures::future::BoxFuture;
use thiserror::Error;

use crate::map::geo::GeoBounds;
use crate::map::property::{FilterState, PropertyPoint};

/// One bounded, filtered read against the property backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyQuery {
    pub bounds: GeoBounds,
    pub filters: FilterState,
}

/// A successful backend response. `truncated` means the backend hit its
/// result cap and the viewport holds more data than was returned.
#[derive(Debug, Clone, Default)]
pub struct PropertyBatch {
    pub points: Vec<PropertyPoint>,
    pub truncated: bool,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("bad response: {0}")]
    BadResponse(String),

    /// Superseded by a newer request. Not an error; dropped silently.
    #[error("request cancelled")]
    Cancelled,
}

/// The only thing the pipeline assumes about storage: a bounding-box
/// filtered read returning stable-id records.
pub trait PropertyBackend: Send + Sync {
    fn fetch_properties(
        &self,
        query: PropertyQuery,
    ) -> BoxFuture<'static, Result<PropertyBatch, FetchError>>;
}

/// HTTP client for the Nest property API.
#[derive(Debug, Clone)]
pub struct NestClient {
    client: reqwest::Client,
    base_url: String,
}

impl NestClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    fn query_url(&self, query: &PropertyQuery) -> String {
        let bounds = &query.bounds;
        let filters = &query.filters;
        // active-records-first ordering so the backend's cap drops
        // low-signal rows, not claimed or open homes
        format!(
            "{}/api/properties?north={}&south={}&east={}&west={}\
             &filter_open={}&filter_for_sale={}&filter_for_rent={}&filter_claimed={}\
             &order=activity",
            self.base_url.trim_end_matches('/'),
            bounds.north(),
            bounds.south(),
            bounds.east(),
            bounds.west(),
            filters.open_to_talking,
            filters.for_sale,
            filters.for_rent,
            filters.claimed.as_query_value(),
        )
    }

    fn parse_batch(body: &[u8]) -> Result<PropertyBatch, FetchError> {
        let json: serde_json::Value = serde_json::from_slice(body)
            .map_err(|err| FetchError::BadResponse(format!("invalid json: {err}")))?;

        if let Some(message) = json.get("error").and_then(|e| e.as_str()) {
            return Err(FetchError::BadResponse(message.to_string()));
        }

        let rows = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| FetchError::BadResponse("missing data array".to_string()))?;

        // Individually malformed rows are dropped, not fatal for the batch.
        let points: Vec<PropertyPoint> = rows.iter().filter_map(PropertyPoint::from_row).collect();
        if points.len() < rows.len() {
            log::warn!("dropped {} malformed property rows", rows.len() - points.len());
        }

        let truncated = json
            .get("truncated")
            .and_then(|t| t.as_bool())
            .unwrap_or(false);

        Ok(PropertyBatch { points, truncated })
    }
}

impl PropertyBackend for NestClient {
    fn fetch_properties(
        &self,
        query: PropertyQuery,
    ) -> BoxFuture<'static, Result<PropertyBatch, FetchError>> {
        let url = self.query_url(&query);
        let client = self.client.clone();
        Box::pin(async move {
            log::debug!("fetching properties: {url}");
            // Non-2xx statuses are transport failures; payload problems in a
            // successful response are `BadResponse`.
            let response = client.get(&url).send().await?.error_for_status()?;
            let body = response.bytes().await?;
            Self::parse_batch(&body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::property::ClaimedFilter;

    #[test]
    fn query_url_carries_bounds_and_filters() {
        let client = NestClient::new(reqwest::Client::new(), "http://localhost:3000/".into());
        let url = client.query_url(&PropertyQuery {
            bounds: GeoBounds::new(55.0, 54.9, -1.5, -1.6),
            filters: FilterState {
                open_to_talking: true,
                for_sale: false,
                for_rent: false,
                claimed: ClaimedFilter::Unclaimed,
            },
        });
        assert!(url.starts_with("http://localhost:3000/api/properties?"));
        assert!(url.contains("north=55"));
        assert!(url.contains("west=-1.6"));
        assert!(url.contains("filter_open=true"));
        assert!(url.contains("filter_claimed=unclaimed"));
        assert!(url.contains("order=activity"));
    }

    #[test]
    fn parse_batch_reads_points_and_truncation() {
        let body = br#"{"data":[
            {"id":"a","lat":54.95,"lon":-1.6},
            {"id":"b","lat":54.96,"lon":-1.61,"is_for_sale":true}
        ],"truncated":true}"#;
        let batch = NestClient::parse_batch(body).unwrap();
        assert_eq!(batch.points.len(), 2);
        assert!(batch.truncated);
        assert!(batch.points[1].is_for_sale);
    }

    #[test]
    fn parse_batch_skips_malformed_rows() {
        let body = br#"{"data":[
            {"id":"a","lat":54.95,"lon":-1.6},
            {"lat":"oops"},
            {"id":"c"}
        ],"truncated":false}"#;
        let batch = NestClient::parse_batch(body).unwrap();
        assert_eq!(batch.points.len(), 1);
        assert_eq!(batch.points[0].id, "a");
    }

    #[tokio::test]
    async fn transport_failures_surface_as_network_errors() {
        // The scheme is rejected before any I/O happens.
        let client = NestClient::new(reqwest::Client::new(), "gopher://localhost".into());
        let err = client
            .fetch_properties(PropertyQuery {
                bounds: GeoBounds::new(55.0, 54.9, -1.5, -1.6),
                filters: FilterState::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }

    #[test]
    fn parse_batch_rejects_error_payload_and_garbage() {
        assert!(matches!(
            NestClient::parse_batch(br#"{"error":"row level security"}"#),
            Err(FetchError::BadResponse(_))
        ));
        assert!(matches!(
            NestClient::parse_batch(b"<html>504</html>"),
            Err(FetchError::BadResponse(_))
        ));
        assert!(matches!(
            NestClient::parse_batch(br#"{"rows":[]}"#),
            Err(FetchError::BadResponse(_))
        ));
    }
}
