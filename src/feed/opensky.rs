//! Blocking HTTP adapter for the OpenSky "all states" endpoint.

use std::time::Instant;

use reqwest::blocking::Client;

use super::{FeedSnapshot, FeedSource};
use crate::types::{BoundingBox, SyncConfig};
use crate::{FlightsyncError, Result};

/// Polls one bounding box per `fetch`, bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct OpenSkyFeed {
    client: Client,
    endpoint: String,
    bounding_box: BoundingBox,
}

impl OpenSkyFeed {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout())
            .build()
            .map_err(|err| FlightsyncError::Fetch {
                reason: format!("http client init failed: {err}"),
            })?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            bounding_box: config.bounding_box,
        })
    }

    fn query(&self) -> [(&'static str, String); 4] {
        [
            ("lamin", self.bounding_box.lamin.to_string()),
            ("lamax", self.bounding_box.lamax.to_string()),
            ("lomin", self.bounding_box.lomin.to_string()),
            ("lomax", self.bounding_box.lomax.to_string()),
        ]
    }
}

impl FeedSource for OpenSkyFeed {
    fn fetch(&self) -> Result<FeedSnapshot> {
        let start = Instant::now();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&self.query())
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|err| FlightsyncError::Fetch {
                reason: if err.is_timeout() {
                    format!("request timed out: {err}")
                } else {
                    err.to_string()
                },
            })?;
        let body = response.bytes().map_err(|err| FlightsyncError::Fetch {
            reason: format!("reading response body failed: {err}"),
        })?;
        let snapshot = FeedSnapshot::from_json_slice(&body)?;
        tracing::debug!(
            target: "flightsync::feed",
            states = snapshot.states.len(),
            feed.time = snapshot.time,
            feed.bytes = body.len(),
            feed.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "feed snapshot fetched"
        );
        Ok(snapshot)
    }
}
