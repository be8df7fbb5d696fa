//! Bus-stop reference data: fetched once, shared read-only.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusStop {
    pub id: u64,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

/// Read-only stop list. Clones share the same allocation.
#[derive(Debug, Clone)]
pub struct StopDirectory {
    stops: Arc<[BusStop]>,
}

impl Default for StopDirectory {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl StopDirectory {
    pub fn new(stops: Vec<BusStop>) -> Self {
        Self {
            stops: stops.into(),
        }
    }

    pub fn all(&self) -> &[BusStop] {
        &self.stops
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&BusStop> {
        self.stops.iter().find(|stop| stop.id == id)
    }

    /// Case-insensitive substring match on stop names. A blank query yields
    /// no suggestions.
    pub fn search(&self, query: &str) -> Vec<&BusStop> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.stops
            .iter()
            .filter(|stop| stop.name.to_lowercase().contains(&needle))
            .collect()
    }
}

/// Fetch the stop list (a JSON array of stops).
pub async fn fetch_stops(client: &reqwest::Client, url: &str) -> Result<StopDirectory> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to reach stop list at {}", url))?
        .error_for_status()
        .with_context(|| format!("Stop list request to {} failed", url))?;

    let stops: Vec<BusStop> = response
        .json()
        .await
        .context("Failed to decode stop list")?;

    info!(count = stops.len(), url = %url, "Loaded bus stops");
    Ok(StopDirectory::new(stops))
}
