// Event sidecar parsing
//
// Recorders write `event.json` next to the footage of a triggered event.
// Every key is optional and the coordinate fields arrive as either JSON
// numbers or numeric strings depending on firmware version.

use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use chrono_tz::Tz;
use serde::Deserialize;

use super::timezone::local_to_fixed;

/// Coordinate value that may be a number or a numeric string. String parse
/// failures coerce to 0 silently (recorder behavior).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LatLon {
    Number(f64),
    NumericString(String),
}

impl LatLon {
    pub fn to_f64(&self) -> f64 {
        match self {
            LatLon::Number(n) => *n,
            LatLon::NumericString(s) => s.trim().parse().unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventSidecar {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub est_lat: Option<LatLon>,
    #[serde(default)]
    pub est_lon: Option<LatLon>,
}

impl EventSidecar {
    /// Read `event.json` from a directory. A missing or malformed sidecar
    /// downgrades to None; the directory is then treated as sidecar-less.
    pub fn load(dir: &Path) -> Option<EventSidecar> {
        let path = dir.join("event.json");
        let content = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&content) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                log::warn!("malformed sidecar {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn lat(&self) -> f64 {
        self.est_lat.as_ref().map(LatLon::to_f64).unwrap_or(0.0)
    }

    pub fn lon(&self) -> f64 {
        self.est_lon.as_ref().map(LatLon::to_f64).unwrap_or(0.0)
    }

    pub fn has_coordinates(&self) -> bool {
        self.lat() != 0.0 || self.lon() != 0.0
    }

    /// Trigger timestamp: first as local-naive in the resolved zone, then as
    /// offset-bearing ISO 8601.
    pub fn event_time(&self, zone: Tz) -> Option<DateTime<FixedOffset>> {
        if self.timestamp.is_empty() {
            return None;
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S") {
            return Some(local_to_fixed(naive, zone));
        }
        DateTime::parse_from_rfc3339(&self.timestamp).ok()
    }
}
