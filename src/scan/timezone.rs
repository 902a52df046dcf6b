// Timezone resolution
//
// File timestamps are wall-clock in whatever zone the car was in. The zone
// comes from the sidecar's estimated coordinates when present, else the
// configured default, else UTC. The geo lookup table is built lazily; one
// resolver handle is shared process-wide.

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tzf_rs::DefaultFinder;

pub struct TzResolver {
    default_zone: Tz,
    finder: OnceLock<DefaultFinder>,
}

impl TzResolver {
    /// Build from a configured zone name; unknown names fall back to UTC.
    pub fn new(default_zone_name: &str) -> Self {
        let default_zone = default_zone_name.parse().unwrap_or_else(|_| {
            log::warn!(
                "unknown DEFAULT_TIMEZONE {:?}, falling back to UTC",
                default_zone_name
            );
            Tz::UTC
        });
        Self::with_zone(default_zone)
    }

    pub fn with_zone(default_zone: Tz) -> Self {
        Self {
            default_zone,
            finder: OnceLock::new(),
        }
    }

    /// Effective zone for a directory: coordinates first, configured default
    /// otherwise. (0, 0) counts as "no coordinates".
    pub fn resolve(&self, lat: f64, lon: f64) -> Tz {
        if lat != 0.0 || lon != 0.0 {
            let finder = self.finder.get_or_init(DefaultFinder::new);
            let name = finder.get_tz_name(lon, lat);
            if !name.is_empty() {
                if let Ok(zone) = name.parse() {
                    return zone;
                }
            }
        }
        self.default_zone
    }

    pub fn default_zone(&self) -> Tz {
        self.default_zone
    }
}

/// Interpret a wall-clock time in a zone. Around DST transitions an
/// ambiguous time takes the earlier instant and a nonexistent time the
/// later one; last resort is reading the wall clock as UTC.
pub fn local_to_fixed(naive: NaiveDateTime, zone: Tz) -> DateTime<FixedOffset> {
    let resolved = zone.from_local_datetime(&naive);
    resolved
        .earliest()
        .or_else(|| resolved.latest())
        .map(|t| t.fixed_offset())
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive).fixed_offset())
}
