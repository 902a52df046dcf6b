// Camera-set bucketing and continuity coalescing
//
// A camera-set is the N simultaneous files sharing one segment timestamp.
// Consecutive sets whose start-to-start gap stays within the merge window
// belong to the same logical recording.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};

use crate::constants::CLIP_MERGE_WINDOW_SECS;
use crate::db::schema::Camera;

/// One grammar-passing file with its zone-resolved capture time.
#[derive(Debug, Clone)]
pub struct ScanFile {
    pub path: PathBuf,
    pub camera: Camera,
    pub segment_time: DateTime<Utc>,
    pub offset_min: i32,
}

/// Bucket files into camera-sets ordered by segment time.
pub fn camera_sets(files: Vec<ScanFile>) -> Vec<Vec<ScanFile>> {
    let mut buckets: BTreeMap<DateTime<Utc>, Vec<ScanFile>> = BTreeMap::new();
    for file in files {
        buckets.entry(file.segment_time).or_default().push(file);
    }
    buckets.into_values().collect()
}

/// Coalesce ordered camera-sets into continuity groups: a gap of more than
/// the merge window between consecutive set starts begins a new group. Each
/// returned group is flattened, ascending by segment time, and nonempty.
pub fn continuity_groups(files: Vec<ScanFile>) -> Vec<Vec<ScanFile>> {
    let sets = camera_sets(files);
    let mut groups: Vec<Vec<ScanFile>> = Vec::new();
    let window = Duration::seconds(CLIP_MERGE_WINDOW_SECS);

    let mut prev_start: Option<DateTime<Utc>> = None;
    for set in sets {
        let start = set[0].segment_time;
        let continues = prev_start
            .map(|prev| start - prev <= window)
            .unwrap_or(false);
        if continues {
            groups.last_mut().unwrap().extend(set);
        } else {
            groups.push(set);
        }
        prev_start = Some(start);
    }
    groups
}
