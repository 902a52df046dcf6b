// Group processors: turn classified files into catalog rows
//
// Everything here coordinates through the catalog only; directory workers
// share no other state. Natural-key upserts make the outcome independent of
// worker interleaving.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rusqlite::Connection;

use crate::constants::{CLIP_MERGE_WINDOW_SECS, MPS_TO_MPH};
use crate::db::schema::{
    self, Camera, ClipKind, NewClip, NewVideoFile, TelemetryUpdate,
};
use crate::error::Result;
use crate::sei::TelemetryFrame;

use super::discover;
use super::grouping::{continuity_groups, ScanFile};
use super::sidecar::EventSidecar;
use super::timezone::{local_to_fixed, TzResolver};

/// Injectable telemetry extractor, defaulting to `sei::extract`.
pub type SeiExtractorFn = Arc<dyn Fn(&Path) -> Result<Vec<TelemetryFrame>> + Send + Sync>;

pub struct ProcessCtx<'a> {
    pub db: &'a Mutex<Connection>,
    pub tz: &'a TzResolver,
    pub extractor: &'a SeiExtractorFn,
}

/// Resolve grammar-passing paths into zone-aware scan files. Paths whose
/// names fail the grammar are dropped here as a second line of defense.
fn parse_scan_files(paths: &[PathBuf], zone: Tz) -> Vec<ScanFile> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(parsed) = discover::parse_video_filename(name) else {
            continue;
        };
        let local = local_to_fixed(parsed.timestamp, zone);
        files.push(ScanFile {
            path: path.clone(),
            camera: parsed.camera,
            segment_time: local.with_timezone(&Utc),
            offset_min: local.offset().local_minus_utc() / 60,
        });
    }
    files
}

/// Process one event directory: sidecar metadata, continuity grouping, clip
/// upserts, file attachment, telemetry aggregation.
pub fn process_event_dir(ctx: &ProcessCtx<'_>, dir: &Path, paths: &[PathBuf]) -> Result<()> {
    let sidecar = EventSidecar::load(dir);

    let (lat, lon) = sidecar
        .as_ref()
        .map(|s| (s.lat(), s.lon()))
        .unwrap_or((0.0, 0.0));
    let has_coords = lat != 0.0 || lon != 0.0;
    let zone = ctx.tz.resolve(lat, lon);

    let mut city = sidecar.as_ref().map(|s| s.city.clone()).unwrap_or_default();
    if city.is_empty() && has_coords {
        city = format!("{:.4}, {:.4}", lat, lon);
    }
    let reason = sidecar
        .as_ref()
        .map(|s| s.reason.clone())
        .unwrap_or_default();
    let event_time = sidecar.as_ref().and_then(|s| s.event_time(zone));

    let kind = discover::clip_kind_for_dir(dir);

    let files = parse_scan_files(paths, zone);
    if files.is_empty() {
        return Ok(());
    }
    let groups = continuity_groups(files);

    // The sidecar timestamp belongs to the group that was recording when the
    // event fired: the last group starting at or before it, else the first.
    let event_group = event_time
        .map(|t| {
            let event_utc = t.with_timezone(&Utc);
            groups
                .iter()
                .rposition(|g| g[0].segment_time <= event_utc)
                .unwrap_or(0)
        })
        .unwrap_or(0);

    for (i, group) in groups.iter().enumerate() {
        let group_event = if i == event_group { event_time } else { None };
        let clip_id = {
            let conn = ctx.db.lock().unwrap();
            let (clip, created) = schema::get_or_create_clip(
                &conn,
                &NewClip {
                    start_utc: group[0].segment_time,
                    start_offset_min: group[0].offset_min,
                    kind,
                    city: city.clone(),
                    reason: reason.clone(),
                    event_time: group_event,
                },
            )?;
            if !created {
                schema::update_clip_on_rescan(&conn, clip.id, group_event, &city, &reason)?;
            }

            // Sidecar coordinates stand in for telemetry until the SEI
            // aggregation below finds real frames.
            if clip.telemetry_id.is_none() && has_coords {
                schema::upsert_clip_telemetry(
                    &conn,
                    clip.id,
                    &TelemetryUpdate {
                        latitude: lat,
                        longitude: lon,
                        ..Default::default()
                    },
                )?;
            }

            add_files_to_clip(&conn, clip.id, group)?;
            clip.id
        };
        aggregate_telemetry(ctx, clip_id)?;
    }
    Ok(())
}

/// Process recent (background) files: continuity grouping plus the
/// cross-directory merge lookback against the catalog.
pub fn process_recent_files(ctx: &ProcessCtx<'_>, paths: &[PathBuf]) -> Result<()> {
    let zone = ctx.tz.resolve(0.0, 0.0);
    let files = parse_scan_files(paths, zone);
    if files.is_empty() {
        return Ok(());
    }

    for group in continuity_groups(files) {
        let start = group[0].segment_time;
        let clip_id = {
            let conn = ctx.db.lock().unwrap();
            let clip = find_or_create_recent_clip(&conn, start, group[0].offset_min)?;
            add_files_to_clip(&conn, clip, &group)?;
            clip
        };
        aggregate_telemetry(ctx, clip_id)?;
    }
    Ok(())
}

/// Adopt the clip that was still recording within the merge window before
/// `start`, if any; otherwise find or create the clip keyed by
/// `(start, Recent)`.
fn find_or_create_recent_clip(
    conn: &Connection,
    start: DateTime<Utc>,
    offset_min: i32,
) -> Result<i64> {
    let lookback_from = start - Duration::seconds(CLIP_MERGE_WINDOW_SECS);
    if let Some(vf) = schema::latest_recent_video_in_range(conn, lookback_from, start)? {
        if let Some(clip) = schema::get_clip(conn, vf.clip_id)? {
            return Ok(clip.id);
        }
    }

    let (clip, _) = schema::get_or_create_clip(
        conn,
        &NewClip {
            start_utc: start,
            start_offset_min: offset_min,
            kind: ClipKind::Recent,
            city: String::new(),
            reason: String::new(),
            event_time: None,
        },
    )?;
    Ok(clip.id)
}

/// Attach a group's files to a clip. One bulk existence query per clip,
/// never one per file.
fn add_files_to_clip(conn: &Connection, clip_id: i64, files: &[ScanFile]) -> Result<()> {
    let existing = schema::video_paths_for_clip(conn, clip_id)?;
    for file in files {
        let path = file.path.to_string_lossy().to_string();
        if existing.contains(&path) {
            continue;
        }
        schema::insert_video_file(
            conn,
            &NewVideoFile {
                clip_id,
                camera: file.camera,
                file_path: path,
                segment_time: file.segment_time,
            },
        )?;
    }
    Ok(())
}

/// Run the extractor over all Front files of the clip in segment order,
/// concatenate, and publish one telemetry row. Summary scalars come from
/// the middle frame of the concatenation. Extraction failures degrade the
/// clip's telemetry; they never fail the clip.
fn aggregate_telemetry(ctx: &ProcessCtx<'_>, clip_id: i64) -> Result<()> {
    let (city, front_paths) = {
        let conn = ctx.db.lock().unwrap();
        let clip = match schema::get_clip(&conn, clip_id)? {
            Some(c) => c,
            None => return Ok(()),
        };
        let front: Vec<PathBuf> = schema::video_files_for_clip(&conn, clip_id)?
            .into_iter()
            .filter(|f| f.camera == Camera::Front)
            .map(|f| PathBuf::from(f.file_path))
            .collect();
        (clip.city, front)
    };

    if front_paths.is_empty() {
        return Ok(());
    }

    let mut frames: Vec<TelemetryFrame> = Vec::new();
    for path in &front_paths {
        match (ctx.extractor)(path) {
            Ok(extracted) => frames.extend(extracted),
            Err(e) => log::warn!(
                "telemetry extraction failed for {}: {}",
                path.display(),
                e
            ),
        }
    }

    if frames.is_empty() {
        return Ok(());
    }

    let sample = &frames[frames.len() / 2];
    let update = TelemetryUpdate {
        speed_mph: sample.vehicle_speed_mps * MPS_TO_MPH,
        gear: sample.gear().as_str().to_string(),
        latitude: sample.latitude_deg,
        longitude: sample.longitude_deg,
        steering_angle: sample.steering_wheel_angle,
        autopilot_state: sample.autopilot().as_str().to_string(),
        full_series_json: serde_json::to_string(&frames)?,
    };

    let conn = ctx.db.lock().unwrap();
    schema::upsert_clip_telemetry(&conn, clip_id, &update)?;
    if city.is_empty() && (sample.latitude_deg != 0.0 || sample.longitude_deg != 0.0) {
        let formatted = format!("{:.4}, {:.4}", sample.latitude_deg, sample.longitude_deg);
        schema::set_clip_city_if_empty(&conn, clip_id, &formatted)?;
    }
    Ok(())
}
