// Export engine
//
// Combines the requested camera views of one clip into a single MP4 under
// CONFIG_PATH/exports. Jobs run on their own threads behind a bounded
// admission counter; status records live in memory and expire an hour after
// creation regardless of outcome.

pub mod builder;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::constants::{
    EXPORT_CLEANUP_INTERVAL, EXPORT_STATUS_TTL_SECS, MAX_CONCURRENT_EXPORTS,
    MAX_EXPORT_DURATION_SECS,
};
use crate::db::create_dir_0755;
use crate::db::schema::{self, Camera};
use crate::error::{CatalogError, Result};
use crate::tools;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ExportRequest {
    pub clip_id: i64,
    pub cameras: Vec<String>,
    /// Offset into the clip, seconds.
    pub start_time_s: f64,
    pub duration_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportStatus {
    pub job_id: String,
    pub state: JobState,
    /// Output filename relative to the exports directory, once completed.
    pub file_name: Option<String>,
    pub error: Option<String>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

pub struct ExportEngine {
    db: Arc<Mutex<Connection>>,
    exports_dir: PathBuf,
    jobs: Mutex<HashMap<String, ExportStatus>>,
    active: Mutex<usize>,
    gpu: OnceLock<bool>,
}

impl ExportEngine {
    pub fn new(db: Arc<Mutex<Connection>>, exports_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            db,
            exports_dir,
            jobs: Mutex::new(HashMap::new()),
            active: Mutex::new(0),
            gpu: OnceLock::new(),
        })
    }

    /// Pin the GPU probe result instead of running nvidia-smi on first use.
    pub fn with_gpu(db: Arc<Mutex<Connection>>, exports_dir: PathBuf, gpu: bool) -> Arc<Self> {
        let engine = Self::new(db, exports_dir);
        let _ = engine.gpu.set(gpu);
        engine
    }

    fn use_gpu(&self) -> bool {
        *self.gpu.get_or_init(|| {
            let detected = Command::new(tools::nvidia_smi_path())
                .arg("-L")
                .output()
                .map(|out| out.status.success())
                .unwrap_or(false);
            if detected {
                log::info!("export: NVIDIA GPU detected, NVENC enabled");
            } else {
                log::info!("export: no NVIDIA GPU, using CPU encoding");
            }
            detected
        })
    }

    /// Validate and admit an export job. Synchronous rejections: invalid
    /// parameters, unknown clip, no resolvable camera, or a full engine.
    pub fn queue(self: &Arc<Self>, req: ExportRequest) -> Result<String> {
        let cameras = validate_request(&req)?;

        let (clip, inputs) = {
            let conn = self.db.lock().unwrap();
            let detail = schema::get_clip_detail(&conn, req.clip_id)?
                .ok_or_else(|| CatalogError::NotFound(format!("clip {}", req.clip_id)))?;

            // First file per camera, files already in segment order.
            let mut by_camera: HashMap<Camera, PathBuf> = HashMap::new();
            for vf in &detail.video_files {
                by_camera
                    .entry(vf.camera)
                    .or_insert_with(|| PathBuf::from(&vf.file_path));
            }

            // Requested cameras missing from the clip are dropped.
            let inputs: Vec<PathBuf> = cameras
                .iter()
                .filter_map(|cam| by_camera.get(cam).cloned())
                .collect();
            (detail.clip, inputs)
        };

        if inputs.is_empty() {
            return Err(CatalogError::InvalidInput(
                "no video files for the requested cameras".to_string(),
            ));
        }
        if inputs.len() > builder::MAX_LAYOUT_INPUTS {
            log::warn!(
                "export of clip {}: {} inputs requested, grid holds {}",
                req.clip_id,
                inputs.len(),
                builder::MAX_LAYOUT_INPUTS
            );
        }

        // Admission: the slot is taken here, in the queueing call, and given
        // back when the job thread finishes.
        {
            let mut active = self.active.lock().unwrap();
            if *active >= MAX_CONCURRENT_EXPORTS {
                return Err(CatalogError::ServerBusy);
            }
            *active += 1;
        }

        let job_id = format!(
            "export_{}_{}",
            req.clip_id,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let file_name = format!(
            "clip_{}_{}.mp4",
            clip.start_time.format("%Y%m%d_%H%M%S"),
            job_id
        );

        self.jobs.lock().unwrap().insert(
            job_id.clone(),
            ExportStatus {
                job_id: job_id.clone(),
                state: JobState::Pending,
                file_name: None,
                error: None,
                created_at: Utc::now(),
            },
        );

        let engine = Arc::clone(self);
        let thread_job_id = job_id.clone();
        let spawned = std::thread::Builder::new()
            .name("export-job".into())
            .spawn(move || {
                let _slot = ActiveGuard(Arc::clone(&engine));
                engine.run_job(&thread_job_id, &inputs, &req, &file_name);
            });
        if let Err(e) = spawned {
            *self.active.lock().unwrap() -= 1;
            self.set_failed(&job_id, "Export failed");
            log::error!("failed to spawn export job thread: {}", e);
        }

        Ok(job_id)
    }

    fn run_job(&self, job_id: &str, inputs: &[PathBuf], req: &ExportRequest, file_name: &str) {
        self.set_state(job_id, JobState::Processing);

        if let Err(e) = create_dir_0755(&self.exports_dir) {
            log::error!("failed to create exports dir: {}", e);
            self.set_failed(job_id, "Export failed");
            return;
        }

        let output_path = self.exports_dir.join(file_name);
        let input_refs: Vec<&std::path::Path> = inputs.iter().map(|p| p.as_path()).collect();
        let args = builder::build_export_args(
            &input_refs,
            req.start_time_s,
            req.duration_s,
            self.use_gpu(),
            &output_path,
        );

        log::info!("export {} running: ffmpeg {}", job_id, args.join(" "));
        let output = Command::new(tools::ffmpeg_path()).args(&args).output();

        match output {
            Ok(out) if out.status.success() => {
                let mut jobs = self.jobs.lock().unwrap();
                if let Some(status) = jobs.get_mut(job_id) {
                    status.state = JobState::Completed;
                    status.file_name = Some(file_name.to_string());
                }
                log::info!("export {} completed", job_id);
            }
            Ok(out) => {
                log::error!(
                    "export {} encoder failed: {}",
                    job_id,
                    String::from_utf8_lossy(&out.stderr)
                );
                self.set_failed(job_id, "Encoding failed");
            }
            Err(e) => {
                log::error!("export {} failed to start encoder: {}", job_id, e);
                self.set_failed(job_id, "Encoding failed");
            }
        }
    }

    /// Status snapshot; expired records read as gone.
    pub fn status(&self, job_id: &str) -> Option<ExportStatus> {
        let mut jobs = self.jobs.lock().unwrap();
        let status = jobs.get(job_id)?;
        if is_expired(status, Utc::now()) {
            jobs.remove(job_id);
            return None;
        }
        Some(status.clone())
    }

    /// Drop every status record past its TTL.
    pub fn prune_expired(&self) {
        let now = Utc::now();
        self.jobs
            .lock()
            .unwrap()
            .retain(|_, status| !is_expired(status, now));
    }

    pub fn active_jobs(&self) -> usize {
        *self.active.lock().unwrap()
    }

    /// Periodic sweeper for status records nobody polls anymore.
    pub fn start_cleanup_thread(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("export-cleanup".into())
            .spawn(move || loop {
                std::thread::sleep(EXPORT_CLEANUP_INTERVAL);
                engine.prune_expired();
            });
        if let Err(e) = spawned {
            log::error!("failed to spawn export-cleanup thread: {}", e);
        }
    }

    fn set_state(&self, job_id: &str, state: JobState) {
        if let Some(status) = self.jobs.lock().unwrap().get_mut(job_id) {
            status.state = state;
        }
    }

    fn set_failed(&self, job_id: &str, public_error: &str) {
        if let Some(status) = self.jobs.lock().unwrap().get_mut(job_id) {
            status.state = JobState::Failed;
            status.error = Some(public_error.to_string());
        }
    }
}

/// Gives the admission slot back when the job thread ends, however it ends.
struct ActiveGuard(Arc<ExportEngine>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        *self.0.active.lock().unwrap() -= 1;
    }
}

fn is_expired(status: &ExportStatus, now: DateTime<Utc>) -> bool {
    (now - status.created_at).num_seconds() > EXPORT_STATUS_TTL_SECS
}

fn validate_request(req: &ExportRequest) -> Result<Vec<Camera>> {
    if req.duration_s <= 0.0 {
        return Err(CatalogError::InvalidInput(
            "duration must be positive".to_string(),
        ));
    }
    if req.duration_s > MAX_EXPORT_DURATION_SECS {
        return Err(CatalogError::InvalidInput(format!(
            "duration must be at most {} seconds",
            MAX_EXPORT_DURATION_SECS
        )));
    }
    if req.start_time_s < 0.0 {
        return Err(CatalogError::InvalidInput(
            "start time must not be negative".to_string(),
        ));
    }
    if req.cameras.is_empty() {
        return Err(CatalogError::InvalidInput(
            "at least one camera is required".to_string(),
        ));
    }

    let mut cameras = Vec::new();
    for raw in &req.cameras {
        let camera = Camera::parse(raw)
            .ok_or_else(|| CatalogError::InvalidInput(format!("unknown camera: {}", raw)))?;
        if !cameras.contains(&camera) {
            cameras.push(camera);
        }
    }
    Ok(cameras)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::db::schema::{ClipKind, NewClip, NewVideoFile};
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn engine_with_clip() -> (TempDir, Arc<ExportEngine>, i64) {
        let tmp = TempDir::new().unwrap();
        let conn = Arc::new(Mutex::new(db::open_in_memory().unwrap()));
        let clip_id = {
            let conn = conn.lock().unwrap();
            let (clip, _) = schema::get_or_create_clip(
                &conn,
                &NewClip {
                    start_utc: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
                    start_offset_min: 0,
                    kind: ClipKind::Sentry,
                    city: String::new(),
                    reason: String::new(),
                    event_time: None,
                },
            )
            .unwrap();
            schema::insert_video_file(
                &conn,
                &NewVideoFile {
                    clip_id: clip.id,
                    camera: Camera::Front,
                    file_path: "/footage/a-front.mp4".to_string(),
                    segment_time: clip.start_utc(),
                },
            )
            .unwrap();
            clip.id
        };
        let engine = ExportEngine::with_gpu(conn, tmp.path().join("exports"), false);
        (tmp, engine, clip_id)
    }

    fn request(clip_id: i64) -> ExportRequest {
        ExportRequest {
            clip_id,
            cameras: vec!["front".to_string()],
            start_time_s: 0.0,
            duration_s: 10.0,
        }
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        let base = request(1);

        let mut req = base.clone();
        req.duration_s = 0.0;
        assert!(matches!(
            validate_request(&req),
            Err(CatalogError::InvalidInput(_))
        ));

        let mut req = base.clone();
        req.duration_s = -10.0;
        assert!(validate_request(&req).is_err());

        let mut req = base.clone();
        req.duration_s = 1201.0;
        assert!(validate_request(&req).is_err());

        let mut req = base.clone();
        req.start_time_s = -1.0;
        assert!(validate_request(&req).is_err());

        let mut req = base.clone();
        req.cameras = Vec::new();
        assert!(validate_request(&req).is_err());

        let mut req = base.clone();
        req.cameras = vec!["dashboard".to_string()];
        assert!(validate_request(&req).is_err());

        // Boundary: exactly the cap is fine, case is ignored.
        let mut req = base;
        req.duration_s = 1200.0;
        req.cameras = vec!["FRONT".to_string(), "Left_Repeater".to_string()];
        let cameras = validate_request(&req).unwrap();
        assert_eq!(cameras, vec![Camera::Front, Camera::LeftRepeater]);
    }

    #[test]
    fn unknown_clip_is_not_found() {
        let (_tmp, engine, _) = engine_with_clip();
        let err = engine.queue(request(9999)).unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[test]
    fn missing_cameras_are_dropped_but_one_must_resolve() {
        let (_tmp, engine, clip_id) = engine_with_clip();

        // Clip only has Front footage.
        let mut req = request(clip_id);
        req.cameras = vec!["back".to_string(), "cabin".to_string()];
        let err = engine.queue(req).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidInput(_)));
    }

    #[test]
    fn full_engine_answers_busy_synchronously() {
        let (_tmp, engine, clip_id) = engine_with_clip();
        *engine.active.lock().unwrap() = MAX_CONCURRENT_EXPORTS;

        let err = engine.queue(request(clip_id)).unwrap_err();
        assert!(err.is_busy());

        *engine.active.lock().unwrap() = 0;
    }

    #[test]
    fn queued_job_is_trackable_and_carries_the_clip_timestamp() {
        let (_tmp, engine, clip_id) = engine_with_clip();
        let job_id = engine.queue(request(clip_id)).unwrap();
        assert!(job_id.starts_with(&format!("export_{}_", clip_id)));

        // Pending, processing, or already failed (no real encoder in tests);
        // the record must exist either way.
        let status = engine.status(&job_id).expect("job status");
        assert_eq!(status.job_id, job_id);
    }

    #[test]
    fn status_expires_after_ttl() {
        let (_tmp, engine, _) = engine_with_clip();
        engine.jobs.lock().unwrap().insert(
            "export_1_deadbeef".to_string(),
            ExportStatus {
                job_id: "export_1_deadbeef".to_string(),
                state: JobState::Completed,
                file_name: Some("clip_x.mp4".to_string()),
                error: None,
                created_at: Utc::now() - Duration::seconds(EXPORT_STATUS_TTL_SECS + 60),
            },
        );

        assert!(engine.status("export_1_deadbeef").is_none());
        // And the record is gone for good.
        assert!(engine.jobs.lock().unwrap().is_empty());
    }

    #[test]
    fn prune_drops_only_expired_records() {
        let (_tmp, engine, _) = engine_with_clip();
        let mut old = ExportStatus {
            job_id: "old".to_string(),
            state: JobState::Failed,
            file_name: None,
            error: None,
            created_at: Utc::now() - Duration::seconds(EXPORT_STATUS_TTL_SECS + 1),
        };
        {
            let mut jobs = engine.jobs.lock().unwrap();
            jobs.insert("old".to_string(), old.clone());
            old.job_id = "fresh".to_string();
            old.created_at = Utc::now();
            jobs.insert("fresh".to_string(), old);
        }

        engine.prune_expired();
        let jobs = engine.jobs.lock().unwrap();
        assert!(!jobs.contains_key("old"));
        assert!(jobs.contains_key("fresh"));
    }
}
