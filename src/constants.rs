// Shared tunables. Changing any of these alters on-disk or wire behavior.

use std::time::Duration;

// Default paths (overridable via environment, see config.rs)
pub const DEFAULT_FOOTAGE_PATH: &str = "/footage";
pub const DEFAULT_CONFIG_PATH: &str = "/config";
pub const DEFAULT_TIMEZONE: &str = "Australia/Adelaide";
pub const DEFAULT_PORT: u16 = 8080;

// Persisted state layout under CONFIG_PATH
pub const DB_FILENAME: &str = "teslacam.db";
pub const THUMBNAILS_FOLDER: &str = "thumbnails";
pub const EXPORTS_FOLDER: &str = "exports";

// Scanner
pub const SCAN_WORKERS: usize = 5;
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);
/// Start-to-start gap between camera-sets that still counts as continuous
/// recording. Each set spans ~60 s, so 65 s start-to-start implies an
/// on-disk gap of at most ~5 s.
pub const CLIP_MERGE_WINDOW_SECS: i64 = 65;

// SEI extraction
pub const NAL_TYPE_SEI: u8 = 6;
pub const SEI_PAYLOAD_USER_DATA_UNREGISTERED: u8 = 5;
/// Upper bound on a single SEI NAL before we refuse to buffer it.
pub const MAX_SEI_NAL_SIZE: u32 = 1024 * 1024;

// Transcoder
pub const MAX_TRANSCODE_SESSIONS: usize = 4;

// Thumbnails
pub const THUMB_MIN_WIDTH: u32 = 10;
pub const THUMB_MAX_WIDTH: u32 = 1920;
pub const THUMB_DEFAULT_WIDTH: u32 = 480;

// Export engine
pub const MAX_CONCURRENT_EXPORTS: usize = 3;
pub const MAX_EXPORT_DURATION_SECS: f64 = 1200.0;
pub const EXPORT_STATUS_TTL_SECS: i64 = 3600;
pub const EXPORT_CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

// Telemetry
pub const MPS_TO_MPH: f32 = 2.23694;
