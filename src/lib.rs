// camcatalog - dashcam footage catalog core
//
// Turns a recorder's footage tree into a queryable catalog of clips with
// embedded telemetry, and produces derived media on demand: thumbnails,
// streaming transcodes, and multi-camera grid exports. The HTTP facade
// lives outside this crate; it consumes the catalog, the engines, and the
// guards exposed here.

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod export;
pub mod guards;
pub mod scan;
pub mod sei;
pub mod thumbs;
pub mod tools;
pub mod transcode;

pub use config::Config;
pub use error::{CatalogError, Result};
pub use export::{ExportEngine, ExportRequest};
pub use scan::ScannerService;
pub use thumbs::ThumbnailCache;
pub use transcode::Transcoder;
