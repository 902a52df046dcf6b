// Thumbnail cache
//
// One JPEG frame per (video, seek time, width), cached under
// CONFIG_PATH/thumbnails keyed by a digest of the three inputs. Zero-byte
// entries are treated as corrupted leftovers and regenerated.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::constants::THUMBNAILS_FOLDER;
use crate::db::create_dir_0755;
use crate::error::{CatalogError, Result};
use crate::guards;
use crate::tools;

pub struct ThumbnailCache {
    thumb_dir: PathBuf,
}

impl ThumbnailCache {
    pub fn new(config_root: &Path) -> Self {
        Self {
            thumb_dir: config_root.join(THUMBNAILS_FOLDER),
        }
    }

    /// Stable cache location for one request. The raw time string is part of
    /// the key on purpose: "0.1" and "0.10" are distinct requests.
    pub fn cache_path(&self, video_path: &Path, time_s: &str, width: u32) -> PathBuf {
        let key = format!("{}|{}|{}", video_path.display(), time_s, width);
        let digest = blake3::hash(key.as_bytes()).to_hex();
        self.thumb_dir.join(format!("{}.jpg", digest))
    }

    /// Produce the thumbnail bytes for a video frame. `time_s` must parse as
    /// a nonnegative float; `width_raw` falls back to the default outside
    /// its allowed range.
    pub fn thumbnail(&self, video_path: &Path, time_s: &str, width_raw: &str) -> Result<Vec<u8>> {
        guards::parse_seek_seconds(time_s)?;
        let width = guards::clamp_width(width_raw);

        if !video_path.is_file() {
            return Err(CatalogError::NotFound(format!(
                "video file {}",
                video_path.display()
            )));
        }

        create_dir_0755(&self.thumb_dir)?;
        let cache_path = self.cache_path(video_path, time_s, width);

        if let Ok(meta) = fs::metadata(&cache_path) {
            if meta.len() > 0 {
                return Ok(fs::read(&cache_path)?);
            }
            // Zero bytes: a crashed generation. Drop it and redo.
            let _ = fs::remove_file(&cache_path);
        }

        self.generate(video_path, time_s, width, &cache_path)?;
        Ok(fs::read(&cache_path)?)
    }

    /// Extract a single scaled frame. Writes through a temp file so a failed
    /// run leaves nothing at the final path.
    fn generate(
        &self,
        video_path: &Path,
        time_s: &str,
        width: u32,
        cache_path: &Path,
    ) -> Result<()> {
        let tmp_path = cache_path.with_extension("tmp.jpg");
        let scale = format!("scale={}:-1", width);

        let output = Command::new(tools::ffmpeg_path())
            .arg("-y")
            .args(["-ss", time_s])
            .arg("-i")
            .arg(video_path)
            .args(["-vframes", "1", "-vf", &scale, "-q:v", "5"])
            .arg(&tmp_path)
            .output()?;

        if !output.status.success() {
            let _ = fs::remove_file(&tmp_path);
            log::warn!(
                "thumbnail generation failed for {}: {}",
                video_path.display(),
                String::from_utf8_lossy(&output.stderr)
            );
            return Err(CatalogError::Encoder(
                "thumbnail generation failed".to_string(),
            ));
        }

        fs::rename(&tmp_path, cache_path)?;
        Ok(())
    }
}
