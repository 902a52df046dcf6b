// File discovery: filename grammar, directory classification, tree walk

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use walkdir::WalkDir;

use crate::db::schema::{Camera, ClipKind};

/// Recorder filename format:
/// Standard: 2019-01-21_14-15-20-front.mp4
/// With MS:  2019-01-21_14-15-20_123456-front.mp4 (or _front.mp4)
fn filename_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2})(?:[_-]\d+)?[_-]([A-Za-z0-9_]+)\.mp4$")
            .unwrap()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedName {
    /// Wall-clock capture time, zone not yet applied.
    pub timestamp: NaiveDateTime,
    pub camera: Camera,
}

/// Parse a video filename. Anything failing the grammar, including an
/// unknown camera suffix, is ignored by the scanner.
pub fn parse_video_filename(name: &str) -> Option<ParsedName> {
    let caps = filename_regex().captures(name)?;
    let timestamp = NaiveDateTime::parse_from_str(&caps[1], "%Y-%m-%d_%H-%M-%S").ok()?;
    let camera = Camera::parse(&caps[2])?;
    Some(ParsedName { timestamp, camera })
}

/// A directory is an event directory when it carries an `event.json` sidecar
/// or sits under the recorder's SentryClips/SavedClips trees.
pub fn is_event_dir(dir: &Path) -> bool {
    if dir.join("event.json").is_file() {
        return true;
    }
    !matches!(clip_kind_for_dir(dir), ClipKind::Recent)
}

/// Clip kind from the ancestry. Anything outside SentryClips/SavedClips is
/// background footage, event sidecar or not.
pub fn clip_kind_for_dir(dir: &Path) -> ClipKind {
    for comp in dir.components() {
        match comp.as_os_str().to_str() {
            Some("SentryClips") => return ClipKind::Sentry,
            Some("SavedClips") => return ClipKind::Saved,
            _ => {}
        }
    }
    ClipKind::Recent
}

/// Video files of one directory that pass the grammar, re-read from disk.
pub fn list_video_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if parse_video_filename(name).is_some() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Classified cold-scan view of the whole footage tree.
#[derive(Debug, Default)]
pub struct ScanTree {
    pub event_dirs: HashMap<PathBuf, Vec<PathBuf>>,
    pub recent_files: Vec<PathBuf>,
}

pub fn discover_tree(root: &Path) -> ScanTree {
    let mut tree = ScanTree::default();

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if parse_video_filename(name).is_none() {
            continue;
        }
        let Some(dir) = path.parent() else { continue };

        if is_event_dir(dir) {
            tree.event_dirs
                .entry(dir.to_path_buf())
                .or_default()
                .push(path.to_path_buf());
        } else {
            tree.recent_files.push(path.to_path_buf());
        }
    }

    tree.recent_files.sort();
    tree
}
