// Scanner: cold scan plus live watching of the footage tree
//
// The cold scan classifies the whole tree, pushes event directories through
// a fixed-width worker pool and the recent files through one batch pass.
// The watcher feeds per-directory debounce timers; when a directory goes
// quiet it is re-read from disk (authoritative) and processed the same way.

pub mod discover;
pub mod grouping;
pub mod process;
pub mod sidecar;
pub mod timezone;


use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use rusqlite::Connection;

use crate::constants::{DEBOUNCE_WINDOW, SCAN_WORKERS};
use crate::error::Result;

pub use process::SeiExtractorFn;
use process::ProcessCtx;
use timezone::TzResolver;

#[derive(Default)]
struct PendingDir {
    files: Vec<PathBuf>,
    /// Bumped on every re-arm; a timer only fires if its generation is
    /// still current, which is how a re-arm cancels the previous timer.
    generation: u64,
}

pub struct ScannerService {
    footage_root: PathBuf,
    db: Arc<Mutex<Connection>>,
    tz: Arc<TzResolver>,
    extractor: SeiExtractorFn,
    pending: Mutex<HashMap<PathBuf, PendingDir>>,
}

impl ScannerService {
    pub fn new(footage_root: PathBuf, db: Arc<Mutex<Connection>>, tz: Arc<TzResolver>) -> Self {
        Self {
            footage_root,
            db,
            tz,
            extractor: Arc::new(|path| crate::sei::extract(path)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Swap in a different telemetry extractor (tests, dry runs).
    pub fn with_extractor(mut self, extractor: SeiExtractorFn) -> Self {
        self.extractor = extractor;
        self
    }

    fn ctx(&self) -> ProcessCtx<'_> {
        ProcessCtx {
            db: &self.db,
            tz: &self.tz,
            extractor: &self.extractor,
        }
    }

    /// Full cold scan of the footage tree. Event directories are processed
    /// in parallel through a fixed-width pool; recent files go through one
    /// batch so continuity can cross directory boundaries. Per-directory
    /// failures are logged and skipped.
    pub fn scan_all(&self) {
        log::info!("starting full scan of {}", self.footage_root.display());
        let started = Instant::now();

        let tree = discover::discover_tree(&self.footage_root);
        let jobs: Mutex<Vec<(PathBuf, Vec<PathBuf>)>> =
            Mutex::new(tree.event_dirs.into_iter().collect());

        std::thread::scope(|scope| {
            for _ in 0..SCAN_WORKERS {
                scope.spawn(|| loop {
                    let job = jobs.lock().unwrap().pop();
                    let Some((dir, files)) = job else { break };
                    if let Err(e) = process::process_event_dir(&self.ctx(), &dir, &files) {
                        log::warn!("event directory {} failed: {}", dir.display(), e);
                    }
                });
            }
        });

        if !tree.recent_files.is_empty() {
            log::info!("processing {} recent files", tree.recent_files.len());
            if let Err(e) = process::process_recent_files(&self.ctx(), &tree.recent_files) {
                log::warn!("recent batch failed: {}", e);
            }
        }

        log::info!("scan complete in {:?}", started.elapsed());
    }

    /// Re-read one directory from disk and process it.
    pub fn scan_dir(&self, dir: &Path) -> Result<()> {
        let files = discover::list_video_files(dir)?;
        if files.is_empty() {
            return Ok(());
        }
        if discover::is_event_dir(dir) {
            process::process_event_dir(&self.ctx(), dir, &files)
        } else {
            process::process_recent_files(&self.ctx(), &files)
        }
    }

    /// Watch the footage root recursively for create events. The returned
    /// watcher handle owns the subscription; dropping it stops the feed.
    pub fn start_watcher(self: &Arc<Self>) -> Result<notify::RecommendedWatcher> {
        let svc = Arc::clone(self);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_)) {
                    for path in &event.paths {
                        svc.handle_create(path);
                    }
                }
            }
            Err(e) => log::warn!("watcher error: {}", e),
        })?;
        watcher.watch(&self.footage_root, RecursiveMode::Recursive)?;
        log::info!("watching {}", self.footage_root.display());
        Ok(watcher)
    }

    fn handle_create(self: &Arc<Self>, path: &Path) {
        // New directories are covered by the recursive watch.
        if path.is_dir() {
            log::info!("new directory detected: {}", path.display());
            return;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let Some(dir) = path.parent().map(Path::to_path_buf) else {
            return;
        };

        // Sidecar creation reprocesses the directory immediately.
        if name.eq_ignore_ascii_case("event.json") {
            log::info!("sidecar detected: {}", path.display());
            let svc = Arc::clone(self);
            spawn_named("sidecar-rescan", move || {
                if let Err(e) = svc.scan_dir(&dir) {
                    log::warn!("sidecar rescan of {} failed: {}", dir.display(), e);
                }
            });
            return;
        }

        if discover::parse_video_filename(name).is_none() {
            return;
        }

        let generation = {
            let mut pending = self.pending.lock().unwrap();
            let entry = pending.entry(dir.clone()).or_default();
            let path = path.to_path_buf();
            if !entry.files.contains(&path) {
                entry.files.push(path);
            }
            entry.generation += 1;
            entry.generation
        };
        log::info!("new file queued for processing: {}", name);

        let svc = Arc::clone(self);
        spawn_named("scan-debounce", move || {
            std::thread::sleep(DEBOUNCE_WINDOW);
            let fired = {
                let mut pending = svc.pending.lock().unwrap();
                // A newer generation means the timer was re-armed; this one
                // stands down.
                let current = pending.get(&dir).map(|e| e.generation) == Some(generation);
                if current {
                    pending.remove(&dir)
                } else {
                    None
                }
            };
            if let Some(entry) = fired {
                log::info!(
                    "processing update for {} ({} pending files)",
                    dir.display(),
                    entry.files.len()
                );
                if let Err(e) = svc.scan_dir(&dir) {
                    log::warn!("rescan of {} failed: {}", dir.display(), e);
                }
            }
        });
    }
}

fn spawn_named(name: &str, f: impl FnOnce() + Send + 'static) {
    if let Err(e) = std::thread::Builder::new().name(name.into()).spawn(f) {
        log::error!("failed to spawn {} thread: {}", name, e);
    }
}
