// Operator CLI: run the scanner and exercise the derivation engines from a
// shell. The HTTP facade is a separate deployable; this binary is for
// headless boxes and debugging.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use camcatalog::db;
use camcatalog::export::{ExportEngine, ExportRequest, JobState};
use camcatalog::scan::timezone::TzResolver;
use camcatalog::scan::ScannerService;
use camcatalog::thumbs::ThumbnailCache;
use camcatalog::Config;

#[derive(Parser)]
#[command(name = "camcatalog", about = "Dashcam footage catalog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cold-scan the footage tree and print a summary
    Scan,
    /// Cold-scan, then keep watching for new footage
    Watch,
    /// Queue one export job and wait for it
    Export {
        clip_id: i64,
        /// Comma-separated camera names, e.g. front,back,left_repeater
        #[arg(long, default_value = "front")]
        cameras: String,
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        #[arg(long, default_value_t = 60.0)]
        duration: f64,
    },
    /// Write one thumbnail frame to a file
    Thumb {
        video: PathBuf,
        #[arg(long, default_value = "0.1")]
        time: String,
        #[arg(long, default_value = "480")]
        width: String,
        #[arg(long, default_value = "thumb.jpg")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let conn = db::open_db(&config.db_path())
        .with_context(|| format!("opening catalog at {}", config.db_path().display()))?;
    let db = Arc::new(Mutex::new(conn));

    match cli.command {
        Commands::Scan => {
            scanner(&config, &db).scan_all();
            print_summary(&db)?;
        }
        Commands::Watch => {
            let svc = Arc::new(scanner(&config, &db));
            svc.scan_all();
            let _watcher = svc.start_watcher()?;
            log::info!("watching for new footage, ctrl-c to stop");
            loop {
                std::thread::sleep(Duration::from_secs(3600));
            }
        }
        Commands::Export {
            clip_id,
            cameras,
            start,
            duration,
        } => {
            let engine = ExportEngine::new(Arc::clone(&db), config.exports_dir());
            let job_id = engine
                .queue(ExportRequest {
                    clip_id,
                    cameras: cameras.split(',').map(str::to_string).collect(),
                    start_time_s: start,
                    duration_s: duration,
                })
                .map_err(|e| anyhow::anyhow!(e.public_message()))?;
            println!("queued {}", job_id);

            loop {
                std::thread::sleep(Duration::from_millis(500));
                let Some(status) = engine.status(&job_id) else {
                    bail!("job disappeared");
                };
                match status.state {
                    JobState::Completed => {
                        println!(
                            "done: {}",
                            config
                                .exports_dir()
                                .join(status.file_name.unwrap_or_default())
                                .display()
                        );
                        break;
                    }
                    JobState::Failed => {
                        bail!(status.error.unwrap_or_else(|| "Export failed".to_string()))
                    }
                    JobState::Pending | JobState::Processing => {}
                }
            }
        }
        Commands::Thumb {
            video,
            time,
            width,
            out,
        } => {
            let cache = ThumbnailCache::new(&config.config_path);
            let bytes = cache
                .thumbnail(&video, &time, &width)
                .map_err(|e| anyhow::anyhow!(e.public_message()))?;
            std::fs::write(&out, bytes)?;
            println!("wrote {}", out.display());
        }
    }
    Ok(())
}

fn scanner(config: &Config, db: &Arc<Mutex<rusqlite::Connection>>) -> ScannerService {
    let tz = Arc::new(TzResolver::new(&config.default_timezone));
    ScannerService::new(config.footage_path.clone(), Arc::clone(db), tz)
}

fn print_summary(db: &Arc<Mutex<rusqlite::Connection>>) -> Result<()> {
    let conn = db.lock().unwrap();
    let clips = camcatalog::db::schema::list_clips(&conn)?;
    println!("{} clips", clips.len());
    for summary in clips.iter().take(20) {
        println!(
            "  #{} {} {} [{} files]{}",
            summary.clip.id,
            summary.clip.start_time.format("%Y-%m-%d %H:%M:%S %z"),
            summary.clip.kind,
            summary.video_files.len(),
            if summary.clip.city.is_empty() {
                String::new()
            } else {
                format!(" @ {}", summary.clip.city)
            }
        );
    }
    Ok(())
}
