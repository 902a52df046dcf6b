// On-demand streaming transcoder
//
// A bounded number of concurrent ffmpeg sessions stream fragmented MP4 to
// the caller. Admission is non-blocking: a full table answers server-busy
// immediately. Dropping a session kills the encoder and frees its slot.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::constants::MAX_TRANSCODE_SESSIONS;
use crate::error::{CatalogError, Result};
use crate::tools;

// ----- Admission control -----

/// Counting semaphore with non-blocking acquire and saturating release.
#[derive(Debug)]
pub struct Slots {
    capacity: usize,
    available: Mutex<usize>,
}

impl Slots {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            available: Mutex::new(capacity),
        })
    }

    /// Take a slot if one is free; never blocks.
    pub fn try_acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        let mut available = self.available.lock().unwrap();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(SlotGuard {
            slots: Arc::clone(self),
            released: AtomicBool::new(false),
        })
    }

    /// Return a slot. Saturates at capacity, so a spurious call is a no-op
    /// rather than a panic.
    fn release(&self) {
        let mut available = self.available.lock().unwrap();
        if *available < self.capacity {
            *available += 1;
        }
    }

    pub fn in_use(&self) -> usize {
        self.capacity - *self.available.lock().unwrap()
    }
}

/// Releases its slot exactly once, on drop or on an explicit call.
#[derive(Debug)]
pub struct SlotGuard {
    slots: Arc<Slots>,
    released: AtomicBool,
}

impl SlotGuard {
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.slots.release();
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.release();
    }
}

// ----- Quality profiles -----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    P1080,
    P720,
    P480,
}

impl Quality {
    /// Unknown labels fall back to the lowest profile.
    pub fn parse(raw: &str) -> Quality {
        match raw {
            "1080p" => Quality::P1080,
            "720p" => Quality::P720,
            "480p" => Quality::P480,
            _ => Quality::P480,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Quality::P1080 => 1080,
            Quality::P720 => 720,
            Quality::P480 => 480,
        }
    }

    pub fn bitrate(&self) -> &'static str {
        match self {
            Quality::P1080 => "4M",
            Quality::P720 => "2M",
            Quality::P480 => "1M",
        }
    }
}

// ----- Encoder selection -----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderChoice {
    pub nvenc: bool,
}

impl EncoderChoice {
    pub fn codec(&self) -> &'static str {
        if self.nvenc {
            "h264_nvenc"
        } else {
            "libx264"
        }
    }

    pub fn preset(&self) -> &'static str {
        if self.nvenc {
            "p1"
        } else {
            "ultrafast"
        }
    }
}

/// Decide from ffmpeg's advertised encoder listing.
pub fn parse_encoder_listing(listing: &str) -> EncoderChoice {
    EncoderChoice {
        nvenc: listing.contains("h264_nvenc"),
    }
}

fn probe_encoders() -> EncoderChoice {
    let output = Command::new(tools::ffmpeg_path())
        .args(["-hide_banner", "-encoders"])
        .output();
    match output {
        Ok(out) => {
            let listing = String::from_utf8_lossy(&out.stdout);
            let choice = parse_encoder_listing(&listing);
            if choice.nvenc {
                log::info!("transcoder: NVENC detected and enabled");
            } else {
                log::info!("transcoder: NVENC not found, using libx264");
            }
            choice
        }
        Err(e) => {
            log::warn!("failed to probe ffmpeg encoders: {}, using libx264", e);
            EncoderChoice { nvenc: false }
        }
    }
}

// ----- Sessions -----

/// One live streaming session. Reading yields fragmented MP4; dropping the
/// session kills the encoder and releases the admission slot.
#[derive(Debug)]
pub struct TranscodeSession {
    child: Child,
    stdout: ChildStdout,
    _guard: SlotGuard,
}

impl Read for TranscodeSession {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl Drop for TranscodeSession {
    fn drop(&mut self) {
        // Reader gone or caller canceled: stop the encoder. The slot guard
        // releases itself afterwards.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub struct Transcoder {
    slots: Arc<Slots>,
    encoder: OnceLock<EncoderChoice>,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcoder {
    pub fn new() -> Self {
        Self {
            slots: Slots::new(MAX_TRANSCODE_SESSIONS),
            encoder: OnceLock::new(),
        }
    }

    /// Pin the encoder choice instead of probing ffmpeg on first use.
    pub fn with_encoder(choice: EncoderChoice) -> Self {
        let t = Self::new();
        let _ = t.encoder.set(choice);
        t
    }

    pub fn encoder(&self) -> EncoderChoice {
        *self.encoder.get_or_init(probe_encoders)
    }

    pub fn sessions_in_use(&self) -> usize {
        self.slots.in_use()
    }

    /// Start a streaming re-encode of `input` at the requested quality.
    /// Returns server-busy when all session slots are taken. On a spawn
    /// failure the slot is released before the error is returned.
    pub fn transcode_stream(&self, input: &Path, quality: &str) -> Result<TranscodeSession> {
        let guard = self
            .slots
            .try_acquire()
            .ok_or(CatalogError::ServerBusy)?;

        let q = Quality::parse(quality);
        let encoder = self.encoder();

        let mut cmd = Command::new(tools::ffmpeg_path());
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        if encoder.nvenc {
            cmd.args(["-hwaccel", "cuda"]);
        }
        cmd.arg("-i").arg(input);
        cmd.args(["-vf", &format!("scale=-2:{}", q.height())]);
        cmd.args(["-c:v", encoder.codec()]);
        cmd.args(["-b:v", q.bitrate()]);
        cmd.args(["-preset", encoder.preset()]);
        // Fragmented MP4 to stdout for progressive playback
        cmd.args(["-f", "mp4", "-movflags", "frag_keyframe+empty_moov", "-"]);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // `guard` is still owned here: any early return below drops it and
        // frees the slot.
        let mut child = cmd
            .spawn()
            .map_err(|e| CatalogError::Encoder(format!("failed to start ffmpeg: {}", e)))?;

        let stdout = match child.stdout.take() {
            Some(out) => out,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CatalogError::Encoder("ffmpeg stdout unavailable".to_string()));
            }
        };

        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_drain(stderr);
        }

        log::info!(
            "transcoding {} at {}p via {}",
            input.display(),
            q.height(),
            encoder.codec()
        );

        Ok(TranscodeSession {
            child,
            stdout,
            _guard: guard,
        })
    }
}

fn spawn_stderr_drain(stderr: impl Read + Send + 'static) {
    let result = std::thread::Builder::new()
        .name("ffmpeg-stderr".into())
        .spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(line) if !line.is_empty() => log::warn!("ffmpeg: {}", line),
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = result {
        log::error!("failed to spawn ffmpeg-stderr thread: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_enforce_the_session_bound() {
        let slots = Slots::new(4);
        let mut guards: Vec<_> = (0..4).map(|_| slots.try_acquire().unwrap()).collect();
        assert!(slots.try_acquire().is_none(), "5th acquire must fail");

        guards.pop();
        assert!(slots.try_acquire().is_some(), "release frees a slot");
    }

    #[test]
    fn slot_release_is_idempotent() {
        let slots = Slots::new(2);
        let guard = slots.try_acquire().unwrap();
        guard.release();
        guard.release();
        drop(guard);
        assert_eq!(slots.in_use(), 0);
    }

    #[test]
    fn spurious_release_saturates_instead_of_panicking() {
        let slots = Slots::new(1);
        slots.release();
        slots.release();
        assert_eq!(slots.in_use(), 0);
        // The semaphore still only admits its capacity.
        let _guard = slots.try_acquire().unwrap();
        assert!(slots.try_acquire().is_none());
    }

    #[test]
    fn unknown_quality_falls_back_to_480p() {
        assert_eq!(Quality::parse("999p"), Quality::P480);
        assert_eq!(Quality::parse(""), Quality::P480);
        assert_eq!(Quality::parse("1080p"), Quality::P1080);
        assert_eq!(Quality::parse("720p"), Quality::P720);
    }

    #[test]
    fn quality_profiles() {
        assert_eq!(Quality::P1080.height(), 1080);
        assert_eq!(Quality::P1080.bitrate(), "4M");
        assert_eq!(Quality::P720.height(), 720);
        assert_eq!(Quality::P720.bitrate(), "2M");
        assert_eq!(Quality::P480.height(), 480);
        assert_eq!(Quality::P480.bitrate(), "1M");
    }

    #[test]
    fn encoder_listing_detection() {
        let with_nvenc = "V....D h264_nvenc NVIDIA NVENC H.264 encoder\nV..... libx264";
        assert!(parse_encoder_listing(with_nvenc).nvenc);
        assert_eq!(parse_encoder_listing(with_nvenc).codec(), "h264_nvenc");
        assert_eq!(parse_encoder_listing(with_nvenc).preset(), "p1");

        let cpu_only = "V..... libx264 H.264 / AVC";
        assert!(!parse_encoder_listing(cpu_only).nvenc);
        assert_eq!(parse_encoder_listing(cpu_only).codec(), "libx264");
        assert_eq!(parse_encoder_listing(cpu_only).preset(), "ultrafast");
    }

    #[test]
    fn full_transcoder_answers_busy_without_spawning() {
        let transcoder = Transcoder::with_encoder(EncoderChoice { nvenc: false });
        let _held: Vec<_> = (0..MAX_TRANSCODE_SESSIONS)
            .map(|_| transcoder.slots.try_acquire().unwrap())
            .collect();

        let err = transcoder
            .transcode_stream(Path::new("/footage/a.mp4"), "720p")
            .unwrap_err();
        assert!(err.is_busy());
        assert_eq!(transcoder.sessions_in_use(), MAX_TRANSCODE_SESSIONS);
    }
}
