// External tool resolution for ffmpeg and nvidia-smi
//
// Resolution order:
// 1) Environment variable override (CAMCATALOG_FFMPEG_PATH, CAMCATALOG_NVIDIA_SMI_PATH)
// 2) PATH lookup by bare name

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

static FFMPEG_PATH: OnceLock<PathBuf> = OnceLock::new();
static NVIDIA_SMI_PATH: OnceLock<PathBuf> = OnceLock::new();

fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(env_key) {
        if !v.trim().is_empty() {
            return PathBuf::from(v);
        }
    }
    PathBuf::from(default_name)
}

/// Path (or bare name for PATH lookup) of the ffmpeg binary.
pub fn ffmpeg_path() -> &'static PathBuf {
    FFMPEG_PATH.get_or_init(|| resolve_tool("CAMCATALOG_FFMPEG_PATH", "ffmpeg"))
}

/// Path of the nvidia-smi binary used by the GPU probe.
pub fn nvidia_smi_path() -> &'static PathBuf {
    NVIDIA_SMI_PATH.get_or_init(|| resolve_tool("CAMCATALOG_NVIDIA_SMI_PATH", "nvidia-smi"))
}
