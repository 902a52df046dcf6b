// Environment-derived configuration
//
// All knobs come from the environment so the same image runs against any
// recorder mount. Derived directories are created on first use (mode 0755
// where the platform honors it).

use std::env;
use std::path::{Path, PathBuf};

use crate::constants::{
    DB_FILENAME, DEFAULT_CONFIG_PATH, DEFAULT_FOOTAGE_PATH, DEFAULT_PORT, DEFAULT_TIMEZONE,
    EXPORTS_FOLDER, THUMBNAILS_FOLDER,
};

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the recorder's footage tree (read-only to us).
    pub footage_path: PathBuf,
    /// Root for the catalog database and derived artifacts.
    pub config_path: PathBuf,
    /// IANA zone name used when a directory carries no location hint.
    pub default_timezone: String,
    /// Listen port for the external HTTP facade.
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            footage_path: env_path("FOOTAGE_PATH", DEFAULT_FOOTAGE_PATH),
            config_path: env_path("CONFIG_PATH", DEFAULT_CONFIG_PATH),
            default_timezone: env_nonempty("DEFAULT_TIMEZONE")
                .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            port: env_nonempty("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.config_path.join(DB_FILENAME)
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.config_path.join(THUMBNAILS_FOLDER)
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.config_path.join(EXPORTS_FOLDER)
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env_nonempty(key)
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(default).to_path_buf())
}

fn env_nonempty(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_env_unset() {
        // Build directly off the default constants rather than mutating the
        // process environment (tests run in parallel).
        let cfg = Config {
            footage_path: PathBuf::from(DEFAULT_FOOTAGE_PATH),
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            default_timezone: DEFAULT_TIMEZONE.to_string(),
            port: DEFAULT_PORT,
        };
        assert_eq!(cfg.db_path(), PathBuf::from("/config/teslacam.db"));
        assert_eq!(cfg.thumbnails_dir(), PathBuf::from("/config/thumbnails"));
        assert_eq!(cfg.exports_dir(), PathBuf::from("/config/exports"));
    }
}
