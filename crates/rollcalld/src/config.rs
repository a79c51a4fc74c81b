use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory holding the collection files plus `faces/` and `trash/`.
    pub data_dir: PathBuf,
    /// Cosine distance below which a recognition match is accepted.
    pub match_threshold: f32,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        Self {
            data_dir,
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", 0.60),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
