pub mod ask;
pub mod config_cmd;
pub mod serve;

use std::path::{Path, PathBuf};

use ragchat_config::AppConfig;

/// Load the config from `path` (or the default location) with env overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let loaded = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    };
    loaded.map_err(|e| format!("Failed to load config: {e}").into())
}

/// The config file in use: `path` if given, else `~/.ragchat/config.toml`.
pub fn config_file(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}
