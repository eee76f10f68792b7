use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    schema::{JobkeeperConfig, StorageKind},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "jobkeeper.toml",
    "jobkeeper.yaml",
    "jobkeeper.yml",
    "jobkeeper.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<JobkeeperConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./jobkeeper.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/jobkeeper/jobkeeper.{toml,yaml,yml,json}` (user-global)
///
/// Returns `JobkeeperConfig::default()` if no config file is found.
pub fn discover_and_load() -> JobkeeperConfig {
    let mut cfg = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                JobkeeperConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            JobkeeperConfig::default()
        },
    };
    apply_env_overrides(&mut cfg, |name| std::env::var(name).ok());
    cfg
}

/// Apply `JOBKEEPER_STORAGE_KIND` and `JOBKEEPER_DATABASE_URL` on top of the file config.
pub fn apply_env_overrides(cfg: &mut JobkeeperConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(kind) = lookup("JOBKEEPER_STORAGE_KIND") {
        match kind.parse::<StorageKind>() {
            Ok(kind) => cfg.storage.kind = kind,
            Err(e) => warn!(error = %e, "ignoring JOBKEEPER_STORAGE_KIND"),
        }
    }
    if let Some(url) = lookup("JOBKEEPER_DATABASE_URL") {
        cfg.storage.database.url = url;
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .or_else(|| {
            let dir = config_dir()?;
            CONFIG_FILENAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|p| p.exists())
        })
}

/// Returns the user-global config directory (`~/.config/jobkeeper/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "jobkeeper").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<JobkeeperConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
