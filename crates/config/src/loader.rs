use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{env_subst::substitute_env, schema::CachegateConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "cachegate.toml",
    "cachegate.yaml",
    "cachegate.yml",
    "cachegate.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<CachegateConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))
}

/// Discover and load config for a workspace.
///
/// Search order:
/// 1. `<workspace_root>/cachegate.{toml,yaml,yml,json}`
/// 2. `~/.config/cachegate/cachegate.{toml,yaml,yml,json}` (user-global)
///
/// Returns `CachegateConfig::default()` if no config file exists. A file that
/// exists but does not parse is an error; a broken cache config must not be
/// silently replaced by defaults.
pub fn discover_and_load(workspace_root: &Path) -> anyhow::Result<CachegateConfig> {
    match find_config_file(workspace_root) {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path)
        },
        None => {
            debug!("no config file found, using defaults");
            Ok(CachegateConfig::default())
        },
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file(workspace_root: &Path) -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(|name| workspace_root.join(name));
    let global = user_config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns `~/.config/cachegate/` on all platforms.
pub fn user_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("cachegate"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<CachegateConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
