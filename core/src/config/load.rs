use std::path::{Path, PathBuf};

use anyhow::Context;

use super::types::AppConfig;
use crate::backend::BackendKind;

/// Get the default xtal data directory: ~/.xtal
pub fn get_xtal_data_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".xtal"))
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str::<AppConfig>(&s)
        .with_context(|| format!("failed to parse config {}", path.display()))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: $XTAL_CONFIG
    let explicit = std::env::var_os("XTAL_CONFIG")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);

    // Priority 2: ~/.xtal/config.toml, Priority 3: ./xtal.toml
    let home_config = get_xtal_data_dir().ok().map(|d| d.join("config.toml"));
    let local_config = Path::new("xtal.toml");

    let mut cfg = if let Some(path) = explicit {
        load_from_path(&path)?
    } else if let Some(path) = home_config.filter(|p| p.exists()) {
        load_from_path(&path)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok())?;
    Ok(cfg)
}

/// Environment variable overrides (highest priority).
pub(crate) fn apply_env_overrides<F>(cfg: &mut AppConfig, var: F) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = non_empty("XTAL_MAX_CONCURRENCY") {
        cfg.manager.max_concurrency = v
            .trim()
            .parse()
            .with_context(|| format!("XTAL_MAX_CONCURRENCY is not a number: {v}"))?;
    }
    if let Some(v) = non_empty("XTAL_BACKEND") {
        cfg.manager.backend = v.trim().parse::<BackendKind>()?;
    }
    if let Some(v) = non_empty("XTAL_KEEP_WORKING_FILES") {
        cfg.external.delete_working_files = !matches!(v.trim(), "1" | "true" | "yes");
    }
    Ok(())
}
