use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Context, Error, Result},
    settings::Settings,
};

/// Settings file names, checked in order.
const SETTINGS_FILENAMES: &[&str] = &["doozer.toml", "doozer.yaml", "doozer.yml", "doozer.json"];

/// Load settings from `path` (TOML, YAML or JSON by extension).
///
/// Defaults are applied after the file so that file values win.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value = parse_settings(&substitute_env(&raw), path)?;

    let mut settings = Settings::new();
    settings.merge_value(&value)?;
    settings.apply_defaults();
    debug!(path = %path.display(), keys = settings.len(), "loaded settings");
    Ok(settings)
}

/// Load settings from the first file found in the standard locations.
///
/// Search order:
/// 1. `./doozer.{toml,yaml,yml,json}`
/// 2. `<user config dir>/doozer/doozer.{toml,yaml,yml,json}`
///
/// Falls back to [`Settings::with_defaults`] when nothing is found or the
/// file cannot be parsed.
pub fn discover() -> Settings {
    let Some(path) = find_settings_file() else {
        debug!("no settings file found, using defaults");
        return Settings::with_defaults();
    };
    match load_settings(&path) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load settings, using defaults");
            Settings::with_defaults()
        },
    }
}

/// The user-global settings directory.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "doozer").map(|d| d.config_dir().to_path_buf())
}

fn find_settings_file() -> Option<PathBuf> {
    let local = SETTINGS_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| SETTINGS_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

fn parse_settings(raw: &str, path: &Path) -> Result<serde_json::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}
