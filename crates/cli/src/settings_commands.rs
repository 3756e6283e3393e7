use std::path::Path;

use {
    anyhow::{Context, Result},
    doozer_config::{Settings, discover, load_settings},
};

/// Prefix of environment variables that override settings.
pub const ENV_PREFIX: &str = "DOOZER";

/// Defaults, then the settings file, then `DOOZER_*` variables.
pub fn resolve(path: Option<&Path>) -> Result<Settings> {
    let mut settings = match path {
        Some(path) => load_settings(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => discover(),
    };
    settings.merge_env(ENV_PREFIX);
    Ok(settings)
}

pub fn print(settings: &Settings) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, doozer_config::settings::SLEEP_TIME, std::time::Duration};

    #[test]
    fn explicit_file_is_loaded_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.toml");
        std::fs::write(&path, "SLEEP_TIME = 0.5\nRETRY_THRESHOLD = 2\n").unwrap();

        let settings = resolve(Some(&path)).unwrap();

        assert_eq!(
            settings.duration_or(SLEEP_TIME, Duration::ZERO).unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(settings.optional_u32("RETRY_THRESHOLD").unwrap(), Some(2));
        assert!(settings.contains("DEBUG"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}
