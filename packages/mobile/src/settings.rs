use std::path::PathBuf;
use std::time::Duration;

use api::BaasConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct Push {
    /// Push project the device token is requested for; unset skips registration.
    pub project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Badge {
    pub debounce_ms: u64,
}

impl Badge {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Storage {
    /// Secure store directory; defaults to the platform data dir.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub baas: BaasConfig,
    #[serde(default)]
    pub push: Push,
    pub badge: Badge,
    #[serde(default)]
    pub storage: Storage,
}

impl Settings {
    /// Defaults, then `campus.toml` if present, then `CAMPUS_*` variables
    /// (`CAMPUS_BAAS__ANON_KEY` sets `baas.anon_key`).
    pub(crate) fn new() -> Result<Self, ConfigError> {
        let builder = Self::defaults()?
            .add_source(
                File::with_name("campus.toml")
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("CAMPUS")
                    .prefix_separator("_")
                    .separator("__"),
            );
        builder.build()?.try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("baas.timeout_secs", 30)?
            .set_default("badge.debounce_ms", 300)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env::set_var;

    fn from_toml(toml: &str) -> Result<Settings, ConfigError> {
        Settings::defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn test_file_settings() {
        let settings = from_toml(
            r#"
            [baas]
            url = "https://proj.example.co"
            anon_key = "anon"

            [push]
            project_id = "campus-push"
            "#,
        )
        .unwrap();
        assert_eq!(settings.baas.url, "https://proj.example.co");
        assert_eq!(settings.baas.timeout_secs, 30);
        assert_eq!(settings.push.project_id.as_deref(), Some("campus-push"));
        assert_eq!(settings.badge.debounce(), Duration::from_millis(300));
        assert!(settings.storage.dir.is_none());
    }

    #[test]
    fn test_missing_backend_url_fails() {
        assert!(from_toml("[baas]\nanon_key = \"anon\"").is_err());
    }

    #[test]
    fn test_env_settings() {
        set_var("CAMPUS_BAAS__URL", "http://localhost:54321");
        set_var("CAMPUS_BAAS__ANON_KEY", "local-anon");
        set_var("CAMPUS_BADGE__DEBOUNCE_MS", "50");
        let settings = Settings::new().unwrap();
        assert_eq!(settings.baas.url, "http://localhost:54321");
        assert_eq!(settings.baas.anon_key, "local-anon");
        assert_eq!(settings.badge.debounce_ms, 50);
    }
}
