use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "ksimport.toml";
pub const ENV_PREFIX: &str = "KSIMPORT_";

/// Smallest progress queue that still absorbs a burst of snapshots.
pub const MIN_PROGRESS_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub keystore_directory: PathBuf,
    pub start_directory: Option<PathBuf>,
    pub password_file_extension: String,
    pub max_password_attempts: u32,
    pub progress_capacity: usize,
    pub progress_poll_ms: u64,
    pub password_poll_ms: u64,
    pub progress_send_timeout_ms: u64,
    pub simulation: bool,
    pub verbose: bool,
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            keystore_directory: PathBuf::from("./keystores"),
            start_directory: None,
            password_file_extension: "pwd".to_string(),
            max_password_attempts: 3,
            progress_capacity: 256,
            progress_poll_ms: 1000,
            password_poll_ms: 100,
            progress_send_timeout_ms: 50,
            simulation: false,
            verbose: false,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Load defaults, then the TOML file, then `KSIMPORT_*` variables, then `args`.
    ///
    /// `args` is any serializable set of CLI overrides; unset flags must be
    /// skipped during serialization so they don't clobber lower layers.
    pub fn new<T: Serialize>(config_file: Option<&Path>, args: Option<&T>) -> Result<Self> {
        let mut figment = Self::figment(config_file);
        if let Some(args) = args {
            figment = figment.merge(Serialized::defaults(args));
        }

        let config: AppConfig = figment
            .extract()
            .context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(config_file: Option<&Path>) -> Figment {
        let file = config_file.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_password_attempts > 0,
            "max_password_attempts must be at least 1"
        );
        ensure!(
            self.progress_capacity >= MIN_PROGRESS_CAPACITY,
            "progress_capacity must be at least {MIN_PROGRESS_CAPACITY}, got {}",
            self.progress_capacity
        );
        ensure!(self.progress_poll_ms > 0, "progress_poll_ms must be positive");
        ensure!(self.password_poll_ms > 0, "password_poll_ms must be positive");
        ensure!(
            !self.password_file_extension.is_empty(),
            "password_file_extension must not be empty"
        );
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[derive(Serialize)]
    struct Overrides {
        #[serde(skip_serializing_if = "Option::is_none")]
        max_password_attempts: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        simulation: Option<bool>,
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.password_file_extension, "pwd");
        assert_eq!(config.progress_capacity, 256);
    }

    #[test]
    fn layers_apply_in_order() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                    keystore_directory = "/var/lib/keys"
                    max_password_attempts = 5
                    progress_poll_ms = 250
                "#,
            )?;
            jail.set_env("KSIMPORT_MAX_PASSWORD_ATTEMPTS", "7");
            jail.set_env("KSIMPORT_SIMULATION", "true");

            let args = Overrides {
                max_password_attempts: Some(9),
                simulation: None,
            };
            let config = AppConfig::new(None, Some(&args)).map_err(|e| e.to_string())?;

            assert_eq!(config.keystore_directory, PathBuf::from("/var/lib/keys"));
            assert_eq!(config.progress_poll_ms, 250);
            assert_eq!(config.max_password_attempts, 9);
            assert!(config.simulation);
            Ok(())
        });
    }

    #[test]
    fn rejects_small_progress_capacity() {
        Jail::expect_with(|jail| {
            jail.set_env("KSIMPORT_PROGRESS_CAPACITY", "10");
            let err = AppConfig::new::<Overrides>(None, None).unwrap_err();
            assert!(format!("{err:#}").contains("progress_capacity"));
            Ok(())
        });
    }

    #[test]
    fn rejects_zero_attempts_and_poll() {
        let config = AppConfig {
            max_password_attempts: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            password_poll_ms: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn renders_as_toml() {
        let rendered = AppConfig::default().to_toml().unwrap();
        assert!(rendered.contains("password_file_extension = \"pwd\""));
        assert!(!rendered.contains("start_directory"));
    }
}
