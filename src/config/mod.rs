mod file_config;
mod settings;

pub use file_config::{
    DownloadClientConfig, FileConfig, HealthConfig, LibraryConfig, PostProcessingConfig,
    SchedulerConfig, SearchConfig, SearchProviderConfig, SelectionConfig, SubmissionConfig,
};
pub use settings::{
    DownloadClientSettings, HealthSettings, LibrarySettings, PostProcessingSettings,
    SchedulerSettings, SearchProviderSettings, SearchSettings, SelectionSettings, Settings,
    SettingsHandle, SubmissionSettings,
};

use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    /// File the settings were loaded from, re-read on reload.
    pub config_path: Option<PathBuf>,
    pub settings: Settings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .clone()
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let settings = Settings::from_file(&file)?;

        Ok(Self {
            db_dir,
            config_path: cli.config_path.clone(),
            settings,
        })
    }

    pub fn acquisition_db_path(&self) -> PathBuf {
        self.db_dir.join("acquisition.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_with_roots() -> FileConfig {
        FileConfig::parse(
            r#"
[post_processing]
audiobook_output_path = "/srv/audiobooks"
ebook_output_path = "/srv/ebooks"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_db_dir_required() {
        let err = AppConfig::resolve(&CliConfig::default(), Some(file_with_roots())).unwrap_err();
        assert!(err.to_string().contains("db_dir"));
    }

    #[test]
    fn test_file_db_dir_overrides_cli() {
        let cli_dir = tempfile::tempdir().unwrap();
        let file_dir = tempfile::tempdir().unwrap();
        let mut file = file_with_roots();
        file.db_dir = Some(file_dir.path().to_string_lossy().into_owned());

        let cli = CliConfig {
            db_dir: Some(cli_dir.path().to_path_buf()),
            config_path: None,
        };
        let config = AppConfig::resolve(&cli, Some(file)).unwrap();
        assert_eq!(config.db_dir, file_dir.path());
        assert_eq!(
            config.acquisition_db_path(),
            file_dir.path().join("acquisition.db")
        );
    }

    #[test]
    fn test_missing_db_dir_rejected() {
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/definitely/not/here")),
            config_path: None,
        };
        assert!(AppConfig::resolve(&cli, Some(file_with_roots())).is_err());
    }
}
