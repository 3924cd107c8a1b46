//! Runtime settings consumed by the acquisition pipeline.
//!
//! Components never read settings from a global; they take an
//! `Arc<Settings>` snapshot from [`SettingsHandle`] at the start of each
//! unit of work, so a concurrent update is never observed half-applied.

use super::file_config::{DownloadClientConfig, FileConfig, SearchProviderConfig};
use crate::error::EngineError;
use crate::post_processing::validate_template;
use crate::search::ProviderKind;
use crate::store::{ClientType, DownloadClientRecord, DownloadType};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub queue_interval: Duration,
    pub monitor_interval: Duration,
    pub batch_size: usize,
    /// Delay between consecutive search dispatches within one sweep.
    pub rate_limit_delay: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            queue_interval: Duration::from_secs(60),
            monitor_interval: Duration::from_secs(30),
            batch_size: 5,
            rate_limit_delay: Duration::from_millis(2000),
            retry_base_delay: Duration::from_secs(24 * 3600),
            retry_max_delay: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionSettings {
    pub auto_select: bool,
    pub min_seeders: u32,
    pub preferred_download_type: Option<DownloadType>,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            auto_select: true,
            min_seeders: 1,
            preferred_download_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostProcessingSettings {
    pub audiobook_output_path: PathBuf,
    pub ebook_output_path: PathBuf,
    pub path_template: String,
    pub filename_template: String,
    /// Global prefix rewrite applied to client-reported paths.
    pub remote_path_prefix: Option<String>,
    pub local_path_prefix: Option<String>,
    /// Where pre-built zip archives of directory deliveries are staged.
    pub archive_dir: Option<PathBuf>,
    pub max_component_length: usize,
}

impl Default for PostProcessingSettings {
    fn default() -> Self {
        Self {
            audiobook_output_path: PathBuf::from("/audiobooks"),
            ebook_output_path: PathBuf::from("/ebooks"),
            path_template: "{author}/{title}".to_string(),
            filename_template: "{author} - {title}".to_string(),
            remote_path_prefix: None,
            local_path_prefix: None,
            archive_dir: None,
            max_component_length: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthSettings {
    pub interval: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionSettings {
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub verify_attempts: u32,
    pub verify_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            poll_attempts: 30,
            poll_interval: Duration::from_secs(1),
            verify_attempts: 3,
            verify_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    pub default_language: String,
    pub timeout: Duration,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_language: "en".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LibrarySettings {
    pub url: Option<String>,
    pub api_token: Option<String>,
    pub audiobook_library_id: Option<String>,
    pub ebook_library_id: Option<String>,
    pub timeout: Duration,
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            url: None,
            api_token: None,
            audiobook_library_id: None,
            ebook_library_id: None,
            timeout: Duration::from_secs(15),
        }
    }
}

impl LibrarySettings {
    pub fn is_configured(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
            && self.api_token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchProviderSettings {
    pub name: String,
    pub kind: ProviderKind,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub enabled: bool,
    pub audiobook_categories: Vec<u32>,
    pub ebook_categories: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadClientSettings {
    pub id: String,
    pub name: String,
    pub client_type: ClientType,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub category: Option<String>,
    pub priority: i32,
    pub enabled: bool,
    pub remote_path: Option<String>,
    pub local_path: Option<String>,
}

impl DownloadClientSettings {
    pub fn download_type(&self) -> DownloadType {
        self.client_type.download_type()
    }

    pub fn to_record(&self, now: i64) -> DownloadClientRecord {
        DownloadClientRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            client_type: self.client_type,
            download_type: self.download_type(),
            url: self.url.clone(),
            category: self.category.clone(),
            priority: self.priority,
            enabled: self.enabled,
            remote_path: self.remote_path.clone(),
            local_path: self.local_path.clone(),
            updated_at: now,
        }
    }
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub scheduler: SchedulerSettings,
    pub selection: SelectionSettings,
    pub post_processing: PostProcessingSettings,
    pub health: HealthSettings,
    pub submission: SubmissionSettings,
    pub search: SearchSettings,
    pub library: LibrarySettings,
    pub search_providers: Vec<SearchProviderSettings>,
    pub download_clients: Vec<DownloadClientSettings>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::Validation(msg.into())
}

fn slug(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

impl Settings {
    /// Build settings from a parsed file, applying defaults, then validate.
    pub fn from_file(file: &FileConfig) -> Result<Self, EngineError> {
        let defaults = Settings::default();

        let sched = file.scheduler.clone().unwrap_or_default();
        let scheduler = SchedulerSettings {
            queue_interval: sched
                .queue_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.scheduler.queue_interval),
            monitor_interval: sched
                .monitor_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.scheduler.monitor_interval),
            batch_size: sched.batch_size.unwrap_or(defaults.scheduler.batch_size),
            rate_limit_delay: sched
                .rate_limit_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.scheduler.rate_limit_delay),
            retry_base_delay: sched
                .retry_base_delay_hours
                .map(|h| Duration::from_secs(h * 3600))
                .unwrap_or(defaults.scheduler.retry_base_delay),
            retry_max_delay: sched
                .retry_max_delay_hours
                .map(|h| Duration::from_secs(h * 3600))
                .unwrap_or(defaults.scheduler.retry_max_delay),
        };

        let sel = file.selection.clone().unwrap_or_default();
        let preferred_download_type = match non_empty(sel.preferred_download_type) {
            Some(value) => Some(DownloadType::from_str(value.trim()).ok_or_else(|| {
                invalid(format!(
                    "preferred_download_type must be 'torrent' or 'usenet', got '{}'",
                    value
                ))
            })?),
            None => None,
        };
        let selection = SelectionSettings {
            auto_select: sel.auto_select.unwrap_or(defaults.selection.auto_select),
            min_seeders: sel.min_seeders.unwrap_or(defaults.selection.min_seeders),
            preferred_download_type,
        };

        let pp = file.post_processing.clone().unwrap_or_default();
        let post_processing = PostProcessingSettings {
            audiobook_output_path: non_empty(pp.audiobook_output_path)
                .map(PathBuf::from)
                .ok_or_else(|| invalid("post_processing.audiobook_output_path is required"))?,
            ebook_output_path: non_empty(pp.ebook_output_path)
                .map(PathBuf::from)
                .ok_or_else(|| invalid("post_processing.ebook_output_path is required"))?,
            path_template: non_empty(pp.path_template)
                .unwrap_or(defaults.post_processing.path_template),
            filename_template: non_empty(pp.filename_template)
                .unwrap_or(defaults.post_processing.filename_template),
            remote_path_prefix: non_empty(pp.remote_path_prefix),
            local_path_prefix: non_empty(pp.local_path_prefix),
            archive_dir: non_empty(pp.archive_dir).map(PathBuf::from),
            max_component_length: pp
                .max_component_length
                .unwrap_or(defaults.post_processing.max_component_length),
        };

        let health = HealthSettings {
            interval: file
                .health
                .as_ref()
                .and_then(|h| h.interval_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.health.interval),
        };

        let sub = file.submission.clone().unwrap_or_default();
        let submission = SubmissionSettings {
            poll_attempts: sub
                .poll_attempts
                .unwrap_or(defaults.submission.poll_attempts),
            poll_interval: sub
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.submission.poll_interval),
            verify_attempts: sub
                .verify_attempts
                .unwrap_or(defaults.submission.verify_attempts),
            verify_delay: sub
                .verify_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.submission.verify_delay),
            request_timeout: sub
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.submission.request_timeout),
        };

        let srch = file.search.clone().unwrap_or_default();
        let search = SearchSettings {
            default_language: non_empty(srch.default_language)
                .map(|l| l.trim().to_lowercase())
                .unwrap_or(defaults.search.default_language),
            timeout: srch
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.search.timeout),
        };

        let lib = file.library.clone().unwrap_or_default();
        let library = LibrarySettings {
            url: non_empty(lib.url),
            api_token: non_empty(lib.api_token),
            audiobook_library_id: non_empty(lib.audiobook_library_id),
            ebook_library_id: non_empty(lib.ebook_library_id),
            timeout: lib
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.library.timeout),
        };

        let search_providers = file
            .search_providers
            .iter()
            .map(Self::provider_from_file)
            .collect::<Result<Vec<_>, _>>()?;

        let download_clients = file
            .download_clients
            .iter()
            .map(Self::client_from_file)
            .collect::<Result<Vec<_>, _>>()?;

        let settings = Settings {
            scheduler,
            selection,
            post_processing,
            health,
            submission,
            search,
            library,
            search_providers,
            download_clients,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn provider_from_file(cfg: &SearchProviderConfig) -> Result<SearchProviderSettings, EngineError> {
        let kind_str = non_empty(cfg.kind.clone())
            .ok_or_else(|| invalid("search_providers entry is missing 'kind'"))?;
        let kind = ProviderKind::from_str(kind_str.trim()).ok_or_else(|| {
            invalid(format!(
                "Unknown search provider kind '{}' (expected prowlarr or jackett)",
                kind_str
            ))
        })?;
        Ok(SearchProviderSettings {
            name: non_empty(cfg.name.clone()).unwrap_or_else(|| kind.as_str().to_string()),
            kind,
            url: non_empty(cfg.url.clone()),
            api_key: non_empty(cfg.api_key.clone()),
            enabled: cfg.enabled.unwrap_or(true),
            audiobook_categories: cfg
                .audiobook_categories
                .clone()
                .unwrap_or_else(|| kind.default_categories(crate::store::BookType::Audiobook)),
            ebook_categories: cfg
                .ebook_categories
                .clone()
                .unwrap_or_else(|| kind.default_categories(crate::store::BookType::Ebook)),
        })
    }

    fn client_from_file(cfg: &DownloadClientConfig) -> Result<DownloadClientSettings, EngineError> {
        let name = non_empty(cfg.name.clone())
            .ok_or_else(|| invalid("download_clients entry is missing 'name'"))?;
        let type_str = non_empty(cfg.client_type.clone())
            .ok_or_else(|| invalid(format!("Download client '{}' is missing 'client_type'", name)))?;
        let client_type = ClientType::from_str(type_str.trim().to_lowercase().as_str())
            .ok_or_else(|| {
                invalid(format!(
                    "Download client '{}' has unknown type '{}'",
                    name, type_str
                ))
            })?;
        let url = non_empty(cfg.url.clone())
            .ok_or_else(|| invalid(format!("Download client '{}' is missing 'url'", name)))?;
        Ok(DownloadClientSettings {
            id: slug(&name),
            name,
            client_type,
            url,
            username: non_empty(cfg.username.clone()),
            password: cfg.password.clone(),
            api_key: non_empty(cfg.api_key.clone()),
            category: non_empty(cfg.category.clone()),
            priority: cfg.priority.unwrap_or(0),
            enabled: cfg.enabled.unwrap_or(true),
            remote_path: non_empty(cfg.remote_path.clone()),
            local_path: non_empty(cfg.local_path.clone()),
        })
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.scheduler.batch_size == 0 {
            return Err(invalid("scheduler.batch_size must be at least 1"));
        }
        if self.scheduler.queue_interval.is_zero()
            || self.scheduler.monitor_interval.is_zero()
            || self.health.interval.is_zero()
        {
            return Err(invalid("Job intervals must be greater than zero"));
        }
        if self.scheduler.retry_base_delay.is_zero() {
            return Err(invalid("scheduler.retry_base_delay_hours must be greater than zero"));
        }
        if self.scheduler.retry_max_delay < self.scheduler.retry_base_delay {
            return Err(invalid(
                "scheduler.retry_max_delay_hours must not be smaller than the base delay",
            ));
        }

        let pp = &self.post_processing;
        for (label, root) in [
            ("audiobook_output_path", &pp.audiobook_output_path),
            ("ebook_output_path", &pp.ebook_output_path),
        ] {
            if !root.is_absolute() {
                return Err(invalid(format!(
                    "post_processing.{} must be an absolute path, got {:?}",
                    label, root
                )));
            }
        }
        validate_template(&pp.path_template, true)
            .map_err(|e| invalid(format!("post_processing.path_template: {}", e)))?;
        validate_template(&pp.filename_template, false)
            .map_err(|e| invalid(format!("post_processing.filename_template: {}", e)))?;
        if pp.remote_path_prefix.is_some() != pp.local_path_prefix.is_some() {
            return Err(invalid(
                "post_processing.remote_path_prefix and local_path_prefix must be set together",
            ));
        }
        if pp.max_component_length < 8 {
            return Err(invalid("post_processing.max_component_length must be at least 8"));
        }

        if self.submission.poll_attempts == 0 || self.submission.verify_attempts == 0 {
            return Err(invalid("submission attempts must be at least 1"));
        }

        if let Some(url) = &self.library.url {
            reqwest::Url::parse(url)
                .map_err(|e| invalid(format!("library.url '{}' is invalid: {}", url, e)))?;
        }

        let mut provider_names = std::collections::HashSet::new();
        for provider in &self.search_providers {
            if !provider_names.insert(provider.name.as_str()) {
                return Err(invalid(format!(
                    "Duplicate search provider name '{}'",
                    provider.name
                )));
            }
            if let Some(url) = &provider.url {
                reqwest::Url::parse(url).map_err(|e| {
                    invalid(format!(
                        "Search provider '{}' url '{}' is invalid: {}",
                        provider.name, url, e
                    ))
                })?;
            }
        }

        let mut client_ids = std::collections::HashSet::new();
        for client in &self.download_clients {
            if !client_ids.insert(client.id.as_str()) {
                return Err(invalid(format!(
                    "Duplicate download client name '{}'",
                    client.name
                )));
            }
            reqwest::Url::parse(&client.url).map_err(|e| {
                invalid(format!(
                    "Download client '{}' url '{}' is invalid: {}",
                    client.name, client.url, e
                ))
            })?;
            if client.client_type == ClientType::Sabnzbd && client.api_key.is_none() {
                return Err(invalid(format!(
                    "Download client '{}' (SABnzbd) requires api_key",
                    client.name
                )));
            }
            if client.remote_path.is_some() != client.local_path.is_some() {
                return Err(invalid(format!(
                    "Download client '{}': remote_path and local_path must be set together",
                    client.name
                )));
            }
        }

        Ok(())
    }

    pub fn output_root(&self, book_type: crate::store::BookType) -> &PathBuf {
        match book_type {
            crate::store::BookType::Audiobook => &self.post_processing.audiobook_output_path,
            crate::store::BookType::Ebook => &self.post_processing.ebook_output_path,
        }
    }

    pub fn download_client(&self, id: &str) -> Option<&DownloadClientSettings> {
        self.download_clients.iter().find(|c| c.id == id)
    }
}

/// Shared handle to the live settings.
#[derive(Clone)]
pub struct SettingsHandle {
    current: Arc<RwLock<Arc<Settings>>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Result<Self, EngineError> {
        settings.validate()?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
        })
    }

    /// Current settings. Holders keep a consistent view even if an update
    /// lands while they work.
    pub fn snapshot(&self) -> Arc<Settings> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Validate and swap in new settings.
    pub fn update(&self, settings: Settings) -> Result<(), EngineError> {
        settings.validate()?;
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(settings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn minimal_file() -> FileConfig {
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
    fn test_defaults_applied() {
        let settings = Settings::from_file(&minimal_file()).unwrap();
        assert_eq!(settings.scheduler.batch_size, 5);
        assert_eq!(settings.scheduler.retry_base_delay, Duration::from_secs(86400));
        assert_eq!(settings.scheduler.retry_max_delay, Duration::from_secs(604800));
        assert_eq!(settings.submission.poll_attempts, 30);
        assert_eq!(settings.search.default_language, "en");
        assert!(settings.selection.auto_select);
    }

    #[test]
    fn test_missing_output_root_rejected() {
        let file = FileConfig::parse(
            "[post_processing]\naudiobook_output_path = \"/srv/audiobooks\"\n",
        )
        .unwrap();
        let err = Settings::from_file(&file).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("ebook_output_path"));
    }

    #[test]
    fn test_bad_template_rejected() {
        let mut file = minimal_file();
        file.post_processing.as_mut().unwrap().path_template = Some("{author}/{isbn}".into());
        let err = Settings::from_file(&file).unwrap_err();
        assert!(err.to_string().contains("isbn"));
    }

    #[test]
    fn test_client_config_validation() {
        let mut file = minimal_file();
        file.download_clients.push(DownloadClientConfig {
            name: Some("SAB".into()),
            client_type: Some("sabnzbd".into()),
            url: Some("http://sab:8080".into()),
            ..Default::default()
        });
        let err = Settings::from_file(&file).unwrap_err();
        assert!(err.to_string().contains("api_key"));

        file.download_clients[0].api_key = Some("k".into());
        let settings = Settings::from_file(&file).unwrap();
        assert_eq!(settings.download_clients[0].id, "sab");
        assert_eq!(
            settings.download_clients[0].download_type(),
            DownloadType::Usenet
        );
    }

    #[test]
    fn test_unknown_client_type_rejected() {
        let mut file = minimal_file();
        file.download_clients.push(DownloadClientConfig {
            name: Some("x".into()),
            client_type: Some("deluge".into()),
            url: Some("http://x".into()),
            ..Default::default()
        });
        assert!(Settings::from_file(&file).is_err());
    }

    #[test]
    fn test_handle_rejects_invalid_update() {
        let handle = SettingsHandle::new(Settings::default()).unwrap();
        let mut bad = Settings::default();
        bad.scheduler.batch_size = 0;
        assert!(handle.update(bad).is_err());
        assert_eq!(handle.snapshot().scheduler.batch_size, 5);

        let mut good = Settings::default();
        good.scheduler.batch_size = 9;
        let before = handle.snapshot();
        handle.update(good).unwrap();
        assert_eq!(handle.snapshot().scheduler.batch_size, 9);
        assert_eq!(before.scheduler.batch_size, 5);
    }
}
