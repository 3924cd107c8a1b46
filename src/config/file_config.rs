use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,

    // Feature configs
    pub scheduler: Option<SchedulerConfig>,
    pub selection: Option<SelectionConfig>,
    pub post_processing: Option<PostProcessingConfig>,
    pub health: Option<HealthConfig>,
    pub submission: Option<SubmissionConfig>,
    pub search: Option<SearchConfig>,
    pub library: Option<LibraryConfig>,

    pub search_providers: Vec<SearchProviderConfig>,
    pub download_clients: Vec<DownloadClientConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub queue_interval_secs: Option<u64>,
    pub monitor_interval_secs: Option<u64>,
    pub batch_size: Option<usize>,
    pub rate_limit_delay_ms: Option<u64>,
    pub retry_base_delay_hours: Option<u64>,
    pub retry_max_delay_hours: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SelectionConfig {
    pub auto_select: Option<bool>,
    pub min_seeders: Option<u32>,
    /// "torrent" or "usenet"
    pub preferred_download_type: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PostProcessingConfig {
    pub audiobook_output_path: Option<String>,
    pub ebook_output_path: Option<String>,
    pub path_template: Option<String>,
    pub filename_template: Option<String>,
    pub remote_path_prefix: Option<String>,
    pub local_path_prefix: Option<String>,
    pub archive_dir: Option<String>,
    pub max_component_length: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SubmissionConfig {
    pub poll_attempts: Option<u32>,
    pub poll_interval_ms: Option<u64>,
    pub verify_attempts: Option<u32>,
    pub verify_delay_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub default_language: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LibraryConfig {
    pub url: Option<String>,
    pub api_token: Option<String>,
    pub audiobook_library_id: Option<String>,
    pub ebook_library_id: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SearchProviderConfig {
    pub name: Option<String>,
    /// "prowlarr" or "jackett"
    pub kind: Option<String>,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub enabled: Option<bool>,
    pub audiobook_categories: Option<Vec<u32>>,
    pub ebook_categories: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DownloadClientConfig {
    pub name: Option<String>,
    /// "qbittorrent", "transmission" or "sabnzbd"
    pub client_type: Option<String>,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub category: Option<String>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
    pub remote_path: Option<String>,
    pub local_path: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
