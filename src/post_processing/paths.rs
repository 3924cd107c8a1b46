//! Mapping client-reported paths onto the local filesystem.

use crate::config::{DownloadClientSettings, PostProcessingSettings};
use std::path::PathBuf;

/// Clients on Windows hosts report backslash separated paths.
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest.trim_start_matches('/'))
    } else {
        None
    }
}

fn join(local: &str, rest: &str) -> PathBuf {
    let mut path = PathBuf::from(normalize_separators(local));
    if !rest.is_empty() {
        path.push(rest);
    }
    path
}

/// Local path of a finished download.
///
/// The global prefix pair is tried first. Otherwise the client's own pair
/// applies: a matching prefix is swapped, any other path keeps only its
/// basename under the client's local directory.
pub fn remap_source(
    reported: &str,
    settings: &PostProcessingSettings,
    client: Option<&DownloadClientSettings>,
) -> PathBuf {
    let reported = normalize_separators(reported);

    if let (Some(remote), Some(local)) = (&settings.remote_path_prefix, &settings.local_path_prefix) {
        if let Some(rest) = strip_prefix(&reported, &normalize_separators(remote)) {
            return join(local, rest);
        }
    }

    if let Some((remote, local)) =
        client.and_then(|c| c.remote_path.as_deref().zip(c.local_path.as_deref()))
    {
        if let Some(rest) = strip_prefix(&reported, &normalize_separators(remote)) {
            return join(local, rest);
        }
        let basename = reported.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
        return join(local, basename);
    }

    PathBuf::from(reported)
}

/// Human readable summary of the remap settings, for error messages.
pub fn describe_remap(
    settings: &PostProcessingSettings,
    client: Option<&DownloadClientSettings>,
) -> String {
    let global = match (&settings.remote_path_prefix, &settings.local_path_prefix) {
        (Some(remote), Some(local)) => format!("global '{}' -> '{}'", remote, local),
        _ => "no global remap".to_string(),
    };
    let per_client = match client {
        Some(c) => match (&c.remote_path, &c.local_path) {
            (Some(remote), Some(local)) => {
                format!("client {} '{}' -> '{}'", c.name, remote, local)
            }
            _ => format!("no remap for client {}", c.name),
        },
        None => "client unknown".to_string(),
    };
    format!("{}; {}", global, per_client)
}
