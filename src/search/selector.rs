//! Candidate ranking and automatic selection.

use crate::config::SelectionSettings;
use crate::store::{DownloadType, SearchResult};
use std::cmp::Ordering;

/// Outcome of automatic selection over a request's candidates.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Accept(SearchResult),
    /// Every candidate lacks a magnet or download link.
    NoUsableLink,
    /// The best candidate does not reach the seeder threshold.
    BelowThreshold {
        title: String,
        seeders: i64,
        min_seeders: u32,
    },
}

/// Seeder count used for ranking. Usenet has no swarm, so it counts as
/// exactly meeting the threshold.
fn effective_seeders(candidate: &SearchResult, settings: &SelectionSettings) -> i64 {
    match candidate.download_type {
        DownloadType::Usenet => settings.min_seeders as i64,
        DownloadType::Torrent => candidate.seeders.unwrap_or(0),
    }
}

fn is_preferred(candidate: &SearchResult, settings: &SelectionSettings) -> bool {
    settings.preferred_download_type == Some(candidate.download_type)
}

/// Score persisted with each candidate for display order.
pub fn score(candidate: &SearchResult, settings: &SelectionSettings) -> f64 {
    let preference = if is_preferred(candidate, settings) {
        1_000_000.0
    } else {
        0.0
    };
    preference + effective_seeders(candidate, settings) as f64
}

fn compare(a: &SearchResult, b: &SearchResult, settings: &SelectionSettings) -> Ordering {
    is_preferred(b, settings)
        .cmp(&is_preferred(a, settings))
        .then_with(|| effective_seeders(b, settings).cmp(&effective_seeders(a, settings)))
        .then_with(|| match (a.size_bytes, b.size_bytes) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

/// Candidates with a usable link, best first.
pub fn rank<'a>(candidates: &'a [SearchResult], settings: &SelectionSettings) -> Vec<&'a SearchResult> {
    let mut ranked: Vec<&SearchResult> = candidates.iter().filter(|c| c.link().is_some()).collect();
    ranked.sort_by(|a, b| compare(a, b, settings));
    ranked
}

pub fn select(candidates: &[SearchResult], settings: &SelectionSettings) -> Selection {
    let ranked = rank(candidates, settings);
    let Some(top) = ranked.first() else {
        return Selection::NoUsableLink;
    };

    if top.download_type == DownloadType::Torrent {
        let seeders = top.seeders.unwrap_or(0);
        if seeders < settings.min_seeders as i64 {
            return Selection::BelowThreshold {
                title: top.title.clone(),
                seeders,
                min_seeders: settings.min_seeders,
            };
        }
    }
    Selection::Accept((*top).clone())
}
