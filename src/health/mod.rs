//! Health aggregation over search providers, download clients and the
//! library viewer.
//!
//! Each pass probes every configured dependency and upserts one
//! [`SystemHealth`] row per service:
//!
//! - `search:<name>` for each enabled search provider
//! - `download_clients` aggregated over every enabled client
//! - `library_viewer`
//!
//! Unconfigured services report healthy. A download client that fails its
//! probe flags the requests whose active download lives on it.

use crate::config::Settings;
use crate::download_clients::ClientRegistry;
use crate::library::ViewerFactory;
use crate::search::ProviderFactory;
use crate::store::{AcquisitionStore, HealthStatus, SystemHealth};
use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DOWNLOAD_CLIENTS: &str = "download_clients";
pub const LIBRARY_VIEWER: &str = "library_viewer";

pub fn search_service(provider: &str) -> String {
    format!("search:{}", provider)
}

/// Outcome of one health pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthReport {
    pub services: Vec<SystemHealth>,
    /// Requests flagged because their download client is down.
    pub escalated: usize,
}

impl HealthReport {
    pub fn service(&self, name: &str) -> Option<&SystemHealth> {
        self.services.iter().find(|s| s.service == name)
    }

    pub fn all_healthy(&self) -> bool {
        self.services.iter().all(|s| s.status == HealthStatus::Healthy)
    }
}

struct Probe {
    status: HealthStatus,
    message: String,
}

impl Probe {
    fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: message.into(),
        }
    }

    fn down(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Down,
            message: message.into(),
        }
    }
}

pub struct HealthAggregator {
    store: Arc<dyn AcquisitionStore>,
    providers: ProviderFactory,
    registry: Arc<ClientRegistry>,
    viewers: ViewerFactory,
}

impl HealthAggregator {
    pub fn new(
        store: Arc<dyn AcquisitionStore>,
        providers: ProviderFactory,
        registry: Arc<ClientRegistry>,
        viewers: ViewerFactory,
    ) -> Self {
        Self {
            store,
            providers,
            registry,
            viewers,
        }
    }

    /// Probe everything concurrently and persist the results.
    pub async fn run(&self, settings: &Settings) -> Result<HealthReport> {
        let (search, (clients, unreachable), viewer) = tokio::join!(
            self.probe_search(settings),
            self.probe_clients(settings),
            self.probe_viewer(settings),
        );

        let mut probes = search;
        probes.push((DOWNLOAD_CLIENTS.to_string(), clients));
        probes.push((LIBRARY_VIEWER.to_string(), viewer));

        let now = chrono::Utc::now().timestamp();
        let mut report = HealthReport::default();
        for (service, probe) in probes {
            let health = SystemHealth {
                last_success_at: (probe.status != HealthStatus::Down).then_some(now),
                service,
                status: probe.status,
                message: Some(probe.message),
                last_check_at: now,
            };
            self.log_transition(&health);
            self.store.upsert_health(&health)?;
            report.services.push(health);
        }

        for (client_id, message) in unreachable {
            let flagged = self.store.escalate_requests_on_client(&client_id, &message)?;
            if flagged > 0 {
                warn!("Flagged {} request(s) on unreachable client {}", flagged, client_id);
            }
            report.escalated += flagged;
        }
        Ok(report)
    }

    fn log_transition(&self, health: &SystemHealth) {
        let previous = match self.store.get_health(&health.service) {
            Ok(previous) => previous.map(|p| p.status),
            Err(err) => {
                debug!("Could not read previous health of {}: {:#}", health.service, err);
                None
            }
        };
        if previous == Some(health.status) {
            return;
        }
        let message = health.message.as_deref().unwrap_or_default();
        match health.status {
            HealthStatus::Healthy => info!("{} is healthy: {}", health.service, message),
            _ => warn!("{} is {}: {}", health.service, health.status.as_str(), message),
        }
    }

    async fn probe_search(&self, settings: &Settings) -> Vec<(String, Probe)> {
        let providers = (self.providers)(settings);
        join_all(providers.into_iter().map(|provider| async move {
            let service = search_service(provider.name());
            if !provider.is_configured() {
                return (service, Probe::healthy("Not configured"));
            }
            let probe = match provider.test().await {
                Ok(()) => Probe::healthy("OK"),
                Err(err) => Probe::down(err.to_string()),
            };
            (service, probe)
        }))
        .await
    }

    /// Aggregate probe plus `(client_id, message)` for every unreachable
    /// client.
    async fn probe_clients(&self, settings: &Settings) -> (Probe, Vec<(String, String)>) {
        let clients: Vec<_> = settings
            .download_clients
            .iter()
            .filter(|c| c.enabled)
            .collect();
        if clients.is_empty() {
            return (Probe::healthy("No download clients configured"), Vec::new());
        }

        let results = join_all(clients.iter().map(|client| async move {
            let result = match self.registry.adapter(client, &settings.submission) {
                Ok(adapter) => adapter.test_connection().await,
                Err(err) => Err(err),
            };
            (*client, result)
        }))
        .await;

        let total = results.len();
        let mut unreachable = Vec::new();
        for (client, result) in results {
            if let Err(err) = result {
                unreachable.push((
                    client.id.clone(),
                    format!("Download client {} is unreachable: {}", client.name, err),
                ));
            }
        }

        let reachable = total - unreachable.len();
        let probe = if unreachable.is_empty() {
            Probe::healthy(format!("{} of {} client(s) reachable", reachable, total))
        } else {
            let failures: Vec<&str> = unreachable.iter().map(|(_, m)| m.as_str()).collect();
            let message = format!(
                "{} of {} client(s) reachable; {}",
                reachable,
                total,
                failures.join("; ")
            );
            if reachable == 0 {
                Probe::down(message)
            } else {
                Probe {
                    status: HealthStatus::Degraded,
                    message,
                }
            }
        };
        (probe, unreachable)
    }

    async fn probe_viewer(&self, settings: &Settings) -> Probe {
        match (self.viewers)(&settings.library) {
            Ok(None) => Probe::healthy("Not configured"),
            Ok(Some(viewer)) => match viewer.test().await {
                Ok(()) => Probe::healthy("OK"),
                Err(err) => Probe::down(err.to_string()),
            },
            Err(err) => Probe::down(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DownloadClientSettings, LibrarySettings, SubmissionSettings};
    use crate::download_clients::DownloadClient;
    use crate::error::EngineError;
    use crate::library::LibraryViewer;
    use crate::search::SearchProvider;
    use crate::store::{
        ClientType, Download, DownloadType, Request, RequestStatus, SqliteAcquisitionStore,
    };
    use crate::test_support::{
        book_titled, candidate, settings_with_clients, FakeClient, FakeProvider, FakeViewer,
    };
    use std::collections::HashMap;

    struct Fixture {
        store: Arc<SqliteAcquisitionStore>,
        aggregator: HealthAggregator,
        clients: HashMap<String, Arc<FakeClient>>,
        viewer: Arc<FakeViewer>,
    }

    fn fixture(
        providers: Vec<Arc<FakeProvider>>,
        clients: &[(&str, ClientType)],
        viewer_configured: bool,
    ) -> Fixture {
        let store = Arc::new(SqliteAcquisitionStore::in_memory().unwrap());
        let fakes: HashMap<String, Arc<FakeClient>> = clients
            .iter()
            .map(|(id, t)| (id.to_string(), Arc::new(FakeClient::new(*t))))
            .collect();
        let factory_fakes = fakes.clone();
        let registry = Arc::new(ClientRegistry::with_factory(Arc::new(
            move |client: &DownloadClientSettings,
                  _: &SubmissionSettings|
                  -> Result<Arc<dyn DownloadClient>, EngineError> {
                factory_fakes
                    .get(&client.id)
                    .cloned()
                    .map(|fake| fake as Arc<dyn DownloadClient>)
                    .ok_or_else(|| EngineError::NotConfigured(client.id.clone()))
            },
        )));
        let viewer = Arc::new(FakeViewer::default());
        let factory_viewer = viewer.clone();
        let aggregator = HealthAggregator::new(
            store.clone(),
            Arc::new(move |_: &Settings| -> Vec<Arc<dyn SearchProvider>> {
                providers
                    .iter()
                    .map(|p| p.clone() as Arc<dyn SearchProvider>)
                    .collect()
            }),
            registry,
            Arc::new(
                move |_: &LibrarySettings| -> Result<Option<Arc<dyn LibraryViewer>>, EngineError> {
                    Ok(viewer_configured.then(|| factory_viewer.clone() as Arc<dyn LibraryViewer>))
                },
            ),
        );
        Fixture {
            store,
            aggregator,
            clients: fakes,
            viewer,
        }
    }

    fn settings_for(clients: &[(&str, ClientType)]) -> Settings {
        let entries: Vec<(&str, ClientType, i32)> =
            clients.iter().map(|(id, t)| (*id, *t, 1)).collect();
        settings_with_clients(&entries)
    }

    #[tokio::test]
    async fn test_nothing_configured_is_healthy() {
        let f = fixture(vec![], &[], false);
        let report = f.aggregator.run(&Settings::default()).await.unwrap();

        assert!(report.all_healthy());
        assert_eq!(report.services.len(), 2);
        let stored = f.store.get_health(DOWNLOAD_CLIENTS).unwrap().unwrap();
        assert_eq!(stored.status, HealthStatus::Healthy);
        assert!(stored.last_success_at.is_some());
    }

    #[tokio::test]
    async fn test_provider_rows_per_name() {
        let unconfigured = Arc::new(FakeProvider::returning("jackett", vec![]));
        unconfigured.set_configured(false);
        let broken = Arc::new(FakeProvider::failing(
            "prowlarr",
            EngineError::Authentication("bad key".into()),
        ));
        let f = fixture(vec![unconfigured, broken], &[], false);

        let report = f.aggregator.run(&Settings::default()).await.unwrap();

        let jackett = report.service("search:jackett").unwrap();
        assert_eq!(jackett.status, HealthStatus::Healthy);
        assert_eq!(jackett.message.as_deref(), Some("Not configured"));
        let prowlarr = report.service("search:prowlarr").unwrap();
        assert_eq!(prowlarr.status, HealthStatus::Down);
        assert!(prowlarr.message.as_deref().unwrap().contains("bad key"));
    }

    #[tokio::test]
    async fn test_client_aggregate_degraded_then_down() {
        let clients = [("qb", ClientType::Qbittorrent), ("tr", ClientType::Transmission)];
        let f = fixture(vec![], &clients, false);
        let settings = settings_for(&clients);

        f.clients["qb"].set_reachable(false);
        let report = f.aggregator.run(&settings).await.unwrap();
        let row = report.service(DOWNLOAD_CLIENTS).unwrap();
        assert_eq!(row.status, HealthStatus::Degraded);
        assert!(row.message.as_deref().unwrap().starts_with("1 of 2"));

        let first_success = f.store.get_health(DOWNLOAD_CLIENTS).unwrap().unwrap().last_success_at;
        f.clients["tr"].set_reachable(false);
        let report = f.aggregator.run(&settings).await.unwrap();
        assert_eq!(report.service(DOWNLOAD_CLIENTS).unwrap().status, HealthStatus::Down);
        // last success survives a failed probe
        let stored = f.store.get_health(DOWNLOAD_CLIENTS).unwrap().unwrap();
        assert_eq!(stored.last_success_at, first_success);
    }

    #[tokio::test]
    async fn test_down_client_flags_its_requests() {
        let clients = [("qb", ClientType::Qbittorrent)];
        let f = fixture(vec![], &clients, false);
        f.store.insert_book(&book_titled("b1", "Dune", None)).unwrap();
        let request = Request::new("b1", "user-1", None, 1);
        f.store.insert_request(&request).unwrap();
        f.store
            .transition(&request.id, &[RequestStatus::Pending], RequestStatus::Searching)
            .unwrap();
        let mut hit = candidate("g", DownloadType::Torrent, Some(5), Some(10));
        hit.request_id = request.id.clone();
        f.store.replace_candidates(&request.id, &[hit.clone()]).unwrap();
        let download = Download::queued_for(&hit, 2);
        assert!(f.store.accept_candidate(&hit.id, &download).unwrap());
        assert!(f.store.record_submission(&download.id, "qb", "abc").unwrap());

        f.clients["qb"].set_reachable(false);
        let report = f.aggregator.run(&settings_for(&clients)).await.unwrap();

        assert_eq!(report.escalated, 1);
        let stored = f.store.get_request(&request.id).unwrap().unwrap();
        assert!(stored.attention_needed);
        assert!(stored.issue_description.unwrap().contains("qb is unreachable"));
    }

    #[tokio::test]
    async fn test_library_viewer_probe() {
        let f = fixture(vec![], &[], true);
        let report = f.aggregator.run(&Settings::default()).await.unwrap();
        assert_eq!(report.service(LIBRARY_VIEWER).unwrap().status, HealthStatus::Healthy);

        f.viewer.set_reachable(false);
        let report = f.aggregator.run(&Settings::default()).await.unwrap();
        assert_eq!(report.service(LIBRARY_VIEWER).unwrap().status, HealthStatus::Down);
    }
}
