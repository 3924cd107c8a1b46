use super::{Library, LibraryFolder, LibraryViewer};
use crate::error::EngineError;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use std::time::Duration;

const SERVICE: &str = "Audiobookshelf";

#[derive(Debug, Deserialize)]
struct LibrariesResponse {
    #[serde(default)]
    libraries: Vec<AbsLibrary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbsLibrary {
    id: String,
    name: String,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    folders: Vec<AbsFolder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbsFolder {
    id: String,
    full_path: String,
}

impl From<AbsLibrary> for Library {
    fn from(library: AbsLibrary) -> Self {
        Library {
            id: library.id,
            name: library.name,
            media_type: library.media_type,
            folders: library
                .folders
                .into_iter()
                .map(|f| LibraryFolder {
                    id: f.id,
                    path: f.full_path,
                })
                .collect(),
        }
    }
}

/// Audiobookshelf REST client, authenticated with a Bearer API token.
pub struct AudiobookshelfClient {
    base_url: String,
    token: String,
    http: Client,
}

impl AudiobookshelfClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::from_reqwest(SERVICE, e))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        })
    }

    async fn call(&self, method: Method, path: &str) -> Result<String, EngineError> {
        let url = format!("{}/api/{}", self.base_url, path);
        let response = self
            .http
            .request(method, &url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| EngineError::from_reqwest(SERVICE, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::from_reqwest(SERVICE, e))?;
        if !status.is_success() {
            return Err(EngineError::from_status(SERVICE, status, &body));
        }
        Ok(body)
    }
}

#[async_trait]
impl LibraryViewer for AudiobookshelfClient {
    async fn list_libraries(&self) -> Result<Vec<Library>, EngineError> {
        let body = self.call(Method::GET, "libraries").await?;
        let response: LibrariesResponse = crate::search::parse_json(SERVICE, &body)?;
        Ok(response.libraries.into_iter().map(Library::from).collect())
    }

    async fn get_library(&self, id: &str) -> Result<Library, EngineError> {
        let path = format!("libraries/{}", urlencoding::encode(id));
        let body = self.call(Method::GET, &path).await?;
        let library: AbsLibrary = crate::search::parse_json(SERVICE, &body)?;
        Ok(library.into())
    }

    async fn scan_library(&self, id: &str) -> Result<bool, EngineError> {
        let path = format!("libraries/{}/scan", urlencoding::encode(id));
        match self.call(Method::POST, &path).await {
            Ok(_) => Ok(true),
            // Unknown library or scan already running
            Err(EngineError::Client(message)) => {
                tracing::warn!("{} did not accept scan of {}: {}", SERVICE, id, message);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn test(&self) -> Result<(), EngineError> {
        self.call(Method::GET, "libraries").await.map(|_| ())
    }
}
