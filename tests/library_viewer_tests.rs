//! Audiobookshelf viewer against a mocked server.

use bookarr::error::EngineError;
use bookarr::library::{AudiobookshelfClient, LibraryViewer};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> AudiobookshelfClient {
    AudiobookshelfClient::new(&server.uri(), "abs-token", Duration::from_secs(5)).unwrap()
}

fn library_json(id: &str, name: &str, media_type: &str, folder: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "mediaType": media_type,
        "folders": [{"id": format!("fol-{}", id), "fullPath": folder, "libraryId": id}]
    })
}

#[tokio::test]
async fn test_list_libraries_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/libraries"))
        .and(header("authorization", "Bearer abs-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "libraries": [
                library_json("lib-a", "Audiobooks", "book", "/audiobooks"),
                library_json("lib-e", "Ebooks", "book", "/ebooks")
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let libraries = client(&server).list_libraries().await.unwrap();
    assert_eq!(libraries.len(), 2);
    assert_eq!(libraries[0].id, "lib-a");
    assert_eq!(libraries[1].folders[0].path, "/ebooks");
}

#[tokio::test]
async fn test_get_library() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/libraries/lib-a"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(library_json("lib-a", "Audiobooks", "book", "/audiobooks")),
        )
        .mount(&server)
        .await;

    let library = client(&server).get_library("lib-a").await.unwrap();
    assert_eq!(library.name, "Audiobooks");
    assert_eq!(library.folders.len(), 1);
}

#[tokio::test]
async fn test_scan_accepted_and_refused() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/libraries/lib-a/scan"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/libraries/missing/scan"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let viewer = client(&server);
    assert!(viewer.scan_library("lib-a").await.unwrap());
    assert!(!viewer.scan_library("missing").await.unwrap());
}

#[tokio::test]
async fn test_bad_token_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/libraries"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let err = client(&server).test().await.unwrap_err();
    assert!(matches!(err, EngineError::Authentication(_)), "{:?}", err);
}
