//! HTTP contract tests against a mock forge.

use mockito::{Matcher, Server};
use relay_core::{DispatchEvent, Dispatcher, MergeApprover, RelayError, SecretToken};
use relay_forge::{ForgeClient, ForgeConfig, GithubDispatcher, GithubMergeApprover, GithubReleases};
use relay_state::{ArtifactStore, ContentDigest, StorageError};
use serde_json::json;

const REPO: &str = "acme/tod";

fn client(server: &Server) -> ForgeClient {
    ForgeClient::new(ForgeConfig::new(
        &server.url(),
        REPO,
        SecretToken::new("test-token"),
    ))
    .unwrap()
}

fn release_body(server: &Server, assets: serde_json::Value) -> String {
    json!({
        "id": 7,
        "upload_url": format!("{}/uploads/7/assets{{?name,label}}", server.url()),
        "assets": assets,
    })
    .to_string()
}

fn asset_json(id: u64, name: &str, size: u64) -> serde_json::Value {
    json!({ "id": id, "name": name, "size": size, "updated_at": "2026-01-01T00:00:00Z" })
}

#[tokio::test]
async fn release_exists_maps_404_to_false() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("GET", "/repos/acme/tod/releases/tags/v9.9.9")
        .match_header("authorization", "Bearer test-token")
        .with_status(404)
        .create_async()
        .await;

    let store = GithubReleases::new(client(&server));
    assert!(!store.release_exists("v9.9.9").await.unwrap());
    m.assert_async().await;
}

#[tokio::test]
async fn create_release_posts_when_missing() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/acme/tod/releases/tags/v1.0.0")
        .with_status(404)
        .create_async()
        .await;
    let create = server
        .mock("POST", "/repos/acme/tod/releases")
        .match_body(Matcher::PartialJson(json!({ "tag_name": "v1.0.0" })))
        .with_status(201)
        .with_body("{}")
        .create_async()
        .await;

    let store = GithubReleases::new(client(&server));
    store.create_release("v1.0.0").await.unwrap();
    create.assert_async().await;
}

#[tokio::test]
async fn create_release_tolerates_concurrent_creation() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/acme/tod/releases/tags/v1.0.0")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("POST", "/repos/acme/tod/releases")
        .with_status(422)
        .with_body(r#"{"message":"Validation Failed"}"#)
        .create_async()
        .await;

    let store = GithubReleases::new(client(&server));
    assert!(store.create_release("v1.0.0").await.is_ok());
}

#[tokio::test]
async fn upload_new_asset() {
    let mut server = Server::new_async().await;
    let body = release_body(&server, json!([]));
    server
        .mock("GET", "/repos/acme/tod/releases/tags/v1.0.0")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;
    let upload = server
        .mock("POST", "/uploads/7/assets")
        .match_query(Matcher::UrlEncoded(
            "name".into(),
            "tod-1.0.0-linux-x86_64.tar.gz".into(),
        ))
        .match_header("content-type", "application/octet-stream")
        .match_body(b"archive".to_vec())
        .with_status(201)
        .with_body(asset_json(11, "tod-1.0.0-linux-x86_64.tar.gz", 7).to_string())
        .create_async()
        .await;

    let store = GithubReleases::new(client(&server));
    let receipt = store
        .upload_asset("v1.0.0", "tod-1.0.0-linux-x86_64.tar.gz", b"archive")
        .await
        .unwrap();
    upload.assert_async().await;
    assert!(!receipt.replaced);
    assert_eq!(receipt.asset.digest, ContentDigest::from_bytes(b"archive"));
}

#[tokio::test]
async fn upload_replaces_same_named_asset() {
    let mut server = Server::new_async().await;
    let name = "tod-1.0.0-linux-x86_64.tar.gz";
    let body = release_body(&server, json!([asset_json(5, name, 3)]));
    server
        .mock("GET", "/repos/acme/tod/releases/tags/v1.0.0")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", "/repos/acme/tod/releases/assets/5")
        .with_status(204)
        .create_async()
        .await;
    server
        .mock("POST", "/uploads/7/assets")
        .match_query(Matcher::Any)
        .with_status(201)
        .with_body(asset_json(12, name, 4).to_string())
        .create_async()
        .await;

    let store = GithubReleases::new(client(&server));
    let receipt = store.upload_asset("v1.0.0", name, b"next").await.unwrap();
    delete.assert_async().await;
    assert!(receipt.replaced);
}

#[tokio::test]
async fn upload_recovers_from_concurrent_same_name_upload() {
    let mut server = Server::new_async().await;
    let name = "tod-1.0.0-linux-x86_64.tar.gz";
    let before = release_body(&server, json!([]));
    let after = release_body(&server, json!([asset_json(9, name, 5)]));
    let first_read = server
        .mock("GET", "/repos/acme/tod/releases/tags/v1.0.0")
        .with_status(200)
        .with_body(before)
        .expect(1)
        .create_async()
        .await;
    let second_read = server
        .mock("GET", "/repos/acme/tod/releases/tags/v1.0.0")
        .with_status(200)
        .with_body(after)
        .expect(1)
        .create_async()
        .await;
    let conflict = server
        .mock("POST", "/uploads/7/assets")
        .match_query(Matcher::Any)
        .with_status(422)
        .with_body(r#"{"message":"Validation Failed","errors":[{"code":"already_exists"}]}"#)
        .expect(1)
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", "/repos/acme/tod/releases/assets/9")
        .with_status(204)
        .create_async()
        .await;
    let upload = server
        .mock("POST", "/uploads/7/assets")
        .match_query(Matcher::Any)
        .with_status(201)
        .with_body(asset_json(10, name, 7).to_string())
        .expect(1)
        .create_async()
        .await;

    let store = GithubReleases::new(client(&server));
    let receipt = store.upload_asset("v1.0.0", name, b"archive").await.unwrap();

    first_read.assert_async().await;
    second_read.assert_async().await;
    conflict.assert_async().await;
    delete.assert_async().await;
    upload.assert_async().await;
    assert!(receipt.replaced);
    assert_eq!(receipt.asset.digest, ContentDigest::from_bytes(b"archive"));
}

#[tokio::test]
async fn upload_without_release_is_not_found() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/acme/tod/releases/tags/v1.0.0")
        .with_status(404)
        .create_async()
        .await;

    let store = GithubReleases::new(client(&server));
    let err = store.upload_asset("v1.0.0", "a.tar.gz", b"x").await.unwrap_err();
    assert!(matches!(err, StorageError::ReleaseNotFound { .. }));
}

#[tokio::test]
async fn forbidden_is_permission_denied() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/repos/acme/tod/releases/tags/v1.0.0")
        .with_status(403)
        .with_body(r#"{"message":"Resource not accessible by integration"}"#)
        .create_async()
        .await;

    let store = GithubReleases::new(client(&server));
    let err = store.release_exists("v1.0.0").await.unwrap_err();
    assert!(matches!(err, StorageError::PermissionDenied { .. }));
}

#[tokio::test]
async fn list_assets_prefers_reported_digest() {
    let mut server = Server::new_async().await;
    let reported = ContentDigest::from_bytes(b"reported");
    let mut with_digest = asset_json(1, "b.tar.gz", 8);
    with_digest["digest"] = json!(format!("sha256:{reported}"));
    let body = release_body(&server, json!([with_digest, asset_json(2, "a.tar.gz", 5)]));
    server
        .mock("GET", "/repos/acme/tod/releases/tags/v1.0.0")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;
    let download = server
        .mock("GET", "/repos/acme/tod/releases/assets/2")
        .match_header("accept", "application/octet-stream")
        .with_status(200)
        .with_body("bytes")
        .expect(1)
        .create_async()
        .await;

    let store = GithubReleases::new(client(&server));
    let assets = store.list_assets("v1.0.0").await.unwrap();
    download.assert_async().await;

    let names: Vec<&str> = assets.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["a.tar.gz", "b.tar.gz"]);
    assert_eq!(assets[0].digest, ContentDigest::from_bytes(b"bytes"));
    assert_eq!(assets[1].digest, reported);
}

#[tokio::test]
async fn download_missing_asset() {
    let mut server = Server::new_async().await;
    let body = release_body(&server, json!([]));
    server
        .mock("GET", "/repos/acme/tod/releases/tags/v1.0.0")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let store = GithubReleases::new(client(&server));
    let err = store.download_asset("v1.0.0", "nope").await.unwrap_err();
    assert!(matches!(err, StorageError::AssetNotFound { .. }));
}

#[tokio::test]
async fn dispatch_posts_to_downstream_repository() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("POST", "/repos/acme/homebrew-tod/dispatches")
        .match_header("authorization", "Bearer test-token")
        .match_body(Matcher::PartialJson(json!({
            "event_type": "release-published",
            "client_payload": { "tag": "v2.3.1", "version": "2.3.1" }
        })))
        .with_status(204)
        .create_async()
        .await;

    let dispatcher = GithubDispatcher::new(client(&server));
    let event = DispatchEvent::for_cycle("acme/homebrew-tod", "release-published", "v2.3.1");
    dispatcher.dispatch(&event).await.unwrap();
    m.assert_async().await;
}

#[tokio::test]
async fn dispatch_failure_is_dispatch_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/repos/acme/homebrew-tod/dispatches")
        .with_status(404)
        .create_async()
        .await;

    let dispatcher = GithubDispatcher::new(client(&server));
    let event = DispatchEvent::for_cycle("acme/homebrew-tod", "release-published", "v2.3.1");
    let err = dispatcher.dispatch(&event).await.unwrap_err();
    assert!(matches!(err, RelayError::Dispatch { ref repository, .. } if repository == "acme/homebrew-tod"));
}

#[tokio::test]
async fn merge_approver_puts_merge() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("PUT", "/repos/acme/tod/pulls/42/merge")
        .match_body(Matcher::PartialJson(json!({ "merge_method": "squash" })))
        .with_status(200)
        .with_body(r#"{"merged":true}"#)
        .create_async()
        .await;

    let approver = GithubMergeApprover::new(client(&server));
    approver.approve(42).await.unwrap();
    m.assert_async().await;
}

#[tokio::test]
async fn merge_conflict_is_merge_error() {
    let mut server = Server::new_async().await;
    server
        .mock("PUT", "/repos/acme/tod/pulls/42/merge")
        .with_status(405)
        .with_body(r#"{"message":"Pull Request is not mergeable"}"#)
        .create_async()
        .await;

    let approver = GithubMergeApprover::new(client(&server)).with_merge_method("merge");
    let err = approver.approve(42).await.unwrap_err();
    assert!(matches!(err, RelayError::Merge { id: 42, .. }));
}
