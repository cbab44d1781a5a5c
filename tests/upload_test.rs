mod common;

use common::{spawn_app, spawn_app_with};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};

#[tokio::test]
async fn upload_document_works() {
    let app = spawn_app().await;
    let data = b"a plain text document".to_vec();
    let expected_checksum = format!("{:x}", Sha256::digest(&data));

    let response = app.upload("test.txt", "text/plain", data).await;
    assert_eq!(StatusCode::CREATED, response.status());

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["filename"], "test.txt");
    assert_eq!(body["content_type"], "text/plain");
    assert_eq!(body["size"], 21);
    assert_eq!(body["owner_id"], "test_user_123");
    assert_eq!(body["checksum"], expected_checksum.as_str());
    assert_eq!(body["processing_attempts"], 0);

    // Never pending once the response is returned: the record is durable and
    // at most waiting for its worker.
    let status = body["status"].as_str().unwrap();
    assert!(
        ["uploaded", "processing", "processed"].contains(&status),
        "unexpected status {}",
        status
    );

    // Record is immediately visible.
    let doc_id = body["id"].as_str().unwrap();
    let fetched = app.get_document(doc_id).await;
    assert_eq!(StatusCode::OK, fetched.status());
}

#[tokio::test]
async fn upload_rejects_disallowed_extension() {
    let app = spawn_app().await;

    let response = app.upload("malware.exe", "text/plain", vec![0; 64]).await;
    assert_eq!(StatusCode::BAD_REQUEST, response.status());

    // No record was left behind.
    let list: serde_json::Value = app
        .client
        .get(format!("{}/documents", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn upload_rejects_disallowed_content_type() {
    let app = spawn_app().await;
    let response = app.upload("page.txt", "text/html", b"<html/>".to_vec()).await;
    assert_eq!(StatusCode::BAD_REQUEST, response.status());
}

#[tokio::test]
async fn upload_rejects_oversize_file_before_any_write() {
    let app = spawn_app_with(|config| {
        config.upload.max_file_size = 1024;
    })
    .await;

    let response = app.upload("big.txt", "text/plain", vec![b'x'; 2048]).await;
    assert_eq!(StatusCode::BAD_REQUEST, response.status());

    let list: serde_json::Value = app
        .client
        .get(format!("{}/documents", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn upload_without_file_field_is_rejected() {
    let app = spawn_app().await;
    let form = reqwest::multipart::Form::new();
    let response = app
        .client
        .post(format!("{}/documents", app.address))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::BAD_REQUEST, response.status());
}
