use super::*;
use axum::Json;
use axum::Router;
use axum::extract::Multipart;
use axum::http::StatusCode;
use axum::routing::post;
use serde_json::{Value, json};

async fn accept_upload(mut multipart: Multipart) -> Result<Json<Value>, StatusCode> {
    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        if field.name() == Some("file") {
            let name = field.file_name().unwrap_or("unnamed").to_owned();
            let bytes = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
            return Ok(Json(json!({ "url": format!("https://cdn.test/{name}?len={}", bytes.len()) })));
        }
    }
    Err(StatusCode::BAD_REQUEST)
}

async fn broken() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn no_url() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// Serve the mock uploader on an ephemeral port and return its base URL.
async fn spawn_uploader() -> String {
    let app = Router::new()
        .route("/upload", post(accept_upload))
        .route("/broken", post(broken))
        .route("/no-url", post(no_url));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock uploader");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn png() -> ImageFile {
    ImageFile { file_name: "cat.png".into(), content_type: "image/png".into(), bytes: vec![0x89, b'P', b'N', b'G'] }
}

#[tokio::test]
async fn successful_upload_returns_url() {
    let base = spawn_uploader().await;
    let uploader = HttpUploader::new(format!("{base}/upload"));

    let url = uploader.upload(png()).await.expect("upload should succeed");
    assert_eq!(url, "https://cdn.test/cat.png?len=4");
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let base = spawn_uploader().await;
    let uploader = HttpUploader::new(format!("{base}/broken"));

    let err = uploader.upload(png()).await.expect_err("upload should fail");
    assert!(matches!(err, UploadError::Status(500)));
}

#[tokio::test]
async fn response_without_url_is_an_error() {
    let base = spawn_uploader().await;
    let uploader = HttpUploader::new(format!("{base}/no-url"));

    let err = uploader.upload(png()).await.expect_err("upload should fail");
    assert!(matches!(err, UploadError::MissingUrl));
}

#[tokio::test]
async fn unreachable_endpoint_is_an_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let uploader = HttpUploader::new(format!("http://{addr}/upload"));
    let err = uploader.upload(png()).await.expect_err("upload should fail");
    assert!(matches!(err, UploadError::Http(_)));
}

#[tokio::test]
async fn no_uploader_always_fails() {
    let err = NoUploader.upload(png()).await.expect_err("upload should fail");
    assert!(matches!(err, UploadError::Unavailable));
}

#[tokio::test]
async fn read_guesses_content_type() {
    let dir = std::env::temp_dir().join(format!("chat-session-upload-{}", std::process::id()));
    tokio::fs::create_dir_all(&dir).await.expect("mkdir");
    let path = dir.join("Photo.JPG");
    tokio::fs::write(&path, b"jpeg-bytes").await.expect("write");

    let file = ImageFile::read(&path).await.expect("read");
    assert_eq!(file.file_name, "Photo.JPG");
    assert_eq!(file.content_type, "image/jpeg");
    assert_eq!(file.bytes, b"jpeg-bytes");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[test]
fn unknown_extension_is_octet_stream() {
    assert_eq!(content_type_for(Path::new("notes.txt")), "application/octet-stream");
    assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
}
