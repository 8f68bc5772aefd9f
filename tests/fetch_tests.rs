//! Integration tests for the direct file fetcher
//!
//! A one-shot HTTP responder on localhost stands in for the raw-content
//! host. These tests verify:
//! - Authorization and User-Agent headers are sent
//! - File names with spaces are percent-encoded in the request path
//! - The destination keeps its previous content on any failure
//! - No `.temp` file is left behind

use assetpull::models::{Credentials, FetchTarget, SourceLocator};
use assetpull::services::fetch::{FetchError, FileFetcher, temp_path};
use camino::Utf8PathBuf;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accept one connection, answer with `response`, return the raw request
async fn serve_once(response: &'static [u8]) -> (SocketAddr, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if request.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        socket.write_all(response).await.unwrap();
        let _ = socket.shutdown().await;
        String::from_utf8_lossy(&request).into_owned()
    });

    (addr, handle)
}

fn local_source(addr: SocketAddr) -> SourceLocator {
    SourceLocator::github("studio", "bundle", true).with_raw_host(format!("http://{}", addr))
}

fn fetcher() -> FileFetcher {
    FileFetcher::new("assetpull-test/1.0", Duration::from_secs(10)).unwrap()
}

fn destination_with_old_content(temp: &TempDir) -> Utf8PathBuf {
    let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
    let dest = root.join("Settings/Pipeline Asset.asset");
    fs::create_dir_all(dest.parent().unwrap()).unwrap();
    fs::write(&dest, "old").unwrap();
    dest
}

#[tokio::test]
async fn test_fetch_replaces_destination() {
    let (addr, server) =
        serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: close\r\n\r\nnew").await;
    let temp = TempDir::new().unwrap();
    let dest = destination_with_old_content(&temp);
    let target = FetchTarget::new("Pipeline Asset.asset", dest.clone(), "pipeline asset");

    let path = fetcher()
        .fetch(&local_source(addr), &Credentials::Token("abc123".to_string()), &target)
        .await
        .unwrap();

    assert_eq!(path, dest);
    assert_eq!(fs::read_to_string(&dest).unwrap(), "new");
    assert!(!temp_path(&dest).exists());

    let request = server.await.unwrap().to_lowercase();
    assert!(request.starts_with("get /studio/bundle/main/pipeline%20asset.asset "), "{}", request);
    assert!(request.contains("authorization: token abc123"));
    assert!(request.contains("user-agent: assetpull-test/1.0"));
}

#[tokio::test]
async fn test_basic_credentials_header() {
    let (addr, server) =
        serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok").await;
    let temp = TempDir::new().unwrap();
    let dest = Utf8PathBuf::try_from(temp.path().join("nested/dir/file.asset")).unwrap();
    let target = FetchTarget::new("file.asset", dest.clone(), "file");
    let credentials = Credentials::Basic {
        username: "alice".to_string(),
        password: "secret".to_string(),
    };

    fetcher().fetch(&local_source(addr), &credentials, &target).await.unwrap();

    // Parent directories are created on demand
    assert_eq!(fs::read_to_string(&dest).unwrap(), "ok");
    let request = server.await.unwrap().to_lowercase();
    assert!(request.contains("authorization: basic ywxpy2u6c2vjcmv0"));
}

#[tokio::test]
async fn test_not_found_keeps_previous_content() {
    let (addr, _server) = serve_once(
        b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot found",
    )
    .await;
    let temp = TempDir::new().unwrap();
    let dest = destination_with_old_content(&temp);
    let target = FetchTarget::new("Pipeline Asset.asset", dest.clone(), "pipeline asset");

    let err = fetcher()
        .fetch(&local_source(addr), &Credentials::None, &target)
        .await
        .unwrap_err();

    match err {
        FetchError::Status { status, reason } => {
            assert_eq!(status, 404);
            assert_eq!(reason, "Not Found");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(fs::read_to_string(&dest).unwrap(), "old");
    assert!(!temp_path(&dest).exists());
}

#[tokio::test]
async fn test_truncated_body_keeps_previous_content() {
    let (addr, _server) = serve_once(
        b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\npartial",
    )
    .await;
    let temp = TempDir::new().unwrap();
    let dest = destination_with_old_content(&temp);
    let target = FetchTarget::new("Pipeline Asset.asset", dest.clone(), "pipeline asset");

    let result = fetcher()
        .fetch(&local_source(addr), &Credentials::None, &target)
        .await;

    assert!(result.is_err());
    assert_eq!(fs::read_to_string(&dest).unwrap(), "old");
    assert!(!temp_path(&dest).exists());
}
