#![cfg(not(target_arch = "wasm32"))]

use dosload::fetch::{Fetch, FetchError, Progress};
use dosload::{Controller, HostModule, HttpFetcher, LoaderConfig, LoaderOptions, LoaderState, LogStatus};
use hyper::body::Bytes;
use hyper::header::CONTENT_LENGTH;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use url::Url;

const SCRIPT: &[u8] = b"var Module = Module || {};";

/// A ZIP local file header followed by filler.
fn archive() -> Vec<u8> {
    let mut bytes = b"PK\x03\x04".to_vec();
    bytes.extend((0..256 * 1024u32).map(|i| (i % 251) as u8));
    bytes
}

/// Every byte value, twice.
fn binary() -> Vec<u8> {
    (0..=255u8).chain(0..=255u8).collect()
}

async fn start_server() -> (Url, Arc<AtomicUsize>, oneshot::Sender<()>) {
    let requests = Arc::new(AtomicUsize::new(0));

    let make_svc = {
        let requests = requests.clone();
        make_service_fn(move |_conn| {
            let requests = requests.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    requests.fetch_add(1, Ordering::SeqCst);
                    handle_request(req)
                }))
            }
        })
    };

    let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
    let builder = Server::try_bind(&addr).expect("bind");
    let local_addr = builder.local_addr();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = builder.serve(make_svc).with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
    });

    tokio::spawn(server);

    let base = Url::parse(&format!("http://{local_addr}/dos/")).expect("url");
    (base, requests, shutdown_tx)
}

fn sized(body: Vec<u8>) -> Response<Body> {
    let len = body.len();
    let mut resp = Response::new(Body::from(body));
    resp.headers_mut()
        .insert(CONTENT_LENGTH, len.to_string().parse().unwrap());
    resp
}

async fn handle_request(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let resp = match req.uri().path() {
        "/dos/components/js-dos-apiv3.js" => sized(SCRIPT.to_vec()),
        "/dos/game.zip" => sized(archive()),
        "/dos/binary.bin" => sized(binary()),
        "/dos/empty.zip" => sized(Vec::new()),
        "/dos/notes.txt" => sized(b"not an archive".to_vec()),
        "/dos/chunked.bin" => {
            // No Content-Length: the body goes out chunked.
            let (mut sender, body) = Body::channel();
            tokio::spawn(async move {
                for chunk in [&b"abc"[..], b"def", b"gh"] {
                    if sender.send_data(Bytes::from_static(chunk)).await.is_err() {
                        return;
                    }
                }
            });
            Response::new(body)
        }
        "/dos/stalled.bin" => {
            let (mut sender, body) = Body::channel();
            tokio::spawn(async move {
                let _ = sender.send_data(Bytes::from_static(b"first")).await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
            Response::new(body)
        }
        _ => {
            let mut resp = Response::new(Body::empty());
            *resp.status_mut() = StatusCode::NOT_FOUND;
            resp
        }
    };
    Ok(resp)
}

async fn fetch_with_progress(url: &Url) -> (Result<Vec<u8>, FetchError>, Vec<Progress>) {
    let mut seen = Vec::new();
    let result = HttpFetcher::new()
        .fetch(url, &CancellationToken::new(), &mut |progress| seen.push(progress))
        .await;
    (result, seen)
}

#[tokio::test]
async fn test_download_reports_monotonic_progress() {
    let (base, _requests, _shutdown) = start_server().await;
    let expected = archive();

    let (result, seen) = fetch_with_progress(&base.join("game.zip").unwrap()).await;
    let body = result.unwrap();

    assert_eq!(body, expected);
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0].received <= w[1].received));
    assert!(seen.iter().all(|p| p.expected == Some(expected.len() as u64)));
    let last = seen.last().unwrap();
    assert_eq!(last.received, expected.len() as u64);
    assert_eq!(last.percent(), 100);
}

#[tokio::test]
async fn test_binary_body_is_byte_exact() {
    let (base, _requests, _shutdown) = start_server().await;

    let (result, _) = fetch_with_progress(&base.join("binary.bin").unwrap()).await;
    assert_eq!(result.unwrap(), binary());
}

#[tokio::test]
async fn test_empty_body() {
    let (base, _requests, _shutdown) = start_server().await;

    let (result, seen) = fetch_with_progress(&base.join("empty.zip").unwrap()).await;
    assert_eq!(result.unwrap(), Vec::<u8>::new());
    // A zero total reads as unknown.
    assert!(seen.iter().all(|p| p.is_indeterminate() && p.percent() == 0));
}

#[tokio::test]
async fn test_unknown_length_is_indeterminate() {
    let (base, _requests, _shutdown) = start_server().await;

    let (result, seen) = fetch_with_progress(&base.join("chunked.bin").unwrap()).await;
    assert_eq!(result.unwrap(), b"abcdefgh".to_vec());
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|p| p.expected.is_none() && p.percent() == 0));
    assert_eq!(seen.last().unwrap().received, 8);
}

#[tokio::test]
async fn test_missing_resource_is_status_error() {
    let (base, _requests, _shutdown) = start_server().await;

    let (result, seen) = fetch_with_progress(&base.join("missing.zip").unwrap()).await;
    assert_eq!(result, Err(FetchError::HttpStatus { status: 404 }));
    assert!(seen.is_empty());
}

#[tokio::test]
async fn test_connection_failure_is_transport_error() {
    // Bind then release a port so nothing listens on it.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("http://{addr}/game.zip")).unwrap();
    let (result, _) = fetch_with_progress(&url).await;
    assert!(matches!(result, Err(FetchError::Http(_))), "{result:?}");
}

#[tokio::test]
async fn test_cancel_during_download() {
    let (base, _requests, _shutdown) = start_server().await;
    let url = base.join("stalled.bin").unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let mut updates = 0;
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        HttpFetcher::new().fetch(&url, &cancel, &mut |_| {
            updates += 1;
            trigger.cancel();
        }),
    )
    .await
    .expect("cancellation should end the download");

    assert_eq!(result, Err(FetchError::Cancelled));
    assert_eq!(updates, 1);
}

#[tokio::test]
async fn test_cancel_before_request() {
    let (base, requests, _shutdown) = start_server().await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = HttpFetcher::new()
        .fetch(&base.join("game.zip").unwrap(), &cancel, &mut |_| {})
        .await;

    assert_eq!(result, Err(FetchError::Cancelled));
    assert_eq!(requests.load(Ordering::SeqCst), 0);
}

fn host_controller(base: &Url) -> Controller<HostModule, HttpFetcher, LogStatus> {
    let config = LoaderConfig {
        base_url: Some(base.to_string()),
        ..LoaderConfig::default()
    };
    Controller::new(
        HostModule::new(),
        HttpFetcher::new(),
        LogStatus::new(),
        config,
        LoaderOptions::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_host_module_pipeline() {
    let (base, requests, _shutdown) = start_server().await;
    let mut controller = host_controller(&base);

    controller.start().await.unwrap();
    assert!(controller.module().is_ready());

    controller.run("game.zip", "GAME.EXE").await.unwrap();
    assert_eq!(controller.state(), LoaderState::Running);

    let module = controller.module();
    assert_eq!(module.mounted_archives().len(), 1);
    assert_eq!(module.mounted_archives()[0].len, archive().len());
    assert_eq!(module.launched_program(), Some("GAME.EXE"));
    assert_eq!(module.live_allocations(), 0);
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_host_module_rejects_non_archive() {
    let (base, _requests, _shutdown) = start_server().await;
    let mut controller = host_controller(&base);

    controller.start().await.unwrap();
    let err = controller.run("notes.txt", "GAME.EXE").await.unwrap_err();

    assert!(err.to_string().contains("code 1"), "{err}");
    assert_eq!(controller.state(), LoaderState::Failed);
    assert_eq!(controller.module().launched_program(), None);
    assert_eq!(controller.module().live_allocations(), 0);
}
