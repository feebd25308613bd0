//! End-to-end tests against a real server on an ephemeral port

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_test::assert_ok;
use wormhole::publish::{encode_part, DEFAULT_BOUNDARY};
use wormhole::source::GeneratorSource;
use wormhole::video::{Codec, ImageCodec, ImageFormat, RGB};
use wormhole::viewer::{MultipartDecoder, MultipartViewer, ViewerState};
use wormhole::{
    Error, Frame, FrameBuffer, Protocol, ServerConfig, Source, StreamOptions, VideoConfig,
    ViewerOptions, Wormhole,
};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;
const RED: [u8; 4] = [220, 30, 30, 0];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn local_config() -> ServerConfig {
    ServerConfig::with_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
}

async fn start_hub() -> (Wormhole, String) {
    init_tracing();
    let hub = Wormhole::new(local_config()).unwrap();
    let addr = hub.spawn().await.unwrap();
    (hub, format!("http://{}", addr))
}

fn red_source() -> Source {
    GeneratorSource::spawn(VideoConfig::new(WIDTH, HEIGHT).max_fps(20.0), |_| {
        Ok(Some(Frame::solid(WIDTH, HEIGHT, RGB, RED)))
    })
    .unwrap()
}

/// Poll until the buffer shows a red frame
async fn wait_for_red(video: &Arc<FrameBuffer>) {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let frame = video.get_frame();
            if let Some(pixel) = frame.pixel(WIDTH / 2, HEIGHT / 2) {
                if pixel[0] > 150 && pixel[1] < 100 && pixel[2] < 100 {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "no frame received, last frame {:?}", video.get_frame());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_endpoints() {
    let (hub, base) = start_hub().await;
    let source = red_source();
    assert_ok!(hub.stream_video(source.video().clone(), StreamOptions::new().name("Demo")));

    let http = reqwest::Client::new();

    let response = http
        .post(format!("{}/wormhole/sync", base))
        .json(&serde_json::json!({
            "version": wormhole::VERSION,
            "supported_protocols": ["MJPEG"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["ready"], true);
    assert_eq!(body["managed_streams"], serde_json::json!(["demo"]));
    assert_eq!(
        body["supported_protocols"],
        serde_json::json!(["RAWJPEG", "RAWPNG", "MJPEG", "RAW"])
    );

    let response = http
        .post(format!("{}/wormhole/sync", base))
        .json(&serde_json::json!({ "version": wormhole::VERSION }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["ready"], false);

    // Trailing slash tolerated
    let response = http
        .get(format!("{}/wormhole/stream/demo/sync/", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["stream_name"], "demo");
    assert_eq!(body["stream_info"]["width"], WIDTH);
    assert_eq!(body["stream_info"]["height"], HEIGHT);
    assert_eq!(body["stream_info"]["pixel_size"], 3);
    assert_eq!(body["stream_info"]["max_fps"], 20.0);

    let response = http
        .get(format!("{}/wormhole/stream/missing/sync", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = http.get(format!("{}/wormhole/sync", base)).send().await.unwrap();
    assert_eq!(response.status(), 405);

    let response = http.get(format!("{}/nothing/here", base)).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_welcome_page() {
    let (_hub, base) = start_hub().await;

    let response = reqwest::get(format!("{}/", base)).await.unwrap();
    assert_eq!(response.status(), 200);
    let page = response.text().await.unwrap();
    assert!(page.contains("Welcome to Wormhole!"));
    assert!(page.contains(wormhole::VERSION));
    assert!(!page.contains("Debug Information"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_multipart_stream_content() {
    let (hub, base) = start_hub().await;
    let source = red_source();
    hub.stream_video(
        source.video().clone(),
        StreamOptions::new().protocols(vec![Protocol::Mjpeg]),
    )
    .unwrap();

    let response = reqwest::get(format!("{}/wormhole/stream/default/mjpeg", base))
        .await
        .unwrap();
    assert_eq!(
        response.headers()["content-type"],
        "multipart/x-mixed-replace; boundary=WORMHOLE"
    );

    let mut decoder = MultipartDecoder::new(Some("WORMHOLE"));
    let mut response = response;
    let part = loop {
        let chunk = response.chunk().await.unwrap().unwrap();
        decoder.push(&chunk);
        if let Some(part) = decoder.next_part() {
            break part;
        }
    };
    assert_eq!(&part[..2], &[0xFF, 0xD8]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_view_over_every_protocol() {
    let (hub, base) = start_hub().await;

    for protocol in [Protocol::RawJpeg, Protocol::RawPng, Protocol::Mjpeg, Protocol::Raw] {
        let source = red_source();
        let name = protocol.route_suffix();
        hub.stream_video(
            source.video().clone(),
            StreamOptions::new().name(name.clone()).protocols(vec![protocol]),
        )
        .unwrap();

        let local = Wormhole::new(local_config().disable_welcome_screen()).unwrap();
        let viewer = assert_ok!(local.view(&base, &name).await);
        assert_eq!(viewer.protocol(), protocol);
        assert_eq!(viewer.video().size(), (WIDTH, HEIGHT));
        assert_eq!(viewer.state(), ViewerState::Connected);

        wait_for_red(viewer.video()).await;
        viewer.close();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_view_prefers_first_stream_protocol() {
    let (hub, base) = start_hub().await;
    let source = red_source();
    hub.stream_video(source.video().clone(), StreamOptions::new())
        .unwrap();

    let local = Wormhole::new(local_config()).unwrap();
    let viewer = local.view(base.trim_start_matches("http://"), "DEFAULT").await.unwrap();
    assert_eq!(viewer.protocol(), Protocol::RawJpeg);
    assert!(viewer.url().ends_with("/wormhole/stream/default/rawjpeg"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_view_unknown_stream() {
    let (_hub, base) = start_hub().await;
    let local = Wormhole::new(local_config()).unwrap();

    let result = local.view(&base, "missing").await;
    assert!(matches!(result, Err(Error::StreamNotFound(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_viewer_without_reconnect_goes_blank() {
    init_tracing();

    // A finite multipart body: two frames, then the stream ends
    let jpeg = ImageCodec::new()
        .encode(&Frame::solid(WIDTH, HEIGHT, RGB, RED), ImageFormat::Jpeg)
        .unwrap();
    let mut body = Vec::new();
    for _ in 0..2 {
        body.extend_from_slice(&encode_part(DEFAULT_BOUNDARY, &jpeg));
    }
    let app = axum::Router::new().route(
        "/finite",
        axum::routing::get(move || {
            let body = body.clone();
            async move {
                (
                    [("content-type", "multipart/x-mixed-replace; boundary=WORMHOLE")],
                    body,
                )
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });

    let viewer = MultipartViewer::connect(
        format!("http://{}/finite", addr),
        ViewerOptions::new(WIDTH, HEIGHT).auto_reconnect(false),
    )
    .await
    .unwrap();

    let mut state = viewer.subscribe_state();
    let stopped = tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == ViewerState::Stopped),
    )
    .await;
    assert!(stopped.is_ok());
    assert!(viewer.video().get_frame().is_blank());
}
