//! Motion JPEG publisher
//!
//! Each request receives an endless `multipart/x-mixed-replace` body:
//!
//! ```text
//! --WORMHOLE\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: 5123\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! --WORMHOLE\r\n
//! ...
//! ```

use std::sync::Arc;

use axum::http::Method;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::{Error, Result};
use crate::server::{route_handler, RouteResponse};
use crate::stats::FrameGovernor;
use crate::video::{Codec, FrameBuffer, ImageFormat};

use super::{Protocol, PublishContext, StreamPublisher};

/// Default multipart boundary
pub const DEFAULT_BOUNDARY: &str = "WORMHOLE";

/// Multipart publisher options
#[derive(Debug, Clone)]
pub struct MultipartOptions {
    pub boundary: String,
}

impl Default for MultipartOptions {
    fn default() -> Self {
        Self {
            boundary: DEFAULT_BOUNDARY.to_string(),
        }
    }
}

impl MultipartOptions {
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = boundary.into();
        self
    }
}

/// Pull-based MJPEG publisher
#[derive(Debug)]
pub struct MultipartPublisher {
    route: String,
    boundary: Arc<str>,
}

impl MultipartPublisher {
    pub fn new(ctx: PublishContext<'_>) -> Result<Self> {
        Self::with_options(ctx, MultipartOptions::default())
    }

    pub fn with_options(ctx: PublishContext<'_>, options: MultipartOptions) -> Result<Self> {
        let boundary = options.boundary;
        if boundary.is_empty() || !boundary.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(Error::InvalidConfiguration(format!(
                "invalid multipart boundary {:?}",
                boundary
            )));
        }
        let boundary: Arc<str> = boundary.into();

        let governor = ctx.options.governor(&ctx.video)?;
        // Fail at construction rather than on the first request
        FrameGovernor::with_options(governor.clone())?;

        let content_type = format!("multipart/x-mixed-replace; boundary={}", boundary);
        let video = ctx.video;
        let codec = ctx.codec;
        let stream_boundary = boundary.clone();

        ctx.controller.add_route(
            &ctx.route,
            &[Method::GET],
            route_handler(move |request| {
                let video = video.clone();
                let codec = codec.clone();
                let boundary = stream_boundary.clone();
                let governor = governor.clone();
                let content_type = content_type.clone();
                async move {
                    tracing::debug!(route = %request.path, "Multipart viewer connected");
                    match FrameGovernor::with_options(governor) {
                        Ok(governor) => RouteResponse::stream(
                            content_type,
                            frame_stream(video, codec, governor, boundary),
                        )
                        .header("Cache-Control", "no-cache"),
                        Err(e) => RouteResponse::text(
                            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                            e.to_string(),
                        ),
                    }
                }
            }),
        )?;

        tracing::info!(route = %ctx.route, "Multipart publisher registered");
        Ok(Self {
            route: ctx.route,
            boundary,
        })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }
}

impl StreamPublisher for MultipartPublisher {
    fn route(&self) -> &str {
        &self.route
    }

    fn protocol(&self) -> Protocol {
        Protocol::Mjpeg
    }
}

/// One multipart part holding a JPEG
pub fn encode_part(boundary: &str, jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        boundary,
        ImageFormat::Jpeg.mime(),
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

struct StreamState {
    video: Arc<FrameBuffer>,
    codec: Arc<dyn Codec>,
    governor: FrameGovernor,
    started: bool,
}

/// Endless per-connection part stream
fn frame_stream(
    video: Arc<FrameBuffer>,
    codec: Arc<dyn Codec>,
    governor: FrameGovernor,
    boundary: Arc<str>,
) -> BoxStream<'static, Bytes> {
    let state = StreamState {
        video,
        codec,
        governor,
        started: false,
    };

    stream::unfold(state, move |mut state| {
        let boundary = boundary.clone();
        async move {
            loop {
                if state.started {
                    state.governor.advance_one_frame().await;
                }
                state.started = true;

                match state.codec.encode(&state.video.get_frame(), ImageFormat::Jpeg) {
                    Ok(jpeg) => return Some((encode_part(&boundary, &jpeg), state)),
                    Err(e) => tracing::warn!(error = %e, "Frame encode failed, skipping"),
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::publish::test_support::RecordingController;
    use crate::publish::PublishOptions;
    use crate::server::{ResponseBody, RouteRequest};
    use crate::video::{Frame, ImageCodec, VideoConfig, RGB};

    fn context<'a>(controller: &'a RecordingController, video: Arc<FrameBuffer>) -> PublishContext<'a> {
        PublishContext {
            controller,
            video,
            route: "/wormhole/stream/default/mjpeg".to_string(),
            codec: Arc::new(ImageCodec::new()),
            options: PublishOptions::new().max_fps(10.0),
        }
    }

    fn request() -> RouteRequest {
        RouteRequest {
            method: Method::GET,
            path: "/wormhole/stream/default/mjpeg".to_string(),
            params: Default::default(),
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_part_layout() {
        let part = encode_part("WORMHOLE", b"\xff\xd8abc\xff\xd9");
        let expected = b"--WORMHOLE\r\nContent-Type: image/jpeg\r\nContent-Length: 7\r\n\r\n\xff\xd8abc\xff\xd9\r\n";
        assert_eq!(&part[..], &expected[..]);
    }

    #[test]
    fn test_invalid_boundary_rejected() {
        let controller = RecordingController::new();
        let video = Arc::new(FrameBuffer::new(VideoConfig::new(8, 8)).unwrap());
        let result = MultipartPublisher::with_options(
            context(&controller, video),
            MultipartOptions::default().boundary("has space"),
        );
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
        assert!(controller.route("/wormhole/stream/default/mjpeg").is_none());
    }

    #[test]
    fn test_duplicate_route_conflicts() {
        let controller = RecordingController::new();
        let video = Arc::new(FrameBuffer::new(VideoConfig::new(8, 8)).unwrap());
        MultipartPublisher::new(context(&controller, video.clone())).unwrap();

        let result = MultipartPublisher::new(context(&controller, video));
        assert!(matches!(result, Err(Error::RouteConflict(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_request_streams_jpeg_parts() {
        let controller = RecordingController::new();
        let video = Arc::new(FrameBuffer::new(VideoConfig::new(16, 16)).unwrap());
        video.set_frame(Frame::solid(16, 16, RGB, [200, 10, 10, 0])).unwrap();

        let publisher = MultipartPublisher::new(context(&controller, video)).unwrap();
        assert_eq!(publisher.boundary(), DEFAULT_BOUNDARY);
        let handler = controller.route(publisher.route()).unwrap();

        let response = handler(request()).await;
        assert_eq!(
            response.content_type,
            "multipart/x-mixed-replace; boundary=WORMHOLE"
        );
        let ResponseBody::Stream(mut body) = response.body else {
            panic!("expected a streaming body");
        };

        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            let part = body.next().await.unwrap();
            assert!(part.starts_with(b"--WORMHOLE\r\nContent-Type: image/jpeg\r\n"));
            assert!(part.ends_with(b"\xff\xd9\r\n"));
        }
        // Two paced gaps at 10 fps
        assert!(start.elapsed() >= Duration::from_millis(190));

        // A second request is independent of the first
        let second = handler(request()).await;
        assert!(matches!(second.body, ResponseBody::Stream(_)));
    }
}
