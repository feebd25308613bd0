//! MJPEG viewer

use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::publish::Protocol;
use crate::source::fit;
use crate::video::{Codec, FrameBuffer, ImageCodec};

use super::{reconnect, MultipartDecoder, Viewer, ViewerOptions, ViewerState};

/// Reads a `multipart/x-mixed-replace` JPEG stream into a buffer
pub struct MultipartViewer;

impl MultipartViewer {
    /// Open `url` and start decoding
    ///
    /// The first request must succeed; later failures are retried when
    /// `auto_reconnect` is set.
    pub async fn connect(url: String, options: ViewerOptions) -> Result<Viewer> {
        let video = options.buffer("MultipartViewer")?;
        let client = reqwest::Client::new();
        let response = open(&client, &url).await?;

        tracing::info!(url = %url, "Multipart viewer connected");
        let task_url = url.clone();
        Ok(Viewer::spawn(url, Protocol::Mjpeg, video, move |video, state| {
            run(client, task_url, response, video, options.auto_reconnect, state)
        }))
    }
}

async fn open(client: &reqwest::Client, url: &str) -> Result<reqwest::Response> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::source_unavailable(url, e))?;

    if !response.status().is_success() {
        return Err(Error::source_unavailable(
            url,
            format!("HTTP {}", response.status()),
        ));
    }
    Ok(response)
}

async fn run(
    client: reqwest::Client,
    url: String,
    mut response: reqwest::Response,
    video: Arc<FrameBuffer>,
    auto_reconnect: bool,
    state: watch::Sender<ViewerState>,
) {
    let codec = ImageCodec::new();
    loop {
        match pump(response, &video, &codec).await {
            Ok(()) => tracing::info!(url = %url, "Stream ended"),
            Err(e) => tracing::warn!(url = %url, error = %e, "Stream failed"),
        }

        if !auto_reconnect {
            video.set_blank_frame();
            state.send_replace(ViewerState::Stopped);
            tracing::info!(url = %url, "Viewer stopped");
            return;
        }

        state.send_replace(ViewerState::Reconnecting);
        response = reconnect(&url, || open(&client, &url)).await;
        video.governor().reset_statistics();
        state.send_replace(ViewerState::Connected);
    }
}

/// Decode parts until the body ends or a part fails to decode
async fn pump(response: reqwest::Response, video: &FrameBuffer, codec: &dyn Codec) -> Result<()> {
    let mut decoder = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(MultipartDecoder::from_content_type)
        .unwrap_or_else(|| MultipartDecoder::new(None));

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        decoder.push(&chunk?);
        while let Some(part) = decoder.next_part() {
            let frame = codec.decode(&part, video.depth())?;
            video.set_frame(fit(codec, video, frame)?)?;
            video.governor().advance_one_frame().await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_url_is_unavailable() {
        // Port 9 (discard) is closed on test hosts
        let result = MultipartViewer::connect(
            "http://127.0.0.1:9/wormhole/stream/default/mjpeg".to_string(),
            ViewerOptions::new(64, 48),
        )
        .await;

        assert!(matches!(result, Err(Error::SourceUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_invalid_dimensions_rejected() {
        let result = MultipartViewer::connect(
            "http://127.0.0.1:9/".to_string(),
            ViewerOptions::new(0, 48),
        )
        .await;

        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }
}
