//! Socket viewer

use std::sync::Arc;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{Error, Result};
use crate::publish::{Protocol, PushFormat};
use crate::video::{Codec, FrameBuffer, ImageCodec};

use super::{reconnect, Viewer, ViewerOptions, ViewerState};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receives frames pushed by a socket publisher
pub struct SocketViewer;

impl SocketViewer {
    /// Connect to the publisher namespace at `url` (`http`, `https`, `ws` or `wss`)
    pub async fn connect(url: String, format: PushFormat, options: ViewerOptions) -> Result<Viewer> {
        let video = options.buffer("SocketViewer")?;
        let endpoint = websocket_url(&url)?;
        let socket = open(&endpoint).await?;

        let protocol = match format {
            PushFormat::Jpeg => Protocol::RawJpeg,
            PushFormat::Png => Protocol::RawPng,
            PushFormat::Raw => Protocol::Raw,
        };
        tracing::info!(url = %endpoint, protocol = %protocol, "Socket viewer connected");

        Ok(Viewer::spawn(url, protocol, video, move |video, state| {
            run(endpoint, socket, format, video, options.auto_reconnect, state)
        }))
    }
}

/// Map an HTTP URL onto its WebSocket equivalent
pub fn websocket_url(url: &str) -> Result<String> {
    let mut parsed = Url::parse(url)
        .map_err(|e| Error::InvalidConfiguration(format!("invalid url {}: {}", url, e)))?;

    let scheme = match parsed.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::UnsupportedProtocol(other.to_string())),
    };
    parsed
        .set_scheme(scheme)
        .map_err(|_| Error::InvalidConfiguration(format!("invalid url {}", url)))?;
    Ok(parsed.to_string())
}

async fn open(endpoint: &str) -> Result<Socket> {
    let (socket, _) = tokio_tungstenite::connect_async(endpoint)
        .await
        .map_err(|e| Error::source_unavailable(endpoint, e))?;
    Ok(socket)
}

async fn run(
    endpoint: String,
    mut socket: Socket,
    format: PushFormat,
    video: Arc<FrameBuffer>,
    auto_reconnect: bool,
    state: watch::Sender<ViewerState>,
) {
    let codec = ImageCodec::new();
    loop {
        receive(&mut socket, format, &video, &codec).await;

        if !auto_reconnect {
            video.set_blank_frame();
            state.send_replace(ViewerState::Stopped);
            tracing::info!(url = %endpoint, "Viewer stopped");
            return;
        }

        state.send_replace(ViewerState::Reconnecting);
        socket = reconnect(&endpoint, || open(&endpoint)).await;
        video.governor().reset_statistics();
        state.send_replace(ViewerState::Connected);
    }
}

/// Apply frames until the connection closes
async fn receive(socket: &mut Socket, format: PushFormat, video: &FrameBuffer, codec: &dyn Codec) {
    while let Some(message) = socket.next().await {
        match message {
            Ok(Message::Binary(payload)) => {
                let applied = format
                    .decode(codec, &payload, video)
                    .and_then(|frame| video.set_frame(frame));
                if let Err(e) = applied {
                    video.render_error(&e, "Invalid frame received").await;
                }
            }
            Ok(Message::Close(_)) => {
                tracing::info!("Socket closed by publisher");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Socket receive failed");
                return;
            }
        }
    }
}
