//! Socket push publisher
//!
//! Connected clients join the [`VIDEO_ROOM`] of the publisher's namespace.
//! One broadcast loop per publisher runs while the client count is above
//! zero: it is started on the 0 → 1 transition and cancelled on 1 → 0.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::server::{message_handler, Room, SocketClient, SocketEvent};
use crate::stats::{FrameGovernor, GovernorOptions};
use crate::video::{Codec, FrameBuffer};

use super::{Protocol, PublishContext, PushFormat, StreamPublisher};

/// Room every client of a socket publisher joins
pub const VIDEO_ROOM: &str = "video_feed";

/// Socket publisher options
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub room: String,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            room: VIDEO_ROOM.to_string(),
        }
    }
}

impl SocketOptions {
    pub fn room(mut self, room: impl Into<String>) -> Self {
        self.room = room.into();
        self
    }
}

#[derive(Debug, Default)]
struct Lifecycle {
    /// Ids of clients the broadcast loop is serving
    clients: HashSet<u64>,
    running: Option<CancellationToken>,
}

struct Shared {
    route: String,
    video: Arc<FrameBuffer>,
    codec: Arc<dyn Codec>,
    format: PushFormat,
    room: Room,
    governor: GovernorOptions,
    lifecycle: Mutex<Lifecycle>,
    starts: AtomicU64,
    stops: AtomicU64,
}

impl Shared {
    /// Count `client` in, starting the loop on the first one.
    ///
    /// A client is only counted once a loop is serving it, so a failed
    /// start leaves the count untouched.
    fn connect(self: &Arc<Self>, client: u64) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.running.is_none() {
            let governor = FrameGovernor::with_options(self.governor.clone())?;
            let token = CancellationToken::new();
            lifecycle.running = Some(token.clone());
            self.starts.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(broadcast_loop(self.clone(), governor, token));
        }
        lifecycle.clients.insert(client);
        Ok(())
    }

    fn disconnect(self: &Arc<Self>, client: u64) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.clients.remove(&client) || !lifecycle.clients.is_empty() {
            return;
        }
        if let Some(token) = lifecycle.running.take() {
            token.cancel();
            self.stops.fetch_add(1, Ordering::Relaxed);
        }
    }
}

async fn broadcast_loop(shared: Arc<Shared>, governor: FrameGovernor, token: CancellationToken) {
    tracing::info!(route = %shared.route, "Broadcast loop started");

    while !token.is_cancelled() {
        let frame = shared.video.get_frame();
        match shared.format.encode(shared.codec.as_ref(), &frame) {
            Ok(payload) => {
                let receivers = shared.room.emit(payload);
                tracing::trace!(route = %shared.route, receivers, "Frame emitted");
            }
            Err(e) => tracing::warn!(route = %shared.route, error = %e, "Frame encode failed, skipping"),
        }
        drop(frame);

        // Let connection tasks drain the room before pacing
        tokio::task::yield_now().await;

        tokio::select! {
            _ = token.cancelled() => break,
            _ = governor.advance_one_frame() => {}
        }
    }

    tracing::info!(route = %shared.route, "Broadcast loop stopped");
}

/// Push publisher broadcasting encoded frames to socket clients
pub struct SocketPublisher {
    protocol: Protocol,
    shared: Arc<Shared>,
}

impl SocketPublisher {
    pub fn new(ctx: PublishContext<'_>, format: PushFormat) -> Result<Self> {
        Self::with_options(ctx, format, SocketOptions::default())
    }

    pub fn with_options(
        ctx: PublishContext<'_>,
        format: PushFormat,
        options: SocketOptions,
    ) -> Result<Self> {
        let governor = ctx.options.governor(&ctx.video)?;
        FrameGovernor::with_options(governor.clone())?;

        let shared = Arc::new(Shared {
            room: ctx.controller.room(&ctx.route, &options.room),
            route: ctx.route,
            video: ctx.video,
            codec: ctx.codec,
            format,
            governor,
            lifecycle: Mutex::new(Lifecycle::default()),
            starts: AtomicU64::new(0),
            stops: AtomicU64::new(0),
        });

        let on_connect = shared.clone();
        let room = options.room.clone();
        ctx.controller.add_message_handler(
            SocketEvent::Connect,
            message_handler(move |client: SocketClient| {
                let shared = on_connect.clone();
                let room = room.clone();
                async move {
                    client.join_room(&room);
                    match shared.connect(client.id()) {
                        Ok(()) => tracing::debug!(route = %shared.route, client = client.id(), "Socket viewer connected"),
                        Err(e) => tracing::error!(route = %shared.route, error = %e, "Cannot start broadcast loop"),
                    }
                }
            }),
            &shared.route,
        )?;

        let on_disconnect = shared.clone();
        ctx.controller.add_message_handler(
            SocketEvent::Disconnect,
            message_handler(move |client: SocketClient| {
                let shared = on_disconnect.clone();
                async move {
                    shared.disconnect(client.id());
                    tracing::debug!(route = %shared.route, client = client.id(), "Socket viewer disconnected");
                }
            }),
            &shared.route,
        )?;

        let protocol = match format {
            PushFormat::Jpeg => Protocol::RawJpeg,
            PushFormat::Png => Protocol::RawPng,
            PushFormat::Raw => Protocol::Raw,
        };
        tracing::info!(route = %shared.route, protocol = %protocol, "Socket publisher registered");
        Ok(Self { protocol, shared })
    }

    /// Currently connected clients
    pub fn client_count(&self) -> usize {
        self.shared.lifecycle.lock().clients.len()
    }

    /// Whether the broadcast loop is live
    pub fn is_streaming(&self) -> bool {
        self.shared.lifecycle.lock().running.is_some()
    }

    /// Times the broadcast loop was started
    pub fn start_count(&self) -> u64 {
        self.shared.starts.load(Ordering::Relaxed)
    }

    /// Times the broadcast loop was stopped
    pub fn stop_count(&self) -> u64 {
        self.shared.stops.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SocketPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketPublisher")
            .field("route", &self.shared.route)
            .field("protocol", &self.protocol)
            .field("clients", &self.client_count())
            .finish()
    }
}

impl StreamPublisher for SocketPublisher {
    fn route(&self) -> &str {
        &self.shared.route
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }
}
