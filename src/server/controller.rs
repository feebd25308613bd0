//! Network controller abstraction
//!
//! Publishers and the hub register HTTP routes and socket namespaces through
//! [`NetworkController`]; they never see the HTTP framework. Routes are
//! patterns such as `/wormhole/stream/{name}/sync`, matched segment by
//! segment with a trailing slash tolerated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::error::{Error, Result};

/// Incoming HTTP request, decoupled from the server framework
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub method: Method,
    pub path: String,
    /// Values captured by `{param}` segments
    pub params: HashMap<String, String>,
    pub body: Bytes,
}

impl RouteRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Response body
pub enum ResponseBody {
    Full(Bytes),
    /// Long-lived streaming body (e.g. multipart video)
    Stream(BoxStream<'static, Bytes>),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Outgoing HTTP response
#[derive(Debug)]
pub struct RouteResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl RouteResponse {
    pub fn new(status: StatusCode, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            headers: Vec::new(),
            body: ResponseBody::Full(body.into()),
        }
    }

    pub fn html(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::new(StatusCode::OK, "text/html; charset=utf-8", body)
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::new(status, "text/plain; charset=utf-8", body)
    }

    /// Serialize `value` as JSON
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status, "application/json", body),
            Err(e) => Self::text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    pub fn stream(content_type: impl Into<String>, stream: BoxStream<'static, Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: content_type.into(),
            headers: Vec::new(),
            body: ResponseBody::Stream(stream),
        }
    }

    pub fn not_found() -> Self {
        Self::text(StatusCode::NOT_FOUND, "Not Found")
    }

    /// Add a response header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Async route handler
pub type RouteHandler = Arc<dyn Fn(RouteRequest) -> BoxFuture<'static, RouteResponse> + Send + Sync>;

/// Wrap an async closure as a [`RouteHandler`]
pub fn route_handler<F, Fut>(handler: F) -> RouteHandler
where
    F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = RouteResponse> + Send + 'static,
{
    Arc::new(move |request| Box::pin(handler(request)))
}

/// Socket lifecycle events a namespace can handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketEvent {
    Connect,
    Disconnect,
}

/// Async socket event handler
pub type MessageHandler = Arc<dyn Fn(SocketClient) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn message_handler<F, Fut>(handler: F) -> MessageHandler
where
    F: Fn(SocketClient) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |client| Box::pin(handler(client)))
}

/// Broadcast emitter for one room of a namespace
#[derive(Debug, Clone)]
pub struct Room {
    sender: broadcast::Sender<Bytes>,
}

impl Room {
    /// Send `message` to every member; returns the number of receivers
    pub fn emit(&self, message: Bytes) -> usize {
        self.sender.send(message).unwrap_or(0)
    }

    /// Number of connected members
    pub fn member_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.sender.subscribe()
    }
}

/// Rooms keyed by `(namespace, room)`
#[derive(Debug)]
pub struct RoomRegistry {
    capacity: usize,
    rooms: Mutex<HashMap<(String, String), Room>>,
}

impl RoomRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create a room
    pub fn room(&self, namespace: &str, room: &str) -> Room {
        let mut rooms = self.rooms.lock();
        rooms
            .entry((namespace.to_string(), room.to_string()))
            .or_insert_with(|| Room {
                sender: broadcast::channel(self.capacity).0,
            })
            .clone()
    }
}

/// Instruction from handlers to a connection task
#[derive(Debug)]
pub(crate) enum ClientCommand {
    Join(broadcast::Receiver<Bytes>),
}

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to one connected socket client
#[derive(Debug, Clone)]
pub struct SocketClient {
    id: u64,
    namespace: String,
    rooms: Arc<RoomRegistry>,
    commands: mpsc::UnboundedSender<ClientCommand>,
}

impl SocketClient {
    pub(crate) fn new(
        namespace: String,
        rooms: Arc<RoomRegistry>,
        commands: mpsc::UnboundedSender<ClientCommand>,
    ) -> Self {
        Self {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            namespace,
            rooms,
            commands,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Receive everything emitted to `room` from now on
    pub fn join_room(&self, room: &str) {
        let receiver = self.rooms.room(&self.namespace, room).subscribe();
        if self.commands.send(ClientCommand::Join(receiver)).is_err() {
            tracing::debug!(client = self.id, room = room, "Join ignored, client already gone");
        }
    }
}

/// Server capability needed by publishers and the hub
pub trait NetworkController: Send + Sync {
    /// Register an HTTP route; `RouteConflict` if the pattern is taken
    fn add_route(&self, pattern: &str, methods: &[Method], handler: RouteHandler) -> Result<()>;

    /// Register a socket event handler on `namespace`
    fn add_message_handler(
        &self,
        event: SocketEvent,
        handler: MessageHandler,
        namespace: &str,
    ) -> Result<()>;

    /// Broadcast emitter for a room
    fn room(&self, namespace: &str, room: &str) -> Room;

    /// Registered route patterns and socket namespaces, in registration order
    fn routes(&self) -> Vec<String>;

    /// Drop a route or socket namespace; false when nothing was registered
    fn remove_route(&self, path: &str) -> bool;
}

/// Parsed route pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        if !pattern.starts_with('/') {
            return Err(Error::InvalidConfiguration(format!(
                "route must start with '/': {}",
                pattern
            )));
        }

        let mut segments = Vec::new();
        for part in split_path(pattern) {
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some("") => {
                    return Err(Error::InvalidConfiguration(format!(
                        "empty parameter in route {}",
                        pattern
                    )))
                }
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: normalize(pattern),
            segments,
        })
    }

    /// Normalized pattern text
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Number of literal segments; more specific patterns win
    pub fn specificity(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Captured parameters when `path` matches
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = split_path(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Path without a trailing slash (root stays `/`)
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
