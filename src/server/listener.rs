//! HTTP server listener
//!
//! [`HttpController`] is the axum implementation of [`NetworkController`].
//! Routes are registered at runtime, so a single fallback handler dispatches
//! every request against the route table. Requests to a registered socket
//! namespace are upgraded to WebSocket connections.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, FromRequestParts, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::stream::SelectAll;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::CorsLayer;

use crate::error::{Error, Result};
use crate::server::config::ServerConfig;
use crate::server::controller::{
    normalize, ClientCommand, MessageHandler, NetworkController, ResponseBody, Room,
    RoomRegistry, RouteHandler, RoutePattern, RouteRequest, RouteResponse, SocketClient,
    SocketEvent,
};

struct RouteEntry {
    pattern: RoutePattern,
    methods: Vec<Method>,
    handler: RouteHandler,
}

#[derive(Default)]
struct Namespace {
    handlers: HashMap<SocketEvent, MessageHandler>,
}

/// Shared routing state
struct ControllerState {
    routes: RwLock<Vec<RouteEntry>>,
    namespaces: RwLock<HashMap<String, Namespace>>,
    /// Registration order of routes and namespaces
    order: RwLock<Vec<String>>,
    rooms: Arc<RoomRegistry>,
    body_limit: usize,
}

impl ControllerState {
    fn route_taken(&self, pattern: &str) -> bool {
        self.routes
            .read()
            .iter()
            .any(|r| r.pattern.as_str() == pattern)
    }

    fn find_route(&self, path: &str) -> Option<(RouteHandler, Vec<Method>, HashMap<String, String>)> {
        let routes = self.routes.read();
        routes
            .iter()
            .filter_map(|r| r.pattern.matches(path).map(|params| (r, params)))
            .max_by_key(|(r, _)| r.pattern.specificity())
            .map(|(r, params)| (r.handler.clone(), r.methods.clone(), params))
    }

    fn handler(&self, namespace: &str, event: SocketEvent) -> Option<MessageHandler> {
        self.namespaces
            .read()
            .get(namespace)
            .and_then(|ns| ns.handlers.get(&event).cloned())
    }
}

/// axum-based network controller
#[derive(Clone)]
pub struct HttpController {
    config: ServerConfig,
    state: Arc<ControllerState>,
}

impl HttpController {
    pub fn new(config: ServerConfig) -> Self {
        let state = Arc::new(ControllerState {
            routes: RwLock::new(Vec::new()),
            namespaces: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            rooms: Arc::new(RoomRegistry::new(config.room_capacity)),
            body_limit: config.body_limit,
        });
        Self { config, state }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    fn router(&self) -> Router {
        let router = Router::new()
            .fallback(dispatch)
            .layer(DefaultBodyLimit::max(self.config.body_limit))
            .with_state(self.state.clone());

        if self.config.cors {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_until(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "Wormhole server listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// The listener stops accepting; connections already open are not drained.
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.serve(listener) => result,
        }
    }
}

impl std::fmt::Debug for HttpController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpController")
            .field("bind_addr", &self.config.bind_addr)
            .field("routes", &self.routes())
            .finish()
    }
}

impl NetworkController for HttpController {
    fn add_route(&self, pattern: &str, methods: &[Method], handler: RouteHandler) -> Result<()> {
        let pattern = RoutePattern::parse(pattern)?;
        let key = pattern.as_str().to_string();

        if self.state.route_taken(&key) || self.state.namespaces.read().contains_key(&key) {
            return Err(Error::RouteConflict(key));
        }

        self.state.routes.write().push(RouteEntry {
            pattern,
            methods: methods.to_vec(),
            handler,
        });
        self.state.order.write().push(key.clone());
        tracing::debug!(route = %key, "Route registered");
        Ok(())
    }

    fn add_message_handler(
        &self,
        event: SocketEvent,
        handler: MessageHandler,
        namespace: &str,
    ) -> Result<()> {
        let key = normalize(namespace);
        if self.state.route_taken(&key) {
            return Err(Error::RouteConflict(key));
        }

        let mut namespaces = self.state.namespaces.write();
        let is_new = !namespaces.contains_key(&key);
        let entry = namespaces.entry(key.clone()).or_default();
        if entry.handlers.contains_key(&event) {
            return Err(Error::RouteConflict(format!("{} ({:?})", key, event)));
        }
        entry.handlers.insert(event, handler);
        drop(namespaces);

        if is_new {
            self.state.order.write().push(key.clone());
        }
        tracing::debug!(namespace = %key, event = ?event, "Socket handler registered");
        Ok(())
    }

    fn room(&self, namespace: &str, room: &str) -> Room {
        self.state.rooms.room(&normalize(namespace), room)
    }

    fn routes(&self) -> Vec<String> {
        self.state.order.read().clone()
    }

    fn remove_route(&self, path: &str) -> bool {
        let key = normalize(path);
        let route_removed = {
            let mut routes = self.state.routes.write();
            let before = routes.len();
            routes.retain(|r| r.pattern.as_str() != key);
            routes.len() != before
        };
        let namespace_removed = self.state.namespaces.write().remove(&key).is_some();

        let removed = route_removed || namespace_removed;
        if removed {
            self.state.order.write().retain(|r| *r != key);
            tracing::debug!(route = %key, "Route removed");
        }
        removed
    }
}

async fn dispatch(State(state): State<Arc<ControllerState>>, request: Request) -> Response {
    let (mut parts, body) = request.into_parts();
    let path = normalize(parts.uri.path());

    if state.namespaces.read().contains_key(&path) {
        return match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => {
                upgrade.on_upgrade(move |socket| handle_socket(state, path, socket))
            }
            Err(rejection) => rejection.into_response(),
        };
    }

    let Some((handler, methods, params)) = state.find_route(&path) else {
        tracing::trace!(path = %path, "No route");
        return into_response(RouteResponse::not_found());
    };
    if !methods.is_empty() && !methods.contains(&parts.method) {
        return into_response(RouteResponse::text(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed",
        ));
    }

    let body = match axum::body::to_bytes(body, state.body_limit).await {
        Ok(body) => body,
        Err(e) => {
            return into_response(RouteResponse::text(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()))
        }
    };

    let request = RouteRequest {
        method: parts.method,
        path,
        params,
        body,
    };
    into_response(handler(request).await)
}

fn into_response(response: RouteResponse) -> Response {
    let body = match response.body {
        ResponseBody::Full(bytes) => Body::from(bytes),
        ResponseBody::Stream(stream) => Body::from_stream(stream.map(Ok::<_, Infallible>)),
    };

    let mut builder = Response::builder().status(response.status);
    if let Ok(value) = HeaderValue::from_str(&response.content_type) {
        builder = builder.header(header::CONTENT_TYPE, value);
    }
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder.body(body).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid response");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

/// Runs the disconnect handler once, on every exit path of a socket task
struct DisconnectGuard {
    state: Arc<ControllerState>,
    namespace: String,
    client: Option<SocketClient>,
}

impl DisconnectGuard {
    fn new(state: Arc<ControllerState>, namespace: String, client: SocketClient) -> Self {
        Self {
            state,
            namespace,
            client: Some(client),
        }
    }

    /// Run the handler inline on a normal exit
    async fn finish(mut self) {
        if let Some(client) = self.client.take() {
            if let Some(on_disconnect) = self.state.handler(&self.namespace, SocketEvent::Disconnect) {
                on_disconnect(client).await;
            }
        }
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        let Some(on_disconnect) = self.state.handler(&self.namespace, SocketEvent::Disconnect) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(on_disconnect(client));
            }
            Err(_) => {
                tracing::warn!(namespace = %self.namespace, client = client.id(), "Disconnect handler skipped, no runtime");
            }
        }
    }
}

async fn handle_socket(state: Arc<ControllerState>, namespace: String, socket: WebSocket) {
    let (commands_tx, mut commands) = mpsc::unbounded_channel();
    let client = SocketClient::new(namespace.clone(), state.rooms.clone(), commands_tx);
    let client_id = client.id();

    tracing::debug!(namespace = %namespace, client = client_id, "Socket connected");

    if let Some(on_connect) = state.handler(&namespace, SocketEvent::Connect) {
        on_connect(client.clone()).await;
    }
    let disconnect = DisconnectGuard::new(state.clone(), namespace.clone(), client.clone());

    let (mut sink, mut incoming) = socket.split();
    let mut rooms: SelectAll<BroadcastStream<bytes::Bytes>> = SelectAll::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ClientCommand::Join(receiver)) => rooms.push(BroadcastStream::new(receiver)),
                // Sender lives in `client`, so this never closes first
                None => break,
            },
            Some(message) = rooms.next(), if !rooms.is_empty() => match message {
                Ok(payload) => {
                    if sink.send(Message::Binary(payload)).await.is_err() {
                        break;
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::trace!(client = client_id, skipped, "Slow socket client skipped frames");
                }
            },
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(client = client_id, error = %e, "Socket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    disconnect.finish().await;
    drop(client);
    tracing::debug!(namespace = %namespace, client = client_id, "Socket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::controller::{message_handler, route_handler};

    fn controller() -> HttpController {
        HttpController::new(ServerConfig::default())
    }

    fn ok_handler() -> RouteHandler {
        route_handler(|_| async { RouteResponse::html("ok") })
    }

    #[test]
    fn test_duplicate_route_conflicts() {
        let controller = controller();
        controller
            .add_route("/video", &[Method::GET], ok_handler())
            .unwrap();

        let result = controller.add_route("/video/", &[Method::GET], ok_handler());
        assert!(matches!(result, Err(Error::RouteConflict(_))));
    }

    #[test]
    fn test_namespace_and_route_conflict() {
        let controller = controller();
        controller
            .add_message_handler(SocketEvent::Connect, message_handler(|_| async {}), "/feed")
            .unwrap();
        controller
            .add_message_handler(SocketEvent::Disconnect, message_handler(|_| async {}), "/feed")
            .unwrap();

        assert!(matches!(
            controller.add_route("/feed", &[Method::GET], ok_handler()),
            Err(Error::RouteConflict(_))
        ));
        assert!(matches!(
            controller.add_message_handler(SocketEvent::Connect, message_handler(|_| async {}), "/feed"),
            Err(Error::RouteConflict(_))
        ));
        assert_eq!(controller.routes(), vec!["/feed".to_string()]);
    }

    #[test]
    fn test_remove_route_frees_pattern() {
        let controller = controller();
        controller
            .add_route("/video", &[Method::GET], ok_handler())
            .unwrap();
        controller
            .add_message_handler(SocketEvent::Connect, message_handler(|_| async {}), "/feed")
            .unwrap();

        assert!(controller.remove_route("/video/"));
        assert!(controller.remove_route("/feed"));
        assert!(!controller.remove_route("/missing"));
        assert!(controller.routes().is_empty());

        controller
            .add_route("/video", &[Method::GET], ok_handler())
            .unwrap();
        controller
            .add_route("/feed", &[Method::GET], ok_handler())
            .unwrap();
    }

    fn counting_disconnects(controller: &HttpController) -> Arc<std::sync::atomic::AtomicUsize> {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = count.clone();
        controller
            .add_message_handler(
                SocketEvent::Disconnect,
                message_handler(move |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                }),
                "/feed",
            )
            .unwrap();
        count
    }

    fn client(controller: &HttpController) -> SocketClient {
        let (tx, _rx) = mpsc::unbounded_channel();
        SocketClient::new("/feed".to_string(), controller.state.rooms.clone(), tx)
    }

    #[tokio::test]
    async fn test_disconnect_runs_when_socket_task_is_aborted() {
        let controller = controller();
        let count = counting_disconnects(&controller);

        let guard = DisconnectGuard::new(controller.state.clone(), "/feed".to_string(), client(&controller));
        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        task.abort();
        let _ = task.await;

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect_runs_once_on_normal_exit() {
        let controller = controller();
        let count = counting_disconnects(&controller);

        let guard = DisconnectGuard::new(controller.state.clone(), "/feed".to_string(), client(&controller));
        guard.finish().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_find_route_prefers_literal() {
        let controller = controller();
        controller
            .add_route("/wormhole/stream/{name}/sync", &[], ok_handler())
            .unwrap();
        controller
            .add_route("/wormhole/stream/default/sync", &[], ok_handler())
            .unwrap();

        let (_, _, params) = controller
            .state
            .find_route("/wormhole/stream/default/sync")
            .unwrap();
        assert!(params.is_empty());

        let (_, _, params) = controller
            .state
            .find_route("/wormhole/stream/other/sync")
            .unwrap();
        assert_eq!(params.get("name").map(String::as_str), Some("other"));
    }
}
