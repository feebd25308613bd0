//! The Wormhole hub
//!
//! [`Wormhole`] owns the HTTP controller, the protocol registry and the
//! managed stream registry. It publishes local sources as managed streams
//! and connects to managed streams of remote hubs.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::http::Method;
use parking_lot::RwLock;
use tokio::net::TcpListener;

use crate::client::{normalize_host, SyncClient};
use crate::error::{Error, Result};
use crate::publish::{
    Protocol, ProtocolRegistry, PublishContext, PublishOptions, StreamPublisher,
};
use crate::registry::{self, NameReservation, StreamRegistry};
use crate::server::{route_handler, HttpController, NetworkController, RouteResponse, ServerConfig};
use crate::source::{CameraOptions, CameraSource, FileOptions, FileSource, Source};
use crate::video::{modifiers, Codec, FrameBuffer, FrameModifier, ImageCodec, Watermark};
use crate::viewer::{Viewer, ViewerOptions};
use crate::VERSION;

/// Options for publishing a managed stream
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Case-insensitive alphanumeric name
    pub name: String,
    /// Protocols to publish, all registered protocols when unset
    pub protocols: Option<Vec<Protocol>>,
    pub publish: PublishOptions,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            protocols: None,
            publish: PublishOptions::default(),
        }
    }
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn protocols(mut self, protocols: Vec<Protocol>) -> Self {
        self.protocols = Some(protocols);
        self
    }

    /// Override the stream rate
    pub fn max_fps(mut self, fps: f64) -> Self {
        self.publish = self.publish.max_fps(fps);
        self
    }

    pub fn print_fps(mut self, enabled: bool) -> Self {
        self.publish = self.publish.print_fps(enabled);
        self
    }
}

/// State rendered by the welcome and debug pages
#[derive(Clone)]
struct Inventory {
    advanced: bool,
    protocols: Arc<ProtocolRegistry>,
    streams: Arc<StreamRegistry>,
    publishers: Arc<RwLock<Vec<Arc<dyn StreamPublisher>>>>,
}

impl Inventory {
    fn welcome_page(&self, debug: bool) -> String {
        let mut page = format!(
            "<h1>Welcome to Wormhole!</h1>\
             <h3>If you see this page, Wormhole Video Streaming Server is successfully installed and working!</h3>\
             <p>Version: {}</p>",
            VERSION
        );
        if debug {
            page.push_str(&self.debug_html());
        }
        page
    }

    fn debug_html(&self) -> String {
        let mut html = String::from("<h2>Debug Information</h2>");
        html.push_str(&format!(
            "<h3>Advanced Features Enabled: {}</h3>",
            self.advanced
        ));

        html.push_str("<h3>Supported Protocols:</h3>");
        for protocol in self.protocols.protocols() {
            html.push_str(&format!(
                "<p>[{}] Route suffix: /{}</p>",
                protocol,
                protocol.route_suffix()
            ));
        }

        html.push_str("<h3>Enabled Routes:</h3>");
        for publisher in self.publishers.read().iter() {
            html.push_str(&format!(
                "<p>{} | Publisher: {}</p>",
                escape(publisher.route()),
                escape(&format!("{:?}", publisher))
            ));
        }

        html.push_str("<h3>Managed Streams:</h3>");
        for stream in self.streams.streams() {
            html.push_str(&format!(
                "<p>{} | Video: {} | Supported Protocols: {:?} | Modifiers: {:?} | {}</p>",
                escape(&stream.name),
                escape(&format!("{:?}", stream.video)),
                stream.protocol_ids(),
                stream.video.modifier_names(),
                escape(&stream.video.governor().stats().summary())
            ));
        }
        html
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Entry point for streaming and viewing
pub struct Wormhole {
    config: ServerConfig,
    controller: HttpController,
    codec: Arc<dyn Codec>,
    watermark: Arc<Watermark>,
    sync: SyncClient,
    inventory: Inventory,
}

impl Wormhole {
    /// Hub with the default protocol registry
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_protocols(config, ProtocolRegistry::default())
    }

    /// Hub with a custom protocol registry
    ///
    /// Routes are registered immediately; the server starts with
    /// [`run`](Self::run), [`run_until`](Self::run_until) or
    /// [`spawn`](Self::spawn).
    pub fn with_protocols(config: ServerConfig, protocols: ProtocolRegistry) -> Result<Self> {
        if config.advanced_features && protocols.is_empty() {
            return Err(Error::InvalidConfiguration(
                "no supported protocols were given".to_string(),
            ));
        }

        let controller = HttpController::new(config.clone());
        let inventory = Inventory {
            advanced: config.advanced_features,
            protocols: Arc::new(protocols),
            streams: Arc::new(StreamRegistry::new()),
            publishers: Arc::new(RwLock::new(Vec::new())),
        };

        if config.advanced_features {
            registry::sync::register_routes(
                &controller,
                inventory.streams.clone(),
                inventory.protocols.clone(),
            )?;
        }

        if config.welcome_screen {
            let pages = inventory.clone();
            let debug = config.debug;
            controller.add_route(
                "/",
                &[Method::GET],
                route_handler(move |_| {
                    let page = pages.welcome_page(debug);
                    async move { RouteResponse::html(page) }
                }),
            )?;
        }

        let watermark = match &config.watermark_path {
            Some(path) => Watermark::from_path(path),
            None => Watermark::badge(),
        };

        Ok(Self {
            sync: SyncClient::new(inventory.protocols.ids()),
            controller,
            codec: Arc::new(ImageCodec::new()),
            watermark: Arc::new(watermark),
            config,
            inventory,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn controller(&self) -> &HttpController {
        &self.controller
    }

    pub fn protocols(&self) -> &ProtocolRegistry {
        &self.inventory.protocols
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.inventory.streams
    }

    /// Every publisher created by this hub
    pub fn publishers(&self) -> Vec<Arc<dyn StreamPublisher>> {
        self.inventory.publishers.read().clone()
    }

    /// Shared watermark image from the configuration
    pub fn watermark(&self) -> Arc<Watermark> {
        self.watermark.clone()
    }

    /// Watermark modifier using the configured image
    pub fn watermark_modifier(&self) -> FrameModifier {
        modifiers::watermark(self.watermark.clone())
    }

    /// Debug page fragment listing protocols, routes and streams
    pub fn debug_html(&self) -> String {
        self.inventory.debug_html()
    }

    /// Serve until the server fails
    pub async fn run(&self) -> Result<()> {
        self.controller.run().await
    }

    /// Serve until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.controller.run_until(shutdown).await
    }

    /// Bind the configured address and serve in a background task
    pub async fn spawn(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        let controller = self.controller.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.serve(listener).await {
                tracing::error!(error = %e, "Wormhole server stopped");
            }
        });
        Ok(addr)
    }

    /// Stream a camera index (all digits) or a video file
    pub async fn stream(&self, resource: &str, options: StreamOptions) -> Result<Source> {
        if !resource.is_empty() && resource.chars().all(|c| c.is_ascii_digit()) {
            self.stream_camera(resource, CameraOptions::default(), options)
                .await
        } else {
            self.stream_file(resource, FileOptions::default(), options)
                .await
        }
    }

    /// Open a video file and publish it as a managed stream
    pub async fn stream_file(
        &self,
        path: impl AsRef<Path>,
        file: FileOptions,
        options: StreamOptions,
    ) -> Result<Source> {
        let (reservation, protocols) = self.prepare(&options)?;
        let source = FileSource::open(path, file).await?;
        self.publish_source(source, reservation, protocols, options.publish)
    }

    /// Open a camera and publish it as a managed stream
    pub async fn stream_camera(
        &self,
        device: &str,
        camera: CameraOptions,
        options: StreamOptions,
    ) -> Result<Source> {
        let (reservation, protocols) = self.prepare(&options)?;
        let source = CameraSource::open(device, camera).await?;
        self.publish_source(source, reservation, protocols, options.publish)
    }

    /// Publish an existing buffer as a managed stream
    pub fn stream_video(&self, video: Arc<FrameBuffer>, options: StreamOptions) -> Result<Arc<FrameBuffer>> {
        let (reservation, protocols) = self.prepare(&options)?;
        self.publish(reservation, protocols, video.clone(), options.publish)?;
        Ok(video)
    }

    /// Publish `video` with `protocol` on a user route outside `/wormhole`
    pub fn create_stream(
        &self,
        protocol: Protocol,
        video: Arc<FrameBuffer>,
        route: &str,
        options: PublishOptions,
    ) -> Result<Arc<dyn StreamPublisher>> {
        registry::check_user_route(route)?;
        self.create_publisher(protocol, video, route.to_string(), options)
    }

    /// Buffer of a local managed stream
    pub fn get_video(&self, name: &str) -> Result<Arc<FrameBuffer>> {
        self.require_advanced()?;
        self.inventory
            .streams
            .get(name)
            .map(|stream| stream.video)
            .ok_or_else(|| Error::StreamNotFound(name.to_ascii_lowercase()))
    }

    /// Connect to managed stream `name` of the hub at `host`
    ///
    /// Picks the first protocol of the stream's list that this hub supports.
    pub async fn view(&self, host: &str, name: &str) -> Result<Viewer> {
        self.require_advanced()?;
        let name = registry::normalize_name(name)?;
        let host = normalize_host(host);

        let streams = self.sync.sync_wormhole(&host).await?;
        if !streams.contains(&name) {
            return Err(Error::StreamNotFound(format!(
                "{} (available: {:?})",
                name, streams
            )));
        }

        let description = self.sync.sync_stream(&host, &name).await?;
        let protocol = description
            .supported_protocols
            .iter()
            .find_map(|id| self.inventory.protocols.resolve(id).ok())
            .ok_or_else(|| {
                Error::UnsupportedProtocol(format!(
                    "no common protocol for stream {}: {:?}",
                    name, description.supported_protocols
                ))
            })?;
        let entry = self
            .inventory
            .protocols
            .get(protocol)
            .ok_or_else(|| Error::UnsupportedProtocol(protocol.id().to_string()))?;

        let url = format!("{}{}", host, registry::stream_route(&name, protocol));
        tracing::info!(url = %url, protocol = %protocol, "Viewing remote stream");
        (entry.viewer)(url, ViewerOptions::from_info(&description.stream_info)).await
    }

    fn require_advanced(&self) -> Result<()> {
        if self.config.advanced_features {
            Ok(())
        } else {
            Err(Error::InvalidConfiguration(
                "managed streams require advanced features".to_string(),
            ))
        }
    }

    /// Validate protocols and reserve the name before anything is opened
    fn prepare(&self, options: &StreamOptions) -> Result<(NameReservation<'_>, Vec<Protocol>)> {
        self.require_advanced()?;

        let protocols = match &options.protocols {
            Some(protocols) if protocols.is_empty() => {
                return Err(Error::InvalidConfiguration(
                    "protocol list is empty".to_string(),
                ))
            }
            Some(protocols) => protocols.clone(),
            None => self.inventory.protocols.protocols(),
        };
        if let Some(unsupported) = protocols
            .iter()
            .find(|p| !self.inventory.protocols.contains(**p))
        {
            return Err(Error::UnsupportedProtocol(unsupported.id().to_string()));
        }

        let name = registry::normalize_name(&options.name)?;
        let reservation = self.inventory.streams.reserve(&name)?;
        Ok((reservation, protocols))
    }

    fn publish_source(
        &self,
        source: Source,
        reservation: NameReservation<'_>,
        protocols: Vec<Protocol>,
        options: PublishOptions,
    ) -> Result<Source> {
        match self.publish(reservation, protocols, source.video().clone(), options) {
            Ok(()) => Ok(source),
            Err(e) => {
                source.stop();
                Err(e)
            }
        }
    }

    /// Create every publisher of a stream, or none of them
    fn publish(
        &self,
        reservation: NameReservation<'_>,
        protocols: Vec<Protocol>,
        video: Arc<FrameBuffer>,
        options: PublishOptions,
    ) -> Result<()> {
        let mut publishers = Vec::with_capacity(protocols.len());
        for protocol in &protocols {
            let route = registry::stream_route(reservation.name(), *protocol);
            match self.create_publisher(*protocol, video.clone(), route, options.clone()) {
                Ok(publisher) => publishers.push(publisher),
                Err(e) => {
                    tracing::warn!(
                        stream = %reservation.name(),
                        protocol = %protocol,
                        error = %e,
                        "Publisher failed, withdrawing stream"
                    );
                    self.withdraw(&publishers);
                    return Err(e);
                }
            }
        }

        reservation.commit(video, protocols, publishers);
        Ok(())
    }

    /// Unregister the routes of publishers from a failed setup
    fn withdraw(&self, publishers: &[Arc<dyn StreamPublisher>]) {
        for publisher in publishers {
            self.controller.remove_route(publisher.route());
        }
        self.inventory
            .publishers
            .write()
            .retain(|kept| !publishers.iter().any(|p| Arc::ptr_eq(kept, p)));
    }

    fn create_publisher(
        &self,
        protocol: Protocol,
        video: Arc<FrameBuffer>,
        route: String,
        options: PublishOptions,
    ) -> Result<Arc<dyn StreamPublisher>> {
        let entry = self
            .inventory
            .protocols
            .get(protocol)
            .ok_or_else(|| Error::UnsupportedProtocol(protocol.id().to_string()))?;

        let publisher = (entry.publisher)(PublishContext {
            controller: &self.controller,
            video,
            route,
            codec: self.codec.clone(),
            options,
        })?;
        self.inventory.publishers.write().push(publisher.clone());
        Ok(publisher)
    }
}

impl std::fmt::Debug for Wormhole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wormhole")
            .field("bind_addr", &self.config.bind_addr)
            .field("protocols", &self.inventory.protocols.ids())
            .field("streams", &self.inventory.streams.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{ProtocolEntry, PublisherFactory};
    use crate::video::VideoConfig;

    fn hub() -> Wormhole {
        Wormhole::new(ServerConfig::default()).unwrap()
    }

    fn video() -> Arc<FrameBuffer> {
        Arc::new(FrameBuffer::new(VideoConfig::new(32, 24).max_fps(10.0)).unwrap())
    }

    #[test]
    fn test_default_routes() {
        let hub = hub();
        assert_eq!(
            hub.controller().routes(),
            vec!["/wormhole/sync", "/wormhole/stream/{name}/sync", "/"]
        );
    }

    #[test]
    fn test_minimal_hub_has_no_routes() {
        let config = ServerConfig::default()
            .disable_welcome_screen()
            .disable_advanced_features();
        let hub = Wormhole::with_protocols(config, ProtocolRegistry::empty()).unwrap();

        assert!(hub.controller().routes().is_empty());
        assert!(matches!(
            hub.stream_video(video(), StreamOptions::new()),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(hub.get_video("default").is_err());
    }

    #[test]
    fn test_empty_protocols_rejected() {
        let result = Wormhole::with_protocols(ServerConfig::default(), ProtocolRegistry::empty());
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_stream_video_registers_every_protocol() {
        let hub = hub();
        let video = video();
        hub.stream_video(video.clone(), StreamOptions::new().name("Front"))
            .unwrap();

        let routes = hub.controller().routes();
        for suffix in ["rawjpeg", "rawpng", "mjpeg", "raw"] {
            let route = format!("/wormhole/stream/front/{}", suffix);
            assert!(routes.contains(&route), "missing {}", route);
        }
        assert!(Arc::ptr_eq(&hub.get_video("FRONT").unwrap(), &video));
        assert_eq!(hub.publishers().len(), 4);
    }

    #[tokio::test]
    async fn test_duplicate_names_conflict() {
        let hub = hub();
        let first = video();
        hub.stream_video(first.clone(), StreamOptions::new()).unwrap();

        let result = hub.stream_video(video(), StreamOptions::new().name("DEFAULT"));
        assert!(matches!(result, Err(Error::NameConflict(_))));
        assert!(Arc::ptr_eq(&hub.get_video("default").unwrap(), &first));
    }

    #[tokio::test]
    async fn test_failed_publisher_leaves_no_routes_behind() {
        let mut protocols = ProtocolRegistry::default();
        let failing: PublisherFactory =
            Arc::new(|_: PublishContext<'_>| -> Result<Arc<dyn StreamPublisher>> {
                Err(Error::Codec("encoder missing".to_string()))
            });
        protocols.register(ProtocolEntry {
            protocol: Protocol::Raw,
            publisher: failing,
            viewer: Protocol::Raw.default_entry().viewer,
        });
        let hub = Wormhole::with_protocols(ServerConfig::default(), protocols).unwrap();
        let before = hub.controller().routes();

        let result = hub.stream_video(
            video(),
            StreamOptions::new().name("cam").protocols(vec![Protocol::Mjpeg, Protocol::Raw]),
        );
        assert!(matches!(result, Err(Error::Codec(_))));
        assert_eq!(hub.controller().routes(), before);
        assert!(hub.streams().is_empty());
        assert!(hub.publishers().is_empty());

        // The name and its routes are free again
        hub.stream_video(video(), StreamOptions::new().name("cam").protocols(vec![Protocol::Mjpeg]))
            .unwrap();
        assert!(hub
            .controller()
            .routes()
            .contains(&"/wormhole/stream/cam/mjpeg".to_string()));
        assert_eq!(hub.streams().names(), vec!["cam"]);
    }

    #[tokio::test]
    async fn test_name_reserved_during_setup() {
        let hub = hub();
        let reservation = hub.inventory.streams.reserve("busy").unwrap();

        let result = hub.stream_video(video(), StreamOptions::new().name("Busy"));
        assert!(matches!(result, Err(Error::NameConflict(_))));
        assert!(!hub
            .controller()
            .routes()
            .iter()
            .any(|r| r.starts_with("/wormhole/stream/busy")));

        drop(reservation);
        hub.stream_video(video(), StreamOptions::new().name("busy"))
            .unwrap();
    }

    #[test]
    fn test_invalid_stream_options() {
        let hub = hub();
        assert!(matches!(
            hub.stream_video(video(), StreamOptions::new().name("two words")),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            hub.stream_video(video(), StreamOptions::new().protocols(Vec::new())),
            Err(Error::InvalidConfiguration(_))
        ));

        let limited = Wormhole::with_protocols(
            ServerConfig::default(),
            ProtocolRegistry::with_protocols(&[Protocol::Mjpeg]),
        )
        .unwrap();
        assert!(matches!(
            limited.stream_video(video(), StreamOptions::new().protocols(vec![Protocol::Raw])),
            Err(Error::UnsupportedProtocol(_))
        ));
    }

    #[test]
    fn test_create_stream_rejects_reserved_prefix() {
        let hub = hub();
        let result = hub.create_stream(
            Protocol::Mjpeg,
            video(),
            "/wormhole/custom",
            PublishOptions::new(),
        );
        assert!(matches!(result, Err(Error::RouteConflict(_))));

        let publisher = hub
            .create_stream(Protocol::Mjpeg, video(), "/camera", PublishOptions::new())
            .unwrap();
        assert_eq!(publisher.route(), "/camera");
        assert!(matches!(
            hub.create_stream(Protocol::RawJpeg, video(), "/camera", PublishOptions::new()),
            Err(Error::RouteConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_leaves_name_free() {
        let hub = hub();
        let result = hub
            .stream_file("/definitely/missing.mp4", FileOptions::default(), StreamOptions::new())
            .await;

        assert!(matches!(result, Err(Error::SourceUnavailable { .. })));
        assert!(hub.streams().is_empty());
        hub.stream_video(video(), StreamOptions::new()).unwrap();
    }

    #[tokio::test]
    async fn test_debug_page_lists_streams() {
        let hub = Wormhole::new(ServerConfig::default().debug(true)).unwrap();
        hub.stream_video(video(), StreamOptions::new().name("lobby"))
            .unwrap();

        let html = hub.debug_html();
        assert!(html.contains("<h2>Debug Information</h2>"));
        assert!(html.contains("[RAWJPEG]"));
        assert!(html.contains("/wormhole/stream/lobby/mjpeg"));
        assert!(html.contains("lobby | Video:"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }
}
