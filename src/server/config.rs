//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8000;

/// Default capacity of each socket room's broadcast channel
pub const DEFAULT_ROOM_CAPACITY: usize = 16;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Allow cross-origin requests from any origin
    pub cors: bool,

    /// Serve the welcome page at `/`
    pub welcome_screen: bool,

    /// Managed streams and the sync endpoints
    pub advanced_features: bool,

    /// Append debug information to the welcome page
    pub debug: bool,

    /// Frames buffered per socket room before slow clients lag
    pub room_capacity: usize,

    /// Maximum accepted request body size in bytes
    pub body_limit: usize,

    /// Image used by the watermark modifier (built-in badge when unset)
    pub watermark_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            cors: true,
            welcome_screen: true,
            advanced_features: true,
            debug: false,
            room_capacity: DEFAULT_ROOM_CAPACITY,
            body_limit: 64 * 1024, // 64KB
            watermark_path: None,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Enable or disable permissive CORS
    pub fn cors(mut self, enabled: bool) -> Self {
        self.cors = enabled;
        self
    }

    /// Disable the welcome page
    pub fn disable_welcome_screen(mut self) -> Self {
        self.welcome_screen = false;
        self
    }

    /// Disable managed streams and sync
    pub fn disable_advanced_features(mut self) -> Self {
        self.advanced_features = false;
        self
    }

    /// Show debug information on the welcome page
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Set the per-room broadcast capacity
    pub fn room_capacity(mut self, capacity: usize) -> Self {
        self.room_capacity = capacity.max(1);
        self
    }

    /// Set the request body limit
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Load the watermark overlay from an image file
    pub fn watermark(mut self, path: impl Into<PathBuf>) -> Self {
        self.watermark_path = Some(path.into());
        self
    }
}
