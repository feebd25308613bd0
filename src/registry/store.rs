//! Managed stream store
//!
//! Holds every stream the hub publishes under `/wormhole/stream/<name>/`.
//! Names are case-insensitive, registered once and never removed. A name is
//! reserved while its publishers are being set up, so concurrent setups of
//! the same name fail with `NameConflict`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::publish::{Protocol, StreamPublisher};
use crate::server::normalize;
use crate::video::FrameBuffer;

/// Route prefix owned by the hub
pub const RESERVED_PREFIX: &str = "/wormhole";

/// Route of one protocol of a managed stream
pub fn stream_route(name: &str, protocol: Protocol) -> String {
    format!("{}/stream/{}/{}", RESERVED_PREFIX, name, protocol.route_suffix())
}

/// Lowercase `name`, requiring it to be non-empty ASCII alphanumeric
pub fn normalize_name(name: &str) -> Result<String> {
    let name = name.to_ascii_lowercase();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::InvalidConfiguration(format!(
            "stream name must be alphanumeric, got {:?}",
            name
        )));
    }
    Ok(name)
}

/// Reject user routes inside the reserved prefix
pub fn check_user_route(route: &str) -> Result<()> {
    let route = normalize(route);
    if route == RESERVED_PREFIX || route.starts_with(&format!("{}/", RESERVED_PREFIX)) {
        return Err(Error::RouteConflict(format!(
            "{} is reserved for managed streams",
            route
        )));
    }
    Ok(())
}

/// A named stream and its publishers
#[derive(Debug, Clone)]
pub struct ManagedStream {
    pub name: String,
    pub video: Arc<FrameBuffer>,
    /// Protocols in preference order
    pub protocols: Vec<Protocol>,
    pub publishers: Vec<Arc<dyn StreamPublisher>>,
}

impl ManagedStream {
    pub fn protocol_ids(&self) -> Vec<String> {
        self.protocols.iter().map(|p| p.id().to_string()).collect()
    }
}

#[derive(Debug, Default)]
struct Streams {
    by_name: HashMap<String, ManagedStream>,
    /// Registration order
    order: Vec<String>,
    /// Names being set up
    reserved: HashSet<String>,
}

impl Streams {
    fn taken(&self, name: &str) -> bool {
        self.by_name.contains_key(name) || self.reserved.contains(name)
    }

    fn insert(&mut self, stream: ManagedStream) {
        tracing::info!(
            stream = %stream.name,
            protocols = ?stream.protocol_ids(),
            "Managed stream registered"
        );
        self.order.push(stream.name.clone());
        self.by_name.insert(stream.name.clone(), stream);
    }
}

/// Claim on a stream name; released on drop unless committed
#[derive(Debug)]
pub struct NameReservation<'a> {
    registry: &'a StreamRegistry,
    name: String,
    committed: bool,
}

impl NameReservation<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the stream under the reserved name
    pub fn commit(
        mut self,
        video: Arc<FrameBuffer>,
        protocols: Vec<Protocol>,
        publishers: Vec<Arc<dyn StreamPublisher>>,
    ) {
        let mut streams = self.registry.streams.write();
        streams.reserved.remove(&self.name);
        streams.insert(ManagedStream {
            name: self.name.clone(),
            video,
            protocols,
            publishers,
        });
        self.committed = true;
    }
}

impl Drop for NameReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.streams.write().reserved.remove(&self.name);
            tracing::debug!(stream = %self.name, "Stream name released");
        }
    }
}

/// Registry of managed streams
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: RwLock<Streams>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `NameConflict` if `name` is registered or reserved
    pub fn ensure_available(&self, name: &str) -> Result<()> {
        if self.streams.read().taken(&name.to_ascii_lowercase()) {
            return Err(Error::NameConflict(name.to_string()));
        }
        Ok(())
    }

    /// Claim a normalized name before its publishers are created
    pub fn reserve(&self, name: &str) -> Result<NameReservation<'_>> {
        let mut streams = self.streams.write();
        if streams.taken(name) {
            return Err(Error::NameConflict(name.to_string()));
        }
        streams.reserved.insert(name.to_string());
        Ok(NameReservation {
            registry: self,
            name: name.to_string(),
            committed: false,
        })
    }

    /// Register a stream; its name must already be normalized
    pub fn register(&self, stream: ManagedStream) -> Result<()> {
        let mut streams = self.streams.write();
        if streams.taken(&stream.name) {
            return Err(Error::NameConflict(stream.name));
        }
        streams.insert(stream);
        Ok(())
    }

    /// Look up a stream by case-insensitive name
    pub fn get(&self, name: &str) -> Option<ManagedStream> {
        self.streams
            .read()
            .by_name
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.streams
            .read()
            .by_name
            .contains_key(&name.to_ascii_lowercase())
    }

    /// Stream names in registration order
    pub fn names(&self) -> Vec<String> {
        self.streams.read().order.clone()
    }

    /// Streams in registration order
    pub fn streams(&self) -> Vec<ManagedStream> {
        let streams = self.streams.read();
        streams
            .order
            .iter()
            .filter_map(|name| streams.by_name.get(name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.streams.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
