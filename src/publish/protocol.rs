//! Stream protocols and the protocol registry

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::{Error, Result};
use crate::video::{Codec, Frame, FrameBuffer, ImageFormat};
use crate::viewer::{MultipartViewer, SocketViewer, Viewer, ViewerOptions};

use super::{MultipartPublisher, PublishContext, SocketPublisher, StreamPublisher};

/// Wire protocol of one stream route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// JPEG images pushed over a socket
    RawJpeg,
    /// PNG images pushed over a socket
    RawPng,
    /// Motion JPEG over `multipart/x-mixed-replace`
    Mjpeg,
    /// Uncompressed pixels pushed over a socket
    Raw,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [
        Protocol::RawJpeg,
        Protocol::RawPng,
        Protocol::Mjpeg,
        Protocol::Raw,
    ];

    /// Identifier used during sync
    pub fn id(&self) -> &'static str {
        match self {
            Protocol::RawJpeg => "RAWJPEG",
            Protocol::RawPng => "RAWPNG",
            Protocol::Mjpeg => "MJPEG",
            Protocol::Raw => "RAW",
        }
    }

    /// Last path segment of a managed stream route
    pub fn route_suffix(&self) -> String {
        self.id().to_ascii_lowercase()
    }

    /// Payload encoding of socket protocols
    pub fn push_format(&self) -> Option<PushFormat> {
        match self {
            Protocol::RawJpeg => Some(PushFormat::Jpeg),
            Protocol::RawPng => Some(PushFormat::Png),
            Protocol::Raw => Some(PushFormat::Raw),
            Protocol::Mjpeg => None,
        }
    }

    /// Registry entry with the stock publisher and viewer
    pub fn default_entry(self) -> ProtocolEntry {
        let publisher: PublisherFactory = match self.push_format() {
            Some(format) => Arc::new(move |ctx: PublishContext<'_>| {
                SocketPublisher::new(ctx, format).map(|p| Arc::new(p) as Arc<dyn StreamPublisher>)
            }),
            None => Arc::new(|ctx: PublishContext<'_>| {
                MultipartPublisher::new(ctx).map(|p| Arc::new(p) as Arc<dyn StreamPublisher>)
            }),
        };

        let viewer: ViewerFactory = match self.push_format() {
            Some(format) => Arc::new(move |url: String, options: ViewerOptions| {
                Box::pin(SocketViewer::connect(url, format, options))
            }),
            None => Arc::new(|url: String, options: ViewerOptions| {
                Box::pin(MultipartViewer::connect(url, options))
            }),
        };

        ProtocolEntry {
            protocol: self,
            publisher,
            viewer,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.id().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnsupportedProtocol(s.to_string()))
    }
}

/// Payload encoding for pushed frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFormat {
    Jpeg,
    Png,
    /// Frame bytes as-is, `width * height * depth` long
    Raw,
}

impl PushFormat {
    pub fn encode(&self, codec: &dyn Codec, frame: &Frame) -> Result<Bytes> {
        match self {
            PushFormat::Jpeg => codec.encode(frame, ImageFormat::Jpeg),
            PushFormat::Png => codec.encode(frame, ImageFormat::Png),
            PushFormat::Raw => Ok(Bytes::copy_from_slice(frame.data())),
        }
    }

    /// Decode a payload into a frame fitting `video`
    pub fn decode(&self, codec: &dyn Codec, data: &[u8], video: &FrameBuffer) -> Result<Frame> {
        match self {
            PushFormat::Raw => Frame::from_raw(video.width(), video.height(), video.depth(), data.to_vec()),
            PushFormat::Jpeg | PushFormat::Png => {
                let frame = codec.decode(data, video.depth())?;
                crate::source::fit(codec, video, frame)
            }
        }
    }
}

/// Builds the publisher of a protocol
pub type PublisherFactory =
    Arc<dyn Fn(PublishContext<'_>) -> Result<Arc<dyn StreamPublisher>> + Send + Sync>;

/// Connects a viewer of a protocol to a stream URL
pub type ViewerFactory =
    Arc<dyn Fn(String, ViewerOptions) -> BoxFuture<'static, Result<Viewer>> + Send + Sync>;

/// Protocol with its publisher and viewer
#[derive(Clone)]
pub struct ProtocolEntry {
    pub protocol: Protocol,
    pub publisher: PublisherFactory,
    pub viewer: ViewerFactory,
}

impl fmt::Debug for ProtocolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolEntry")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Ordered protocol table, most preferred first
#[derive(Debug, Clone)]
pub struct ProtocolRegistry {
    entries: Vec<ProtocolEntry>,
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self {
            entries: Protocol::ALL.into_iter().map(Protocol::default_entry).collect(),
        }
    }
}

impl ProtocolRegistry {
    /// Empty registry
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registry of the stock entries for `protocols`, in the given order
    pub fn with_protocols(protocols: &[Protocol]) -> Self {
        let mut registry = Self::empty();
        for protocol in protocols {
            registry.register(protocol.default_entry());
        }
        registry
    }

    /// Append an entry, replacing an existing entry for the same protocol in place
    pub fn register(&mut self, entry: ProtocolEntry) {
        match self.entries.iter_mut().find(|e| e.protocol == entry.protocol) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn get(&self, protocol: Protocol) -> Option<&ProtocolEntry> {
        self.entries.iter().find(|e| e.protocol == protocol)
    }

    pub fn contains(&self, protocol: Protocol) -> bool {
        self.get(protocol).is_some()
    }

    /// Resolve an id, failing for protocols not in the registry
    pub fn resolve(&self, id: &str) -> Result<Protocol> {
        let protocol: Protocol = id.parse()?;
        if self.contains(protocol) {
            Ok(protocol)
        } else {
            Err(Error::UnsupportedProtocol(id.to_string()))
        }
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        self.entries.iter().map(|e| e.protocol).collect()
    }

    /// Protocol ids in preference order
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.protocol.id().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
