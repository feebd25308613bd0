//! Managed stream registry and sync
//!
//! The hub registers every managed stream here and exposes the registry
//! through two JSON endpoints that remote hubs use before viewing:
//!
//! ```text
//!   client                                   hub
//!     │  POST /wormhole/sync                  │
//!     │  {version, supported_protocols} ─────►│ StreamRegistry::names()
//!     │◄──── {ready, managed_streams, ...}    │
//!     │                                       │
//!     │  GET /wormhole/stream/<name>/sync ───►│ StreamRegistry::get(name)
//!     │◄──── {supported_protocols, stream_info}
//!     │                                       │
//!     │  /wormhole/stream/<name>/<protocol> ─►│ publisher
//! ```

pub mod store;
pub mod sync;

pub use store::{
    check_user_route, normalize_name, stream_route, ManagedStream, NameReservation, StreamRegistry,
    RESERVED_PREFIX,
};
pub use sync::{StreamSyncResponse, SyncRequest, SyncResponse};
