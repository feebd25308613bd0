//! Sync client
//!
//! The viewer side of the sync exchange: announces the local version and
//! protocols to a remote hub, then fetches the description of one stream.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::registry::sync::{STREAM_SYNC_ROUTE, SYNC_ROUTE};
use crate::registry::{StreamSyncResponse, SyncRequest, SyncResponse};
use crate::VERSION;

const SYNC_FIELDS: [&str; 5] = [
    "ready",
    "message",
    "version",
    "supported_protocols",
    "managed_streams",
];
const STREAM_FIELDS: [&str; 4] = ["version", "stream_name", "supported_protocols", "stream_info"];
const INFO_FIELDS: [&str; 4] = ["width", "height", "pixel_size", "max_fps"];

/// `http://` prefixed host without a trailing slash
pub fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

/// Client for the sync endpoints of a remote hub
#[derive(Debug, Clone)]
pub struct SyncClient {
    http: reqwest::Client,
    protocols: Vec<String>,
}

impl SyncClient {
    /// Client announcing `protocols` (ids, in preference order)
    pub fn new(protocols: Vec<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            protocols,
        }
    }

    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Handshake with `host`; returns its managed stream names
    pub async fn sync_wormhole(&self, host: &str) -> Result<Vec<String>> {
        let url = format!("{}{}", normalize_host(host), SYNC_ROUTE);
        let request = SyncRequest {
            version: VERSION.to_string(),
            supported_protocols: self.protocols.clone(),
        };

        let response = self.http.post(&url).json(&request).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::BAD_REQUEST {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Sync(format!("[{}] {}", status, text)));
        }

        let value = read_json(response).await?;
        require_fields(&value, &SYNC_FIELDS)?;
        let reply: SyncResponse = from_value(value)?;

        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(Error::Sync(reply.message));
        }
        self.validate(&reply)?;

        tracing::debug!(host = %host, streams = ?reply.managed_streams, "Synced with hub");
        Ok(reply.managed_streams)
    }

    /// Description of stream `name` on `host`
    pub async fn sync_stream(&self, host: &str, name: &str) -> Result<StreamSyncResponse> {
        let url = format!(
            "{}{}",
            normalize_host(host),
            STREAM_SYNC_ROUTE.replace("{name}", name)
        );

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::StreamNotFound(name.to_string()));
        }
        if status != reqwest::StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Sync(format!("[{}] {}", status, text)));
        }

        let value = read_json(response).await?;
        require_fields(&value, &STREAM_FIELDS)?;
        require_fields(&value["stream_info"], &INFO_FIELDS)?;
        from_value(value)
    }

    /// Re-check what the hub already validated
    fn validate(&self, reply: &SyncResponse) -> Result<()> {
        if !reply.ready {
            return Err(Error::Sync(format!("hub not ready: {}", reply.message)));
        }
        if reply.version != VERSION {
            return Err(Error::Sync(format!(
                "version mismatch! Server: {} Client: {}",
                reply.version, VERSION
            )));
        }
        if !self
            .protocols
            .iter()
            .any(|p| reply.supported_protocols.contains(p))
        {
            return Err(Error::Sync(
                "hub does not support any local protocol".to_string(),
            ));
        }
        Ok(())
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Sync(format!("invalid JSON response: {}", e)))
}

fn require_fields(value: &Value, fields: &[&str]) -> Result<()> {
    let missing: Vec<&str> = fields
        .iter()
        .copied()
        .filter(|field| value.get(field).is_none())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::Sync(format!("response is missing fields {:?}", missing)))
    }
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Sync(format!("invalid JSON response: {}", e)))
}
