//! Sync endpoints
//!
//! - `POST /wormhole/sync`: a client announces its version and protocols;
//!   the hub answers with readiness and its managed streams.
//! - `GET|POST /wormhole/stream/<name>/sync`: description of one stream.

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::publish::ProtocolRegistry;
use crate::server::{route_handler, NetworkController, RouteRequest, RouteResponse};
use crate::video::StreamInfo;
use crate::VERSION;

use super::StreamRegistry;

pub const SYNC_ROUTE: &str = "/wormhole/sync";
pub const STREAM_SYNC_ROUTE: &str = "/wormhole/stream/{name}/sync";

/// Client announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub version: String,
    pub supported_protocols: Vec<String>,
}

/// Hub answer to a [`SyncRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub ready: bool,
    pub message: String,
    pub version: String,
    pub supported_protocols: Vec<String>,
    pub managed_streams: Vec<String>,
}

/// Description of one managed stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSyncResponse {
    pub version: String,
    pub stream_name: String,
    pub supported_protocols: Vec<String>,
    pub stream_info: StreamInfo,
}

/// Evaluate a sync request body
pub fn evaluate_sync(
    body: &[u8],
    supported_protocols: Vec<String>,
    managed_streams: Vec<String>,
) -> (StatusCode, SyncResponse) {
    let mut response = SyncResponse {
        ready: false,
        message: String::new(),
        version: VERSION.to_string(),
        supported_protocols,
        managed_streams,
    };

    let rejection = match parse_request(body) {
        Err(message) => Some(message),
        Ok(request) if request.version != VERSION => Some(format!(
            "Wormhole version mismatch! Server: {} Client: {}",
            VERSION, request.version
        )),
        Ok(request)
            if !response
                .supported_protocols
                .iter()
                .any(|p| request.supported_protocols.contains(p)) =>
        {
            Some(format!(
                "Client does not support any of the supported protocols! Server supports: {:?} Client supports: {:?}",
                response.supported_protocols, request.supported_protocols
            ))
        }
        Ok(_) => None,
    };

    match rejection {
        Some(message) => {
            response.message = message;
            (StatusCode::BAD_REQUEST, response)
        }
        None => {
            response.ready = true;
            response.message = "Wormhole is ready to connect!".to_string();
            (StatusCode::OK, response)
        }
    }
}

fn parse_request(body: &[u8]) -> std::result::Result<SyncRequest, String> {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value @ Value::Object(_)) => value,
        _ => return Err("Invalid client information sent!".to_string()),
    };
    if ["version", "supported_protocols"]
        .iter()
        .any(|key| value.get(key).is_none())
    {
        return Err("Posted JSON is missing fields!".to_string());
    }
    serde_json::from_value(value).map_err(|e| format!("Invalid client information sent! {}", e))
}

/// Describe a managed stream, or `None` when it does not exist
pub fn describe_stream(streams: &StreamRegistry, name: &str) -> Option<StreamSyncResponse> {
    streams.get(name).map(|stream| StreamSyncResponse {
        version: VERSION.to_string(),
        supported_protocols: stream.protocol_ids(),
        stream_info: stream.video.info(),
        stream_name: stream.name,
    })
}

/// Register both sync routes
pub fn register_routes(
    controller: &dyn NetworkController,
    streams: Arc<StreamRegistry>,
    protocols: Arc<ProtocolRegistry>,
) -> Result<()> {
    let sync_streams = streams.clone();
    controller.add_route(
        SYNC_ROUTE,
        &[Method::POST],
        route_handler(move |request: RouteRequest| {
            let (status, response) =
                evaluate_sync(&request.body, protocols.ids(), sync_streams.names());
            if status != StatusCode::OK {
                tracing::debug!(message = %response.message, "Sync rejected");
            }
            async move { RouteResponse::json(status, &response) }
        }),
    )?;

    controller.add_route(
        STREAM_SYNC_ROUTE,
        &[Method::GET, Method::POST],
        route_handler(move |request: RouteRequest| {
            let response = match request.param("name").and_then(|name| describe_stream(&streams, name)) {
                Some(description) => RouteResponse::json(StatusCode::OK, &description),
                None => RouteResponse::text(StatusCode::NOT_FOUND, "Stream not found!"),
            };
            async move { response }
        }),
    )?;
    Ok(())
}
