//! Shared types for the route simulator

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Newtype wrapper for route IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub String);

impl std::fmt::Display for RouteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for the client that requested a route
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inbound route request payload could not be turned into a Route
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid route JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("route field `{0}` is empty")]
    EmptyField(&'static str),
}

/// A route request as received from the broker
///
/// Wire format: `{"routeId":"1","clientId":"abc"}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub route_id: RouteId,
    pub client_id: ClientId,
}

impl Route {
    pub fn new(route_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self { route_id: RouteId(route_id.into()), client_id: ClientId(client_id.into()) }
    }

    /// Decode a raw broker payload into a Route
    ///
    /// Both ids are required and must not be blank.
    pub fn from_json(raw: &[u8]) -> Result<Self, DecodeError> {
        let route: Route = serde_json::from_slice(raw)?;
        if route.route_id.0.trim().is_empty() {
            return Err(DecodeError::EmptyField("routeId"));
        }
        if route.client_id.0.trim().is_empty() {
            return Err(DecodeError::EmptyField("clientId"));
        }
        Ok(route)
    }
}

/// A single point along a route
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Zero-based playback index
    pub seq: usize,
    pub lat: f64,
    pub lng: f64,
}

/// Publishable form of a Position
///
/// Wire format: `{"routeId":"1","clientId":"abc","position":[lat,lng],"finished":false}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEvent {
    pub route_id: RouteId,
    pub client_id: ClientId,
    pub position: [f64; 2],
    /// True only on the last event of a route
    pub finished: bool,
}

impl PositionEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
