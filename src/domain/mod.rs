//! Domain models - routes, positions and position events
//!
//! This module contains the canonical data types used throughout the system:
//! - `Route` - a route request decoded from the broker
//! - `Position` - a point along a route with its playback index
//! - `PositionEvent` - the publishable form of a position
//! - `RouteProvider` - source of position sequences for routes

pub mod route;
pub mod types;

// Re-export commonly used types at module level
pub use route::{FileRouteProvider, RouteError, RouteProvider};
pub use types::{ClientId, DecodeError, Position, PositionEvent, Route, RouteId};
