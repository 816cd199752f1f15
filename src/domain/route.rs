//! Route providers - turn a Route into an ordered sequence of positions
//!
//! The publisher only depends on the `RouteProvider` trait. The shipped
//! implementation reads `<destinations_dir>/<route_id>.txt`, one `lat,lng`
//! pair per line, in playback order.

use crate::domain::types::{Position, PositionEvent, Route};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Route could not be turned into a position sequence
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route id `{0}` is not a valid destination name")]
    InvalidRouteId(String),

    #[error("no destination file for route `{route_id}` at {path}")]
    NotFound { route_id: String, path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },

    #[error("route `{0}` has no positions")]
    Empty(String),
}

/// Source of position sequences for routes
///
/// Implementations must be deterministic: the same Route yields the same
/// sequence every time.
pub trait RouteProvider: Send + Sync {
    /// Load the ordered positions of a route
    fn load_positions(&self, route: &Route) -> Result<Vec<Position>, RouteError>;

    /// Convert loaded positions into publishable events
    ///
    /// One event per position in the same order. Only the last event is
    /// marked `finished`.
    fn export_positions(
        &self,
        route: &Route,
        positions: &[Position],
    ) -> Result<Vec<PositionEvent>, RouteError> {
        if positions.is_empty() {
            return Err(RouteError::Empty(route.route_id.to_string()));
        }
        let last = positions.len() - 1;
        Ok(positions
            .iter()
            .enumerate()
            .map(|(i, p)| PositionEvent {
                route_id: route.route_id.clone(),
                client_id: route.client_id.clone(),
                position: [p.lat, p.lng],
                finished: i == last,
            })
            .collect())
    }
}

/// Reads route positions from text files in a destinations directory
#[derive(Debug, Clone)]
pub struct FileRouteProvider {
    dir: PathBuf,
}

impl FileRouteProvider {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    fn route_path(&self, route: &Route) -> Result<PathBuf, RouteError> {
        let id = &route.route_id.0;
        // Route ids come off the wire; keep them inside the destinations dir
        if id.contains(['/', '\\']) || id.contains("..") {
            return Err(RouteError::InvalidRouteId(id.clone()));
        }
        Ok(self.dir.join(format!("{}.txt", id)))
    }
}

impl RouteProvider for FileRouteProvider {
    fn load_positions(&self, route: &Route) -> Result<Vec<Position>, RouteError> {
        let path = self.route_path(route)?;
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                RouteError::NotFound { route_id: route.route_id.to_string(), path: path.clone() }
            }
            _ => RouteError::Io { path: path.clone(), source: e },
        })?;

        let positions = parse_positions(&content)?;
        if positions.is_empty() {
            return Err(RouteError::Empty(route.route_id.to_string()));
        }
        Ok(positions)
    }
}

/// Parse `lat,lng` lines into positions, skipping blank lines
pub fn parse_positions(content: &str) -> Result<Vec<Position>, RouteError> {
    let mut positions = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let line_no = idx + 1;

        let Some((lat, lng)) = line.split_once(',') else {
            return Err(RouteError::InvalidLine {
                line: line_no,
                reason: format!("expected `lat,lng`, got `{}`", line),
            });
        };
        let lat = parse_coord(lat, line_no, "latitude", 90.0)?;
        let lng = parse_coord(lng, line_no, "longitude", 180.0)?;

        positions.push(Position { seq: positions.len(), lat, lng });
    }

    Ok(positions)
}

fn parse_coord(raw: &str, line: usize, name: &str, limit: f64) -> Result<f64, RouteError> {
    let value: f64 = raw.trim().parse().map_err(|e| RouteError::InvalidLine {
        line,
        reason: format!("invalid {} `{}`: {}", name, raw.trim(), e),
    })?;
    if !value.is_finite() || value.abs() > limit {
        return Err(RouteError::InvalidLine {
            line,
            reason: format!("{} {} out of range", name, value),
        });
    }
    Ok(value)
}
