//! Services - route streaming logic
//!
//! - `publisher` - Decodes route requests and replays them as paced position events

pub mod publisher;

// Re-export commonly used types
pub use publisher::{
    FailurePolicy, PositionStreamPublisher, PublisherSettings, StreamError, StreamReport,
};
