// src/lib.rs
//! Walk Tracker Library
//!
//! Records walks from a position source: a session state machine that
//! accumulates route distance, durable storage for the walk in progress and
//! the archive of finished walks, and route export.

pub mod clock;
pub mod config;
pub mod display;
pub mod error;
pub mod export;
pub mod geo;
pub mod gps;
pub mod session;
pub mod store;
pub mod walk;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, WalkError};
pub use geo::{distance, Coordinate, MapRegion};
pub use gps::{PositionSource, SimulatedSource, SourceError, StreamSource};
pub use session::{SessionEvent, SessionState, WalkSession, WalkSnapshot, WalkStatus};
pub use store::{JsonFileStore, MemoryStore, WalkStore};
pub use walk::{PositionSample, Walk, WalkStats};
