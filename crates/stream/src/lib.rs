//! Streaming: which entities are near enough to hold resources, at which LOD,
//! and which query cells the server still has to be asked about.
//!
//! # Invariants
//! - The proximity pass emits at most one transition per entity per frame.
//! - Leaving proximity never removes the entity record, only its eligibility.
//! - Each query cell is requested at most once per connection.

mod cells;
mod grid;
mod lod;
mod proximity;
mod timer;

pub use cells::{CellProximity, CellQueryConfig, CellStats};
pub use grid::{CellCoord, cells_within};
pub use lod::LodPolicy;
pub use proximity::{ProximityConfig, ProximityStats, ProximityTracker, Transition};
pub use timer::FrameTimer;
