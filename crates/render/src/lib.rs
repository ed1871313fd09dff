//! Scene Adapter: the interface the viewer drives to materialize entities.
//!
//! # Invariants
//! - The scene never mutates registry state; it only receives handles.
//! - Every `attach` is eventually matched by a `detach` or a re-`attach`.
//!
//! The GPU and physics engines live behind [`SceneSink`]. [`RecordingSink`]
//! keeps the resulting scene in memory for the CLI and tests.

mod sink;

pub use sink::{RecordingSink, SceneCall, SceneEntity, SceneSink};
