//! Entity Registry: authoritative client-side copy of remote world state.
//!
//! # Invariants
//! - Mutated only by decoded server messages ([`EntityRegistry::apply`]) and
//!   by the load state the viewer writes back through [`Loadable`].
//! - Object records persist when they leave proximity; only their loaded
//!   resources go.
//! - Every removal is reported as an event carrying the removed record, so
//!   the resources it still references can be released.

mod avatar;
mod entity;
mod object;
mod registry;

pub use avatar::{AVATAR_BOUNDING_LEN, Avatar, DEFAULT_AVATAR_MODEL, OWN_AVATAR_IMPORTANCE};
pub use entity::{LoadState, Loadable, LodLimits, ModelSource};
pub use object::WorldObject;
pub use registry::{EntityRegistry, LoginInfo, RegistryEvent, RegistrySummary};
