//! Core data types and synchronization primitives.

pub mod episode;
pub mod model_version;
pub mod update_slot;

pub use episode::{CompressedEpisode, Episode, EpisodeError, ILLEGAL_ACTION_PENALTY};
pub use model_version::{era_counter, EraCounter, ModelSnapshot, SharedEraCounter};
pub use update_slot::{update_slot, SharedUpdateSlot, UpdateSlot};
