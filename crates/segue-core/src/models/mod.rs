//! Plain data types shared across the core.

pub mod media;
pub mod playback;

pub use media::{Media, MediaMeta, MediaNode};
pub use playback::{PlaybackOrder, PlaybackRepeat};
