//! Domain layer - Pure business logic.

pub mod chunks;
pub mod jobs;
pub mod overlay;
pub mod srt;
pub mod subtitles;
