//! Trait definitions - seams between the application core and the outside
//! world (media tooling, transcription capability, durable job records).

pub mod media;
pub mod renderer;
pub mod repository;
pub mod transcriber;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
