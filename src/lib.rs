//! Caruso - Resource-Adaptive Media Processing
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (jobs, subtitles, chunks, overlays)
//! - ports/: Trait definitions
//! - adapters/: Concrete implementations (ffmpeg, whisper-cli, file store)
//! - resources/: Telemetry, policy and model lifecycle
//! - application/: Pipelines and the worker scheduler
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod resources;
