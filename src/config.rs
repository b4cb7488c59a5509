//! Environment configuration.

use crate::resources::monitor::PressureThresholds;
use crate::resources::policy::{ModelTier, PolicyConfig};
use std::env;
use std::path::PathBuf;

/// What to do when one chunk of a parallel transcription fails. Losing a
/// few seconds of captions is usually preferable to failing a multi-minute
/// job outright, so dropping is the default; the policy is explicit and
/// overridable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkFailurePolicy {
    /// Log and skip the chunk's time range
    #[default]
    Drop,
    /// Re-run the failed chunk serially before giving up on it
    Retry,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Directory for durable job records
    pub jobs_dir: PathBuf,
    /// Directory for finished artifacts
    pub output_dir: PathBuf,
    /// Directory for uploaded source media
    pub upload_dir: PathBuf,
    /// Directory containing transcription model files
    pub model_dir: PathBuf,
    /// Transcription CLI binary
    pub whisper_bin: String,
    /// Background sampler cadence in seconds
    pub monitor_interval_secs: u64,
    pub thresholds: PressureThresholds,
    /// Pin the lowest-memory tier unconditionally (fast-and-safe mode)
    pub fast_and_safe: bool,
    /// Drop the cached model after each job
    pub unload_model_after_use: bool,
    pub chunk_failure: ChunkFailurePolicy,
    /// Override the derived worker pool size
    pub workers_override: Option<usize>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            addr: env::var("ADDR").unwrap_or_else(|_| String::from("127.0.0.1")),
            port: env::var("PORT").unwrap_or_else(|_| String::from("3000")),
            jobs_dir: env_path("JOBS_DIR", "jobs"),
            output_dir: env_path("OUTPUT_DIR", "output"),
            upload_dir: env_path("UPLOAD_DIR", "uploads"),
            model_dir: env_path("MODEL_DIR", "models"),
            whisper_bin: env::var("WHISPER_BIN").unwrap_or_else(|_| String::from("whisper-cli")),
            monitor_interval_secs: env_parse("MONITOR_INTERVAL_SECS", 5),
            thresholds: PressureThresholds {
                memory_warning: env_parse("MEMORY_WARNING_THRESHOLD", 0.80),
                memory_critical: env_parse("MEMORY_CRITICAL_THRESHOLD", 0.92),
                cpu_warning: env_parse("CPU_WARNING_THRESHOLD", 0.90),
            },
            fast_and_safe: env_parse("FAST_AND_SAFE", false),
            unload_model_after_use: env_parse("UNLOAD_MODEL_AFTER_USE", false),
            chunk_failure: match env::var("CHUNK_FAILURE_POLICY").as_deref() {
                Ok("retry") => ChunkFailurePolicy::Retry,
                _ => ChunkFailurePolicy::Drop,
            },
            workers_override: env::var("WORKERS").ok().and_then(|v| v.parse().ok()),
        }
    }

    pub fn policy(&self) -> PolicyConfig {
        PolicyConfig {
            pinned_tier: if self.fast_and_safe {
                Some(ModelTier::Tiny)
            } else {
                None
            },
        }
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
