//! Pure decision functions mapping resource telemetry and work descriptors
//! to processing plans. Deterministic given their inputs; nothing here
//! touches the system.

use crate::resources::monitor::ResourceSnapshot;
use serde::{Deserialize, Serialize};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Named quality/speed/memory tradeoff points for the transcription
/// capability, ordered by memory footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelTier {
    /// Approximate resident footprint of a loaded model.
    pub fn memory_footprint_mb(&self) -> u64 {
        match self {
            ModelTier::Tiny => 100,
            ModelTier::Base => 500,
            ModelTier::Small => 1000,
            ModelTier::Medium => 2500,
            ModelTier::Large => 5000,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelTier::Tiny => "tiny",
            ModelTier::Base => "base",
            ModelTier::Small => "small",
            ModelTier::Medium => "medium",
            ModelTier::Large => "large",
        }
    }
}

/// Policy knobs that change decisions, sourced from configuration.
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    /// The named fast-and-safe deployment mode: pin the lowest-memory tier
    /// unconditionally, trading quality for predictability. Explicit, never
    /// a silent fallback.
    pub pinned_tier: Option<ModelTier>,
}

/// Derived per-invocation plan. Computed fresh from a live snapshot for
/// every job; never cached across jobs because pressure moves between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessingPlan {
    pub tier: ModelTier,
    pub chunked: bool,
    /// Initial chunk window; re-evaluated (shrink-only) during the job
    pub chunk_secs: f64,
    /// 1 means the sequential branch
    pub parallelism: usize,
}

/// Assets longer than this are always chunked for transcription.
pub const CHUNK_DURATION_THRESHOLD_SECS: f64 = 1200.0;
/// Below this much available memory everything is chunked.
pub const CHUNK_MEMORY_FLOOR_BYTES: u64 = 2 * 1024 * 1024 * 1024;
/// The parallel branch needs a long asset and this much headroom; memory,
/// not core count, is the binding constraint since each task loads its own
/// model instance.
pub const PARALLEL_MIN_DURATION_SECS: f64 = 600.0;
pub const PARALLEL_MIN_AVAILABLE_BYTES: u64 = 4 * 1024 * 1024 * 1024;
/// Hard cap on intra-job parallel transcription tasks.
pub const PARALLEL_DEGREE_CAP: usize = 4;

/// Sequential chunk windows never shrink below these.
pub const MIN_AUDIO_CHUNK_SECS: f64 = 60.0;
pub const MIN_VIDEO_CHUNK_SECS: f64 = 30.0;

/// Pick the transcription tier for the available memory. Monotonic: less
/// memory never selects a higher-memory tier. Long assets cap at Base to
/// keep wall-clock bounded.
pub fn select_model_tier(available_bytes: u64, duration_secs: f64) -> ModelTier {
    let available = available_bytes as f64;
    if available < 2.0 * GIB {
        ModelTier::Tiny
    } else if available < 4.0 * GIB || duration_secs > CHUNK_DURATION_THRESHOLD_SECS {
        ModelTier::Base
    } else {
        ModelTier::Small
    }
}

/// Chunk when the asset is long, memory is short, or a heavyweight tier is
/// loaded under moderate memory.
pub fn should_chunk(duration_secs: f64, available_bytes: u64, tier: ModelTier) -> bool {
    duration_secs > CHUNK_DURATION_THRESHOLD_SECS
        || available_bytes < CHUNK_MEMORY_FLOOR_BYTES
        || (tier >= ModelTier::Medium && available_bytes < PARALLEL_MIN_AVAILABLE_BYTES)
}

/// Stepped audio chunk window: tighter memory, shorter chunks.
pub fn audio_chunk_secs(available_bytes: u64) -> f64 {
    let available = available_bytes as f64;
    if available < 1.5 * GIB {
        120.0
    } else if available < 3.0 * GIB {
        240.0
    } else {
        300.0
    }
}

/// Video chunks are far heavier per second than audio chunks, so the steps
/// sit an order of magnitude lower.
pub fn video_chunk_secs(available_bytes: u64) -> f64 {
    let available = available_bytes as f64;
    if available < 1.5 * GIB {
        30.0
    } else if available < 3.0 * GIB {
        45.0
    } else {
        60.0
    }
}

/// Re-size the next audio chunk mid-job. May shrink under rising pressure,
/// never grows (growing back would oscillate), and never drops below the
/// minimum window.
pub fn shrink_audio_chunk(current_secs: f64, available_bytes: u64) -> f64 {
    audio_chunk_secs(available_bytes)
        .min(current_secs)
        .max(MIN_AUDIO_CHUNK_SECS)
}

/// Same shrink-only rule for video chunks.
pub fn shrink_video_chunk(current_secs: f64, available_bytes: u64) -> f64 {
    video_chunk_secs(available_bytes)
        .min(current_secs)
        .max(MIN_VIDEO_CHUNK_SECS)
}

/// Parallel fan-out degree, bounded by a small cap independent of logical
/// core count.
pub fn parallel_degree(physical_cores: usize) -> usize {
    physical_cores.clamp(1, PARALLEL_DEGREE_CAP)
}

/// End-to-end worker pool size: one worker on small systems, a small fixed
/// cap elsewhere. Each concurrent job can load its own model instance.
pub fn worker_count(total_memory_bytes: u64, physical_cores: usize) -> usize {
    if (total_memory_bytes as f64) <= 4.0 * GIB {
        1
    } else {
        physical_cores.clamp(1, 4)
    }
}

/// Build the transcription plan for one invocation from a fresh snapshot.
pub fn plan_transcription(
    snapshot: &ResourceSnapshot,
    duration_secs: f64,
    physical_cores: usize,
    config: &PolicyConfig,
) -> ProcessingPlan {
    let available = snapshot.memory_available_bytes;
    let tier = config
        .pinned_tier
        .unwrap_or_else(|| select_model_tier(available, duration_secs));
    let chunked = should_chunk(duration_secs, available, tier);

    // Memory gates parallelism: long assets alone do not justify loading
    // several model instances at once.
    let parallelism = if chunked
        && duration_secs > PARALLEL_MIN_DURATION_SECS
        && available >= PARALLEL_MIN_AVAILABLE_BYTES
    {
        parallel_degree(physical_cores)
    } else {
        1
    };

    ProcessingPlan {
        tier,
        chunked,
        chunk_secs: audio_chunk_secs(available),
        parallelism,
    }
}

/// Chunk decision for compositing: shorter duration threshold and
/// video-specific window steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositePlan {
    pub chunked: bool,
    pub chunk_secs: f64,
}

pub const COMPOSITE_DURATION_THRESHOLD_SECS: f64 = 300.0;

pub fn plan_compositing(snapshot: &ResourceSnapshot, duration_secs: f64) -> CompositePlan {
    let chunked = duration_secs > COMPOSITE_DURATION_THRESHOLD_SECS
        || snapshot.memory_used_fraction > 0.6
        || snapshot.memory_available_bytes < CHUNK_MEMORY_FLOOR_BYTES;

    CompositePlan {
        chunked,
        chunk_secs: video_chunk_secs(snapshot.memory_available_bytes),
    }
}
