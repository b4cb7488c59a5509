use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A contiguous time-bounded slice of a media asset, processed
/// independently so memory stays bounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// 0-based, contiguous across the whole asset
    pub index: usize,
    /// Window start in seconds, inclusive
    pub start: f64,
    /// Window end in seconds, exclusive
    pub end: f64,
    /// Where the extracted slice artifact lives
    pub path: PathBuf,
}

impl ChunkDescriptor {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Partition `total_duration` into contiguous chunks of `chunk_secs` (the
/// last one may be shorter). Windows cover the asset with no gaps and no
/// overlaps. Used by the parallel branch, which fixes all windows up front;
/// the sequential branches compute windows one at a time so the size can
/// shrink mid-job.
pub fn partition(
    total_duration: f64,
    chunk_secs: f64,
    dir: &Path,
    prefix: &str,
    extension: &str,
) -> Vec<ChunkDescriptor> {
    let mut chunks = Vec::new();
    let mut current = 0.0;
    let mut index = 0;

    while current < total_duration {
        let end = (current + chunk_secs).min(total_duration);
        chunks.push(ChunkDescriptor {
            index,
            start: current,
            end,
            path: dir.join(format!("{}_{:04}.{}", prefix, index, extension)),
        });
        current = end;
        index += 1;
    }

    chunks
}
