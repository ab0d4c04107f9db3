//! Step cache loader.
//!
//! Reads a pre-materialized cache directory (`<cache_path>/entities/*` and
//! `<cache_path>/relationships/*`, the graph object store's own batch
//! format) as a substitute for executing the step's handler. Parsed batches
//! are injected through the job state, so deduplication, type tracking, and
//! upload enqueueing apply exactly as they would during live execution.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, instrument};

use crate::errors::{IntegrationError, IntegrationResult};
use crate::execution::job_state::JobState;
use crate::storage::FlushedGraphObjectData;

/// Objects injected by one cache load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheLoadCounts {
    pub entities: usize,
    pub relationships: usize,
}

impl CacheLoadCounts {
    pub fn total(&self) -> usize {
        self.entities + self.relationships
    }
}

/// Load a step's cached graph objects. Returns the injected counts; the
/// caller maps a non-zero total to `CACHED`. Errors while reading or
/// parsing propagate and become a step failure.
#[instrument(skip(job_state), fields(step_id = %job_state.step_id()))]
pub async fn load_cache_for_step(
    cache_path: &Path,
    job_state: &JobState,
) -> IntegrationResult<CacheLoadCounts> {
    let mut counts = CacheLoadCounts::default();

    for path in batch_files(&cache_path.join("entities")).await? {
        let data = read_cache_file(&path).await?;
        counts.entities += data.entities.len();
        job_state.add_entities(data.entities).await?;
    }

    for path in batch_files(&cache_path.join("relationships")).await? {
        let data = read_cache_file(&path).await?;
        counts.relationships += data.relationships.len();
        job_state.add_relationships(data.relationships).await?;
    }

    debug!(
        entities = counts.entities,
        relationships = counts.relationships,
        "Loaded step cache"
    );
    Ok(counts)
}

/// Batch files in a cache subdirectory, sorted by file name for a
/// deterministic injection order. A missing subdirectory yields nothing.
async fn batch_files(dir: &Path) -> IntegrationResult<Vec<PathBuf>> {
    if fs::metadata(dir).await.is_err() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths)
}

async fn read_cache_file(path: &Path) -> IntegrationResult<FlushedGraphObjectData> {
    let bytes = fs::read(path).await?;
    serde_json::from_slice(&bytes).map_err(|error| {
        IntegrationError::Storage(format!(
            "Failed to parse cached graph object batch '{}': {error}",
            path.display()
        ))
    })
}
