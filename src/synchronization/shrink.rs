//! Adaptive payload shrinking.
//!
//! When the server rejects an upload for size, the batch is reduced in
//! place: the largest raw-data field of the largest entity is replaced with
//! the literal string `"TRUNCATED"`, repeatedly, until the serialized batch
//! fits under the cap. Entity properties are never touched; only provider
//! raw data is sacrificed.

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::{IntegrationError, IntegrationResult};
use crate::types::Entity;

const TRUNCATED_REPLACEMENT: &str = "TRUNCATED";

/// Outcome of one shrink pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShrinkRawDataResult {
    /// Serialized batch size before shrinking, in bytes.
    pub initial_size: usize,
    /// Serialized batch size after shrinking, in bytes.
    pub total_size: usize,
    /// Number of raw-data fields replaced.
    pub items_removed: usize,
    /// Wall-clock time spent shrinking, in milliseconds.
    pub total_time_ms: u64,
}

fn serialized_size<T: Serialize>(value: &T) -> IntegrationResult<usize> {
    Ok(serde_json::to_vec(value)?.len())
}

/// Reduce a batch's serialized size below `max_size` by truncating large
/// raw-data fields in place. Idempotent once the batch fits: a second call
/// reports `items_removed = 0`.
pub fn shrink_raw_data(
    batch: &mut [Entity],
    max_size: usize,
) -> IntegrationResult<ShrinkRawDataResult> {
    let started = Instant::now();
    let replacement_size = serialized_size(&Value::String(TRUNCATED_REPLACEMENT.to_string()))?;

    let initial_size = serialized_size(&&*batch)?;
    let mut total_size = initial_size;
    let mut items_removed = 0usize;

    while total_size > max_size {
        let entity_index = largest_entity_index(batch)?;
        let entity_key = batch[entity_index].key.clone();

        let Some(raw_data) = batch[entity_index]
            .raw_data
            .as_mut()
            .filter(|entries| !entries.is_empty())
        else {
            return Err(IntegrationError::UploadFailed(format!(
                "Cannot shrink upload payload: entity '{entity_key}' has no raw data to truncate"
            )));
        };

        let entry_index = largest_raw_data_entry_index(raw_data)?;
        let entry = &mut raw_data[entry_index];

        let mut largest_field: Option<(String, usize)> = None;
        for (field, value) in entry.raw_data.iter() {
            let size = serialized_size(value)?;
            if largest_field
                .as_ref()
                .map(|(_, largest)| size > *largest)
                .unwrap_or(true)
            {
                largest_field = Some((field.clone(), size));
            }
        }

        let Some((field, old_size)) = largest_field else {
            return Err(IntegrationError::UploadFailed(format!(
                "Cannot shrink upload payload: raw data entry '{}' of entity '{entity_key}' has no fields",
                entry.name
            )));
        };
        if old_size <= replacement_size {
            // Everything left is already smaller than the replacement;
            // further truncation cannot make progress.
            return Err(IntegrationError::UploadFailed(format!(
                "Cannot shrink upload payload below {total_size} bytes (limit {max_size})"
            )));
        }

        entry.raw_data.insert(
            field.clone(),
            Value::String(TRUNCATED_REPLACEMENT.to_string()),
        );
        total_size = total_size - old_size + replacement_size;
        items_removed += 1;

        debug!(
            entity_key = %entity_key,
            field = %field,
            freed_bytes = old_size - replacement_size,
            total_size,
            "Truncated raw data field"
        );
    }

    Ok(ShrinkRawDataResult {
        initial_size,
        total_size,
        items_removed,
        total_time_ms: started.elapsed().as_millis() as u64,
    })
}

fn largest_entity_index(batch: &[Entity]) -> IntegrationResult<usize> {
    let mut largest: Option<(usize, usize)> = None;
    for (index, entity) in batch.iter().enumerate() {
        let size = serialized_size(entity)?;
        if largest
            .as_ref()
            .map(|(_, largest_size)| size > *largest_size)
            .unwrap_or(true)
        {
            largest = Some((index, size));
        }
    }
    largest.map(|(index, _)| index).ok_or_else(|| {
        IntegrationError::UploadFailed("Cannot shrink an empty upload payload".to_string())
    })
}

fn largest_raw_data_entry_index(
    entries: &[crate::types::RawDataEntry],
) -> IntegrationResult<usize> {
    let mut largest: Option<(usize, usize)> = None;
    for (index, entry) in entries.iter().enumerate() {
        let size = serialized_size(entry)?;
        if largest
            .as_ref()
            .map(|(_, largest_size)| size > *largest_size)
            .unwrap_or(true)
        {
            largest = Some((index, size));
        }
    }
    largest.map(|(index, _)| index).ok_or_else(|| {
        IntegrationError::UploadFailed("Cannot shrink an entity with empty raw data".to_string())
    })
}
