//! File-system backed graph object store.
//!
//! Graph objects are buffered in memory per step and materialized as JSON
//! batch files under `<root>/graph/<step_id>/entities/<uuid>.json` (resp.
//! `relationships/`). Buffers flush automatically once they reach the
//! configured threshold; `flush_step` forces materialization at step end.
//! Lookups and iteration stream from flushed files without materializing the
//! whole run's data, so callers may stop early and visitors may re-enter the
//! store.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::constants::GRAPH_OBJECT_BUFFER_THRESHOLD;
use crate::errors::{IntegrationError, IntegrationResult};
use crate::types::{Entity, Relationship};

/// Signal returned by iteration visitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationControl {
    Continue,
    Stop,
}

/// Contents of one materialized batch file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlushedGraphObjectData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraphObjectKind {
    Entities,
    Relationships,
}

impl GraphObjectKind {
    fn dir_name(&self) -> &'static str {
        match self {
            Self::Entities => "entities",
            Self::Relationships => "relationships",
        }
    }
}

#[derive(Debug)]
struct FlushedFileRecord {
    kind: GraphObjectKind,
    path: PathBuf,
}

#[derive(Debug, Default)]
struct StoreState {
    entity_buffers: HashMap<String, Vec<Entity>>,
    relationship_buffers: HashMap<String, Vec<Relationship>>,
    /// `_key` → batch file holding the flushed entity.
    entity_file_index: HashMap<String, PathBuf>,
    /// Every materialized batch file, in write order.
    flushed_files: Vec<FlushedFileRecord>,
}

#[derive(Debug)]
pub struct FileSystemGraphObjectStore {
    root: PathBuf,
    buffer_threshold: usize,
    state: Mutex<StoreState>,
}

impl FileSystemGraphObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_buffer_threshold(root, GRAPH_OBJECT_BUFFER_THRESHOLD)
    }

    pub fn with_buffer_threshold(root: impl Into<PathBuf>, buffer_threshold: usize) -> Self {
        Self {
            root: root.into(),
            buffer_threshold: buffer_threshold.max(1),
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Root storage directory. `summary.json` and the `graph/` tree live
    /// below it.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that holds a step's materialized batches. A step cache
    /// directory has the same shape.
    pub fn step_directory(&self, step_id: &str) -> PathBuf {
        self.root.join("graph").join(step_id)
    }

    /// Buffer entities for a step, materializing a batch file when the
    /// buffer reaches the threshold.
    pub async fn add_entities(
        &self,
        step_id: &str,
        entities: Vec<Entity>,
    ) -> IntegrationResult<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        state
            .entity_buffers
            .entry(step_id.to_string())
            .or_default()
            .extend(entities);
        if state.entity_buffers[step_id].len() >= self.buffer_threshold {
            self.flush_entity_buffer(&mut state, step_id).await?;
        }
        Ok(())
    }

    /// Buffer relationships for a step, materializing a batch file when the
    /// buffer reaches the threshold.
    pub async fn add_relationships(
        &self,
        step_id: &str,
        relationships: Vec<Relationship>,
    ) -> IntegrationResult<()> {
        if relationships.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        state
            .relationship_buffers
            .entry(step_id.to_string())
            .or_default()
            .extend(relationships);
        if state.relationship_buffers[step_id].len() >= self.buffer_threshold {
            self.flush_relationship_buffer(&mut state, step_id).await?;
        }
        Ok(())
    }

    /// Force materialization of a step's pending writes.
    pub async fn flush_step(&self, step_id: &str) -> IntegrationResult<()> {
        let mut state = self.state.lock().await;
        self.flush_entity_buffer(&mut state, step_id).await?;
        self.flush_relationship_buffer(&mut state, step_id).await?;
        Ok(())
    }

    /// Lookup across the entire run's store: buffered objects first, then
    /// flushed batch files through the key index.
    pub async fn find_entity(&self, key: &str) -> IntegrationResult<Option<Entity>> {
        let file = {
            let state = self.state.lock().await;
            if let Some(entity) = state
                .entity_buffers
                .values()
                .flatten()
                .find(|entity| entity.key == key)
            {
                return Ok(Some(entity.clone()));
            }
            state.entity_file_index.get(key).cloned()
        };

        let Some(path) = file else {
            return Ok(None);
        };
        let data = read_batch_file(&path).await?;
        Ok(data.entities.into_iter().find(|entity| entity.key == key))
    }

    /// Stream entities of a type through an async visitor. Flushed batches
    /// are visited in write order, then still-buffered objects. No lock is
    /// held while the visitor runs.
    pub async fn iterate_entities<F, Fut>(
        &self,
        entity_type: &str,
        mut visitor: F,
    ) -> IntegrationResult<()>
    where
        F: FnMut(Entity) -> Fut,
        Fut: Future<Output = IntegrationResult<IterationControl>>,
    {
        let (files, buffered) = {
            let state = self.state.lock().await;
            let files: Vec<PathBuf> = state
                .flushed_files
                .iter()
                .filter(|record| record.kind == GraphObjectKind::Entities)
                .map(|record| record.path.clone())
                .collect();
            let buffered: Vec<Entity> = state
                .entity_buffers
                .values()
                .flatten()
                .filter(|entity| entity.entity_type == entity_type)
                .cloned()
                .collect();
            (files, buffered)
        };

        for path in files {
            let data = read_batch_file(&path).await?;
            for entity in data.entities {
                if entity.entity_type != entity_type {
                    continue;
                }
                if visitor(entity).await? == IterationControl::Stop {
                    return Ok(());
                }
            }
        }
        for entity in buffered {
            if visitor(entity).await? == IterationControl::Stop {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Stream relationships of a type through an async visitor.
    pub async fn iterate_relationships<F, Fut>(
        &self,
        relationship_type: &str,
        mut visitor: F,
    ) -> IntegrationResult<()>
    where
        F: FnMut(Relationship) -> Fut,
        Fut: Future<Output = IntegrationResult<IterationControl>>,
    {
        let (files, buffered) = {
            let state = self.state.lock().await;
            let files: Vec<PathBuf> = state
                .flushed_files
                .iter()
                .filter(|record| record.kind == GraphObjectKind::Relationships)
                .map(|record| record.path.clone())
                .collect();
            let buffered: Vec<Relationship> = state
                .relationship_buffers
                .values()
                .flatten()
                .filter(|relationship| relationship.relationship_type == relationship_type)
                .cloned()
                .collect();
            (files, buffered)
        };

        for path in files {
            let data = read_batch_file(&path).await?;
            for relationship in data.relationships {
                if relationship.relationship_type != relationship_type {
                    continue;
                }
                if visitor(relationship).await? == IterationControl::Stop {
                    return Ok(());
                }
            }
        }
        for relationship in buffered {
            if visitor(relationship).await? == IterationControl::Stop {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Stream every materialized batch in write order. The upload pipeline
    /// consumes this after all steps have flushed.
    pub async fn iterate_flushed_data<F, Fut>(&self, mut visitor: F) -> IntegrationResult<()>
    where
        F: FnMut(FlushedGraphObjectData) -> Fut,
        Fut: Future<Output = IntegrationResult<()>>,
    {
        let files: Vec<PathBuf> = {
            let state = self.state.lock().await;
            state
                .flushed_files
                .iter()
                .map(|record| record.path.clone())
                .collect()
        };

        for path in files {
            let data = read_batch_file(&path).await?;
            visitor(data).await?;
        }
        Ok(())
    }

    async fn flush_entity_buffer(
        &self,
        state: &mut StoreState,
        step_id: &str,
    ) -> IntegrationResult<()> {
        let Some(entities) = state.entity_buffers.remove(step_id) else {
            return Ok(());
        };
        if entities.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = entities.iter().map(|entity| entity.key.clone()).collect();
        let path = self
            .write_batch_file(
                step_id,
                GraphObjectKind::Entities,
                &FlushedGraphObjectData {
                    entities,
                    relationships: Vec::new(),
                },
            )
            .await?;

        for key in keys {
            state.entity_file_index.insert(key, path.clone());
        }
        state.flushed_files.push(FlushedFileRecord {
            kind: GraphObjectKind::Entities,
            path,
        });
        Ok(())
    }

    async fn flush_relationship_buffer(
        &self,
        state: &mut StoreState,
        step_id: &str,
    ) -> IntegrationResult<()> {
        let Some(relationships) = state.relationship_buffers.remove(step_id) else {
            return Ok(());
        };
        if relationships.is_empty() {
            return Ok(());
        }

        let path = self
            .write_batch_file(
                step_id,
                GraphObjectKind::Relationships,
                &FlushedGraphObjectData {
                    entities: Vec::new(),
                    relationships,
                },
            )
            .await?;
        state.flushed_files.push(FlushedFileRecord {
            kind: GraphObjectKind::Relationships,
            path,
        });
        Ok(())
    }

    async fn write_batch_file(
        &self,
        step_id: &str,
        kind: GraphObjectKind,
        data: &FlushedGraphObjectData,
    ) -> IntegrationResult<PathBuf> {
        let dir = self.step_directory(step_id).join(kind.dir_name());
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.json", Uuid::new_v4()));
        let bytes = serde_json::to_vec(data)?;
        fs::write(&path, bytes).await?;
        debug!(
            step_id = %step_id,
            kind = kind.dir_name(),
            path = %path.display(),
            "Materialized graph object batch"
        );
        Ok(path)
    }
}

async fn read_batch_file(path: &Path) -> IntegrationResult<FlushedGraphObjectData> {
    let bytes = fs::read(path).await?;
    serde_json::from_slice(&bytes).map_err(|error| {
        IntegrationError::Storage(format!(
            "Failed to parse graph object batch '{}': {error}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(key: &str, entity_type: &str) -> Entity {
        Entity::new(key, entity_type, "Resource")
    }

    #[tokio::test]
    async fn buffered_entities_are_findable_before_flush() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemGraphObjectStore::new(dir.path());

        store
            .add_entities("fetch-users", vec![entity("user:1", "acme_user")])
            .await
            .unwrap();

        let found = store.find_entity("user:1").await.unwrap();
        assert_eq!(found.map(|e| e.key), Some("user:1".to_string()));
    }

    #[tokio::test]
    async fn flush_materializes_batch_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemGraphObjectStore::new(dir.path());

        store
            .add_entities(
                "fetch-users",
                vec![entity("user:1", "acme_user"), entity("user:2", "acme_user")],
            )
            .await
            .unwrap();
        store.flush_step("fetch-users").await.unwrap();

        let entities_dir = store.step_directory("fetch-users").join("entities");
        let count = std::fs::read_dir(entities_dir).unwrap().count();
        assert_eq!(count, 1);

        let found = store.find_entity("user:2").await.unwrap();
        assert_eq!(found.map(|e| e.key), Some("user:2".to_string()));
    }

    #[tokio::test]
    async fn buffer_threshold_triggers_automatic_flush() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemGraphObjectStore::with_buffer_threshold(dir.path(), 2);

        store
            .add_entities(
                "fetch-users",
                vec![entity("user:1", "acme_user"), entity("user:2", "acme_user")],
            )
            .await
            .unwrap();

        let entities_dir = store.step_directory("fetch-users").join("entities");
        assert!(entities_dir.exists());
    }

    #[tokio::test]
    async fn iteration_filters_by_type_and_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemGraphObjectStore::new(dir.path());

        store
            .add_entities(
                "fetch-users",
                vec![
                    entity("user:1", "acme_user"),
                    entity("group:1", "acme_group"),
                    entity("user:2", "acme_user"),
                ],
            )
            .await
            .unwrap();
        store.flush_step("fetch-users").await.unwrap();

        let mut seen = Vec::new();
        store
            .iterate_entities("acme_user", |entity| {
                seen.push(entity.key.clone());
                async move { Ok(IterationControl::Stop) }
            })
            .await
            .unwrap();
        assert_eq!(seen.len(), 1);

        seen.clear();
        store
            .iterate_entities("acme_user", |entity| {
                seen.push(entity.key.clone());
                async move { Ok(IterationControl::Continue) }
            })
            .await
            .unwrap();
        assert_eq!(seen, vec!["user:1".to_string(), "user:2".to_string()]);
    }

    #[tokio::test]
    async fn relationships_flush_and_iterate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemGraphObjectStore::new(dir.path());

        let relationship = Relationship::new(
            "user:1|has|group:1",
            "acme_user_has_group",
            "user:1",
            "group:1",
        );
        store
            .add_relationships("build-memberships", vec![relationship.clone()])
            .await
            .unwrap();
        store.flush_step("build-memberships").await.unwrap();

        let mut seen = Vec::new();
        store
            .iterate_relationships("acme_user_has_group", |rel| {
                seen.push(rel);
                async move { Ok(IterationControl::Continue) }
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![relationship]);
    }

    #[tokio::test]
    async fn flushed_data_iteration_covers_all_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemGraphObjectStore::new(dir.path());

        store
            .add_entities("a", vec![entity("a:1", "acme_a")])
            .await
            .unwrap();
        store.flush_step("a").await.unwrap();
        store
            .add_relationships(
                "b",
                vec![Relationship::new("a:1|has|a:2", "acme_has", "a:1", "a:2")],
            )
            .await
            .unwrap();
        store.flush_step("b").await.unwrap();

        let mut entity_total = 0;
        let mut relationship_total = 0;
        store
            .iterate_flushed_data(|data| {
                entity_total += data.entities.len();
                relationship_total += data.relationships.len();
                async move { Ok(()) }
            })
            .await
            .unwrap();
        assert_eq!(entity_total, 1);
        assert_eq!(relationship_total, 1);
    }

    #[tokio::test]
    async fn visitor_may_reenter_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemGraphObjectStore::new(dir.path());

        store
            .add_entities("a", vec![entity("a:1", "acme_a")])
            .await
            .unwrap();
        store.flush_step("a").await.unwrap();

        let store_ref = &store;
        store
            .iterate_entities("acme_a", |e| {
                // A converting step adds relationships while iterating.
                let relationship = Relationship::new(
                    format!("{}|is|copy", e.key),
                    "acme_is_copy",
                    e.key.clone(),
                    "copy:1",
                );
                async move {
                    store_ref.add_relationships("b", vec![relationship]).await?;
                    Ok(IterationControl::Continue)
                }
            })
            .await
            .unwrap();

        store.flush_step("b").await.unwrap();
        let mut count = 0;
        store
            .iterate_relationships("acme_is_copy", |_| {
                count += 1;
                async move { Ok(IterationControl::Continue) }
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn batch_file_omits_empty_collections() {
        let data = FlushedGraphObjectData {
            entities: vec![Entity::new("a", "t", "C")],
            relationships: Vec::new(),
        };
        let value = serde_json::to_value(&data).unwrap();
        assert!(value.get("relationships").is_none());
        assert_eq!(value["entities"], json!([{"_key": "a", "_type": "t", "_class": ["C"]}]));
    }
}
