//! Entity resolution and space membership.
//!
//! Membership is owned by an external collaborator and trusted as-is.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{AgoraError, Result};
use crate::types::{Entity, EntityId, SpaceId};

#[async_trait]
pub trait Directory: Send + Sync {
    async fn entity(&self, id: EntityId) -> Result<Option<Entity>>;

    async fn is_member(&self, space_id: SpaceId, entity_id: EntityId) -> Result<bool>;

    /// Members of a space in join order.
    async fn members(&self, space_id: SpaceId) -> Result<Vec<Entity>>;

    /// Fail with `NotMember` unless the entity belongs to the space.
    async fn require_member(&self, space_id: SpaceId, entity_id: EntityId) -> Result<()> {
        if self.is_member(space_id, entity_id).await? {
            Ok(())
        } else {
            Err(AgoraError::NotMember {
                space_id,
                entity_id,
            })
        }
    }
}

#[derive(Default)]
struct Inner {
    entities: HashMap<EntityId, Entity>,
    members: HashMap<SpaceId, Vec<EntityId>>,
    index: HashSet<(SpaceId, EntityId)>,
}

/// In-memory directory, populated from configuration or tests.
#[derive(Default)]
pub struct MemoryDirectory {
    inner: RwLock<Inner>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&self, entity: Entity) {
        if let Ok(mut inner) = self.inner.write() {
            inner.entities.insert(entity.id, entity);
        }
    }

    pub fn add_member(&self, space_id: SpaceId, entity_id: EntityId) {
        if let Ok(mut inner) = self.inner.write() {
            if inner.index.insert((space_id, entity_id)) {
                inner.members.entry(space_id).or_default().push(entity_id);
            }
        }
    }

    pub fn remove_member(&self, space_id: SpaceId, entity_id: EntityId) {
        if let Ok(mut inner) = self.inner.write() {
            if inner.index.remove(&(space_id, entity_id)) {
                if let Some(members) = inner.members.get_mut(&space_id) {
                    members.retain(|id| *id != entity_id);
                }
            }
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| AgoraError::Storage("directory lock poisoned".into()))
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn entity(&self, id: EntityId) -> Result<Option<Entity>> {
        Ok(self.read()?.entities.get(&id).cloned())
    }

    async fn is_member(&self, space_id: SpaceId, entity_id: EntityId) -> Result<bool> {
        Ok(self.read()?.index.contains(&(space_id, entity_id)))
    }

    async fn members(&self, space_id: SpaceId) -> Result<Vec<Entity>> {
        let inner = self.read()?;
        Ok(inner
            .members
            .get(&space_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.entities.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}
