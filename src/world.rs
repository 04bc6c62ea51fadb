use atomic_refcell::{AtomicRef, AtomicRefMut};

use crate::entity::{EntitiesRef, EntityStore};
use crate::error::Result;
use crate::events::{EventRegistry, Events};
use crate::resources::Resources;
use crate::storage::Components;
use crate::{Bundle, Component, Entity, Error};

/// Container for one sub-application's data: the entity registry, typed
/// component columns, the resource table and the event queues.
///
/// A world is not synchronized by itself; concurrent use from systems is
/// mediated entirely by the scheduler's conflict analysis, with the
/// per-column and per-resource cells as a backstop.
#[derive(Default)]
pub struct World {
    pub(crate) entities: EntityStore,
    pub(crate) components: Components,
    pub(crate) resources: Resources,
    pub(crate) events: EventRegistry,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a new entity with the given bundle of components
    pub fn spawn(&mut self, bundle: impl Bundle) -> Entity {
        let entity = self.entities.spawn();
        bundle.insert(self, entity);
        entity
    }

    /// Materialize a previously reserved id. Used when deferred spawns are
    /// applied.
    pub(crate) fn spawn_at(&mut self, entity: Entity, bundle: impl Bundle) {
        if self.entities.materialize(entity) {
            bundle.insert(self, entity);
        } else {
            tracing::warn!("Dropping deferred spawn of stale entity {entity}");
        }
    }

    /// Destroy the entity, orphaning any children.
    ///
    /// The entity is removed from its parent's child list and its children
    /// lose their parent reference but stay alive.
    pub fn despawn(&mut self, entity: Entity) -> Result<()> {
        if !self.entities.is_alive(entity) {
            return Err(Error::NoSuchEntity(entity));
        }
        self.detach_from_parent(entity);
        self.orphan_children(entity);
        self.components.remove_entity(entity.index());
        self.entities.despawn(entity)
    }

    /// Destroy the entity and every descendant
    pub fn despawn_recursive(&mut self, entity: Entity) -> Result<()> {
        if !self.entities.is_alive(entity) {
            return Err(Error::NoSuchEntity(entity));
        }
        self.detach_from_parent(entity);
        for entity in self.collect_subtree(entity) {
            self.components.remove_entity(entity.index());
            let _ = self.entities.despawn(entity);
        }
        Ok(())
    }

    /// Insert a bundle of components on an existing entity
    pub fn insert(&mut self, entity: Entity, bundle: impl Bundle) -> Result<()> {
        if !self.entities.is_alive(entity) {
            return Err(Error::NoSuchEntity(entity));
        }
        bundle.insert(self, entity);
        Ok(())
    }

    /// Remove a bundle's component types from an entity. Components the
    /// entity does not have are skipped.
    pub fn remove<B: Bundle>(&mut self, entity: Entity) -> Result<()> {
        if !self.entities.is_alive(entity) {
            return Err(Error::NoSuchEntity(entity));
        }
        B::remove(self, entity);
        Ok(())
    }

    pub(crate) fn insert_one<T: Component>(&mut self, entity: Entity, value: T) {
        self.components
            .column_or_insert::<T>()
            .borrow_mut()
            .insert(entity.index(), value);
    }

    pub(crate) fn remove_one<T: Component>(&mut self, entity: Entity) {
        if let Some(column) = self.components.column::<T>() {
            column.borrow_mut().remove(&entity.index());
        }
    }

    /// Shared borrow of a single component
    pub fn get<T: Component>(&self, entity: Entity) -> Option<AtomicRef<'_, T>> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        let column = self.components.column::<T>()?;
        let guard = column.borrow();
        if !guard.contains_key(&entity.index()) {
            return None;
        }
        Some(AtomicRef::map(guard, |map| {
            map.get(&entity.index()).expect("key checked above")
        }))
    }

    /// Unique borrow of a single component
    pub fn get_mut<T: Component>(&self, entity: Entity) -> Option<AtomicRefMut<'_, T>> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        let column = self.components.column::<T>()?;
        let guard = column.borrow_mut();
        if !guard.contains_key(&entity.index()) {
            return None;
        }
        Some(AtomicRefMut::map(guard, |map| {
            map.get_mut(&entity.index()).expect("key checked above")
        }))
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of live entities
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub(crate) fn entities_ref(&self) -> EntitiesRef<'_> {
        self.entities.slots_ref()
    }

    /// Insert a resource unless one of the type already exists
    pub fn insert_resource<T: Send + Sync + 'static>(&mut self, value: T) {
        if !self.resources.insert(value) {
            tracing::debug!(
                "Resource {} already exists, keeping the previous value",
                tynm::type_name::<T>()
            );
        }
    }

    /// Insert a default-constructed resource unless one already exists
    pub fn init_resource<T: Default + Send + Sync + 'static>(&mut self) {
        self.resources.init::<T>();
    }

    pub fn remove_resource<T: 'static>(&mut self) {
        self.resources.remove::<T>();
    }

    pub fn contains_resource<T: 'static>(&self) -> bool {
        self.resources.contains::<T>()
    }

    pub fn resource<T: 'static>(&self) -> Option<AtomicRef<'_, T>> {
        self.resources.borrow::<T>()
    }

    pub fn resource_mut<T: 'static>(&self) -> Option<AtomicRefMut<'_, T>> {
        self.resources.borrow_mut::<T>()
    }

    /// Create the event queue for `T`. Idempotent.
    pub fn add_event<T: Send + Sync + 'static>(&mut self) {
        self.events.register::<T>();
    }

    pub fn events<T: Send + Sync + 'static>(&self) -> Option<AtomicRef<'_, Events<T>>> {
        self.events.borrow::<T>()
    }

    pub fn events_mut<T: Send + Sync + 'static>(&self) -> Option<AtomicRefMut<'_, Events<T>>> {
        self.events.borrow_mut::<T>()
    }

    /// Send an event, if the queue exists. Returns whether it was sent.
    pub fn send_event<T: Send + Sync + 'static>(&self, event: T) -> bool {
        match self.events.borrow_mut::<T>() {
            Some(mut events) => {
                events.send(event);
                true
            }
            None => false,
        }
    }

    /// Age every event queue by one tick
    pub fn tick_events(&self) {
        self.events.tick_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Health(f32);
    struct Armor(u32);

    crate::component! {
        Health,
        Armor,
    }

    #[test]
    fn spawn_insert_remove_roundtrip() {
        let mut world = World::new();
        let id = world.spawn((Health(10.0), Armor(5)));

        assert_eq!(world.get::<Health>(id).unwrap().0, 10.0);
        assert_eq!(world.get::<Armor>(id).unwrap().0, 5);

        world.remove::<(Health, Armor)>(id).unwrap();
        assert!(world.get::<Health>(id).is_none());
        assert!(world.get::<Armor>(id).is_none());

        world.insert(id, (Health(10.0), Armor(5))).unwrap();
        assert_eq!(world.get::<Health>(id).unwrap().0, 10.0);
        assert_eq!(world.get::<Armor>(id).unwrap().0, 5);
    }

    #[test]
    fn despawn_clears_components() {
        let mut world = World::new();
        let id = world.spawn(Health(1.0));
        world.despawn(id).unwrap();

        assert!(!world.contains(id));
        assert!(world.get::<Health>(id).is_none());
        assert_eq!(world.despawn(id), Err(Error::NoSuchEntity(id)));
    }

    #[test]
    fn component_mutation() {
        let mut world = World::new();
        let id = world.spawn(Health(1.0));
        world.get_mut::<Health>(id).unwrap().0 = 3.0;
        assert_eq!(world.get::<Health>(id).unwrap().0, 3.0);
    }

    #[test]
    fn missing_event_queue() {
        let world = World::new();
        assert!(!world.send_event(3u32));
        assert!(world.events::<u32>().is_none());
    }
}
