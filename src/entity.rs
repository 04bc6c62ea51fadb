use core::fmt;
use core::num::NonZeroU32;
use core::sync::atomic::{AtomicU32, Ordering};

use atomic_refcell::{AtomicRef, AtomicRefCell};

#[derive(Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Hash)]
/// Represents an entity spawned into a [World](crate::World).
///
/// An id is the pair of a slot index and a generation. The generation is
/// bumped when the slot is retired, which invalidates any stale copies of
/// the id still floating around.
pub struct Entity {
    index: u32,
    generation: NonZeroU32,
}

impl Entity {
    pub(crate) fn from_parts(index: u32, generation: NonZeroU32) -> Self {
        Self { index, generation }
    }

    /// The slot index of the entity
    pub fn index(self) -> u32 {
        self.index
    }

    /// The generation of the entity
    pub fn generation(self) -> u32 {
        self.generation.get()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Entity")
            .field(&self.index)
            .field(&self.generation.get())
            .finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation.get())
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Slot {
    pub(crate) generation: NonZeroU32,
    pub(crate) alive: bool,
}

const FIRST_GENERATION: NonZeroU32 = match NonZeroU32::new(1) {
    Some(v) => v,
    None => unreachable!(),
};

/// Slot table and id allocator for a single world.
///
/// Fresh indices are handed out from an atomic cursor so that ids can be
/// reserved from a shared borrow, as command recording does mid sub-stage.
/// Reserved slots materialize lazily when the deferred spawn is applied.
#[derive(Default)]
pub(crate) struct EntityStore {
    slots: AtomicRefCell<Vec<Slot>>,
    cursor: AtomicU32,
    free: Vec<u32>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            slots: AtomicRefCell::new(Vec::new()),
            cursor: AtomicU32::new(0),
            free: Vec::new(),
        }
    }

    /// Reserve a fresh id without materializing the slot.
    ///
    /// Never reuses retired indices; only exclusive spawning does.
    pub fn reserve(&self) -> Entity {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        Entity::from_parts(index, FIRST_GENERATION)
    }

    /// Extend the slot table to cover every reserved index.
    pub fn flush(&mut self) {
        let cursor = self.cursor.load(Ordering::Relaxed) as usize;
        let slots = self.slots.get_mut();
        if slots.len() < cursor {
            slots.resize(
                cursor,
                Slot {
                    generation: FIRST_GENERATION,
                    alive: false,
                },
            );
        }
    }

    /// Mark a reserved id as alive. Returns false for stale or occupied ids.
    pub fn materialize(&mut self, entity: Entity) -> bool {
        self.flush();
        let slots = self.slots.get_mut();
        match slots.get_mut(entity.index() as usize) {
            Some(slot) if slot.generation == entity.generation && !slot.alive => {
                slot.alive = true;
                true
            }
            _ => false,
        }
    }

    /// Spawn a new entity, reusing a retired slot when one is available.
    pub fn spawn(&mut self) -> Entity {
        self.flush();
        if let Some(index) = self.free.pop() {
            let slots = self.slots.get_mut();
            let slot = &mut slots[index as usize];
            slot.alive = true;
            Entity::from_parts(index, slot.generation)
        } else {
            let entity = self.reserve();
            self.materialize(entity);
            entity
        }
    }

    pub fn despawn(&mut self, entity: Entity) -> crate::error::Result<()> {
        self.flush();
        let slots = self.slots.get_mut();
        match slots.get_mut(entity.index() as usize) {
            Some(slot) if slot.generation == entity.generation && slot.alive => {
                slot.alive = false;
                slot.generation = NonZeroU32::new(slot.generation.get().wrapping_add(1))
                    .unwrap_or(FIRST_GENERATION);
                self.free.push(entity.index());
                Ok(())
            }
            _ => Err(crate::Error::NoSuchEntity(entity)),
        }
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        let slots = self.slots.borrow();
        slots
            .get(entity.index() as usize)
            .is_some_and(|slot| slot.alive && slot.generation == entity.generation)
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().iter().filter(|v| v.alive).count()
    }

    pub fn slots_ref(&self) -> EntitiesRef<'_> {
        EntitiesRef(self.slots.borrow())
    }
}

/// A shared borrow of the slot table, used to enumerate live entities while
/// systems are running.
pub(crate) struct EntitiesRef<'w>(AtomicRef<'w, Vec<Slot>>);

impl EntitiesRef<'_> {
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.alive)
            .map(|(index, slot)| Entity::from_parts(index as u32, slot.generation))
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.0
            .get(entity.index() as usize)
            .is_some_and(|slot| slot.alive && slot.generation == entity.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_materialize() {
        let mut store = EntityStore::new();
        let a = store.reserve();
        let b = store.reserve();
        assert_ne!(a, b);
        assert!(!store.is_alive(a));

        assert!(store.materialize(a));
        assert!(store.materialize(b));
        assert!(store.is_alive(a));
        assert!(!store.materialize(a));
    }

    #[test]
    fn generations_invalidate_stale_ids() {
        let mut store = EntityStore::new();
        let a = store.spawn();
        store.despawn(a).unwrap();
        assert!(!store.is_alive(a));

        let b = store.spawn();
        assert_eq!(b.index(), a.index());
        assert_ne!(b.generation(), a.generation());
        assert!(store.is_alive(b));
        assert!(!store.is_alive(a));
    }

    #[test]
    fn despawn_dead_fails() {
        let mut store = EntityStore::new();
        let a = store.spawn();
        store.despawn(a).unwrap();
        assert_eq!(store.despawn(a), Err(crate::Error::NoSuchEntity(a)));
    }
}
