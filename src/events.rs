use core::any::{Any, TypeId};
use std::collections::{BTreeMap, VecDeque};

use atomic_refcell::{AtomicRef, AtomicRefCell, AtomicRefMut};

/// A queue of typed events with a two-tick lifetime.
///
/// An event is visible on the tick it was sent and on the following tick,
/// after which [tick](Events::tick) evicts it. Readers observe every live
/// event; there are no per-reader cursors.
pub struct Events<T> {
    entries: VecDeque<(T, u8)>,
}

impl<T> Default for Events<T> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<T> Events<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event with age zero
    pub fn send(&mut self, event: T) {
        self.entries.push_back((event, 0));
    }

    /// Evict entries which have already been visible for two ticks and age
    /// the remainder.
    pub fn tick(&mut self) {
        while let Some((_, age)) = self.entries.front() {
            if *age >= 1 {
                self.entries.pop_front();
            } else {
                break;
            }
        }

        for (_, age) in &mut self.entries {
            *age += 1;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(event, _)| event)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear()
    }
}

trait ErasedEvents: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn tick(&self);
}

struct EventChannel<T> {
    cell: AtomicRefCell<Events<T>>,
}

impl<T: Send + Sync + 'static> ErasedEvents for EventChannel<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn tick(&self) {
        self.cell.borrow_mut().tick();
    }
}

#[derive(Default)]
pub(crate) struct EventRegistry {
    channels: BTreeMap<TypeId, Box<dyn ErasedEvents>>,
}

impl EventRegistry {
    /// Create the queue for `T`. Idempotent.
    pub fn register<T: Send + Sync + 'static>(&mut self) {
        self.channels.entry(TypeId::of::<T>()).or_insert_with(|| {
            Box::new(EventChannel::<T> {
                cell: AtomicRefCell::new(Events::new()),
            })
        });
    }

    pub fn borrow<T: Send + Sync + 'static>(&self) -> Option<AtomicRef<'_, Events<T>>> {
        let channel = self.channels.get(&TypeId::of::<T>())?;
        let channel = channel
            .as_any()
            .downcast_ref::<EventChannel<T>>()
            .expect("event channel type mismatch");
        Some(channel.cell.borrow())
    }

    pub fn borrow_mut<T: Send + Sync + 'static>(&self) -> Option<AtomicRefMut<'_, Events<T>>> {
        let channel = self.channels.get(&TypeId::of::<T>())?;
        let channel = channel
            .as_any()
            .downcast_ref::<EventChannel<T>>()
            .expect("event channel type mismatch");
        Some(channel.cell.borrow_mut())
    }

    pub fn tick_all(&self) {
        for channel in self.channels.values() {
            channel.tick();
        }
    }
}

/// Reads the live entries of an event queue.
///
/// Binds to the *source* world when the system runs across two
/// sub-applications.
pub struct EventReader<'w, T> {
    pub(crate) events: Option<AtomicRef<'w, Events<T>>>,
}

impl<'w, T> EventReader<'w, T> {
    /// Iterate all currently live events, oldest first
    pub fn read(&self) -> impl Iterator<Item = &T> {
        self.events.iter().flat_map(|events| events.iter())
    }

    pub fn len(&self) -> usize {
        self.events.as_ref().map_or(0, |events| events.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Appends events to an event queue.
pub struct EventWriter<'w, T> {
    pub(crate) events: Option<AtomicRefMut<'w, Events<T>>>,
}

impl<'w, T> EventWriter<'w, T> {
    pub fn send(&mut self, event: T) {
        match &mut self.events {
            Some(events) => events.send(event),
            None => tracing::warn!(
                "Dropping event {}: no queue registered, call `add_event` first",
                tynm::type_name::<T>()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_tick_window() {
        let mut events = Events::new();
        events.send("a");
        assert_eq!(events.iter().count(), 1);

        events.tick();
        assert_eq!(events.iter().count(), 1);

        events.tick();
        assert_eq!(events.iter().count(), 0);
    }

    #[test]
    fn overlapping_windows() {
        let mut events = Events::new();
        events.send(1);
        events.tick();
        events.send(2);
        assert_eq!(events.iter().copied().collect::<Vec<_>>(), [1, 2]);

        events.tick();
        assert_eq!(events.iter().copied().collect::<Vec<_>>(), [2]);

        events.tick();
        assert!(events.is_empty());
    }

    #[test]
    fn registry_ticks_every_channel() {
        let mut registry = EventRegistry::default();
        registry.register::<i32>();
        registry.register::<i32>();
        registry.register::<&'static str>();

        registry.borrow_mut::<i32>().unwrap().send(5);
        registry.borrow_mut::<&'static str>().unwrap().send("x");
        registry.tick_all();
        registry.tick_all();

        assert!(registry.borrow::<i32>().unwrap().is_empty());
        assert!(registry.borrow::<&'static str>().unwrap().is_empty());
    }
}
