use core::any::{Any, TypeId};
use core::fmt;
use core::ops::{Deref, DerefMut};
use std::collections::BTreeMap;

use atomic_refcell::{AtomicRef, AtomicRefCell, AtomicRefMut};

struct ResourceCell {
    value: AtomicRefCell<Box<dyn Any + Send + Sync>>,
    name: &'static str,
}

/// Singleton values keyed by type identity.
///
/// Insertion is first-wins and removal is idempotent, so plugins may
/// blindly initialize the resources they depend on.
#[derive(Default)]
pub(crate) struct Resources {
    cells: BTreeMap<TypeId, ResourceCell>,
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.cells.values().map(|cell| cell.name))
            .finish()
    }
}

impl Resources {
    /// Insert a resource unless one of the type already exists.
    /// Returns whether the value was inserted.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> bool {
        match self.cells.entry(TypeId::of::<T>()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(ResourceCell {
                    value: AtomicRefCell::new(Box::new(value)),
                    name: core::any::type_name::<T>(),
                });
                true
            }
        }
    }

    pub fn init<T: Default + Send + Sync + 'static>(&mut self) -> bool {
        if self.contains::<T>() {
            return false;
        }
        self.insert(T::default())
    }

    pub fn remove<T: 'static>(&mut self) -> bool {
        self.cells.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.cells.contains_key(&TypeId::of::<T>())
    }

    pub fn borrow<T: 'static>(&self) -> Option<AtomicRef<'_, T>> {
        let cell = self.cells.get(&TypeId::of::<T>())?;
        let guard = cell.value.borrow();
        Some(AtomicRef::map(guard, |v| {
            v.downcast_ref::<T>().expect("resource type mismatch")
        }))
    }

    pub fn borrow_mut<T: 'static>(&self) -> Option<AtomicRefMut<'_, T>> {
        let cell = self.cells.get(&TypeId::of::<T>())?;
        let guard = cell.value.borrow_mut();
        Some(AtomicRefMut::map(guard, |v| {
            v.downcast_mut::<T>().expect("resource type mismatch")
        }))
    }
}

/// Shared borrow of a resource, or empty when the resource is absent.
pub struct Res<'w, T> {
    pub(crate) value: Option<AtomicRef<'w, T>>,
}

impl<'w, T> Res<'w, T> {
    /// Whether the resource exists in the world
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_deref()
    }
}

impl<T> Deref for Res<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
            .as_deref()
            .unwrap_or_else(|| missing_resource::<T>())
    }
}

impl<T: fmt::Debug> fmt::Debug for Res<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Res").field(&self.get()).finish()
    }
}

/// Unique borrow of a resource, or empty when the resource is absent.
pub struct ResMut<'w, T> {
    pub(crate) value: Option<AtomicRefMut<'w, T>>,
}

impl<'w, T> ResMut<'w, T> {
    /// Whether the resource exists in the world
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_deref()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.value.as_deref_mut()
    }
}

impl<T> Deref for ResMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
            .as_deref()
            .unwrap_or_else(|| missing_resource::<T>())
    }
}

impl<T> DerefMut for ResMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.value.as_deref_mut() {
            Some(v) => v,
            None => missing_resource::<T>(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ResMut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResMut").field(&self.get()).finish()
    }
}

fn missing_resource<T>() -> ! {
    panic!(
        "Resource {} does not exist, check `has_value` before dereferencing",
        tynm::type_name::<T>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_first_wins() {
        let mut resources = Resources::default();
        assert!(resources.insert(42i32));
        assert!(!resources.insert(7i32));
        assert_eq!(*resources.borrow::<i32>().unwrap(), 42);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut resources = Resources::default();
        resources.insert("hello".to_string());
        assert!(resources.remove::<String>());
        assert!(!resources.remove::<String>());
        assert!(resources.borrow::<String>().is_none());
    }

    #[test]
    fn borrow_mut_mutates_in_place() {
        let mut resources = Resources::default();
        resources.insert(1u64);
        *resources.borrow_mut::<u64>().unwrap() += 1;
        assert_eq!(*resources.borrow::<u64>().unwrap(), 2);
    }
}
