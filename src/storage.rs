use core::any::{Any, TypeId};
use std::collections::BTreeMap;

use atomic_refcell::{AtomicRef, AtomicRefCell, AtomicRefMut};

use crate::Component;

/// A single component type's values, keyed by entity slot index.
///
/// The map sits behind an [AtomicRefCell] so that queries can borrow
/// columns independently while the world itself is only shared; the
/// scheduler guarantees conflicting borrows never happen concurrently.
pub(crate) struct Column<T> {
    cell: AtomicRefCell<BTreeMap<u32, T>>,
}

impl<T: Component> Column<T> {
    fn new() -> Self {
        Self {
            cell: AtomicRefCell::new(BTreeMap::new()),
        }
    }

    pub fn borrow(&self) -> AtomicRef<'_, BTreeMap<u32, T>> {
        self.cell.borrow()
    }

    pub fn borrow_mut(&self) -> AtomicRefMut<'_, BTreeMap<u32, T>> {
        self.cell.borrow_mut()
    }
}

/// Type erased column operations, for despawn cleanup which must visit
/// every column regardless of type.
pub(crate) trait ErasedColumn: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn remove(&self, index: u32) -> bool;
    fn type_name(&self) -> &'static str;
}

impl<T: Component> ErasedColumn for Column<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn remove(&self, index: u32) -> bool {
        self.cell.borrow_mut().remove(&index).is_some()
    }

    fn type_name(&self) -> &'static str {
        core::any::type_name::<T>()
    }
}

#[derive(Default)]
pub(crate) struct Components {
    columns: BTreeMap<TypeId, Box<dyn ErasedColumn>>,
}

impl Components {
    pub fn column<T: Component>(&self) -> Option<&Column<T>> {
        self.columns.get(&TypeId::of::<T>()).map(|column| {
            column
                .as_any()
                .downcast_ref::<Column<T>>()
                .expect("column type mismatch")
        })
    }

    pub fn column_or_insert<T: Component>(&mut self) -> &Column<T> {
        self.columns
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Column::<T>::new()))
            .as_any()
            .downcast_ref::<Column<T>>()
            .expect("column type mismatch")
    }

    /// Drop every component the entity still holds
    pub fn remove_entity(&self, index: u32) {
        for column in self.columns.values() {
            column.remove(index);
        }
    }
}
