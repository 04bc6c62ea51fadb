use core::any::TypeId;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use std::collections::BTreeMap;

use atomic_refcell::{AtomicRef, AtomicRefMut};

use crate::access::QueryAccess;
use crate::entity::EntitiesRef;
use crate::{Component, Entity, World};

type ColumnRead<'w, T> = Option<AtomicRef<'w, BTreeMap<u32, T>>>;
type ColumnWrite<'w, T> = Option<AtomicRefMut<'w, BTreeMap<u32, T>>>;

/// What a query yields per entity: `&T`, `&mut T`, [Entity] or a tuple of
/// those. Mutable elements count as component writes in the system's
/// access manifest.
pub trait QueryData {
    /// The column borrows backing the query
    type State<'w>;
    /// The references yielded per entity
    type Item<'a>;

    fn access(access: &mut QueryAccess);
    fn init<'w>(world: &'w World) -> Self::State<'w>;
    fn matches(state: &Self::State<'_>, entity: Entity) -> bool;
    fn get<'a, 'w>(state: &'a mut Self::State<'w>, entity: Entity) -> Option<Self::Item<'a>>;
}

impl<'q, T: Component> QueryData for &'q T {
    type State<'w> = ColumnRead<'w, T>;
    type Item<'a> = &'a T;

    fn access(access: &mut QueryAccess) {
        access.reads.insert(TypeId::of::<T>());
    }

    fn init<'w>(world: &'w World) -> Self::State<'w> {
        world.components.column::<T>().map(|column| column.borrow())
    }

    fn matches(state: &Self::State<'_>, entity: Entity) -> bool {
        state
            .as_ref()
            .is_some_and(|map| map.contains_key(&entity.index()))
    }

    fn get<'a, 'w>(state: &'a mut Self::State<'w>, entity: Entity) -> Option<&'a T> {
        state.as_ref()?.get(&entity.index())
    }
}

impl<'q, T: Component> QueryData for &'q mut T {
    type State<'w> = ColumnWrite<'w, T>;
    type Item<'a> = &'a mut T;

    fn access(access: &mut QueryAccess) {
        access.writes.insert(TypeId::of::<T>());
    }

    fn init<'w>(world: &'w World) -> Self::State<'w> {
        world
            .components
            .column::<T>()
            .map(|column| column.borrow_mut())
    }

    fn matches(state: &Self::State<'_>, entity: Entity) -> bool {
        state
            .as_ref()
            .is_some_and(|map| map.contains_key(&entity.index()))
    }

    fn get<'a, 'w>(state: &'a mut Self::State<'w>, entity: Entity) -> Option<&'a mut T> {
        state.as_mut()?.get_mut(&entity.index())
    }
}

impl QueryData for Entity {
    type State<'w> = ();
    type Item<'a> = Entity;

    fn access(_: &mut QueryAccess) {}

    fn init<'w>(_: &'w World) -> Self::State<'w> {}

    fn matches(_: &Self::State<'_>, _: Entity) -> bool {
        true
    }

    fn get<'a, 'w>(_: &'a mut Self::State<'w>, entity: Entity) -> Option<Entity> {
        Some(entity)
    }
}

/// Narrows the entities a query matches without borrowing their data.
pub trait QueryFilter {
    type State<'w>;

    fn access(access: &mut QueryAccess);
    fn init<'w>(world: &'w World) -> Self::State<'w>;
    fn matches(state: &Self::State<'_>, entity: Entity) -> bool;
}

/// Matches entities which have a `T` component
pub struct With<T>(PhantomData<T>);

impl<T: Component> QueryFilter for With<T> {
    type State<'w> = ColumnRead<'w, T>;

    fn access(access: &mut QueryAccess) {
        access.reads.insert(TypeId::of::<T>());
    }

    fn init<'w>(world: &'w World) -> Self::State<'w> {
        world.components.column::<T>().map(|column| column.borrow())
    }

    fn matches(state: &Self::State<'_>, entity: Entity) -> bool {
        state
            .as_ref()
            .is_some_and(|map| map.contains_key(&entity.index()))
    }
}

/// Matches entities which lack a `T` component
pub struct Without<T>(PhantomData<T>);

impl<T: Component> QueryFilter for Without<T> {
    type State<'w> = ColumnRead<'w, T>;

    fn access(access: &mut QueryAccess) {
        access.excludes.insert(TypeId::of::<T>());
    }

    fn init<'w>(world: &'w World) -> Self::State<'w> {
        world.components.column::<T>().map(|column| column.borrow())
    }

    fn matches(state: &Self::State<'_>, entity: Entity) -> bool {
        !state
            .as_ref()
            .is_some_and(|map| map.contains_key(&entity.index()))
    }
}

macro_rules! data_impl {
    ($($idx: tt => $ty: ident),*) => {
        impl<$($ty,)*> QueryData for ($($ty,)*)
        where
            $($ty: QueryData,)*
        {
            type State<'w> = ($($ty::State<'w>,)*);
            type Item<'a> = ($($ty::Item<'a>,)*);

            fn access(_access: &mut QueryAccess) {
                $($ty::access(_access);)*
            }

            fn init<'w>(_world: &'w World) -> Self::State<'w> {
                ($($ty::init(_world),)*)
            }

            fn matches(_state: &Self::State<'_>, _entity: Entity) -> bool {
                true $(&& $ty::matches(&_state.$idx, _entity))*
            }

            #[allow(clippy::unused_unit)]
            fn get<'a, 'w>(
                _state: &'a mut Self::State<'w>,
                _entity: Entity,
            ) -> Option<Self::Item<'a>> {
                Some(($($ty::get(&mut _state.$idx, _entity)?,)*))
            }
        }

        impl<$($ty,)*> QueryFilter for ($($ty,)*)
        where
            $($ty: QueryFilter,)*
        {
            type State<'w> = ($($ty::State<'w>,)*);

            fn access(_access: &mut QueryAccess) {
                $($ty::access(_access);)*
            }

            fn init<'w>(_world: &'w World) -> Self::State<'w> {
                ($($ty::init(_world),)*)
            }

            fn matches(_state: &Self::State<'_>, _entity: Entity) -> bool {
                true $(&& $ty::matches(&_state.$idx, _entity))*
            }
        }
    };
}

data_impl! {}
data_impl! { 0 => A }
data_impl! { 0 => A, 1 => B }
data_impl! { 0 => A, 1 => B, 2 => C }
data_impl! { 0 => A, 1 => B, 2 => C, 3 => D }
data_impl! { 0 => A, 1 => B, 2 => C, 3 => D, 4 => E }
data_impl! { 0 => A, 1 => B, 2 => C, 3 => D, 4 => E, 5 => F }
data_impl! { 0 => A, 1 => B, 2 => C, 3 => D, 4 => E, 5 => F, 6 => H }

/// A view over the entities matching `Q` and `F`, bound to the running
/// system's destination world.
///
/// The column borrows are taken when the system's parameters are pulled
/// and held for the duration of the call.
pub struct Query<'w, Q: QueryData, F: QueryFilter = ()> {
    entities: EntitiesRef<'w>,
    state: Q::State<'w>,
    filter: F::State<'w>,
}

impl<'w, Q: QueryData, F: QueryFilter> Query<'w, Q, F> {
    /// Borrow the matching columns of a world directly, outside a system
    pub fn new(world: &'w World) -> Self {
        Self {
            entities: world.entities_ref(),
            state: Q::init(world),
            filter: F::init(world),
        }
    }

    pub(crate) fn query_access(access: &mut QueryAccess) {
        Q::access(access);
        F::access(access);
    }

    /// The ids of all matching entities
    pub fn entities(&self) -> Vec<Entity> {
        self.entities
            .iter()
            .filter(|&entity| F::matches(&self.filter, entity) && Q::matches(&self.state, entity))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entities().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.contains(entity)
            && F::matches(&self.filter, entity)
            && Q::matches(&self.state, entity)
    }

    /// Run `f` for every matching entity
    pub fn for_each(&mut self, mut f: impl FnMut(Q::Item<'_>)) {
        for entity in self.entities() {
            if let Some(item) = Q::get(&mut self.state, entity) {
                f(item);
            }
        }
    }

    /// The item for a specific entity, if it matches the query
    pub fn get(&mut self, entity: Entity) -> Option<Q::Item<'_>> {
        if !self.contains(entity) {
            return None;
        }
        Q::get(&mut self.state, entity)
    }

    /// The first matching item, if any
    pub fn single(&mut self) -> Option<Q::Item<'_>> {
        let entity = self.entities().first().copied()?;
        Q::get(&mut self.state, entity)
    }
}

/// Same as [Query], but bound to the *source* world when the system runs
/// across two sub-applications. This is the read channel for cross-world
/// extraction.
pub struct Extract<'w, Q: QueryData, F: QueryFilter = ()> {
    inner: Query<'w, Q, F>,
}

impl<'w, Q: QueryData, F: QueryFilter> Extract<'w, Q, F> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self {
            inner: Query::new(world),
        }
    }
}

impl<'w, Q: QueryData, F: QueryFilter> Deref for Extract<'w, Q, F> {
    type Target = Query<'w, Q, F>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'w, Q: QueryData, F: QueryFilter> DerefMut for Extract<'w, Q, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
