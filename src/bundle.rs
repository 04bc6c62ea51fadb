use core::any::TypeId;

use crate::{Entity, World};

/// Marker for types which can be attached to entities.
///
/// Declared with the [component!](crate::component) macro or implemented
/// directly.
pub trait Component: Send + Sync + 'static {}

#[macro_export]
/// Declarative component registration
///
/// # Usage
/// ```rust
/// struct Position(f32, f32);
/// struct Velocity(f32, f32);
///
/// cadence::component! {
///     Position,
///     Velocity,
/// }
/// ```
macro_rules! component {
    ($($ty:ty),* $(,)?) => {
        $(impl $crate::Component for $ty {})*
    };
}

/// A group of components inserted or removed together.
///
/// Every [Component] is a one-element bundle, tuples of bundles are
/// bundles, and structs whose fields are components can implement the
/// trait to unpack field-wise at spawn time.
pub trait Bundle: Send + Sync + 'static {
    /// Append the component type ids this bundle covers
    fn component_ids(dst: &mut Vec<TypeId>);

    /// Move the bundle's components onto `entity`
    fn insert(self, world: &mut World, entity: Entity);

    /// Remove the bundle's component types from `entity`
    fn remove(world: &mut World, entity: Entity);
}

impl<C: Component> Bundle for C {
    fn component_ids(dst: &mut Vec<TypeId>) {
        dst.push(TypeId::of::<C>());
    }

    fn insert(self, world: &mut World, entity: Entity) {
        world.insert_one(entity, self);
    }

    fn remove(world: &mut World, entity: Entity) {
        world.remove_one::<C>(entity);
    }
}

macro_rules! tuple_impl {
    ($($idx: tt => $ty: ident),*) => {
        impl<$($ty,)*> Bundle for ($($ty,)*)
        where
            $($ty: Bundle,)*
        {
            fn component_ids(_dst: &mut Vec<TypeId>) {
                $($ty::component_ids(_dst);)*
            }

            fn insert(self, _world: &mut World, _entity: Entity) {
                $(self.$idx.insert(_world, _entity);)*
            }

            fn remove(_world: &mut World, _entity: Entity) {
                $($ty::remove(_world, _entity);)*
            }
        }
    };
}

tuple_impl! {}
tuple_impl! { 0 => A }
tuple_impl! { 0 => A, 1 => B }
tuple_impl! { 0 => A, 1 => B, 2 => C }
tuple_impl! { 0 => A, 1 => B, 2 => C, 3 => D }
tuple_impl! { 0 => A, 1 => B, 2 => C, 3 => D, 4 => E }
tuple_impl! { 0 => A, 1 => B, 2 => C, 3 => D, 4 => E, 5 => F }
tuple_impl! { 0 => A, 1 => B, 2 => C, 3 => D, 4 => E, 5 => F, 6 => H }
