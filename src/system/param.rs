use core::any::TypeId;
use core::ops::{Deref, DerefMut};

use atomic_refcell::AtomicRefMut;

use crate::access::AccessManifest;
use crate::app::states::{CurrentState, PendingState, NextState, State, States};
use crate::query::{Extract, Query, QueryData, QueryFilter};
use crate::system::SystemCtx;
use crate::{Commands, EventReader, EventWriter, Res, ResMut};

/// A parameter shape recognized in system signatures.
///
/// Each implementation contributes its footprint to the access manifest
/// and knows how to materialize itself from the (source, destination)
/// sub-application pair at call time.
pub trait SystemParam: Sized {
    /// The parameter as bound to a concrete world borrow
    type Item<'w>;

    /// Record what the parameter touches
    fn access(manifest: &mut AccessManifest);

    /// Pull the parameter out of the running system's context
    fn fetch<'w>(ctx: &SystemCtx<'w>) -> Self::Item<'w>;
}

impl SystemParam for Commands<'_> {
    type Item<'w> = Commands<'w>;

    fn access(manifest: &mut AccessManifest) {
        manifest.has_command = true;
    }

    fn fetch<'w>(ctx: &SystemCtx<'w>) -> Self::Item<'w> {
        Commands::new(ctx.dst.begin_commands(), &ctx.dst.world)
    }
}

impl<T: Send + Sync + 'static> SystemParam for Res<'_, T> {
    type Item<'w> = Res<'w, T>;

    fn access(manifest: &mut AccessManifest) {
        manifest.resources_read.insert(TypeId::of::<T>());
    }

    fn fetch<'w>(ctx: &SystemCtx<'w>) -> Self::Item<'w> {
        Res {
            value: ctx.dst.world.resource::<T>(),
        }
    }
}

impl<T: Send + Sync + 'static> SystemParam for ResMut<'_, T> {
    type Item<'w> = ResMut<'w, T>;

    fn access(manifest: &mut AccessManifest) {
        manifest.resources_write.insert(TypeId::of::<T>());
    }

    fn fetch<'w>(ctx: &SystemCtx<'w>) -> Self::Item<'w> {
        ResMut {
            value: ctx.dst.world.resource_mut::<T>(),
        }
    }
}

impl<Q, F> SystemParam for Query<'_, Q, F>
where
    Q: QueryData + 'static,
    F: QueryFilter + 'static,
{
    type Item<'w> = Query<'w, Q, F>;

    fn access(manifest: &mut AccessManifest) {
        let mut query = Default::default();
        Self::query_access(&mut query);
        manifest.queries.push(query);
    }

    fn fetch<'w>(ctx: &SystemCtx<'w>) -> Self::Item<'w> {
        Query::new(&ctx.dst.world)
    }
}

impl<Q, F> SystemParam for Extract<'_, Q, F>
where
    Q: QueryData + 'static,
    F: QueryFilter + 'static,
{
    type Item<'w> = Extract<'w, Q, F>;

    fn access(manifest: &mut AccessManifest) {
        let mut query = Default::default();
        Query::<Q, F>::query_access(&mut query);
        manifest.queries.push(query);
    }

    fn fetch<'w>(ctx: &SystemCtx<'w>) -> Self::Item<'w> {
        Extract::new(&ctx.src.world)
    }
}

impl<T: Send + Sync + 'static> SystemParam for EventReader<'_, T> {
    type Item<'w> = EventReader<'w, T>;

    fn access(manifest: &mut AccessManifest) {
        manifest.events_read.insert(TypeId::of::<T>());
    }

    fn fetch<'w>(ctx: &SystemCtx<'w>) -> Self::Item<'w> {
        EventReader {
            events: ctx.src.world.events::<T>(),
        }
    }
}

impl<T: Send + Sync + 'static> SystemParam for EventWriter<'_, T> {
    type Item<'w> = EventWriter<'w, T>;

    fn access(manifest: &mut AccessManifest) {
        manifest.events_write.insert(TypeId::of::<T>());
    }

    fn fetch<'w>(ctx: &SystemCtx<'w>) -> Self::Item<'w> {
        EventWriter {
            events: ctx.dst.world.events_mut::<T>(),
        }
    }
}

impl<S: States> SystemParam for State<'_, S> {
    type Item<'w> = State<'w, S>;

    fn access(manifest: &mut AccessManifest) {
        manifest.states_read.insert(TypeId::of::<S>());
    }

    fn fetch<'w>(ctx: &SystemCtx<'w>) -> Self::Item<'w> {
        State {
            value: ctx.dst.world.resource::<CurrentState<S>>(),
        }
    }
}

impl<S: States> SystemParam for NextState<'_, S> {
    type Item<'w> = NextState<'w, S>;

    fn access(manifest: &mut AccessManifest) {
        manifest.states_write.insert(TypeId::of::<S>());
    }

    fn fetch<'w>(ctx: &SystemCtx<'w>) -> Self::Item<'w> {
        NextState {
            value: ctx.dst.world.resource_mut::<PendingState<S>>(),
        }
    }
}

/// A value private to one system, default-constructed on first call and
/// persisted in the descriptor between calls. Contributes no access.
pub struct Local<'w, T: Default + Send + Sync + 'static> {
    value: AtomicRefMut<'w, T>,
}

impl<T: Default + Send + Sync + 'static> Deref for Local<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Default + Send + Sync + 'static> DerefMut for Local<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Default + Send + Sync + 'static> SystemParam for Local<'_, T> {
    type Item<'w> = Local<'w, T>;

    fn access(manifest: &mut AccessManifest) {
        manifest.local_slots += 1;
    }

    fn fetch<'w>(ctx: &SystemCtx<'w>) -> Self::Item<'w> {
        Local {
            value: ctx.next_local::<T>(),
        }
    }
}
