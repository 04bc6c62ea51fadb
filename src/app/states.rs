use core::any::TypeId;

use atomic_refcell::{AtomicRef, AtomicRefMut};

use crate::access::AccessManifest;
use crate::system::{ConditionDescriptor, LocalStore};

/// Values usable as application states: plain data compared by equality.
pub trait States: Clone + PartialEq + Send + Sync + 'static {}

impl<T: Clone + PartialEq + Send + Sync + 'static> States for T {}

/// Resource payload for the current value of a state type
pub(crate) struct CurrentState<S> {
    pub(crate) value: S,
    pub(crate) just_created: bool,
}

impl<S: States> CurrentState<S> {
    pub fn new(value: S) -> Self {
        Self {
            value,
            just_created: true,
        }
    }

    pub fn get(&self) -> &S {
        &self.value
    }

    pub fn just_created(&self) -> bool {
        self.just_created
    }

    pub fn advance(&mut self, pending: &PendingState<S>) {
        self.value = pending.value.clone();
        self.just_created = false;
    }
}

/// Resource payload for the pending value of a state type
pub(crate) struct PendingState<S> {
    pub(crate) value: S,
}

impl<S: States> PendingState<S> {
    pub fn new(value: S) -> Self {
        Self { value }
    }

    pub fn get(&self) -> &S {
        &self.value
    }

    pub fn set(&mut self, value: S) {
        self.value = value;
    }
}

/// Read access to the current value of the state type `S`.
///
/// Empty when the state was never registered.
pub struct State<'w, S: States> {
    pub(crate) value: Option<AtomicRef<'w, CurrentState<S>>>,
}

impl<'w, S: States> State<'w, S> {
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn get(&self) -> Option<&S> {
        self.value.as_ref().map(|v| v.get())
    }

    pub fn is_state(&self, state: &S) -> bool {
        self.get() == Some(state)
    }

    /// Whether the state was registered this iteration and has not
    /// advanced yet
    pub fn is_just_created(&self) -> bool {
        self.value.as_ref().is_some_and(|v| v.just_created())
    }
}

/// Write access to the pending value of the state type `S`. The pending
/// value becomes current when states advance at the end of the loop
/// iteration.
pub struct NextState<'w, S: States> {
    pub(crate) value: Option<AtomicRefMut<'w, PendingState<S>>>,
}

impl<'w, S: States> NextState<'w, S> {
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn get(&self) -> Option<&S> {
        self.value.as_ref().map(|v| v.get())
    }

    pub fn is_state(&self, state: &S) -> bool {
        self.get() == Some(state)
    }

    /// Queue a state change for the next advance
    pub fn set(&mut self, state: S) {
        match &mut self.value {
            Some(pending) => pending.set(state),
            None => tracing::warn!(
                "Ignoring state change: {} was never registered",
                tynm::type_name::<S>()
            ),
        }
    }
}

fn state_condition<S: States>(
    label: &str,
    f: impl Fn(&CurrentState<S>, &PendingState<S>) -> bool + Send + Sync + 'static,
) -> ConditionDescriptor {
    let mut access = AccessManifest::default();
    access.states_read.insert(TypeId::of::<S>());

    ConditionDescriptor::from_parts(
        format!("{label}<{}>", tynm::type_name::<S>()),
        access,
        LocalStore::with_slots(0),
        Box::new(move |ctx| {
            let world = &ctx.dst.world;
            match (
                world.resource::<CurrentState<S>>(),
                world.resource::<PendingState<S>>(),
            ) {
                (Some(current), Some(pending)) => f(&current, &pending),
                _ => false,
            }
        }),
    )
}

/// True on the iteration the state becomes `target`, including the very
/// first iteration when `target` is the initial value.
pub(crate) fn on_enter<S: States>(target: S) -> ConditionDescriptor {
    state_condition("on_enter", move |current: &CurrentState<S>, pending| {
        (current.value == target && current.just_created)
            || (pending.value == target && current.value != target)
    })
}

/// True on the iteration the state stops being `target`
pub(crate) fn on_exit<S: States>(target: S) -> ConditionDescriptor {
    state_condition("on_exit", move |current: &CurrentState<S>, pending| {
        current.value == target && pending.value != target
    })
}

/// True whenever current and pending differ
pub(crate) fn on_change<S: States>() -> ConditionDescriptor {
    state_condition("on_change", |current: &CurrentState<S>, pending| {
        current.value != pending.value
    })
}

/// True while the current state equals `target`
pub(crate) fn in_state<S: States>(target: S) -> ConditionDescriptor {
    state_condition("in_state", move |current: &CurrentState<S>, _| {
        current.value == target
    })
}
