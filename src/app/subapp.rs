use std::sync::Arc;

use atomic_refcell::{AtomicRefCell, AtomicRefMut};

use crate::app::states::{CurrentState, PendingState, States};
use crate::commandbuffer::CommandBuffer;
use crate::World;

type StateAdvance = Box<dyn Fn(&World) + Send + Sync>;

/// A world plus the plumbing systems need around it: the pending command
/// buffers recorded this sub-stage and the state-advance thunks registered
/// for each state type.
pub struct SubApp {
    pub(crate) world: World,
    pub(crate) command_queue: AtomicRefCell<Vec<CommandBuffer>>,
    state_advances: Vec<StateAdvance>,
}

impl Default for SubApp {
    fn default() -> Self {
        Self::new()
    }
}

impl SubApp {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            command_queue: AtomicRefCell::new(Vec::new()),
            state_advances: Vec::new(),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Insert a resource unless one of the type already exists
    pub fn insert_resource<T: Send + Sync + 'static>(&mut self, value: T) {
        self.world.insert_resource(value);
    }

    /// Insert a default-constructed resource unless one already exists
    pub fn init_resource<T: Default + Send + Sync + 'static>(&mut self) {
        self.world.init_resource::<T>();
    }

    pub fn remove_resource<T: 'static>(&mut self) {
        self.world.remove_resource::<T>();
    }

    /// Register the state type `S` with the given initial value.
    ///
    /// Creates both the current and the pending state and schedules the
    /// advance step which copies pending over current once per loop
    /// iteration. Warns and keeps the prior state if `S` is already
    /// registered.
    pub fn insert_state<S: States>(&mut self, initial: S) {
        if self.world.contains_resource::<CurrentState<S>>()
            || self.world.contains_resource::<PendingState<S>>()
        {
            tracing::warn!(
                "State {} already exists, keeping the previous value",
                tynm::type_name::<S>()
            );
            return;
        }
        self.world
            .insert_resource(CurrentState::new(initial.clone()));
        self.world.insert_resource(PendingState::new(initial));
        self.state_advances.push(Box::new(|world: &World| {
            let (Some(mut current), Some(pending)) = (
                world.resource_mut::<CurrentState<S>>(),
                world.resource::<PendingState<S>>(),
            ) else {
                return;
            };
            current.advance(&pending);
        }));
    }

    /// Register the state type `S` with its default value
    pub fn init_state<S: States + Default>(&mut self) {
        self.insert_state(S::default());
    }

    /// Create the event queue for `T`. Idempotent.
    pub fn add_event<T: Send + Sync + 'static>(&mut self) {
        self.world.add_event::<T>();
    }

    /// Age every event queue by one tick
    pub fn tick_events(&mut self) {
        self.world.tick_events();
    }

    /// Apply every command buffer recorded since the last call, in the
    /// order the buffers were handed out.
    pub fn end_commands(&mut self) {
        let mut buffers = std::mem::take(&mut *self.command_queue.borrow_mut());
        for buffer in &mut buffers {
            buffer.apply(&mut self.world);
        }
    }

    /// Run every registered state-advance thunk
    pub fn update_states(&mut self) {
        for advance in &self.state_advances {
            advance(&self.world);
        }
    }

    pub(crate) fn begin_commands(&self) -> AtomicRefMut<'_, Vec<CommandBuffer>> {
        self.command_queue.borrow_mut()
    }
}

/// Handle to a sub-application, shareable with the worker threads running
/// its systems.
pub type SharedSubApp = Arc<AtomicRefCell<SubApp>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    enum Phase {
        #[default]
        Menu,
        Playing,
    }

    #[test]
    fn states_advance_on_update() {
        let mut app = SubApp::new();
        app.init_state::<Phase>();

        app.world
            .resource_mut::<PendingState<Phase>>()
            .unwrap()
            .set(Phase::Playing);
        assert_eq!(
            app.world.resource::<CurrentState<Phase>>().unwrap().get(),
            &Phase::Menu
        );

        app.update_states();
        let current = app.world.resource::<CurrentState<Phase>>().unwrap();
        assert_eq!(current.get(), &Phase::Playing);
        assert!(!current.just_created());
    }

    #[test]
    fn state_double_init_keeps_first() {
        let mut app = SubApp::new();
        app.insert_state(Phase::Playing);
        app.insert_state(Phase::Menu);

        assert_eq!(
            app.world.resource::<CurrentState<Phase>>().unwrap().get(),
            &Phase::Playing
        );
        assert_eq!(app.state_advances.len(), 1);
    }

    #[test]
    fn end_commands_applies_pending_buffers() {
        let mut app = SubApp::new();
        {
            let queue = app.begin_commands();
            let mut commands = crate::Commands::new(queue, &app.world);
            commands.spawn(());
            commands.insert_resource(7u32);
        }
        assert_eq!(app.world.entity_count(), 0);

        app.end_commands();
        assert_eq!(app.world.entity_count(), 1);
        assert_eq!(*app.world.resource::<u32>().unwrap(), 7);
    }
}
