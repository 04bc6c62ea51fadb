use atomic_refcell::AtomicRefMut;
use itertools::Itertools;

use crate::{Bundle, Entity, World};

type WorldOp = Box<dyn FnOnce(&mut World) + Send + Sync>;

/// Records deferred world mutations.
///
/// Ops are applied in insertion order when the buffer is drained between
/// sub-stages. Despawns are collected into separate sets and drained last,
/// so a system can keep using an entity it has just marked for despawn.
#[derive(Default)]
pub struct CommandBuffer {
    ops: Vec<WorldOp>,
    despawns: Vec<Entity>,
    recursive_despawns: Vec<Entity>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, op: impl FnOnce(&mut World) + Send + Sync + 'static) {
        self.ops.push(Box::new(op));
    }

    /// Mark an entity for leaf-only despawn
    pub fn despawn(&mut self, entity: Entity) {
        self.despawns.push(entity);
    }

    /// Mark an entity and its whole subtree for despawn
    pub fn despawn_recursive(&mut self, entity: Entity) {
        self.recursive_despawns.push(entity);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.despawns.is_empty() && self.recursive_despawns.is_empty()
    }

    /// Apply all recorded commands to the world and clear the buffer.
    ///
    /// Commands targeting entities that died in the meantime are dropped
    /// with a log line rather than failing the whole batch.
    pub fn apply(&mut self, world: &mut World) {
        for op in self.ops.drain(..) {
            op(world);
        }

        for entity in self.recursive_despawns.drain(..).dedup() {
            if let Err(err) = world.despawn_recursive(entity) {
                tracing::debug!("Skipping recursive despawn: {err}");
            }
        }
        for entity in self.despawns.drain(..).dedup() {
            if let Err(err) = world.despawn(entity) {
                tracing::debug!("Skipping despawn: {err}");
            }
        }
    }

    pub fn clear(&mut self) {
        self.ops.clear();
        self.despawns.clear();
        self.recursive_despawns.clear();
    }
}

/// Records commands against the destination world of the running system.
///
/// Spawned ids are reserved immediately so they can be referenced in the
/// same system; all other effects become visible no later than the next
/// sub-stage, when the pending buffers are applied.
pub struct Commands<'w> {
    queue: AtomicRefMut<'w, Vec<CommandBuffer>>,
    index: usize,
    world: &'w World,
}

impl<'w> Commands<'w> {
    pub(crate) fn new(mut queue: AtomicRefMut<'w, Vec<CommandBuffer>>, world: &'w World) -> Self {
        queue.push(CommandBuffer::new());
        let index = queue.len() - 1;
        Self {
            queue,
            index,
            world,
        }
    }

    fn buffer(&mut self) -> &mut CommandBuffer {
        &mut self.queue[self.index]
    }

    /// Spawn an entity with the given bundle
    pub fn spawn(&mut self, bundle: impl Bundle) -> EntityCommands<'_, 'w> {
        let entity = self.world.entities.reserve();
        self.buffer()
            .push(move |world| world.spawn_at(entity, bundle));
        EntityCommands {
            commands: self,
            entity,
        }
    }

    /// Commands scoped to a single entity
    pub fn entity(&mut self, entity: Entity) -> EntityCommands<'_, 'w> {
        EntityCommands {
            commands: self,
            entity,
        }
    }

    /// Insert a resource unless one of the type already exists
    pub fn insert_resource<T: Send + Sync + 'static>(&mut self, value: T) {
        self.buffer().push(move |world| {
            world.insert_resource(value);
        });
    }

    /// Insert a default-constructed resource unless one already exists
    pub fn init_resource<T: Default + Send + Sync + 'static>(&mut self) {
        self.buffer().push(|world| {
            world.init_resource::<T>();
        });
    }

    pub fn remove_resource<T: Send + Sync + 'static>(&mut self) {
        self.buffer().push(|world| {
            world.remove_resource::<T>();
        });
    }
}

/// Deferred commands for one entity
pub struct EntityCommands<'a, 'w> {
    commands: &'a mut Commands<'w>,
    entity: Entity,
}

impl<'a, 'w> EntityCommands<'a, 'w> {
    /// The id the commands apply to
    pub fn id(&self) -> Entity {
        self.entity
    }

    /// Insert a bundle of components
    pub fn insert(self, bundle: impl Bundle) -> Self {
        let entity = self.entity;
        self.commands.buffer().push(move |world| {
            if let Err(err) = world.insert(entity, bundle) {
                tracing::debug!("Skipping deferred insert: {err}");
            }
        });
        self
    }

    /// Remove a bundle's component types
    pub fn remove<B: Bundle>(self) -> Self {
        let entity = self.entity;
        self.commands.buffer().push(move |world| {
            if let Err(err) = world.remove::<B>(entity) {
                tracing::debug!("Skipping deferred remove: {err}");
            }
        });
        self
    }

    /// Spawn a child of this entity, wiring the parent/child links both ways
    pub fn spawn(&mut self, bundle: impl Bundle) -> EntityCommands<'_, 'w> {
        let parent = self.entity;
        let child = self.commands.world.entities.reserve();
        self.commands.buffer().push(move |world| {
            world.spawn_at(child, bundle);
            if world.contains(parent) && world.contains(child) {
                world.attach_child(parent, child);
            }
        });
        EntityCommands {
            commands: &mut *self.commands,
            entity: child,
        }
    }

    /// Mark the entity for despawn at the end of the sub-stage. Children
    /// are orphaned, not destroyed.
    pub fn despawn(self) {
        self.commands.buffer().despawn(self.entity);
    }

    /// Mark the entity and all its descendants for despawn
    pub fn despawn_recursive(self) {
        self.commands.buffer().despawn_recursive(self.entity);
    }
}
