use crate::{Component, Entity, World};

/// Reference to the owning entity in a parent/child tree
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Parent(pub Entity);

/// The child entities of a parent, in spawn order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Children(pub Vec<Entity>);

impl Component for Parent {}
impl Component for Children {}

/// Parent/child upkeep.
///
/// Invariant: an entity has `Parent(p)` iff `p`'s [Children] contains it,
/// and the tree is acyclic.
impl World {
    /// Link `child` under `parent`, setting [Parent] and appending to the
    /// parent's [Children].
    pub fn attach_child(&mut self, parent: Entity, child: Entity) {
        self.insert_one(child, Parent(parent));
        let column = self.components.column_or_insert::<Children>();
        let mut guard = column.borrow_mut();
        let children = guard.entry(parent.index()).or_default();
        if !children.0.contains(&child) {
            children.0.push(child);
        }
    }

    /// Remove `entity` from its parent's child list, if it has a parent
    pub(crate) fn detach_from_parent(&mut self, entity: Entity) {
        let parent = match self.get::<Parent>(entity) {
            Some(parent) => parent.0,
            None => return,
        };
        if let Some(column) = self.components.column::<Children>() {
            if let Some(children) = column.borrow_mut().get_mut(&parent.index()) {
                children.0.retain(|child| *child != entity);
            }
        }
        self.remove_one::<Parent>(entity);
    }

    /// Drop the [Parent] reference of every child of `entity`. The children
    /// stay alive.
    pub(crate) fn orphan_children(&mut self, entity: Entity) {
        let children = match self.get::<Children>(entity) {
            Some(children) => children.0.clone(),
            None => return,
        };
        for child in children {
            self.remove_one::<Parent>(child);
        }
    }

    /// The entity and all its descendants, parents before children
    pub(crate) fn collect_subtree(&self, entity: Entity) -> Vec<Entity> {
        let mut out = Vec::new();
        let mut stack = vec![entity];
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(children) = self.get::<Children>(current) {
                stack.extend(children.0.iter().copied());
            }
        }
        out
    }

    /// The direct children of an entity
    pub fn children(&self, entity: Entity) -> Vec<Entity> {
        self.get::<Children>(entity)
            .map(|children| children.0.clone())
            .unwrap_or_default()
    }

    /// The parent of an entity, if any
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.get::<Parent>(entity).map(|parent| parent.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_links_both_directions() {
        let mut world = World::new();
        let parent = world.spawn(());
        let child = world.spawn(());
        world.attach_child(parent, child);

        assert_eq!(world.parent(child), Some(parent));
        assert_eq!(world.children(parent), [child]);
    }

    #[test]
    fn despawn_orphans_children() {
        let mut world = World::new();
        let parent = world.spawn(());
        let a = world.spawn(());
        let b = world.spawn(());
        world.attach_child(parent, a);
        world.attach_child(parent, b);

        world.despawn(parent).unwrap();
        assert!(world.contains(a));
        assert!(world.contains(b));
        assert_eq!(world.parent(a), None);
        assert_eq!(world.parent(b), None);
    }

    #[test]
    fn despawn_detaches_from_parent() {
        let mut world = World::new();
        let parent = world.spawn(());
        let a = world.spawn(());
        let b = world.spawn(());
        world.attach_child(parent, a);
        world.attach_child(parent, b);

        world.despawn(a).unwrap();
        assert_eq!(world.children(parent), [b]);
    }

    #[test]
    fn despawn_recursive_destroys_subtree() {
        let mut world = World::new();
        let root = world.spawn(());
        let mut all = vec![root];
        for _ in 0..2 {
            let mid = world.spawn(());
            world.attach_child(root, mid);
            all.push(mid);
            for _ in 0..2 {
                let leaf = world.spawn(());
                world.attach_child(mid, leaf);
                all.push(leaf);
            }
        }
        assert_eq!(all.len(), 7);

        world.despawn_recursive(root).unwrap();
        for entity in all {
            assert!(!world.contains(entity));
        }
        assert_eq!(world.entity_count(), 0);
    }
}
