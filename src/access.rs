use core::any::TypeId;
use std::collections::BTreeSet;

use itertools::Itertools;

/// The component footprint of one query: which types it reads, writes and
/// excludes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryAccess {
    pub reads: BTreeSet<TypeId>,
    pub writes: BTreeSet<TypeId>,
    pub excludes: BTreeSet<TypeId>,
}

impl QueryAccess {
    fn includes(&self) -> impl Iterator<Item = &TypeId> {
        self.reads.iter().chain(self.writes.iter())
    }

    /// Whether one side's exclusion filter makes the matched entity sets
    /// provably disjoint.
    fn disjoint_by_excludes(&self, other: &Self) -> bool {
        self.excludes.iter().any(|ty| other.includes().contains(ty))
            || other.excludes.iter().any(|ty| self.includes().contains(ty))
    }

    /// Whether a component type is written on one side and touched on the
    /// other.
    fn overlapping_write(&self, other: &Self) -> bool {
        self.writes.iter().any(|ty| other.includes().contains(ty))
            || other.writes.iter().any(|ty| self.includes().contains(ty))
    }

    fn conflicts_with(&self, other: &Self) -> bool {
        !self.disjoint_by_excludes(other) && self.overlapping_write(other)
    }
}

/// Everything a system declares to touch, inferred from its parameter
/// list. Two systems whose manifests conflict are never dispatched
/// concurrently.
#[derive(Clone, Debug, Default)]
pub struct AccessManifest {
    /// The system takes a [Commands](crate::Commands) parameter
    pub has_command: bool,
    pub queries: Vec<QueryAccess>,
    pub resources_read: BTreeSet<TypeId>,
    pub resources_write: BTreeSet<TypeId>,
    pub events_read: BTreeSet<TypeId>,
    pub events_write: BTreeSet<TypeId>,
    pub states_read: BTreeSet<TypeId>,
    pub states_write: BTreeSet<TypeId>,
    pub(crate) local_slots: usize,
}

fn write_overlap(
    a_read: &BTreeSet<TypeId>,
    a_write: &BTreeSet<TypeId>,
    b_read: &BTreeSet<TypeId>,
    b_write: &BTreeSet<TypeId>,
) -> bool {
    a_write
        .iter()
        .any(|ty| b_write.contains(ty) || b_read.contains(ty))
        || b_write
            .iter()
            .any(|ty| a_write.contains(ty) || a_read.contains(ty))
}

impl AccessManifest {
    /// Whether the two manifests may not execute concurrently.
    ///
    /// The relation is symmetric and read-only overlap never conflicts.
    pub fn conflicts_with(&self, other: &Self) -> bool {
        // A command parameter can spawn and despawn entities out from
        // under any query, and two command buffers race on the queue.
        if self.has_command && (other.has_command || !other.queries.is_empty()) {
            return true;
        }
        if other.has_command && !self.queries.is_empty() {
            return true;
        }

        if self
            .queries
            .iter()
            .cartesian_product(other.queries.iter())
            .any(|(a, b)| a.conflicts_with(b))
        {
            return true;
        }

        if write_overlap(
            &self.resources_read,
            &self.resources_write,
            &other.resources_read,
            &other.resources_write,
        ) {
            return true;
        }

        if write_overlap(
            &self.events_read,
            &self.events_write,
            &other.events_read,
            &other.events_write,
        ) {
            return true;
        }

        write_overlap(
            &self.states_read,
            &self.states_write,
            &other.states_read,
            &other.states_write,
        )
    }

    /// Fold another manifest into this one. Used to account for run
    /// condition accesses on the owning system node.
    pub fn merge(&mut self, other: &Self) {
        self.has_command |= other.has_command;
        self.queries.extend(other.queries.iter().cloned());
        self.resources_read.extend(&other.resources_read);
        self.resources_write.extend(&other.resources_write);
        self.events_read.extend(&other.events_read);
        self.events_write.extend(&other.events_write);
        self.states_read.extend(&other.states_read);
        self.states_write.extend(&other.states_write);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct A;
    struct B;
    struct C;

    fn ty<T: 'static>() -> TypeId {
        TypeId::of::<T>()
    }

    fn query(
        reads: impl IntoIterator<Item = TypeId>,
        writes: impl IntoIterator<Item = TypeId>,
        excludes: impl IntoIterator<Item = TypeId>,
    ) -> QueryAccess {
        QueryAccess {
            reads: reads.into_iter().collect(),
            writes: writes.into_iter().collect(),
            excludes: excludes.into_iter().collect(),
        }
    }

    fn with_query(q: QueryAccess) -> AccessManifest {
        AccessManifest {
            queries: vec![q],
            ..Default::default()
        }
    }

    #[test]
    fn commands_conflict_with_commands_and_queries() {
        let command = AccessManifest {
            has_command: true,
            ..Default::default()
        };
        let query = with_query(query([ty::<A>()], [], []));
        let resource = AccessManifest {
            resources_write: [ty::<A>()].into(),
            ..Default::default()
        };

        assert!(command.conflicts_with(&command));
        assert!(command.conflicts_with(&query));
        assert!(query.conflicts_with(&command));
        assert!(!command.conflicts_with(&resource));
    }

    #[test]
    fn read_only_queries_never_conflict() {
        let a = with_query(query([ty::<A>(), ty::<B>()], [], []));
        let b = with_query(query([ty::<A>()], [], []));
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn overlapping_write_conflicts_both_ways() {
        let writer = with_query(query([], [ty::<A>()], []));
        let reader = with_query(query([ty::<A>()], [], []));
        assert!(writer.conflicts_with(&reader));
        assert!(reader.conflicts_with(&writer));
        assert!(writer.conflicts_with(&writer));
    }

    #[test]
    fn excludes_disarm_component_conflicts() {
        // One side requires B, the other excludes it: the matched entity
        // sets are disjoint even though A is written.
        let writer = with_query(query([ty::<B>()], [ty::<A>()], []));
        let excluded = with_query(query([], [ty::<A>()], [ty::<B>()]));
        assert!(!writer.conflicts_with(&excluded));
        assert!(!excluded.conflicts_with(&writer));

        let plain = with_query(query([], [ty::<A>()], []));
        assert!(writer.conflicts_with(&plain));
    }

    #[test]
    fn disjoint_includes_never_conflict() {
        let a = with_query(query([], [ty::<A>()], []));
        let b = with_query(query([], [ty::<B>()], []));
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn resource_rules() {
        let read = AccessManifest {
            resources_read: [ty::<A>()].into(),
            ..Default::default()
        };
        let write = AccessManifest {
            resources_write: [ty::<A>()].into(),
            ..Default::default()
        };
        let other_write = AccessManifest {
            resources_write: [ty::<B>()].into(),
            ..Default::default()
        };

        assert!(!read.conflicts_with(&read));
        assert!(read.conflicts_with(&write));
        assert!(write.conflicts_with(&read));
        assert!(write.conflicts_with(&write));
        assert!(!write.conflicts_with(&other_write));
    }

    #[test]
    fn event_rules() {
        let read = AccessManifest {
            events_read: [ty::<A>()].into(),
            ..Default::default()
        };
        let write = AccessManifest {
            events_write: [ty::<A>()].into(),
            ..Default::default()
        };

        assert!(!read.conflicts_with(&read));
        assert!(read.conflicts_with(&write));
        assert!(write.conflicts_with(&write));
    }

    #[test]
    fn state_rules() {
        let read = AccessManifest {
            states_read: [ty::<C>()].into(),
            ..Default::default()
        };
        let write = AccessManifest {
            states_write: [ty::<C>()].into(),
            ..Default::default()
        };

        assert!(!read.conflicts_with(&read));
        assert!(read.conflicts_with(&write));
        assert!(write.conflicts_with(&read));
        assert!(write.conflicts_with(&write));
    }

    #[test]
    fn merge_accumulates() {
        let mut manifest = AccessManifest::default();
        manifest.merge(&AccessManifest {
            states_read: [ty::<A>()].into(),
            ..Default::default()
        });
        manifest.merge(&AccessManifest {
            has_command: true,
            ..Default::default()
        });
        assert!(manifest.has_command);
        assert!(manifest.states_read.contains(&ty::<A>()));
    }
}
