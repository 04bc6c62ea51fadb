use core::any::TypeId;
use std::collections::BTreeMap;

/// Label for a group of systems ordered as a block.
///
/// Multi-valued labels are usually enums:
///
/// ```rust
/// #[derive(Clone, Copy)]
/// enum SimSet {
///     Input,
///     Physics,
///     Cleanup,
/// }
///
/// impl cadence::SystemSet for SimSet {
///     fn index(self) -> usize {
///         self as usize
///     }
/// }
/// ```
pub trait SystemSet: Copy + Send + Sync + 'static {
    /// Discriminates the values of one set type
    fn index(self) -> usize {
        0
    }
}

/// A set value a system can be member of
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct SetId {
    pub ty: TypeId,
    pub value: usize,
}

impl SetId {
    pub fn of<S: SystemSet>(set: S) -> Self {
        Self {
            ty: TypeId::of::<S>(),
            value: set.index(),
        }
    }
}

/// Configured execution order of each set type's values. Systems in an
/// earlier value run before systems in a later one.
pub(crate) type SetMap = BTreeMap<TypeId, Vec<usize>>;
