mod func;
mod param;

use core::any::{Any, TypeId};
use core::cell::Cell;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use atomic_refcell::{AtomicRefCell, AtomicRefMut};

use crate::access::AccessManifest;
use crate::app::SubApp;

pub use func::{IntoCondition, IntoSystemDescriptor};
pub use param::{Local, SystemParam};

/// Identity of a system: the type id of its originating function item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemId(TypeId);

impl SystemId {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(TypeId::of::<T>())
    }
}

/// Per-system storage backing [Local](crate::Local) parameters, one slot
/// per parameter position, initialized on first use.
pub(crate) struct LocalStore {
    slots: Vec<AtomicRefCell<Option<Box<dyn Any + Send + Sync>>>>,
}

impl LocalStore {
    pub fn with_slots(count: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(count, || AtomicRefCell::new(None));
        Self { slots }
    }

    pub fn borrow<T: Default + Send + Sync + 'static>(&self, slot: usize) -> AtomicRefMut<'_, T> {
        let mut guard = self.slots[slot].borrow_mut();
        if guard.is_none() {
            *guard = Some(Box::new(T::default()));
        }
        AtomicRefMut::map(guard, |v| {
            v.as_mut()
                .expect("slot initialized above")
                .downcast_mut::<T>()
                .expect("local slot type mismatch")
        })
    }
}

/// The sub-applications a system call binds against. Extraction-shaped
/// parameters pull from `src`, everything else from `dst`.
pub struct SystemCtx<'w> {
    pub(crate) src: &'w SubApp,
    pub(crate) dst: &'w SubApp,
    locals: &'w LocalStore,
    cursor: Cell<usize>,
}

impl<'w> SystemCtx<'w> {
    pub(crate) fn new(src: &'w SubApp, dst: &'w SubApp, locals: &'w LocalStore) -> Self {
        Self {
            src,
            dst,
            locals,
            cursor: Cell::new(0),
        }
    }

    pub(crate) fn next_local<T: Default + Send + Sync + 'static>(&self) -> AtomicRefMut<'w, T> {
        let slot = self.cursor.get();
        self.cursor.set(slot + 1);
        self.locals.borrow(slot)
    }
}

type SystemFn = Box<dyn Fn(&SystemCtx<'_>) + Send + Sync>;
type ConditionFn = Box<dyn Fn(&SystemCtx<'_>) -> bool + Send + Sync>;

/// A registered system: the invocation thunk for a plain function together
/// with the access manifest inferred from its parameter list and a moving
/// average of its runtime.
pub struct SystemDescriptor {
    name: String,
    id: SystemId,
    access: AccessManifest,
    locals: LocalStore,
    func: SystemFn,
    /// f64 bits, milliseconds
    avg_time: AtomicU64,
}

impl SystemDescriptor {
    pub(crate) fn from_parts(
        name: String,
        id: SystemId,
        access: AccessManifest,
        locals: LocalStore,
        func: SystemFn,
    ) -> Self {
        Self {
            name,
            id,
            access,
            locals,
            func,
            avg_time: AtomicU64::new(1.0f64.to_bits()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> SystemId {
        self.id
    }

    pub fn access(&self) -> &AccessManifest {
        &self.access
    }

    /// Moving average runtime in milliseconds, seeded at one
    pub fn avg_time(&self) -> f64 {
        f64::from_bits(self.avg_time.load(Ordering::Relaxed))
    }

    pub(crate) fn run(&self, src: &SubApp, dst: &SubApp) {
        let _span = tracing::trace_span!("system", name = %self.name).entered();
        let start = Instant::now();

        let ctx = SystemCtx::new(src, dst, &self.locals);
        (self.func)(&ctx);

        let sample = start.elapsed().as_secs_f64() * 1e3;
        let avg = self.avg_time();
        self.avg_time
            .store((avg * 0.9 + sample * 0.1).to_bits(), Ordering::Relaxed);
    }
}

impl fmt::Debug for SystemDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemDescriptor")
            .field("name", &self.name)
            .field("access", &self.access)
            .finish()
    }
}

/// A run-if guard: evaluated in the same calling convention as a system,
/// with its own access manifest.
pub struct ConditionDescriptor {
    name: String,
    access: AccessManifest,
    locals: LocalStore,
    func: ConditionFn,
}

impl ConditionDescriptor {
    pub(crate) fn from_parts(
        name: String,
        access: AccessManifest,
        locals: LocalStore,
        func: ConditionFn,
    ) -> Self {
        Self {
            name,
            access,
            locals,
            func,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access(&self) -> &AccessManifest {
        &self.access
    }

    pub(crate) fn run(&self, src: &SubApp, dst: &SubApp) -> bool {
        let ctx = SystemCtx::new(src, dst, &self.locals);
        (self.func)(&ctx)
    }
}

impl fmt::Debug for ConditionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionDescriptor")
            .field("name", &self.name)
            .finish()
    }
}
