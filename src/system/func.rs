use crate::access::AccessManifest;
use crate::system::{
    ConditionDescriptor, LocalStore, SystemCtx, SystemDescriptor, SystemId, SystemParam,
};

/// Conversion of plain functions into registered systems.
///
/// Implemented for every function whose parameters are all
/// [SystemParam] shapes. The `Marker` parameter disambiguates the
/// per-arity blanket impls and is inferred at the registration site.
pub trait IntoSystemDescriptor<Marker>: Send + Sync + 'static {
    /// The identity other systems use in `before`/`after` declarations
    fn id(&self) -> SystemId {
        SystemId::of::<Self>()
    }

    fn into_descriptor(self) -> SystemDescriptor;
}

/// Conversion of `bool`-returning functions into run conditions.
pub trait IntoCondition<Marker>: Send + Sync + 'static {
    fn into_condition(self) -> ConditionDescriptor;
}

macro_rules! impl_system_function {
    ($($param: ident),*) => {
        #[allow(non_snake_case)]
        impl<Func, $($param,)*> IntoSystemDescriptor<fn($($param,)*)> for Func
        where
            Func: Send + Sync + 'static,
            for<'w> &'w Func: Fn($($param),*) + Fn($(<$param as SystemParam>::Item<'w>),*),
            $($param: SystemParam + 'static,)*
        {
            fn into_descriptor(self) -> SystemDescriptor {
                let mut access = AccessManifest::default();
                $(<$param as SystemParam>::access(&mut access);)*
                let locals = LocalStore::with_slots(access.local_slots);

                let func = move |_ctx: &SystemCtx<'_>| {
                    fn call_inner<$($param),*>(f: impl Fn($($param),*), $($param: $param),*) {
                        f($($param),*)
                    }
                    $(let $param = <$param as SystemParam>::fetch(_ctx);)*
                    call_inner(&self, $($param),*)
                };

                SystemDescriptor::from_parts(
                    tynm::type_name::<Func>(),
                    SystemId::of::<Func>(),
                    access,
                    locals,
                    Box::new(func),
                )
            }
        }

        #[allow(non_snake_case)]
        impl<Func, $($param,)*> IntoCondition<fn($($param,)*) -> bool> for Func
        where
            Func: Send + Sync + 'static,
            for<'w> &'w Func:
                Fn($($param),*) -> bool + Fn($(<$param as SystemParam>::Item<'w>),*) -> bool,
            $($param: SystemParam + 'static,)*
        {
            fn into_condition(self) -> ConditionDescriptor {
                let mut access = AccessManifest::default();
                $(<$param as SystemParam>::access(&mut access);)*
                let locals = LocalStore::with_slots(access.local_slots);

                let func = move |_ctx: &SystemCtx<'_>| -> bool {
                    fn call_inner<$($param),*>(
                        f: impl Fn($($param),*) -> bool,
                        $($param: $param),*
                    ) -> bool {
                        f($($param),*)
                    }
                    $(let $param = <$param as SystemParam>::fetch(_ctx);)*
                    call_inner(&self, $($param),*)
                };

                ConditionDescriptor::from_parts(
                    tynm::type_name::<Func>(),
                    access,
                    locals,
                    Box::new(func),
                )
            }
        }
    };
}

impl_system_function! {}
impl_system_function! { A }
impl_system_function! { A, B }
impl_system_function! { A, B, C }
impl_system_function! { A, B, C, D }
impl_system_function! { A, B, C, D, E }
impl_system_function! { A, B, C, D, E, F }
impl_system_function! { A, B, C, D, E, F, H }
impl_system_function! { A, B, C, D, E, F, H, I }
