/// Label addressing one (stage, sub-stage) slot in a stage graph.
///
/// Unit structs label single-sub-stage stages. A stage with several
/// sub-stages uses an enum whose discriminants map to sub-stage indices:
///
/// ```rust
/// #[derive(Clone, Copy)]
/// enum Simulate {
///     Settle,
///     React,
/// }
///
/// impl cadence::Stage for Simulate {
///     fn index(self) -> usize {
///         self as usize
///     }
/// }
/// ```
pub trait Stage: Copy + Send + Sync + 'static {
    /// The sub-stage this value addresses within its stage type
    fn index(self) -> usize {
        0
    }
}

#[macro_export]
/// Declarative stage label generation
///
/// # Usage
/// ```rust
/// cadence::stages! {
///     pub Warmup,
///     pub Cooldown,
/// }
/// ```
macro_rules! stages {
    ($($(#[$meta:meta])* $vis:vis $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq)]
            $vis struct $name;

            impl $crate::Stage for $name {}
        )*
    };
}

crate::stages! {
    /// First stage of the startup graph
    pub PreStartup,
    /// Main stage of the startup graph
    pub Startup,
    /// Last stage of the startup graph
    pub PostStartup,

    /// First stage of every loop iteration
    pub First,
    /// Runs before [Update]
    pub PreUpdate,
    /// The main per-iteration stage
    pub Update,
    /// Runs after [Update]
    pub PostUpdate,
    /// Last simulation stage of the iteration
    pub Last,

    /// Cross-world extraction towards the render sub-application
    pub Prepare,
    /// Runs before [Render]
    pub PreRender,
    /// The main render stage
    pub Render,
    /// Runs after [Render]
    pub PostRender,

    /// The stage state-scoped conditions attach to
    pub StateTransit,

    /// First stage of the exit graph
    pub PreShutdown,
    /// Main stage of the exit graph
    pub Shutdown,
    /// Last stage of the exit graph
    pub PostShutdown,
}
