mod stages;
pub(crate) mod states;
mod subapp;

use core::any::TypeId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Context;
use atomic_refcell::{AtomicRef, AtomicRefCell, AtomicRefMut};
use tracing::Level;

use crate::schedule::{GraphKind, Runner, SetId, StageNode, StageRunner, SystemSet};
use crate::system::{IntoCondition, IntoSystemDescriptor};
use crate::Error;

pub use stages::{
    First, Last, PostRender, PostShutdown, PostStartup, PostUpdate, PreRender, PreShutdown,
    PreStartup, PreUpdate, Prepare, Render, Shutdown, Stage, Startup, StateTransit, Update,
};
pub use states::{NextState, State, States};
pub use subapp::{SharedSubApp, SubApp};

/// Marker naming a sub-application.
pub trait AppLabel: 'static {}

/// The simulation world, destination of the plain loop stages
pub struct MainApp;
impl AppLabel for MainApp {}

/// The render world, destination of the render stages
pub struct RenderApp;
impl AppLabel for RenderApp {}

/// The built-in exit signal: write one to terminate the main loop at the
/// end of the current iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AppExit;

/// A reusable bundle of registrations. Plugins are registered once per
/// type and built when the app runs; registration is permanent.
pub trait Plugin: 'static {
    fn build(&self, app: &mut App);
}

/// The registered sub-applications, shared with the stage tasks.
#[derive(Default)]
pub(crate) struct SubApps {
    entries: BTreeMap<TypeId, SharedSubApp>,
}

impl SubApps {
    fn insert<A: AppLabel>(&mut self) {
        self.entries
            .entry(TypeId::of::<A>())
            .or_insert_with(|| Arc::new(AtomicRefCell::new(SubApp::new())));
    }

    pub fn get(&self, label: TypeId) -> Option<&SharedSubApp> {
        self.entries.get(&label)
    }

    pub fn contains(&self, label: TypeId) -> bool {
        self.entries.contains_key(&label)
    }

    pub fn tick_events(&self) {
        for cell in self.entries.values() {
            cell.borrow_mut().tick_events();
        }
    }

    pub fn end_commands(&self) {
        for cell in self.entries.values() {
            cell.borrow_mut().end_commands();
        }
    }

    pub fn update_states(&self) {
        for cell in self.entries.values() {
            cell.borrow_mut().update_states();
        }
    }
}

/// The application: a runner, its sub-applications and the plugin
/// registry, behind the system-addition builder surface.
///
/// `run` executes the startup graph, then iterates
/// { loop graph, state-transition graph, event/command/state bookkeeping }
/// until an [AppExit] event is observed or looping is disabled, and
/// finishes with the exit graph.
pub struct App {
    sub_apps: SubApps,
    runner: Runner,
    pending_plugins: Vec<Box<dyn Plugin>>,
    plugins: Vec<Box<dyn Plugin>>,
    plugin_ids: BTreeSet<TypeId>,
    loop_enabled: bool,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// An app with the default sub-applications, stage layout and worker
    /// pools.
    pub fn new() -> Self {
        let mut app = Self {
            sub_apps: SubApps::default(),
            runner: Runner::new(),
            pending_plugins: Vec::new(),
            plugins: Vec::new(),
            plugin_ids: BTreeSet::new(),
            loop_enabled: false,
        };

        app.add_sub_app::<MainApp>();
        app.add_sub_app::<RenderApp>();

        app.add_startup_stage::<MainApp, MainApp, _>([PreStartup]);
        app.add_startup_stage::<MainApp, MainApp, _>([Startup]).after(PreStartup);
        app.add_startup_stage::<MainApp, MainApp, _>([PostStartup]).after(Startup);

        app.add_loop_stage::<MainApp, MainApp, _>([First]);
        app.add_loop_stage::<MainApp, MainApp, _>([PreUpdate]).after(First);
        app.add_loop_stage::<MainApp, MainApp, _>([Update]).after(PreUpdate);
        app.add_loop_stage::<MainApp, MainApp, _>([PostUpdate]).after(Update);
        app.add_loop_stage::<MainApp, MainApp, _>([Last]).after(PostUpdate);

        app.add_loop_stage::<MainApp, RenderApp, _>([Prepare]).after(Last);
        app.add_loop_stage::<MainApp, RenderApp, _>([PreRender]).after(Prepare);
        app.add_loop_stage::<MainApp, RenderApp, _>([Render]).after(PreRender);
        app.add_loop_stage::<MainApp, RenderApp, _>([PostRender]).after(Render);

        app.add_state_transition_stage::<MainApp, MainApp, _>([StateTransit]);

        app.add_exit_stage::<MainApp, MainApp, _>([PreShutdown]);
        app.add_exit_stage::<MainApp, MainApp, _>([Shutdown]).after(PreShutdown);
        app.add_exit_stage::<MainApp, MainApp, _>([PostShutdown]).after(Shutdown);

        app.add_event::<AppExit>();
        app
    }

    /// Register an additional sub-application. Idempotent.
    pub fn add_sub_app<A: AppLabel>(&mut self) -> &mut Self {
        self.sub_apps.insert::<A>();
        self
    }

    /// Shared access to a sub-application.
    ///
    /// Panics when the label was never registered.
    pub fn sub_app<A: AppLabel>(&self) -> AtomicRef<'_, SubApp> {
        self.sub_apps
            .get(TypeId::of::<A>())
            .unwrap_or_else(|| panic!("{}", Error::UnknownSubApp(core::any::type_name::<A>())))
            .borrow()
    }

    /// Exclusive access to a sub-application.
    ///
    /// Panics when the label was never registered.
    pub fn sub_app_mut<A: AppLabel>(&mut self) -> AtomicRefMut<'_, SubApp> {
        self.sub_apps
            .get(TypeId::of::<A>())
            .unwrap_or_else(|| panic!("{}", Error::UnknownSubApp(core::any::type_name::<A>())))
            .borrow_mut()
    }

    /// Register a plugin by type identity. Re-registration warns and keeps
    /// the existing plugin.
    pub fn add_plugin<P: Plugin>(&mut self, plugin: P) -> &mut Self {
        if !self.plugin_ids.insert(TypeId::of::<P>()) {
            tracing::warn!(
                "Plugin {} is already registered, keeping the existing one",
                tynm::type_name::<P>()
            );
            return self;
        }
        self.pending_plugins.push(Box::new(plugin));
        self
    }

    /// Register a system in the given stage. The returned builder binds
    /// ordering, set membership, conditions and the worker pool.
    pub fn add_system<S: Stage, M>(
        &mut self,
        stage: S,
        system: impl IntoSystemDescriptor<M>,
    ) -> SystemConfig<'_> {
        let descriptor = system.into_descriptor();
        let transition = self.runner.is_transition_stage(TypeId::of::<S>());
        match self
            .runner
            .add_system(TypeId::of::<S>(), stage.index(), descriptor)
        {
            Some((node, pos)) => SystemConfig {
                node: Some(node),
                pos,
                transition,
            },
            None => {
                tracing::warn!("{}", Error::UnknownStage(core::any::type_name::<S>()));
                SystemConfig {
                    node: None,
                    pos: (0, 0),
                    transition: false,
                }
            }
        }
    }

    /// Declare the execution order of a set type's values
    pub fn configure_sets<S: SystemSet>(&mut self, sets: impl IntoIterator<Item = S>) -> &mut Self {
        let order: Vec<usize> = sets.into_iter().map(|set| set.index()).collect();
        self.runner.sets.insert(TypeId::of::<S>(), order);
        self
    }

    /// Declare a named worker pool with at least one thread
    pub fn add_worker(&mut self, name: impl Into<String>, threads: usize) -> &mut Self {
        self.runner.add_worker(name, threads);
        self
    }

    /// Insert a resource on the main sub-application unless one exists
    pub fn insert_resource<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.sub_app_mut::<MainApp>().insert_resource(value);
        self
    }

    /// Insert a default-constructed resource on the main sub-application
    pub fn init_resource<T: Default + Send + Sync + 'static>(&mut self) -> &mut Self {
        self.sub_app_mut::<MainApp>().init_resource::<T>();
        self
    }

    /// Register a state type on the main sub-application
    pub fn insert_state<S: States>(&mut self, initial: S) -> &mut Self {
        self.sub_app_mut::<MainApp>().insert_state(initial);
        self
    }

    /// Register a state type with its default value
    pub fn init_state<S: States + Default>(&mut self) -> &mut Self {
        self.sub_app_mut::<MainApp>().init_state::<S>();
        self
    }

    /// Create an event queue on the main sub-application. Idempotent.
    pub fn add_event<T: Send + Sync + 'static>(&mut self) -> &mut Self {
        self.sub_app_mut::<MainApp>().add_event::<T>();
        self
    }

    /// Keep iterating the loop graph until [AppExit] is observed
    pub fn enable_loop(&mut self) -> &mut Self {
        self.loop_enabled = true;
        self
    }

    /// Run the loop graph exactly once per `run`
    pub fn disable_loop(&mut self) -> &mut Self {
        self.loop_enabled = false;
        self
    }

    /// Verbosity of the runner and every stage and sub-stage under it
    pub fn set_log_level(&mut self, level: Level) -> &mut Self {
        self.runner.set_log_level(level);
        self
    }

    /// Register a stage into the startup graph
    pub fn add_startup_stage<Src: AppLabel, Dst: AppLabel, S: Stage>(
        &mut self,
        sub_stages: impl IntoIterator<Item = S>,
    ) -> StageConfig<'_> {
        self.add_stage::<Src, Dst, S>(GraphKind::Startup, sub_stages)
    }

    /// Register a stage into the loop graph
    pub fn add_loop_stage<Src: AppLabel, Dst: AppLabel, S: Stage>(
        &mut self,
        sub_stages: impl IntoIterator<Item = S>,
    ) -> StageConfig<'_> {
        self.add_stage::<Src, Dst, S>(GraphKind::Loop, sub_stages)
    }

    /// Register a stage into the state-transition graph
    pub fn add_state_transition_stage<Src: AppLabel, Dst: AppLabel, S: Stage>(
        &mut self,
        sub_stages: impl IntoIterator<Item = S>,
    ) -> StageConfig<'_> {
        self.add_stage::<Src, Dst, S>(GraphKind::StateTransition, sub_stages)
    }

    /// Register a stage into the exit graph
    pub fn add_exit_stage<Src: AppLabel, Dst: AppLabel, S: Stage>(
        &mut self,
        sub_stages: impl IntoIterator<Item = S>,
    ) -> StageConfig<'_> {
        self.add_stage::<Src, Dst, S>(GraphKind::Exit, sub_stages)
    }

    fn add_stage<Src: AppLabel, Dst: AppLabel, S: Stage>(
        &mut self,
        kind: GraphKind,
        sub_stages: impl IntoIterator<Item = S>,
    ) -> StageConfig<'_> {
        let labels = [
            (TypeId::of::<Src>(), core::any::type_name::<Src>()),
            (TypeId::of::<Dst>(), core::any::type_name::<Dst>()),
        ];
        for (label, name) in labels {
            if !self.sub_apps.contains(label) {
                tracing::warn!("{}", Error::UnknownSubApp(name));
                return StageConfig { node: None };
            }
        }

        let mut order: Vec<usize> = sub_stages.into_iter().map(|sub| sub.index()).collect();
        if order.is_empty() {
            order.push(0);
        }
        let runner = StageRunner::new(
            tynm::type_name::<S>(),
            TypeId::of::<S>(),
            TypeId::of::<Src>(),
            TypeId::of::<Dst>(),
            &order,
        );
        StageConfig {
            node: Some(self.runner.add_stage(kind, runner)),
        }
    }

    fn build_plugins(&mut self) {
        while !self.pending_plugins.is_empty() {
            let pending = std::mem::take(&mut self.pending_plugins);
            for plugin in pending {
                plugin.build(self);
                self.plugins.push(plugin);
            }
        }
        tracing::debug!("Built {} plugins", self.plugins.len());
    }

    fn exit_requested(&self) -> bool {
        let Some(main) = self.sub_apps.get(TypeId::of::<MainApp>()) else {
            return true;
        };
        let main = main.borrow();
        main.world()
            .events::<AppExit>()
            .is_some_and(|events| !events.is_empty())
    }

    /// Build everything and drive the four graphs to completion
    pub fn run(&mut self) -> anyhow::Result<()> {
        self.build_plugins();
        self.runner.build().context("Failed to build the runner")?;
        self.runner.bake_all();

        self.runner.run_startup(&self.sub_apps);

        loop {
            self.runner.run_loop(&self.sub_apps);
            self.runner.run_state_transition(&self.sub_apps);

            self.sub_apps.tick_events();
            self.sub_apps.end_commands();
            self.sub_apps.update_states();

            if !self.loop_enabled || self.exit_requested() {
                break;
            }
        }

        self.runner.run_exit(&self.sub_apps);
        Ok(())
    }
}

/// Builder for a freshly added stage, recording coarse ordering towards
/// its peers in the same graph.
pub struct StageConfig<'a> {
    node: Option<AtomicRefMut<'a, StageNode>>,
}

impl StageConfig<'_> {
    pub fn after<S: Stage>(mut self, _stage: S) -> Self {
        if let Some(node) = &mut self.node {
            node.prev.insert(TypeId::of::<S>());
        }
        self
    }

    pub fn before<S: Stage>(mut self, _stage: S) -> Self {
        if let Some(node) = &mut self.node {
            node.next.insert(TypeId::of::<S>());
        }
        self
    }
}

/// Builder for a freshly added system.
pub struct SystemConfig<'a> {
    node: Option<AtomicRefMut<'a, StageNode>>,
    pos: (usize, usize),
    transition: bool,
}

impl SystemConfig<'_> {
    fn system_mut(&mut self) -> Option<&mut crate::schedule::SystemNode> {
        let pos = self.pos;
        self.node.as_mut()?.runner.node_mut(pos)
    }

    /// Run before the referenced system, when it shares this sub-stage
    pub fn before<M>(mut self, other: impl IntoSystemDescriptor<M>) -> Self {
        let id = other.id();
        if let Some(node) = self.system_mut() {
            node.before.push(id);
        }
        self
    }

    /// Run after the referenced system, when it shares this sub-stage
    pub fn after<M>(mut self, other: impl IntoSystemDescriptor<M>) -> Self {
        let id = other.id();
        if let Some(node) = self.system_mut() {
            node.after.push(id);
        }
        self
    }

    /// Add the system to a set
    pub fn in_sets<S: SystemSet>(mut self, set: S) -> Self {
        if let Some(node) = self.system_mut() {
            node.in_sets.push(SetId::of(set));
        }
        self
    }

    /// Append a run condition; the system is skipped when any condition
    /// returns false.
    pub fn run_if<M>(mut self, condition: impl IntoCondition<M>) -> Self {
        if let Some(node) = self.system_mut() {
            node.conditions.push(Arc::new(condition.into_condition()));
        }
        self
    }

    /// Dispatch the system on the named worker pool
    pub fn use_worker(mut self, name: impl Into<String>) -> Self {
        if let Some(node) = self.system_mut() {
            node.worker = name.into();
        }
        self
    }

    /// Run only on the iteration the state becomes `state`
    pub fn on_enter<S: States>(mut self, state: S) -> Self {
        if !self.check_transition("on_enter") {
            return self;
        }
        if let Some(node) = self.system_mut() {
            node.conditions.push(Arc::new(states::on_enter(state)));
        }
        self
    }

    /// Run only on the iteration the state stops being `state`
    pub fn on_exit<S: States>(mut self, state: S) -> Self {
        if !self.check_transition("on_exit") {
            return self;
        }
        if let Some(node) = self.system_mut() {
            node.conditions.push(Arc::new(states::on_exit(state)));
        }
        self
    }

    /// Run only when current and pending state differ
    pub fn on_change<S: States>(mut self) -> Self {
        if !self.check_transition("on_change") {
            return self;
        }
        if let Some(node) = self.system_mut() {
            node.conditions.push(Arc::new(states::on_change::<S>()));
        }
        self
    }

    /// Run only while the current state equals `state`
    pub fn in_state<S: States>(mut self, state: S) -> Self {
        if !self.check_transition("in_state") {
            return self;
        }
        if let Some(node) = self.system_mut() {
            node.conditions.push(Arc::new(states::in_state(state)));
        }
        self
    }

    fn check_transition(&mut self, what: &str) -> bool {
        if self.transition {
            return true;
        }
        let name = self
            .system_mut()
            .map(|node| node.system.name().to_string())
            .unwrap_or_default();
        tracing::warn!("Ignoring {what} on {name}: only allowed on state-transition stages");
        false
    }
}
