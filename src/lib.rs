//! A staged, conflict-aware parallel scheduler and ECS application runtime.
//!
//! Systems are plain functions whose parameters declare what they access.
//! The runtime infers a read/write manifest from each signature, derives a
//! dependency graph per sub-stage from declared ordering and access
//! conflicts, and dispatches systems onto named worker pools so that no
//! two conflicting systems ever overlap.
//!
//! # Features
//! - Function-signature parameter inference ([Query], [Res], [Commands],
//!   events, states, locals)
//! - Static data-race freedom via manifest conflict analysis
//! - Four stage graphs (startup, loop, state transition, exit) driving any
//!   number of sub-applications, with cross-world [Extract] views
//!
//! ```rust
//! use cadence::{App, Commands, Query, Startup, Update};
//!
//! struct Counter(u32);
//! cadence::component!(Counter);
//!
//! fn setup(mut cmd: Commands) {
//!     cmd.spawn(Counter(0));
//! }
//!
//! fn count(mut counters: Query<&mut Counter>) {
//!     counters.for_each(|counter| counter.0 += 1);
//! }
//!
//! let mut app = App::new();
//! app.add_system(Startup, setup);
//! app.add_system(Update, count);
//! app.run().unwrap();
//! ```

pub mod access;
mod app;
mod bundle;
mod commandbuffer;
mod entity;
mod error;
mod events;
mod hierarchy;
mod query;
mod resources;
pub mod schedule;
mod storage;
pub mod system;
mod world;

pub use app::{
    App, AppExit, AppLabel, First, Last, MainApp, NextState, Plugin, PostRender, PostShutdown,
    PostStartup, PostUpdate, PreRender, PreShutdown, PreStartup, PreUpdate, Prepare, Render,
    RenderApp, Shutdown, Stage, StageConfig, Startup, State, StateTransit, States, SubApp,
    SystemConfig, Update,
};
pub use bundle::{Bundle, Component};
pub use commandbuffer::{CommandBuffer, Commands, EntityCommands};
pub use entity::Entity;
pub use error::{Error, Result};
pub use events::{EventReader, EventWriter, Events};
pub use hierarchy::{Children, Parent};
pub use query::{Extract, Query, QueryData, QueryFilter, With, Without};
pub use resources::{Res, ResMut};
pub use schedule::{SystemSet, DEFAULT_WORKER, SINGLE_WORKER};
pub use system::{IntoCondition, IntoSystemDescriptor, Local, SystemId, SystemParam};
pub use world::World;
