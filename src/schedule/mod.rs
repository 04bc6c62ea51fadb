mod pool;
mod runner;
mod set;
mod stage;
mod substage;

pub use pool::{DEFAULT_WORKER, SINGLE_WORKER};
pub use set::SystemSet;

pub(crate) use runner::{GraphKind, Runner, StageNode};
pub(crate) use set::SetId;
pub(crate) use stage::StageRunner;
pub(crate) use substage::SystemNode;
