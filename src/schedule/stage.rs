use core::any::TypeId;
use std::collections::BTreeMap;

use tracing::Level;

use crate::app::SharedSubApp;
use crate::schedule::pool::WorkerPools;
use crate::schedule::set::SetMap;
use crate::schedule::substage::{SubStageRunner, SystemNode};
use crate::system::SystemDescriptor;

/// Runs one stage's sub-stages strictly in configured order, applying the
/// destination's pending commands after each so mutations are visible to
/// the next sub-stage.
pub(crate) struct StageRunner {
    name: String,
    stage: TypeId,
    /// Sub-application labels this stage reads from and writes to
    pub(crate) src: TypeId,
    pub(crate) dst: TypeId,
    sub_stages: Vec<SubStageRunner>,
    /// Stage sub-stage index to position in `sub_stages`
    index: BTreeMap<usize, usize>,
    log_level: Level,
}

impl StageRunner {
    pub fn new(
        name: String,
        stage: TypeId,
        src: TypeId,
        dst: TypeId,
        sub_stage_order: &[usize],
    ) -> Self {
        let mut runner = Self {
            name,
            stage,
            src,
            dst,
            sub_stages: Vec::new(),
            index: BTreeMap::new(),
            log_level: Level::WARN,
        };
        for &sub in sub_stage_order {
            runner.ensure_sub_stage(sub);
        }
        runner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> TypeId {
        self.stage
    }

    pub fn set_log_level(&mut self, level: Level) {
        self.log_level = level;
        for sub_stage in &mut self.sub_stages {
            sub_stage.set_log_level(level);
        }
    }

    fn ensure_sub_stage(&mut self, sub: usize) -> usize {
        if let Some(&pos) = self.index.get(&sub) {
            return pos;
        }
        let pos = self.sub_stages.len();
        self.index.insert(sub, pos);
        self.sub_stages
            .push(SubStageRunner::new(format!("{}[{sub}]", self.name)));
        pos
    }

    /// Insert a system into the given sub-stage, creating the sub-stage at
    /// the end of the run order if it was never configured.
    pub fn add_system(&mut self, sub: usize, system: SystemDescriptor) -> (usize, usize) {
        let pos = self.ensure_sub_stage(sub);
        let idx = self.sub_stages[pos].add_system(system);
        (pos, idx)
    }

    pub fn node_mut(&mut self, pos: (usize, usize)) -> Option<&mut SystemNode> {
        self.sub_stages.get_mut(pos.0)?.node_mut(pos.1)
    }

    /// Whether two stages may not run concurrently: their sub-application
    /// pairs overlap.
    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.src == other.src
            || self.src == other.dst
            || self.dst == other.src
            || self.dst == other.dst
    }

    pub fn build(&mut self, sets: &SetMap, pools: &WorkerPools) {
        for sub_stage in &mut self.sub_stages {
            sub_stage.build(sets, pools);
        }
    }

    pub fn bake(&mut self) {
        for sub_stage in &mut self.sub_stages {
            sub_stage.bake();
        }
    }

    pub fn run(&self, src: &SharedSubApp, dst: &SharedSubApp, pools: &WorkerPools) {
        if self.log_level >= Level::DEBUG {
            tracing::debug!("Running stage {} ({} systems)", self.name, self.system_count());
        }
        for sub_stage in &self.sub_stages {
            sub_stage.run(src, dst, pools);
            dst.borrow_mut().end_commands();
        }
    }

    pub fn system_count(&self) -> usize {
        self.sub_stages.iter().map(|v| v.len()).sum()
    }
}
