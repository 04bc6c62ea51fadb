use core::any::TypeId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Context;
use atomic_refcell::{AtomicRefCell, AtomicRefMut};
use smallvec::SmallVec;
use tracing::Level;

use crate::app::SubApps;
use crate::schedule::pool::WorkerPools;
use crate::schedule::set::SetMap;
use crate::schedule::stage::StageRunner;
use crate::system::SystemDescriptor;

type EdgeList = SmallVec<[usize; 4]>;

/// A stage in one of the four graphs: its runner plus the declared and
/// derived ordering edges towards its peers.
pub(crate) struct StageNode {
    pub runner: StageRunner,
    /// Stages declared to run before this one
    pub prev: BTreeSet<TypeId>,
    /// Stages declared to run after this one
    pub next: BTreeSet<TypeId>,
    strong_prev: EdgeList,
    strong_next: EdgeList,
    weak_prev: EdgeList,
    weak_next: EdgeList,
}

impl StageNode {
    fn new(runner: StageRunner) -> Self {
        Self {
            runner,
            prev: BTreeSet::new(),
            next: BTreeSet::new(),
            strong_prev: EdgeList::new(),
            strong_next: EdgeList::new(),
            weak_prev: EdgeList::new(),
            weak_next: EdgeList::new(),
        }
    }
}

type SharedStageNode = Arc<AtomicRefCell<StageNode>>;

pub(crate) struct StageGraph {
    name: &'static str,
    nodes: Vec<SharedStageNode>,
    index: BTreeMap<TypeId, usize>,
}

impl StageGraph {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            nodes: Vec::new(),
            index: BTreeMap::new(),
        }
    }

    pub fn contains(&self, stage: TypeId) -> bool {
        self.index.contains_key(&stage)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GraphKind {
    Startup,
    Loop,
    StateTransition,
    Exit,
}

/// The four-graph scheduler: startup, loop, state transition and exit
/// stage graphs, the worker pool table and the control pool driving stage
/// orchestration.
pub(crate) struct Runner {
    startup: StageGraph,
    main_loop: StageGraph,
    transition: StageGraph,
    exit: StageGraph,
    pool_config: Vec<(String, usize)>,
    pools: Option<Arc<WorkerPools>>,
    control: Option<rayon::ThreadPool>,
    pub(crate) sets: SetMap,
    log_level: Level,
}

const CONTROL_THREADS: usize = 4;

impl Runner {
    pub fn new() -> Self {
        Self {
            startup: StageGraph::new("startup"),
            main_loop: StageGraph::new("loop"),
            transition: StageGraph::new("state transition"),
            exit: StageGraph::new("exit"),
            pool_config: Vec::new(),
            pools: None,
            control: None,
            sets: SetMap::new(),
            log_level: Level::WARN,
        }
    }

    fn graph(&self, kind: GraphKind) -> &StageGraph {
        match kind {
            GraphKind::Startup => &self.startup,
            GraphKind::Loop => &self.main_loop,
            GraphKind::StateTransition => &self.transition,
            GraphKind::Exit => &self.exit,
        }
    }

    fn graph_mut(&mut self, kind: GraphKind) -> &mut StageGraph {
        match kind {
            GraphKind::Startup => &mut self.startup,
            GraphKind::Loop => &mut self.main_loop,
            GraphKind::StateTransition => &mut self.transition,
            GraphKind::Exit => &mut self.exit,
        }
    }

    /// The graph a stage lives in, if any
    pub fn find_stage(&self, stage: TypeId) -> Option<GraphKind> {
        [
            GraphKind::Startup,
            GraphKind::Loop,
            GraphKind::StateTransition,
            GraphKind::Exit,
        ]
        .into_iter()
        .find(|&kind| self.graph(kind).contains(stage))
    }

    pub fn is_transition_stage(&self, stage: TypeId) -> bool {
        self.transition.contains(stage)
    }

    /// Register a stage into a graph, keeping the existing node when the
    /// stage was already added.
    pub fn add_stage(
        &mut self,
        kind: GraphKind,
        runner: StageRunner,
    ) -> AtomicRefMut<'_, StageNode> {
        let graph = self.graph_mut(kind);
        let idx = match graph.index.get(&runner.stage()) {
            Some(&idx) => {
                tracing::warn!(
                    "Stage {} already present in the {} graph, keeping the existing stage",
                    runner.name(),
                    graph.name
                );
                idx
            }
            None => {
                let idx = graph.nodes.len();
                graph.index.insert(runner.stage(), idx);
                graph
                    .nodes
                    .push(Arc::new(AtomicRefCell::new(StageNode::new(runner))));
                idx
            }
        };
        graph.nodes[idx].borrow_mut()
    }

    /// Insert a system into the sub-stage of whichever graph holds its
    /// stage. Returns the holding stage node and the node's position.
    pub fn add_system(
        &mut self,
        stage: TypeId,
        sub_stage: usize,
        system: SystemDescriptor,
    ) -> Option<(AtomicRefMut<'_, StageNode>, (usize, usize))> {
        let kind = self.find_stage(stage)?;
        let graph = self.graph(kind);
        let idx = graph.index[&stage];
        let mut node = graph.nodes[idx].borrow_mut();
        let pos = node.runner.add_system(sub_stage, system);
        Some((node, pos))
    }

    pub fn add_worker(&mut self, name: impl Into<String>, threads: usize) {
        if self.pools.is_some() {
            tracing::warn!("Worker pools are already built, declare pools before running");
            return;
        }
        self.pool_config.push((name.into(), threads));
    }

    pub fn set_log_level(&mut self, level: Level) {
        self.log_level = level;
    }

    /// Materialize the worker pools and realize ordering in all four
    /// graphs: user-declared strong edges first, then weak edges between
    /// stages whose sub-application pairs overlap, in stage-depth order.
    pub fn build(&mut self) -> anyhow::Result<()> {
        let pools = Arc::new(WorkerPools::build(&self.pool_config)?);
        self.control = Some(
            rayon::ThreadPoolBuilder::new()
                .num_threads(CONTROL_THREADS)
                .thread_name(|i| format!("control-{i}"))
                .build()
                .context("Failed to build the control pool")?,
        );

        for kind in [
            GraphKind::Startup,
            GraphKind::Loop,
            GraphKind::StateTransition,
            GraphKind::Exit,
        ] {
            let graph = self.graph(kind);
            build_graph(graph, &self.sets, &pools, self.log_level);
        }

        self.pools = Some(pools);
        Ok(())
    }

    /// Re-derive the weak edges of every sub-stage from the current
    /// moving-average timings.
    pub fn bake_all(&self) {
        for kind in [
            GraphKind::Startup,
            GraphKind::Loop,
            GraphKind::StateTransition,
            GraphKind::Exit,
        ] {
            for node in &self.graph(kind).nodes {
                node.borrow_mut().runner.bake();
            }
        }
    }

    pub fn run_startup(&self, sub_apps: &SubApps) {
        self.run_graph(&self.startup, sub_apps);
    }

    pub fn run_loop(&self, sub_apps: &SubApps) {
        self.run_graph(&self.main_loop, sub_apps);
    }

    pub fn run_state_transition(&self, sub_apps: &SubApps) {
        self.run_graph(&self.transition, sub_apps);
    }

    pub fn run_exit(&self, sub_apps: &SubApps) {
        self.run_graph(&self.exit, sub_apps);
    }

    /// Dispatch a graph's stages onto the control pool in dependency
    /// waves, the same loop the sub-stages use for systems.
    fn run_graph(&self, graph: &StageGraph, sub_apps: &SubApps) {
        let (Some(pools), Some(control)) = (&self.pools, &self.control) else {
            tracing::warn!("Runner was not built, cannot run the {} graph", graph.name);
            return;
        };
        if graph.nodes.is_empty() {
            return;
        }

        let (tx, rx) = flume::unbounded();
        let mut prev_count: Vec<usize> = graph
            .nodes
            .iter()
            .map(|cell| {
                let node = cell.borrow();
                node.strong_prev.len() + node.weak_prev.len()
            })
            .collect();
        let mut remaining = graph.nodes.len();
        let mut running = 0usize;

        for idx in 0..graph.nodes.len() {
            if prev_count[idx] == 0 {
                submit_stage(graph, idx, sub_apps, pools, control, &tx);
                running += 1;
            }
        }

        while running > 0 {
            let idx = match rx.recv() {
                Ok(idx) => idx,
                Err(_) => {
                    tracing::warn!("Completion channel closed early in the {} graph", graph.name);
                    return;
                }
            };
            running -= 1;
            remaining -= 1;

            let node = graph.nodes[idx].borrow();
            for &next in node.strong_next.iter().chain(node.weak_next.iter()) {
                prev_count[next] -= 1;
                if prev_count[next] == 0 {
                    submit_stage(graph, next, sub_apps, pools, control, &tx);
                    running += 1;
                }
            }
        }

        if remaining > 0 {
            tracing::warn!(
                "The {} graph has circular stage dependencies, {remaining} stages were not run",
                graph.name
            );
        }
    }
}

fn submit_stage(
    graph: &StageGraph,
    idx: usize,
    sub_apps: &SubApps,
    pools: &Arc<WorkerPools>,
    control: &rayon::ThreadPool,
    tx: &flume::Sender<usize>,
) {
    let cell = graph.nodes[idx].clone();
    let (src, dst) = {
        let node = cell.borrow();
        (
            sub_apps.get(node.runner.src).cloned(),
            sub_apps.get(node.runner.dst).cloned(),
        )
    };
    let (Some(src), Some(dst)) = (src, dst) else {
        tracing::warn!("Skipping stage with unregistered sub-application");
        let _ = tx.send(idx);
        return;
    };

    let pools = pools.clone();
    let tx = tx.clone();
    control.spawn(move || {
        let node = cell.borrow();
        node.runner.run(&src, &dst, &pools);
        drop(node);
        let _ = tx.send(idx);
    });
}

fn add_strong_stage_edge(nodes: &[SharedStageNode], from: usize, to: usize) {
    if from == to || nodes[from].borrow().strong_next.contains(&to) {
        return;
    }
    nodes[from].borrow_mut().strong_next.push(to);
    nodes[to].borrow_mut().strong_prev.push(from);
}

fn add_weak_stage_edge(nodes: &[SharedStageNode], from: usize, to: usize) {
    if from == to {
        return;
    }
    {
        let from_node = nodes[from].borrow();
        let to_node = nodes[to].borrow();
        if from_node.weak_next.contains(&to)
            || from_node.strong_next.contains(&to)
            || to_node.strong_next.contains(&from)
        {
            return;
        }
    }
    nodes[from].borrow_mut().weak_next.push(to);
    nodes[to].borrow_mut().weak_prev.push(from);
}

/// Longest strong-edge path from any root to the node
fn stage_depth(
    nodes: &[SharedStageNode],
    idx: usize,
    memo: &mut [Option<usize>],
    visiting: &mut [bool],
) -> usize {
    if let Some(depth) = memo[idx] {
        return depth;
    }
    if visiting[idx] {
        return 0;
    }
    visiting[idx] = true;
    let prev: Vec<usize> = nodes[idx].borrow().strong_prev.to_vec();
    let depth = prev
        .into_iter()
        .map(|prev| stage_depth(nodes, prev, memo, visiting) + 1)
        .max()
        .unwrap_or(0);
    visiting[idx] = false;
    memo[idx] = Some(depth);
    depth
}

fn build_graph(graph: &StageGraph, sets: &SetMap, pools: &WorkerPools, level: Level) {
    for cell in &graph.nodes {
        let mut node = cell.borrow_mut();
        node.runner.set_log_level(level);
        node.runner.build(sets, pools);
        node.strong_prev.clear();
        node.strong_next.clear();
        node.weak_prev.clear();
        node.weak_next.clear();
    }

    // User declared coarse ordering
    let mut edges = Vec::new();
    for (idx, cell) in graph.nodes.iter().enumerate() {
        let node = cell.borrow();
        for stage in &node.next {
            if let Some(&next) = graph.index.get(stage) {
                edges.push((idx, next));
            }
        }
        for stage in &node.prev {
            if let Some(&prev) = graph.index.get(stage) {
                edges.push((prev, idx));
            }
        }
    }
    for (from, to) in edges {
        add_strong_stage_edge(&graph.nodes, from, to);
    }

    // Weak edges between overlapping stages, in depth order
    let mut memo = vec![None; graph.nodes.len()];
    let mut visiting = vec![false; graph.nodes.len()];
    let depths: Vec<usize> = (0..graph.nodes.len())
        .map(|idx| stage_depth(&graph.nodes, idx, &mut memo, &mut visiting))
        .collect();

    let mut order: Vec<usize> = (0..graph.nodes.len()).collect();
    order.sort_by(|&a, &b| depths[a].cmp(&depths[b]).then(a.cmp(&b)));

    for i in 0..order.len() {
        for j in i + 1..order.len() {
            let (from, to) = (order[i], order[j]);
            let conflicts = {
                let from_node = graph.nodes[from].borrow();
                let to_node = graph.nodes[to].borrow();
                from_node.runner.conflicts_with(&to_node.runner)
            };
            if conflicts {
                add_weak_stage_edge(&graph.nodes, from, to);
            }
        }
    }
}
