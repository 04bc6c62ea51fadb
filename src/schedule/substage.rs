use std::collections::BTreeMap;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::Level;

use crate::access::AccessManifest;
use crate::app::SharedSubApp;
use crate::schedule::pool::{WorkerPools, DEFAULT_WORKER};
use crate::schedule::set::{SetId, SetMap};
use crate::system::{ConditionDescriptor, SystemDescriptor, SystemId};

type EdgeList = SmallVec<[usize; 4]>;

/// One system in a sub-stage graph: the descriptor plus its ordering
/// edges. Strong edges come from user declarations and set membership,
/// weak edges are derived from access conflicts at bake time.
pub(crate) struct SystemNode {
    pub system: Arc<SystemDescriptor>,
    pub conditions: Vec<Arc<ConditionDescriptor>>,
    pub worker: String,
    pub in_sets: Vec<SetId>,
    pub before: Vec<SystemId>,
    pub after: Vec<SystemId>,
    strong_prev: EdgeList,
    strong_next: EdgeList,
    weak_prev: EdgeList,
    weak_next: EdgeList,
    /// System access merged with every condition's access
    effective_access: AccessManifest,
}

impl SystemNode {
    fn new(system: SystemDescriptor) -> Self {
        Self {
            effective_access: system.access().clone(),
            system: Arc::new(system),
            conditions: Vec::new(),
            worker: DEFAULT_WORKER.into(),
            in_sets: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
            strong_prev: EdgeList::new(),
            strong_next: EdgeList::new(),
            weak_prev: EdgeList::new(),
            weak_next: EdgeList::new(),
        }
    }
}

/// The smallest schedulable unit: a DAG of systems for one
/// (stage, sub-stage) pair, executed in topological waves on the worker
/// pools.
pub(crate) struct SubStageRunner {
    name: String,
    nodes: Vec<SystemNode>,
    index: BTreeMap<SystemId, usize>,
    log_level: Level,
}

impl SubStageRunner {
    pub fn new(name: String) -> Self {
        Self {
            name,
            nodes: Vec::new(),
            index: BTreeMap::new(),
            log_level: Level::WARN,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn set_log_level(&mut self, level: Level) {
        self.log_level = level;
    }

    /// Insert a system node. Warns and returns the existing node when the
    /// same function is added twice.
    pub fn add_system(&mut self, system: SystemDescriptor) -> usize {
        if let Some(&existing) = self.index.get(&system.id()) {
            tracing::warn!(
                "System {} already present in {}, keeping the existing node",
                system.name(),
                self.name
            );
            return existing;
        }

        let idx = self.nodes.len();
        self.index.insert(system.id(), idx);
        self.nodes.push(SystemNode::new(system));
        idx
    }

    pub fn node_mut(&mut self, idx: usize) -> Option<&mut SystemNode> {
        self.nodes.get_mut(idx)
    }

    fn add_strong_edge(&mut self, from: usize, to: usize) {
        if from == to || self.nodes[from].strong_next.contains(&to) {
            return;
        }
        self.nodes[from].strong_next.push(to);
        self.nodes[to].strong_prev.push(from);
    }

    fn add_weak_edge(&mut self, from: usize, to: usize) {
        if from == to
            || self.nodes[from].weak_next.contains(&to)
            || self.nodes[from].strong_next.contains(&to)
            || self.nodes[to].strong_next.contains(&from)
        {
            return;
        }
        self.nodes[from].weak_next.push(to);
        self.nodes[to].weak_prev.push(from);
    }

    fn members_of(&self, set: SetId) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.in_sets.contains(&set))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Realize strong ordering: set membership in configured set order,
    /// then user `before`/`after` declarations. References to systems not
    /// present in this sub-stage are dropped silently.
    pub fn build(&mut self, sets: &SetMap, pools: &WorkerPools) {
        for node in &mut self.nodes {
            node.strong_prev.clear();
            node.strong_next.clear();
            if !pools.contains(&node.worker) {
                tracing::warn!(
                    "System {} uses unknown worker pool {}, falling back to {DEFAULT_WORKER}",
                    node.system.name(),
                    node.worker
                );
                node.worker = DEFAULT_WORKER.into();
            }
        }

        for (&ty, order) in sets {
            for (pos, &value) in order.iter().enumerate() {
                let earlier = self.members_of(SetId { ty, value });
                for &later_value in &order[pos + 1..] {
                    let later = self.members_of(SetId {
                        ty,
                        value: later_value,
                    });
                    for &from in &earlier {
                        for &to in &later {
                            self.add_strong_edge(from, to);
                        }
                    }
                }
            }
        }

        for idx in 0..self.nodes.len() {
            for other in self.nodes[idx].before.clone() {
                if let Some(&to) = self.index.get(&other) {
                    self.add_strong_edge(idx, to);
                }
            }
            for other in self.nodes[idx].after.clone() {
                if let Some(&from) = self.index.get(&other) {
                    self.add_strong_edge(from, idx);
                }
            }
        }
    }

    /// Estimated earliest start of each node under the current moving
    /// average timings, following strong edges only.
    fn reach_times(&self) -> Vec<f64> {
        fn visit(
            nodes: &[SystemNode],
            idx: usize,
            memo: &mut [Option<f64>],
            visiting: &mut [bool],
        ) -> f64 {
            if let Some(time) = memo[idx] {
                return time;
            }
            if visiting[idx] {
                // Contradictory user ordering; reported when the wave
                // loop strands the nodes.
                return 0.0;
            }
            visiting[idx] = true;
            let mut time = 0.0f64;
            for &prev in &nodes[idx].strong_prev {
                let reach = visit(nodes, prev, memo, visiting) + nodes[prev].system.avg_time();
                time = time.max(reach);
            }
            visiting[idx] = false;
            memo[idx] = Some(time);
            time
        }

        let mut memo = vec![None; self.nodes.len()];
        let mut visiting = vec![false; self.nodes.len()];
        (0..self.nodes.len())
            .map(|idx| visit(&self.nodes, idx, &mut memo, &mut visiting))
            .collect()
    }

    /// Derive the weak edges: order nodes by estimated reach time, then
    /// connect every conflicting pair in that order. Deterministic modulo
    /// the reach-time tie break, and recomputed from the live averages on
    /// every bake.
    pub fn bake(&mut self) {
        for idx in 0..self.nodes.len() {
            let mut access = self.nodes[idx].system.access().clone();
            for condition in &self.nodes[idx].conditions {
                access.merge(condition.access());
            }
            self.nodes[idx].effective_access = access;
            self.nodes[idx].weak_prev.clear();
            self.nodes[idx].weak_next.clear();
        }

        let reach = self.reach_times();
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.sort_by(|&a, &b| reach[a].total_cmp(&reach[b]).then(a.cmp(&b)));

        for i in 0..order.len() {
            for j in i + 1..order.len() {
                let (from, to) = (order[i], order[j]);
                if self.nodes[from]
                    .effective_access
                    .conflicts_with(&self.nodes[to].effective_access)
                {
                    self.add_weak_edge(from, to);
                }
            }
        }
    }

    /// Execute the sub-stage as a topological wave loop.
    ///
    /// Every node with no unfinished predecessors is submitted to its
    /// worker pool; completions come back over a channel and unlock their
    /// successors. Nodes stranded by a user-introduced cycle are warned
    /// about and abandoned for this tick.
    pub fn run(&self, src: &SharedSubApp, dst: &SharedSubApp, pools: &WorkerPools) {
        if self.nodes.is_empty() {
            return;
        }
        if self.log_level >= Level::DEBUG {
            tracing::debug!("Running sub-stage {} ({} systems)", self.name, self.len());
        }

        let (tx, rx) = flume::unbounded();
        let mut prev_count: Vec<usize> = self
            .nodes
            .iter()
            .map(|node| node.strong_prev.len() + node.weak_prev.len())
            .collect();
        let mut remaining = self.nodes.len();
        let mut running = 0usize;

        for idx in 0..self.nodes.len() {
            if prev_count[idx] == 0 {
                self.submit(idx, src, dst, pools, &tx);
                running += 1;
            }
        }

        while running > 0 {
            let idx = match rx.recv() {
                Ok(idx) => idx,
                Err(_) => {
                    tracing::warn!("Completion channel closed early in {}", self.name);
                    return;
                }
            };
            running -= 1;
            remaining -= 1;

            let node = &self.nodes[idx];
            for &next in node.strong_next.iter().chain(node.weak_next.iter()) {
                prev_count[next] -= 1;
                if prev_count[next] == 0 {
                    self.submit(next, src, dst, pools, &tx);
                    running += 1;
                }
            }
        }

        if remaining > 0 {
            tracing::warn!(
                "Sub-stage {} has circular dependencies, {remaining} systems were not run",
                self.name
            );
        }
    }

    fn submit(
        &self,
        idx: usize,
        src: &SharedSubApp,
        dst: &SharedSubApp,
        pools: &WorkerPools,
        tx: &flume::Sender<usize>,
    ) {
        let node = &self.nodes[idx];
        let system = node.system.clone();
        let conditions = node.conditions.clone();
        let src = src.clone();
        let dst = dst.clone();
        let tx = tx.clone();

        pools.get(&node.worker).spawn(move || {
            let src_ref = src.borrow();
            let dst_ref = dst.borrow();
            if conditions
                .iter()
                .all(|condition| condition.run(&src_ref, &dst_ref))
            {
                system.run(&src_ref, &dst_ref);
            }
            drop(dst_ref);
            drop(src_ref);
            let _ = tx.send(idx);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::SubApp;
    use crate::schedule::set::SystemSet;
    use crate::system::IntoSystemDescriptor;
    use atomic_refcell::AtomicRefCell;

    fn shared() -> SharedSubApp {
        Arc::new(AtomicRefCell::new(SubApp::new()))
    }

    fn runner_with<M1, M2>(
        a: impl IntoSystemDescriptor<M1>,
        b: impl IntoSystemDescriptor<M2>,
    ) -> (SubStageRunner, usize, usize) {
        let mut runner = SubStageRunner::new("test[0]".into());
        let a = runner.add_system(a.into_descriptor());
        let b = runner.add_system(b.into_descriptor());
        (runner, a, b)
    }

    #[test]
    fn duplicate_identity_returns_existing() {
        fn noop() {}

        let mut runner = SubStageRunner::new("test[0]".into());
        let first = runner.add_system(noop.into_descriptor());
        let second = runner.add_system(noop.into_descriptor());
        assert_eq!(first, second);
        assert_eq!(runner.len(), 1);
    }

    #[test]
    fn before_resolves_to_strong_edge() {
        fn first() {}
        fn second() {}

        let (mut runner, a, b) = runner_with(first, second);
        runner.node_mut(b).unwrap().after.push(first.id());
        runner.build(&SetMap::new(), &WorkerPools::build(&[]).unwrap());

        assert_eq!(runner.nodes[a].strong_next.as_slice(), &[b]);
        assert_eq!(runner.nodes[b].strong_prev.as_slice(), &[a]);
    }

    #[test]
    fn missing_reference_is_dropped() {
        fn lonely() {}
        fn elsewhere() {}

        let mut runner = SubStageRunner::new("test[0]".into());
        let idx = runner.add_system(lonely.into_descriptor());
        runner.node_mut(idx).unwrap().after.push(elsewhere.id());
        runner.build(&SetMap::new(), &WorkerPools::build(&[]).unwrap());

        assert!(runner.nodes[idx].strong_prev.is_empty());
    }

    #[test]
    fn conflicting_systems_get_weak_edge() {
        fn writer(mut value: crate::ResMut<u32>) {
            *value += 1;
        }
        fn reader(value: crate::Res<u32>) {
            let _ = value.has_value();
        }

        let (mut runner, a, b) = runner_with(writer, reader);
        runner.build(&SetMap::new(), &WorkerPools::build(&[]).unwrap());
        runner.bake();

        assert_eq!(runner.nodes[a].weak_next.as_slice(), &[b]);
        assert!(runner.nodes[b].weak_next.is_empty());
    }

    #[test]
    fn independent_systems_stay_parallel() {
        fn a(mut value: crate::ResMut<u32>) {
            *value += 1;
        }
        fn b(mut value: crate::ResMut<i64>) {
            *value += 1;
        }

        let (mut runner, x, y) = runner_with(a, b);
        runner.build(&SetMap::new(), &WorkerPools::build(&[]).unwrap());
        runner.bake();

        assert!(runner.nodes[x].weak_next.is_empty());
        assert!(runner.nodes[y].weak_next.is_empty());
    }

    #[test]
    fn wave_run_executes_all_nodes() {
        fn add_one(mut value: crate::ResMut<u32>) {
            *value += 1;
        }
        fn double(mut value: crate::ResMut<u32>) {
            *value *= 2;
        }

        let (mut runner, a, _) = runner_with(add_one, double);
        runner.node_mut(a).unwrap().before.push(double.id());
        let pools = WorkerPools::build(&[]).unwrap();
        runner.build(&SetMap::new(), &pools);
        runner.bake();

        let app = shared();
        app.borrow_mut().insert_resource(3u32);
        for _ in 0..10 {
            runner.run(&app, &app, &pools);
        }

        // ((3 + 1) * 2 ...) applied ten times, always in declared order
        let expected = (0..10).fold(3u32, |acc, _| (acc + 1) * 2);
        assert_eq!(*app.borrow().world().resource::<u32>().unwrap(), expected);
    }

    #[test]
    fn cycles_warn_and_abandon() {
        fn a() {}
        fn b() {}

        let (mut runner, x, y) = runner_with(a, b);
        runner.node_mut(x).unwrap().after.push(b.id());
        runner.node_mut(y).unwrap().after.push(a.id());
        let pools = WorkerPools::build(&[]).unwrap();
        runner.build(&SetMap::new(), &pools);
        runner.bake();

        let app = shared();
        // Must terminate despite the user cycle
        runner.run(&app, &app, &pools);
    }

    #[test]
    fn set_order_creates_edges() {
        #[derive(Clone, Copy)]
        enum Order {
            First,
            Second,
        }
        impl crate::SystemSet for Order {
            fn index(self) -> usize {
                self as usize
            }
        }

        fn early() {}
        fn late() {}

        let (mut runner, a, b) = runner_with(late, early);
        runner.nodes[a].in_sets.push(SetId::of(Order::Second));
        runner.nodes[b].in_sets.push(SetId::of(Order::First));

        let mut sets = SetMap::new();
        sets.insert(
            std::any::TypeId::of::<Order>(),
            vec![Order::First.index(), Order::Second.index()],
        );
        runner.build(&sets, &WorkerPools::build(&[]).unwrap());

        assert_eq!(runner.nodes[b].strong_next.as_slice(), &[a]);
    }
}
