use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;

/// Name of the pool systems run on unless rebound
pub const DEFAULT_WORKER: &str = "default";
/// Name of the built-in one-thread pool
pub const SINGLE_WORKER: &str = "single";

/// The named worker pools systems are dispatched onto. Owned by the runner
/// for the runner's lifetime.
pub(crate) struct WorkerPools {
    pools: BTreeMap<String, Arc<rayon::ThreadPool>>,
}

impl WorkerPools {
    /// Materialize the built-in pools plus every user declaration.
    pub fn build(declarations: &[(String, usize)]) -> anyhow::Result<Self> {
        let mut pools = Self {
            pools: BTreeMap::new(),
        };
        pools.add(DEFAULT_WORKER, default_worker_count())?;
        pools.add(SINGLE_WORKER, 1)?;
        for (name, threads) in declarations {
            pools.add(name, *threads)?;
        }
        Ok(pools)
    }

    fn add(&mut self, name: &str, threads: usize) -> anyhow::Result<()> {
        let threads = threads.max(1);
        let worker_name = name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{worker_name}-{i}"))
            .build()
            .with_context(|| format!("Failed to build worker pool {name}"))?;

        self.pools.insert(name.into(), Arc::new(pool));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    /// The pool registered under `name`, falling back to the default pool.
    pub fn get(&self, name: &str) -> &Arc<rayon::ThreadPool> {
        self.pools
            .get(name)
            .or_else(|| self.pools.get(DEFAULT_WORKER))
            .expect("default pool always exists")
    }
}

/// min(max(hardware threads, 4), 16)
fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|v| v.get())
        .unwrap_or(4)
        .clamp(4, 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_defaults_and_declarations() {
        let pools = WorkerPools::build(&[("compute".into(), 2)]).unwrap();
        assert!(pools.contains(DEFAULT_WORKER));
        assert!(pools.contains(SINGLE_WORKER));
        assert!(pools.contains("compute"));
        assert_eq!(pools.get("compute").current_num_threads(), 2);
        assert_eq!(pools.get(SINGLE_WORKER).current_num_threads(), 1);
    }

    #[test]
    fn unknown_name_falls_back_to_default() {
        let pools = WorkerPools::build(&[]).unwrap();
        let default = Arc::as_ptr(pools.get(DEFAULT_WORKER));
        assert_eq!(Arc::as_ptr(pools.get("missing")), default);
    }

    #[test]
    fn zero_threads_clamps_to_one() {
        let pools = WorkerPools::build(&[("tiny".into(), 0)]).unwrap();
        assert_eq!(pools.get("tiny").current_num_threads(), 1);
    }
}
