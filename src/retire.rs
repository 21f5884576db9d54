use std::collections::{HashMap, HashSet};

use crate::config::CoreConfig;
use crate::dep_map::DependencyMap;
use crate::pool::{Pool, UopId};
use crate::rob::RobSet;
use crate::uop::Uop;
use crate::Cycle;

/// Everything the retire stage touches.
pub struct RetireResources<'a> {
    pub pool: &'a mut Pool<Uop>,
    pub robs: &'a mut RobSet,
    pub deps: &'a mut DependencyMap,
    pub stats: &'a mut stats::Core,
}

/// Retire stage: drains completed micro-ops from the reorder buffer head in
/// program order, releases the resources claimed at allocate, and detects
/// thread termination.
#[derive(Debug)]
pub struct Retire {
    width: usize,
    max_insts: u64,
    insts_retired: HashMap<usize, u64>,
    total_retired: u64,
    last_retired_thread: Option<usize>,
    terminated: HashSet<usize>,
}

impl Retire {
    #[must_use]
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            width: config.width,
            max_insts: config.max_insts,
            insts_retired: HashMap::new(),
            total_retired: 0,
            last_retired_thread: None,
            terminated: HashSet::new(),
        }
    }

    /// Instructions retired across all threads since construction.
    #[must_use]
    pub fn total_retired(&self) -> u64 {
        self.total_retired
    }

    #[must_use]
    pub fn insts_retired(&self, thread_id: usize) -> u64 {
        self.insts_retired.get(&thread_id).copied().unwrap_or(0)
    }

    /// The thread that most recently retired a micro-op, for deadlock
    /// diagnostics.
    #[must_use]
    pub fn last_retired_thread(&self) -> Option<usize> {
        self.last_retired_thread
    }

    /// The thread has retired its last micro-op (or hit the instruction cap)
    /// and must not fetch any further.
    #[must_use]
    pub fn is_terminated(&self, thread_id: usize) -> bool {
        self.terminated.contains(&thread_id)
    }

    /// Clears per-thread counters once the core finalizes the thread.
    pub fn reset_thread(&mut self, thread_id: usize) {
        self.insts_retired.remove(&thread_id);
        self.terminated.remove(&thread_id);
    }

    /// Retires up to `width` micro-ops. Returns threads that terminated this
    /// cycle.
    pub fn run_cycle(&mut self, res: &mut RetireResources, now: Cycle) -> Vec<usize> {
        let mut newly_terminated = Vec::new();
        // deterministic global order across per-thread buffers
        let ready = {
            let pool = &*res.pool;
            res.robs
                .banked()
                .map(|bank| bank.ready_order(self.width, now, pool))
        };
        if let Some(ready) = ready {
            for id in ready {
                self.retire_uop(res, now, id, &mut newly_terminated);
            }
        } else {
            for _ in 0..self.width {
                let Some(id) = res.robs.rob(0).front() else {
                    break;
                };
                let uop = res.pool.get(id).expect("rob head not in pool");
                if uop.done_cycle == 0 || uop.done_cycle > now {
                    break;
                }
                self.retire_uop(res, now, id, &mut newly_terminated);
            }
        }
        newly_terminated
    }

    fn retire_uop(
        &mut self,
        res: &mut RetireResources,
        now: Cycle,
        id: UopId,
        newly_terminated: &mut Vec<usize>,
    ) {
        let snapshot = res.pool.get(id).expect("retiring uop not in pool").clone();
        let thread_id = snapshot.thread_id;
        self.last_retired_thread = Some(thread_id);

        let rob = res.robs.rob_mut(thread_id);
        debug_assert_eq!(rob.front(), Some(id), "retire from a non-head rob slot");
        rob.pop();
        if snapshot.req_sb {
            rob.dealloc_sb();
        }
        if snapshot.req_lb {
            rob.dealloc_lb();
        }
        if snapshot.req_int_reg {
            rob.dealloc_int_reg();
        }
        if snapshot.req_fp_reg {
            rob.dealloc_fp_reg();
        }

        if snapshot.mem.is_store() {
            res.deps.delete_store_hash_entry(&snapshot);
        }

        res.stats.sim.uops += 1;
        // a thread past its instruction cap drains without counting
        if snapshot.first_of_inst && !snapshot.bogus && !self.terminated.contains(&thread_id) {
            *self.insts_retired.entry(thread_id).or_default() += 1;
            self.total_retired += 1;
            res.stats.sim.instructions += 1;
        }

        let capped = self.insts_retired(thread_id) >= self.max_insts;
        if (snapshot.last_of_thread || capped) && self.terminated.insert(thread_id) {
            log::debug!("cycle {now}: thread_id:{thread_id} terminated");
            newly_terminated.push(thread_id);
        }

        for &child in &snapshot.child_uops {
            if res.pool.contains(child) {
                res.pool.free(child);
            }
        }
        res.pool.free(id);
        log::trace!("cycle {now}: retired {snapshot}");
    }
}
