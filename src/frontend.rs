use std::collections::HashMap;

use crate::bp::{Btb, Gshare};
use crate::config::CoreConfig;
use crate::dep_map::DependencyMap;
use crate::pool::{Pool, UopId};
use crate::queue::AgingQueue;
use crate::trace::TraceSource;
use crate::uop::{Uop, UopKind};
use crate::Cycle;

/// Per-thread fetch gating.
///
/// A thread stops fetching while a misprediction recovery or a target-buffer
/// redirect is outstanding. The sentinel `Cycle::MAX` blocks until the
/// execute stage resolves the branch and installs the real resume cycle.
/// The GPU shape additionally stalls a thread behind an unresolved branch or
/// an outstanding load.
#[derive(Debug)]
pub struct FetchGate {
    recovery_cycle: Vec<Cycle>,
    redirect_cycle: Vec<Cycle>,
    br_wait: Vec<bool>,
    load_wait: Vec<bool>,
    no_fetch_on_branch: bool,
    fetch_only_load_ready: bool,
}

impl FetchGate {
    #[must_use]
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            recovery_cycle: Vec::new(),
            redirect_cycle: Vec::new(),
            br_wait: Vec::new(),
            load_wait: Vec::new(),
            no_fetch_on_branch: config.no_fetch_on_branch,
            fetch_only_load_ready: config.fetch_only_load_ready,
        }
    }

    fn ensure(&mut self, thread_id: usize) {
        if thread_id >= self.recovery_cycle.len() {
            self.recovery_cycle.resize(thread_id + 1, 0);
            self.redirect_cycle.resize(thread_id + 1, 0);
            self.br_wait.resize(thread_id + 1, false);
            self.load_wait.resize(thread_id + 1, false);
        }
    }

    #[must_use]
    pub fn can_fetch(&self, thread_id: usize, now: Cycle) -> bool {
        self.recovery_cycle.get(thread_id).copied().unwrap_or(0) <= now
            && self.redirect_cycle.get(thread_id).copied().unwrap_or(0) <= now
            && !self.br_wait.get(thread_id).copied().unwrap_or(false)
            && !self.load_wait.get(thread_id).copied().unwrap_or(false)
    }

    /// Blocks fetch until the misprediction resolves at execute.
    pub fn block_recovery(&mut self, thread_id: usize) {
        self.ensure(thread_id);
        self.recovery_cycle[thread_id] = Cycle::MAX;
    }

    pub fn set_recovery(&mut self, thread_id: usize, cycle: Cycle) {
        self.ensure(thread_id);
        self.recovery_cycle[thread_id] = cycle;
    }

    /// Blocks fetch until the target-buffer miss resolves.
    pub fn block_redirect(&mut self, thread_id: usize) {
        self.ensure(thread_id);
        self.redirect_cycle[thread_id] = Cycle::MAX;
    }

    pub fn set_redirect(&mut self, thread_id: usize, cycle: Cycle) {
        self.ensure(thread_id);
        self.redirect_cycle[thread_id] = cycle;
    }

    pub fn block_branch(&mut self, thread_id: usize) {
        if self.no_fetch_on_branch {
            self.ensure(thread_id);
            self.br_wait[thread_id] = true;
        }
    }

    pub fn set_br_ready(&mut self, thread_id: usize) {
        if thread_id < self.br_wait.len() {
            self.br_wait[thread_id] = false;
        }
    }

    pub fn block_load(&mut self, thread_id: usize) {
        if self.fetch_only_load_ready {
            self.ensure(thread_id);
            self.load_wait[thread_id] = true;
        }
    }

    pub fn set_load_ready(&mut self, thread_id: usize) {
        if thread_id < self.load_wait.len() {
            self.load_wait[thread_id] = false;
        }
    }

    pub fn reset_thread(&mut self, thread_id: usize) {
        self.ensure(thread_id);
        self.recovery_cycle[thread_id] = 0;
        self.redirect_cycle[thread_id] = 0;
        self.br_wait[thread_id] = false;
        self.load_wait[thread_id] = false;
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct ThreadCounters {
    uop_num: u64,
    inst_num: u64,
}

/// Everything fetch touches outside the frontend's own queue.
pub struct FrontendResources<'a> {
    pub pool: &'a mut Pool<Uop>,
    pub trace: &'a mut TraceSource,
    pub deps: &'a mut DependencyMap,
    pub gshare: &'a mut Gshare,
    pub btb: &'a mut Btb,
    pub gate: &'a mut FetchGate,
    /// Threads currently resident on the core, in schedule order.
    pub resident: &'a [usize],
    pub stats: &'a mut stats::Core,
}

/// Frontend: pulls decoded micro-ops from the trace, runs branch prediction,
/// maps dependences, and feeds the fetch queue that allocate drains.
pub struct Frontend {
    pub queue: AgingQueue<UopId>,
    width: usize,
    core_id: usize,
    line_shift: u32,
    counters: HashMap<usize, ThreadCounters>,
    next_thread: usize,
}

impl Frontend {
    #[must_use]
    pub fn new(core_id: usize, config: &CoreConfig) -> Self {
        Self {
            queue: AgingQueue::new(config.frontend_queue_size, config.fetch_latency),
            width: config.width,
            core_id,
            line_shift: config.mem.line_size.trailing_zeros(),
            counters: HashMap::new(),
            next_thread: 0,
        }
    }

    /// Fetches up to `width` micro-ops, round-robin over resident threads.
    pub fn run_cycle(&mut self, res: &mut FrontendResources, now: Cycle) {
        let num_resident = res.resident.len();
        if num_resident == 0 {
            return;
        }
        let mut fetched = 0;
        for step in 0..num_resident {
            let thread_id = res.resident[(self.next_thread + step) % num_resident];
            while fetched < self.width && !self.queue.full() {
                if !res.gate.can_fetch(thread_id, now) || res.trace.exhausted(thread_id) {
                    break;
                }
                self.fetch_uop(res, thread_id);
                fetched += 1;
            }
            if fetched >= self.width || self.queue.full() {
                break;
            }
        }
        self.next_thread = (self.next_thread + 1) % num_resident;
    }

    fn fetch_uop(&mut self, res: &mut FrontendResources, thread_id: usize) {
        let decoded = res
            .trace
            .next(thread_id)
            .expect("fetch from an exhausted thread");
        let counters = self.counters.entry(thread_id).or_default();
        counters.uop_num += 1;
        if decoded.first_of_inst {
            counters.inst_num += 1;
        }
        let (uop_num, inst_num) = (counters.uop_num, counters.inst_num);
        let last_of_thread = res.trace.exhausted(thread_id);

        let id = res.pool.alloc();
        {
            let uop = res.pool.get_mut(id).expect("freshly allocated uop");
            uop.reset();
            uop.uop_num = uop_num;
            uop.inst_num = inst_num;
            uop.thread_id = thread_id;
            uop.core_id = self.core_id;
            uop.pc = decoded.pc;
            uop.npc = decoded.npc;
            uop.kind = decoded.kind;
            uop.cf = decoded.cf;
            uop.mem = decoded.mem;
            uop.vaddr = decoded.vaddr;
            uop.mem_size = decoded.mem_size;
            uop.dir = decoded.dir;
            uop.src_regs = decoded.src_regs;
            uop.dests = decoded.dests;
            uop.first_of_inst = decoded.first_of_inst;
            uop.last_of_inst = decoded.last_of_inst;
            uop.last_of_thread = last_of_thread;
        }

        self.predict_branch(res, id, thread_id);
        self.split_mem_access(res, id);

        {
            let uop = res.pool.get_mut(id).expect("freshly allocated uop");
            if uop.mem.is_load() {
                res.gate.block_load(thread_id);
            }
            res.deps.map_uop(id, uop);
        }
        // map_mem_dep re-borrows, the map and the pool are disjoint
        {
            let uop = res.pool.get_mut(id).expect("freshly allocated uop");
            res.deps.map_mem_dep(id, uop, &mut res.stats.mem);
            log::trace!("fetched {uop}");
        }
        self.queue.enqueue(id);
    }

    fn predict_branch(&mut self, res: &mut FrontendResources, id: UopId, thread_id: usize) {
        let uop = res.pool.get_mut(id).expect("freshly allocated uop");
        if !uop.cf.is_cf() {
            return;
        }
        uop.branch_info.btb_miss = res.btb.access(uop.pc) != Some(uop.npc);
        if uop.branch_info.btb_miss {
            res.stats.branch.btb_misses += 1;
        }
        if uop.cf.is_conditional() {
            let pred = res.gshare.predict(uop);
            uop.mispredicted = pred != uop.dir;
            res.stats.branch.predictions += 1;
            if uop.mispredicted {
                res.stats.branch.mispredictions += 1;
            }
        }
        if uop.mispredicted {
            res.gate.block_recovery(thread_id);
        } else if uop.branch_info.btb_miss {
            res.gate.block_redirect(thread_id);
        }
        res.gate.block_branch(thread_id);
    }

    /// Splits a memory access crossing cache-line boundaries into one child
    /// micro-op per touched line.
    fn split_mem_access(&mut self, res: &mut FrontendResources, id: UopId) {
        let (mem, vaddr, size, thread_id, uop_num) = {
            let uop = res.pool.get(id).expect("freshly allocated uop");
            (
                uop.mem,
                uop.vaddr,
                u64::from(uop.mem_size),
                uop.thread_id,
                uop.uop_num,
            )
        };
        if !mem.is_mem() || size == 0 {
            return;
        }
        let first_line = vaddr >> self.line_shift;
        let last_line = (vaddr + size - 1) >> self.line_shift;
        if first_line == last_line {
            return;
        }
        let num_children = (last_line - first_line + 1) as usize;
        assert!(num_children <= 64, "memory access spans too many lines");

        let mut children = Vec::with_capacity(num_children);
        for line in first_line..=last_line {
            let seg_start = vaddr.max(line << self.line_shift);
            let seg_end = (vaddr + size).min((line + 1) << self.line_shift);
            let child_id = res.pool.alloc();
            let child = res.pool.get_mut(child_id).expect("freshly allocated uop");
            child.reset();
            child.uop_num = uop_num;
            child.thread_id = thread_id;
            child.core_id = self.core_id;
            child.kind = UopKind::Mem;
            child.mem = mem;
            child.vaddr = seg_start;
            child.mem_size = (seg_end - seg_start) as u8;
            child.parent = id;
            children.push(child_id);
        }

        let uop = res.pool.get_mut(id).expect("freshly allocated uop");
        uop.num_child_uops = num_children;
        // one bit per child; num_children may be exactly 64
        uop.pending_child_uops = u64::MAX >> (64 - num_children as u32);
        uop.child_uops = children;
    }

    /// Clears per-thread sequence counters for a fresh run of the trace.
    pub fn reset_thread(&mut self, thread_id: usize) {
        self.counters.remove(&thread_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceBuilder;
    use crate::uop::DepKind;

    struct Harness {
        pool: Pool<Uop>,
        trace: TraceSource,
        deps: DependencyMap,
        gshare: Gshare,
        btb: Btb,
        gate: FetchGate,
        stats: stats::Core,
        frontend: Frontend,
        resident: Vec<usize>,
    }

    impl Harness {
        fn new(config: &CoreConfig, trace: TraceSource) -> Self {
            let resident = (0..trace.num_threads().min(config.max_threads)).collect();
            Self {
                pool: Pool::with_capacity(config.uop_pool_size),
                trace,
                deps: DependencyMap::new(
                    config.num_reg_ids,
                    config.obey_store_deps,
                    config.ooo_stores,
                ),
                gshare: Gshare::new(&config.branch),
                btb: Btb::new(config.branch.btb_entries),
                gate: FetchGate::new(config),
                stats: stats::Core::default(),
                frontend: Frontend::new(0, config),
                resident,
            }
        }

        fn run_cycle(&mut self, now: Cycle) {
            let mut res = FrontendResources {
                pool: &mut self.pool,
                trace: &mut self.trace,
                deps: &mut self.deps,
                gshare: &mut self.gshare,
                btb: &mut self.btb,
                gate: &mut self.gate,
                resident: &self.resident,
                stats: &mut self.stats,
            };
            self.frontend.run_cycle(&mut res, now);
        }
    }

    #[test]
    fn fetch_maps_register_dependences() {
        let trace = TraceBuilder::new()
            .compute(UopKind::IntAdd, 1, &[])
            .compute(UopKind::IntAdd, 2, &[1])
            .build();
        let config = CoreConfig::out_of_order();
        let mut h = Harness::new(&config, TraceSource::new(vec![trace]));

        h.run_cycle(0);
        assert_eq!(h.frontend.queue.len(), 2);

        let ids: Vec<UopId> = h.frontend.queue.iter().copied().collect();
        let producer = h.pool.get(ids[0]).unwrap();
        let consumer = h.pool.get(ids[1]).unwrap();
        assert_eq!(producer.uop_num, 1);
        assert_eq!(consumer.srcs.len(), 1);
        assert_eq!(consumer.srcs[0].kind, DepKind::RegData);
        assert_eq!(consumer.srcs[0].producer, ids[0]);
        assert!(consumer.last_of_thread);
    }

    #[test]
    fn misprediction_blocks_fetch_behind_the_branch() {
        // weakly-taken counters predict taken, the trace resolves not-taken
        let trace = TraceBuilder::new().branch(false, 0x9000).nop().build();
        let config = CoreConfig::out_of_order();
        let mut h = Harness::new(&config, TraceSource::new(vec![trace]));

        h.run_cycle(0);
        assert_eq!(h.frontend.queue.len(), 1);
        assert_eq!(h.stats.branch.mispredictions, 1);
        assert!(!h.gate.can_fetch(0, 1_000_000));

        // the resume cycle set at branch resolution reopens fetch
        h.gate.set_recovery(0, 5);
        h.run_cycle(5);
        assert_eq!(h.frontend.queue.len(), 2);
    }

    #[test]
    fn line_crossing_load_fans_out_into_children() {
        let trace = TraceBuilder::new().load(1, 0x103c, 8).build();
        let config = CoreConfig::out_of_order();
        let mut h = Harness::new(&config, TraceSource::new(vec![trace]));

        h.run_cycle(0);
        let ids: Vec<UopId> = h.frontend.queue.iter().copied().collect();
        let parent = h.pool.get(ids[0]).unwrap();
        assert_eq!(parent.num_child_uops, 2);
        assert_eq!(parent.pending_child_uops, 0b11);
        let first = h.pool.get(parent.child_uops[0]).unwrap();
        let second = h.pool.get(parent.child_uops[1]).unwrap();
        assert_eq!((first.vaddr, first.mem_size), (0x103c, 4));
        assert_eq!((second.vaddr, second.mem_size), (0x1040, 4));
        assert_eq!(first.parent, ids[0]);
    }

    #[test]
    fn sixty_four_line_span_fills_the_child_mask() {
        // 255 bytes over 4-byte lines touches exactly 64 lines
        let trace = TraceBuilder::new().load(1, 0x2000, 255).build();
        let config = CoreConfig {
            mem: crate::config::MemoryConfig {
                line_size: 4,
                ..crate::config::MemoryConfig::default()
            },
            ..CoreConfig::out_of_order()
        };
        let mut h = Harness::new(&config, TraceSource::new(vec![trace]));

        h.run_cycle(0);
        let ids: Vec<UopId> = h.frontend.queue.iter().copied().collect();
        let parent = h.pool.get(ids[0]).unwrap();
        assert_eq!(parent.num_child_uops, 64);
        assert_eq!(parent.pending_child_uops, u64::MAX);
        let last = h.pool.get(parent.child_uops[63]).unwrap();
        assert_eq!((last.vaddr, last.mem_size), (0x20fc, 3));
    }

    #[test]
    fn gpu_gate_stalls_loads_until_ready() {
        let trace = TraceBuilder::new().load(1, 0x100, 4).nop().build();
        let config = CoreConfig::gpu();
        let mut h = Harness::new(&config, TraceSource::new(vec![trace]));

        h.run_cycle(0);
        assert_eq!(h.frontend.queue.len(), 1);
        assert!(!h.gate.can_fetch(0, 1));

        h.gate.set_load_ready(0);
        h.run_cycle(1);
        assert_eq!(h.frontend.queue.len(), 2);
    }

    #[test]
    fn width_is_shared_round_robin_across_threads() {
        let thread = TraceBuilder::new().nop().nop().nop().nop().build();
        let config = CoreConfig {
            width: 4,
            ..CoreConfig::gpu()
        };
        let mut h = Harness::new(
            &config,
            TraceSource::new(vec![thread.clone(), thread.clone(), thread]),
        );

        h.run_cycle(0);
        let fetched: Vec<usize> = h
            .frontend
            .queue
            .iter()
            .map(|id| h.pool.get(*id).unwrap().thread_id)
            .collect();
        assert_eq!(fetched.len(), 4);
        // thread 0 drains first, the rotation point moves next cycle
        assert_eq!(fetched, vec![0, 0, 0, 0]);

        h.run_cycle(1);
        let second: Vec<usize> = h
            .frontend
            .queue
            .iter()
            .skip(4)
            .map(|id| h.pool.get(*id).unwrap().thread_id)
            .collect();
        assert_eq!(second, vec![1, 1, 1, 1]);
    }
}
