use std::collections::VecDeque;

use crate::alloc::{AllocResources, Allocate};
use crate::bp::{Btb, Gshare};
use crate::config::CoreConfig;
use crate::dep_map::DependencyMap;
use crate::exec::{ExecResources, Execute};
use crate::frontend::{FetchGate, Frontend, FrontendResources};
use crate::mem::{MemoryModel, SimpleMemory};
use crate::pool::Pool;
use crate::queue::AgingQueue;
use crate::retire::{Retire, RetireResources};
use crate::rob::{Rob, RobBank, RobLimits, RobSet};
use crate::scheduler::{AllocEntry, SchedResources, Scheduler};
use crate::trace::TraceSource;
use crate::uop::Uop;
use crate::Cycle;

/// One simulated core: a deterministic state machine advanced by exactly one
/// [`Core::run_cycle`] call per simulated cycle.
///
/// Stages run oldest-first within a cycle (execute, retire, schedule,
/// allocate, fetch), so a micro-op moves through at most one stage per cycle.
pub struct Core {
    pub core_id: usize,
    config: CoreConfig,

    pool: Pool<Uop>,
    robs: RobSet,
    alloc_queues: Vec<AgingQueue<AllocEntry>>,
    frontend: Frontend,
    allocate: Allocate,
    scheduler: Box<dyn Scheduler>,
    exec: Execute,
    retire: Retire,
    deps: DependencyMap,
    gshare: Gshare,
    btb: Btb,
    gate: FetchGate,
    mem: Box<dyn MemoryModel>,
    trace: TraceSource,

    pub stats: stats::Core,
    cycle: Cycle,

    /// Threads currently fetching on this core.
    resident: Vec<usize>,
    /// Threads waiting for a residency slot.
    pending_threads: VecDeque<usize>,
    /// Terminated threads draining their last in-flight micro-ops.
    finalizing: Vec<usize>,

    repeats_left: u64,
    done: bool,

    last_progress_cycle: Cycle,
    last_progress_count: u64,
}

fn rob_limits(config: &CoreConfig) -> RobLimits {
    RobLimits {
        rob_size: config.rob_size,
        store_buffer: config.store_buffer_size,
        load_buffer: config.load_buffer_size,
        int_regs: config.int_regfile_size,
        fp_regs: config.fp_regfile_size,
    }
}

impl Core {
    #[must_use]
    pub fn new(core_id: usize, config: CoreConfig, trace: TraceSource) -> Self {
        let mem = Box::new(SimpleMemory::new(&config.mem));
        Self::with_memory(core_id, config, trace, mem)
    }

    pub fn with_memory(
        core_id: usize,
        config: CoreConfig,
        trace: TraceSource,
        mem: Box<dyn MemoryModel>,
    ) -> Self {
        let limits = rob_limits(&config);
        let robs = if config.scheduler == crate::config::SchedulerKind::Gpu {
            RobSet::Banked(RobBank::new(config.max_threads, limits))
        } else {
            RobSet::Single(Rob::new(limits))
        };
        let alloc_queues = (0..config.num_alloc_queues)
            .map(|_| AgingQueue::new(config.alloc_queue_size, config.alloc_to_sched_latency))
            .collect();
        let mut core = Self {
            core_id,
            pool: Pool::with_capacity(config.uop_pool_size),
            robs,
            alloc_queues,
            frontend: Frontend::new(core_id, &config),
            allocate: Allocate::new(&config),
            scheduler: crate::scheduler::build(&config),
            exec: Execute::new(&config),
            retire: Retire::new(&config),
            deps: DependencyMap::new(
                config.num_reg_ids,
                config.obey_store_deps,
                config.ooo_stores,
            ),
            gshare: Gshare::new(&config.branch),
            btb: Btb::new(config.branch.btb_entries),
            gate: FetchGate::new(&config),
            mem,
            trace,
            stats: stats::Core::default(),
            cycle: 0,
            resident: Vec::new(),
            pending_threads: VecDeque::new(),
            finalizing: Vec::new(),
            repeats_left: config.trace_repeats,
            done: false,
            last_progress_cycle: 0,
            last_progress_count: 0,
            config,
        };
        core.seed_threads();
        core
    }

    /// Schedules trace threads onto the core, up to `max_threads` resident.
    fn seed_threads(&mut self) {
        self.pending_threads = (0..self.trace.num_threads()).collect();
        while self.resident.len() < self.config.max_threads {
            let Some(thread_id) = self.pending_threads.pop_front() else {
                break;
            };
            if let Some(bank) = self.robs.banked_mut() {
                bank.reserve(thread_id);
            }
            self.resident.push(thread_id);
        }
        if self.resident.is_empty() {
            self.done = true;
        }
    }

    #[must_use]
    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    /// All threads of every scheduled trace run have retired.
    #[must_use]
    pub fn done(&self) -> bool {
        self.done
    }

    #[must_use]
    pub fn instructions_retired(&self) -> u64 {
        self.retire.total_retired()
    }

    /// Advances the pipeline by one cycle.
    pub fn run_cycle(&mut self) {
        let now = self.cycle;
        self.exec.begin_cycle();

        // completions for outstanding misses
        {
            let mut res = ExecResources {
                pool: &mut self.pool,
                mem: &mut *self.mem,
                gshare: &mut self.gshare,
                btb: &mut self.btb,
                gate: &mut self.gate,
                stats: &mut self.stats,
            };
            self.exec.run_cycle(&mut res, now);
        }

        let newly_terminated = {
            let mut res = RetireResources {
                pool: &mut self.pool,
                robs: &mut self.robs,
                deps: &mut self.deps,
                stats: &mut self.stats,
            };
            self.retire.run_cycle(&mut res, now)
        };
        for thread_id in newly_terminated {
            // stop fetching immediately; the thread drains the rest
            self.resident.retain(|&tid| tid != thread_id);
            self.finalizing.push(thread_id);
        }
        self.finalize_drained_threads(now);

        {
            let mut res = SchedResources {
                pool: &mut self.pool,
                robs: &mut self.robs,
                alloc_queues: &mut self.alloc_queues,
                exec: &mut self.exec,
                mem: &mut *self.mem,
                gshare: &mut self.gshare,
                btb: &mut self.btb,
                gate: &mut self.gate,
                stats: &mut self.stats,
            };
            self.scheduler.run_cycle(&mut res, now);
        }

        {
            let mut res = AllocResources {
                pool: &mut self.pool,
                robs: &mut self.robs,
                frontend_queue: &mut self.frontend.queue,
                alloc_queues: &mut self.alloc_queues,
                btb: &mut self.btb,
                gate: &mut self.gate,
                stats: &mut self.stats,
            };
            self.allocate.run_cycle(&mut res, now);
        }

        {
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

        self.frontend.queue.advance();
        for queue in &mut self.alloc_queues {
            queue.advance();
        }
        self.stats.sim.cycles += 1;
        self.cycle += 1;

        self.check_forward_progress(now);
    }

    /// A terminated thread is finalized once nothing of it remains in the
    /// pipeline: its buffers are released and a waiting thread takes its
    /// residency slot.
    fn finalize_drained_threads(&mut self, now: Cycle) {
        let mut index = 0;
        while index < self.finalizing.len() {
            let thread_id = self.finalizing[index];
            if !self.thread_drained(thread_id) {
                index += 1;
                continue;
            }
            self.finalizing.swap_remove(index);

            self.deps.delete_thread(thread_id);
            self.frontend.reset_thread(thread_id);
            self.gate.reset_thread(thread_id);
            self.retire.reset_thread(thread_id);
            if let Some(bank) = self.robs.banked_mut() {
                bank.release(thread_id);
            }
            self.stats.sim.threads_finished += 1;
            log::debug!("cycle {now}: core_id:{} finalized thread_id:{thread_id}", self.core_id);

            if let Some(next) = self.pending_threads.pop_front() {
                if let Some(bank) = self.robs.banked_mut() {
                    bank.reserve(next);
                }
                self.resident.push(next);
            }
        }

        if self.resident.is_empty() && self.finalizing.is_empty() && !self.done {
            if self.repeats_left > 0 {
                self.repeats_left -= 1;
                self.trace.restart();
                self.stats.sim.trace_repeats += 1;
                self.seed_threads();
                log::info!(
                    "cycle {now}: core_id:{} restarting trace ({} repeats left)",
                    self.core_id,
                    self.repeats_left
                );
            } else {
                self.done = true;
            }
        }
    }

    fn thread_drained(&self, thread_id: usize) -> bool {
        let rob_empty = match &self.robs {
            RobSet::Single(rob) => rob.is_empty(),
            RobSet::Banked(bank) => !bank.has_thread(thread_id) || bank.rob(thread_id).is_empty(),
        };
        rob_empty
            && !self
                .alloc_queues
                .iter()
                .any(|queue| queue.iter().any(|entry| entry.thread_id == thread_id))
            && !self.frontend.queue.iter().any(|&id| {
                self.pool
                    .get(id)
                    .is_some_and(|uop| uop.thread_id == thread_id)
            })
    }

    /// Fatal liveness check: the modeled pipeline deadlocked if no
    /// instruction retires for the configured number of cycles.
    fn check_forward_progress(&mut self, now: Cycle) {
        if self.done {
            return;
        }
        let retired = self.retire.total_retired();
        if retired > self.last_progress_count {
            self.last_progress_count = retired;
            self.last_progress_cycle = now;
            return;
        }
        if now.saturating_sub(self.last_progress_cycle) > self.config.forward_progress_limit {
            let last_thread = self
                .retire
                .last_retired_thread()
                .map_or_else(|| "none".into(), |tid| format!("thread_id:{tid}"));
            panic!(
                "core_id:{} made no forward progress for {} cycles \
                 (cycle {now}, retired {retired}, last retired {last_thread}, \
                 {} uops in flight, {} waiting in scheduler, {} rob entries, \
                 {} memory slots free)",
                self.core_id,
                self.config.forward_progress_limit,
                self.pool.len(),
                self.scheduler.occupancy(),
                self.robs.total_entries(),
                self.mem.available_slots(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceBuilder;
    use crate::uop::UopKind;

    fn run_to_completion(core: &mut Core, max_cycles: u64) {
        while !core.done() {
            assert!(core.cycle() < max_cycles, "simulation did not converge");
            core.run_cycle();
        }
    }

    #[test]
    fn straight_line_trace_retires_everything() {
        let trace = TraceBuilder::new()
            .compute(UopKind::IntAdd, 1, &[])
            .compute(UopKind::IntAdd, 2, &[1])
            .compute(UopKind::IntMul, 3, &[2])
            .nop()
            .build();
        let mut core = Core::new(0, CoreConfig::out_of_order(), TraceSource::new(vec![trace]));
        run_to_completion(&mut core, 10_000);
        assert_eq!(core.stats.sim.instructions, 4);
        assert_eq!(core.stats.sim.threads_finished, 1);
        assert!(core.pool.is_empty());
    }

    #[test]
    fn trace_repeats_run_the_program_again() {
        let trace = TraceBuilder::new().nop().nop().build();
        let config = CoreConfig {
            trace_repeats: 2,
            ..CoreConfig::out_of_order()
        };
        let mut core = Core::new(0, config, TraceSource::new(vec![trace]));
        run_to_completion(&mut core, 10_000);
        assert_eq!(core.stats.sim.instructions, 6);
        assert_eq!(core.stats.sim.trace_repeats, 2);
        assert_eq!(core.stats.sim.threads_finished, 3);
    }

    #[test]
    fn instruction_cap_ends_the_thread_early() {
        let mut builder = TraceBuilder::new();
        for _ in 0..100 {
            builder.nop();
        }
        let config = CoreConfig {
            max_insts: 10,
            ..CoreConfig::out_of_order()
        };
        let mut core = Core::new(0, config, TraceSource::new(vec![builder.build()]));
        run_to_completion(&mut core, 10_000);
        assert_eq!(core.stats.sim.instructions, 10);
    }

    #[test]
    #[should_panic(expected = "no forward progress")]
    fn deadlock_aborts_with_diagnostics() {
        // no request slots at all: the load miss can never be accepted
        let trace = TraceBuilder::new().load(1, 0x8000, 4).build();
        let config = CoreConfig {
            forward_progress_limit: 100,
            mem: crate::config::MemoryConfig {
                num_request_slots: 0,
                ..crate::config::MemoryConfig::default()
            },
            ..CoreConfig::out_of_order()
        };
        let mut core = Core::new(0, config, TraceSource::new(vec![trace]));
        for _ in 0..10_000 {
            core.run_cycle();
        }
    }
}
