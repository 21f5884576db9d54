use super::{AllocEntry, SchedResources, Scheduler};
use crate::bp::{Btb, Gshare};
use crate::config::{CoreConfig, SchedulerKind};
use crate::exec::Execute;
use crate::frontend::FetchGate;
use crate::mem::SimpleMemory;
use crate::pool::{Pool, UopId};
use crate::queue::AgingQueue;
use crate::rob::{Rob, RobBank, RobLimits, RobSet};
use crate::uop::{DepKind, SrcInfo, Uop, UopState};
use crate::Cycle;

/// Shared rig for exercising a scheduler policy in isolation: micro-ops are
/// injected directly into the reorder buffer and allocation queues, skipping
/// fetch and allocate.
pub struct SchedHarness {
    pub pool: Pool<Uop>,
    pub robs: RobSet,
    pub alloc_queues: Vec<AgingQueue<AllocEntry>>,
    pub exec: Execute,
    pub mem: SimpleMemory,
    pub gshare: Gshare,
    pub btb: Btb,
    pub gate: FetchGate,
    pub stats: stats::Core,
    pub scheduler: Box<dyn Scheduler>,
    seq: u64,
    single_queue: bool,
}

impl SchedHarness {
    pub fn new(config: &CoreConfig) -> Self {
        let limits = RobLimits {
            rob_size: config.rob_size,
            store_buffer: config.store_buffer_size,
            load_buffer: config.load_buffer_size,
            int_regs: config.int_regfile_size,
            fp_regs: config.fp_regfile_size,
        };
        let robs = match config.scheduler {
            SchedulerKind::Gpu => RobSet::Banked(RobBank::new(config.max_threads, limits)),
            _ => RobSet::Single(Rob::new(limits)),
        };
        let alloc_queues = (0..config.num_alloc_queues)
            .map(|_| AgingQueue::new(config.alloc_queue_size, config.alloc_to_sched_latency))
            .collect();
        Self {
            pool: Pool::with_capacity(config.uop_pool_size),
            robs,
            alloc_queues,
            exec: Execute::new(config),
            mem: SimpleMemory::new(&config.mem),
            gshare: Gshare::new(&config.branch),
            btb: Btb::new(config.branch.btb_entries),
            gate: FetchGate::new(config),
            stats: stats::Core::default(),
            scheduler: super::build(config),
            seq: 0,
            single_queue: config.num_alloc_queues == 1,
        }
    }

    fn ensure_thread(&mut self, thread_id: usize) {
        if let Some(bank) = self.robs.banked_mut() {
            if !bank.has_thread(thread_id) {
                bank.reserve(thread_id);
            }
        }
    }

    /// Injects an allocated micro-op, ready to be admitted next cycle.
    pub fn insert(&mut self, thread_id: usize, configure: impl FnOnce(&mut Uop)) -> UopId {
        self.insert_inner(thread_id, None, configure)
    }

    /// Same, with a register dependence on an earlier injected micro-op.
    pub fn insert_dependent(
        &mut self,
        thread_id: usize,
        producer: UopId,
        configure: impl FnOnce(&mut Uop),
    ) -> UopId {
        self.insert_inner(thread_id, Some(producer), configure)
    }

    fn insert_inner(
        &mut self,
        thread_id: usize,
        producer: Option<UopId>,
        configure: impl FnOnce(&mut Uop),
    ) -> UopId {
        self.ensure_thread(thread_id);
        self.seq += 1;
        let producer = producer.map(|id| {
            let uop = self.pool.get(id).expect("dependence on a freed uop");
            (id, uop.uop_num)
        });
        let id = self.pool.alloc();
        {
            let uop = self.pool.get_mut(id).unwrap();
            uop.reset();
            uop.uop_num = self.seq;
            uop.thread_id = thread_id;
            uop.first_of_inst = true;
            uop.last_of_inst = true;
            uop.state = UopState::Allocated;
            uop.in_alloc_queue = true;
            configure(uop);
            if let Some((producer_id, uop_num)) = producer {
                uop.srcs.push(SrcInfo {
                    kind: DepKind::RegData,
                    producer: producer_id,
                    uop_num,
                });
                uop.srcs_ready = false;
            }
        }

        let rob = self.robs.rob_mut(thread_id);
        let rob_index = rob.tail_index();
        rob.push(id);
        let queue = {
            let uop = self.pool.get_mut(id).unwrap();
            uop.rob_entry = rob_index;
            uop.queue
        };
        let queue_index = if self.single_queue { 0 } else { queue as usize };
        self.alloc_queues[queue_index].enqueue(AllocEntry {
            thread_id,
            rob_index,
        });
        id
    }

    /// One scheduler cycle at `now`: ages the allocation queues, resets issue
    /// ports, and runs the policy.
    pub fn step(&mut self, now: Cycle) {
        for queue in &mut self.alloc_queues {
            queue.advance();
        }
        self.exec.begin_cycle();
        let mut res = SchedResources {
            pool: &mut self.pool,
            robs: &mut self.robs,
            alloc_queues: &mut self.alloc_queues,
            exec: &mut self.exec,
            mem: &mut self.mem,
            gshare: &mut self.gshare,
            btb: &mut self.btb,
            gate: &mut self.gate,
            stats: &mut self.stats,
        };
        self.scheduler.run_cycle(&mut res, now);
    }
}
