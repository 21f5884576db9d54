use crate::bp::Btb;
use crate::config::CoreConfig;
use crate::frontend::FetchGate;
use crate::pool::{Pool, UopId};
use crate::queue::AgingQueue;
use crate::rob::RobSet;
use crate::scheduler::AllocEntry;
use crate::uop::{QueueKind, Uop, UopKind, UopState};
use crate::Cycle;

/// Everything the allocate stage touches.
pub struct AllocResources<'a> {
    pub pool: &'a mut Pool<Uop>,
    pub robs: &'a mut RobSet,
    pub frontend_queue: &'a mut AgingQueue<UopId>,
    pub alloc_queues: &'a mut [AgingQueue<AllocEntry>],
    pub btb: &'a mut Btb,
    pub gate: &'a mut FetchGate,
    pub stats: &'a mut stats::Core,
}

/// Allocate stage: claims a reorder-buffer slot, an allocation-queue slot,
/// and the micro-op's buffer/register resources, all-or-nothing.
///
/// Strictly head-blocking: only the oldest frontend entry is considered, so
/// one blocked micro-op stalls allocation entirely.
#[derive(Debug)]
pub struct Allocate {
    width: usize,
    single_queue: bool,
    extra_recovery_cycles: Cycle,
}

fn category(uop: &Uop) -> QueueKind {
    if matches!(
        uop.kind,
        UopKind::FpAdd | UopKind::FpMul | UopKind::FpDiv | UopKind::FpCvt | UopKind::FpCmp
    ) {
        QueueKind::Float
    } else if uop.mem.is_mem() {
        QueueKind::Memory
    } else {
        QueueKind::General
    }
}

impl Allocate {
    #[must_use]
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            width: config.width,
            single_queue: config.num_alloc_queues == 1,
            extra_recovery_cycles: config.branch.extra_recovery_cycles,
        }
    }

    pub fn run_cycle(&mut self, res: &mut AllocResources, now: Cycle) {
        for _ in 0..self.width {
            let Some(&id) = res.frontend_queue.ready_front() else {
                break;
            };
            let (thread_id, queue, req_sb, req_lb, req_int, req_fp) = {
                let uop = res.pool.get(id).expect("frontend queue entry not in pool");
                (
                    uop.thread_id,
                    category(uop),
                    uop.mem.is_store(),
                    uop.mem.is_load(),
                    uop.produces_int_reg(),
                    uop.produces_fp_reg(),
                )
            };
            let queue_index = if self.single_queue { 0 } else { queue as usize };

            // every required resource must be available at once, otherwise
            // nothing is claimed and allocation stops for this cycle
            let rob = res.robs.rob(thread_id);
            let available = rob.space() > 0
                && res.alloc_queues[queue_index].space() > 0
                && (!req_sb || rob.num_sb() > 0)
                && (!req_lb || rob.num_lb() > 0)
                && (!req_int || rob.num_int_regs() > 0)
                && (!req_fp || rob.num_fp_regs() > 0);
            if !available {
                break;
            }

            let rob = res.robs.rob_mut(thread_id);
            if req_sb {
                rob.alloc_sb();
            }
            if req_lb {
                rob.alloc_lb();
            }
            if req_int {
                rob.alloc_int_reg();
            }
            if req_fp {
                rob.alloc_fp_reg();
            }
            let rob_index = rob.tail_index();
            rob.push(id);

            {
                let uop = res.pool.get_mut(id).expect("frontend queue entry not in pool");
                uop.rob_entry = rob_index;
                uop.queue = queue;
                uop.state = UopState::Allocated;
                uop.alloc_cycle = now;
                uop.in_alloc_queue = true;
                uop.req_sb = req_sb;
                uop.req_lb = req_lb;
                uop.req_int_reg = req_int;
                uop.req_fp_reg = req_fp;
            }
            res.alloc_queues[queue_index].enqueue(AllocEntry {
                thread_id,
                rob_index,
            });
            res.frontend_queue.dequeue();

            self.resolve_btb_miss(res, now, id);
        }
    }

    /// Direct branches know their target once decoded: a pending
    /// target-buffer miss is resolved here instead of waiting for execute.
    fn resolve_btb_miss(&self, res: &mut AllocResources, now: Cycle, id: UopId) {
        let uop = res.pool.get_mut(id).expect("allocated uop not in pool");
        if !uop.cf.is_cf()
            || uop.cf.is_indirect()
            || !uop.branch_info.btb_miss
            || uop.branch_info.btb_miss_resolved
        {
            return;
        }
        uop.branch_info.btb_miss_resolved = true;
        let (thread_id, pc, npc) = (uop.thread_id, uop.pc, uop.npc);
        res.btb.update(pc, npc);
        res.gate
            .set_redirect(thread_id, now + 1 + self.extra_recovery_cycles);
        res.stats.branch.redirects_resolved += 1;
    }
}
