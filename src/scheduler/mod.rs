pub mod gpu;
pub mod inorder;
pub mod ooo;
#[cfg(test)]
pub mod testing;

use crate::config::{CoreConfig, SchedulerKind};
use crate::exec::{ExecResources, Execute};
use crate::mem::MemoryModel;
use crate::pool::{Pool, UopId};
use crate::queue::AgingQueue;
use crate::rob::RobSet;
use crate::uop::{MemKind, Uop, NUM_QUEUE_KINDS};
use crate::Cycle;

/// Why a schedule attempt failed this cycle. Reported, not fatal: the entry
/// is retried until it issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum SchedFailure {
    OperandsNotReady,
    NoPorts,
    /// No free memory-request slot for a constant/texture load.
    NoMemSlots,
    /// The memory hierarchy refused the access itself.
    MemoryStalled,
}

/// One allocation-queue entry: a reorder-buffer slot awaiting schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocEntry {
    pub thread_id: usize,
    pub rob_index: usize,
}

/// Everything the schedule stage touches.
pub struct SchedResources<'a> {
    pub pool: &'a mut Pool<Uop>,
    pub robs: &'a mut RobSet,
    pub alloc_queues: &'a mut [AgingQueue<AllocEntry>],
    pub exec: &'a mut Execute,
    pub mem: &'a mut dyn MemoryModel,
    pub gshare: &'a mut crate::bp::Gshare,
    pub btb: &'a mut crate::bp::Btb,
    pub gate: &'a mut crate::frontend::FetchGate,
    pub stats: &'a mut stats::Core,
}

impl<'a> SchedResources<'a> {
    fn exec_res(&mut self) -> (&mut Execute, ExecResources<'_>) {
        (
            &mut *self.exec,
            ExecResources {
                pool: &mut *self.pool,
                mem: &mut *self.mem,
                gshare: &mut *self.gshare,
                btb: &mut *self.btb,
                gate: &mut *self.gate,
                stats: &mut *self.stats,
            },
        )
    }
}

/// Issue policy, fixed at core construction.
pub trait Scheduler {
    fn run_cycle(&mut self, res: &mut SchedResources, now: Cycle);

    /// Live entries waiting in the policy's schedule list.
    fn occupancy(&self) -> usize;
}

#[must_use]
pub fn build(config: &CoreConfig) -> Box<dyn Scheduler> {
    match config.scheduler {
        SchedulerKind::InOrder => Box::new(inorder::InOrderScheduler::new(config)),
        SchedulerKind::OutOfOrder => Box::new(ooo::OooScheduler::new(config)),
        SchedulerKind::Gpu => Box::new(gpu::GpuScheduler::new(config)),
    }
}

/// Readiness check shared by every policy: every source's producer has
/// completed, or the reference is stale (producer already retired or
/// flushed), which counts as satisfied.
///
/// Caches the verdict on the micro-op, plus the latest known producer
/// done-cycle as a cheap early-out for the next attempt.
pub fn check_srcs(pool: &mut Pool<Uop>, now: Cycle, id: UopId) -> bool {
    let (srcs, srcs_ready, thread_id, last_dep_done) = {
        let uop = pool.get(id).expect("scheduler entry not in pool");
        (
            uop.srcs.clone(),
            uop.srcs_ready,
            uop.thread_id,
            uop.last_dep_done,
        )
    };
    if srcs_ready {
        return true;
    }
    if last_dep_done != 0 && now < last_dep_done {
        return false;
    }

    let mut ready = true;
    let mut last_done: Cycle = 0;
    let mut unknown = false;
    for src in &srcs {
        let Some(producer) = pool.get(src.producer) else {
            continue;
        };
        if producer.uop_num != src.uop_num || producer.thread_id != thread_id {
            // recycled slot, the original producer is long gone
            continue;
        }
        if producer.done_cycle == 0 {
            ready = false;
            unknown = true;
        } else if now < producer.done_cycle {
            ready = false;
            last_done = last_done.max(producer.done_cycle);
        }
    }

    let uop = pool.get_mut(id).expect("scheduler entry not in pool");
    uop.srcs_ready = ready;
    uop.last_dep_done = if unknown { 0 } else { last_done };
    ready
}

/// Bookkeeping shared by every policy: per-category occupancy and admission
/// rate, plus the single schedule attempt.
#[derive(Debug)]
pub struct SchedulerBase {
    sched_size: [usize; NUM_QUEUE_KINDS],
    sched_rate: [usize; NUM_QUEUE_KINDS],
    num_per_sched: [usize; NUM_QUEUE_KINDS],
    num_in_sched: usize,
    rate_used: [usize; NUM_QUEUE_KINDS],
}

impl SchedulerBase {
    #[must_use]
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            sched_size: config.sched_size,
            sched_rate: config.sched_rate,
            num_per_sched: [0; NUM_QUEUE_KINDS],
            num_in_sched: 0,
            rate_used: [0; NUM_QUEUE_KINDS],
        }
    }

    #[must_use]
    pub fn num_in_sched(&self) -> usize {
        self.num_in_sched
    }

    pub fn begin_cycle(&mut self) {
        self.rate_used = [0; NUM_QUEUE_KINDS];
    }

    /// Moves aged allocation-queue entries into the policy's schedule list.
    /// Strict head-of-queue blocking: a head that exceeds its category's rate
    /// or occupancy cap stops the whole queue for this cycle.
    pub fn advance<F: FnMut(AllocEntry)>(
        &mut self,
        res: &mut SchedResources,
        queue_index: usize,
        now: Cycle,
        mut space_left: usize,
        mut push: F,
    ) {
        while space_left > 0 {
            let Some(&entry) = res.alloc_queues[queue_index].ready_front() else {
                break;
            };
            let id = res.robs.rob(entry.thread_id).get(entry.rob_index);
            let id = id.expect("allocation queue entry without a rob occupant");
            let (category, bogus, done_cycle) = {
                let uop = res.pool.get(id).expect("allocated uop not in pool");
                (uop.queue as usize, uop.bogus, uop.done_cycle)
            };

            if !bogus && done_cycle == 0 {
                if self.rate_used[category] >= self.sched_rate[category]
                    || self.num_per_sched[category] >= self.sched_size[category]
                {
                    break;
                }
            }
            res.alloc_queues[queue_index].dequeue();

            let uop = res.pool.get_mut(id).expect("allocated uop not in pool");
            uop.in_alloc_queue = false;
            if bogus || done_cycle != 0 {
                // flushed (or already complete): finish as a no-op without
                // ever occupying the scheduler
                if uop.done_cycle == 0 {
                    uop.done_cycle = now;
                }
                continue;
            }
            uop.in_scheduler = true;
            self.num_in_sched += 1;
            self.num_per_sched[category] += 1;
            self.rate_used[category] += 1;
            space_left -= 1;
            push(entry);
        }
    }

    /// One schedule attempt for one entry. On success the micro-op has been
    /// handed to execute and has left the scheduler.
    pub fn uop_schedule(
        &mut self,
        res: &mut SchedResources,
        now: Cycle,
        entry: AllocEntry,
    ) -> Result<(), SchedFailure> {
        let id = res
            .robs
            .rob(entry.thread_id)
            .get(entry.rob_index)
            .expect("schedule list entry without a rob occupant");
        let (bogus, queue, mem, num_children, alloc_cycle) = {
            let uop = res.pool.get(id).expect("scheduler entry not in pool");
            (
                uop.bogus,
                uop.queue,
                uop.mem,
                uop.num_child_uops,
                uop.alloc_cycle,
            )
        };
        let category = queue as usize;

        if !bogus {
            if !check_srcs(res.pool, now, id) {
                res.stats.scheduler.fail_operands_not_ready += 1;
                return Err(SchedFailure::OperandsNotReady);
            }
            if !res.exec.port_available(queue) {
                res.stats.scheduler.fail_no_ports += 1;
                return Err(SchedFailure::NoPorts);
            }
            if matches!(mem, MemKind::ConstLoad | MemKind::TextureLoad)
                && num_children > 0
                && res.mem.available_slots() == 0
            {
                res.stats.scheduler.fail_no_mem_slots += 1;
                return Err(SchedFailure::NoMemSlots);
            }
        }

        let issued = {
            let (exec, mut exec_res) = res.exec_res();
            exec.exec_uop(&mut exec_res, now, id)
        };
        if !issued {
            res.stats.scheduler.fail_memory_stalled += 1;
            return Err(SchedFailure::MemoryStalled);
        }

        let uop = res.pool.get_mut(id).expect("scheduler entry not in pool");
        uop.in_scheduler = false;
        self.num_in_sched -= 1;
        self.num_per_sched[category] -= 1;
        res.stats.scheduler.num_scheduled += 1;
        res.stats.scheduler.dispatch_wait += now.saturating_sub(alloc_cycle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_sources_count_as_satisfied() {
        let mut pool: Pool<Uop> = Pool::with_capacity(4);
        let producer = pool.alloc();
        {
            let uop = pool.get_mut(producer).unwrap();
            uop.reset();
            uop.uop_num = 1;
        }
        let consumer = pool.alloc();
        {
            let uop = pool.get_mut(consumer).unwrap();
            uop.reset();
            uop.uop_num = 2;
            uop.srcs.push(crate::uop::SrcInfo {
                kind: crate::uop::DepKind::RegData,
                producer,
                uop_num: 1,
            });
            uop.srcs_ready = false;
        }
        // not ready while the producer is live and incomplete
        assert!(!check_srcs(&mut pool, 5, consumer));

        // freeing the producer makes the reference stale, hence satisfied
        pool.free(producer);
        {
            let uop = pool.get_mut(consumer).unwrap();
            uop.last_dep_done = 0;
        }
        assert!(check_srcs(&mut pool, 5, consumer));
        assert!(pool.get(consumer).unwrap().srcs_ready);
    }

    #[test]
    fn readiness_waits_for_the_done_cycle() {
        let mut pool: Pool<Uop> = Pool::with_capacity(4);
        let producer = pool.alloc();
        {
            let uop = pool.get_mut(producer).unwrap();
            uop.reset();
            uop.uop_num = 1;
            uop.done_cycle = 10;
        }
        let consumer = pool.alloc();
        {
            let uop = pool.get_mut(consumer).unwrap();
            uop.reset();
            uop.uop_num = 2;
            uop.srcs.push(crate::uop::SrcInfo {
                kind: crate::uop::DepKind::RegData,
                producer,
                uop_num: 1,
            });
            uop.srcs_ready = false;
        }
        assert!(!check_srcs(&mut pool, 9, consumer));
        // the early-out snapshot remembers when to look again
        assert_eq!(pool.get(consumer).unwrap().last_dep_done, 10);
        assert!(check_srcs(&mut pool, 10, consumer));
    }
}
