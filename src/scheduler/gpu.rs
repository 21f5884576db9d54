use std::collections::VecDeque;

use smallvec::SmallVec;

use super::{AllocEntry, SchedResources, Scheduler, SchedulerBase};
use crate::config::CoreConfig;
use crate::Cycle;

/// Many-thread round-robin issue. The schedule list mixes entries from every
/// resident thread; per run, each of the parallel warp schedulers picks one
/// micro-op, and no two pick from the same thread. The whole stage runs only
/// once every `gpu_schedule_ratio` core cycles, modeling a slower shared
/// scheduler clock.
pub struct GpuScheduler {
    base: SchedulerBase,
    list: VecDeque<AllocEntry>,
    list_size: usize,
    num_warp_schedulers: usize,
    schedule_ratio: u64,
    num_queues: usize,
}

impl GpuScheduler {
    #[must_use]
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            base: SchedulerBase::new(config),
            list: VecDeque::with_capacity(config.sched_list_size),
            list_size: config.sched_list_size,
            num_warp_schedulers: config.num_warp_schedulers,
            schedule_ratio: config.gpu_schedule_ratio,
            num_queues: config.num_alloc_queues,
        }
    }
}

impl Scheduler for GpuScheduler {
    fn run_cycle(&mut self, res: &mut SchedResources, now: Cycle) {
        if now % self.schedule_ratio != 0 {
            return;
        }
        self.base.begin_cycle();
        if self.base.num_in_sched() == 0 {
            res.stats.scheduler.idle_cycles += 1;
        }

        let mut issued_threads: SmallVec<[usize; 8]> = SmallVec::new();
        let mut index = 0;
        while index < self.list.len() {
            if issued_threads.len() >= self.num_warp_schedulers {
                break;
            }
            let entry = self.list[index];
            if issued_threads.contains(&entry.thread_id) {
                // one micro-op per thread per run
                index += 1;
                continue;
            }
            match self.base.uop_schedule(res, now, entry) {
                Ok(()) => {
                    self.list.remove(index);
                    issued_threads.push(entry.thread_id);
                }
                Err(_) => index += 1,
            }
        }
        if issued_threads.is_empty() && self.base.num_in_sched() > 0 {
            res.stats.scheduler.no_schedule_cycles += 1;
        }

        for queue_index in 0..self.num_queues {
            let space = self.list_size - self.list.len();
            self.base.advance(res, queue_index, now, space, |entry| {
                self.list.push_back(entry);
            });
        }
    }

    fn occupancy(&self) -> usize {
        self.base.num_in_sched()
    }
}
