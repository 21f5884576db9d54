use std::collections::VecDeque;

use super::{AllocEntry, SchedResources, Scheduler, SchedulerBase};
use crate::config::CoreConfig;
use crate::Cycle;

/// Strict program-order issue: only the oldest unscheduled micro-op may
/// schedule, and a single blocked micro-op stalls everything behind it.
pub struct InOrderScheduler {
    base: SchedulerBase,
    list: VecDeque<AllocEntry>,
    list_size: usize,
    width: usize,
    schedule_to_width: bool,
    num_queues: usize,
}

impl InOrderScheduler {
    #[must_use]
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            base: SchedulerBase::new(config),
            list: VecDeque::with_capacity(config.sched_list_size),
            list_size: config.sched_list_size,
            width: config.width,
            schedule_to_width: config.schedule_to_width,
            num_queues: config.num_alloc_queues,
        }
    }
}

impl Scheduler for InOrderScheduler {
    fn run_cycle(&mut self, res: &mut SchedResources, now: Cycle) {
        self.base.begin_cycle();
        if self.base.num_in_sched() == 0 {
            res.stats.scheduler.idle_cycles += 1;
        }

        let mut scheduled = 0;
        while let Some(&entry) = self.list.front() {
            if self.schedule_to_width && scheduled >= self.width {
                break;
            }
            match self.base.uop_schedule(res, now, entry) {
                Ok(()) => {
                    self.list.pop_front();
                    scheduled += 1;
                }
                Err(failure) => {
                    log::trace!("cycle {now}: in-order head blocked: {failure}");
                    break;
                }
            }
        }
        if scheduled == 0 && self.base.num_in_sched() > 0 {
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
