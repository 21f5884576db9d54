use std::collections::VecDeque;

use super::{AllocEntry, SchedResources, Scheduler, SchedulerBase};
use crate::config::CoreConfig;
use crate::Cycle;

/// List scheduling: scans the schedule list front-to-back every cycle and
/// issues every ready entry, regardless of position. Scheduled entries are
/// compacted out of the list.
pub struct OooScheduler {
    base: SchedulerBase,
    list: VecDeque<AllocEntry>,
    list_size: usize,
    width: usize,
    schedule_to_width: bool,
    num_queues: usize,
}

impl OooScheduler {
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

impl Scheduler for OooScheduler {
    fn run_cycle(&mut self, res: &mut SchedResources, now: Cycle) {
        self.base.begin_cycle();
        if self.base.num_in_sched() == 0 {
            res.stats.scheduler.idle_cycles += 1;
        }

        let mut scheduled = 0;
        let mut index = 0;
        while index < self.list.len() {
            if self.schedule_to_width && scheduled >= self.width {
                break;
            }
            let entry = self.list[index];
            match self.base.uop_schedule(res, now, entry) {
                Ok(()) => {
                    self.list.remove(index);
                    scheduled += 1;
                }
                Err(_) => index += 1,
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
