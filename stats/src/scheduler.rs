use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheduler {
    pub num_scheduled: u64,
    pub fail_operands_not_ready: u64,
    pub fail_no_ports: u64,
    pub fail_no_mem_slots: u64,
    pub fail_memory_stalled: u64,
    pub no_schedule_cycles: u64,
    pub idle_cycles: u64,
    /// Cycles a scheduled micro-op spent waiting between allocation and issue.
    pub dispatch_wait: u64,
}

impl std::ops::AddAssign for Scheduler {
    fn add_assign(&mut self, other: Self) {
        self.num_scheduled += other.num_scheduled;
        self.fail_operands_not_ready += other.fail_operands_not_ready;
        self.fail_no_ports += other.fail_no_ports;
        self.fail_no_mem_slots += other.fail_no_mem_slots;
        self.fail_memory_stalled += other.fail_memory_stalled;
        self.no_schedule_cycles += other.no_schedule_cycles;
        self.idle_cycles += other.idle_cycles;
        self.dispatch_wait += other.dispatch_wait;
    }
}
