pub mod branch;
pub mod mem;
pub mod scheduler;
pub mod sim;

pub use branch::BranchPredictor;
pub use mem::Memory;
pub use scheduler::Scheduler;
pub use sim::Sim;

use serde::{Deserialize, Serialize};

/// Counters collected by a single simulated core.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Core {
    pub sim: Sim,
    pub scheduler: Scheduler,
    pub branch: BranchPredictor,
    pub mem: Memory,
}

impl std::ops::AddAssign for Core {
    fn add_assign(&mut self, other: Self) {
        self.sim += other.sim;
        self.scheduler += other.scheduler;
        self.branch += other.branch;
        self.mem += other.mem;
    }
}

/// Counters for a whole simulation run (all cores).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub per_core: Vec<Core>,
}

impl Stats {
    #[must_use]
    pub fn new(num_cores: usize) -> Self {
        Self {
            per_core: vec![Core::default(); num_cores],
        }
    }

    /// Sum of all per-core counters.
    #[must_use]
    pub fn reduce(&self) -> Core {
        let mut total = Core::default();
        for core in &self.per_core {
            total += core.clone();
        }
        total
    }
}
