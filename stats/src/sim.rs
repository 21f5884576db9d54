use serde::{Deserialize, Serialize};

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sim {
    pub cycles: u64,
    pub instructions: u64,
    pub uops: u64,
    pub threads_finished: u64,
    pub trace_repeats: u64,
}

impl Sim {
    #[must_use]
    pub fn ipc(&self) -> f64 {
        if self.cycles == 0 {
            return 0.0;
        }
        self.instructions as f64 / self.cycles as f64
    }
}

impl std::ops::AddAssign for Sim {
    fn add_assign(&mut self, other: Self) {
        self.cycles += other.cycles;
        self.instructions += other.instructions;
        self.uops += other.uops;
        self.threads_finished += other.threads_finished;
        self.trace_repeats += other.trace_repeats;
    }
}
