use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchPredictor {
    pub predictions: u64,
    pub mispredictions: u64,
    pub btb_misses: u64,
    pub recoveries: u64,
    pub redirects_resolved: u64,
}

impl BranchPredictor {
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        if self.predictions == 0 {
            return 0.0;
        }
        1.0 - self.mispredictions as f64 / self.predictions as f64
    }
}

impl std::ops::AddAssign for BranchPredictor {
    fn add_assign(&mut self, other: Self) {
        self.predictions += other.predictions;
        self.mispredictions += other.mispredictions;
        self.btb_misses += other.btb_misses;
        self.recoveries += other.recoveries;
        self.redirects_resolved += other.redirects_resolved;
    }
}
