use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub forwarded_loads: u64,
    pub loads_without_forwarding: u64,
}

impl std::ops::AddAssign for Memory {
    fn add_assign(&mut self, other: Self) {
        self.accesses += other.accesses;
        self.hits += other.hits;
        self.misses += other.misses;
        self.forwarded_loads += other.forwarded_loads;
        self.loads_without_forwarding += other.loads_without_forwarding;
    }
}
