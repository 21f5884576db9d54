use crate::pool::{Pool, UopId};
use crate::uop::Uop;
use crate::Cycle;
use std::collections::{HashMap, VecDeque};

/// Per-category resource limits attached to a reorder buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RobLimits {
    pub rob_size: usize,
    pub store_buffer: usize,
    pub load_buffer: usize,
    pub int_regs: usize,
    pub fp_regs: usize,
}

/// Reorder buffer: a ring of live micro-ops in program order, plus the
/// resource counters claimed at allocate and released at retire.
///
/// The ring is twice the architectural size; only half of it is usable, the
/// extra slots keep index arithmetic stable across wrap-around.
#[derive(Debug)]
pub struct Rob {
    entries: Box<[Option<UopId>]>,
    max_cnt: usize,
    usable_cnt: usize,
    first_entry: usize,
    last_entry: usize,
    free_cnt: usize,

    num_sb: usize,
    max_sb: usize,
    num_lb: usize,
    max_lb: usize,
    num_int_regs: usize,
    max_int_regs: usize,
    num_fp_regs: usize,
    max_fp_regs: usize,
}

impl Rob {
    #[must_use]
    pub fn new(limits: RobLimits) -> Self {
        let max_cnt = limits.rob_size * 2;
        Self {
            entries: vec![None; max_cnt].into_boxed_slice(),
            max_cnt,
            usable_cnt: max_cnt / 2,
            first_entry: 0,
            last_entry: 0,
            free_cnt: max_cnt / 2,
            num_sb: limits.store_buffer,
            max_sb: limits.store_buffer,
            num_lb: limits.load_buffer,
            max_lb: limits.load_buffer,
            num_int_regs: limits.int_regs,
            max_int_regs: limits.int_regs,
            num_fp_regs: limits.fp_regs,
            max_fp_regs: limits.fp_regs,
        }
    }

    /// Resets the ring for reuse by a new thread. Resource counters are
    /// restored to their maxima.
    pub fn reinit(&mut self) {
        self.entries.fill(None);
        self.first_entry = 0;
        self.last_entry = 0;
        self.free_cnt = self.usable_cnt;
        self.num_sb = self.max_sb;
        self.num_lb = self.max_lb;
        self.num_int_regs = self.max_int_regs;
        self.num_fp_regs = self.max_fp_regs;
    }

    #[must_use]
    pub fn space(&self) -> usize {
        self.free_cnt
    }

    #[must_use]
    pub fn entries(&self) -> usize {
        self.usable_cnt - self.free_cnt
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries() == 0
    }

    /// Ring slot the next push will land in.
    #[must_use]
    pub fn tail_index(&self) -> usize {
        self.last_entry
    }

    #[must_use]
    pub fn head_index(&self) -> usize {
        self.first_entry
    }

    #[must_use]
    pub fn inc_index(&self, index: usize) -> usize {
        (index + 1) % self.max_cnt
    }

    #[must_use]
    pub fn dec_index(&self, index: usize) -> usize {
        (index + self.max_cnt - 1) % self.max_cnt
    }

    /// Appends at the tail. Callers check [`Rob::space`] first.
    pub fn push(&mut self, uop: UopId) -> usize {
        assert!(self.free_cnt > 0, "push into full reorder buffer");
        let slot = self.last_entry;
        self.entries[slot] = Some(uop);
        self.last_entry = self.inc_index(self.last_entry);
        self.free_cnt -= 1;
        slot
    }

    /// Removes the head entry.
    pub fn pop(&mut self) {
        assert!(self.entries() > 0, "pop from empty reorder buffer");
        self.entries[self.first_entry] = None;
        self.first_entry = self.inc_index(self.first_entry);
        self.free_cnt += 1;
    }

    #[must_use]
    pub fn front(&self) -> Option<UopId> {
        if self.is_empty() {
            None
        } else {
            self.entries[self.first_entry]
        }
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<UopId> {
        self.entries[index]
    }

    pub fn alloc_sb(&mut self) {
        assert!(self.num_sb > 0, "store buffer underflow");
        self.num_sb -= 1;
    }

    pub fn alloc_lb(&mut self) {
        assert!(self.num_lb > 0, "load buffer underflow");
        self.num_lb -= 1;
    }

    pub fn alloc_int_reg(&mut self) {
        assert!(self.num_int_regs > 0, "integer register file underflow");
        self.num_int_regs -= 1;
    }

    pub fn alloc_fp_reg(&mut self) {
        assert!(self.num_fp_regs > 0, "fp register file underflow");
        self.num_fp_regs -= 1;
    }

    pub fn dealloc_sb(&mut self) {
        self.num_sb += 1;
        assert!(self.num_sb <= self.max_sb, "store buffer overflow on release");
    }

    pub fn dealloc_lb(&mut self) {
        self.num_lb += 1;
        assert!(self.num_lb <= self.max_lb, "load buffer overflow on release");
    }

    pub fn dealloc_int_reg(&mut self) {
        self.num_int_regs += 1;
        assert!(
            self.num_int_regs <= self.max_int_regs,
            "integer register file overflow on release"
        );
    }

    pub fn dealloc_fp_reg(&mut self) {
        self.num_fp_regs += 1;
        assert!(
            self.num_fp_regs <= self.max_fp_regs,
            "fp register file overflow on release"
        );
    }

    #[must_use]
    pub fn num_sb(&self) -> usize {
        self.num_sb
    }

    #[must_use]
    pub fn num_lb(&self) -> usize {
        self.num_lb
    }

    #[must_use]
    pub fn num_int_regs(&self) -> usize {
        self.num_int_regs
    }

    #[must_use]
    pub fn num_fp_regs(&self) -> usize {
        self.num_fp_regs
    }
}

/// Pool of preallocated per-thread reorder buffers for the many-thread core
/// shape. Buffers are recycled through a free list; no allocation happens
/// while the simulation runs.
#[derive(Debug)]
pub struct RobBank {
    robs: Vec<Rob>,
    free_list: VecDeque<usize>,
    thread_to_rob: HashMap<usize, usize>,
}

impl RobBank {
    #[must_use]
    pub fn new(num_threads: usize, limits: RobLimits) -> Self {
        let robs = (0..num_threads).map(|_| Rob::new(limits)).collect();
        Self {
            robs,
            free_list: (0..num_threads).collect(),
            thread_to_rob: HashMap::new(),
        }
    }

    /// Claims a buffer for a newly resident thread.
    pub fn reserve(&mut self, thread_id: usize) -> usize {
        assert!(
            !self.thread_to_rob.contains_key(&thread_id),
            "thread_id:{thread_id} already holds a reorder buffer"
        );
        let index = self
            .free_list
            .pop_front()
            .unwrap_or_else(|| panic!("no free reorder buffer for thread_id:{thread_id}"));
        self.robs[index].reinit();
        self.thread_to_rob.insert(thread_id, index);
        index
    }

    /// Returns a terminated thread's buffer to the free list.
    pub fn release(&mut self, thread_id: usize) {
        let index = self
            .thread_to_rob
            .remove(&thread_id)
            .unwrap_or_else(|| panic!("thread_id:{thread_id} holds no reorder buffer"));
        self.free_list.push_back(index);
    }

    #[must_use]
    pub fn rob(&self, thread_id: usize) -> &Rob {
        let index = self.thread_to_rob[&thread_id];
        &self.robs[index]
    }

    pub fn rob_mut(&mut self, thread_id: usize) -> &mut Rob {
        let index = self.thread_to_rob[&thread_id];
        &mut self.robs[index]
    }

    #[must_use]
    pub fn has_thread(&self, thread_id: usize) -> bool {
        self.thread_to_rob.contains_key(&thread_id)
    }

    pub fn resident_threads(&self) -> impl Iterator<Item = usize> + '_ {
        self.thread_to_rob.keys().copied()
    }

    /// Retireable micro-ops across all resident buffers, in the deterministic
    /// global order (done cycle, then schedule cycle, then thread id).
    ///
    /// Only buffer heads are candidates; retirement within a thread stays in
    /// program order.
    #[must_use]
    pub fn ready_order(&self, n: usize, now: Cycle, pool: &Pool<Uop>) -> Vec<UopId> {
        use itertools::Itertools;

        let mut ready: Vec<(Cycle, Cycle, usize, UopId)> = Vec::new();
        for (&thread_id, &index) in &self.thread_to_rob {
            let rob = &self.robs[index];
            let Some(id) = rob.front() else {
                continue;
            };
            let uop = pool
                .get(id)
                .unwrap_or_else(|| panic!("thread_id:{thread_id} rob head {id} not in pool"));
            if uop.done_cycle != 0 && uop.done_cycle <= now {
                ready.push((uop.done_cycle, uop.sched_cycle, thread_id, id));
            }
        }
        ready
            .into_iter()
            .sorted()
            .take(n)
            .map(|(_, _, _, id)| id)
            .collect()
    }
}

/// Either one shared buffer (CPU shapes) or one per resident thread (GPU
/// shape), fixed at core construction.
#[derive(Debug)]
pub enum RobSet {
    Single(Rob),
    Banked(RobBank),
}

impl RobSet {
    #[must_use]
    pub fn rob(&self, thread_id: usize) -> &Rob {
        match self {
            Self::Single(rob) => rob,
            Self::Banked(bank) => bank.rob(thread_id),
        }
    }

    pub fn rob_mut(&mut self, thread_id: usize) -> &mut Rob {
        match self {
            Self::Single(rob) => rob,
            Self::Banked(bank) => bank.rob_mut(thread_id),
        }
    }

    #[must_use]
    pub fn banked(&self) -> Option<&RobBank> {
        match self {
            Self::Single(_) => None,
            Self::Banked(bank) => Some(bank),
        }
    }

    pub fn banked_mut(&mut self) -> Option<&mut RobBank> {
        match self {
            Self::Single(_) => None,
            Self::Banked(bank) => Some(bank),
        }
    }

    /// Total live entries across all buffers.
    #[must_use]
    pub fn total_entries(&self) -> usize {
        match self {
            Self::Single(rob) => rob.entries(),
            Self::Banked(bank) => bank
                .thread_to_rob
                .values()
                .map(|&index| bank.robs[index].entries())
                .sum(),
        }
    }
}
