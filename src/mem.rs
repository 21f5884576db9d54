use std::collections::{HashSet, VecDeque};

use crate::pool::UopId;
use crate::uop::Uop;
use crate::{Address, Cycle};

/// Outcome of handing a memory micro-op to the memory hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemResponse {
    /// No request slot free. The access was not consumed, retry later.
    Busy,
    /// Request in flight, completion arrives as a [`Fill`].
    Miss,
    /// Serviced immediately with this latency.
    Hit(Cycle),
}

/// Completion notice for an earlier miss.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fill {
    pub id: UopId,
    pub uop_num: u64,
}

/// The memory/cache collaborator seen by the execute stage.
pub trait MemoryModel: std::fmt::Debug {
    fn access(&mut self, id: UopId, uop: &Uop, now: Cycle) -> MemResponse;

    /// Moves every fill due at `now` into `out`.
    fn drain_fills(&mut self, now: Cycle, out: &mut Vec<Fill>);

    /// Free request slots, used for the scheduler's admission check on
    /// constant/texture loads.
    fn available_slots(&self) -> usize;
}

#[derive(Debug)]
struct InFlight {
    due: Cycle,
    line: u64,
    fill: Fill,
}

/// Deterministic single-level cache model: the first touch of a line misses
/// and installs it, later touches hit. Misses occupy one of a bounded set of
/// request slots until the fill is drained.
#[derive(Debug)]
pub struct SimpleMemory {
    hit_latency: Cycle,
    miss_latency: Cycle,
    num_slots: usize,
    line_shift: u32,
    lines: HashSet<u64>,
    in_flight: VecDeque<InFlight>,
}

impl SimpleMemory {
    #[must_use]
    pub fn new(config: &crate::config::MemoryConfig) -> Self {
        assert!(config.line_size.is_power_of_two());
        Self {
            hit_latency: config.hit_latency,
            miss_latency: config.miss_latency,
            num_slots: config.num_request_slots,
            line_shift: config.line_size.trailing_zeros(),
            lines: HashSet::new(),
            in_flight: VecDeque::new(),
        }
    }

    fn line(&self, vaddr: Address) -> u64 {
        vaddr >> self.line_shift
    }

    /// Pre-installs the line holding `vaddr`, so the next access hits.
    pub fn preload(&mut self, vaddr: Address) {
        let line = self.line(vaddr);
        self.lines.insert(line);
    }
}

impl MemoryModel for SimpleMemory {
    fn access(&mut self, id: UopId, uop: &Uop, now: Cycle) -> MemResponse {
        let line = self.line(uop.vaddr);
        if self.lines.contains(&line) {
            return MemResponse::Hit(self.hit_latency);
        }
        if self.in_flight.len() >= self.num_slots {
            return MemResponse::Busy;
        }
        self.in_flight.push_back(InFlight {
            due: now + self.miss_latency,
            line,
            fill: Fill {
                id,
                uop_num: uop.uop_num,
            },
        });
        MemResponse::Miss
    }

    fn drain_fills(&mut self, now: Cycle, out: &mut Vec<Fill>) {
        while let Some(head) = self.in_flight.front() {
            if head.due > now {
                break;
            }
            let head = self.in_flight.pop_front().unwrap();
            self.lines.insert(head.line);
            out.push(head.fill);
        }
    }

    fn available_slots(&self) -> usize {
        self.num_slots - self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::uop::MemKind;

    fn load(vaddr: Address) -> Uop {
        Uop {
            mem: MemKind::Load,
            vaddr,
            mem_size: 4,
            ..Uop::default()
        }
    }

    #[test]
    fn first_touch_misses_then_hits_after_the_fill() {
        let config = MemoryConfig::default();
        let mut mem = SimpleMemory::new(&config);
        let uop = load(0x1000);

        assert_eq!(mem.access(UopId::INVALID, &uop, 0), MemResponse::Miss);

        let mut fills = Vec::new();
        mem.drain_fills(config.miss_latency - 1, &mut fills);
        assert!(fills.is_empty());
        mem.drain_fills(config.miss_latency, &mut fills);
        assert_eq!(fills.len(), 1);

        assert_eq!(
            mem.access(UopId::INVALID, &uop, config.miss_latency),
            MemResponse::Hit(config.hit_latency)
        );
    }

    #[test]
    fn same_line_shares_the_install() {
        let config = MemoryConfig::default();
        let mut mem = SimpleMemory::new(&config);
        assert_eq!(
            mem.access(UopId::INVALID, &load(0x2000), 0),
            MemResponse::Miss
        );
        let mut fills = Vec::new();
        mem.drain_fills(config.miss_latency, &mut fills);

        // a different address in the same line hits
        assert_eq!(
            mem.access(UopId::INVALID, &load(0x2008), config.miss_latency),
            MemResponse::Hit(config.hit_latency)
        );
    }

    #[test]
    fn busy_when_request_slots_are_exhausted() {
        let config = MemoryConfig {
            num_request_slots: 1,
            ..MemoryConfig::default()
        };
        let mut mem = SimpleMemory::new(&config);
        assert_eq!(
            mem.access(UopId::INVALID, &load(0x1000), 0),
            MemResponse::Miss
        );
        assert_eq!(mem.available_slots(), 0);
        assert_eq!(
            mem.access(UopId::INVALID, &load(0x4000), 0),
            MemResponse::Busy
        );
    }

    #[test]
    fn preloaded_lines_hit_immediately() {
        let config = MemoryConfig::default();
        let mut mem = SimpleMemory::new(&config);
        mem.preload(0x3000);
        assert_eq!(
            mem.access(UopId::INVALID, &load(0x3004), 0),
            MemResponse::Hit(config.hit_latency)
        );
    }
}
