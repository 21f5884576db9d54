use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::uop::{CfKind, MemKind, UopKind};
use crate::Address;

/// One decoded micro-op as handed to the frontend. Self-contained: nothing
/// here refers back into the trace.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodedUop {
    pub pc: Address,
    /// Resolved next-fetch address.
    pub npc: Address,
    pub kind: UopKind,
    pub cf: CfKind,
    pub mem: MemKind,
    pub vaddr: Address,
    pub mem_size: u8,
    /// Resolved branch direction.
    pub dir: bool,
    pub src_regs: SmallVec<[u16; 4]>,
    pub dests: SmallVec<[u16; 2]>,
    pub first_of_inst: bool,
    pub last_of_inst: bool,
}

/// The finite micro-op stream of one thread.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadTrace {
    pub ops: Vec<DecodedUop>,
}

impl ThreadTrace {
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Replayable multi-thread trace. Each thread has its own cursor; a thread is
/// exhausted when its cursor reaches the end of its stream.
#[derive(Clone, Debug)]
pub struct TraceSource {
    threads: Vec<ThreadTrace>,
    cursors: Vec<usize>,
}

impl TraceSource {
    #[must_use]
    pub fn new(threads: Vec<ThreadTrace>) -> Self {
        let cursors = vec![0; threads.len()];
        Self { threads, cursors }
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::config::Error> {
        let reader = std::io::BufReader::new(std::fs::File::open(path)?);
        let threads: Vec<ThreadTrace> = serde_json::from_reader(reader)?;
        Ok(Self::new(threads))
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// Next micro-op of the thread, advancing its cursor.
    pub fn next(&mut self, thread_id: usize) -> Option<DecodedUop> {
        let cursor = self.cursors.get_mut(thread_id)?;
        let op = self.threads[thread_id].ops.get(*cursor)?.clone();
        *cursor += 1;
        Some(op)
    }

    /// Micro-ops left before the thread's stream ends.
    #[must_use]
    pub fn remaining(&self, thread_id: usize) -> usize {
        self.threads[thread_id].len() - self.cursors[thread_id]
    }

    #[must_use]
    pub fn exhausted(&self, thread_id: usize) -> bool {
        self.remaining(thread_id) == 0
    }

    /// Rewinds every cursor for a fresh repeat of the same trace.
    pub fn restart(&mut self) {
        self.cursors.iter_mut().for_each(|cursor| *cursor = 0);
    }
}

/// Convenience builder for synthetic traces, used by tests and the demo
/// workloads.
#[derive(Clone, Debug, Default)]
pub struct TraceBuilder {
    ops: Vec<DecodedUop>,
    pc: Address,
}

impl TraceBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            pc: 0x1000,
        }
    }

    fn push(&mut self, mut op: DecodedUop) -> &mut Self {
        op.pc = self.pc;
        if op.npc == 0 {
            op.npc = self.pc + 4;
        }
        op.first_of_inst = true;
        op.last_of_inst = true;
        self.pc = op.npc;
        self.ops.push(op);
        self
    }

    pub fn compute(&mut self, kind: UopKind, dest: u16, srcs: &[u16]) -> &mut Self {
        self.push(DecodedUop {
            kind,
            dests: SmallVec::from_slice(&[dest]),
            src_regs: SmallVec::from_slice(srcs),
            ..DecodedUop::default()
        })
    }

    pub fn load(&mut self, dest: u16, vaddr: Address, size: u8) -> &mut Self {
        self.push(DecodedUop {
            kind: UopKind::Mem,
            mem: MemKind::Load,
            vaddr,
            mem_size: size,
            dests: SmallVec::from_slice(&[dest]),
            ..DecodedUop::default()
        })
    }

    pub fn store(&mut self, src: u16, vaddr: Address, size: u8) -> &mut Self {
        self.push(DecodedUop {
            kind: UopKind::Mem,
            mem: MemKind::Store,
            vaddr,
            mem_size: size,
            src_regs: SmallVec::from_slice(&[src]),
            ..DecodedUop::default()
        })
    }

    /// Conditional branch with its resolved direction and taken target.
    pub fn branch(&mut self, dir: bool, target: Address) -> &mut Self {
        let npc = if dir { target } else { self.pc + 4 };
        self.push(DecodedUop {
            kind: UopKind::ControlFlow,
            cf: CfKind::Cbr,
            dir,
            npc,
            ..DecodedUop::default()
        })
    }

    pub fn nop(&mut self) -> &mut Self {
        self.push(DecodedUop::default())
    }

    #[must_use]
    pub fn build(&mut self) -> ThreadTrace {
        ThreadTrace {
            ops: std::mem::take(&mut self.ops),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_walks_the_stream_once() {
        let trace = TraceBuilder::new()
            .nop()
            .compute(UopKind::IntAdd, 1, &[0])
            .build();
        let mut source = TraceSource::new(vec![trace]);
        assert_eq!(source.remaining(0), 2);
        assert!(source.next(0).is_some());
        assert!(source.next(0).is_some());
        assert!(source.next(0).is_none());
        assert!(source.exhausted(0));
    }

    #[test]
    fn restart_rewinds_every_thread() {
        let trace = TraceBuilder::new().nop().build();
        let mut source = TraceSource::new(vec![trace.clone(), trace]);
        source.next(0);
        source.next(1);
        assert!(source.exhausted(0));
        source.restart();
        assert_eq!(source.remaining(0), 1);
        assert_eq!(source.remaining(1), 1);
    }

    #[test]
    fn builder_chains_pcs() {
        let trace = TraceBuilder::new().nop().branch(true, 0x2000).nop().build();
        assert_eq!(trace.ops[0].pc, 0x1000);
        assert_eq!(trace.ops[1].pc, 0x1004);
        assert_eq!(trace.ops[1].npc, 0x2000);
        assert_eq!(trace.ops[2].pc, 0x2000);
    }

    #[test]
    fn traces_round_trip_through_json() {
        let trace = TraceBuilder::new().load(1, 0x100, 8).build();
        let text = serde_json::to_string(&vec![trace.clone()]).unwrap();
        let back: Vec<ThreadTrace> = serde_json::from_str(&text).unwrap();
        assert_eq!(back[0], trace);
    }
}
