use crate::bp::{Btb, Gshare};
use crate::config::{CoreConfig, CoreFlavor};
use crate::frontend::FetchGate;
use crate::mem::{Fill, MemResponse, MemoryModel};
use crate::pool::{Pool, UopId};
use crate::uop::{QueueKind, Uop, UopKind, UopState, NUM_QUEUE_KINDS};
use crate::Cycle;

/// Everything the execute stage touches besides its own port counters.
pub struct ExecResources<'a> {
    pub pool: &'a mut Pool<Uop>,
    pub mem: &'a mut dyn MemoryModel,
    pub gshare: &'a mut Gshare,
    pub btb: &'a mut Btb,
    pub gate: &'a mut FetchGate,
    pub stats: &'a mut stats::Core,
}

enum Outcome {
    /// Completion latency is known.
    Done(Cycle),
    /// At least one miss is in flight, a fill completes the micro-op.
    Pending,
}

/// Execute stage: issues micro-ops handed over by the scheduler, resolves
/// branches, and completes outstanding misses when their fills arrive.
#[derive(Debug)]
pub struct Execute {
    ports_used: [usize; NUM_QUEUE_KINDS],
    max_ports: [usize; NUM_QUEUE_KINDS],
    one_cycle_exec: bool,
    exec_retire_latency: Cycle,
    latency_scale: Cycle,
    extra_recovery_cycles: Cycle,
    fill_scratch: Vec<Fill>,
}

impl Execute {
    #[must_use]
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            ports_used: [0; NUM_QUEUE_KINDS],
            max_ports: config.max_ports,
            one_cycle_exec: config.one_cycle_exec,
            exec_retire_latency: config.exec_retire_latency,
            latency_scale: match config.flavor {
                CoreFlavor::Cpu => 1,
                CoreFlavor::Gpu => 2,
            },
            extra_recovery_cycles: config.branch.extra_recovery_cycles,
            fill_scratch: Vec::new(),
        }
    }

    /// Resets per-cycle issue-port bandwidth.
    pub fn begin_cycle(&mut self) {
        self.ports_used = [0; NUM_QUEUE_KINDS];
    }

    #[must_use]
    pub fn port_available(&self, queue: QueueKind) -> bool {
        self.ports_used[queue as usize] < self.max_ports[queue as usize]
    }

    fn use_port(&mut self, queue: QueueKind) {
        self.ports_used[queue as usize] += 1;
    }

    fn alu_latency(&self, kind: UopKind) -> Cycle {
        if self.one_cycle_exec {
            return 1;
        }
        let base: Cycle = match kind {
            UopKind::Nop => 1,
            UopKind::IntAdd | UopKind::IntCmp | UopKind::Logic | UopKind::Shift => 1,
            UopKind::IntMul => 3,
            UopKind::IntDiv => 20,
            UopKind::FpAdd | UopKind::FpCvt | UopKind::FpCmp => 3,
            UopKind::FpMul => 4,
            UopKind::FpDiv => 20,
            UopKind::Simd => 4,
            UopKind::ControlFlow => 1,
            UopKind::Mem => 1,
            UopKind::Other => 2,
        };
        base * self.latency_scale
    }

    /// Issues one scheduled micro-op. Returns `false` when the memory
    /// hierarchy could not take the request; the scheduler retries later and
    /// no issue port is consumed.
    pub fn exec_uop(&mut self, res: &mut ExecResources, now: Cycle, id: UopId) -> bool {
        let (bogus, is_mem, is_load, num_children, kind, queue, thread_id, is_cf) = {
            let uop = res
                .pool
                .get(id)
                .expect("scheduled uop vanished from the pool");
            (
                uop.bogus,
                uop.mem.is_mem(),
                uop.mem.is_load(),
                uop.num_child_uops,
                uop.kind,
                uop.queue,
                uop.thread_id,
                uop.cf.is_cf(),
            )
        };

        let outcome = if bogus {
            Outcome::Done(1)
        } else if is_mem {
            if num_children == 0 {
                let response = {
                    let uop = res.pool.get(id).expect("uop freed mid-exec");
                    res.mem.access(id, uop, now)
                };
                res.stats.mem.accesses += 1;
                match response {
                    MemResponse::Busy => {
                        res.stats.mem.accesses -= 1;
                        return false;
                    }
                    MemResponse::Miss => {
                        res.stats.mem.misses += 1;
                        Outcome::Pending
                    }
                    MemResponse::Hit(latency) => {
                        res.stats.mem.hits += 1;
                        Outcome::Done(latency)
                    }
                }
            } else {
                match self.exec_children(res, now, id) {
                    Some(outcome) => outcome,
                    None => return false,
                }
            }
        } else {
            Outcome::Done(self.alu_latency(kind))
        };

        {
            let uop = res.pool.get_mut(id).expect("uop freed mid-exec");
            uop.sched_cycle = now;
            uop.exec_cycle = now;
            uop.state = UopState::Executed;
            if let Outcome::Done(latency) = outcome {
                uop.done_cycle = now + latency.max(self.exec_retire_latency);
            }
        }

        if !bogus {
            self.use_port(queue);
            if is_cf {
                self.br_exec(res, now, id);
            }
            if is_load {
                if let Outcome::Done(_) = outcome {
                    res.gate.set_load_ready(thread_id);
                }
            }
        }
        true
    }

    /// Issues the still-pending children of a split memory micro-op. `None`
    /// means some child could not be accepted this cycle.
    fn exec_children(&mut self, res: &mut ExecResources, now: Cycle, id: UopId) -> Option<Outcome> {
        let (children, mut pending, mut num_done) = {
            let uop = res.pool.get(id).expect("uop freed mid-exec");
            (
                uop.child_uops.clone(),
                uop.pending_child_uops,
                uop.num_child_uops_done,
            )
        };
        let mut max_latency: Cycle = 0;

        for (index, &child_id) in children.iter().enumerate() {
            let bit = 1u64 << index;
            if pending & bit == 0 {
                continue;
            }
            let response = {
                let child = res.pool.get(child_id).expect("child uop freed mid-exec");
                res.mem.access(child_id, child, now)
            };
            match response {
                MemResponse::Busy => {}
                MemResponse::Hit(latency) => {
                    pending &= !bit;
                    num_done += 1;
                    max_latency = max_latency.max(latency);
                    res.stats.mem.accesses += 1;
                    res.stats.mem.hits += 1;
                    if let Some(child) = res.pool.get_mut(child_id) {
                        child.exec_cycle = now;
                        child.done_cycle = now + latency;
                        child.state = UopState::Executed;
                    }
                }
                MemResponse::Miss => {
                    pending &= !bit;
                    res.stats.mem.accesses += 1;
                    res.stats.mem.misses += 1;
                    if let Some(child) = res.pool.get_mut(child_id) {
                        child.exec_cycle = now;
                        child.state = UopState::Executed;
                    }
                }
            }
        }

        {
            let uop = res.pool.get_mut(id).expect("uop freed mid-exec");
            uop.pending_child_uops = pending;
            uop.num_child_uops_done = num_done;
        }
        if pending != 0 {
            // a child was refused, retry the whole micro-op
            return None;
        }
        if num_done == children.len() {
            Some(Outcome::Done(max_latency.max(1)))
        } else {
            Some(Outcome::Pending)
        }
    }

    /// Branch resolution: trains the direction predictor, triggers
    /// misprediction recovery, and resolves target-buffer misses.
    fn br_exec(&self, res: &mut ExecResources, now: Cycle, id: UopId) {
        let snapshot = res.pool.get(id).expect("uop freed mid-exec").clone();

        if snapshot.cf.is_conditional() {
            res.gshare.update(&snapshot);
        }
        if snapshot.mispredicted {
            log::debug!(
                "cycle {now}: {snapshot} mispredicted (pred {} actual {}), recovering",
                snapshot.pred_dir,
                snapshot.dir
            );
            res.gshare.recover(&snapshot.recovery_info);
            res.gate
                .set_recovery(snapshot.thread_id, now + 1 + self.extra_recovery_cycles);
            res.stats.branch.recoveries += 1;
        }
        if snapshot.branch_info.btb_miss && !snapshot.branch_info.btb_miss_resolved {
            res.btb.update(snapshot.pc, snapshot.npc);
            res.gate
                .set_redirect(snapshot.thread_id, now + 1 + self.extra_recovery_cycles);
            res.stats.branch.redirects_resolved += 1;
            if let Some(uop) = res.pool.get_mut(id) {
                uop.branch_info.btb_miss_resolved = true;
            }
        }
        res.gate.set_br_ready(snapshot.thread_id);
    }

    /// Drains due fills from the memory hierarchy and completes the
    /// micro-ops (or children) that were waiting on them.
    pub fn run_cycle(&mut self, res: &mut ExecResources, now: Cycle) {
        self.fill_scratch.clear();
        res.mem.drain_fills(now, &mut self.fill_scratch);

        for fill_index in 0..self.fill_scratch.len() {
            let fill = self.fill_scratch[fill_index];
            let Some(uop) = res.pool.get_mut(fill.id) else {
                // flushed and recycled while the miss was outstanding
                continue;
            };
            if uop.uop_num != fill.uop_num {
                continue;
            }
            uop.done_cycle = now + self.exec_retire_latency.max(1);
            let parent = uop.parent;
            let thread_id = uop.thread_id;
            let is_load = uop.mem.is_load();

            if parent.is_invalid() {
                if is_load {
                    res.gate.set_load_ready(thread_id);
                }
                continue;
            }

            // child fill: the parent completes once every child has resolved
            if let Some(parent_uop) = res.pool.get_mut(parent) {
                parent_uop.num_child_uops_done += 1;
                if parent_uop.num_child_uops_done == parent_uop.num_child_uops {
                    parent_uop.done_cycle = now + self.exec_retire_latency.max(1);
                    if parent_uop.mem.is_load() {
                        res.gate.set_load_ready(parent_uop.thread_id);
                    }
                }
            }
        }
    }
}
