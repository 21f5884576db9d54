use crate::pool::UopId;
use crate::{Address, Cycle};
use smallvec::SmallVec;

/// Upper bound on recorded source dependences per micro-op (register sources
/// plus memory-ordering sources added by the dependency map).
pub const MAX_SRC_DEPS: usize = 16;

/// Micro-op compute category, used for latency lookup and register-file
/// accounting.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, strum::EnumCount, strum::Display,
    serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum UopKind {
    #[default]
    Nop,
    IntAdd,
    IntMul,
    IntDiv,
    IntCmp,
    Logic,
    Shift,
    FpAdd,
    FpMul,
    FpDiv,
    FpCvt,
    FpCmp,
    Mem,
    ControlFlow,
    Simd,
    Other,
}

/// Control-flow category. Direct branches resolve their target in the
/// frontend/allocate path, indirect ones only at execute.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, strum::Display, serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CfKind {
    #[default]
    NotCf,
    Br,
    Cbr,
    Call,
    IndirectBr,
    IndirectCall,
    Ret,
}

impl CfKind {
    #[must_use]
    pub fn is_cf(&self) -> bool {
        *self != Self::NotCf
    }

    #[must_use]
    pub fn is_indirect(&self) -> bool {
        matches!(self, Self::IndirectBr | Self::IndirectCall)
    }

    /// Conditional branches are the only ones that train the direction
    /// predictor.
    #[must_use]
    pub fn is_conditional(&self) -> bool {
        *self == Self::Cbr
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, strum::Display, serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MemKind {
    #[default]
    NotMem,
    Load,
    Store,
    /// Constant-cache load (GPU shape): subject to the request-slot
    /// admission check at schedule.
    ConstLoad,
    /// Texture-cache load (GPU shape).
    TextureLoad,
}

impl MemKind {
    #[must_use]
    pub fn is_mem(&self) -> bool {
        *self != Self::NotMem
    }

    #[must_use]
    pub fn is_load(&self) -> bool {
        matches!(self, Self::Load | Self::ConstLoad | Self::TextureLoad)
    }

    #[must_use]
    pub fn is_store(&self) -> bool {
        *self == Self::Store
    }
}

/// Pipeline state of a micro-op.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, strum::Display)]
pub enum UopState {
    #[default]
    Fetched,
    Allocated,
    Scheduled,
    Executed,
    Retired,
}

/// Allocation-queue categories.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, strum::EnumCount, strum::EnumIter,
    strum::Display,
)]
#[repr(usize)]
pub enum QueueKind {
    #[default]
    General,
    Memory,
    Float,
}

pub const NUM_QUEUE_KINDS: usize = <QueueKind as strum::EnumCount>::COUNT;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DepKind {
    #[default]
    RegData,
    MemAddr,
    MemData,
}

/// One recorded source dependence: which micro-op produces the value, pinned
/// by sequence number so a recycled slot is detected as stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SrcInfo {
    pub kind: DepKind,
    pub producer: UopId,
    pub uop_num: u64,
}

/// Snapshot taken at prediction time, restored on misprediction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryInfo {
    pub global_hist: u32,
}

/// Frontend-side branch bookkeeping carried by the micro-op.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BranchInfo {
    /// Global history as it was before this prediction consumed it.
    pub pred_global_hist: u32,
    /// Target predictor had no entry for this branch (misfetch).
    pub btb_miss: bool,
    pub btb_miss_resolved: bool,
}

/// The atomic schedulable unit of the pipeline.
///
/// Owned by the arena; every cross-reference goes through `(UopId, uop_num)`
/// and is validated before use.
#[derive(Clone, Debug, Default)]
pub struct Uop {
    /// Per-thread sequence number (program order).
    pub uop_num: u64,
    /// Instruction this micro-op belongs to.
    pub inst_num: u64,
    pub thread_id: usize,
    pub core_id: usize,

    pub pc: Address,
    /// Next fetch address after this micro-op (resolved, from the trace).
    pub npc: Address,

    pub kind: UopKind,
    pub cf: CfKind,
    pub mem: MemKind,
    pub vaddr: Address,
    pub mem_size: u8,

    pub state: UopState,
    pub alloc_cycle: Cycle,
    pub sched_cycle: Cycle,
    pub exec_cycle: Cycle,
    pub done_cycle: Cycle,

    /// Architectural source/destination register ids from the trace.
    pub src_regs: SmallVec<[u16; 4]>,
    pub dests: SmallVec<[u16; 2]>,
    /// Resolved dependences (register and memory), filled by the dependency
    /// map.
    pub srcs: SmallVec<[SrcInfo; 4]>,
    pub srcs_ready: bool,
    /// Latest known done-cycle among not-ready sources, a cheap early-out
    /// for the readiness check.
    pub last_dep_done: Cycle,

    /// Flushed by an earlier misprediction; drains as a no-op.
    pub bogus: bool,
    pub off_path: bool,
    /// Resolved direction (from the trace) and predicted direction.
    pub dir: bool,
    pub pred_dir: bool,
    pub mispredicted: bool,

    /// First micro-op of its instruction.
    pub first_of_inst: bool,
    pub last_of_inst: bool,
    pub last_of_thread: bool,

    pub rob_entry: usize,
    pub queue: QueueKind,
    pub in_alloc_queue: bool,
    pub in_scheduler: bool,

    /// Split memory accesses: one child per cache line touched.
    pub child_uops: Vec<UopId>,
    pub num_child_uops: usize,
    pub num_child_uops_done: usize,
    /// Bit set per child still waiting to be sent to the memory hierarchy.
    pub pending_child_uops: u64,
    pub parent: UopId,

    /// Resources claimed at allocate, released one-for-one at retire.
    pub req_sb: bool,
    pub req_lb: bool,
    pub req_int_reg: bool,
    pub req_fp_reg: bool,

    pub branch_info: BranchInfo,
    pub recovery_info: RecoveryInfo,
}

impl Uop {
    /// Clears a recycled micro-op back to its post-fetch defaults.
    pub fn reset(&mut self) {
        *self = Self {
            parent: UopId::INVALID,
            ..Self::default()
        };
    }

    #[must_use]
    pub fn produces_int_reg(&self) -> bool {
        matches!(self.kind, UopKind::IntAdd | UopKind::IntMul | UopKind::IntCmp)
    }

    #[must_use]
    pub fn produces_fp_reg(&self) -> bool {
        matches!(self.kind, UopKind::FpCvt | UopKind::FpAdd)
    }

    /// Adds a memory dependence, skipping duplicates of the same kind on the
    /// same producer. The same store may legitimately appear twice, once for
    /// ordering and once for forwarded data.
    pub fn add_mem_src(&mut self, kind: DepKind, producer: UopId, uop_num: u64) {
        debug_assert_ne!(kind, DepKind::RegData);
        if self
            .srcs
            .iter()
            .any(|src| src.kind == kind && src.uop_num == uop_num)
        {
            return;
        }
        assert!(
            self.srcs.len() < MAX_SRC_DEPS,
            "core_id:{} thread_id:{} uop_num:{} has too many source deps",
            self.core_id,
            self.thread_id,
            self.uop_num
        );
        self.srcs.push(SrcInfo {
            kind,
            producer,
            uop_num,
        });
        self.srcs_ready = false;
    }
}

impl std::fmt::Display for Uop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[c{} t{} #{}] {} pc=0x{:x}",
            self.core_id, self.thread_id, self.uop_num, self.kind, self.pc
        )
    }
}
