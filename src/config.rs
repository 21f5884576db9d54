use crate::uop::NUM_QUEUE_KINDS;
use crate::Cycle;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
}

/// Which pipeline the core models.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum CoreFlavor {
    #[default]
    Cpu,
    Gpu,
}

/// Issue policy, fixed for the core's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    InOrder,
    #[default]
    OutOfOrder,
    Gpu,
}

/// Direction/target predictor sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchConfig {
    /// Global history bits folded into the pattern table index.
    pub hist_length: u32,
    /// Saturating counter width per pattern table entry.
    pub ctr_bits: u32,
    /// Direct-mapped target buffer entries.
    pub btb_entries: usize,
    /// Cycles added on top of the 1-cycle redirect after any recovery.
    pub extra_recovery_cycles: Cycle,
    /// Treat every branch as correctly predicted.
    pub perfect: bool,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            hist_length: 14,
            ctr_bits: 2,
            btb_entries: 1024,
            extra_recovery_cycles: 2,
            perfect: false,
        }
    }
}

/// Memory-hierarchy model sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub hit_latency: Cycle,
    pub miss_latency: Cycle,
    /// Outstanding-miss request slots.
    pub num_request_slots: usize,
    pub line_size: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            hit_latency: 4,
            miss_latency: 100,
            num_request_slots: 8,
            line_size: 64,
        }
    }
}

/// Per-core configuration, populated once at construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub flavor: CoreFlavor,
    pub scheduler: SchedulerKind,

    /// Pipeline width: allocate/schedule/retire per cycle.
    pub width: usize,
    pub rob_size: usize,

    /// 1 shared allocation queue, or one per category (general/memory/float).
    pub num_alloc_queues: usize,
    pub alloc_queue_size: usize,
    /// Allocation-to-schedule aging latency.
    pub alloc_to_sched_latency: Cycle,

    pub frontend_queue_size: usize,
    /// Fetch-to-allocate aging latency.
    pub fetch_latency: Cycle,

    /// Scheduler occupancy cap per queue category.
    pub sched_size: [usize; NUM_QUEUE_KINDS],
    /// Entries admitted into the scheduler per category per cycle.
    pub sched_rate: [usize; NUM_QUEUE_KINDS],
    /// Ring capacity of the out-of-order schedule list.
    pub sched_list_size: usize,
    /// Cap scheduled micro-ops per cycle at `width`.
    pub schedule_to_width: bool,

    /// Issue ports per queue category.
    pub max_ports: [usize; NUM_QUEUE_KINDS],

    pub store_buffer_size: usize,
    pub load_buffer_size: usize,
    pub int_regfile_size: usize,
    pub fp_regfile_size: usize,

    /// Concurrently resident threads (1 for the CPU shapes).
    pub max_threads: usize,
    /// Parallel warp schedulers (GPU shape).
    pub num_warp_schedulers: usize,
    /// The GPU scheduler runs once every this many core cycles.
    pub gpu_schedule_ratio: u64,
    /// Stop fetching a thread past an outstanding load miss (GPU shape).
    pub fetch_only_load_ready: bool,
    /// Stop fetching a thread past an unresolved branch (GPU shape).
    pub no_fetch_on_branch: bool,

    /// Override every compute latency with 1 cycle.
    pub one_cycle_exec: bool,
    /// Completion-to-retire floor applied to every finished micro-op.
    pub exec_retire_latency: Cycle,

    pub branch: BranchConfig,
    pub mem: MemoryConfig,

    /// Track store-to-load dependences at all.
    pub obey_store_deps: bool,
    /// Allow store forwarding out of order; otherwise every memory op is
    /// ordered behind the single most recent store.
    pub ooo_stores: bool,
    /// Register-map table size (register ids).
    pub num_reg_ids: usize,

    /// Fatal liveness limit: consecutive cycles without a retired
    /// instruction.
    pub forward_progress_limit: u64,
    /// Per-thread retired-instruction cap; the thread terminates as if its
    /// last micro-op retired.
    pub max_insts: u64,
    /// Extra full runs of the trace after the first completes.
    pub trace_repeats: u64,

    pub uop_pool_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::out_of_order()
    }
}

impl CoreConfig {
    /// Single-threaded out-of-order pipeline.
    #[must_use]
    pub fn out_of_order() -> Self {
        Self {
            flavor: CoreFlavor::Cpu,
            scheduler: SchedulerKind::OutOfOrder,
            width: 4,
            rob_size: 64,
            num_alloc_queues: 3,
            alloc_queue_size: 32,
            alloc_to_sched_latency: 1,
            frontend_queue_size: 32,
            fetch_latency: 1,
            sched_size: [16, 16, 16],
            sched_rate: [4, 4, 4],
            sched_list_size: 64,
            schedule_to_width: true,
            max_ports: [4, 2, 2],
            store_buffer_size: 16,
            load_buffer_size: 16,
            int_regfile_size: 64,
            fp_regfile_size: 64,
            max_threads: 1,
            num_warp_schedulers: 1,
            gpu_schedule_ratio: 1,
            fetch_only_load_ready: false,
            no_fetch_on_branch: false,
            one_cycle_exec: false,
            exec_retire_latency: 1,
            branch: BranchConfig::default(),
            mem: MemoryConfig::default(),
            obey_store_deps: true,
            ooo_stores: true,
            num_reg_ids: 256,
            forward_progress_limit: 100_000,
            max_insts: u64::MAX,
            trace_repeats: 0,
            uop_pool_size: 512,
        }
    }

    /// Single-threaded strict in-order pipeline.
    #[must_use]
    pub fn in_order() -> Self {
        Self {
            scheduler: SchedulerKind::InOrder,
            width: 2,
            rob_size: 32,
            num_alloc_queues: 1,
            sched_size: [8, 8, 8],
            sched_rate: [2, 2, 2],
            max_ports: [2, 1, 1],
            ..Self::out_of_order()
        }
    }

    /// Many-thread GPU-style core: per-thread reorder buffers, round-robin
    /// warp schedulers, slower schedule clock.
    #[must_use]
    pub fn gpu() -> Self {
        Self {
            flavor: CoreFlavor::Gpu,
            scheduler: SchedulerKind::Gpu,
            width: 8,
            rob_size: 16,
            num_alloc_queues: 1,
            alloc_queue_size: 64,
            sched_size: [64, 64, 64],
            sched_rate: [8, 8, 8],
            sched_list_size: 512,
            schedule_to_width: false,
            max_ports: [8, 4, 4],
            max_threads: 32,
            num_warp_schedulers: 2,
            gpu_schedule_ratio: 4,
            fetch_only_load_ready: true,
            no_fetch_on_branch: true,
            uop_pool_size: 4096,
            ..Self::out_of_order()
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.width == 0 {
            return Err(Error::Invalid("width must be positive".into()));
        }
        if self.rob_size == 0 {
            return Err(Error::Invalid("rob_size must be positive".into()));
        }
        if self.num_alloc_queues != 1 && self.num_alloc_queues != NUM_QUEUE_KINDS {
            return Err(Error::Invalid(format!(
                "num_alloc_queues must be 1 or {NUM_QUEUE_KINDS}, got {}",
                self.num_alloc_queues
            )));
        }
        if self.branch.hist_length == 0 || self.branch.hist_length > 28 {
            return Err(Error::Invalid(format!(
                "branch.hist_length must be within 1..=28, got {}",
                self.branch.hist_length
            )));
        }
        if self.branch.ctr_bits == 0 || self.branch.ctr_bits > 7 {
            return Err(Error::Invalid(format!(
                "branch.ctr_bits must be within 1..=7, got {}",
                self.branch.ctr_bits
            )));
        }
        if self.gpu_schedule_ratio == 0 {
            return Err(Error::Invalid("gpu_schedule_ratio must be positive".into()));
        }
        if self.scheduler == SchedulerKind::Gpu && self.num_warp_schedulers == 0 {
            return Err(Error::Invalid(
                "num_warp_schedulers must be positive for the gpu scheduler".into(),
            ));
        }
        if self.max_threads == 0 {
            return Err(Error::Invalid("max_threads must be positive".into()));
        }
        if self.sched_list_size < self.sched_size.iter().sum::<usize>() {
            return Err(Error::Invalid(
                "sched_list_size must cover the per-category scheduler sizes".into(),
            ));
        }
        Ok(())
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, Error> {
        let reader = std::io::BufReader::new(std::fs::File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }
}
