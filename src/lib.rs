#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

pub mod alloc;
pub mod bp;
pub mod config;
pub mod core;
pub mod dep_map;
pub mod exec;
pub mod frontend;
pub mod mem;
pub mod pool;
pub mod queue;
pub mod retire;
pub mod rob;
pub mod scheduler;
pub mod sim;
pub mod trace;
pub mod uop;

pub use config::{CoreConfig, CoreFlavor, SchedulerKind};
pub use self::core::Core;
pub use sim::Simulation;
pub use trace::{TraceBuilder, TraceSource};

/// Simulated clock, in core cycles.
pub type Cycle = u64;

/// Simulated virtual address.
pub type Address = u64;
