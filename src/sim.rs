use crate::config::CoreConfig;
use crate::core::Core;
use crate::trace::TraceSource;
use crate::Cycle;

/// Cycles between progress heartbeats in the log.
const HEARTBEAT_INTERVAL: Cycle = 100_000;

/// Drives a set of independent cores in lockstep, one call to
/// [`Simulation::run_cycle`] per simulated cycle across all of them.
pub struct Simulation {
    cores: Vec<Core>,
    cycle: Cycle,
    cycle_limit: Option<Cycle>,
}

impl Simulation {
    #[must_use]
    pub fn new(cores: Vec<Core>) -> Self {
        Self {
            cores,
            cycle: 0,
            cycle_limit: None,
        }
    }

    /// One core per trace, all with the same configuration.
    #[must_use]
    pub fn homogeneous(config: &CoreConfig, traces: Vec<TraceSource>) -> Self {
        let cores = traces
            .into_iter()
            .enumerate()
            .map(|(core_id, trace)| Core::new(core_id, config.clone(), trace))
            .collect();
        Self::new(cores)
    }

    /// Stops [`Simulation::run`] after this many cycles even if cores are
    /// still busy.
    pub fn set_cycle_limit(&mut self, limit: Cycle) {
        self.cycle_limit = Some(limit);
    }

    #[must_use]
    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    #[must_use]
    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    #[must_use]
    pub fn done(&self) -> bool {
        self.cores.iter().all(Core::done)
    }

    pub fn run_cycle(&mut self) {
        for core in &mut self.cores {
            if !core.done() {
                core.run_cycle();
            }
        }
        self.cycle += 1;
        if self.cycle % HEARTBEAT_INTERVAL == 0 {
            let retired: u64 = self
                .cores
                .iter()
                .map(Core::instructions_retired)
                .sum();
            log::info!(
                "cycle {}: {retired} instructions retired across {} cores",
                self.cycle,
                self.cores.len()
            );
        }
    }

    /// Runs every core to completion (or to the cycle limit) and returns the
    /// collected counters.
    pub fn run(&mut self) -> stats::Stats {
        while !self.done() {
            if let Some(limit) = self.cycle_limit {
                if self.cycle >= limit {
                    log::warn!("cycle limit of {limit} reached, stopping early");
                    break;
                }
            }
            self.run_cycle();
        }
        self.stats()
    }

    /// Per-core counters as of now.
    #[must_use]
    pub fn stats(&self) -> stats::Stats {
        stats::Stats {
            per_core: self.cores.iter().map(|core| core.stats.clone()).collect(),
        }
    }
}
