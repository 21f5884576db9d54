use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre;
use console::style;

use pipesim::config::CoreConfig;
use pipesim::sim::Simulation;
use pipesim::trace::TraceSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Preset {
    InOrder,
    OutOfOrder,
    Gpu,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "cycle-level pipeline core simulator")]
struct Options {
    /// Trace files (JSON), one simulated core per file.
    #[arg(required = true, value_name = "TRACE")]
    traces: Vec<PathBuf>,

    /// Core configuration file. Overrides the preset.
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Built-in core configuration.
    #[arg(long, value_enum, default_value_t = Preset::OutOfOrder)]
    preset: Preset,

    /// Stop after this many cycles even if cores are still busy.
    #[arg(long, value_name = "CYCLES")]
    cycle_limit: Option<u64>,

    /// Write the full per-core counters as JSON.
    #[arg(long, value_name = "PATH")]
    stats: Option<PathBuf>,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let options = Options::parse();

    let config = match &options.config {
        Some(path) => CoreConfig::from_file(path)?,
        None => match options.preset {
            Preset::InOrder => CoreConfig::in_order(),
            Preset::OutOfOrder => CoreConfig::out_of_order(),
            Preset::Gpu => CoreConfig::gpu(),
        },
    };

    let traces = options
        .traces
        .iter()
        .map(|path| TraceSource::from_file(path))
        .collect::<Result<Vec<_>, _>>()?;

    let mut sim = Simulation::homogeneous(&config, traces);
    if let Some(limit) = options.cycle_limit {
        sim.set_cycle_limit(limit);
    }

    let start = std::time::Instant::now();
    let stats = sim.run();
    let wall = start.elapsed();

    let total = stats.reduce();
    let cycles = sim.cycle();
    let ipc = total.sim.instructions as f64 / cycles.max(1) as f64;

    println!("{}", style("simulation finished").bold());
    println!(
        "  {} cores, {cycles} cycles, {:.2?} wall clock",
        sim.num_cores(),
        wall
    );
    println!(
        "  {} instructions, {} uops, ipc {ipc:.3}",
        total.sim.instructions, total.sim.uops
    );
    println!(
        "  branches: {} predicted, {} mispredicted, {} btb misses",
        total.branch.predictions, total.branch.mispredictions, total.branch.btb_misses
    );
    println!(
        "  memory: {} accesses, {} hits, {} misses, {} forwarded loads",
        total.mem.accesses, total.mem.hits, total.mem.misses, total.mem.forwarded_loads
    );

    if let Some(path) = &options.stats {
        let writer = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer_pretty(writer, &stats)?;
        println!("wrote counters to {}", path.display());
    }
    Ok(())
}
