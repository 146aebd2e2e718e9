use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Result};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::model::runs::{decompose, run_all_cases};
use crate::model::scheduler::schedule_threads;
use crate::sim::config::{CacheConfig, Hardware, ModelConfig};
use crate::sim::report;
use crate::sim::trace::{read_trace, KernelTrace};

#[derive(Debug, Clone)]
pub struct TopConfig {
    pub benchmark: String,
    pub output_dir: PathBuf,
    pub config_dir: PathBuf,
}

/// Ties the whole model together: loads the configuration once, then
/// replays every kernel trace of the benchmark in turn.
pub struct ReusimTop {
    pub hw: Hardware,
    config: TopConfig,
}

impl ReusimTop {
    pub fn new(config: TopConfig) -> Result<Self> {
        let cache = CacheConfig::load(&config.config_dir.join("current.conf"))?;
        let model = ModelConfig::load(&config.config_dir.join("model.toml"));
        Ok(Self {
            hw: Hardware::new(cache, model),
            config,
        })
    }

    /// Processes kernel traces 00, 01, ... until the first one that does
    /// not exist. Not finding even the first is an error.
    pub fn run(&self) -> Result<()> {
        report::print_cache_banner(&self.hw);

        let bench_dir = self.config.output_dir.join(&self.config.benchmark);
        for kernel_id in 0u32.. {
            let kernel = format!("{}_{:02}", self.config.benchmark, kernel_id);
            let trace_path = bench_dir.join(format!("{}.trc", kernel));

            let Some(mut trace) = read_trace(&trace_path)? else {
                if kernel_id == 0 {
                    bail!("could not read trace file '{}'", trace_path.display());
                }
                break;
            };
            println!(
                "read trace for '{}': blocksize ({},{},{}), {} threads, {} loads",
                kernel,
                trace.block_dim.x,
                trace.block_dim.y,
                trace.block_dim.z,
                trace.threads.len(),
                trace.num_loads
            );
            if trace.num_loads == 0 || trace.block_dim.size() == 0 {
                if kernel_id == 0 {
                    bail!("'{}' is not a valid memory access trace", trace_path.display());
                }
                warn!("'{}' contains no loads, stopping here", trace_path.display());
                break;
            }

            self.run_kernel(&bench_dir, &kernel, &mut trace)?;
        }
        Ok(())
    }

    fn run_kernel(&self, bench_dir: &Path, kernel: &str, trace: &mut KernelTrace) -> Result<()> {
        let hw = &self.hw;
        let block_size = trace.block_dim.size();

        info!("assigning threads to warps/blocks/cores");
        let schedule = schedule_threads(&mut trace.threads, hw, block_size);

        // Only a single core is modeled; its block list is the round-robin
        // stripe assigned by the scheduler.
        let core_id = 0;
        let core = &schedule.cores[core_id];
        let hardware_max = (hw.max_active_threads / block_size).min(hw.max_active_blocks);
        let active_blocks = core.len().min(hardware_max).max(1);
        ensure!(!core.is_empty(), "no blocks assigned to core {}", core_id);
        println!("core {}: running {} block(s) at a time", core_id, active_blocks);

        let rng = StdRng::seed_from_u64(hw.seed);
        let histograms = run_all_cases(core, &schedule, &mut trace.threads, hw, active_blocks, &rng);
        let breakdown = decompose(&histograms, hw);

        report::print_top_distances(&histograms[0]);
        report::print_breakdown(&breakdown);

        let out_path = bench_dir.join(format!("{}.out", kernel));
        report::write_results(&out_path, hw, &histograms[0], &breakdown)?;

        let prof_path = bench_dir.join(format!("{}.prof", kernel));
        match report::read_verification(&prof_path)? {
            Some(verification) => {
                report::print_verification(&verification);
                report::append_verification(&out_path, &verification)?;
            }
            None => println!("no verifier data available, skipping verification"),
        }
        Ok(())
    }
}
