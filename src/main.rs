use std::path::PathBuf;

use clap::Parser;
use reusim::sim::top::{ReusimTop, TopConfig};

#[derive(Parser)]
#[command(version, about)]
struct ReusimArgs {
    /// Benchmark name; traces are read from <output_dir>/<benchmark>/
    benchmark: String,

    #[arg(long, default_value = "output")]
    output_dir: PathBuf,
    #[arg(long, default_value = "configurations")]
    config_dir: PathBuf,
}

pub fn main() {
    env_logger::init();
    let argv = ReusimArgs::parse();

    let config = TopConfig {
        benchmark: argv.benchmark,
        output_dir: argv.output_dir,
        config_dir: argv.config_dir,
    };
    let result = ReusimTop::new(config).and_then(|top| top.run());
    if let Err(err) = result {
        println!("error: {:#}", err);
        std::process::exit(1);
    }
}
