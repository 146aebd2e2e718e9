use std::fs;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::model::histogram::Histogram;
use crate::model::runs::MissBreakdown;
use crate::sim::config::Hardware;

/// How many of the most frequent distances the stdout report shows.
const PRINT_MAX_DISTANCES: usize = 10;

pub fn print_cache_banner(hw: &Hardware) {
    println!("cache configuration:");
    println!("  size: ~{}KB", hw.cache_bytes / 1024);
    println!("  line size: {} bytes", hw.line_size);
    println!("  layout: {} ways, {} sets", hw.cache_ways, hw.cache_sets);
}

pub fn print_top_distances(hist: &Histogram) {
    println!("top reuse distances, as [distance] => frequency:");
    for (distance, freq) in hist.by_frequency().into_iter().take(PRINT_MAX_DISTANCES) {
        println!("  [{}] => {}", distance, freq);
    }
}

pub fn print_breakdown(breakdown: &MissBreakdown) {
    println!("modeled cache miss rate:");
    println!("  total accesses: {}", breakdown.total_accesses());
    println!(
        "  of which are misses: {} + {} + {} + {} + {} = {} (compulsory + capacity + associativity + latency + mshr)",
        breakdown.compulsory,
        breakdown.capacity,
        breakdown.associativity,
        breakdown.latency,
        breakdown.mshr,
        breakdown.total_misses
    );
    println!("  of which are hits: {}", breakdown.hits);
    println!("  miss rate: {:.4}%", breakdown.miss_rate());
}

/// Writes the `.out` result file: the cache geometry, the normal pass's
/// histogram sorted by distance, and the modeled totals.
pub fn write_results(
    path: &Path,
    hw: &Hardware,
    hist: &Histogram,
    breakdown: &MissBreakdown,
) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("could not create result file '{}'", path.display()))?;
    let mut out = BufWriter::new(file);

    writeln!(out, "line_size: {}", hw.line_size)?;
    writeln!(out, "cache_bytes: {}", hw.cache_bytes)?;
    writeln!(out, "cache_lines: {}", hw.cache_lines)?;
    writeln!(out, "cache_ways: {}", hw.cache_ways)?;
    writeln!(out, "cache_sets: {}", hw.cache_sets)?;

    writeln!(out)?;
    writeln!(out, "histogram:")?;
    for (distance, freq) in hist.sorted() {
        writeln!(out, "{} {}", distance.sentinel(), freq)?;
    }
    writeln!(out)?;

    writeln!(out, "modelled_accesses: {}", breakdown.total_accesses())?;
    writeln!(out, "modelled_misses(compulsory): {}", breakdown.compulsory)?;
    writeln!(out, "modelled_misses(capacity): {}", breakdown.capacity)?;
    writeln!(out, "modelled_misses(associativity): {}", breakdown.associativity)?;
    writeln!(out, "modelled_misses(latency): {}", breakdown.latency)?;
    writeln!(out, "modelled_misses(mshr): {}", breakdown.mshr)?;
    writeln!(out, "modelled_misses(tot_associativity): {}", breakdown.tot_associativity)?;
    writeln!(out, "modelled_misses(tot_latency): {}", breakdown.tot_latency)?;
    writeln!(out, "modelled_misses(tot_mshr): {}", breakdown.tot_mshr)?;
    writeln!(out, "modelled_hits: {}", breakdown.hits)?;
    writeln!(out, "modelled_miss_rate: {:.4}", breakdown.miss_rate())?;

    out.flush()?;
    Ok(())
}

/// Hit and miss counts measured on hardware, from a `.prof` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub hits: u64,
    pub misses: u64,
}

impl Verification {
    pub fn total_accesses(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn miss_rate(&self) -> f64 {
        if self.total_accesses() == 0 {
            return 0.0;
        }
        100.0 * self.misses as f64 / self.total_accesses() as f64
    }
}

/// Reads the measured hit/miss pair; `Ok(None)` when no profile exists.
pub fn read_verification(path: &Path) -> Result<Option<Verification>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("could not read '{}'", path.display()))
        }
    };
    let mut tokens = text.split_whitespace();
    let (Some(hits), Some(misses)) = (tokens.next(), tokens.next()) else {
        bail!("verifier file '{}' needs two counters", path.display());
    };
    Ok(Some(Verification {
        hits: hits
            .parse()
            .with_context(|| format!("bad hit count in '{}'", path.display()))?,
        misses: misses
            .parse()
            .with_context(|| format!("bad miss count in '{}'", path.display()))?,
    }))
}

pub fn print_verification(verification: &Verification) {
    println!("cache miss rate according to verification data:");
    println!("  total accesses: {}", verification.total_accesses());
    println!("  misses: {}", verification.misses);
    println!("  hits: {}", verification.hits);
    println!("  miss rate: {:.4}%", verification.miss_rate());
}

/// Appends the measured counters to an already-written result file.
pub fn append_verification(path: &Path, verification: &Verification) -> Result<()> {
    let file = fs::OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("could not append to '{}'", path.display()))?;
    let mut out = BufWriter::new(file);
    writeln!(out)?;
    writeln!(out, "verified_misses: {}", verification.misses)?;
    writeln!(out, "verified_hits: {}", verification.hits)?;
    writeln!(out, "verified_miss_rate: {:.4}", verification.miss_rate())?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        append_verification, read_verification, write_results, Verification,
    };
    use crate::model::histogram::{Distance, Histogram};
    use crate::model::runs::MissBreakdown;
    use crate::sim::config::Hardware;
    use std::fs;
    use std::path::PathBuf;

    fn temp_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("reusim_report_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn result_file_lists_geometry_histogram_and_misses() {
        let hw = Hardware::for_tests();
        let mut hist = Histogram::new();
        hist.record(Distance::Infinite);
        hist.record(Distance::Finite(2));
        hist.record(Distance::Finite(2));
        let breakdown = MissBreakdown {
            compulsory: 1,
            hits: 2,
            total_misses: 1,
            ..Default::default()
        };

        let path = temp_file("results.out");
        write_results(&path, &hw, &hist, &breakdown).unwrap();
        let text = fs::read_to_string(&path).unwrap();

        assert!(text.contains("line_size: 128\n"));
        assert!(text.contains("cache_sets: 32\n"));
        assert!(text.contains("histogram:\n2 2\n99999999 1\n"));
        assert!(text.contains("modelled_accesses: 3\n"));
        assert!(text.contains("modelled_misses(compulsory): 1\n"));
        assert!(text.contains("modelled_hits: 2\n"));
        assert!(text.contains("modelled_miss_rate: 33.3333\n"));
    }

    #[test]
    fn verification_is_appended_after_the_model_lines() {
        let hw = Hardware::for_tests();
        let hist = Histogram::new();
        let breakdown = MissBreakdown::default();
        let path = temp_file("verified.out");
        write_results(&path, &hw, &hist, &breakdown).unwrap();

        let verification = Verification {
            hits: 1000,
            misses: 50,
        };
        append_verification(&path, &verification).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("verified_misses: 50\n"));
        assert!(text.contains("verified_hits: 1000\n"));
        assert!(text.contains("verified_miss_rate: 4.7619\n"));
    }

    #[test]
    fn missing_profile_reads_as_none() {
        let path = temp_file("never_written.prof");
        let _ = fs::remove_file(&path);
        assert!(read_verification(&path).unwrap().is_none());
    }

    #[test]
    fn profile_lists_hits_then_misses() {
        let path = temp_file("kernel.prof");
        fs::write(&path, "1000 50\n").unwrap();
        let verification = read_verification(&path).unwrap().unwrap();
        assert_eq!(verification.hits, 1000);
        assert_eq!(verification.misses, 50);
        assert!((verification.miss_rate() - 100.0 * 50.0 / 1050.0).abs() < 1e-9);
    }

    #[test]
    fn short_profile_is_rejected() {
        let path = temp_file("short.prof");
        fs::write(&path, "1000\n").unwrap();
        assert!(read_verification(&path).is_err());
    }
}
