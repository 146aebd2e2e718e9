use log::warn;
use rand::rngs::StdRng;

use crate::model::engine::{reuse_distance, RunParams};
use crate::model::histogram::{Distance, Histogram};
use crate::model::scheduler::Schedule;
use crate::model::thread::Thread;
use crate::sim::config::Hardware;

/// The four simulation passes. Passes 1-3 each disable one mechanism so
/// its contribution can be read off against the normal pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCase {
    Normal,
    FullyAssociative,
    ZeroLatency,
    UnlimitedMshr,
}

pub const NUM_CASES: usize = 4;

impl RunCase {
    pub const ALL: [RunCase; NUM_CASES] = [
        RunCase::Normal,
        RunCase::FullyAssociative,
        RunCase::ZeroLatency,
        RunCase::UnlimitedMshr,
    ];

    pub fn params(self, hw: &Hardware) -> RunParams {
        let mut params = RunParams {
            cache_sets: hw.cache_sets,
            cache_ways: hw.cache_ways,
            mem_latency: hw.mem_latency,
            mem_latency_stddev: hw.mem_latency_stddev,
            non_mem_latency: hw.non_mem_latency,
            num_mshr: hw.num_mshr as usize,
        };
        match self {
            RunCase::Normal => {}
            RunCase::FullyAssociative => {
                params.cache_ways = hw.cache_ways * hw.cache_sets as u32;
                params.cache_sets = 1;
            }
            RunCase::ZeroLatency => {
                params.mem_latency = 0;
                params.mem_latency_stddev = 0;
                params.non_mem_latency = 0;
            }
            RunCase::UnlimitedMshr => {
                params.num_mshr = usize::MAX;
            }
        }
        params
    }
}

/// Runs all four passes over the same schedule. Every pass starts from a
/// clone of the same generator so they see identical latency jitter.
pub fn run_all_cases(
    core: &[u32],
    schedule: &Schedule,
    threads: &mut [Thread],
    hw: &Hardware,
    active_blocks: usize,
    rng: &StdRng,
) -> Vec<Histogram> {
    RunCase::ALL
        .iter()
        .map(|case| {
            let params = case.params(hw);
            let mut case_rng = rng.clone();
            reuse_distance(
                core,
                schedule,
                threads,
                hw,
                &params,
                active_blocks,
                &mut case_rng,
            )
        })
        .collect()
}

/// Modeled misses of the normal pass, split by cause, plus the raw
/// totals of the comparison passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MissBreakdown {
    pub compulsory: u64,
    pub capacity: u64,
    pub associativity: u64,
    pub latency: u64,
    pub mshr: u64,
    pub tot_associativity: u64,
    pub tot_latency: u64,
    pub tot_mshr: u64,
    pub hits: u64,
    pub total_misses: u64,
}

impl MissBreakdown {
    pub fn total_accesses(&self) -> u64 {
        self.total_misses + self.hits
    }

    pub fn miss_rate(&self) -> f64 {
        if self.total_accesses() == 0 {
            return 0.0;
        }
        100.0 * self.total_misses as f64 / self.total_accesses() as f64
    }
}

/// Reduces the four histograms to categorized miss counts.
///
/// Each comparison pass is differenced against the normal pass; whatever
/// the differences leave unexplained is attributed to capacity. A
/// negative remainder is taken back from the first sufficiently large
/// category, mshr first, then latency, then associativity.
pub fn decompose(histograms: &[Histogram], hw: &Hardware) -> MissBreakdown {
    assert_eq!(histograms.len(), NUM_CASES);

    let mut miss_compulsory = [0u64; NUM_CASES];
    let mut miss_capacity = [0u64; NUM_CASES];
    let mut miss = [0u64; NUM_CASES];
    let mut hits = 0u64;

    for (case, hist) in histograms.iter().enumerate() {
        let ways = RunCase::ALL[case].params(hw).cache_ways;
        for (distance, freq) in hist.iter() {
            match distance {
                Distance::Infinite => miss_compulsory[case] += freq,
                Distance::Finite(d) if d > ways => miss_capacity[case] += freq,
                Distance::Finite(_) => {
                    if case == 0 {
                        hits += freq;
                    }
                }
            }
        }
        miss[case] = miss_compulsory[case] + miss_capacity[case];
    }

    if miss[1] > miss[0] {
        warn!(
            "more misses with full associativity ({}) than with set associativity ({})",
            miss[1], miss[0]
        );
    }
    if miss[2] > miss[0] {
        warn!(
            "more misses without latency ({}) than with latency ({})",
            miss[2], miss[0]
        );
    }
    if miss[3] > miss[0] {
        warn!(
            "more misses with unlimited MSHRs ({}) than with limited MSHRs ({})",
            miss[3], miss[0]
        );
    }

    let mut associativity = miss[0] as i64 - miss[1] as i64;
    let mut latency = miss_compulsory[0] as i64 - miss_compulsory[2] as i64;
    let mut mshr = miss[0] as i64 - miss[3] as i64;
    let compulsory = miss_compulsory[2] as i64;

    let rest = miss[0] as i64
        - (compulsory + latency.max(0) + associativity.max(0) + mshr.max(0));
    let capacity = rest.max(0);
    if rest < 0 {
        if mshr > -rest {
            mshr += rest;
        } else if latency > -rest {
            latency += rest;
        } else {
            associativity += rest;
        }
    }

    MissBreakdown {
        compulsory: compulsory as u64,
        capacity: capacity as u64,
        associativity: associativity.max(0) as u64,
        latency: latency.max(0) as u64,
        mshr: mshr.max(0) as u64,
        tot_associativity: miss[1],
        tot_latency: miss[2],
        tot_mshr: miss[3],
        hits,
        total_misses: miss[0],
    }
}

#[cfg(test)]
mod tests {
    use super::{decompose, run_all_cases, MissBreakdown, RunCase, NUM_CASES};
    use crate::model::histogram::{Distance, Histogram};
    use crate::model::scheduler::schedule_threads;
    use crate::model::thread::{Access, Thread};
    use crate::sim::config::Hardware;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn histograms_of(entries: &[&[(Distance, u64)]]) -> Vec<Histogram> {
        entries
            .iter()
            .map(|case| {
                let mut hist = Histogram::new();
                for &(distance, freq) in case.iter() {
                    for _ in 0..freq {
                        hist.record(distance);
                    }
                }
                hist
            })
            .collect()
    }

    fn sum_of_categories(b: &MissBreakdown) -> u64 {
        b.compulsory + b.capacity + b.associativity + b.latency + b.mshr
    }

    #[test]
    fn fully_associative_pass_widens_the_ways() {
        let hw = Hardware::for_tests();
        let params = RunCase::FullyAssociative.params(&hw);
        assert_eq!(params.cache_sets, 1);
        assert_eq!(params.cache_ways, hw.cache_ways * hw.cache_sets as u32);
        let normal = RunCase::Normal.params(&hw);
        assert_eq!(normal.cache_sets, hw.cache_sets);
    }

    #[test]
    fn zero_latency_pass_clears_all_latencies() {
        let hw = Hardware::for_tests();
        let params = RunCase::ZeroLatency.params(&hw);
        assert_eq!(params.mem_latency, 0);
        assert_eq!(params.mem_latency_stddev, 0);
        assert_eq!(params.non_mem_latency, 0);
        assert_eq!(RunCase::UnlimitedMshr.params(&hw).num_mshr, usize::MAX);
    }

    #[test]
    fn pure_hits_and_compulsory_misses_decompose_cleanly() {
        let hw = Hardware::for_tests();
        let inf = Distance::Infinite;
        let near = Distance::Finite(0);
        let histograms = histograms_of(&[
            &[(inf, 4), (near, 12)],
            &[(inf, 4), (near, 12)],
            &[(inf, 4), (near, 12)],
            &[(inf, 4), (near, 12)],
        ]);
        let breakdown = decompose(&histograms, &hw);
        assert_eq!(breakdown.compulsory, 4);
        assert_eq!(breakdown.capacity, 0);
        assert_eq!(breakdown.associativity, 0);
        assert_eq!(breakdown.latency, 0);
        assert_eq!(breakdown.mshr, 0);
        assert_eq!(breakdown.hits, 12);
        assert_eq!(breakdown.total_misses, 4);
        assert_eq!(sum_of_categories(&breakdown), breakdown.total_misses);
        assert!((breakdown.miss_rate() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn associativity_misses_come_from_the_single_set_pass() {
        let hw = Hardware::for_tests();
        let inf = Distance::Infinite;
        // Ten conflict misses under set mapping turn into near hits with
        // one wide set.
        let far = Distance::Finite(hw.cache_ways + 1);
        let near = Distance::Finite(1);
        let histograms = histograms_of(&[
            &[(inf, 2), (far, 10)],
            &[(inf, 2), (near, 10)],
            &[(inf, 2), (far, 10)],
            &[(inf, 2), (far, 10)],
        ]);
        let breakdown = decompose(&histograms, &hw);
        assert_eq!(breakdown.total_misses, 12);
        assert_eq!(breakdown.associativity, 10);
        assert_eq!(breakdown.compulsory, 2);
        assert_eq!(breakdown.capacity, 0);
        assert_eq!(sum_of_categories(&breakdown), breakdown.total_misses);
    }

    #[test]
    fn latency_misses_are_extra_cold_uses_of_the_timed_pass() {
        let hw = Hardware::for_tests();
        let inf = Distance::Infinite;
        let near = Distance::Finite(0);
        // With latency, reuse of an in-flight line still reads as a first
        // use; the zero-latency pass turns those into hits.
        let histograms = histograms_of(&[
            &[(inf, 8), (near, 4)],
            &[(inf, 8), (near, 4)],
            &[(inf, 5), (near, 7)],
            &[(inf, 8), (near, 4)],
        ]);
        let breakdown = decompose(&histograms, &hw);
        assert_eq!(breakdown.total_misses, 8);
        assert_eq!(breakdown.compulsory, 5);
        assert_eq!(breakdown.latency, 3);
        assert_eq!(breakdown.capacity, 0);
        assert_eq!(sum_of_categories(&breakdown), breakdown.total_misses);
    }

    #[test]
    fn mshr_misses_vanish_with_unlimited_registers() {
        let hw = Hardware::for_tests();
        let inf = Distance::Infinite;
        let near = Distance::Finite(0);
        let far = Distance::Finite(hw.cache_ways * hw.cache_sets as u32 + 1);
        let histograms = histograms_of(&[
            &[(inf, 4), (far, 3), (near, 3)],
            &[(inf, 4), (far, 3), (near, 3)],
            &[(inf, 4), (far, 3), (near, 3)],
            &[(inf, 4), (far, 1), (near, 5)],
        ]);
        let breakdown = decompose(&histograms, &hw);
        assert_eq!(breakdown.total_misses, 7);
        assert_eq!(breakdown.mshr, 2);
        assert_eq!(breakdown.compulsory, 4);
        assert_eq!(breakdown.tot_mshr, 5);
        // The remaining capacity miss is whatever the differences leave.
        assert_eq!(breakdown.capacity, 1);
        assert_eq!(breakdown.hits, 3);
        assert_eq!(sum_of_categories(&breakdown), breakdown.total_misses);
    }

    #[test]
    fn negative_remainder_is_taken_back_from_mshr_first() {
        let hw = Hardware::for_tests();
        let inf = Distance::Infinite;
        let near = Distance::Finite(0);
        // Far enough to count as a capacity miss in every pass, including
        // the single wide set of the fully-associative one.
        let far = Distance::Finite(hw.cache_ways * hw.cache_sets as u32 + 1);
        // The latency and mshr differences overlap: together they claim
        // more than the normal pass actually missed.
        let histograms = histograms_of(&[
            &[(inf, 8), (far, 2)],
            &[(inf, 8), (far, 2)],
            &[(inf, 5), (far, 2), (near, 3)],
            &[(inf, 4), (far, 2), (near, 4)],
        ]);
        let breakdown = decompose(&histograms, &hw);
        assert_eq!(breakdown.total_misses, 10);
        assert_eq!(breakdown.compulsory, 5);
        assert_eq!(breakdown.latency, 3);
        assert_eq!(breakdown.associativity, 0);
        // The raw mshr difference of 4 gives the 2 surplus misses back.
        assert_eq!(breakdown.mshr, 2);
        assert_eq!(breakdown.capacity, 0);
        assert_eq!(sum_of_categories(&breakdown), breakdown.total_misses);
    }

    #[test]
    fn four_passes_share_jitter_and_agree_on_totals() {
        let hw = Hardware::for_tests();
        let mut threads: Vec<Thread> = (0..32).map(|_| Thread::new()).collect();
        for (tid, thread) in threads.iter_mut().enumerate() {
            thread.push_access(Access::load(4 * tid as u64, 4));
            thread.push_access(Access::load(4 * tid as u64 + 4096, 4));
        }
        let schedule = schedule_threads(&mut threads, &hw, 32);
        let rng = StdRng::seed_from_u64(hw.seed);
        let histograms = run_all_cases(
            &schedule.cores[0],
            &schedule,
            &mut threads,
            &hw,
            hw.max_active_blocks,
            &rng,
        );
        assert_eq!(histograms.len(), NUM_CASES);
        for hist in &histograms {
            assert_eq!(hist.total(), 2);
        }
        let breakdown = decompose(&histograms, &hw);
        assert_eq!(breakdown.total_misses + breakdown.hits, 2);
    }
}
