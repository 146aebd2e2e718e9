use std::collections::HashMap;

use log::error;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::model::histogram::{Distance, Histogram};
use crate::model::mapping::line_addr_to_set;
use crate::model::pool::{RequestQueue, WarpPool};
use crate::model::scheduler::Schedule;
use crate::model::thread::Thread;
use crate::model::tree::SumTree;
use crate::model::Cycle;
use crate::sim::config::Hardware;

/// Extra tree capacity on top of the per-set access count.
const TREE_SLACK: usize = 256;

/// Cache geometry and timing for one simulation pass. The multi-pass
/// driver varies these while the trace and schedule stay fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    pub cache_sets: usize,
    pub cache_ways: u32,
    pub mem_latency: u32,
    pub mem_latency_stddev: u32,
    pub non_mem_latency: u32,
    pub num_mshr: usize,
}

/// Per-pass reuse bookkeeping: one tree and counter per set, plus the
/// global map from line address to its last-use timestamp.
struct SimContext {
    trees: Vec<SumTree>,
    last_use: HashMap<u64, u32>,
    set_counters: Vec<u32>,
}

/// Replays the blocks of one core and returns the reuse-distance
/// histogram merged over all sets.
///
/// Distances are measured at issue time against the tree state of the
/// previous commits; the tree itself only changes when a request's
/// latency elapses. That gap is what makes memory latency and MSHR
/// pressure visible in the histogram.
pub fn reuse_distance(
    core: &[u32],
    schedule: &Schedule,
    threads: &mut [Thread],
    hw: &Hardware,
    params: &RunParams,
    active_blocks: usize,
    rng: &mut StdRng,
) -> Histogram {
    let num_sets = params.cache_sets;
    let line_size = hw.line_size as u64;

    let totals = count_accesses_per_set(threads, hw, params);
    let grand_total: u64 = totals.iter().map(|&n| n as u64).sum();

    let mut ctx = SimContext {
        trees: totals
            .iter()
            .map(|&n| SumTree::new(n as usize + TREE_SLACK))
            .collect(),
        last_use: HashMap::new(),
        set_counters: vec![1; num_sets],
    };

    let jitter = Normal::new(0.0, params.mem_latency_stddev as f64)
        .expect("latency stddev must be non-negative");
    let mut distances = Histogram::new();
    let mut timestamp: Cycle = 0;

    let active_blocks = active_blocks.max(1);
    for group in 0..core.len().div_ceil(active_blocks) {
        let first = group * active_blocks;
        let last = (first + active_blocks).min(core.len());

        let mut pool = WarpPool::new();
        for &bid in &core[first..last] {
            for &wid in &schedule.blocks[bid as usize] {
                pool.add(wid, 0);
            }
        }
        pool.snapshot_size();

        let mut hit_queues: Vec<RequestQueue> =
            (0..num_sets).map(|_| RequestQueue::default()).collect();
        let mut miss_queues: Vec<RequestQueue> =
            (0..num_sets).map(|_| RequestQueue::default()).collect();

        while !pool.all_done() {
            // MSHR occupancy is sampled once per iteration; requests
            // issued below do not raise it until the next pass.
            let pending_misses: usize =
                miss_queues.iter().map(|q| q.pending_count()).sum();

            if pool.has_ready() {
                let wid = pool.take();
                let warp = &schedule.warps[wid as usize];
                if warp.is_empty() {
                    pool.mark_done();
                } else {
                    let mut max_future: Cycle = 0;
                    let mut threads_done = 0;

                    // Wide accesses issue as serialized sub-warp portions:
                    // 8-byte loads as two halves, 16-byte loads as four
                    // quarters.
                    let bytes = threads[warp[0] as usize].next_bytes();
                    let portions = ((bytes / 4).max(1) as usize).min(hw.warp_size);
                    let slice = hw.warp_size / portions;
                    for portion in 0..portions {
                        let start = portion * slice;
                        let stop = ((portion + 1) * slice).min(warp.len());
                        'lanes: for tnum in start..stop {
                            let tid = warp[tnum] as usize;
                            if threads[tid].is_done() {
                                threads_done += 1;
                                continue;
                            }
                            let access = threads[tid].schedule();
                            if access.width == 0 {
                                continue;
                            }

                            let line = access.address / line_size;
                            let line2 = access.end_address / line_size;
                            let touches = if line2 != line { 2 } else { 1 };
                            for touch in 0..touches {
                                let line_addr = if touch == 0 { line } else { line2 };
                                let set = line_addr_to_set(line_addr, num_sets, hw.mapping);
                                debug_assert!(set < num_sets);

                                let previous = ctx.last_use.get(&line_addr).copied();
                                if let Some(prev) = previous {
                                    assert!(
                                        prev < ctx.set_counters[set],
                                        "last use {} at or past set counter {}",
                                        prev,
                                        ctx.set_counters[set]
                                    );
                                }
                                let distance = match previous {
                                    Some(prev) => Distance::Finite(ctx.trees[set].count(prev)),
                                    None => Distance::Infinite,
                                };

                                let is_miss = match distance {
                                    Distance::Finite(d) => d >= params.cache_ways,
                                    Distance::Infinite => true,
                                };
                                if is_miss {
                                    let noise = jitter.sample(rng).round().abs() as Cycle;
                                    let latency = params.mem_latency as Cycle + noise;
                                    if latency > max_future {
                                        max_future = latency;
                                    }
                                    if pending_misses >= params.num_mshr
                                        && tnum == 0
                                        && touch == 0
                                    {
                                        // No MSHR left: roll the warp back and
                                        // retry once other warps commit.
                                        threads[tid].unschedule();
                                        max_future = 0;
                                        break 'lanes;
                                    }
                                    miss_queues[set].add(line_addr, timestamp + latency, set);
                                } else {
                                    let arrival =
                                        timestamp + params.non_mem_latency as Cycle;
                                    hit_queues[set].add(line_addr, arrival, set);
                                }
                                distances.record(distance);
                            }
                        }

                        commit_all(&mut hit_queues, &mut miss_queues, timestamp, &mut ctx);
                    }

                    if threads_done == warp.len() {
                        pool.mark_done();
                    } else {
                        pool.add(wid, max_future);
                    }
                }
            }

            commit_all(&mut hit_queues, &mut miss_queues, timestamp, &mut ctx);
            pool.tick();
            timestamp += 1;
        }
    }

    for thread in threads.iter_mut() {
        thread.reset();
    }
    if distances.total() != grand_total {
        error!(
            "histogram total {} does not match the {} counted accesses",
            distances.total(),
            grand_total
        );
    }
    distances
}

/// Pre-walk of every thread's coalesced accesses, sizing the per-set
/// trees. Line-straddling accesses count toward both sets.
fn count_accesses_per_set(threads: &mut [Thread], hw: &Hardware, params: &RunParams) -> Vec<u32> {
    let line_size = hw.line_size as u64;
    let mut totals = vec![0u32; params.cache_sets];
    for thread in threads.iter_mut() {
        while !thread.is_done() {
            let access = thread.schedule();
            if access.width == 0 {
                continue;
            }
            let line = access.address / line_size;
            totals[line_addr_to_set(line, params.cache_sets, hw.mapping)] += 1;
            let line2 = access.end_address / line_size;
            if line2 != line {
                totals[line_addr_to_set(line2, params.cache_sets, hw.mapping)] += 1;
            }
        }
        thread.reset();
    }
    totals
}

fn commit_all(
    hit_queues: &mut [RequestQueue],
    miss_queues: &mut [RequestQueue],
    now: Cycle,
    ctx: &mut SimContext,
) {
    for set in 0..hit_queues.len() {
        commit_requests(&mut hit_queues[set], now, ctx);
        commit_requests(&mut miss_queues[set], now, ctx);
    }
}

/// Applies the requests arriving at `now` to the reuse bookkeeping, in
/// enqueue order: the line's previous leaf is cleared, the set's next
/// timestamp becomes its new leaf, and the counter advances.
fn commit_requests(queue: &mut RequestQueue, now: Cycle, ctx: &mut SimContext) {
    for request in queue.drain(now) {
        if let Some(&prev) = ctx.last_use.get(&request.line_addr) {
            ctx.trees[request.set].unset(prev);
        }
        let stamp = ctx.set_counters[request.set];
        ctx.last_use.insert(request.line_addr, stamp);
        ctx.trees[request.set].set(stamp);
        ctx.set_counters[request.set] += 1;
    }
}
