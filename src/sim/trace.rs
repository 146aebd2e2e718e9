use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::model::thread::{Access, Thread};

/// Thread-block dimensions as launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub fn size(&self) -> usize {
        self.x as usize * self.y as usize * self.z as usize
    }
}

/// One kernel's captured memory trace: the block dimensions plus, per
/// thread, the program-ordered list of global loads it performed.
#[derive(Debug)]
pub struct KernelTrace {
    pub block_dim: Dim3,
    pub threads: Vec<Thread>,
    pub num_loads: u64,
}

/// Parses a `.trc` capture. Returns `Ok(None)` when the file does not
/// exist, which ends the per-kernel loop.
///
/// The format is whitespace-separated: a header token and the three block
/// dimensions, then one `thread direction address bytes` record per
/// access. Stores are not cached and are dropped here.
pub fn read_trace(path: &Path) -> Result<Option<KernelTrace>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("could not read '{}'", path.display()))
        }
    };
    let trace =
        parse_trace(&text).with_context(|| format!("invalid trace file '{}'", path.display()))?;
    Ok(Some(trace))
}

fn parse_trace(text: &str) -> Result<KernelTrace> {
    let mut tokens = text.split_whitespace();
    tokens.next().context("truncated trace header")?;
    let mut dims = [0u32; 3];
    for dim in dims.iter_mut() {
        *dim = tokens
            .next()
            .context("truncated trace header")?
            .parse()
            .context("bad block dimension")?;
    }
    let block_dim = Dim3 {
        x: dims[0],
        y: dims[1],
        z: dims[2],
    };

    let mut threads: Vec<Thread> = Vec::new();
    let mut num_loads = 0u64;
    loop {
        let Some(thread) = tokens.next() else {
            break;
        };
        let (Some(direction), Some(address), Some(bytes)) =
            (tokens.next(), tokens.next(), tokens.next())
        else {
            bail!("truncated access record");
        };
        let thread: usize = thread.parse().context("bad thread id")?;
        let direction: u32 = direction.parse().context("bad direction")?;
        let address: u64 = address.parse().context("bad address")?;
        let bytes: u32 = bytes.parse().context("bad byte count")?;
        if bytes == 0 {
            bail!("access with zero bytes");
        }

        match direction {
            // Load: kept.
            0 => {
                if thread >= threads.len() {
                    threads.resize_with(thread + 1, Thread::new);
                }
                threads[thread].push_access(Access::load(address, bytes));
                num_loads += 1;
            }
            // Store: not cached, dropped.
            1 => {}
            other => bail!("bad direction {}", other),
        }
    }

    Ok(KernelTrace {
        block_dim,
        threads,
        num_loads,
    })
}
