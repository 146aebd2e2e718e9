use std::collections::HashMap;
use std::fmt;

/// Numeric stand-in for the infinite distance in output files.
pub const INF_SENTINEL: u64 = 99_999_999;

/// A reuse distance: the number of distinct lines touched in this set since
/// the previous use of the same line, or `Infinite` for a first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Distance {
    Finite(u32),
    Infinite,
}

impl Distance {
    pub fn is_infinite(self) -> bool {
        matches!(self, Distance::Infinite)
    }

    /// Value written to output files; `Infinite` becomes the sentinel.
    pub fn sentinel(self) -> u64 {
        match self {
            Distance::Finite(d) => d as u64,
            Distance::Infinite => INF_SENTINEL,
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distance::Finite(d) => write!(f, "{}", d),
            Distance::Infinite => write!(f, "inf"),
        }
    }
}

/// Frequency map of observed reuse distances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Histogram {
    counts: HashMap<Distance, u64>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, distance: Distance) {
        *self.counts.entry(distance).or_insert(0) += 1;
    }

    pub fn get(&self, distance: Distance) -> u64 {
        self.counts.get(&distance).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Distance, u64)> + '_ {
        self.counts.iter().map(|(&d, &n)| (d, n))
    }

    /// Entries sorted by ascending distance, `Infinite` last.
    pub fn sorted(&self) -> Vec<(Distance, u64)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by_key(|&(d, _)| d);
        entries
    }

    /// Entries sorted by descending frequency, used for the stdout report.
    pub fn by_frequency(&self) -> Vec<(Distance, u64)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        entries
    }
}
