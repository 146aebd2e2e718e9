/// Partial sum-hierarchy tree over a fixed index range.
///
/// Leaves hold 0 or 1; every internal node holds the number of set leaves
/// in its subtree. `set`, `unset` and `count` are O(log N) root-to-leaf
/// walks, and the tree allocates nothing after construction.
#[derive(Debug, Clone)]
pub struct SumTree {
    // Flat layout: node i has children 2i+1 and 2i+2. Nodes at index
    // >= first_leaf are leaves.
    value: Vec<u32>,
    // Inclusive upper bound of the index range covered by each subtree.
    range_b: Vec<u32>,
    first_leaf: usize,
    leaves: usize,
}

impl SumTree {
    pub fn new(capacity: usize) -> Self {
        let leaves = capacity.max(1).next_power_of_two();
        let nodes = 2 * leaves - 1;
        let mut range_b = vec![0u32; nodes];
        fill_ranges(&mut range_b, 0, 0, leaves as u32);
        Self {
            value: vec![0u32; nodes],
            range_b,
            first_leaf: leaves - 1,
            leaves,
        }
    }

    pub fn capacity(&self) -> usize {
        self.leaves
    }

    /// Mark leaf `target` as used. The leaf must currently be unused.
    pub fn set(&mut self, target: u32) {
        debug_assert!((target as usize) < self.leaves);
        let mut idx = 0;
        while idx < self.first_leaf {
            self.value[idx] += 1;
            let left = 2 * idx + 1;
            idx = if target > self.range_b[left] {
                left + 1
            } else {
                left
            };
        }
        debug_assert_eq!(self.value[idx], 0, "leaf {} set twice", target);
        self.value[idx] = 1;
    }

    /// Clear leaf `target`. The leaf must currently be used.
    pub fn unset(&mut self, target: u32) {
        debug_assert!((target as usize) < self.leaves);
        let mut idx = 0;
        while idx < self.first_leaf {
            self.value[idx] -= 1;
            let left = 2 * idx + 1;
            idx = if target > self.range_b[left] {
                left + 1
            } else {
                left
            };
        }
        debug_assert_eq!(self.value[idx], 1, "leaf {} unset twice", target);
        self.value[idx] = 0;
    }

    /// Number of set leaves with index strictly greater than `target`.
    pub fn count(&self, target: u32) -> u32 {
        let mut result = 0;
        let mut idx = 0;
        // Stop at a leaf or at an empty subtree.
        while idx < self.first_leaf && self.value[idx] != 0 {
            let left = 2 * idx + 1;
            if target > self.range_b[left] {
                idx = left + 1;
            } else {
                result += self.value[left + 1];
                idx = left;
            }
        }
        result
    }
}

fn fill_ranges(range_b: &mut [u32], idx: usize, start: u32, size: u32) {
    range_b[idx] = start + size - 1;
    if size > 1 {
        let half = size / 2;
        fill_ranges(range_b, 2 * idx + 1, start, half);
        fill_ranges(range_b, 2 * idx + 2, start + half, half);
    }
}
