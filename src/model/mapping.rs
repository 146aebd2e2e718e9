use serde::Deserialize;

/// How a cache-line address is mapped onto a set index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetMapping {
    /// Line address modulo the number of sets.
    Direct,
    /// XOR of two consecutive set-index-sized chunks of the line address.
    Xor,
    /// Fermi's L1 hash: bits 0-4 xored with bits {6,7,8,10,12}, bit 5 on top.
    #[default]
    Fermi,
}

pub fn line_addr_to_set(line_addr: u64, num_sets: usize, mapping: SetMapping) -> usize {
    let sets = num_sets as u64;
    let set = match mapping {
        SetMapping::Direct => line_addr % sets,
        SetMapping::Xor => (line_addr % sets) ^ ((line_addr / sets) % sets),
        SetMapping::Fermi => {
            let bit = |i: u32| (line_addr >> i) & 1;
            let low = bit(0) | bit(1) << 1 | bit(2) << 2 | bit(3) << 3 | bit(4) << 4;
            let high = bit(6) | bit(7) << 1 | bit(8) << 2 | bit(10) << 3 | bit(12) << 4;
            (low ^ high) + (bit(5) << 5)
        }
    };
    (set % sets) as usize
}
