//! Index function: `(addr, partition) -> set` (spec §4.2).

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::addr::LineAddr;
use crate::geometry::Geometry;

/// Maps a line address and partition number to a set index.
pub trait Indexer: Send + Sync {
    fn set_of(&self, addr: LineAddr, partition: usize) -> usize;
    fn num_sets(&self) -> usize;
}

/// Plain bit-slice indexing: `addr[IOfst+IW-1:IOfst]`, ignoring `partition`.
pub struct NormIndexer {
    geom: Geometry,
}

impl NormIndexer {
    pub fn new(geom: Geometry) -> Self {
        Self { geom }
    }
}

impl Indexer for NormIndexer {
    fn set_of(&self, addr: LineAddr, _partition: usize) -> usize {
        self.geom.norm_set(addr)
    }

    fn num_sets(&self) -> usize {
        self.geom.num_sets()
    }
}

/// Per-partition XOR-shift hashing producing decorrelated sets across
/// partitions, so an adversary who knows one partition's mapping cannot
/// predict another's (spec §4.2, §GLOSSARY "Partition").
pub struct SkewedIndexer {
    geom: Geometry,
    /// One odd multiplicative constant per partition.
    constants: Vec<u64>,
}

impl SkewedIndexer {
    pub fn new(geom: Geometry, num_partitions: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let constants = (0..num_partitions)
            .map(|_| rng.gen::<u64>() | 1) // force odd, avoids degenerate folding
            .collect();
        Self { geom, constants }
    }
}

impl Indexer for SkewedIndexer {
    fn set_of(&self, addr: LineAddr, partition: usize) -> usize {
        let c = self.constants[partition % self.constants.len()];
        let folded = addr.raw().wrapping_mul(c);
        let shifted = folded >> self.geom.block_bits;
        (shifted as usize) & (self.geom.num_sets() - 1)
    }

    fn num_sets(&self) -> usize {
        self.geom.num_sets()
    }
}

/// Seeded, content-addressed permutation: every address is hashed through a
/// fixed per-cache seed, independent of partition. Used to study whether
/// address-independent remapping (MIRAGE-style) changes observable
/// behavior versus `NormIndexer`.
pub struct RandomIndexer {
    geom: Geometry,
    seed: u64,
}

impl RandomIndexer {
    pub fn new(geom: Geometry, seed: u64) -> Self {
        Self { geom, seed }
    }
}

impl Indexer for RandomIndexer {
    fn set_of(&self, addr: LineAddr, _partition: usize) -> usize {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ addr.raw());
        rng.gen::<usize>() & (self.geom.num_sets() - 1)
    }

    fn num_sets(&self) -> usize {
        self.geom.num_sets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn norm_indexer_matches_geometry() {
        let geom = Geometry::new(6, 3);
        let idx = NormIndexer::new(geom);
        let addr = geom.normalize(0x1C0);
        assert_eq!(idx.set_of(addr, 0), geom.norm_set(addr));
    }

    #[test]
    fn skewed_indexer_same_addr_different_partitions_usually_differ() {
        let geom = Geometry::new(6, 6);
        let idx = SkewedIndexer::new(geom, 4, 0xD00D);
        let addr = geom.normalize(0x1000);
        let sets: Vec<usize> = (0..4).map(|p| idx.set_of(addr, p)).collect();
        let unique: std::collections::HashSet<_> = sets.iter().collect();
        assert!(unique.len() > 1, "expected decorrelated sets across partitions, got {sets:?}");
    }

    #[test]
    fn single_partition_skewed_reduces_to_plain_mapping_range() {
        // With P=1, skewed indexing is still bounded to num_sets (spec §8
        // boundary behavior: "with P=1, the skewed cache reduces exactly to
        // the set-associative case"). The coherence-engine-level behavioral
        // equivalence is exercised in tests/scenarios.rs; here we only check
        // the indexer stays in-range.
        let geom = Geometry::new(6, 4);
        let idx = SkewedIndexer::new(geom, 1, 7);
        for a in [0x40u64, 0x80, 0xC0, 0x100] {
            let addr = geom.normalize(a);
            assert!(idx.set_of(addr, 0) < geom.num_sets());
        }
    }

    #[test]
    fn random_indexer_deterministic_for_seed() {
        let geom = Geometry::new(6, 5);
        let idx1 = RandomIndexer::new(geom, 99);
        let idx2 = RandomIndexer::new(geom, 99);
        let addr = geom.normalize(0x4000);
        assert_eq!(idx1.set_of(addr, 0), idx2.set_of(addr, 0));
    }
}
