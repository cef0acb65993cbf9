//! Configuration DSL (spec §6): a serde-deserializable hierarchy
//! description plus a `build()` that wires live caches from it, surfacing
//! every malformed input as a [`ConfigError`] rather than a panic.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::array::Partition;
use crate::cache::CoherentCache;
use crate::core::CacheCore;
use crate::dispatcher::{IntelCasHash, NormHash, SliceDispatcher, SliceHash};
use crate::error::ConfigError;
use crate::geometry::Geometry;
use crate::index::{Indexer, NormIndexer, RandomIndexer, SkewedIndexer};
use crate::memory::MemoryModel;
use crate::monitor::Monitor;
use crate::policy::Policy;
use crate::port::CacheLink;
use crate::replacer::{Fifo, Lru, Replacer, Srrip};

fn default_indexer() -> String {
    "norm".to_string()
}

fn default_partitions() -> usize {
    1
}

fn default_copy_buffers() -> usize {
    2
}

fn default_block_bits() -> u32 {
    6
}

const MAX_INNER_PORTS: u8 = 63;

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub name: String,
    pub index_bits: u32,
    pub ways: usize,
    #[serde(default)]
    pub extended_ways: usize,
    #[serde(default)]
    pub victim_ways: usize,
    pub replacer: String,
    #[serde(default = "default_indexer")]
    pub indexer: String,
    pub policy: String,
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    #[serde(default = "default_copy_buffers")]
    pub copy_buffers: usize,
    #[serde(default)]
    pub with_data: bool,
    #[serde(default)]
    pub with_directory: bool,
    #[serde(default)]
    pub seed: u64,
    /// Name of this cache's outer neighbor; the reserved name `"memory"`
    /// connects straight to the terminal [`MemoryModel`].
    pub outer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    pub hash: String,
    pub slices: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HierarchyConfig {
    #[serde(default = "default_block_bits")]
    pub block_bits: u32,
    pub caches: Vec<CacheConfig>,
    #[serde(default)]
    pub dispatcher: Option<DispatcherConfig>,
}

fn parse_replacer(kind: &str, num_sets: usize, ways: usize) -> Result<Box<dyn Replacer>, ConfigError> {
    match kind {
        "lru" => Ok(Box::new(Lru::new(num_sets, ways))),
        "fifo" => Ok(Box::new(Fifo::new(num_sets, ways))),
        "srrip" => Ok(Box::new(Srrip::new(num_sets, ways))),
        other => Err(ConfigError::UnknownReplacerKind(other.to_string())),
    }
}

fn parse_indexer(
    kind: &str,
    geom: Geometry,
    partitions: usize,
    seed: u64,
) -> Result<Box<dyn Indexer>, ConfigError> {
    match kind {
        "norm" => Ok(Box::new(NormIndexer::new(geom))),
        "skewed" => Ok(Box::new(SkewedIndexer::new(geom, partitions.max(1), seed))),
        "random" => Ok(Box::new(RandomIndexer::new(geom, seed))),
        other => Err(ConfigError::UnknownIndexerKind(other.to_string())),
    }
}

fn parse_policy(kind: &str) -> Result<Policy, ConfigError> {
    match kind {
        "mi" => Ok(Policy::mi()),
        "msi" => Ok(Policy::msi()),
        "mesi" => Ok(Policy::mesi()),
        "exclusive_msi" => Ok(Policy::exclusive_msi()),
        "exclusive_mesi" => Ok(Policy::exclusive_mesi()),
        other => Err(ConfigError::UnknownPolicyKind(other.to_string())),
    }
}

fn parse_hash(kind: &str, block_bits: u32) -> Box<dyn SliceHash> {
    match kind {
        "intel_cas" => Box::new(IntelCasHash::new(block_bits)),
        _ => Box::new(NormHash::new(block_bits)),
    }
}

/// A built, live hierarchy: every cache by name, plus which ones are roots
/// (directly wired to memory) versus connected to another configured cache.
pub struct Hierarchy {
    pub caches: HashMap<String, Arc<CoherentCache>>,
    pub memory: Arc<MemoryModel>,
    pub dispatcher: Option<Arc<SliceDispatcher>>,
}

impl Hierarchy {
    pub fn get(&self, name: &str) -> Option<&Arc<CoherentCache>> {
        self.caches.get(name)
    }
}

impl HierarchyConfig {
    /// Validates and wires a complete hierarchy. Caches are constructed
    /// outer-first (spec §6 wiring API is inherently directional: an inner
    /// cache's constructor needs its outer's `Arc` already in hand), using a
    /// topological pass over the `outer` edges; each constructed cache then
    /// registers itself on its outer via
    /// [`CoherentCache::register_inner`].
    pub fn build(&self, monitor: Arc<dyn Monitor>) -> Result<Hierarchy, ConfigError> {
        tracing::debug!(
            caches = self.caches.len(),
            block_bits = self.block_bits,
            dispatcher = self.dispatcher.is_some(),
            "building hierarchy"
        );
        if let Some(d) = &self.dispatcher {
            if d.slices.is_empty() {
                return Err(ConfigError::EmptySliceSet(0));
            }
        }

        let names: std::collections::HashSet<&str> =
            self.caches.iter().map(|c| c.name.as_str()).collect();
        for c in &self.caches {
            if c.outer != "memory" && !names.contains(c.outer.as_str()) {
                return Err(ConfigError::UnknownCache(c.outer.clone()));
            }
            if c.partitions > 1 && c.indexer == "norm" {
                return Err(ConfigError::TemplateArityMismatch {
                    expected: 1,
                    got: c.partitions,
                });
            }
        }

        // Count inner fan-in per declared outer to catch directory overflow
        // before any cache is actually built.
        let mut fan_in: HashMap<&str, u8> = HashMap::new();
        for c in &self.caches {
            let counter = fan_in.entry(c.outer.as_str()).or_insert(0);
            *counter = counter
                .checked_add(1)
                .ok_or(ConfigError::TooManyInnerPorts { limit: MAX_INNER_PORTS, got: u8::MAX })?;
            if *counter > MAX_INNER_PORTS {
                return Err(ConfigError::TooManyInnerPorts { limit: MAX_INNER_PORTS, got: *counter });
            }
        }

        let memory = Arc::new(MemoryModel::new(self.block_bits));

        let mut built: HashMap<String, Arc<CoherentCache>> = HashMap::new();
        let mut remaining: Vec<&CacheConfig> = self.caches.iter().collect();
        let mut next_inner_id: HashMap<&str, u8> = HashMap::new();

        while !remaining.is_empty() {
            let mut progressed = false;
            let mut still_remaining = Vec::new();
            for c in remaining {
                let outer_link: Option<Arc<dyn CacheLink>> = if c.outer == "memory" {
                    Some(Arc::clone(&memory) as Arc<dyn CacheLink>)
                } else {
                    built.get(&c.outer).map(|cache| Arc::clone(cache) as Arc<dyn CacheLink>)
                };

                let Some(outer_link) = outer_link else {
                    still_remaining.push(c);
                    continue;
                };

                let geom = Geometry::new(self.block_bits, c.index_bits);
                let indexer = parse_indexer(&c.indexer, geom, c.partitions, c.seed)?;
                let replacer = parse_replacer(&c.replacer, geom.num_sets(), c.ways)?;
                let partition = Partition::new(
                    geom,
                    indexer,
                    replacer,
                    c.ways,
                    c.extended_ways,
                    c.with_data,
                    c.with_directory,
                );

                let mut partitions = vec![partition];
                for p in 1..c.partitions {
                    let idx = parse_indexer(&c.indexer, geom, c.partitions, c.seed.wrapping_add(p as u64))?;
                    let rep = parse_replacer(&c.replacer, geom.num_sets(), c.ways)?;
                    partitions.push(Partition::new(
                        geom,
                        idx,
                        rep,
                        c.ways,
                        c.extended_ways,
                        c.with_data,
                        c.with_directory,
                    ));
                }

                let victim = if c.victim_ways > 0 {
                    let rep = parse_replacer(&c.replacer, 1, c.victim_ways)?;
                    Some(Partition::new_victim(geom, rep, c.victim_ways, c.with_data, c.with_directory))
                } else {
                    None
                };

                let policy = parse_policy(&c.policy)?;
                let core = CacheCore::new(
                    c.name.clone(),
                    geom,
                    partitions,
                    victim,
                    c.copy_buffers,
                    1usize << self.block_bits,
                    c.seed,
                );

                tracing::debug!(
                    cache = %c.name,
                    outer = %c.outer,
                    partitions = c.partitions,
                    copy_buffers = c.copy_buffers,
                    "wiring cache"
                );

                let id_counter = next_inner_id.entry(c.outer.as_str()).or_insert(0);
                let inner_id = *id_counter;
                *id_counter += 1;

                let cache = Arc::new(CoherentCache::new(
                    c.name.clone(),
                    core,
                    policy,
                    inner_id,
                    vec![],
                    outer_link,
                    Arc::clone(&monitor),
                ));

                if c.outer != "memory" {
                    if let Some(parent) = built.get(&c.outer) {
                        parent.register_inner(Arc::clone(&cache) as Arc<dyn CacheLink>);
                    }
                }

                built.insert(c.name.clone(), cache);
                progressed = true;
            }

            if !progressed && !still_remaining.is_empty() {
                // A cycle in the `outer` graph — every remaining cache is
                // waiting on another remaining cache.
                return Err(ConfigError::UnknownCache(still_remaining[0].outer.clone()));
            }
            remaining = still_remaining;
        }

        let dispatcher = match &self.dispatcher {
            Some(d) => {
                let slices: Result<Vec<Arc<dyn CacheLink>>, ConfigError> = d
                    .slices
                    .iter()
                    .map(|name| {
                        built
                            .get(name)
                            .map(|c| Arc::clone(c) as Arc<dyn CacheLink>)
                            .ok_or_else(|| ConfigError::UnknownCache(name.clone()))
                    })
                    .collect();
                let hash = parse_hash(&d.hash, self.block_bits);
                Some(Arc::new(SliceDispatcher::new(hash, slices?)))
            }
            None => None,
        };

        Ok(Hierarchy { caches: built, memory, dispatcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::NullMonitor;

    fn sample_config() -> HierarchyConfig {
        HierarchyConfig {
            block_bits: 6,
            caches: vec![
                CacheConfig {
                    name: "l2".into(),
                    index_bits: 4,
                    ways: 8,
                    extended_ways: 0,
                    victim_ways: 0,
                    replacer: "lru".into(),
                    indexer: "norm".into(),
                    policy: "msi".into(),
                    partitions: 1,
                    copy_buffers: 2,
                    with_data: true,
                    with_directory: true,
                    seed: 1,
                    outer: "memory".into(),
                },
                CacheConfig {
                    name: "l1".into(),
                    index_bits: 2,
                    ways: 4,
                    extended_ways: 0,
                    victim_ways: 0,
                    replacer: "lru".into(),
                    indexer: "norm".into(),
                    policy: "msi".into(),
                    partitions: 1,
                    copy_buffers: 2,
                    with_data: true,
                    with_directory: false,
                    seed: 2,
                    outer: "l2".into(),
                },
            ],
            dispatcher: None,
        }
    }

    #[test]
    fn builds_a_two_level_hierarchy() {
        let cfg = sample_config();
        let h = cfg.build(Arc::new(NullMonitor)).expect("valid config");
        assert!(h.get("l1").is_some());
        assert!(h.get("l2").is_some());
    }

    #[test]
    fn unknown_outer_is_a_config_error() {
        let mut cfg = sample_config();
        cfg.caches[1].outer = "l3".into();
        let err = cfg.build(Arc::new(NullMonitor)).unwrap_err();
        assert_eq!(err, ConfigError::UnknownCache("l3".into()));
    }

    #[test]
    fn unknown_replacer_is_a_config_error() {
        let mut cfg = sample_config();
        cfg.caches[0].replacer = "bogus".into();
        let err = cfg.build(Arc::new(NullMonitor)).unwrap_err();
        assert_eq!(err, ConfigError::UnknownReplacerKind("bogus".into()));
    }

    #[test]
    fn end_to_end_access_through_built_hierarchy() {
        let cfg = sample_config();
        let h = cfg.build(Arc::new(NullMonitor)).expect("valid config");
        let l1 = h.get("l1").unwrap();
        let geom = Geometry::new(6, 2);
        let addr = geom.normalize(0x40);
        let handle = crate::handle::CoreHandle::new(l1, geom, 0);
        handle.write(0x40, &[5u8; 64]);
        let data = handle.read(0x40);
        assert_eq!(data.words[0], 5);
        let _ = addr;
    }
}
