use std::fs;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

use crate::model::mapping::SetMapping;

/// TOML-backed config sections with defaults for anything left out.
pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found, using defaults");
                Self::default()
            }
        }
    }
}

/// Model parameters that are fixed properties of the modeled GPU rather
/// than of the cache under study. Loaded from the optional `model.toml`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub num_cores: usize,
    pub warp_size: usize,
    pub max_active_threads: usize,
    pub max_active_blocks: usize,
    pub non_mem_latency: u32,
    pub mapping: SetMapping,
    pub seed: u64,
}

impl Config for ModelConfig {}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_cores: 1,
            warp_size: 32,
            max_active_threads: 1536,
            max_active_blocks: 8,
            non_mem_latency: 0,
            mapping: SetMapping::Fermi,
            seed: 0,
        }
    }
}

impl ModelConfig {
    /// Reads the `[model]` section of the given file; a missing file means
    /// all defaults.
    pub fn load(path: &Path) -> Self {
        let Ok(text) = fs::read_to_string(path) else {
            warn!("no model config at '{}', using defaults", path.display());
            return Self::default();
        };
        let value: Value = text
            .parse()
            .unwrap_or_else(|err| panic!("cannot parse '{}': {}", path.display(), err));
        Self::from_section(value.get("model"))
    }
}

/// Cache geometry and memory timing under study, from the mandatory
/// `current.conf`: six `identifier value` lines in a fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub line_size: u32,
    pub cache_bytes: u32,
    pub cache_lines: u32,
    pub cache_ways: u32,
    pub cache_sets: u32,
    pub num_mshr: u32,
    pub mem_latency: u32,
    pub mem_latency_stddev: u32,
}

impl CacheConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("could not read settings file '{}'", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid settings file '{}'", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut fields = [0u32; 6];
        let mut tokens = text.split_whitespace();
        for (idx, field) in fields.iter_mut().enumerate() {
            let Some(identifier) = tokens.next() else {
                bail!("expected 6 settings, found {}", idx);
            };
            let Some(value) = tokens.next() else {
                bail!("setting '{}' has no value", identifier);
            };
            *field = value
                .parse()
                .with_context(|| format!("setting '{}': bad value '{}'", identifier, value))?;
        }
        let [line_size, cache_bytes, cache_ways, num_mshr, mem_latency, mem_latency_stddev] =
            fields;

        ensure!(line_size > 0, "line_size must be positive");
        ensure!(cache_ways > 0, "cache_ways must be positive");
        ensure!(num_mshr > 0, "num_mshr must be positive");
        ensure!(
            cache_bytes > 0 && cache_bytes % line_size == 0,
            "cache_bytes must be a positive multiple of line_size"
        );
        let cache_lines = cache_bytes / line_size;
        ensure!(
            cache_lines % cache_ways == 0,
            "cache must hold a whole number of sets"
        );

        Ok(Self {
            line_size,
            cache_bytes,
            cache_lines,
            cache_ways,
            cache_sets: cache_lines / cache_ways,
            num_mshr,
            mem_latency,
            mem_latency_stddev,
        })
    }
}

/// Everything the simulation needs to know about the hardware, immutable
/// for the duration of a run.
#[derive(Debug, Clone, Copy)]
pub struct Hardware {
    pub line_size: u32,
    pub cache_bytes: u32,
    pub cache_lines: u32,
    pub cache_ways: u32,
    pub cache_sets: usize,
    pub num_mshr: u32,
    pub num_cores: usize,
    pub warp_size: usize,
    pub max_active_threads: usize,
    pub max_active_blocks: usize,
    pub mem_latency: u32,
    pub mem_latency_stddev: u32,
    pub non_mem_latency: u32,
    pub mapping: SetMapping,
    pub seed: u64,
}

impl Hardware {
    pub fn new(cache: CacheConfig, model: ModelConfig) -> Self {
        Self {
            line_size: cache.line_size,
            cache_bytes: cache.cache_bytes,
            cache_lines: cache.cache_lines,
            cache_ways: cache.cache_ways,
            cache_sets: cache.cache_sets as usize,
            num_mshr: cache.num_mshr,
            num_cores: model.num_cores,
            warp_size: model.warp_size,
            max_active_threads: model.max_active_threads,
            max_active_blocks: model.max_active_blocks,
            mem_latency: cache.mem_latency,
            mem_latency_stddev: cache.mem_latency_stddev,
            non_mem_latency: model.non_mem_latency,
            mapping: model.mapping,
            seed: model.seed,
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        let cache = CacheConfig::parse(
            "line_size 128\n\
             cache_bytes 16384\n\
             cache_ways 4\n\
             num_mshr 64\n\
             mem_latency 100\n\
             mem_latency_stddev 0\n",
        )
        .expect("test cache config");
        Self::new(cache, ModelConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheConfig, Config, Hardware, ModelConfig};
    use crate::model::mapping::SetMapping;
    use toml::Value;

    const CONF: &str = "line_size 128\n\
                        cache_bytes 16384\n\
                        cache_ways 4\n\
                        num_mshr 32\n\
                        mem_latency 400\n\
                        mem_latency_stddev 20\n";

    #[test]
    fn parses_the_six_settings_in_order() {
        let cache = CacheConfig::parse(CONF).unwrap();
        assert_eq!(cache.line_size, 128);
        assert_eq!(cache.cache_bytes, 16384);
        assert_eq!(cache.cache_ways, 4);
        assert_eq!(cache.num_mshr, 32);
        assert_eq!(cache.mem_latency, 400);
        assert_eq!(cache.mem_latency_stddev, 20);
    }

    #[test]
    fn derives_lines_and_sets() {
        let cache = CacheConfig::parse(CONF).unwrap();
        assert_eq!(cache.cache_lines, 128);
        assert_eq!(cache.cache_sets, 32);
    }

    #[test]
    fn truncated_settings_are_rejected() {
        assert!(CacheConfig::parse("line_size 128\ncache_bytes 16384\n").is_err());
        assert!(CacheConfig::parse("line_size oops\n").is_err());
    }

    #[test]
    fn inconsistent_geometry_is_rejected() {
        let text = "line_size 128\ncache_bytes 100\ncache_ways 4\n\
                    num_mshr 32\nmem_latency 400\nmem_latency_stddev 20\n";
        assert!(CacheConfig::parse(text).is_err());
    }

    #[test]
    fn model_section_overrides_defaults() {
        let value: Value = "[model]\nwarp_size = 16\nmapping = \"direct\"\nseed = 7\n"
            .parse()
            .unwrap();
        let model = ModelConfig::from_section(value.get("model"));
        assert_eq!(model.warp_size, 16);
        assert_eq!(model.mapping, SetMapping::Direct);
        assert_eq!(model.seed, 7);
        // Everything else keeps its default.
        assert_eq!(model.max_active_blocks, 8);
        assert_eq!(model.num_cores, 1);
    }

    #[test]
    fn missing_model_section_falls_back_to_defaults() {
        let model = ModelConfig::from_section(None);
        assert_eq!(model.warp_size, 32);
        assert_eq!(model.mapping, SetMapping::Fermi);
    }

    #[test]
    fn hardware_merges_both_layers() {
        let cache = CacheConfig::parse(CONF).unwrap();
        let model = ModelConfig::default();
        let hw = Hardware::new(cache, model);
        assert_eq!(hw.cache_sets, 32);
        assert_eq!(hw.warp_size, 32);
        assert_eq!(hw.mem_latency, 400);
        assert_eq!(hw.non_mem_latency, 0);
    }
}
