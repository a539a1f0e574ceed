//! Solver configuration.
//!
//! Options are loaded from YAML and expanded into dense per-street parameter
//! tables at engine construction. Two sentinel encodings are part of the
//! config format: a regret floor entry of `1` means `i32::MIN` (no floor)
//! and a regret ceiling entry of `0` means `i32::MAX` (no ceiling).

use std::path::Path;

use serde::Deserialize;

use crate::error::EngineError;

/// CFR solver options.
///
/// Per-street vectors may be left empty to mean "default on every street";
/// when non-empty they must cover `0..=max_street`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CfrConfig {
    /// Street at which subgame parallelism splits the tree. A value beyond
    /// `max_street` disables splitting.
    #[serde(default = "default_subgame_street")]
    pub subgame_street: usize,

    /// Worker slots for the subgame pool.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// Enforce nonnegative regrets (CFR+-style flooring).
    #[serde(default)]
    pub nnr: bool,

    /// Force uniform strategies everywhere (debugging aid).
    #[serde(default)]
    pub uniform: bool,

    /// Iterations during which sumprob updates use weight 1 before switching
    /// to `it - soft_warmup`.
    #[serde(default)]
    pub soft_warmup: u32,

    /// Iterations during which sumprobs are not updated at all; afterwards
    /// updates use weight `it - hard_warmup`.
    #[serde(default)]
    pub hard_warmup: u32,

    /// Uniform exploration mass in `[0, 1)` mixed over nonterminal successors.
    #[serde(default)]
    pub explore: f64,

    /// Store regrets as `f64` instead of `i32`.
    #[serde(default)]
    pub double_regrets: bool,

    /// Store sumprobs as `f64` instead of `i32`.
    #[serde(default)]
    pub double_sumprobs: bool,

    /// Iteration from which the current policy is read from sumprobs rather
    /// than regrets. Zero disables the switch.
    #[serde(default)]
    pub use_avg_for_current_it: u32,

    /// Streets whose tables are persisted compressed. Accepted for config
    /// compatibility; persistence itself lives outside this crate.
    #[serde(default)]
    pub compressed_streets: Vec<usize>,

    /// Streets on which sumprobs are accumulated. Empty means all streets.
    #[serde(default)]
    pub sumprob_streets: Vec<usize>,

    /// Per-street regret floors (`1` encodes `i32::MIN`). Empty means 0.
    #[serde(default)]
    pub regret_floors: Vec<i32>,

    /// Per-street regret ceilings (`0` encodes `i32::MAX`). Empty means none.
    #[serde(default)]
    pub regret_ceilings: Vec<i32>,

    /// Per-street fixed-point multipliers for integer regrets.
    #[serde(default)]
    pub regret_scaling: Vec<f64>,

    /// Per-street fixed-point multipliers for integer sumprobs.
    #[serde(default)]
    pub sumprob_scaling: Vec<f64>,

    /// Per-street pot-size thresholds below which bucketed storage applies.
    /// Empty means bucketed whenever the street has buckets at all.
    #[serde(default)]
    pub bucket_thresholds: Vec<u32>,
}

fn default_subgame_street() -> usize {
    usize::MAX
}

fn default_num_threads() -> usize {
    1
}

impl Default for CfrConfig {
    fn default() -> Self {
        Self {
            subgame_street: default_subgame_street(),
            num_threads: default_num_threads(),
            nnr: false,
            uniform: false,
            soft_warmup: 0,
            hard_warmup: 0,
            explore: 0.0,
            double_regrets: false,
            double_sumprobs: false,
            use_avg_for_current_it: 0,
            compressed_streets: Vec::new(),
            sumprob_streets: Vec::new(),
            regret_floors: Vec::new(),
            regret_ceilings: Vec::new(),
            regret_scaling: Vec::new(),
            sumprob_scaling: Vec::new(),
            bucket_thresholds: Vec::new(),
        }
    }
}

impl CfrConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn from_yaml(yaml: &str) -> Result<Self, EngineError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Expand into dense per-street parameters for a game with the given
    /// final street.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when a non-empty per-street vector is
    /// shorter than `max_street + 1`, the pool size is zero, or `explore`
    /// falls outside `[0, 1)`.
    pub fn resolve(&self, max_street: usize) -> Result<StreetParams, EngineError> {
        let num_streets = max_street + 1;
        if self.num_threads == 0 {
            return Err(EngineError::Config("num_threads must be nonzero".into()));
        }
        if !(0.0..1.0).contains(&self.explore) {
            return Err(EngineError::Config(format!(
                "explore must lie in [0, 1), got {}",
                self.explore
            )));
        }

        let regret_floors = expand_with(&self.regret_floors, num_streets, 0, "regret_floors", |v| {
            if v == 1 { i32::MIN } else { v }
        })?;
        let regret_ceilings = expand_with(
            &self.regret_ceilings,
            num_streets,
            i32::MAX,
            "regret_ceilings",
            |v| if v == 0 { i32::MAX } else { v },
        )?;
        let regret_scaling =
            expand_with(&self.regret_scaling, num_streets, 1.0, "regret_scaling", |v| v)?;
        let sumprob_scaling =
            expand_with(&self.sumprob_scaling, num_streets, 1.0, "sumprob_scaling", |v| v)?;
        let bucket_thresholds = expand_with(
            &self.bucket_thresholds,
            num_streets,
            u32::MAX,
            "bucket_thresholds",
            |v| v,
        )?;

        let mut sumprob_streets = vec![self.sumprob_streets.is_empty(); num_streets];
        for &st in &self.sumprob_streets {
            if st >= num_streets {
                return Err(EngineError::Config(format!(
                    "sumprob_streets entry {st} exceeds max street {max_street}"
                )));
            }
            sumprob_streets[st] = true;
        }
        let mut compressed_streets = vec![false; num_streets];
        for &st in &self.compressed_streets {
            if st >= num_streets {
                return Err(EngineError::Config(format!(
                    "compressed_streets entry {st} exceeds max street {max_street}"
                )));
            }
            compressed_streets[st] = true;
        }

        Ok(StreetParams {
            regret_floors,
            regret_ceilings,
            regret_scaling,
            sumprob_scaling,
            bucket_thresholds,
            sumprob_streets,
            compressed_streets,
        })
    }
}

/// Expand a possibly-empty per-street vector, applying a sentinel decode.
fn expand_with<T: Copy, U>(
    raw: &[T],
    num_streets: usize,
    default: U,
    name: &str,
    decode: impl Fn(T) -> U,
) -> Result<Vec<U>, EngineError>
where
    U: Copy,
{
    if raw.is_empty() {
        return Ok(vec![default; num_streets]);
    }
    if raw.len() < num_streets {
        return Err(EngineError::Config(format!(
            "{name} has {} entries, need {num_streets}",
            raw.len()
        )));
    }
    Ok(raw[..num_streets].iter().map(|&v| decode(v)).collect())
}

/// Dense per-street parameter tables derived from [`CfrConfig`].
#[derive(Debug, Clone)]
pub struct StreetParams {
    pub regret_floors: Vec<i32>,
    pub regret_ceilings: Vec<i32>,
    pub regret_scaling: Vec<f64>,
    pub sumprob_scaling: Vec<f64>,
    pub bucket_thresholds: Vec<u32>,
    pub sumprob_streets: Vec<bool>,
    pub compressed_streets: Vec<bool>,
}
