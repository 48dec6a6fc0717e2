/*!
# Configuration

Everything the pipeline and the simulator launcher need, loaded from one TOML
file. Every field except `sizes` has a default.

```toml
sizes = [64, 128]
sampling = 1            # 0 simple, 1 metropolis, 2 wang-landau
raw_dir = "rawData"
output_dir = "data"

[run]
typ = 1
observable = 2

[thetas]
default = [-10.0, -5.0, inf]

[[thetas.size]]
n = 128
windows = [-20.0, -10.0, -5.0, inf]

[[equilibration]]
n = 128
theta = -20.0
sweeps = 2000

[analysis]
n_resample = 100
min_overlap = 5
binning = { policy = "percentile", min_resolution = 2.0 }
```

Per-size window sets fall back to the `default` list through
[`SizeTable::for_size`]; equilibration cutoffs not listed are zero.
*/

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::bootstrap::Bootstrap;
use crate::error::{Error, Result};
use crate::histogram::BinningPolicy;
use crate::pipeline::SamplingMethod;
use crate::stitch::{OverlapMode, Stitcher};
use crate::window::WindowKey;

/// Per-size lists with a shared default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct SizeTable<T> {
    #[serde(default = "Vec::new")]
    pub default: Vec<T>,
    #[serde(default = "BTreeMap::new", rename = "size", deserialize_with = "size_entries")]
    pub per_size: BTreeMap<u64, Vec<T>>,
}

impl<T> Default for SizeTable<T> {
    fn default() -> Self {
        Self {
            default: Vec::new(),
            per_size: BTreeMap::new(),
        }
    }
}

impl<T> SizeTable<T> {
    pub fn new(default: Vec<T>) -> Self {
        Self {
            default,
            per_size: BTreeMap::new(),
        }
    }

    /// The list configured for `size`, or the default list.
    pub fn for_size(&self, size: u64) -> &[T] {
        self.per_size
            .get(&size)
            .map(Vec::as_slice)
            .unwrap_or(&self.default)
    }
}

#[derive(Deserialize)]
struct SizeEntry<T> {
    n: u64,
    windows: Vec<T>,
}

fn size_entries<'de, D, T>(deserializer: D) -> std::result::Result<BTreeMap<u64, Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let entries: Vec<SizeEntry<T>> = Vec::deserialize(deserializer)?;
    Ok(entries.into_iter().map(|e| (e.n, e.windows)).collect())
}

/// Bias values per system size.
pub type BiasTable = SizeTable<f64>;

/// Energy windows `[lower, upper]` per system size.
pub type RangeTable = SizeTable<[f64; 2]>;

/// Number of leading sweeps to discard for one run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EquilibrationEntry {
    pub n: u64,
    #[serde(default)]
    pub theta: Option<f64>,
    #[serde(default)]
    pub range: Option<[f64; 2]>,
    pub sweeps: usize,
}

impl EquilibrationEntry {
    pub fn key(&self) -> Result<WindowKey> {
        match (self.theta, self.range) {
            (Some(t), None) => Ok(WindowKey::Theta(t)),
            (None, Some([lo, hi])) => Ok(WindowKey::Range(lo, hi)),
            _ => Err(Error::Configuration(format!(
                "equilibration entry for N={} needs exactly one of theta or range",
                self.n
            ))),
        }
    }
}

/// Parameters that identify a simulation run and end up in its file name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunParameters {
    /// Walk type (1 random walk, 2 loop-erased, 3 self-avoiding).
    pub typ: u32,
    pub seed_mc: u64,
    pub seed_r: u64,
    /// Sweeps per run.
    pub iterations: u64,
    pub dimension: u32,
    /// Observable code (1 surface area, 2 volume); also the data column by default.
    pub observable: u32,
    /// Convex hull algorithm code.
    pub method: u32,
}

impl Default for RunParameters {
    fn default() -> Self {
        Self {
            typ: 1,
            seed_mc: 1337,
            seed_r: 42,
            iterations: 100_000,
            dimension: 2,
            observable: 2,
            method: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub n_resample: usize,
    pub seed: u64,
    /// Minimum (bootstrap mean) count for a bin to be used.
    pub min_occupancy: f64,
    /// Overlap points below which a link is reported as sparse.
    pub min_overlap: usize,
    pub binning: BinningPolicy,
    pub overlap: OverlapMode,
    /// Samples used for the autocorrelation time; 0 uses the whole series.
    pub autocorr_prefix: usize,
    /// Worker threads; 0 uses one per CPU.
    pub threads: usize,
    pub progress: bool,
    /// Columns summarized into `simple.dat`; empty means every column.
    pub simple_columns: Vec<usize>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            n_resample: 100,
            seed: 42,
            min_occupancy: 10.0,
            min_overlap: 5,
            binning: BinningPolicy::default(),
            overlap: OverlapMode::default(),
            autocorr_prefix: crate::autocorr::DEFAULT_PREFIX,
            threads: 0,
            progress: true,
            simple_columns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub binary: PathBuf,
    /// Directory for raw configurations (`-O`); not written when absent.
    pub raw_conf: Option<PathBuf>,
    /// Enables the Akl-Toussaint heuristic (`-a`).
    pub akl: bool,
    /// Runs launched at once; 0 uses one per CPU. Flat-histogram runs are always sequential.
    pub jobs: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("./randomWalk"),
            raw_conf: None,
            akl: false,
            jobs: 0,
        }
    }
}

fn default_raw_dir() -> PathBuf {
    PathBuf::from("rawData")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EvaluationConfig {
    pub sizes: Vec<u64>,
    #[serde(default)]
    pub sampling: SamplingMethod,
    #[serde(default)]
    pub run: RunParameters,
    /// Data column holding the observable; defaults to `run.observable`.
    #[serde(default)]
    pub column: Option<usize>,
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub thetas: BiasTable,
    #[serde(default)]
    pub energy_windows: RangeTable,
    #[serde(default)]
    pub equilibration: Vec<EquilibrationEntry>,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl EvaluationConfig {
    /// Configuration with defaults everywhere, for the given sizes.
    pub fn new(sizes: Vec<u64>, sampling: SamplingMethod) -> Self {
        Self {
            sizes,
            sampling,
            run: RunParameters::default(),
            column: None,
            raw_dir: default_raw_dir(),
            output_dir: default_output_dir(),
            thetas: BiasTable::default(),
            energy_windows: RangeTable::default(),
            equilibration: Vec::new(),
            analysis: AnalysisConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks settings that apply to the whole run.
    pub fn validate(&self) -> Result<()> {
        if self.sizes.is_empty() {
            return Err(Error::Configuration("no system sizes configured".into()));
        }
        if self.analysis.n_resample == 0 {
            return Err(Error::Configuration("n_resample must be positive".into()));
        }
        if !(self.analysis.min_occupancy >= 0.0) {
            return Err(Error::Configuration(format!(
                "min_occupancy must be non-negative, got {}",
                self.analysis.min_occupancy
            )));
        }
        for [lo, hi] in self
            .energy_windows
            .default
            .iter()
            .chain(self.energy_windows.per_size.values().flatten())
        {
            if !(lo < hi) {
                return Err(Error::Configuration(format!(
                    "energy window [{lo}, {hi}] is empty"
                )));
            }
        }
        self.equilibration_cutoffs().map(|_| ())
    }

    /// Data column of the observable.
    pub fn column(&self) -> usize {
        self.column.unwrap_or(self.run.observable as usize)
    }

    pub fn bootstrap(&self) -> Bootstrap {
        Bootstrap::new(self.analysis.n_resample).set_seed(self.analysis.seed)
    }

    pub fn stitcher(&self) -> Stitcher {
        Stitcher::new(
            self.bootstrap(),
            self.analysis.min_overlap,
            self.analysis.overlap,
        )
    }

    /// Prefix handed to the autocorrelation estimate; 0 selects the whole series.
    pub fn autocorr_prefix(&self) -> Option<usize> {
        match self.analysis.autocorr_prefix {
            0 => Some(usize::MAX),
            n => Some(n),
        }
    }

    /**
    The windows to evaluate for `size`.

    Simple sampling always uses the single unbiased window. Flat-histogram
    sampling without configured energy windows uses one unbounded window.
    An empty result means the size has nothing configured.
    */
    pub fn windows_for(&self, size: u64) -> Vec<WindowKey> {
        match self.sampling {
            SamplingMethod::Simple => vec![WindowKey::Theta(f64::INFINITY)],
            SamplingMethod::Metropolis => self
                .thetas
                .for_size(size)
                .iter()
                .map(|t| WindowKey::Theta(*t))
                .collect(),
            SamplingMethod::WangLandau => {
                let ranges = self.energy_windows.for_size(size);
                if ranges.is_empty() {
                    vec![WindowKey::Range(f64::NEG_INFINITY, f64::INFINITY)]
                } else {
                    ranges
                        .iter()
                        .map(|[lo, hi]| WindowKey::Range(*lo, *hi))
                        .collect()
                }
            }
        }
    }

    /// All equilibration cutoffs, keyed by size and window.
    pub fn equilibration_cutoffs(&self) -> Result<BTreeMap<(u64, WindowKey), usize>> {
        self.equilibration
            .iter()
            .map(|e| Ok(((e.n, e.key()?), e.sweeps)))
            .collect()
    }

    /// Sweeps to discard for one run; zero when none is configured.
    pub fn equilibration_for(&self, size: u64, key: WindowKey) -> usize {
        self.equilibration
            .iter()
            .find(|e| e.n == size && e.key().ok() == Some(key))
            .map_or(0, |e| e.sweeps)
    }

    /// File stem shared by the simulator output and the evaluation, without extension.
    pub fn basename(&self, size: u64, key: WindowKey) -> String {
        let r = &self.run;
        let theta = match key {
            WindowKey::Theta(t) => t,
            WindowKey::Range(..) => 0.0,
        };
        let stem = format!(
            "m{}_t{}_w{}_N{}_n{}_x{}_y{}_T{:.5}",
            self.sampling.code(),
            r.typ,
            r.observable,
            size,
            r.iterations,
            r.seed_mc,
            r.seed_r,
            theta
        );
        match key {
            WindowKey::Range(lo, hi) if lo.is_finite() || hi.is_finite() => {
                format!("{stem}_{}", key.file_label())
            }
            _ => stem,
        }
    }

    /// Raw data path (without `.gz`) of one run.
    pub fn raw_path(&self, size: u64, key: WindowKey) -> PathBuf {
        self.raw_dir.join(format!("{}.dat", self.basename(size, key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
sizes = [64, 128]
sampling = 1

[run]
typ = 1
observable = 2
iterations = 1000

[thetas]
default = [-10.0, -5.0, inf]

[[thetas.size]]
n = 128
windows = [-20.0, -10.0]

[[equilibration]]
n = 128
theta = -20.0
sweeps = 2000

[analysis]
n_resample = 50
binning = { policy = "linear", bins = 30 }
overlap = "exact"
"#;

    #[test]
    fn test_parse_example() {
        let cfg = EvaluationConfig::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(cfg.sizes, vec![64, 128]);
        assert_eq!(cfg.sampling, SamplingMethod::Metropolis);
        assert_eq!(cfg.analysis.n_resample, 50);
        assert_eq!(cfg.analysis.min_overlap, 5);
        assert_eq!(cfg.analysis.overlap, OverlapMode::Exact);
        assert_eq!(cfg.analysis.binning, BinningPolicy::Linear { bins: Some(30) });
        assert_eq!(cfg.column(), 2);
        assert_eq!(cfg.raw_dir, PathBuf::from("rawData"));
    }

    #[test]
    fn test_per_size_fallback() {
        let cfg = EvaluationConfig::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(cfg.thetas.for_size(128), &[-20.0, -10.0]);
        let default = cfg.thetas.for_size(64);
        assert_eq!(default.len(), 3);
        assert!(default[2].is_infinite());
        assert_eq!(cfg.thetas.for_size(999).len(), 3);
    }

    #[test]
    fn test_equilibration_lookup() {
        let cfg = EvaluationConfig::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(cfg.equilibration_for(128, WindowKey::Theta(-20.0)), 2000);
        assert_eq!(cfg.equilibration_for(128, WindowKey::Theta(-10.0)), 0);
        assert_eq!(cfg.equilibration_for(64, WindowKey::Theta(-20.0)), 0);
        let map = cfg.equilibration_cutoffs().unwrap();
        assert_eq!(map.get(&(128, WindowKey::Theta(-20.0))), Some(&2000));
    }

    #[test]
    fn test_unknown_sampling_code() {
        let res = EvaluationConfig::from_toml_str("sizes = [8]\nsampling = 7\n");
        assert!(res.is_err(), "Expected an error, got {res:?}");
    }

    #[test]
    fn test_empty_sizes_rejected() {
        let res = EvaluationConfig::from_toml_str("sizes = []\n");
        assert!(matches!(res, Err(Error::Configuration(_))), "Got {res:?}");
    }

    #[test]
    fn test_basename() {
        let cfg = EvaluationConfig::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(
            cfg.basename(64, WindowKey::Theta(-5.0)),
            "m1_t1_w2_N64_n1000_x1337_y42_T-5.00000"
        );
        assert_eq!(
            cfg.basename(64, WindowKey::Theta(f64::INFINITY)),
            "m1_t1_w2_N64_n1000_x1337_y42_Tinf"
        );
        assert_eq!(
            cfg.raw_path(64, WindowKey::Theta(-5.0)),
            PathBuf::from("rawData/m1_t1_w2_N64_n1000_x1337_y42_T-5.00000.dat")
        );
    }

    #[test]
    fn test_windows_per_method() {
        let mut cfg = EvaluationConfig::new(vec![16], SamplingMethod::WangLandau);
        assert_eq!(
            cfg.windows_for(16),
            vec![WindowKey::Range(f64::NEG_INFINITY, f64::INFINITY)]
        );
        assert_eq!(
            cfg.basename(16, WindowKey::Range(f64::NEG_INFINITY, f64::INFINITY)),
            "m2_t1_w2_N16_n100000_x1337_y42_T0.00000"
        );
        cfg.energy_windows = RangeTable::new(vec![[0.0, 10.0], [8.0, 20.0]]);
        assert_eq!(cfg.windows_for(16)[1], WindowKey::Range(8.0, 20.0));
        assert!(cfg.basename(16, WindowKey::Range(8.0, 20.0)).ends_with("_E8_20"));

        cfg.sampling = SamplingMethod::Simple;
        assert_eq!(cfg.windows_for(16), vec![WindowKey::Theta(f64::INFINITY)]);
    }

    #[test]
    fn test_zero_autocorr_prefix_uses_whole_series() {
        use crate::autocorr::integrated_time;
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        // Uncorrelated head, strongly correlated tail.
        let mut rng = SmallRng::seed_from_u64(11);
        let mut series: Vec<f64> = (0..5000).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        for _ in 0..300 {
            let v = rng.gen_range(-3.0..3.0);
            series.extend(std::iter::repeat(v).take(50));
        }

        let mut cfg = EvaluationConfig::new(vec![16], SamplingMethod::Metropolis);
        assert_eq!(cfg.autocorr_prefix(), Some(crate::autocorr::DEFAULT_PREFIX));
        let tau_head = integrated_time(&series, cfg.autocorr_prefix()).unwrap();
        assert!((tau_head - 1.0).abs() < 1e-9, "Expected tau = 1 on the head, got {tau_head}");

        cfg.analysis.autocorr_prefix = 0;
        assert_eq!(cfg.autocorr_prefix(), Some(usize::MAX));
        let tau_whole = integrated_time(&series, cfg.autocorr_prefix()).unwrap();
        assert!(tau_whole > 5.0, "Expected the correlated tail to count, got {tau_whole}");
    }
}
