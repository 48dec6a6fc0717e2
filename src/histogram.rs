/*!
# Histogram Builder

Turns decorrelated samples into binned counts. All windows of one system size
share the same [`BinEdges`], derived once from the pooled samples of every
window so that bins line up exactly across windows.

Counting follows the usual convention: bin `i` is `[e_i, e_{i+1})`, the last
bin is closed on the right, and samples outside `[e_0, e_k]` are ignored.
*/

use ndarray::Array1;
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};

use crate::bootstrap::Bootstrap;
use crate::error::{Error, Result};

/// Strictly increasing bin edges; `k + 1` edges define `k >= 1` bins.
#[derive(Debug, Clone, PartialEq)]
pub struct BinEdges(Vec<f64>);

impl BinEdges {
    /// Validates and wraps explicit edges.
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::Configuration(format!(
                "need at least two bin edges, got {}",
                edges.len()
            )));
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(Error::Configuration("bin edges must be finite".into()));
        }
        if edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Configuration(
                "bin edges must be strictly increasing".into(),
            ));
        }
        Ok(Self(edges))
    }

    /// `n_bins` evenly spaced bins between `min` and `max`.
    pub fn linear(min: f64, max: f64, n_bins: usize) -> Result<Self> {
        let n_bins = n_bins.max(1);
        let (min, max) = widen_degenerate(min, max);
        let width = (max - min) / n_bins as f64;
        let mut edges: Vec<f64> = (0..n_bins).map(|i| min + i as f64 * width).collect();
        edges.push(max);
        Self::new(edges)
    }

    /// `n_bins` bins evenly spaced in `log10` between `min` and `max`.
    pub fn logarithmic(min: f64, max: f64, n_bins: usize) -> Result<Self> {
        if !(min > 0.0) {
            return Err(Error::Configuration(format!(
                "logarithmic binning needs a positive minimum, got {min}"
            )));
        }
        let inner = Self::linear(min.log10(), max.log10(), n_bins)?;
        let mut edges: Vec<f64> = inner.0.iter().map(|e| 10f64.powf(*e)).collect();
        // Cover the end points exactly, so no sample is lost to rounding in powf.
        edges[0] = edges[0].min(min);
        let last = edges.len() - 1;
        edges[last] = edges[last].max(max);
        Self::new(edges)
    }

    /**
    Percentile ("flat histogram") edges for pooled samples.

    Edges are placed at `n_bins + 1` evenly spaced percentiles and rounded up
    to integers; an edge is kept only if it lies more than `min_resolution`
    above the previously kept one, which avoids degenerate bins on discrete
    observables. The first edge is the floored minimum and the last edge
    always covers the maximum.
    */
    pub fn percentile(pooled: &[f64], n_bins: usize, min_resolution: f64) -> Result<Self> {
        let mut sorted: Vec<f64> = pooled.iter().copied().filter(|x| x.is_finite()).collect();
        if sorted.is_empty() {
            return Err(Error::DataInsufficient(
                "no samples to derive percentile bins from".into(),
            ));
        }
        sorted.sort_by(f64::total_cmp);
        let n_bins = n_bins.max(1);
        let lowest = sorted[0].floor();
        let highest = sorted[sorted.len() - 1];

        let mut edges = vec![lowest];
        for i in 0..=n_bins {
            let candidate = percentile_sorted(&sorted, 100.0 * i as f64 / n_bins as f64).ceil();
            let last = edges[edges.len() - 1];
            if candidate - min_resolution > last {
                edges.push(candidate);
            }
        }
        let last = edges[edges.len() - 1];
        if edges.len() == 1 {
            edges.push(highest.ceil().max(lowest + min_resolution.max(1.0)));
        } else if last < highest {
            let top = highest.ceil();
            if top - last > min_resolution {
                edges.push(top);
            } else {
                // Too thin for a bin of its own: widen the last one.
                let idx = edges.len() - 1;
                edges[idx] = top;
            }
        }
        Self::new(edges)
    }

    pub fn n_bins(&self) -> usize {
        self.0.len() - 1
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn first(&self) -> f64 {
        self.0[0]
    }

    pub fn last(&self) -> f64 {
        self.0[self.0.len() - 1]
    }

    /// Bin centers.
    pub fn centers(&self) -> Vec<f64> {
        self.0.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
    }

    /// Half widths of the bins, used as abscissa errors.
    pub fn half_widths(&self) -> Vec<f64> {
        self.0.windows(2).map(|w| 0.5 * (w[1] - w[0])).collect()
    }

    /// Index of the bin containing `x`, if any.
    pub fn bin_of(&self, x: f64) -> Option<usize> {
        if !(x >= self.first() && x <= self.last()) {
            return None;
        }
        if x == self.last() {
            return Some(self.n_bins() - 1);
        }
        Some(self.0.partition_point(|e| *e <= x) - 1)
    }

    /// Number of samples per bin.
    pub fn count(&self, samples: &[f64]) -> Vec<u64> {
        let mut counts = vec![0u64; self.n_bins()];
        for &x in samples {
            if let Some(i) = self.bin_of(x) {
                counts[i] += 1;
            }
        }
        counts
    }
}

fn widen_degenerate(min: f64, max: f64) -> (f64, f64) {
    if max > min {
        (min, max)
    } else {
        (min - 0.5, min + 0.5)
    }
}

/// Percentile `p` in `[0, 100]` of sorted data, with linear interpolation.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

/// How to choose bin edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum BinningPolicy {
    /// Evenly spaced between pooled minimum and maximum.
    Linear {
        #[serde(default)]
        bins: Option<usize>,
    },
    /// Evenly spaced in `log10`.
    Logarithmic {
        #[serde(default)]
        bins: Option<usize>,
    },
    /// Roughly equal pooled mass per bin.
    Percentile {
        #[serde(default)]
        bins: Option<usize>,
        #[serde(default = "default_min_resolution")]
        min_resolution: f64,
    },
    /// User-provided edges.
    Edges { edges: Vec<f64> },
}

fn default_min_resolution() -> f64 {
    2.0
}

impl Default for BinningPolicy {
    fn default() -> Self {
        BinningPolicy::Percentile {
            bins: None,
            min_resolution: default_min_resolution(),
        }
    }
}

impl BinningPolicy {
    /// Derives the shared edges for pooled samples of one system size.
    pub fn edges(&self, pooled: &[f64]) -> Result<BinEdges> {
        match self {
            BinningPolicy::Edges { edges } => BinEdges::new(edges.clone()),
            BinningPolicy::Linear { bins } => {
                let stats = PooledStats::from_samples(pooled)?;
                BinEdges::linear(stats.min, stats.max, bins.unwrap_or(stats.suggested_bins()))
            }
            BinningPolicy::Logarithmic { bins } => {
                let stats = PooledStats::from_samples(pooled)?;
                BinEdges::logarithmic(stats.min, stats.max, bins.unwrap_or(stats.suggested_bins()))
            }
            BinningPolicy::Percentile {
                bins,
                min_resolution,
            } => {
                if !(*min_resolution >= 0.0) {
                    return Err(Error::Configuration(format!(
                        "min_resolution must be non-negative, got {min_resolution}"
                    )));
                }
                let stats = PooledStats::from_samples(pooled)?;
                BinEdges::percentile(pooled, bins.unwrap_or(stats.suggested_bins()), *min_resolution)
            }
        }
    }
}

/// Minimum, maximum and count of pooled finite samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PooledStats {
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl PooledStats {
    pub fn from_samples(samples: &[f64]) -> Result<Self> {
        let finite = Array1::from_iter(samples.iter().copied().filter(|x| x.is_finite()));
        let (min, max) = match (finite.min(), finite.max()) {
            (Ok(min), Ok(max)) => (*min, *max),
            _ => {
                return Err(Error::DataInsufficient(
                    "no finite samples to derive bins from".into(),
                ))
            }
        };
        Ok(Self {
            min,
            max,
            count: finite.len(),
        })
    }

    /// Bin count heuristic.
    ///
    /// The larger of the Rice rule and the square-root choice, capped so that
    /// no bin is narrower than two units of the (typically integer) observable.
    pub fn suggested_bins(&self) -> usize {
        suggested_bin_count(self.count, self.min, self.max)
    }
}

/// See [`PooledStats::suggested_bins`].
pub fn suggested_bin_count(count: usize, min: f64, max: f64) -> usize {
    let n = count as f64;
    let rice = (2.0 * n.cbrt()).ceil();
    let sqrt = n.sqrt().ceil();
    let cap = ((max - min) / 2.0).floor();
    let bins = rice.max(sqrt).min(cap);
    if bins.is_finite() && bins >= 1.0 {
        bins as usize
    } else {
        1
    }
}

/// Binned counts with per-bin standard errors.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub edges: BinEdges,
    pub centers: Vec<f64>,
    pub half_widths: Vec<f64>,
    /// Counts, or bootstrap mean counts.
    pub counts: Vec<f64>,
    pub errors: Vec<f64>,
}

impl Histogram {
    fn with_counts(edges: &BinEdges, counts: Vec<f64>, errors: Vec<f64>) -> Self {
        Self {
            centers: edges.centers(),
            half_widths: edges.half_widths(),
            edges: edges.clone(),
            counts,
            errors,
        }
    }

    /// Plain counts with Poisson errors `sqrt(count)`.
    pub fn count(samples: &[f64], edges: &BinEdges) -> Self {
        let counts: Vec<f64> = edges.count(samples).into_iter().map(|c| c as f64).collect();
        let errors = counts.iter().map(|c| c.sqrt()).collect();
        Self::with_counts(edges, counts, errors)
    }

    /// Bootstrap mean counts and their standard errors.
    pub fn bootstrap(samples: &[f64], edges: &BinEdges, bootstrap: &Bootstrap) -> Self {
        let (means, stds) = bootstrap.histogram(samples, edges);
        Self::with_counts(edges, means.to_vec(), stds.to_vec())
    }

    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> f64 {
        self.counts.iter().filter(|c| c.is_finite()).sum()
    }

    /// `true` for bins with at least `min_occupancy` (mean) entries.
    pub fn validity(&self, min_occupancy: f64) -> Vec<bool> {
        self.counts
            .iter()
            .map(|&c| c.is_finite() && c >= min_occupancy && c > 0.0)
            .collect()
    }
}
