/*!
# Bootstrap Resampling

Standard errors for every quantity in the pipeline (histogram bins, window
offsets, simple-sampling summaries) come from the non-parametric bootstrap:
the reduction is applied to `n_resample` resamples drawn with replacement at
the size of the input, and the mean and standard deviation of those values are
reported as an [`Estimate`].

Resamples are evaluated in parallel with [`rayon`]. Resample `i` draws from a
[`SmallRng`] seeded with `seed + i`, so the result does not depend on thread
scheduling and repeated calls with the same seed are identical.

```rust
use ld_reweight::bootstrap::Bootstrap;

let bs = Bootstrap::new(200).set_seed(7);
let est = bs.mean(&[1.0, 2.0, 3.0, 4.0]);
assert!((est.mean - 2.5).abs() < 0.2);
assert_eq!(est, bs.mean(&[1.0, 2.0, 3.0, 4.0]));
```
*/

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Axis};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::histogram::BinEdges;

/// A value together with its standard error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub mean: f64,
    pub stderr: f64,
}

impl Estimate {
    pub const NAN: Estimate = Estimate {
        mean: f64::NAN,
        stderr: f64::NAN,
    };

    pub fn new(mean: f64, stderr: f64) -> Self {
        Self { mean, stderr }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.mean.is_finite() && self.stderr.is_finite()
    }
}

/// Resampling configuration shared by all estimators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bootstrap {
    /// Number of resamples.
    pub n_resample: usize,
    /// Base seed; resample `i` uses `seed + i`.
    pub seed: u64,
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self {
            n_resample: 100,
            seed: 42,
        }
    }
}

impl Bootstrap {
    pub fn new(n_resample: usize) -> Self {
        Self {
            n_resample,
            ..Self::default()
        }
    }

    /// Returns the resampler with a new base seed.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub(crate) fn rng(&self, index: usize) -> SmallRng {
        SmallRng::seed_from_u64(self.seed.wrapping_add(index as u64))
    }

    /**
    Applies `reduce` to every resample of `data` and returns the mean and
    standard deviation of the results.

    Empty input gives [`Estimate::NAN`]. A resample on which `reduce`
    returns `None` (or a non-finite value) counts as NaN and is left out of
    the aggregate, so one failed fit does not poison the estimate.

    # Arguments

    * `data` - The raw observations.
    * `reduce` - Statistic evaluated on each resample.
    */
    pub fn estimate<F>(&self, data: &[f64], reduce: F) -> Estimate
    where
        F: Fn(&[f64]) -> Option<f64> + Sync,
    {
        if data.is_empty() {
            return Estimate::NAN;
        }
        let values: Vec<f64> = (0..self.n_resample)
            .into_par_iter()
            .map(|i| {
                let mut rng = self.rng(i);
                let sample = resample(data, &mut rng);
                reduce(&sample).unwrap_or(f64::NAN)
            })
            .collect();
        summarize(&values)
    }

    /// Bootstrap estimate of the arithmetic mean.
    pub fn mean(&self, data: &[f64]) -> Estimate {
        self.estimate(data, mean)
    }

    /// Bootstrap estimate of the (population) variance.
    pub fn variance(&self, data: &[f64]) -> Estimate {
        self.estimate(data, variance)
    }

    /// Like [`Bootstrap::estimate`] for several named sample sets.
    ///
    /// Every set is resampled independently (with replacement, at its own
    /// size) using the same per-index generator, then `reduce` sees the whole
    /// resampled collection. Returns NaN when all sets are empty.
    pub fn estimate_joint<K, F>(&self, sets: &BTreeMap<K, Vec<f64>>, reduce: F) -> Estimate
    where
        K: Ord + Clone + Sync,
        F: Fn(&BTreeMap<K, Vec<f64>>) -> Option<f64> + Sync,
    {
        if sets.values().all(|s| s.is_empty()) {
            return Estimate::NAN;
        }
        let values: Vec<f64> = (0..self.n_resample)
            .into_par_iter()
            .map(|i| {
                let mut rng = self.rng(i);
                let resampled: BTreeMap<K, Vec<f64>> = sets
                    .iter()
                    .map(|(k, v)| (k.clone(), resample(v, &mut rng)))
                    .collect();
                reduce(&resampled).unwrap_or(f64::NAN)
            })
            .collect();
        summarize(&values)
    }

    /// Per-bin mean and standard error of the counts of resampled histograms.
    ///
    /// Both arrays have `edges.n_bins()` entries; they are all NaN for empty
    /// input.
    pub fn histogram(&self, data: &[f64], edges: &BinEdges) -> (Array1<f64>, Array1<f64>) {
        let k = edges.n_bins();
        if data.is_empty() || self.n_resample == 0 {
            return (Array1::from_elem(k, f64::NAN), Array1::from_elem(k, f64::NAN));
        }
        let rows: Vec<Vec<f64>> = (0..self.n_resample)
            .into_par_iter()
            .map(|i| {
                let mut rng = self.rng(i);
                let sample = resample(data, &mut rng);
                edges.count(&sample).into_iter().map(|c| c as f64).collect()
            })
            .collect();

        let all_counts = Array2::from_shape_fn((self.n_resample, k), |(i, j)| rows[i][j]);
        let means = all_counts
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::from_elem(k, f64::NAN));
        let stds = all_counts.std_axis(Axis(0), 0.0);
        (means, stds)
    }
}

fn resample<R: Rng>(data: &[f64], rng: &mut R) -> Vec<f64> {
    (0..data.len())
        .map(|_| data[rng.gen_range(0..data.len())])
        .collect()
}

/// Mean and population standard deviation over the finite entries.
pub(crate) fn summarize(values: &[f64]) -> Estimate {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    match (mean(&finite), variance(&finite)) {
        (Some(m), Some(v)) => Estimate::new(m, v.sqrt()),
        _ => Estimate::NAN,
    }
}

/// Arithmetic mean, `None` for empty input.
pub fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        None
    } else {
        Some(data.iter().sum::<f64>() / data.len() as f64)
    }
}

/// Population variance (divides by `n`), `None` for empty input.
pub fn variance(data: &[f64]) -> Option<f64> {
    let m = mean(data)?;
    Some(data.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / data.len() as f64)
}
