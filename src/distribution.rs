/*!
# Final Distribution

Merges stitched windows into one curve, normalizes it to unit mass and
computes its first two moments.

All integrals use the trapezoidal rule over the points with a finite
ordinate. Log-probabilities routinely span hundreds of decades, so the
normalization is computed as

```text
ln Z = max(y) + ln ∫ exp(y - max(y)) dx
```

which never overflows.

```rust
use ld_reweight::distribution::Distribution;

let x: Vec<f64> = (0..=100).map(|i| i as f64 * 0.1).collect();
let y: Vec<f64> = x.iter().map(|v| -v + 50.0).collect();
let mut dist = Distribution::new(x, y);
dist.normalize().unwrap();
assert!((dist.integral().unwrap() - 1.0).abs() < 1e-12);
```
*/

use num_traits::Float;
use rand_distr::{Distribution as _, StandardNormal};
use rayon::prelude::*;

use crate::bootstrap::{summarize, Bootstrap, Estimate};
use crate::error::{Error, Result};
use crate::window::Window;

/// A log-probability curve over the observable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Distribution {
    pub x: Vec<f64>,
    pub x_err: Vec<f64>,
    /// Natural log of the probability density; NaN marks an excluded point.
    pub y: Vec<f64>,
    pub y_err: Vec<f64>,
}

/// Mean and variance of a normalized distribution, with errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub mean: Estimate,
    pub variance: Estimate,
}

/// One row of the rate function `Phi(s/N) = -ln P(s) / N`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePoint {
    pub s: f64,
    pub phi: f64,
    pub phi_err: f64,
}

impl Distribution {
    /// Curve without errors.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        let n = x.len();
        Self {
            x,
            x_err: vec![0.0; n],
            y,
            y_err: vec![0.0; n],
        }
    }

    /**
    Concatenates stitched windows into one curve sorted by abscissa.

    Points sharing an abscissa (the overlap of neighbouring windows) are
    merged: `x_err`, `y` and `y_err` are each averaged over the finite
    entries of the group, so a bin that is invalid in one window but valid
    in its neighbour keeps the valid value. A group with no finite ordinate
    stays NaN.
    */
    pub fn from_windows(windows: &[Window]) -> Self {
        let mut points: Vec<[f64; 4]> = windows
            .iter()
            .flat_map(|w| {
                (0..w.len()).map(move |i| [w.x[i], w.x_err[i], w.y[i], w.y_err[i]])
            })
            .filter(|p| p[0].is_finite())
            .collect();
        points.sort_by(|a, b| a[0].total_cmp(&b[0]));

        let mut dist = Distribution::default();
        for group in points.chunk_by(|a, b| a[0] == b[0]) {
            dist.x.push(group[0][0]);
            dist.x_err.push(finite_mean(group.iter().map(|p| p[1])));
            dist.y.push(finite_mean(group.iter().map(|p| p[2])));
            dist.y_err.push(finite_mean(group.iter().map(|p| p[3])));
        }
        dist
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn n_valid(&self) -> usize {
        self.y.iter().filter(|y| y.is_finite()).count()
    }

    /// Natural log of the integral of `exp(y)` over the finite points.
    pub fn log_normalization(&self) -> Result<f64> {
        log_integral_exp(&self.x, &self.y).ok_or_else(|| {
            Error::DataInsufficient(format!(
                "cannot normalize a distribution with {} finite points",
                self.n_valid()
            ))
        })
    }

    /// Shifts the curve so that it integrates to one; returns `ln Z`.
    pub fn normalize(&mut self) -> Result<f64> {
        let log_z = self.log_normalization()?;
        for y in self.y.iter_mut() {
            *y -= log_z;
        }
        Ok(log_z)
    }

    /// Integral of `exp(y)` over the finite points.
    pub fn integral(&self) -> Result<f64> {
        Ok(self.log_normalization()?.exp())
    }

    /**
    Mean and variance of the curve taken as a (not necessarily normalized)
    density.

    The central values use the curve as is. Errors come from a parametric
    bootstrap: every resample perturbs each ordinate by its error times a
    standard normal draw, renormalizes, and recomputes both moments.
    */
    pub fn moments(&self, bootstrap: &Bootstrap) -> Result<Moments> {
        let (mean, variance) = raw_moments(&self.x, &self.y).ok_or_else(|| {
            Error::DataInsufficient("too few finite points for moments".into())
        })?;

        let draws: Vec<(f64, f64)> = (0..bootstrap.n_resample)
            .into_par_iter()
            .map(|i| {
                let mut rng = bootstrap.rng(i);
                let perturbed: Vec<f64> = self
                    .y
                    .iter()
                    .zip(self.y_err.iter())
                    .map(|(y, e)| {
                        let sigma = if e.is_finite() { *e } else { 0.0 };
                        let z: f64 = StandardNormal.sample(&mut rng);
                        y + sigma * z
                    })
                    .collect();
                raw_moments(&self.x, &perturbed).unwrap_or((f64::NAN, f64::NAN))
            })
            .collect();
        let (means, variances): (Vec<f64>, Vec<f64>) = draws.into_iter().unzip();

        Ok(Moments {
            mean: Estimate::new(mean, summarize(&means).stderr),
            variance: Estimate::new(variance, summarize(&variances).stderr),
        })
    }

    /// Rate function `-y / N` against `x / N`; excluded points stay NaN.
    pub fn rate_function(&self, size: u64) -> Vec<RatePoint> {
        let n = size as f64;
        (0..self.len())
            .map(|i| RatePoint {
                s: self.x[i] / n,
                phi: -self.y[i] / n,
                phi_err: self.y_err[i] / n,
            })
            .collect()
    }
}

fn finite_mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Trapezoidal rule over parallel, sorted arrays.
pub fn trapezoid<T: Float>(x: &[T], y: &[T]) -> T {
    let two = T::one() + T::one();
    x.windows(2)
        .zip(y.windows(2))
        .fold(T::zero(), |acc, (xs, ys)| {
            acc + (xs[1] - xs[0]) * (ys[0] + ys[1]) / two
        })
}

fn finite_pairs(x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y.iter())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .unzip()
}

/**
Computes `ln ∫ exp(y) dx` over the points where both coordinates are
finite, without overflow.

Returns `None` when fewer than two such points exist or the integral is
not positive. `x` must be sorted.
*/
pub fn log_integral_exp(x: &[f64], y: &[f64]) -> Option<f64> {
    let (xs, ys) = finite_pairs(x, y);
    if xs.len() < 2 {
        return None;
    }
    let max = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let scaled: Vec<f64> = ys.iter().map(|v| (v - max).exp()).collect();
    let area = trapezoid(&xs, &scaled);
    if area > 0.0 && area.is_finite() {
        Some(max + area.ln())
    } else {
        None
    }
}

/**
Returns an unnormalized log-density shifted so that its exponential
integrates to one over the finite points.

Used for the per-iteration curves of flat-histogram runs.
*/
pub fn normalize_log_density(x: &[f64], y: &[f64]) -> Option<Vec<f64>> {
    let log_z = log_integral_exp(x, y)?;
    Some(y.iter().map(|v| v - log_z).collect())
}

fn raw_moments(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let log_z = log_integral_exp(x, y)?;
    let (xs, ys) = finite_pairs(x, y);
    let p: Vec<f64> = ys.iter().map(|v| (v - log_z).exp()).collect();
    let first: Vec<f64> = xs.iter().zip(p.iter()).map(|(x, p)| x * p).collect();
    let second: Vec<f64> = xs.iter().zip(p.iter()).map(|(x, p)| x * x * p).collect();
    let mean = trapezoid(&xs, &first);
    let variance = trapezoid(&xs, &second) - mean * mean;
    Some((mean, variance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowKey;
    use approx::assert_abs_diff_eq;

    fn gaussian(mu: f64, sigma: f64, offset: f64) -> Distribution {
        let x: Vec<f64> = (0..=400).map(|i| -10.0 + i as f64 * 0.05).collect();
        let y = x
            .iter()
            .map(|v| -0.5 * ((v - mu) / sigma).powi(2) + offset)
            .collect();
        Distribution::new(x, y)
    }

    #[test]
    fn test_trapezoid() {
        let x = [0.0f64, 1.0, 2.0, 4.0];
        let y = [1.0f64, 1.0, 3.0, 3.0];
        assert_abs_diff_eq!(trapezoid(&x, &y), 1.0 + 2.0 + 6.0);
        let xf = [0.0f32, 2.0];
        let yf = [1.0f32, 1.0];
        assert_eq!(trapezoid(&xf, &yf), 2.0f32);
    }

    #[test]
    fn test_normalized_integrates_to_one() {
        let mut dist = gaussian(1.0, 2.0, 700.0);
        let log_z = dist.normalize().unwrap();
        assert!(log_z > 700.0, "Expected huge normalization, got {log_z}");
        assert_abs_diff_eq!(dist.integral().unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_nan_points_are_excluded() {
        let mut dist = gaussian(0.0, 1.0, 0.0);
        let mut holed = dist.clone();
        // Knock out the tails only, where the density is negligible.
        for i in 0..50 {
            holed.y[i] = f64::NAN;
        }
        dist.normalize().unwrap();
        holed.normalize().unwrap();
        assert_abs_diff_eq!(holed.integral().unwrap(), 1.0, epsilon = 1e-12);
        assert!(holed.y[10].is_nan(), "Excluded point must stay NaN");
        assert_abs_diff_eq!(holed.y[200], dist.y[200], epsilon = 1e-9);
    }

    #[test]
    fn test_too_few_points() {
        let dist = Distribution::new(vec![1.0, 2.0], vec![0.0, f64::NAN]);
        let res = dist.log_normalization();
        assert!(matches!(res, Err(Error::DataInsufficient(_))), "Got {res:?}");
    }

    #[test]
    fn test_moments_of_gaussian() {
        let mut dist = gaussian(1.5, 0.8, -3.0);
        for e in dist.y_err.iter_mut() {
            *e = 0.01;
        }
        let m = dist.moments(&Bootstrap::new(50)).unwrap();
        assert_abs_diff_eq!(m.mean.mean, 1.5, epsilon = 1e-6);
        assert_abs_diff_eq!(m.variance.mean, 0.64, epsilon = 1e-3);
        assert!(m.mean.stderr > 0.0 && m.mean.stderr < 0.01, "Got {:?}", m.mean);
    }

    #[test]
    fn test_merge_shared_abscissas() {
        let a = Window::from_points(WindowKey::Theta(-2.0), vec![0.0, 1.0, 2.0], vec![0.0, -1.0, f64::NAN]);
        let b = Window::from_points(WindowKey::Theta(-1.0), vec![1.0, 2.0, 3.0], vec![-1.5, -2.0, f64::NAN]);
        let dist = Distribution::from_windows(&[b, a]);
        assert_eq!(dist.x, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(dist.y[0], 0.0);
        assert_eq!(dist.y[1], -1.25);
        assert_eq!(dist.y[2], -2.0);
        assert!(dist.y[3].is_nan());
    }

    #[test]
    fn test_rate_function() {
        let mut dist = Distribution::new(vec![10.0, 20.0], vec![-1.0, -4.0]);
        dist.y_err = vec![0.2, 0.4];
        let rate = dist.rate_function(10);
        assert_eq!(rate[1].s, 2.0);
        assert_abs_diff_eq!(rate[1].phi, 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(rate[1].phi_err, 0.04, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_log_density() {
        let x = [0.0, 1.0, 2.0];
        let y = [1000.0, 1000.0, 1000.0];
        let norm = normalize_log_density(&x, &y).unwrap();
        for v in norm {
            assert_abs_diff_eq!(v, -(2f64.ln()), epsilon = 1e-12);
        }
    }
}
