/*!
# Integrated Autocorrelation Time

Successive sweeps of a Markov chain are correlated, so histogramming every
recorded sample would underestimate the statistical errors. This module
estimates the integrated autocorrelation time τ of a series and thins the
series to (approximately) independent draws.

The normalized autocorrelation function is computed with the Wiener–Khinchin
theorem: the mean-subtracted series is zero-padded to at least twice its
length (so the circular correlation equals the linear one), transformed with
[`rustfft`], squared in magnitude and transformed back.

## Example

```rust
use ld_reweight::autocorr::{decorrelate, integrated_time};

// Each value repeats four times, so neighbouring samples are strongly correlated.
let series: Vec<f64> = (0..2000).map(|i| ((i / 4) % 7) as f64).collect();
let tau = integrated_time(&series, None).unwrap();
assert!(tau > 1.0);

let independent = decorrelate(&series, tau);
assert!(independent.len() < series.len());
```
*/

use rustfft::{num_complex::Complex, FftPlanner};
use tracing::debug;

use crate::error::{Error, Result};

/// Default number of leading samples used for the estimate.
pub const DEFAULT_PREFIX: usize = 5000;

/// Normalized autocorrelation function `rho[lag]` for `lag in 0..n`.
///
/// Returns [`Error::DataInsufficient`] for empty or constant input.
pub fn autocorrelation(series: &[f64]) -> Result<Vec<f64>> {
    let n = series.len();
    if n < 2 {
        return Err(Error::DataInsufficient(format!(
            "autocorrelation needs at least 2 samples, got {n}"
        )));
    }
    let mean = series.iter().sum::<f64>() / n as f64;

    let padded = (2 * n).next_power_of_two();
    let mut buffer: Vec<Complex<f64>> = series
        .iter()
        .map(|&x| Complex::new(x - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(padded)
        .collect();

    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(padded).process(&mut buffer);
    for c in buffer.iter_mut() {
        *c = Complex::new(c.norm_sqr(), 0.0);
    }
    planner.plan_fft_inverse(padded).process(&mut buffer);

    let lag0 = buffer[0].re;
    // rustfft does not normalize; the factor cancels in the ratio below.
    if !(lag0.abs() > f64::EPSILON * padded as f64 * mean.abs().max(1.0)) {
        return Err(Error::DataInsufficient(
            "series has zero variance, autocorrelation time undefined".into(),
        ));
    }
    Ok(buffer[..n].iter().map(|c| c.re / lag0).collect())
}

/// Integrated autocorrelation time of `series`.
///
/// Sums the normalized autocorrelation function from lag 0 up to, but
/// excluding, the first negative lag. Only the first `prefix` samples are used
/// (default [`DEFAULT_PREFIX`]); pass `Some(usize::MAX)` to use everything.
pub fn integrated_time(series: &[f64], prefix: Option<usize>) -> Result<f64> {
    let prefix = prefix.unwrap_or(DEFAULT_PREFIX);
    let data = &series[..series.len().min(prefix)];
    let rho = autocorrelation(data)?;
    let tau = rho.iter().take_while(|&&r| r >= 0.0).sum::<f64>();
    Ok(tau.max(0.0))
}

/// Keeps every `ceil(2 tau)`-th sample (at least every sample).
pub fn decorrelate(series: &[f64], tau: f64) -> Vec<f64> {
    let step = thinning_step(tau);
    series.iter().step_by(step).copied().collect()
}

/// Stride used by [`decorrelate`].
pub fn thinning_step(tau: f64) -> usize {
    if tau.is_finite() {
        ((2.0 * tau).ceil() as usize).max(1)
    } else {
        1
    }
}

/// Estimates τ for `series` and returns the thinned samples together with τ.
///
/// `label` only appears in the diagnostic log line.
pub fn estimate_and_decorrelate(
    series: &[f64],
    prefix: Option<usize>,
    label: &str,
) -> Result<(Vec<f64>, f64)> {
    let tau = integrated_time(series, prefix)?;
    debug!("{label}: t_corr = {tau:.1}");
    Ok((decorrelate(series, tau), tau))
}
