//! Natural cubic spline interpolation.
//!
//! Used to compare two windows whose abscissas do not coincide (Wang–Landau
//! windows carry their own binning). Construction fails loudly when there are
//! too few knots; callers decide how to degrade.

use crate::error::{Error, Result};

/// Minimum number of knots for a cubic interpolant.
pub const MIN_KNOTS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives at the knots.
    m: Vec<f64>,
}

impl CubicSpline {
    /**
    Builds a natural cubic spline (zero curvature at both ends).

    Knots must be finite and strictly increasing in `x`; at least
    [`MIN_KNOTS`] are required.
    */
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() {
            return Err(Error::DataInsufficient(format!(
                "spline needs equally many abscissas and ordinates ({} vs {})",
                x.len(),
                y.len()
            )));
        }
        let n = x.len();
        if n < MIN_KNOTS {
            return Err(Error::DataInsufficient(format!(
                "cubic spline needs at least {MIN_KNOTS} points, got {n}"
            )));
        }
        if x.iter().chain(y).any(|v| !v.is_finite()) {
            return Err(Error::DataInsufficient("spline knots must be finite".into()));
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::DataInsufficient(
                "spline abscissas must be strictly increasing".into(),
            ));
        }

        // Tridiagonal system for the interior second derivatives (Thomas algorithm).
        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let mut diag = vec![0.0; n];
        let mut upper = vec![0.0; n];
        let mut rhs = vec![0.0; n];
        for i in 1..n - 1 {
            diag[i] = 2.0 * (h[i - 1] + h[i]);
            upper[i] = h[i];
            rhs[i] = 6.0 * ((y[i + 1] - y[i]) / h[i] - (y[i] - y[i - 1]) / h[i - 1]);
        }
        for i in 2..n - 1 {
            let factor = h[i - 1] / diag[i - 1];
            diag[i] -= factor * upper[i - 1];
            rhs[i] -= factor * rhs[i - 1];
        }
        let mut m = vec![0.0; n];
        for i in (1..n - 1).rev() {
            m[i] = (rhs[i] - upper[i] * m[i + 1]) / diag[i];
        }

        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            m,
        })
    }

    pub fn min_x(&self) -> f64 {
        self.x[0]
    }

    pub fn max_x(&self) -> f64 {
        self.x[self.x.len() - 1]
    }

    /// Whether `t` lies in the closed knot range.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.min_x() && t <= self.max_x()
    }

    /// Evaluates the spline; `None` outside the knot range.
    pub fn eval(&self, t: f64) -> Option<f64> {
        if !self.contains(t) {
            return None;
        }
        let i = self
            .x
            .partition_point(|&xi| xi <= t)
            .saturating_sub(1)
            .min(self.x.len() - 2);
        let h = self.x[i + 1] - self.x[i];
        let a = (self.x[i + 1] - t) / h;
        let b = (t - self.x[i]) / h;
        Some(
            a * self.y[i]
                + b * self.y[i + 1]
                + ((a * a * a - a) * self.m[i] + (b * b * b - b) * self.m[i + 1]) * h * h / 6.0,
        )
    }
}
