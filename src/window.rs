//! Sampling windows: one curve per bias value or energy range.
//!
//! A [`Window`] holds parallel abscissa/ordinate arrays in log space. Bins that
//! failed the occupancy threshold keep their abscissa but carry a NaN
//! ordinate, so they show up in the output files and are skipped everywhere
//! else.

use std::cmp::Ordering;
use std::fmt;

use crate::histogram::Histogram;

/// Identifies a window: a Metropolis bias or a Wang–Landau energy range.
#[derive(Debug, Clone, Copy)]
pub enum WindowKey {
    /// Importance sampling at temperature-like bias `theta` (`inf` = unbiased).
    Theta(f64),
    /// Flat-histogram sampling restricted to `[lower, upper]`.
    Range(f64, f64),
}

impl WindowKey {
    fn sort_key(&self) -> (u8, f64, f64) {
        match *self {
            WindowKey::Theta(t) => (0, t, 0.0),
            WindowKey::Range(lo, hi) => (1, lo, hi),
        }
    }

    /// Window halfway between two neighbours, proposed when they overlap too little.
    pub fn between(&self, other: &WindowKey) -> Option<WindowKey> {
        match (*self, *other) {
            (WindowKey::Theta(a), WindowKey::Theta(b)) if a.is_finite() && b.is_finite() => {
                Some(WindowKey::Theta(0.5 * (a + b)))
            }
            (WindowKey::Range(a_lo, a_hi), WindowKey::Range(b_lo, b_hi)) => Some(
                WindowKey::Range(0.5 * (a_lo + a_hi), 0.5 * (b_lo + b_hi)),
            ),
            _ => None,
        }
    }

    /// Label used in file names, e.g. `T-5.00000` or `E10_250`.
    pub fn file_label(&self) -> String {
        match *self {
            WindowKey::Theta(t) => format!("T{t:.5}"),
            WindowKey::Range(lo, hi) => format!("E{lo}_{hi}"),
        }
    }
}

impl PartialEq for WindowKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WindowKey {}

impl PartialOrd for WindowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WindowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a0, a1, a2) = self.sort_key();
        let (b0, b1, b2) = other.sort_key();
        a0.cmp(&b0)
            .then(a1.total_cmp(&b1))
            .then(a2.total_cmp(&b2))
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowKey::Theta(t) => write!(f, "theta={t}"),
            WindowKey::Range(lo, hi) => write!(f, "range=[{lo}, {hi}]"),
        }
    }
}

/// One window's curve in log space.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub key: WindowKey,
    pub x: Vec<f64>,
    pub x_err: Vec<f64>,
    /// Log-probability (or log-count); NaN marks an invalid bin.
    pub y: Vec<f64>,
    pub y_err: Vec<f64>,
}

impl Window {
    /// Window with zero errors, mostly for tests and synthetic input.
    pub fn from_points(key: WindowKey, x: Vec<f64>, y: Vec<f64>) -> Self {
        let n = x.len();
        Self {
            key,
            x,
            x_err: vec![0.0; n],
            y,
            y_err: vec![0.0; n],
        }
    }

    /**
    Reweights a histogram sampled at bias `theta` to log-probability.

    `ln P(s) = s / theta + ln(count)` up to a window constant; the error
    propagates the relative count error and the bin half width. Bins with
    fewer than `min_occupancy` entries become NaN. `theta = inf` means the
    run was unbiased.
    */
    pub fn from_biased_histogram(theta: f64, hist: &Histogram, min_occupancy: f64) -> Self {
        let valid = hist.validity(min_occupancy);
        let inv_theta = if theta.is_finite() { 1.0 / theta } else { 0.0 };
        let n = hist.n_bins();
        let mut y = Vec::with_capacity(n);
        let mut y_err = Vec::with_capacity(n);
        for i in 0..n {
            if valid[i] {
                let c = hist.counts[i];
                y.push(hist.centers[i] * inv_theta + c.ln());
                y_err.push(hist.errors[i] / c + hist.half_widths[i] * inv_theta.abs());
            } else {
                y.push(f64::NAN);
                y_err.push(f64::NAN);
            }
        }
        Self {
            key: WindowKey::Theta(theta),
            x: hist.centers.clone(),
            x_err: hist.half_widths.clone(),
            y,
            y_err,
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Points with a finite abscissa and ordinate, as `(x, y)`.
    pub fn valid_points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x
            .iter()
            .zip(self.y.iter())
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .map(|(x, y)| (*x, *y))
    }

    pub fn n_valid(&self) -> usize {
        self.valid_points().count()
    }

    /// Smallest valid abscissa, used to order windows.
    pub fn min_abscissa(&self) -> Option<f64> {
        self.valid_points().map(|(x, _)| x).min_by(f64::total_cmp)
    }

    pub fn max_abscissa(&self) -> Option<f64> {
        self.valid_points().map(|(x, _)| x).max_by(f64::total_cmp)
    }

    /// Adds `shift` to every ordinate and `error` to every ordinate error.
    pub fn shift(&mut self, shift: f64, error: f64) {
        for y in self.y.iter_mut() {
            *y += shift;
        }
        for e in self.y_err.iter_mut() {
            *e += error;
        }
    }
}

/// Sorts windows by their smallest valid abscissa; windows without valid
/// points go last, ties are broken by key.
pub fn sort_by_abscissa(windows: &mut [Window]) {
    windows.sort_by(|a, b| match (a.min_abscissa(), b.min_abscissa()) {
        (Some(x), Some(y)) => x.total_cmp(&y).then(a.key.cmp(&b.key)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.key.cmp(&b.key),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::BinEdges;

    #[test]
    fn test_key_ordering_and_equality() {
        let mut keys = vec![
            WindowKey::Range(5.0, 9.0),
            WindowKey::Theta(-3.0),
            WindowKey::Theta(f64::INFINITY),
            WindowKey::Theta(-10.0),
        ];
        keys.sort();
        assert_eq!(keys[0], WindowKey::Theta(-10.0));
        assert_eq!(keys[1], WindowKey::Theta(-3.0));
        assert_eq!(keys[2], WindowKey::Theta(f64::INFINITY));
        assert_eq!(keys[3], WindowKey::Range(5.0, 9.0));
    }

    #[test]
    fn test_between() {
        assert_eq!(
            WindowKey::Theta(-4.0).between(&WindowKey::Theta(-2.0)),
            Some(WindowKey::Theta(-3.0))
        );
        assert_eq!(
            WindowKey::Range(0.0, 10.0).between(&WindowKey::Range(8.0, 20.0)),
            Some(WindowKey::Range(5.0, 14.0))
        );
        assert_eq!(
            WindowKey::Theta(f64::INFINITY).between(&WindowKey::Theta(-2.0)),
            None
        );
    }

    #[test]
    fn test_file_label() {
        assert_eq!(WindowKey::Theta(-5.0).file_label(), "T-5.00000");
        assert_eq!(WindowKey::Range(10.0, 250.5).file_label(), "E10_250.5");
    }

    #[test]
    fn test_reweighting_and_sparse_bins() {
        let edges = BinEdges::new(vec![0.0, 2.0, 4.0]).unwrap();
        let mut data = vec![1.0; 20];
        data.extend(vec![3.0; 3]);
        let hist = Histogram::count(&data, &edges);
        let w = Window::from_biased_histogram(-2.0, &hist, 10.0);
        assert!((w.y[0] - (1.0 / -2.0 + 20f64.ln())).abs() < 1e-12);
        assert!(w.y[1].is_nan(), "Sparse bin must be NaN, got {}", w.y[1]);
        assert_eq!(w.n_valid(), 1);
        assert_eq!(w.min_abscissa(), Some(1.0));
    }

    #[test]
    fn test_unbiased_window() {
        let edges = BinEdges::new(vec![0.0, 2.0]).unwrap();
        let hist = Histogram::count(&[1.0; 50], &edges);
        let w = Window::from_biased_histogram(f64::INFINITY, &hist, 10.0);
        assert!((w.y[0] - 50f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_sort_by_abscissa() {
        let a = Window::from_points(WindowKey::Theta(1.0), vec![5.0, 6.0], vec![0.0, 0.0]);
        let b = Window::from_points(WindowKey::Theta(2.0), vec![1.0, 2.0], vec![0.0, 0.0]);
        let c = Window::from_points(WindowKey::Theta(3.0), vec![0.0], vec![f64::NAN]);
        let mut ws = vec![c, a, b];
        sort_by_abscissa(&mut ws);
        let keys: Vec<WindowKey> = ws.iter().map(|w| w.key).collect();
        assert_eq!(
            keys,
            vec![WindowKey::Theta(2.0), WindowKey::Theta(1.0), WindowKey::Theta(3.0)]
        );
    }
}
