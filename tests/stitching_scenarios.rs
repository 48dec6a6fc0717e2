//! Stitching and normalization on small hand-made windows.
//!
//! 1. `test_two_offset_windows`: two windows offset by a constant are aligned
//!    onto the left one and merge into one straight line.
//! 2. `test_sparse_bins_are_excluded`: under-occupied bins end up as NaN in the
//!    final distribution instead of as low probabilities.

use ld_reweight::bootstrap::Bootstrap;
use ld_reweight::distribution::Distribution;
use ld_reweight::histogram::{BinEdges, Histogram};
use ld_reweight::stitch::{LinkStatus, Stitcher};
use ld_reweight::window::{sort_by_abscissa, Window, WindowKey};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_two_offset_windows() {
        let mut windows = vec![
            Window::from_points(
                WindowKey::Theta(-2.0),
                vec![3., 4., 5., 6., 7.],
                vec![-2., -3., -4., -5., -6.],
            ),
            Window::from_points(
                WindowKey::Theta(-4.0),
                vec![0., 1., 2., 3., 4.],
                vec![0., -1., -2., -3., -4.],
            ),
        ];
        sort_by_abscissa(&mut windows);
        assert_eq!(windows[0].key, WindowKey::Theta(-4.0));

        let report = Stitcher::default().stitch(&mut windows);
        let link = &report.links[0];
        assert_abs_diff_eq!(link.shift.mean, -1.0, epsilon = 1e-9);
        // Two shared points only.
        assert_eq!(link.status, LinkStatus::SparseOverlap);
        assert_eq!(link.overlap.len(), 2);

        assert_abs_diff_eq!(windows[0].y[3], -3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(windows[1].y[0], -3.0, epsilon = 1e-9);

        let dist = Distribution::from_windows(&windows);
        assert_eq!(dist.len(), 8);
        for (x, y) in dist.x.iter().zip(dist.y.iter()) {
            assert_abs_diff_eq!(*y, -*x, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_sparse_bins_are_excluded() {
        let edges = BinEdges::new(vec![0.0, 10.0, 20.0, 30.0]).unwrap();
        let mut samples: Vec<f64> = (0..400).map(|i| (i % 20) as f64 + 0.5).collect();
        samples.extend([25.0, 26.0, 27.0]);

        let hist = Histogram::bootstrap(&samples, &edges, &Bootstrap::default());
        assert!(hist.counts[2] < 10.0, "Expected a sparse last bin, got {:?}", hist.counts);

        let window = Window::from_biased_histogram(f64::INFINITY, &hist, 10.0);
        let mut dist = Distribution::from_windows(&[window]);
        dist.normalize().unwrap();

        assert!(dist.y[2].is_nan(), "Sparse bin must be excluded, got {}", dist.y[2]);
        assert!(dist.y[0].is_finite() && dist.y[1].is_finite());
        assert_abs_diff_eq!(dist.integral().unwrap(), 1.0, epsilon = 1e-12);
    }
}
