/*!
# Window Stitching

Each window determines its log-probability only up to an additive constant.
The stitcher fixes those constants by walking the windows in order of their
smallest abscissa and aligning every window to the already placed one on its
left.

For neighbours `i` and `i + 1` the overlap is either the set of shared
abscissas ([`OverlapMode::Exact`]) or the right window's abscissas inside the
left window's range, compared against a cubic spline through the left window
([`OverlapMode::Interpolated`]). The differences `right - left` are
bootstrapped; the shift applied to the right window is minus their mean, and
shifts accumulate from left to right:

```text
shift[0] = 0
shift[k] = shift[k-1] - mean(y_k - y_{k-1})   on the overlap
```

The accumulated bootstrap errors are added to the errors of every stitched
bin. Links that cannot be computed get a zero shift and are reported as
[`LinkStatus::Failed`]; links with a thin overlap are stitched but reported
as [`LinkStatus::SparseOverlap`] together with a proposed intermediate window.

```rust
use ld_reweight::stitch::Stitcher;
use ld_reweight::window::{Window, WindowKey};

let mut windows = vec![
    Window::from_points(WindowKey::Theta(-4.0), vec![0., 1., 2., 3., 4.], vec![0., -1., -2., -3., -4.]),
    Window::from_points(WindowKey::Theta(-2.0), vec![3., 4., 5., 6., 7.], vec![-2., -3., -4., -5., -6.]),
];
let report = Stitcher::default().stitch(&mut windows);
assert!((report.links[0].shift.mean + 1.0).abs() < 1e-9);
assert!((windows[1].y[0] + 3.0).abs() < 1e-9);
```
*/

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::bootstrap::{Bootstrap, Estimate};
use crate::error::{Error, Result};
use crate::spline::CubicSpline;
use crate::window::{Window, WindowKey};

/// How overlap points between neighbouring windows are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapMode {
    /// Abscissas present in both windows (shared binning).
    Exact,
    /// Cubic spline through the left window, evaluated at the right window's abscissas.
    Interpolated,
    /// Exact when the windows share any abscissa, interpolated otherwise.
    #[default]
    Auto,
}

/// Outcome of aligning one pair of neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Ok,
    /// Fewer overlap points than required; stitched anyway.
    SparseOverlap,
    /// No usable overlap; a zero shift was applied.
    Failed,
}

/// Alignment of window `right` onto window `left`.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub left: WindowKey,
    pub right: WindowKey,
    /// Shift added to the right window (before accumulation).
    pub shift: Estimate,
    pub status: LinkStatus,
    /// Overlap abscissas and the differences `right - left` there.
    pub overlap: Vec<(f64, f64)>,
    /// Intermediate window that would improve the overlap.
    pub proposed: Option<WindowKey>,
}

/// Accumulated result of a stitching pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StitchReport {
    pub links: Vec<Link>,
    /// Cumulative shift (mean) and error applied to each window, in window order.
    pub cumulative: Vec<Estimate>,
}

impl StitchReport {
    pub fn n_failed(&self) -> usize {
        self.links
            .iter()
            .filter(|l| l.status == LinkStatus::Failed)
            .count()
    }

    pub fn n_sparse(&self) -> usize {
        self.links
            .iter()
            .filter(|l| l.status == LinkStatus::SparseOverlap)
            .count()
    }

    /// Whether any link fell back to a zero shift.
    pub fn is_degraded(&self) -> bool {
        self.n_failed() > 0
    }

    pub fn proposed(&self) -> Vec<WindowKey> {
        self.links.iter().filter_map(|l| l.proposed).collect()
    }

    /// One-line account of degraded links and proposed windows, `None` when
    /// every link overlapped well.
    pub fn notice(&self) -> Option<String> {
        let proposed = self.proposed();
        if proposed.is_empty() && !self.is_degraded() {
            return None;
        }
        let mut text = format!("{} degraded links", self.n_failed());
        if !proposed.is_empty() {
            let keys: Vec<String> = proposed.iter().map(|k| k.to_string()).collect();
            text.push_str(&format!(", proposed windows: {}", keys.join(", ")));
        }
        Some(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stitcher {
    pub bootstrap: Bootstrap,
    /// Overlap points below which a link is reported as sparse.
    pub min_overlap: usize,
    pub mode: OverlapMode,
}

impl Default for Stitcher {
    fn default() -> Self {
        Self {
            bootstrap: Bootstrap::default(),
            min_overlap: 5,
            mode: OverlapMode::Auto,
        }
    }
}

impl Stitcher {
    pub fn new(bootstrap: Bootstrap, min_overlap: usize, mode: OverlapMode) -> Self {
        Self {
            bootstrap,
            min_overlap,
            mode,
        }
    }

    /**
    Aligns `windows` in place, in the given order.

    Callers are expected to sort the windows by their smallest abscissa first
    (see [`crate::window::sort_by_abscissa`]). A single window is left
    untouched.
    */
    pub fn stitch(&self, windows: &mut [Window]) -> StitchReport {
        let mut report = StitchReport::default();
        if windows.is_empty() {
            return report;
        }
        report.cumulative.push(Estimate::zero());

        for k in 1..windows.len() {
            let link = self.link(&windows[k - 1], &windows[k]);
            let previous = report.cumulative[k - 1];
            let cumulative = Estimate::new(
                previous.mean + link.shift.mean,
                previous.stderr + link.shift.stderr,
            );
            report.cumulative.push(cumulative);
            report.links.push(link);
        }

        for (window, offset) in windows.iter_mut().zip(report.cumulative.iter()).skip(1) {
            window.shift(offset.mean, offset.stderr);
        }
        report
    }

    /// Computes the shift of `right` relative to `left` (both unshifted).
    pub fn link(&self, left: &Window, right: &Window) -> Link {
        let proposed = left.key.between(&right.key);
        let overlap = match self.overlap(left, right) {
            Ok(points) => points,
            Err(e) => {
                error!("{e}; using a zero offset");
                return Link {
                    left: left.key,
                    right: right.key,
                    shift: Estimate::zero(),
                    status: LinkStatus::Failed,
                    overlap: Vec::new(),
                    proposed,
                };
            }
        };

        let diffs: Vec<f64> = overlap.iter().map(|(_, d)| *d).collect();
        let est = self.bootstrap.mean(&diffs);
        if !est.is_finite() {
            error!(
                "no usable overlap between {} and {}; using a zero offset",
                left.key, right.key
            );
            return Link {
                left: left.key,
                right: right.key,
                shift: Estimate::zero(),
                status: LinkStatus::Failed,
                overlap,
                proposed,
            };
        }

        let (status, proposed) = if overlap.len() < self.min_overlap {
            match proposed {
                Some(p) => warn!(
                    "not enough overlap between {} and {} ({} points), insert an intermediate window, e.g. {}",
                    left.key,
                    right.key,
                    overlap.len(),
                    p
                ),
                None => warn!(
                    "not enough overlap between {} and {} ({} points)",
                    left.key,
                    right.key,
                    overlap.len()
                ),
            }
            (LinkStatus::SparseOverlap, proposed)
        } else {
            (LinkStatus::Ok, None)
        };

        Link {
            left: left.key,
            right: right.key,
            shift: Estimate::new(-est.mean, est.stderr),
            status,
            overlap,
            proposed,
        }
    }

    /// Overlap abscissas with differences `right - left`.
    pub fn overlap(&self, left: &Window, right: &Window) -> Result<Vec<(f64, f64)>> {
        let exact = exact_overlap(left, right);
        match self.mode {
            OverlapMode::Exact => non_empty(exact, left, right),
            OverlapMode::Interpolated => interpolated_overlap(left, right),
            OverlapMode::Auto if !exact.is_empty() => Ok(exact),
            OverlapMode::Auto => interpolated_overlap(left, right),
        }
    }
}

fn non_empty(points: Vec<(f64, f64)>, left: &Window, right: &Window) -> Result<Vec<(f64, f64)>> {
    if points.is_empty() {
        Err(Error::InsufficientOverlap {
            left: left.key.to_string(),
            right: right.key.to_string(),
            reason: "no shared abscissa".into(),
        })
    } else {
        Ok(points)
    }
}

fn exact_overlap(left: &Window, right: &Window) -> Vec<(f64, f64)> {
    let mut lhs: Vec<(f64, f64)> = left.valid_points().collect();
    lhs.sort_by(|a, b| a.0.total_cmp(&b.0));
    right
        .valid_points()
        .filter_map(|(x, y)| {
            lhs.binary_search_by(|(lx, _)| lx.total_cmp(&x))
                .ok()
                .map(|i| (x, y - lhs[i].1))
        })
        .collect()
}

fn interpolated_overlap(left: &Window, right: &Window) -> Result<Vec<(f64, f64)>> {
    let mut lhs: Vec<(f64, f64)> = left.valid_points().collect();
    lhs.sort_by(|a, b| a.0.total_cmp(&b.0));
    lhs.dedup_by(|a, b| a.0 == b.0);
    let (xs, ys): (Vec<f64>, Vec<f64>) = lhs.into_iter().unzip();
    let spline = CubicSpline::new(&xs, &ys).map_err(|e| Error::InsufficientOverlap {
        left: left.key.to_string(),
        right: right.key.to_string(),
        reason: e.to_string(),
    })?;
    let points: Vec<(f64, f64)> = right
        .valid_points()
        .filter_map(|(x, y)| spline.eval(x).map(|l| (x, y - l)))
        .collect();
    non_empty(points, left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(key: f64, xs: std::ops::Range<i32>, slope: f64, intercept: f64) -> Window {
        let x: Vec<f64> = xs.map(|v| v as f64).collect();
        let y = x.iter().map(|v| slope * v + intercept).collect();
        Window::from_points(WindowKey::Theta(key), x, y)
    }

    #[test]
    fn test_single_window_is_unchanged() {
        let original = line(-1.0, 0..10, -0.5, 2.0);
        let mut windows = vec![original.clone()];
        let report = Stitcher::default().stitch(&mut windows);
        assert_eq!(windows[0], original);
        assert!(report.links.is_empty());
        assert_eq!(report.cumulative, vec![Estimate::zero()]);
    }

    #[test]
    fn test_recovers_constant_offset() {
        let d = 3.7;
        let mut windows = vec![line(-5.0, 0..20, -1.0, 0.0), line(-3.0, 10..30, -1.0, d)];
        let report = Stitcher::default().stitch(&mut windows);
        let link = &report.links[0];
        assert_eq!(link.status, LinkStatus::Ok);
        assert_eq!(link.overlap.len(), 10);
        assert!((link.shift.mean + d).abs() < 1e-9, "Expected -{d}, got {:?}", link.shift);
        for (x, y) in windows[1].valid_points() {
            assert!((y + x).abs() < 1e-9, "Stitched value off at {x}: {y}");
        }
    }

    #[test]
    fn test_offsets_accumulate() {
        let mut windows = vec![
            line(-6.0, 0..10, -1.0, 0.0),
            line(-4.0, 5..15, -1.0, 2.0),
            line(-2.0, 10..20, -1.0, 5.0),
        ];
        let report = Stitcher::default().stitch(&mut windows);
        assert!((report.cumulative[1].mean + 2.0).abs() < 1e-9);
        assert!((report.cumulative[2].mean + 5.0).abs() < 1e-9);
        assert!((windows[2].y[0] + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_sparse_overlap_proposes_window() {
        let mut windows = vec![line(-4.0, 0..5, -1.0, 0.0), line(-2.0, 3..8, -1.0, 1.0)];
        let report = Stitcher::default().stitch(&mut windows);
        assert_eq!(report.links[0].status, LinkStatus::SparseOverlap);
        assert_eq!(report.proposed(), vec![WindowKey::Theta(-3.0)]);
        assert!(!report.is_degraded());
        assert_eq!(
            report.notice().as_deref(),
            Some("0 degraded links, proposed windows: theta=-3")
        );
    }

    #[test]
    fn test_no_notice_for_good_overlap() {
        let mut windows = vec![line(-5.0, 0..20, -1.0, 0.0), line(-3.0, 10..30, -1.0, 1.0)];
        let report = Stitcher::default().stitch(&mut windows);
        assert_eq!(report.notice(), None);
    }

    #[test]
    fn test_disjoint_windows_fail_with_zero_shift() {
        let mut windows = vec![line(-4.0, 0..5, -1.0, 0.0), line(-2.0, 10..15, -1.0, 1.0)];
        let before = windows[1].clone();
        let report = Stitcher::default().stitch(&mut windows);
        assert_eq!(report.links[0].status, LinkStatus::Failed);
        assert_eq!(report.n_failed(), 1);
        assert!(report.is_degraded());
        assert_eq!(windows[1].y, before.y);
    }

    #[test]
    fn test_interpolated_overlap() {
        // Right window sits on half-integer abscissas, so nothing is shared.
        let left = line(-4.0, 0..10, -0.5, 0.0);
        let x: Vec<f64> = (0..10).map(|i| 5.5 + i as f64).collect();
        let y = x.iter().map(|v| -0.5 * v + 2.0).collect();
        let mut windows = vec![left, Window::from_points(WindowKey::Theta(-2.0), x, y)];
        let report = Stitcher::default().stitch(&mut windows);
        let link = &report.links[0];
        assert_eq!(link.overlap.len(), 4);
        assert!((link.shift.mean + 2.0).abs() < 1e-9, "Got {:?}", link.shift);
    }

    #[test]
    fn test_interpolation_needs_enough_points() {
        let left = line(-4.0, 0..3, -1.0, 0.0);
        let right = Window::from_points(WindowKey::Theta(-2.0), vec![0.5, 1.5], vec![0.0, 0.0]);
        let stitcher = Stitcher::new(Bootstrap::default(), 5, OverlapMode::Interpolated);
        let res = stitcher.overlap(&left, &right);
        assert!(matches!(res, Err(Error::InsufficientOverlap { .. })), "Got {res:?}");
    }

    #[test]
    fn test_invalid_bins_are_ignored() {
        let mut left = line(-4.0, 0..10, -1.0, 0.0);
        left.y[7] = f64::NAN;
        let mut right = line(-2.0, 5..15, -1.0, 1.0);
        right.y[0] = f64::NAN;
        let link = Stitcher::default().link(&left, &right);
        let xs: Vec<f64> = link.overlap.iter().map(|p| p.0).collect();
        assert_eq!(xs, vec![6.0, 8.0, 9.0]);
    }
}
