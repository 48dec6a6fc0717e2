/*!
# Pipeline Driver

One driver for every sampling method. Per system size it

1. resolves the window set (see [`EvaluationConfig::windows_for`]),
2. loads every run in parallel, dropping runs flagged as not equilibrated,
3. turns each run into a [`Window`] (histogram + bootstrap for importance
   sampling, per-iteration normalization + bootstrap for flat histograms),
4. stitches the windows, merges and normalizes the result and computes its
   moments,
5. writes the per-size result files.

A failing window is logged and left out; a failing size is logged and the
next size is processed. `summary.dat` and `simple.dat` are written once all
sizes are done.

```no_run
use ld_reweight::config::EvaluationConfig;
use ld_reweight::pipeline::Pipeline;

let config = EvaluationConfig::from_path("evaluate.toml".as_ref())?;
let report = Pipeline::new(config)?.run()?;
println!("{} sizes evaluated, {} failed", report.sizes.len(), report.failed.len());
# Ok::<(), ld_reweight::error::Error>(())
```
*/

use std::fmt;
use std::fs;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::autocorr::estimate_and_decorrelate;
use crate::bootstrap::Bootstrap;
use crate::config::EvaluationConfig;
use crate::distribution::{normalize_log_density, Distribution, Moments};
use crate::error::{Error, Result};
use crate::histogram::{BinningPolicy, Histogram};
use crate::io::output::{self, size_file, SimpleRow, SummaryRow};
use crate::io::{FlatHistogramFile, ResourceSummary, RunFile, RunHeader};
use crate::simple;
use crate::stitch::StitchReport;
use crate::window::{sort_by_abscissa, Window, WindowKey};

/// How the raw data was sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "u8")]
pub enum SamplingMethod {
    /// One unbiased run per size.
    Simple,
    /// Importance sampling at a set of biases.
    #[default]
    Metropolis,
    /// Flat-histogram sampling over energy windows.
    WangLandau,
}

impl SamplingMethod {
    /// Numeric code used by the simulator (`-m`) and in file names.
    pub fn code(&self) -> u8 {
        match self {
            SamplingMethod::Simple => 0,
            SamplingMethod::Metropolis => 1,
            SamplingMethod::WangLandau => 2,
        }
    }
}

impl TryFrom<u8> for SamplingMethod {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(SamplingMethod::Simple),
            1 => Ok(SamplingMethod::Metropolis),
            2 => Ok(SamplingMethod::WangLandau),
            other => Err(Error::Configuration(format!(
                "unknown sampling method {other} (0 simple, 1 metropolis, 2 wang-landau)"
            ))),
        }
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SamplingMethod::Simple => "simple sampling",
            SamplingMethod::Metropolis => "metropolis",
            SamplingMethod::WangLandau => "wang-landau",
        };
        f.write_str(name)
    }
}

/// Progress bar in the usual style, hidden when `enabled` is false.
pub(crate) fn progress_bar(len: u64, prefix: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    let pb = ProgressBar::new(len);
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb
}

/// A window left out of the evaluation, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedWindow {
    pub key: WindowKey,
    pub reason: String,
}

/// Outcome of one system size.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeReport {
    pub size: u64,
    /// Windows that made it into the stitched curve, in stitching order.
    pub windows: Vec<WindowKey>,
    pub skipped: Vec<SkippedWindow>,
    pub not_equilibrated: Vec<WindowKey>,
    pub stitch: StitchReport,
    pub distribution: Distribution,
    pub log_norm: f64,
    pub moments: Option<Moments>,
    pub resources: ResourceSummary,
    pub simple: Option<SimpleRow>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub sizes: Vec<SizeReport>,
    /// Sizes that could not be evaluated, with the error message.
    pub failed: Vec<(u64, String)>,
}

impl RunReport {
    pub fn size(&self, size: u64) -> Option<&SizeReport> {
        self.sizes.iter().find(|r| r.size == size)
    }
}

/// Per-window bookkeeping collected before the report exists.
#[derive(Debug, Default)]
struct Collected {
    skipped: Vec<SkippedWindow>,
    not_equilibrated: Vec<WindowKey>,
    headers: Vec<RunHeader>,
    simple: Option<SimpleRow>,
}

impl Collected {
    /// Sorts a window-level error into the right bucket; fatal errors are returned.
    fn absorb(&mut self, size: u64, key: WindowKey, err: Error) -> Result<()> {
        match err {
            Error::NotEquilibrated(_) => {
                info!("not equilibrated: N={size}, {key}");
                self.not_equilibrated.push(key);
                Ok(())
            }
            e if e.is_fatal_for_size() => Err(e),
            e => {
                warn!("N={size} {key}: skipping window: {e}");
                self.skipped.push(SkippedWindow {
                    key,
                    reason: e.to_string(),
                });
                Ok(())
            }
        }
    }
}

/// Loaded importance-sampling run.
struct LoadedSeries {
    key: WindowKey,
    header: RunHeader,
    series: Vec<f64>,
    simple: Option<Result<SimpleRow>>,
}

pub struct Pipeline {
    config: EvaluationConfig,
    bootstrap: Bootstrap,
    pool: ThreadPool,
}

impl Pipeline {
    /// Validates the configuration and builds the worker pool.
    pub fn new(config: EvaluationConfig) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.analysis.threads)
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build thread pool: {e}")))?;
        Ok(Self {
            bootstrap: config.bootstrap(),
            config,
            pool,
        })
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Evaluates every configured size and writes the collective files.
    pub fn run(&self) -> Result<RunReport> {
        let out = &self.config.output_dir;
        fs::create_dir_all(out).map_err(|e| Error::io(out, e))?;
        info!(
            "evaluating {} sizes ({})",
            self.config.sizes.len(),
            self.config.sampling
        );

        let mut report = RunReport::default();
        for &size in &self.config.sizes {
            info!("N = {size}");
            match self.pool.install(|| self.process_size(size)) {
                Ok(r) => report.sizes.push(r),
                Err(e) => {
                    error!("N={size}: evaluation failed: {e}");
                    report.failed.push((size, e.to_string()));
                }
            }
        }

        let summary: Vec<SummaryRow> = report
            .sizes
            .iter()
            .filter_map(|r| r.moments.map(|moments| SummaryRow { size: r.size, moments }))
            .collect();
        output::write_summary(&out.join("summary.dat"), &summary)?;

        let simple: Vec<SimpleRow> = report.sizes.iter().filter_map(|r| r.simple.clone()).collect();
        if !simple.is_empty() {
            output::write_simple(&out.join("simple.dat"), &simple)?;
        }
        Ok(report)
    }

    /// Evaluates one system size and writes its result files.
    pub fn process_size(&self, size: u64) -> Result<SizeReport> {
        let keys = self.config.windows_for(size);
        if keys.is_empty() {
            return Err(Error::Configuration(format!(
                "no windows configured for N={size}"
            )));
        }

        let mut collected = Collected::default();
        let windows = match self.config.sampling {
            SamplingMethod::Simple | SamplingMethod::Metropolis => {
                self.importance_windows(size, &keys, &mut collected)?
            }
            SamplingMethod::WangLandau => self.flat_histogram_windows(size, &keys, &mut collected)?,
        };

        let resources = ResourceSummary::from_headers(&collected.headers);
        resources.log(size);
        if windows.is_empty() {
            return Err(Error::DataInsufficient(format!(
                "no usable window for N={size}"
            )));
        }

        let (windows, stitch, distribution, log_norm, moments) = self.combine(size, windows)?;
        Ok(SizeReport {
            size,
            windows: windows.iter().map(|w| w.key).collect(),
            skipped: collected.skipped,
            not_equilibrated: collected.not_equilibrated,
            stitch,
            distribution,
            log_norm,
            moments,
            resources,
            simple: collected.simple,
        })
    }

    fn load_series(&self, size: u64, key: WindowKey) -> Result<LoadedSeries> {
        let path = self.config.raw_path(size, key);
        let skip = self.config.equilibration_for(size, key);
        let run = RunFile::read(&path)?;
        let raw = run.column(self.config.column(), skip)?;
        let label = format!("N={size} {key}");
        let (series, _tau) = estimate_and_decorrelate(&raw, self.config.autocorr_prefix(), &label)?;
        let unbiased = matches!(key, WindowKey::Theta(t) if t.is_infinite());
        let simple = unbiased.then(|| {
            simple::summarize_run(
                &run,
                size,
                &self.config.analysis.simple_columns,
                skip,
                &self.bootstrap,
            )
        });
        Ok(LoadedSeries {
            key,
            header: run.header,
            series,
            simple,
        })
    }

    /// Histogram windows for biased (or unbiased) importance-sampling runs.
    fn importance_windows(
        &self,
        size: u64,
        keys: &[WindowKey],
        collected: &mut Collected,
    ) -> Result<Vec<Window>> {
        let pb = progress_bar(keys.len() as u64, &format!("N={size}"), self.config.analysis.progress);
        pb.set_message("loading");
        let results: Vec<(WindowKey, Result<LoadedSeries>)> = keys
            .par_iter()
            .map(|&key| {
                let res = self.load_series(size, key);
                pb.inc(1);
                (key, res)
            })
            .collect();

        let mut loaded = Vec::new();
        for (key, res) in results {
            match res {
                Ok(l) => loaded.push(l),
                Err(e) => collected.absorb(size, key, e)?,
            }
        }
        for l in loaded.iter_mut() {
            collected.headers.push(l.header.clone());
            match l.simple.take() {
                Some(Ok(row)) => collected.simple = Some(row),
                Some(Err(e)) => warn!("N={size}: no simple sampling summary: {e}"),
                None => {}
            }
        }
        if loaded.is_empty() {
            pb.finish_and_clear();
            return Ok(Vec::new());
        }

        let pooled: Vec<f64> = loaded.iter().flat_map(|l| l.series.iter().copied()).collect();
        let policy = match (&self.config.sampling, &self.config.analysis.binning) {
            (SamplingMethod::Simple, BinningPolicy::Percentile { .. }) => {
                BinningPolicy::Linear { bins: None }
            }
            (_, policy) => policy.clone(),
        };
        let edges = policy.edges(&pooled)?;
        info!(
            "N={size}: {} windows, {} samples, {} bins",
            loaded.len(),
            pooled.len(),
            edges.n_bins()
        );

        pb.set_message("histograms");
        let min_occupancy = self.config.analysis.min_occupancy;
        let histograms: Vec<(WindowKey, Histogram)> = loaded
            .par_iter()
            .map(|l| (l.key, Histogram::bootstrap(&l.series, &edges, &self.bootstrap)))
            .collect();
        output::write_histograms(&size_file(&self.config.output_dir, "hist", size), &histograms)?;
        pb.finish_with_message("done");

        Ok(histograms
            .iter()
            .map(|(key, hist)| {
                let theta = match key {
                    WindowKey::Theta(t) => *t,
                    WindowKey::Range(..) => f64::INFINITY,
                };
                Window::from_biased_histogram(theta, hist, min_occupancy)
            })
            .collect())
    }

    fn load_flat_histogram(&self, size: u64, key: WindowKey) -> Result<(RunHeader, Window)> {
        let path = self.config.raw_path(size, key);
        let skip = self.config.equilibration_for(size, key);
        let run = RunFile::read(&path)?;
        let file = FlatHistogramFile::from_run(&run)?;
        Ok((run.header, flat_histogram_window(key, &file, skip, &self.bootstrap)?))
    }

    /// One window per flat-histogram run, averaged over its iterations.
    fn flat_histogram_windows(
        &self,
        size: u64,
        keys: &[WindowKey],
        collected: &mut Collected,
    ) -> Result<Vec<Window>> {
        let pb = progress_bar(keys.len() as u64, &format!("N={size}"), self.config.analysis.progress);
        let results: Vec<(WindowKey, Result<(RunHeader, Window)>)> = keys
            .par_iter()
            .map(|&key| {
                let res = self.load_flat_histogram(size, key);
                pb.inc(1);
                (key, res)
            })
            .collect();
        pb.finish_with_message("done");

        let mut windows = Vec::new();
        for (key, res) in results {
            match res {
                Ok((header, window)) => {
                    collected.headers.push(header);
                    windows.push(window);
                }
                Err(e) => collected.absorb(size, key, e)?,
            }
        }
        Ok(windows)
    }

    /// Stitches, merges, normalizes and writes everything downstream of the windows.
    fn combine(
        &self,
        size: u64,
        mut windows: Vec<Window>,
    ) -> Result<(Vec<Window>, StitchReport, Distribution, f64, Option<Moments>)> {
        let out = &self.config.output_dir;
        sort_by_abscissa(&mut windows);
        output::write_windows(&size_file(out, "dist", size), &windows)?;

        let stitch = self.config.stitcher().stitch(&mut windows);
        if stitch.is_degraded() {
            warn!(
                "N={size}: {} of {} links fell back to a zero shift",
                stitch.n_failed(),
                stitch.links.len()
            );
        }
        output::write_windows(&size_file(out, "stitched", size), &windows)?;
        output::write_overlaps(&size_file(out, "overlap", size), &stitch)?;

        let mut distribution = Distribution::from_windows(&windows);
        let log_norm = distribution.normalize()?;
        let moments = match distribution.moments(&self.bootstrap) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("N={size}: no moments: {e}");
                None
            }
        };
        if let Some(m) = &moments {
            info!(
                "N={size}: mean {:.4} +- {:.4}, variance {:.4} +- {:.4}",
                m.mean.mean, m.mean.stderr, m.variance.mean, m.variance.stderr
            );
        }

        output::write_distribution(
            &size_file(out, "whole", size),
            &distribution,
            &stitch,
            log_norm,
            moments.as_ref(),
        )?;
        output::write_rate(&size_file(out, "rate", size), &distribution.rate_function(size))?;
        Ok((windows, stitch, distribution, log_norm, moments))
    }
}

/**
Builds the window of one flat-histogram run.

The first `skip` iterations are dropped. Every remaining iteration is
normalized on its own (iterations that cannot be normalized are left out),
then the bootstrap over iterations gives mean and error per center. The
abscissa error is half the center spacing.
*/
pub fn flat_histogram_window(
    key: WindowKey,
    file: &FlatHistogramFile,
    skip: usize,
    bootstrap: &Bootstrap,
) -> Result<Window> {
    let centers = &file.centers;
    let normalized: Vec<Vec<f64>> = file
        .iterations
        .iter()
        .skip(skip)
        .filter_map(|row| normalize_log_density(centers, row))
        .collect();
    if normalized.is_empty() {
        return Err(Error::DataInsufficient(format!(
            "{key}: no normalizable iteration"
        )));
    }

    let half_width = match centers.as_slice() {
        [a, b, ..] => 0.5 * (b - a),
        _ => 0.0,
    };
    let (y, y_err): (Vec<f64>, Vec<f64>) = (0..centers.len())
        .map(|i| {
            let values: Vec<f64> = normalized
                .iter()
                .map(|row| row[i])
                .filter(|v| v.is_finite())
                .collect();
            let est = bootstrap.mean(&values);
            (est.mean, est.stderr)
        })
        .unzip();

    Ok(Window {
        key,
        x: centers.clone(),
        x_err: vec![half_width; centers.len()],
        y,
        y_err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_codes() {
        for code in 0..3u8 {
            let method = SamplingMethod::try_from(code).unwrap();
            assert_eq!(method.code(), code);
        }
        let res = SamplingMethod::try_from(5);
        assert!(matches!(res, Err(Error::Configuration(_))), "Got {res:?}");
    }

    #[test]
    fn test_flat_histogram_window() {
        let file = FlatHistogramFile {
            centers: vec![0.0, 1.0, 2.0],
            iterations: vec![
                vec![99.0, 99.0, 99.0],
                vec![5.0, 5.0, 5.0],
                vec![-3.0, -3.0, -3.0],
            ],
        };
        let w = flat_histogram_window(WindowKey::Range(0.0, 2.0), &file, 1, &Bootstrap::default())
            .unwrap();
        assert_eq!(w.x_err, vec![0.5; 3]);
        for (y, e) in w.y.iter().zip(w.y_err.iter()) {
            assert!((y + 2f64.ln()).abs() < 1e-12, "Expected -ln 2, got {y}");
            assert!(e.abs() < 1e-12, "Expected zero error, got {e}");
        }
    }

    #[test]
    fn test_flat_histogram_needs_iterations() {
        let file = FlatHistogramFile {
            centers: vec![0.0, 1.0],
            iterations: vec![vec![0.0, 0.0]],
        };
        let res = flat_histogram_window(WindowKey::Range(0.0, 1.0), &file, 1, &Bootstrap::default());
        assert!(matches!(res, Err(Error::DataInsufficient(_))), "Got {res:?}");
    }

    #[test]
    fn test_size_without_windows_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = EvaluationConfig::new(vec![8], SamplingMethod::Metropolis);
        cfg.output_dir = dir.path().to_path_buf();
        cfg.analysis.progress = false;
        let pipeline = Pipeline::new(cfg).unwrap();
        let res = pipeline.process_size(8);
        assert!(matches!(res, Err(Error::Configuration(_))), "Got {res:?}");

        let report = pipeline.run().unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(dir.path().join("summary.dat").is_file());
    }
}
