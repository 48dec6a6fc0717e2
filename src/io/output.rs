/*!
# Result Files

Every artifact is whitespace-delimited text: `#` comment lines first, then
one row of numbers per line, with blank lines separating windows. The files
are written with the [`csv`] crate using a space delimiter.

Per system size `N` the pipeline writes `hist_N{N}.dat`, `dist_N{N}.dat`,
`stitched_N{N}.dat`, `overlap_N{N}.dat`, `whole_N{N}.dat` and
`rate_N{N}.dat`; `summary.dat` and `simple.dat` collect one row per size.
*/

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, Terminator, Writer, WriterBuilder};

use crate::distribution::{Distribution, Moments, RatePoint};
use crate::error::{Error, Result};
use crate::histogram::Histogram;
use crate::stitch::{LinkStatus, StitchReport};
use crate::window::{Window, WindowKey};

/// Space-delimited writer with support for comments and blank lines.
pub struct DatWriter {
    path: PathBuf,
    inner: Writer<File>,
}

impl DatWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let inner = WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .flexible(true)
            .quote_style(QuoteStyle::Never)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(file);
        Ok(Self {
            path: path.to_path_buf(),
            inner,
        })
    }

    /// Writes `# text`.
    pub fn comment(&mut self, text: &str) -> Result<()> {
        self.inner.write_record([format!("# {text}")])?;
        Ok(())
    }

    pub fn row(&mut self, values: &[f64]) -> Result<()> {
        self.inner
            .write_record(values.iter().map(|v| v.to_string()))?;
        Ok(())
    }

    /// Row with a leading integer column (system size).
    pub fn row_with_size(&mut self, size: u64, values: &[f64]) -> Result<()> {
        let record = std::iter::once(size.to_string()).chain(values.iter().map(|v| v.to_string()));
        self.inner.write_record(record)?;
        Ok(())
    }

    pub fn blank(&mut self) -> Result<()> {
        self.inner.flush().map_err(|e| Error::io(&self.path, e))?;
        let mut file: &File = self.inner.get_ref();
        file.write_all(b"\n").map_err(|e| Error::io(&self.path, e))
    }

    pub fn finish(mut self) -> Result<()> {
        self.inner.flush().map_err(|e| Error::io(&self.path, e))
    }
}

/// File name for a per-size artifact, e.g. `whole_N64.dat`.
pub fn size_file(dir: &Path, stem: &str, size: u64) -> PathBuf {
    dir.join(format!("{stem}_N{size}.dat"))
}

/// Raw histograms, one block per window: `x x_err count count_err`.
pub fn write_histograms(path: &Path, histograms: &[(WindowKey, Histogram)]) -> Result<()> {
    let mut w = DatWriter::create(path)?;
    w.comment("x x_err count count_err")?;
    for (i, (key, hist)) in histograms.iter().enumerate() {
        if i > 0 {
            w.blank()?;
        }
        w.comment(&format!("window {key}"))?;
        for b in 0..hist.n_bins() {
            w.row(&[
                hist.centers[b],
                hist.half_widths[b],
                hist.counts[b],
                hist.errors[b],
            ])?;
        }
    }
    w.finish()
}

/// Window curves, one block per window: `x x_err y y_err`.
pub fn write_windows(path: &Path, windows: &[Window]) -> Result<()> {
    let mut w = DatWriter::create(path)?;
    w.comment("S S_err lnP(S) lnP(S)_err")?;
    for (i, window) in windows.iter().enumerate() {
        if i > 0 {
            w.blank()?;
        }
        w.comment(&format!("window {}", window.key))?;
        for b in 0..window.len() {
            w.row(&[window.x[b], window.x_err[b], window.y[b], window.y_err[b]])?;
        }
    }
    w.finish()
}

/// Overlap differences per link: `x diff`.
pub fn write_overlaps(path: &Path, report: &StitchReport) -> Result<()> {
    let mut w = DatWriter::create(path)?;
    w.comment("S right-left")?;
    for (i, link) in report.links.iter().enumerate() {
        if i > 0 {
            w.blank()?;
        }
        w.comment(&format!(
            "{} -> {}: shift {} +- {} ({:?})",
            link.left, link.right, link.shift.mean, link.shift.stderr, link.status
        ))?;
        for (x, d) in &link.overlap {
            w.row(&[*x, *d])?;
        }
    }
    w.finish()
}

/**
Final distribution `S S_err P(S) P(S)_err` (log scale).

The header records the normalization and moments and lists every degraded
link and proposed intermediate window.
*/
pub fn write_distribution(
    path: &Path,
    dist: &Distribution,
    report: &StitchReport,
    log_norm: f64,
    moments: Option<&Moments>,
) -> Result<()> {
    let mut w = DatWriter::create(path)?;
    w.comment(&format!("ln Z = {log_norm}"))?;
    if let Some(m) = moments {
        w.comment(&format!(
            "mean = {} +- {}, variance = {} +- {}",
            m.mean.mean, m.mean.stderr, m.variance.mean, m.variance.stderr
        ))?;
    }
    for link in &report.links {
        match link.status {
            LinkStatus::Ok => {}
            LinkStatus::SparseOverlap => w.comment(&format!(
                "sparse overlap {} -> {} ({} points)",
                link.left,
                link.right,
                link.overlap.len()
            ))?,
            LinkStatus::Failed => w.comment(&format!(
                "degraded link {} -> {}: zero shift",
                link.left, link.right
            ))?,
        }
    }
    for key in report.proposed() {
        w.comment(&format!("proposed window {key}"))?;
    }
    w.comment("S S_err P(S) P(S)_err")?;
    for i in 0..dist.len() {
        w.row(&[dist.x[i], dist.x_err[i], dist.y[i], dist.y_err[i]])?;
    }
    w.finish()
}

pub fn write_rate(path: &Path, rate: &[RatePoint]) -> Result<()> {
    let mut w = DatWriter::create(path)?;
    w.comment("S/N Phi Phi_err")?;
    for p in rate {
        w.row(&[p.s, p.phi, p.phi_err])?;
    }
    w.finish()
}

/// One line of `summary.dat`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryRow {
    pub size: u64,
    pub moments: Moments,
}

pub fn write_summary(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    let mut w = DatWriter::create(path)?;
    w.comment("N mean err variance err")?;
    for r in rows {
        w.row_with_size(
            r.size,
            &[
                r.moments.mean.mean,
                r.moments.mean.stderr,
                r.moments.variance.mean,
                r.moments.variance.stderr,
            ],
        )?;
    }
    w.finish()
}

/// One line of `simple.dat`: mean and variance with errors for every column.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleRow {
    pub size: u64,
    pub columns: Vec<Moments>,
}

pub fn write_simple(path: &Path, rows: &[SimpleRow]) -> Result<()> {
    let mut w = DatWriter::create(path)?;
    w.comment("N then per column: mean err variance err")?;
    for r in rows {
        let values: Vec<f64> = r
            .columns
            .iter()
            .flat_map(|m| [m.mean.mean, m.mean.stderr, m.variance.mean, m.variance.stderr])
            .collect();
        w.row_with_size(r.size, &values)?;
    }
    w.finish()
}
