/*!
# Raw Run Files

Reader for the text files written by the simulator: a block of `#` comment
lines carrying run metadata, followed by whitespace-separated data rows. Files
are normally gzip-compressed; `open` looks for `<path>.gz` first and falls
back to the plain file.

Recognised header tokens:

| line prefix                  | field                        |
|------------------------------|------------------------------|
| `# Version:`                 | [`RunHeader::version`]       |
| `# Compiled:`                | [`RunHeader::compiled`]      |
| `# ... at theta=T ...`       | [`RunHeader::theta`]         |
| `# proposed changes:`        | [`RunHeader::proposed`]      |
| `# rejected changes:`        | [`RunHeader::rejected`]      |
| `# time in seconds:`         | [`RunHeader::time_seconds`]  |
| `# time/sweep in seconds:`   | [`RunHeader::time_per_sweep`]|
| `# max vmem: VmPeak: N kB`   | [`RunHeader::vmem_kb`]       |
| `# Does not equilibrate`     | abort marker (first 5 lines) |
*/

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::info;

use crate::error::{Error, Result};

/// Marker written by the simulator when a run never equilibrated.
pub const ABORT_MARKER: &str = "# Does not equilibrate";

/// Only this many leading lines are searched for [`ABORT_MARKER`].
pub const ABORT_SCAN_LINES: usize = 5;

/// Path of the gzip file belonging to an uncompressed name.
pub fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

/**
Finds the file to read for `path`.

A path that already ends in `.gz` is used as given. Otherwise `<path>.gz`
is preferred and `path` itself is the fallback. Neither existing is
[`Error::MissingInput`].
*/
pub fn resolve(path: &Path) -> Result<PathBuf> {
    let is_gz = path.extension().is_some_and(|e| e == "gz");
    let candidates = if is_gz {
        vec![path.to_path_buf()]
    } else {
        vec![gz_path(path), path.to_path_buf()]
    };
    candidates
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| Error::MissingInput(path.to_path_buf()))
}

/// Opens a run file for line-wise reading, decompressing when needed.
pub fn open(path: &Path) -> Result<(PathBuf, Box<dyn BufRead>)> {
    let resolved = resolve(path)?;
    let file = File::open(&resolved).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::MissingInput(path.to_path_buf()),
        _ => Error::io(&resolved, e),
    })?;
    let reader: Box<dyn BufRead> = if resolved.extension().is_some_and(|e| e == "gz") {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok((resolved, reader))
}

/// Metadata from the comment lines of a run file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunHeader {
    pub version: Option<String>,
    pub compiled: Option<String>,
    pub theta: Option<f64>,
    pub proposed: Option<u64>,
    pub rejected: Option<u64>,
    pub time_seconds: Option<f64>,
    pub time_per_sweep: Option<f64>,
    /// Peak virtual memory in kB.
    pub vmem_kb: Option<f64>,
    /// Abort marker found in the first lines.
    pub aborted: bool,
}

impl RunHeader {
    /// Updates the header from one `#` line; unknown lines are ignored.
    pub fn parse_line(&mut self, line: &str) {
        let Some(body) = line.strip_prefix('#').map(str::trim) else {
            return;
        };
        if let Some(rest) = body.strip_prefix("Version:") {
            self.version = Some(rest.trim().to_string());
        } else if let Some(rest) = body.strip_prefix("Compiled:") {
            self.compiled = Some(rest.trim().to_string());
        } else if body.starts_with("proposed changes") {
            self.proposed = leading_number(after_colon(body));
        } else if body.starts_with("rejected changes") {
            self.rejected = leading_number(after_colon(body));
        } else if body.starts_with("time in seconds") {
            self.time_seconds = unit_value(after_colon(body), "s");
        } else if body.starts_with("time/sweep in seconds") {
            self.time_per_sweep = unit_value(after_colon(body), "s");
        } else if body.starts_with("max vmem") {
            self.vmem_kb = unit_value(last_field(body), "kB");
        } else if let Some(pos) = body.find("theta=") {
            let value = body[pos + "theta=".len()..]
                .split_whitespace()
                .next()
                .and_then(|v| v.parse().ok());
            self.theta = value;
        }
    }

    /// Fraction of accepted proposals, when both counters are present.
    pub fn acceptance(&self) -> Option<f64> {
        match (self.proposed, self.rejected) {
            (Some(p), Some(r)) if p > 0 => Some(1.0 - r as f64 / p as f64),
            _ => None,
        }
    }

    /// Time measurement, preferring the per-sweep figure.
    pub fn time(&self) -> Option<f64> {
        self.time_per_sweep.or(self.time_seconds)
    }
}

fn after_colon(s: &str) -> &str {
    s.split_once(':').map(|(_, r)| r.trim()).unwrap_or("")
}

fn last_field(s: &str) -> &str {
    s.rsplit(':').next().unwrap_or("").trim()
}

fn leading_number<T: std::str::FromStr>(s: &str) -> Option<T> {
    s.split_whitespace().next()?.parse().ok()
}

fn unit_value(s: &str, unit: &str) -> Option<f64> {
    s.trim().trim_end_matches(unit).trim().parse().ok()
}

fn parse_row(line: &str, path: &Path, line_no: usize) -> Result<Vec<f64>> {
    line.split_whitespace()
        .map(|tok| {
            tok.parse::<f64>().map_err(|e| Error::Parse {
                path: path.to_path_buf(),
                line: line_no,
                message: format!("{tok:?}: {e}"),
            })
        })
        .collect()
}

/// A fully loaded run: header plus numeric rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFile {
    pub path: PathBuf,
    pub header: RunHeader,
    pub rows: Vec<Vec<f64>>,
}

impl RunFile {
    /// Reads and parses a run file; malformed numbers are [`Error::Parse`].
    pub fn read(path: &Path) -> Result<Self> {
        let (resolved, reader) = open(path)?;
        let mut header = RunHeader::default();
        let mut rows = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| Error::io(&resolved, e))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('#') {
                if i < ABORT_SCAN_LINES && trimmed.contains(ABORT_MARKER) {
                    // Nothing after the marker is used.
                    header.aborted = true;
                    break;
                }
                header.parse_line(trimmed);
                continue;
            }
            rows.push(parse_row(trimmed, &resolved, i + 1)?);
        }
        Ok(Self {
            path: resolved,
            header,
            rows,
        })
    }

    /**
    Returns one column, skipping the first `skip` rows (equilibration).

    Fails with [`Error::NotEquilibrated`] for aborted runs and with
    [`Error::Configuration`] when a row lacks the column.
    */
    pub fn column(&self, index: usize, skip: usize) -> Result<Vec<f64>> {
        if self.header.aborted {
            return Err(Error::NotEquilibrated(self.path.clone()));
        }
        self.rows
            .iter()
            .skip(skip)
            .map(|row| {
                row.get(index).copied().ok_or_else(|| {
                    Error::Configuration(format!(
                        "column {index} missing in {} (row has {} columns)",
                        self.path.display(),
                        row.len()
                    ))
                })
            })
            .collect()
    }

    /// Number of columns of the first row, 0 for an empty file.
    pub fn n_columns(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }
}

/**
Output of a flat-histogram run: the first data row holds the bin centers,
every further row one unnormalized log-density per iteration.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct FlatHistogramFile {
    pub centers: Vec<f64>,
    pub iterations: Vec<Vec<f64>>,
}

impl FlatHistogramFile {
    /// Splits an already loaded run into centers and iterations.
    ///
    /// Iteration rows whose length differs from the center row are dropped.
    pub fn from_run(run: &RunFile) -> Result<Self> {
        if run.header.aborted {
            return Err(Error::NotEquilibrated(run.path.clone()));
        }
        let (centers, rest) = run
            .rows
            .split_first()
            .ok_or_else(|| Error::DataInsufficient(format!("{} has no data", run.path.display())))?;
        let iterations: Vec<Vec<f64>> = rest
            .iter()
            .filter(|r| r.len() == centers.len())
            .cloned()
            .collect();
        if iterations.is_empty() {
            return Err(Error::DataInsufficient(format!(
                "{} has no complete iteration",
                run.path.display()
            )));
        }
        Ok(Self {
            centers: centers.clone(),
            iterations,
        })
    }
}

/// Range of run time and peak memory over several run files.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSummary {
    pub time: Option<(f64, f64)>,
    pub vmem_kb: Option<(f64, f64)>,
}

fn widen(range: Option<(f64, f64)>, value: Option<f64>) -> Option<(f64, f64)> {
    match (range, value) {
        (Some((lo, hi)), Some(v)) => Some((lo.min(v), hi.max(v))),
        (None, Some(v)) => Some((v, v)),
        (r, None) => r,
    }
}

impl ResourceSummary {
    /// Folds run headers; aborted runs are ignored.
    pub fn from_headers<'a>(headers: impl IntoIterator<Item = &'a RunHeader>) -> Self {
        headers
            .into_iter()
            .filter(|h| !h.aborted)
            .fold(Self::default(), |acc, h| Self {
                time: widen(acc.time, h.time()),
                vmem_kb: widen(acc.vmem_kb, h.vmem_kb),
            })
    }

    pub fn log(&self, size: u64) {
        match self.time {
            Some((lo, hi)) => info!("N={size}: time/sweep between {lo:.2}s - {hi:.2}s"),
            None => info!("N={size}: no time measured"),
        }
        match self.vmem_kb {
            Some((lo, hi)) => info!("N={size}: memory between {lo:.0}kB - {hi:.0}kB"),
            None => info!("N={size}: no memory measured"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn read_series(path: &Path, column: usize, skip: usize) -> Result<Vec<f64>> {
        RunFile::read(path)?.column(column, skip)
    }

    fn write_gz(path: &Path, text: &str) {
        let file = File::create(gz_path(path)).unwrap();
        let mut enc = GzEncoder::new(file, Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap();
    }

    const SAMPLE: &str = "\
# Version: 1.4.2
# Compiled: Jan 1 2020 12:00:00
# large deviation simulation at theta=-5 and steps=64
# sweeps iterations
1 10.5 3
2 11.0 4
3 12.5 5
# proposed changes: 1000
# rejected changes: 250 (25%)
# time/sweep in seconds: 0.12s
# max vmem: VmPeak:    20480 kB
";

    #[test]
    fn test_reads_gzip_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("run.dat");
        write_gz(&base, SAMPLE);
        let run = RunFile::read(&base).unwrap();
        assert_eq!(run.path, gz_path(&base));
        assert_eq!(run.rows.len(), 3);
        assert_eq!(run.n_columns(), 3);
        let h = &run.header;
        assert_eq!(h.version.as_deref(), Some("1.4.2"));
        assert_eq!(h.theta, Some(-5.0));
        assert_eq!(h.acceptance(), Some(0.75));
        assert_eq!(h.time(), Some(0.12));
        assert_eq!(h.vmem_kb, Some(20480.0));
        assert!(!h.aborted);
        assert_eq!(run.column(1, 1).unwrap(), vec![11.0, 12.5]);
    }

    #[test]
    fn test_plain_text_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("plain.dat");
        std::fs::write(&base, "1 2\n3 4\n").unwrap();
        assert_eq!(read_series(&base, 1, 0).unwrap(), vec![2.0, 4.0]);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let res = RunFile::read(&dir.path().join("nope.dat"));
        assert!(matches!(res, Err(Error::MissingInput(_))), "Got {res:?}");
    }

    #[test]
    fn test_abort_marker_only_in_leading_lines() {
        let dir = tempfile::tempdir().unwrap();
        let early = dir.path().join("early.dat");
        write_gz(&early, "# Version: 1\n# Does not equilibrate\n1 2\n");
        assert!(RunFile::read(&early).unwrap().header.aborted);
        let res = read_series(&early, 0, 0);
        assert!(matches!(res, Err(Error::NotEquilibrated(_))), "Got {res:?}");

        let late = dir.path().join("late.dat");
        write_gz(&late, "#\n#\n#\n#\n#\n# Does not equilibrate\n1 2\n");
        assert!(!RunFile::read(&late).unwrap().header.aborted);
        assert_eq!(read_series(&late, 0, 0).unwrap(), vec![1.0]);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("bad.dat");
        std::fs::write(&base, "# x\n1 2\n1 abc\n").unwrap();
        match RunFile::read(&base) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("Expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("short.dat");
        std::fs::write(&base, "1 2\n3\n").unwrap();
        let res = read_series(&base, 1, 0);
        assert!(matches!(res, Err(Error::Configuration(_))), "Got {res:?}");
    }

    #[test]
    fn test_flat_histogram_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("wl.dat");
        write_gz(&base, "# wang landau\n0 1 2\n5 6 7\n1 1 1\n");
        let wl = FlatHistogramFile::from_run(&RunFile::read(&base).unwrap()).unwrap();
        assert_eq!(wl.centers, vec![0.0, 1.0, 2.0]);
        assert_eq!(wl.iterations.len(), 2);
    }

    #[test]
    fn test_resource_summary() {
        let mut a = RunHeader::default();
        a.parse_line("# time in seconds: 3.5s");
        a.parse_line("# max vmem: VmPeak: 100 kB");
        let mut b = RunHeader::default();
        b.parse_line("# time/sweep in seconds: 1.25s");
        let mut c = RunHeader::default();
        c.parse_line("# time in seconds: 99s");
        c.aborted = true;
        let summary = ResourceSummary::from_headers([&a, &b, &c]);
        assert_eq!(summary.time, Some((1.25, 3.5)));
        assert_eq!(summary.vmem_kb, Some((100.0, 100.0)));
    }
}
