/*!
# Simulator Launcher

Builds the command line of the external random-walk simulator for every
configured (size, window) pair and runs it. The simulator is a black box: the
only contract is the output file it writes and its exit status.

Runs whose gzip output already exists are skipped. A non-zero exit status is
logged and counted but never stops the batch. Importance-sampling runs are
launched in parallel; flat-histogram runs are already parallel internally
and run one at a time.
*/

use std::fs;
use std::process::{Command, Stdio};

use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::config::EvaluationConfig;
use crate::error::{Error, Result};
use crate::io::run_file::gz_path;
use crate::pipeline::{progress_bar, SamplingMethod};
use crate::window::WindowKey;

/// What happened to one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Output already present.
    Skipped,
    Completed,
    /// Non-zero exit status (`None` when killed by a signal).
    Failed(Option<i32>),
}

/// Counts over a whole batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub skipped: usize,
    pub completed: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: LaunchOutcome) {
        match outcome {
            LaunchOutcome::Skipped => self.skipped += 1,
            LaunchOutcome::Completed => self.completed += 1,
            LaunchOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Arguments passed to the simulator for one run (program name excluded).
pub fn command_args(cfg: &EvaluationConfig, size: u64, key: WindowKey) -> Vec<String> {
    let r = &cfg.run;
    let theta = match key {
        WindowKey::Theta(t) => t,
        WindowKey::Range(..) => 0.0,
    };
    let iterations = r.iterations;
    let mut args = vec![
        "-N".to_string(),
        size.to_string(),
        "-x".into(),
        r.seed_mc.to_string(),
        "-y".into(),
        r.seed_r.to_string(),
        "-T".into(),
        format!("{theta:.5}"),
        "-n".into(),
        iterations.to_string(),
        "-c".into(),
        r.method.to_string(),
        "-d".into(),
        r.dimension.to_string(),
        "-t".into(),
        r.typ.to_string(),
        "-w".into(),
        r.observable.to_string(),
        "-q".into(),
        "-o".into(),
        cfg.raw_path(size, key).display().to_string(),
        "-m".into(),
        cfg.sampling.code().to_string(),
    ];
    if let WindowKey::Range(lo, hi) = key {
        if lo.is_finite() && hi.is_finite() {
            args.extend(["-e".into(), lo.to_string(), "-e".into(), hi.to_string()]);
        }
    }
    if let Some(dir) = &cfg.simulator.raw_conf {
        let conf = dir.join(format!("{}.dat", cfg.basename(size, key)));
        args.extend(["-O".into(), conf.display().to_string()]);
    }
    let t_eq = cfg.equilibration_for(size, key);
    if t_eq > 0 {
        args.extend(["--t_eq".into(), t_eq.to_string()]);
    }
    if cfg.simulator.akl {
        args.push("-a".into());
    }
    args
}

/// Runs the simulator for one (size, window) pair unless its output exists.
pub fn launch(cfg: &EvaluationConfig, size: u64, key: WindowKey) -> Result<LaunchOutcome> {
    let output = cfg.raw_path(size, key);
    if gz_path(&output).is_file() {
        debug!("N={size} {key}: output exists, skipping");
        return Ok(LaunchOutcome::Skipped);
    }
    let args = command_args(cfg, size, key);
    let status = Command::new(&cfg.simulator.binary)
        .args(&args)
        .stdout(Stdio::null())
        .status()
        .map_err(|e| Error::io(&cfg.simulator.binary, e))?;
    if status.success() {
        Ok(LaunchOutcome::Completed)
    } else {
        error!(
            "error in command '{} {}' ({status})",
            cfg.simulator.binary.display(),
            args.join(" ")
        );
        Ok(LaunchOutcome::Failed(status.code()))
    }
}

/**
Launches every configured run.

Output directories are created up front. Failing to start the binary at
all (e.g. it does not exist) is an error for that run and is logged like a
non-zero exit.
*/
pub fn run_all(cfg: &EvaluationConfig) -> Result<BatchSummary> {
    fs::create_dir_all(&cfg.raw_dir).map_err(|e| Error::io(&cfg.raw_dir, e))?;
    if let Some(dir) = &cfg.simulator.raw_conf {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }

    let jobs: Vec<(u64, WindowKey)> = cfg
        .sizes
        .iter()
        .flat_map(|&n| cfg.windows_for(n).into_iter().map(move |k| (n, k)))
        .collect();
    info!("executing {} jobs", jobs.len());

    let pb = progress_bar(jobs.len() as u64, "simulate", cfg.analysis.progress);
    let run_one = |&(size, key): &(u64, WindowKey)| {
        let outcome = launch(cfg, size, key).unwrap_or_else(|e| {
            error!("N={size} {key}: {e}");
            LaunchOutcome::Failed(None)
        });
        pb.inc(1);
        outcome
    };

    let outcomes: Vec<LaunchOutcome> = match cfg.sampling {
        SamplingMethod::WangLandau => jobs.iter().map(run_one).collect(),
        _ => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(cfg.simulator.jobs)
                .build()
                .map_err(|e| Error::Configuration(format!("cannot build thread pool: {e}")))?;
            pool.install(|| jobs.par_iter().map(run_one).collect())
        }
    };
    pb.finish_with_message("done");

    let mut summary = BatchSummary::default();
    for outcome in outcomes {
        summary.record(outcome);
    }
    info!(
        "simulation batch: {} completed, {} skipped, {} failed",
        summary.completed, summary.skipped, summary.failed
    );
    Ok(summary)
}
