//! Summary statistics of an unbiased (simple sampling) run.
//!
//! Every selected column gets a bootstrap mean and variance, each with its
//! standard error; one [`SimpleRow`] per system size ends up in `simple.dat`.

use tracing::debug;

use crate::bootstrap::Bootstrap;
use crate::distribution::Moments;
use crate::error::{Error, Result};
use crate::io::output::SimpleRow;
use crate::io::RunFile;

/// Bootstrap mean and variance of one sample column.
pub fn column_moments(data: &[f64], bootstrap: &Bootstrap) -> Moments {
    Moments {
        mean: bootstrap.mean(data),
        variance: bootstrap.variance(data),
    }
}

/**
Summarizes the columns of a run after dropping `skip` equilibration rows.

An empty `columns` selects every column of the file. Aborted runs are
[`Error::NotEquilibrated`]; a file without data rows is
[`Error::DataInsufficient`].
*/
pub fn summarize_run(
    run: &RunFile,
    size: u64,
    columns: &[usize],
    skip: usize,
    bootstrap: &Bootstrap,
) -> Result<SimpleRow> {
    if run.header.aborted {
        return Err(Error::NotEquilibrated(run.path.clone()));
    }
    let n_columns = run.n_columns();
    if n_columns == 0 {
        return Err(Error::DataInsufficient(format!(
            "{} has no data rows",
            run.path.display()
        )));
    }
    let selected: Vec<usize> = if columns.is_empty() {
        (0..n_columns).collect()
    } else {
        columns.to_vec()
    };
    let columns = selected
        .iter()
        .map(|&c| {
            let data = run.column(c, skip)?;
            debug!("N={size}: column {c} has {} samples", data.len());
            Ok(column_moments(&data, bootstrap))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SimpleRow { size, columns })
}
